//! PROPFIND request parsing and multistatus rendering.
//!
//! Request bodies are parsed into an [`xmltree::Element`], which resolves
//! namespace prefixes and entities. Responses are written one
//! `<D:response>` at a time through an `xml-rs` event writer whose buffer is
//! drained into a [`BodySink`] while the walker runs.

use bytes::Bytes;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use tracing::trace;
use xml::common::XmlVersion;
use xml::escape::escape_str_attribute;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent};
use xmltree::{Element, XMLNode};

use crate::error::{GridavError, Result};
use crate::props::{DAV_NAMESPACE, PropName, PropertyStore};
use crate::resource::ResourceNode;
use crate::rpc::GridConnection;
use crate::stream::BodySink;
use crate::walk::{CallType, Visitor};

/// Characters escaped in `href` path segments.
const HREF_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Prefix bound to [`DAV_NAMESPACE`] in generated documents.
const DAV_PREFIX: &str = "D";

/// What a PROPFIND asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropfindRequest {
    AllProp,
    PropName,
    Prop(Vec<PropName>),
}

impl PropfindRequest {
    /// Parse a request body. An empty body means `allprop`.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(PropfindRequest::AllProp);
        }

        let root = Element::parse(body)
            .map_err(|e| GridavError::BadRequest(format!("malformed PROPFIND body: {e}")))?;
        if !is_dav_element(&root, "propfind") {
            return Err(GridavError::BadRequest(
                "PROPFIND body must be a DAV:propfind element".into(),
            ));
        }

        for child in child_elements(&root) {
            if child.namespace.as_deref() != Some(DAV_NAMESPACE) {
                continue;
            }
            match child.name.as_str() {
                "allprop" => return Ok(PropfindRequest::AllProp),
                "propname" => return Ok(PropfindRequest::PropName),
                "prop" => {
                    let names = child_elements(child)
                        .map(|el| {
                            PropName::new(el.namespace.clone().unwrap_or_default(), &el.name)
                        })
                        .collect();
                    return Ok(PropfindRequest::Prop(names));
                }
                _ => {}
            }
        }
        Err(GridavError::BadRequest(
            "PROPFIND body names neither allprop, propname nor prop".into(),
        ))
    }
}

fn is_dav_element(el: &Element, name: &str) -> bool {
    el.namespace.as_deref() == Some(DAV_NAMESPACE) && el.name == name
}

fn child_elements(el: &Element) -> impl Iterator<Item = &Element> {
    el.children.iter().filter_map(XMLNode::as_element)
}

/// Event writer for DAV documents: no indentation, `<a/>` for empty
/// elements.
pub(crate) fn dav_writer() -> EventWriter<Vec<u8>> {
    EmitterConfig::new()
        .perform_indent(false)
        .pad_self_closing(false)
        .create_writer(Vec::new())
}

pub(crate) fn xml_error(e: xml::writer::Error) -> GridavError {
    GridavError::Infrastructure(format!("XML serialization failed: {e}"))
}

/// Write `<D:{local}>text</D:{local}>`.
pub(crate) fn dav_text_element(
    xml: &mut EventWriter<Vec<u8>>,
    local: &str,
    text: &str,
) -> Result<()> {
    xml.write(XmlEvent::start_element(format!("{DAV_PREFIX}:{local}").as_str()))
        .map_err(xml_error)?;
    xml.write(XmlEvent::characters(text)).map_err(xml_error)?;
    xml.write(XmlEvent::end_element()).map_err(xml_error)
}

/// Write an empty `<D:{local}/>`.
pub(crate) fn dav_empty_element(xml: &mut EventWriter<Vec<u8>>, local: &str) -> Result<()> {
    xml.write(XmlEvent::start_element(format!("{DAV_PREFIX}:{local}").as_str()))
        .map_err(xml_error)?;
    xml.write(XmlEvent::end_element()).map_err(xml_error)
}

/// Open a document whose root binds the `D` prefix to the DAV namespace.
pub(crate) fn start_dav_document(xml: &mut EventWriter<Vec<u8>>, root: &str) -> Result<()> {
    xml.write(XmlEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    }).map_err(xml_error)?;
    let root = format!("{DAV_PREFIX}:{root}");
    xml.write(XmlEvent::start_element(root.as_str()).ns(DAV_PREFIX, DAV_NAMESPACE))
        .map_err(xml_error)
}

/// Escape text for element content.
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// URL path for a node: mount prefix plus the encoded protocol path, with a
/// trailing slash for collections.
pub fn href(mount_prefix: &str, node: &ResourceNode) -> String {
    let mut out = String::from(mount_prefix.trim_end_matches('/'));
    for segment in node.protocol_path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.extend(utf8_percent_encode(segment, HREF_ENCODE));
    }
    if node.is_collection() || out.is_empty() {
        out.push('/');
    }
    out
}

/// Walk visitor that writes a 207 multistatus body.
pub struct MultistatusWriter<'a> {
    request: &'a PropfindRequest,
    store: &'a dyn PropertyStore,
    mount_prefix: &'a str,
    sink: &'a mut dyn BodySink,
    xml: EventWriter<Vec<u8>>,
    started: bool,
}

impl<'a> MultistatusWriter<'a> {
    pub fn new(
        request: &'a PropfindRequest,
        store: &'a dyn PropertyStore,
        mount_prefix: &'a str,
        sink: &'a mut dyn BodySink,
    ) -> Self {
        Self {
            request,
            store,
            mount_prefix,
            sink,
            xml: dav_writer(),
            started: false,
        }
    }

    /// Hand everything serialized so far to the sink.
    fn flush(&mut self) -> Result<()> {
        let chunk = std::mem::take(self.xml.inner_mut());
        if !chunk.is_empty() {
            self.sink.send(Bytes::from(chunk))?;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if !self.started {
            self.started = true;
            start_dav_document(&mut self.xml, "multistatus")?;
        }
        Ok(())
    }

    /// Close the document. Writes an empty multistatus if nothing was
    /// visited.
    pub fn finish(mut self) -> Result<()> {
        self.start()?;
        self.xml.write(XmlEvent::end_element()).map_err(xml_error)?;
        self.flush()
    }

    fn response(&mut self, node: &ResourceNode, call: CallType) -> Result<()> {
        let mut found: Vec<(PropName, Option<String>)> = Vec::new();
        let mut missing: Vec<PropName> = Vec::new();

        // resourcetype is answered here rather than by the store.
        let resourcetype = PropName::dav("resourcetype");
        match self.request {
            PropfindRequest::AllProp => {
                found.push((resourcetype, None));
                for name in self.store.defined(node, call) {
                    if let Some(value) = self.store.find(node, call, &name) {
                        found.push((name, Some(value)));
                    }
                }
            }
            PropfindRequest::PropName => {
                found.push((resourcetype, None));
                for name in self.store.defined(node, call) {
                    found.push((name, None));
                }
            }
            PropfindRequest::Prop(names) => {
                for name in names {
                    if *name == resourcetype {
                        found.push((name.clone(), None));
                    } else if let Some(value) = self.store.find(node, call, name) {
                        found.push((name.clone(), Some(value)));
                    } else {
                        missing.push(name.clone());
                    }
                }
            }
        }

        let names_only = *self.request == PropfindRequest::PropName;
        let href = href(self.mount_prefix, node);
        let xml = &mut self.xml;
        xml.write(XmlEvent::start_element("D:response")).map_err(xml_error)?;
        dav_text_element(xml, "href", &href)?;
        if !found.is_empty() {
            start_propstat(xml)?;
            for (name, value) in &found {
                if name.is_dav() && name.local == "resourcetype" {
                    write_resourcetype(xml, node.is_collection() && !names_only)?;
                } else {
                    write_property(xml, name, value.as_deref())?;
                }
            }
            end_propstat(xml, "200 OK")?;
        }
        if !missing.is_empty() {
            start_propstat(xml)?;
            for name in &missing {
                write_property(xml, name, None)?;
            }
            end_propstat(xml, "404 Not Found")?;
        }
        xml.write(XmlEvent::end_element()).map_err(xml_error)
    }
}

impl Visitor for MultistatusWriter<'_> {
    fn visit(
        &mut self,
        _conn: &mut dyn GridConnection,
        node: &ResourceNode,
        call: CallType,
    ) -> Result<()> {
        self.start()?;
        trace!(path = %node.protocol_path, ?call, "PROPFIND response");
        self.response(node, call)?;
        self.flush()
    }
}

fn start_propstat(xml: &mut EventWriter<Vec<u8>>) -> Result<()> {
    xml.write(XmlEvent::start_element("D:propstat")).map_err(xml_error)?;
    xml.write(XmlEvent::start_element("D:prop")).map_err(xml_error)
}

fn end_propstat(xml: &mut EventWriter<Vec<u8>>, status: &str) -> Result<()> {
    xml.write(XmlEvent::end_element()).map_err(xml_error)?;
    dav_text_element(xml, "status", &format!("HTTP/1.1 {status}"))?;
    xml.write(XmlEvent::end_element()).map_err(xml_error)
}

fn write_resourcetype(xml: &mut EventWriter<Vec<u8>>, collection: bool) -> Result<()> {
    xml.write(XmlEvent::start_element("D:resourcetype")).map_err(xml_error)?;
    if collection {
        dav_empty_element(xml, "collection")?;
    }
    xml.write(XmlEvent::end_element()).map_err(xml_error)
}

/// One property element. Names outside the DAV namespace get their own
/// `ns0` binding; names in no namespace are written unprefixed.
fn write_property(
    xml: &mut EventWriter<Vec<u8>>,
    name: &PropName,
    value: Option<&str>,
) -> Result<()> {
    let qname = if name.is_dav() {
        format!("{DAV_PREFIX}:{}", name.local)
    } else if name.namespace.is_empty() {
        name.local.clone()
    } else {
        format!("ns0:{}", name.local)
    };
    let start = XmlEvent::start_element(qname.as_str());
    let start = if name.is_dav() || name.namespace.is_empty() {
        start
    } else {
        // The emitter writes namespace URIs verbatim.
        start.ns("ns0", escape_str_attribute(&name.namespace))
    };
    xml.write(start).map_err(xml_error)?;
    if let Some(value) = value {
        xml.write(XmlEvent::characters(value)).map_err(xml_error)?;
    }
    xml.write(XmlEvent::end_element()).map_err(xml_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::LiveProperties;
    use crate::resource::ResourceKind;

    #[test]
    fn test_parse_empty_is_allprop() {
        assert_eq!(PropfindRequest::parse(b"").unwrap(), PropfindRequest::AllProp);
        assert_eq!(PropfindRequest::parse(b"  \n").unwrap(), PropfindRequest::AllProp);
    }

    #[test]
    fn test_parse_allprop_and_propname() {
        let body = br#"<?xml version="1.0"?><D:propfind xmlns:D="DAV:"><D:allprop/></D:propfind>"#;
        assert_eq!(PropfindRequest::parse(body).unwrap(), PropfindRequest::AllProp);
        let body = br#"<propfind xmlns="DAV:"><propname/></propfind>"#;
        assert_eq!(PropfindRequest::parse(body).unwrap(), PropfindRequest::PropName);
    }

    #[test]
    fn test_parse_prop_list_with_namespaces() {
        let body = br#"<?xml version="1.0" encoding="utf-8" ?>
            <!-- listing -->
            <a:propfind xmlns:a="DAV:">
              <a:prop>
                <a:getetag/>
                <a:getcontentlength />
                <x:color xmlns:x="urn:example"/>
                <plain xmlns=""/>
              </a:prop>
            </a:propfind>"#;
        let PropfindRequest::Prop(names) = PropfindRequest::parse(body).unwrap() else {
            panic!("expected prop request");
        };
        assert_eq!(
            names,
            vec![
                PropName::dav("getetag"),
                PropName::dav("getcontentlength"),
                PropName::new("urn:example", "color"),
                PropName::new("", "plain"),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            PropfindRequest::parse(b"<foo/>"),
            Err(GridavError::BadRequest(_))
        ));
        assert!(matches!(
            PropfindRequest::parse(b"<D:propfind xmlns:D=\"DAV:\"><D:prop"),
            Err(GridavError::BadRequest(_))
        ));
        assert!(matches!(
            PropfindRequest::parse(b"<D:propfind xmlns:D=\"DAV:\"><D:prop>"),
            Err(GridavError::BadRequest(_))
        ));
        assert!(matches!(
            PropfindRequest::parse(b"<q:propfind/>"),
            Err(GridavError::BadRequest(_))
        ));
        assert!(matches!(
            PropfindRequest::parse(b"<D:propfind xmlns:D=\"DAV:\"><D:bogus/></D:propfind>"),
            Err(GridavError::BadRequest(_))
        ));
    }

    #[test]
    fn test_parse_rejects_mismatched_close_tags() {
        let body = br#"<D:propfind xmlns:D="DAV:"><D:prop><D:getetag/></D:bogus></D:nope>"#;
        assert!(matches!(
            PropfindRequest::parse(body),
            Err(GridavError::BadRequest(_))
        ));
    }

    #[test]
    fn test_parse_angle_bracket_in_attribute() {
        let body = br#"<D:propfind xmlns:D="DAV:"><D:prop><X:a xmlns:X="urn:a>b"/></D:prop></D:propfind>"#;
        assert_eq!(
            PropfindRequest::parse(body).unwrap(),
            PropfindRequest::Prop(vec![PropName::new("urn:a>b", "a")])
        );
    }

    #[test]
    fn test_parse_decodes_entities_in_namespace() {
        let body = br#"<D:propfind xmlns:D="DAV:"><D:prop><X:a xmlns:X="urn:a&amp;b"/></D:prop></D:propfind>"#;
        assert_eq!(
            PropfindRequest::parse(body).unwrap(),
            PropfindRequest::Prop(vec![PropName::new("urn:a&b", "a")])
        );
    }

    #[test]
    fn test_parse_empty_prop_list() {
        let body = br#"<propfind xmlns="DAV:"><prop></prop></propfind>"#;
        assert_eq!(
            PropfindRequest::parse(body).unwrap(),
            PropfindRequest::Prop(Vec::new())
        );
    }

    #[test]
    fn test_href_encoding() {
        let mut node = ResourceNode::absent("/my docs/a#1.txt", "/z/my docs/a#1.txt");
        assert_eq!(href("/dav", &node), "/dav/my%20docs/a%231.txt");
        node.exists = true;
        node.kind = ResourceKind::Collection;
        assert_eq!(href("/dav/", &node), "/dav/my%20docs/a%231.txt/");
        let root = ResourceNode::absent("/", "/z");
        assert_eq!(href("", &root), "/");
    }

    fn object() -> ResourceNode {
        ResourceNode {
            protocol_path: "/f.txt".into(),
            grid_path: "/z/f.txt".into(),
            exists: true,
            kind: ResourceKind::DataObject,
            size: 3,
            create_time: "0".into(),
            modify_time: "0".into(),
        }
    }

    fn render(request: &PropfindRequest, node: &ResourceNode, call: CallType) -> String {
        let mut body = Vec::new();
        let store = LiveProperties;
        {
            let mut writer = MultistatusWriter::new(request, &store, "", &mut body);
            let grid = crate::memory::MemoryGrid::new("z");
            let mut conn = crate::rpc::GridConnector::connect(
                &grid,
                &crate::config::GridSettings::default(),
                "nobody",
            )
            .unwrap();
            writer.visit(conn.as_mut(), node, call).unwrap();
            writer.finish().unwrap();
        }
        String::from_utf8(body).unwrap()
    }

    fn dav_child<'e>(el: &'e Element, name: &str) -> &'e Element {
        child_elements(el)
            .find(|c| is_dav_element(c, name))
            .unwrap_or_else(|| panic!("no DAV:{name} in <{}>", el.name))
    }

    /// (status line, property names) of each propstat in the only response.
    fn propstats(xml: &str) -> Vec<(String, Vec<PropName>)> {
        let root = Element::parse(xml.as_bytes()).unwrap();
        assert!(is_dav_element(&root, "multistatus"));
        let response = dav_child(&root, "response");
        child_elements(response)
            .filter(|c| is_dav_element(c, "propstat"))
            .map(|propstat| {
                let status = dav_child(propstat, "status")
                    .get_text()
                    .unwrap_or_default()
                    .into_owned();
                let names = child_elements(dav_child(propstat, "prop"))
                    .map(|p| PropName::new(p.namespace.clone().unwrap_or_default(), &p.name))
                    .collect();
                (status, names)
            })
            .collect()
    }

    #[test]
    fn test_multistatus_found_and_missing() {
        let request = PropfindRequest::Prop(vec![
            PropName::dav("getcontentlength"),
            PropName::dav("resourcetype"),
            PropName::new("urn:x", "color"),
            PropName::new("", "plain"),
        ]);
        let xml = render(&request, &object(), CallType::Member);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<D:href>/f.txt</D:href>"));
        assert!(xml.contains("<D:getcontentlength>3</D:getcontentlength><D:resourcetype/>"));
        assert_eq!(
            propstats(&xml),
            vec![
                (
                    "HTTP/1.1 200 OK".to_string(),
                    vec![PropName::dav("getcontentlength"), PropName::dav("resourcetype")]
                ),
                (
                    "HTTP/1.1 404 Not Found".to_string(),
                    vec![PropName::new("urn:x", "color"), PropName::new("", "plain")]
                ),
            ]
        );
        assert!(xml.trim_end().ends_with("</D:multistatus>"));
    }

    #[test]
    fn test_multistatus_escapes_namespace_and_values() {
        let request = PropfindRequest::Prop(vec![PropName::new("urn:a&b<c", "odd")]);
        let xml = render(&request, &object(), CallType::Member);
        assert!(!xml.contains("urn:a&b<c"));
        assert_eq!(
            propstats(&xml)[0].1,
            vec![PropName::new("urn:a&b<c", "odd")]
        );
    }

    #[test]
    fn test_multistatus_allprop_values() {
        let xml = render(&PropfindRequest::AllProp, &object(), CallType::Member);
        let root = Element::parse(xml.as_bytes()).unwrap();
        let prop = dav_child(dav_child(dav_child(&root, "response"), "propstat"), "prop");
        let text = |name: &str| dav_child(prop, name).get_text().unwrap_or_default().into_owned();
        assert_eq!(text("getetag"), "\"3-0\"");
        assert_eq!(text("getlastmodified"), "Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(text("getcontentlength"), "3");
        assert!(!xml.contains("404 Not Found"));
    }

    #[test]
    fn test_multistatus_collection_resourcetype() {
        let mut dir = object();
        dir.kind = ResourceKind::Collection;
        let xml = render(&PropfindRequest::AllProp, &dir, CallType::Collection);
        assert!(xml.contains("<D:resourcetype><D:collection/></D:resourcetype>"));
        assert!(xml.contains("<D:href>/f.txt/</D:href>"));

        // propname lists the name only.
        let xml = render(&PropfindRequest::PropName, &dir, CallType::Collection);
        assert!(xml.contains("<D:resourcetype/>"));
    }

    #[test]
    fn test_multistatus_propname() {
        let xml = render(&PropfindRequest::PropName, &object(), CallType::Member);
        assert!(xml.contains("<D:getetag/>"));
        assert!(xml.contains("<D:creationdate/>"));
    }

    #[test]
    fn test_multistatus_streams_one_chunk_per_response() {
        let request = PropfindRequest::AllProp;
        let store = LiveProperties;
        let grid = crate::memory::MemoryGrid::new("z");
        let mut conn = crate::rpc::GridConnector::connect(
            &grid,
            &crate::config::GridSettings::default(),
            "nobody",
        )
        .unwrap();

        let mut sink = ChunkRecorder::default();
        {
            let mut writer = MultistatusWriter::new(&request, &store, "", &mut sink);
            writer.visit(conn.as_mut(), &object(), CallType::Member).unwrap();
            writer.visit(conn.as_mut(), &object(), CallType::Member).unwrap();
            writer.finish().unwrap();
        }
        assert_eq!(sink.0.len(), 3);
        let xml: Vec<u8> = sink.0.concat();
        let root = Element::parse(xml.as_slice()).unwrap();
        assert_eq!(
            child_elements(&root).filter(|c| is_dav_element(c, "response")).count(),
            2
        );
    }

    #[derive(Default)]
    struct ChunkRecorder(Vec<Bytes>);

    impl BodySink for ChunkRecorder {
        fn send(&mut self, chunk: Bytes) -> std::io::Result<()> {
            self.0.push(chunk);
            Ok(())
        }
    }

    #[test]
    fn test_empty_multistatus() {
        let mut body = Vec::new();
        let store = LiveProperties;
        let request = PropfindRequest::AllProp;
        MultistatusWriter::new(&request, &store, "", &mut body)
            .finish()
            .unwrap();
        let xml = String::from_utf8(body).unwrap();
        let root = Element::parse(xml.as_bytes()).unwrap();
        assert!(is_dav_element(&root, "multistatus"));
        assert!(root.children.is_empty());
        assert!(xml.contains("xmlns:D=\"DAV:\""));
    }
}
