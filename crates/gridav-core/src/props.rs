//! Property store.
//!
//! Only four live properties are backed by the grid store. Dead properties
//! are not stored, so every property write is refused.

use crate::error::{GridavError, Result};
use crate::resource::{self, ResourceNode};
use crate::walk::CallType;

/// Namespace of the standard WebDAV properties.
pub const DAV_NAMESPACE: &str = "DAV:";

/// Message returned for PROPPATCH.
pub const PROPPATCH_REFUSED: &str = "Property manipulation is not supported by this server.";

/// Qualified property name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropName {
    pub namespace: String,
    pub local: String,
}

impl PropName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    pub fn dav(local: impl Into<String>) -> Self {
        Self::new(DAV_NAMESPACE, local)
    }

    pub fn is_dav(&self) -> bool {
        self.namespace == DAV_NAMESPACE
    }
}

/// The grid-backed live properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveProperty {
    CreationDate,
    GetContentLength,
    GetEtag,
    GetLastModified,
}

impl LiveProperty {
    pub const ALL: [LiveProperty; 4] = [
        LiveProperty::CreationDate,
        LiveProperty::GetContentLength,
        LiveProperty::GetEtag,
        LiveProperty::GetLastModified,
    ];

    pub fn local_name(self) -> &'static str {
        match self {
            LiveProperty::CreationDate => "creationdate",
            LiveProperty::GetContentLength => "getcontentlength",
            LiveProperty::GetEtag => "getetag",
            LiveProperty::GetLastModified => "getlastmodified",
        }
    }

    pub fn from_name(name: &PropName) -> Option<Self> {
        if !name.is_dav() {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|p| p.local_name() == name.local)
    }

    pub fn name(self) -> PropName {
        PropName::dav(self.local_name())
    }
}

/// Source of property values for PROPFIND and target of PROPPATCH.
pub trait PropertyStore: Send + Sync {
    /// Value of `name` on `node`, or `None` when the property is not defined.
    fn find(&self, node: &ResourceNode, call: CallType, name: &PropName) -> Option<String>;

    /// Names of every property defined on `node`.
    fn defined(&self, node: &ResourceNode, call: CallType) -> Vec<PropName>;

    /// Apply a property update.
    fn patch(&self, node: &ResourceNode) -> Result<()>;
}

/// Read-only projection of grid metadata onto the live properties.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveProperties;

impl LiveProperties {
    fn value(node: &ResourceNode, call: CallType, prop: LiveProperty) -> Option<String> {
        // Lock-null entries have no grid object behind them.
        let lock_null = call == CallType::LockNull;
        match prop {
            LiveProperty::CreationDate => Some(resource::iso_date(if lock_null {
                0
            } else {
                node.create_epoch()
            })),
            LiveProperty::GetLastModified => Some(resource::http_date(if lock_null {
                0
            } else {
                node.modify_epoch()
            })),
            LiveProperty::GetContentLength if lock_null => Some("0".to_string()),
            LiveProperty::GetContentLength if node.is_data_object() => Some(node.size.to_string()),
            LiveProperty::GetContentLength => None,
            LiveProperty::GetEtag => Some(node.etag()).filter(|e| !e.is_empty()),
        }
    }
}

impl PropertyStore for LiveProperties {
    fn find(&self, node: &ResourceNode, call: CallType, name: &PropName) -> Option<String> {
        LiveProperty::from_name(name).and_then(|p| Self::value(node, call, p))
    }

    fn defined(&self, node: &ResourceNode, call: CallType) -> Vec<PropName> {
        LiveProperty::ALL
            .into_iter()
            .filter(|p| Self::value(node, call, *p).is_some())
            .map(LiveProperty::name)
            .collect()
    }

    fn patch(&self, _node: &ResourceNode) -> Result<()> {
        Err(GridavError::NotAllowed(PROPPATCH_REFUSED.to_string()))
    }
}
