//! HTTP Range planning.
//!
//! Parses a `Range` header against a known object length and merges the
//! requested byte ranges into a sorted, non-overlapping list. The merge
//! follows the long-standing httpd byterange rules, including their quirks:
//! an open `0-` spec swallows the whole header, and a syntactically bad spec
//! anywhere invalidates everything (the full body is served).

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Ceilings beyond which a range request is served as a full body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeLimits {
    pub max_ranges: usize,
    pub max_overlaps: usize,
    pub max_reversals: usize,
}

impl Default for RangeLimits {
    fn default() -> Self {
        Self {
            max_ranges: 200,
            max_overlaps: 20,
            max_reversals: 20,
        }
    }
}

/// Inclusive byte interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for this interval.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{total}", self.start, self.end)
    }
}

/// Merged ranges with the merge statistics used for abuse limits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RangeSet {
    pub ranges: Vec<ByteRange>,
    /// Ranges produced by the running merge, before the final sort.
    pub requested: usize,
    /// Merges that extended a range's end forward.
    pub overlaps: usize,
    /// Merges that extended a range's start backward.
    pub reversals: usize,
}

impl RangeSet {
    pub fn total_len(&self) -> u64 {
        self.ranges.iter().map(ByteRange::len).sum()
    }
}

/// What to send for a GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangePlan {
    /// Whole body, status 200.
    Full,
    /// Partial content, status 206.
    Ranges(RangeSet),
    /// Every spec starts past the end, status 416.
    Unsatisfiable,
}

/// Request facts that decide whether a Range header applies at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeRequest<'a> {
    /// `Range`, or the legacy `Request-Range` when `Range` is absent.
    pub header: Option<&'a str>,
    /// False when an `If-Range` validator did not match.
    pub if_range_ok: bool,
    /// The response is already range-restricted.
    pub already_restricted: bool,
}

/// Plan a response from the request facts.
pub fn plan_request(request: &RangeRequest<'_>, total: u64, limits: &RangeLimits) -> RangePlan {
    if !request.if_range_ok || request.already_restricted {
        return RangePlan::Full;
    }
    plan(request.header, total, limits)
}

/// Plan a response for a Range header and object length.
pub fn plan(header: Option<&str>, total: u64, limits: &RangeLimits) -> RangePlan {
    let Some(header) = header else {
        return RangePlan::Full;
    };
    match parse(header, total) {
        RangePlan::Ranges(set) => {
            if set.requested > limits.max_ranges
                || set.overlaps > limits.max_overlaps
                || set.reversals > limits.max_reversals
            {
                debug!(
                    ranges = set.requested,
                    overlaps = set.overlaps,
                    reversals = set.reversals,
                    "Range request exceeds limits, serving full body"
                );
                RangePlan::Full
            } else {
                RangePlan::Ranges(set)
            }
        }
        other => other,
    }
}

/// Parse and merge a header without applying limits.
pub fn parse(header: &str, total: u64) -> RangePlan {
    let Some(specs) = strip_unit(header) else {
        return RangePlan::Full;
    };

    let mut set = RangeSet::default();
    let mut current: Option<ByteRange> = None;
    let mut unsatisfiable = false;

    for spec in specs.split(',') {
        let spec = spec.trim();
        if spec.is_empty() {
            break;
        }
        let Some((first, second)) = spec.split_once('-') else {
            return RangePlan::Full;
        };

        let (start, end) = if first.is_empty() {
            // Suffix form "-n".
            let Some(n) = parse_number(second) else {
                return RangePlan::Full;
            };
            if n < 1 {
                return RangePlan::Full;
            }
            if total == 0 {
                unsatisfiable = true;
                continue;
            }
            (total.saturating_sub(n), total - 1)
        } else {
            let Some(start) = parse_number(first) else {
                return RangePlan::Full;
            };
            if second.is_empty() {
                if total == 0 {
                    unsatisfiable = true;
                    continue;
                }
                if start == 0 {
                    // "0-" covers everything; other specs are discarded.
                    set.ranges.clear();
                    current = Some(ByteRange {
                        start: 0,
                        end: total - 1,
                    });
                    break;
                }
                (start, total - 1)
            } else {
                let Some(end) = parse_number(second) else {
                    return RangePlan::Full;
                };
                if start > end {
                    return RangePlan::Full;
                }
                (start, end)
            }
        };

        if start >= total {
            unsatisfiable = true;
            continue;
        }
        let end = end.min(total - 1);

        let Some(mut acc) = current else {
            current = Some(ByteRange { start, end });
            continue;
        };

        let mut merged = start >= acc.start && end <= acc.end;
        if !merged {
            if start < acc.start && end.saturating_add(1) >= acc.start {
                acc.start = start;
                set.reversals += 1;
                merged = true;
            }
            if end > acc.end && start <= acc.end.saturating_add(1) {
                acc.end = end;
                set.overlaps += 1;
                merged = true;
            }
        }

        if merged {
            current = Some(acc);
        } else {
            set.ranges.push(acc);
            current = Some(ByteRange { start, end });
        }
    }

    match current {
        Some(acc) => set.ranges.push(acc),
        None if set.ranges.is_empty() && unsatisfiable => return RangePlan::Unsatisfiable,
        None => {}
    }
    if set.ranges.is_empty() {
        return RangePlan::Full;
    }
    if set.total_len() > total {
        trace!("Sum of ranges larger than object, ignoring header");
        return RangePlan::Full;
    }
    set.requested = set.ranges.len();
    normalize(&mut set.ranges);
    RangePlan::Ranges(set)
}

/// Sort by start and coalesce anything that still touches. Specs given in
/// descending order are emitted unsorted by the running merge.
fn normalize(ranges: &mut Vec<ByteRange>) {
    ranges.sort_by_key(|r| r.start);
    let mut out: Vec<ByteRange> = Vec::with_capacity(ranges.len());
    for r in ranges.drain(..) {
        match out.last_mut() {
            Some(last) if r.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(r.end);
            }
            _ => out.push(r),
        }
    }
    *ranges = out;
}

fn strip_unit(header: &str) -> Option<&str> {
    let header = header.trim_start();
    let prefix = header.get(..6)?;
    if prefix.eq_ignore_ascii_case("bytes=") {
        Some(&header[6..])
    } else {
        None
    }
}

fn parse_number(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Whether an `If-Range` validator still matches the resource.
///
/// Quoted values are compared strongly against the entity tag, anything else
/// against the `Last-Modified` date.
pub fn if_range_matches(validator: &str, etag: &str, last_modified: &str) -> bool {
    let validator = validator.trim();
    if validator.starts_with('"') {
        !etag.is_empty() && validator == etag
    } else if validator.starts_with("W/") {
        false
    } else {
        validator == last_modified
    }
}

/// Whether a multipart response should use the legacy
/// `multipart/x-byteranges` subtype.
pub fn use_legacy_subtype(request_range_present: bool, user_agent: Option<&str>) -> bool {
    request_range_present || user_agent.is_some_and(|ua| ua.contains("MSIE 3"))
}

/// Content type of a multipart range response.
pub fn multipart_content_type(boundary: &str, legacy: bool) -> String {
    let subtype = if legacy { "x-byteranges" } else { "byteranges" };
    format!("multipart/{subtype}; boundary={boundary}")
}

/// Fresh random multipart boundary.
pub fn multipart_boundary() -> String {
    format!("{:016x}{:08x}", rand::random::<u64>(), rand::random::<u32>())
}

/// Bytes preceding one part of a multipart range body.
pub fn part_header(boundary: &str, range: &ByteRange, total: u64) -> String {
    format!(
        "\r\n--{boundary}\r\nContent-range: bytes {}-{}/{total}\r\n\r\n",
        range.start, range.end
    )
}

/// Bytes closing a multipart range body.
pub fn closing_boundary(boundary: &str) -> String {
    format!("\r\n--{boundary}--\r\n")
}

/// Total body length of a multipart range response.
pub fn multipart_len(boundary: &str, set: &RangeSet, total: u64) -> u64 {
    let headers: usize = set
        .ranges
        .iter()
        .map(|r| part_header(boundary, r, total).len())
        .sum();
    headers as u64 + set.total_len() + closing_boundary(boundary).len() as u64
}
