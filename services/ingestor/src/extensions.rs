//! Vendor-prefixed extension scan.
//!
//! The generic feed parser only surfaces the standard RSS/Atom model, but
//! several news agencies ship namespaced extension elements on each item
//! (full text, modification date, tagged images and video, newsline ids).
//! This module walks the raw XML once and collects, per item, a
//! `local name → values` map of every element carried under a non-standard
//! namespace prefix. The normalizer reads the keys it knows.
//!
//! The scan is best effort: a malformed tail yields whatever was collected
//! up to that point, and a feed without vendor elements yields empty maps.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::BTreeMap;

/// Namespace prefixes that belong to the common feed vocabulary and are
/// already handled by the feed parser.
const STANDARD_PREFIXES: &[&str] = &[
    "atom", "content", "dc", "georss", "itunes", "media", "slash", "sy", "wfw", "xhtml", "xml",
    "xmlns",
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One captured vendor element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtValue {
    /// The namespace prefix the element was carried under.
    pub prefix: String,
    /// Direct text content, when any.
    pub text: Option<String>,
    /// XML attributes of the element.
    pub attrs: BTreeMap<String, String>,
    /// One level of child elements, keyed by child local name.
    pub children: BTreeMap<String, String>,
}

/// All vendor elements of a single item, keyed by local name.
#[derive(Debug, Clone, Default)]
pub struct ItemExtensions {
    elements: BTreeMap<String, Vec<ExtValue>>,
}

impl ItemExtensions {
    /// First text value for a local name, across prefixes.
    pub fn first_text(&self, local: &str) -> Option<&str> {
        self.elements
            .get(local)?
            .iter()
            .find_map(|v| v.text.as_deref())
    }

    /// All text values for a local name, in document order.
    pub fn texts(&self, local: &str) -> impl Iterator<Item = &str> {
        self.values(local).filter_map(|v| v.text.as_deref())
    }

    /// All captured values for a local name, in document order.
    pub fn values(&self, local: &str) -> impl Iterator<Item = &ExtValue> {
        self.elements.get(local).into_iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

struct Pending {
    local: String,
    value: ExtValue,
}

/// Scan a feed document and return one extension map per `<item>`/`<entry>`,
/// in document order (the same order the feed parser yields entries).
pub fn scan_extensions(xml: &str) -> Vec<ItemExtensions> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items: Vec<ItemExtensions> = Vec::new();
    // -1 = outside any item; 0 = at the item element itself; n = n levels in.
    let mut depth: i32 = -1;
    let mut pending: Option<Pending> = None;
    let mut child: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if depth < 0 {
                    if is_item(&e) {
                        depth = 0;
                        items.push(ItemExtensions::default());
                    }
                    continue;
                }
                depth += 1;
                handle_open(&e, depth, &mut pending, &mut child, false);
            }
            Ok(Event::Empty(e)) => {
                if depth < 0 {
                    continue;
                }
                // Self-closing element: open and close at the same depth.
                let element_depth = depth + 1;
                handle_open(&e, element_depth, &mut pending, &mut child, true);
                if element_depth == 1 {
                    finalize(&mut pending, &mut items);
                } else if element_depth == 2 {
                    child = None;
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(p) = pending.as_mut() {
                    let text = t.unescape().unwrap_or_default().into_owned();
                    store_text(p, child.as_deref(), text);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(p) = pending.as_mut() {
                    let text = String::from_utf8_lossy(t.as_ref()).into_owned();
                    store_text(p, child.as_deref(), text);
                }
            }
            Ok(Event::End(_)) => {
                if depth < 0 {
                    continue;
                }
                if depth == 0 {
                    depth = -1;
                    continue;
                }
                if depth == 2 {
                    child = None;
                } else if depth == 1 {
                    finalize(&mut pending, &mut items);
                }
                depth -= 1;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            // Malformed tail: keep what we have.
            Err(_) => break,
        }
    }

    items
}

fn handle_open(
    e: &BytesStart<'_>,
    element_depth: i32,
    pending: &mut Option<Pending>,
    child: &mut Option<String>,
    self_closing: bool,
) {
    let (local, prefix) = decompose(e);
    match element_depth {
        1 => {
            if let Some(prefix) = prefix.filter(|p| is_vendor_prefix(p)) {
                let mut value = ExtValue {
                    prefix,
                    ..ExtValue::default()
                };
                collect_attrs(e, &mut value.attrs);
                *pending = Some(Pending { local, value });
            } else {
                *pending = None;
            }
        }
        2 => {
            if let Some(p) = pending.as_mut() {
                if self_closing {
                    // Children carried entirely in attributes: keep the url
                    // attribute, the usual payload of such elements.
                    let mut attrs = BTreeMap::new();
                    collect_attrs(e, &mut attrs);
                    if let Some(url) = attrs.remove("url") {
                        p.value.children.insert(local, url);
                    }
                } else {
                    *child = Some(local);
                }
            }
        }
        _ => {}
    }
}

fn store_text(p: &mut Pending, child: Option<&str>, text: String) {
    if text.is_empty() {
        return;
    }
    match child {
        Some(child) => {
            p.value.children.insert(child.to_owned(), text);
        }
        None => match p.value.text.as_mut() {
            Some(existing) => existing.push_str(&text),
            None => p.value.text = Some(text),
        },
    }
}

fn finalize(pending: &mut Option<Pending>, items: &mut Vec<ItemExtensions>) {
    if let (Some(p), Some(item)) = (pending.take(), items.last_mut()) {
        item.elements.entry(p.local).or_default().push(p.value);
    }
}

fn is_item(e: &BytesStart<'_>) -> bool {
    let (local, prefix) = decompose(e);
    prefix.is_none() && (local == "item" || local == "entry")
}

fn decompose(e: &BytesStart<'_>) -> (String, Option<String>) {
    let name = e.name();
    let (local, prefix) = name.decompose();
    (
        String::from_utf8_lossy(local.as_ref()).into_owned(),
        prefix.map(|p| String::from_utf8_lossy(p.as_ref()).into_owned()),
    )
}

fn is_vendor_prefix(prefix: &str) -> bool {
    !STANDARD_PREFIXES.contains(&prefix)
}

fn collect_attrs(e: &BytesStart<'_>, into: &mut BTreeMap<String, String>) {
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        if let Ok(value) = attr.unescape_value() {
            into.insert(key, value.into_owned());
        }
    }
}
