//! JSON-LD extraction and hotel record normalization.
//!
//! Pages embed schema.org metadata in `<script type="application/ld+json">`
//! blocks. Every block that parses is kept verbatim in
//! [`ExtractionResult::raw_blocks`]; the first node typed `Hotel` or
//! `LodgingBusiness` (document order, top-level arrays and `@graph`
//! containers included) becomes the hotel node and is flattened into a
//! [`NormalizedRecord`].

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const JSON_LD_SELECTOR: &str = r#"script[type="application/ld+json"]"#;

/// Structured data found on one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionResult {
    /// Every block that parsed as JSON, in document order.
    pub raw_blocks: Vec<Value>,
    /// First node describing a hotel, if any.
    pub hotel_node: Option<Value>,
}

impl ExtractionResult {
    pub fn is_miss(&self) -> bool {
        self.hotel_node.is_none()
    }

    /// Normalized view of the hotel node.
    pub fn normalized(&self) -> Option<NormalizedRecord> {
        self.hotel_node.as_ref().map(NormalizedRecord::from_node)
    }

    /// `name` of the hotel node, for log lines.
    pub fn hotel_name(&self) -> Option<&str> {
        self.hotel_node
            .as_ref()
            .and_then(|node| node.get("name"))
            .and_then(Value::as_str)
    }
}

/// Extracts JSON-LD from rendered page HTML.
pub fn extract(html: &str) -> ExtractionResult {
    extract_blocks(&script_blocks(html))
}

/// Extracts from raw block texts. Blocks that are empty or fail to parse are
/// dropped without error.
pub fn extract_blocks<S: AsRef<str>>(texts: &[S]) -> ExtractionResult {
    let raw_blocks: Vec<Value> = texts
        .iter()
        .map(|t| t.as_ref().trim())
        .filter(|t| !t.is_empty())
        .filter_map(|t| match serde_json::from_str::<Value>(t) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping unparseable JSON-LD block");
                None
            }
        })
        .collect();

    let hotel_node = pick_hotel_node(&raw_blocks).cloned();
    ExtractionResult {
        raw_blocks,
        hotel_node,
    }
}

/// Text content of every JSON-LD script element, in document order.
pub fn script_blocks(html: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(JSON_LD_SELECTOR) else {
        tracing::error!(selector = JSON_LD_SELECTOR, "Invalid JSON-LD selector");
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .map(|el| el.text().collect::<String>())
        .collect()
}

/// Returns the first top-level block typed as a hotel. Only when no block
/// matches are the members of top-level arrays and `@graph` containers
/// searched, again in document order.
pub fn pick_hotel_node(blocks: &[Value]) -> Option<&Value> {
    blocks.iter().find(|block| is_hotel(block)).or_else(|| {
        blocks
            .iter()
            .find_map(|block| nested_nodes(block).into_iter().find(|n| is_hotel(n)))
    })
}

/// Nodes inside a block in document order: members of a top-level array or
/// of an `@graph`, recursively.
fn nested_nodes(block: &Value) -> Vec<&Value> {
    match block {
        Value::Array(items) => items
            .iter()
            .flat_map(|item| std::iter::once(item).chain(nested_nodes(item)))
            .collect(),
        Value::Object(map) => match map.get("@graph") {
            Some(graph @ Value::Array(_)) => nested_nodes(graph),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn is_hotel(node: &Value) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t == "Hotel" || t == "LodgingBusiness",
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("Hotel")),
        _ => false,
    }
}

/// Canonical hotel row. Each field is independently optional; JSON-LD is
/// loose about shapes, so values are kept as JSON (a `image` may be a string
/// or a list, a `latitude` a number or a string).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: Option<Value>,
    pub name: Option<Value>,
    pub description: Option<Value>,
    pub image: Option<Value>,
    pub has_map: Option<Value>,
    pub checkin_time: Option<Value>,
    pub checkout_time: Option<Value>,
    pub pets_allowed: Option<Value>,
    pub street_address: Option<Value>,
    pub address_locality: Option<Value>,
    pub address_region: Option<Value>,
    pub address_country: Option<Value>,
    pub postal_code: Option<Value>,
    pub telephone: Option<Value>,
    pub latitude: Option<Value>,
    pub longitude: Option<Value>,
}

impl NormalizedRecord {
    pub fn from_node(node: &Value) -> Self {
        Self {
            id: lookup(node, &["@id"]),
            name: lookup(node, &["name"]),
            description: lookup(node, &["description"]),
            image: lookup(node, &["image"]),
            has_map: lookup(node, &["hasMap"]),
            checkin_time: lookup(node, &["checkinTime"]),
            checkout_time: lookup(node, &["checkoutTime"]),
            pets_allowed: lookup(node, &["petsAllowed"]),
            street_address: lookup(node, &["address", "streetAddress"]),
            address_locality: lookup(node, &["address", "addressLocality"]),
            address_region: lookup(node, &["address", "addressRegion"]),
            address_country: lookup(node, &["address", "addressCountry"]),
            postal_code: lookup(node, &["address", "postalCode"]),
            telephone: lookup(node, &["telephone"]),
            latitude: lookup(node, &["geo", "latitude"]),
            longitude: lookup(node, &["geo", "longitude"]),
        }
    }

    /// Names of the fields that came out empty, in schema order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("id", &self.id),
            ("name", &self.name),
            ("description", &self.description),
            ("image", &self.image),
            ("has_map", &self.has_map),
            ("checkin_time", &self.checkin_time),
            ("checkout_time", &self.checkout_time),
            ("pets_allowed", &self.pets_allowed),
            ("street_address", &self.street_address),
            ("address_locality", &self.address_locality),
            ("address_region", &self.address_region),
            ("address_country", &self.address_country),
            ("postal_code", &self.postal_code),
            ("telephone", &self.telephone),
            ("latitude", &self.latitude),
            ("longitude", &self.longitude),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.is_none().then_some(name))
        .collect()
    }
}

/// Walks a fixed key path. Missing keys, non-object intermediates and JSON
/// `null` all yield `None`.
fn lookup(node: &Value, path: &[&str]) -> Option<Value> {
    let mut current = node;
    for key in path {
        current = current.as_object()?.get(*key)?;
    }
    (!current.is_null()).then(|| current.clone())
}
