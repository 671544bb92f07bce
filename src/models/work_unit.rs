//! Work units, results and the output stream of a processing stage.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use super::Fingerprint;
use crate::{Error, Result};

/// Meta key carrying a caller-supplied deduplication key.
///
/// When present and non-empty it replaces the request fingerprint, e.g. to
/// deduplicate on a product id when many URLs lead to the same product.
pub const OVERRIDE_KEY_META: &str = "deltafetch_key";

fn default_method() -> String {
    "GET".to_string()
}

/// A unit of work (a request) produced by the crawl engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Target URL.
    pub url: Url,
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Request body.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    /// Arbitrary metadata carried with the request.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl WorkUnit {
    /// Creates a GET work unit for the given URL.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: default_method(),
            body: String::new(),
            meta: Map::new(),
        }
    }

    /// Parses `url` and creates a GET work unit for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the URL cannot be parsed.
    pub fn get(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::InvalidInput(format!("invalid url '{url}': {e}")))?;
        Ok(Self::new(url))
    }

    /// Builder method to set the HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Builder method to set the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Builder method to set a meta entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Builder method to set the override deduplication key.
    #[must_use]
    pub fn with_override_key(self, key: impl Into<String>) -> Self {
        self.with_meta(OVERRIDE_KEY_META, key.into())
    }

    /// Returns the override key, if one is set.
    ///
    /// Empty strings, `null`, booleans and structured values count as absent;
    /// numbers are keyed by their decimal form.
    #[must_use]
    pub fn override_key(&self) -> Option<Fingerprint> {
        match self.meta.get(OVERRIDE_KEY_META)? {
            Value::String(s) if !s.is_empty() => Some(Fingerprint::from(s.as_str())),
            Value::Number(n) => Some(Fingerprint::from(n.to_string())),
            _ => None,
        }
    }
}

/// A result extracted while processing a work unit.
///
/// Items are opaque to the filter: only their presence in an output batch
/// matters, never their fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(pub Map<String, Value>);

impl Item {
    /// Creates an empty item.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set a field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// One entry in the output stream of a processed work unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Output {
    /// New work to schedule.
    Request(WorkUnit),
    /// A result to hand to the item pipeline.
    Item(Item),
}

impl Output {
    /// Returns the work unit if this output is a request.
    #[must_use]
    pub const fn as_request(&self) -> Option<&WorkUnit> {
        match self {
            Self::Request(unit) => Some(unit),
            Self::Item(_) => None,
        }
    }

    /// Returns true if this output is an item.
    #[must_use]
    pub const fn is_item(&self) -> bool {
        matches!(self, Self::Item(_))
    }
}

impl From<WorkUnit> for Output {
    fn from(unit: WorkUnit) -> Self {
        Self::Request(unit)
    }
}

impl From<Item> for Output {
    fn from(item: Item) -> Self {
        Self::Item(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_parses_url() {
        let unit = WorkUnit::get("https://example.com/a?b=1").unwrap();
        assert_eq!(unit.method, "GET");
        assert_eq!(unit.url.as_str(), "https://example.com/a?b=1");
    }

    #[test]
    fn test_get_rejects_bad_url() {
        assert!(matches!(
            WorkUnit::get("not a url"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_override_key_string() {
        let unit = WorkUnit::get("https://example.com/p/1")
            .unwrap()
            .with_override_key("product:1");
        assert_eq!(unit.override_key(), Some(Fingerprint::from("product:1")));
    }

    #[test]
    fn test_override_key_empty_is_absent() {
        let unit = WorkUnit::get("https://example.com/p/1")
            .unwrap()
            .with_override_key("");
        assert_eq!(unit.override_key(), None);
    }

    #[test]
    fn test_override_key_number() {
        let unit = WorkUnit::get("https://example.com/p/1")
            .unwrap()
            .with_meta(OVERRIDE_KEY_META, 42);
        assert_eq!(unit.override_key(), Some(Fingerprint::from("42")));
    }

    #[test]
    fn test_override_key_null_is_absent() {
        let unit = WorkUnit::get("https://example.com/p/1")
            .unwrap()
            .with_meta(OVERRIDE_KEY_META, Value::Null);
        assert_eq!(unit.override_key(), None);
    }

    #[test]
    fn test_output_wire_format() {
        let line = json!({"type": "request", "url": "https://example.com/next"});
        let output: Output = serde_json::from_value(line).unwrap();
        let unit = output.as_request().unwrap();
        assert_eq!(unit.method, "GET");
        assert!(unit.meta.is_empty());

        let line = json!({"type": "item", "title": "A Light in the Attic"});
        let output: Output = serde_json::from_value(line).unwrap();
        assert!(output.is_item());
        let Output::Item(item) = output else {
            unreachable!()
        };
        assert_eq!(item.get("title"), Some(&json!("A Light in the Attic")));
        assert_eq!(item.get("type"), None);
    }

    #[test]
    fn test_item_serializes_with_tag() {
        let output = Output::from(Item::new().with_field("price", 51.77));
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value, json!({"type": "item", "price": 51.77}));
    }
}
