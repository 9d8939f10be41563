//! Content parsing strategies.
//!
//! Parsers are tried in order. Those whose [`Parser::can_parse`] accepts the
//! source's extension or content type go first; if none does, every parser is
//! tried in turn and the first success wins.

use std::sync::Arc;

use serde_json::Value;

use crate::error::ParseError;
use crate::loader::{LoadedSource, SourceData};
use crate::types::ContentKind;

/// A strategy for turning raw bytes into a value.
pub trait Parser: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// The content kind recorded for values this parser produces.
    fn content_kind(&self) -> ContentKind;

    /// Whether the source's extension or content type suggests this parser.
    fn can_parse(&self, source: &LoadedSource) -> bool;

    /// Parse the raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` on malformed content.
    fn parse(&self, bytes: &[u8]) -> Result<Value, ParseError>;
}

fn matches_hint(source: &LoadedSource, extensions: &[&str], content_types: &[&str]) -> bool {
    let by_extension = source
        .id
        .extension()
        .map(|ext| extensions.contains(&ext.as_str()))
        .unwrap_or(false);
    let by_content_type = source
        .content_type
        .as_deref()
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            content_types.iter().any(|needle| ct.contains(needle))
        })
        .unwrap_or(false);
    by_extension || by_content_type
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Json
    }

    fn can_parse(&self, source: &LoadedSource) -> bool {
        matches_hint(source, &["json"], &["json"])
    }

    fn parse(&self, bytes: &[u8]) -> Result<Value, ParseError> {
        if is_blank(bytes) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(bytes).map_err(|source| ParseError::InvalidJson { source })
    }
}

/// YAML via `serde_yaml`, deserialized straight into JSON values.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlParser;

impl Parser for YamlParser {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Yaml
    }

    fn can_parse(&self, source: &LoadedSource) -> bool {
        matches_hint(source, &["yaml", "yml"], &["yaml"])
    }

    fn parse(&self, bytes: &[u8]) -> Result<Value, ParseError> {
        if is_blank(bytes) {
            return Ok(Value::Null);
        }
        let yaml: serde_yaml::Value =
            serde_yaml::from_slice(bytes).map_err(|source| ParseError::InvalidYaml { source })?;
        yaml_to_json(yaml)
    }
}

/// Convert a YAML tree to JSON. Mapping keys that are not strings (`200:`,
/// `true:`) are stringified; tags are dropped.
fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, ParseError> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => yaml_number(&n)?,
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Mapping(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(yaml_key(key)?, yaml_to_json(item)?);
            }
            Value::Object(out)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn yaml_key(key: serde_yaml::Value) -> Result<String, ParseError> {
    use serde_yaml::Value as Yaml;

    match key {
        Yaml::String(s) => Ok(s),
        Yaml::Null => Ok("null".to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Tagged(tagged) => yaml_key(tagged.value),
        composite => Ok(yaml_to_json(composite)?.to_string()),
    }
}

fn yaml_number(n: &serde_yaml::Number) -> Result<Value, ParseError> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Ok(Value::from(u));
    }
    n.as_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ParseError::NotJson {
            message: format!("number {} cannot be represented", n),
        })
}

/// UTF-8 text, kept as a JSON string.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl Parser for TextParser {
    fn name(&self) -> &'static str {
        "text"
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Text
    }

    fn can_parse(&self, source: &LoadedSource) -> bool {
        matches_hint(
            source,
            &["txt", "htm", "html", "md", "xml", "js", "css"],
            &["text/"],
        )
    }

    fn parse(&self, bytes: &[u8]) -> Result<Value, ParseError> {
        std::str::from_utf8(bytes)
            .map(|s| Value::String(s.to_string()))
            .map_err(|_| ParseError::NotText)
    }
}

/// Anything else, kept as an array of byte values.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryParser;

impl Parser for BinaryParser {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Binary
    }

    fn can_parse(&self, source: &LoadedSource) -> bool {
        matches_hint(
            source,
            &["jpg", "jpeg", "png", "gif", "bmp", "ico", "bin"],
            &["image/", "application/octet-stream"],
        )
    }

    fn parse(&self, bytes: &[u8]) -> Result<Value, ParseError> {
        Ok(Value::Array(bytes.iter().map(|&b| Value::from(b)).collect()))
    }
}

/// A parsed source with the kind of content it came from.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub value: Value,
    pub content: ContentKind,
}

/// Run `source` through an ordered list of parsers.
///
/// # Errors
///
/// Returns the error of the last parser tried when none succeeds, or
/// `ParseError::Empty` when the result is empty and `allow_empty` is off.
pub fn parse_source(
    parsers: &[Arc<dyn Parser>],
    source: &LoadedSource,
    allow_empty: bool,
) -> Result<Parsed, ParseError> {
    let bytes = match &source.data {
        SourceData::Value(value) => {
            return Ok(Parsed {
                value: value.clone(),
                content: ContentKind::Value,
            })
        }
        SourceData::Bytes(bytes) => bytes,
    };

    if !allow_empty && is_blank(bytes) {
        return Err(ParseError::Empty);
    }

    let mut candidates: Vec<&Arc<dyn Parser>> =
        parsers.iter().filter(|p| p.can_parse(source)).collect();
    if candidates.is_empty() {
        candidates = parsers.iter().collect();
    }

    let mut last_error = ParseError::NoParser;
    for parser in candidates {
        match parser.parse(bytes) {
            Ok(value) => {
                tracing::trace!(id = %source.id, parser = parser.name(), "parsed");
                return Ok(Parsed {
                    value,
                    content: parser.content_kind(),
                });
            }
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

/// The default parser list: JSON, YAML, text, binary.
pub fn default_parsers() -> Vec<Arc<dyn Parser>> {
    let parsers: [Arc<dyn Parser>; 4] = [
        Arc::new(JsonParser),
        Arc::new(YamlParser),
        Arc::new(TextParser),
        Arc::new(BinaryParser),
    ];
    Vec::from(parsers)
}
