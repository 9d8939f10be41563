//! Core types for `$ref` resolution.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pointer::JsonPointer;

/// The key that marks a mapping node as a reference.
pub const REF_KEY: &str = "$ref";

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Returns the reference string if `value` is a `$ref` node.
///
/// A `$ref` key whose value is not a string (e.g. a property literally named
/// `$ref` inside `properties`) is not a reference.
pub fn ref_string(value: &Value) -> Option<&str> {
    value.as_object()?.get(REF_KEY)?.as_str()
}

/// Returns true if `value` is a `$ref` node with no sibling keys.
pub fn is_pure_ref(value: &Value) -> bool {
    value
        .as_object()
        .map(|map| map.len() == 1 && ref_string(value).is_some())
        .unwrap_or(false)
}

/// Normalized absolute location of a document: an absolute file path or a
/// URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Wrap an already-normalized location.
    ///
    /// Use [`crate::normalize`] to build ids from user input.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The kind of source this id points at.
    pub fn kind(&self) -> SourceKind {
        SourceKind::of(&self.0)
    }

    /// File extension of the id's path, lowercased, ignoring query strings.
    pub fn extension(&self) -> Option<String> {
        let path = self.0.split(['?', '#']).next().unwrap_or_default();
        let file_name = path.rsplit(['/', '\\']).next()?;
        let (_, ext) = file_name.rsplit_once('.')?;
        if ext.is_empty() {
            None
        } else {
            Some(ext.to_ascii_lowercase())
        }
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Absolute file-system path.
    File,
    /// `http://` or `https://` URL.
    Http,
    /// Any other scheme (in-memory documents, `urn:`, custom loaders).
    Other,
}

impl SourceKind {
    /// Classify a canonical id string.
    pub fn of(id: &str) -> Self {
        let lower = id.get(..8).unwrap_or(id).to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            SourceKind::Http
        } else if std::path::Path::new(id).is_absolute() || id.starts_with('/') {
            SourceKind::File
        } else {
            SourceKind::Other
        }
    }

    /// Parse a kind name as used on the command line.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(SourceKind::File),
            "http" => Some(SourceKind::Http),
            "other" => Some(SourceKind::Other),
            _ => None,
        }
    }
}

/// What kind of content a registry entry was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Json,
    Yaml,
    Text,
    /// Raw bytes, stored as an array of numbers.
    Binary,
    /// Supplied as an already-parsed value.
    Value,
}

/// A parsed `$ref`: the document it targets and the pointer inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefPointer {
    pub target: CanonicalId,
    pub fragment: JsonPointer,
}

/// A node address: document id plus JSON Pointer inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub id: CanonicalId,
    pub pointer: JsonPointer,
}

impl Location {
    pub fn new(id: CanonicalId, pointer: JsonPointer) -> Self {
        Self { id, pointer }
    }

    /// The document root of `id`.
    pub fn root(id: CanonicalId) -> Self {
        Self::new(id, JsonPointer::root())
    }

    pub fn child(&self, token: impl Into<String>) -> Self {
        Self::new(self.id.clone(), self.pointer.child(token))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.id, self.pointer.to_fragment())
    }
}

/// How the dereferencer treats circular references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircularMode {
    /// Link the cycle into the graph and report it.
    #[default]
    Allow,
    /// Leave circular `$ref` objects in place.
    Ignore,
    /// Fail with `RefError::CircularReference`.
    Disallow,
}

impl CircularMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(CircularMode::Allow),
            "ignore" => Some(CircularMode::Ignore),
            "disallow" => Some(CircularMode::Disallow),
            _ => None,
        }
    }
}

/// File-system loader settings.
#[derive(Debug, Clone)]
pub struct FileOptions {
    pub enabled: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// HTTP loader settings.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub enabled: bool,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum number of redirects to follow.
    pub redirects: usize,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(10),
            redirects: 5,
            headers: Vec::new(),
        }
    }
}

/// Options for parsing, resolving, dereferencing and bundling.
#[derive(Debug, Clone)]
pub struct RefParserOptions {
    /// Resolve refs that point outside the root document.
    pub external: bool,
    /// Record load/parse failures and keep going instead of failing.
    pub continue_on_error: bool,
    /// Keep unresolved `$ref` objects in dereference/bundle output
    /// instead of failing.
    pub allow_unresolved: bool,
    pub circular: CircularMode,
    /// Upper bound on loads in flight at once.
    pub max_concurrency: usize,
    /// Parse empty sources as `null` instead of failing.
    pub allow_empty: bool,
    pub file: FileOptions,
    pub http: HttpOptions,
}

impl Default for RefParserOptions {
    fn default() -> Self {
        Self {
            external: true,
            continue_on_error: false,
            allow_unresolved: false,
            circular: CircularMode::Allow,
            max_concurrency: 8,
            allow_empty: true,
            file: FileOptions::default(),
            http: HttpOptions::default(),
        }
    }
}

impl RefParserOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn external(mut self, external: bool) -> Self {
        self.external = external;
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn allow_unresolved(mut self, allow_unresolved: bool) -> Self {
        self.allow_unresolved = allow_unresolved;
        self
    }

    pub fn circular(mut self, circular: CircularMode) -> Self {
        self.circular = circular;
        self
    }

    /// Set the concurrency limit (at least 1).
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn allow_empty(mut self, allow_empty: bool) -> Self {
        self.allow_empty = allow_empty;
        self
    }

    pub fn file(mut self, file: FileOptions) -> Self {
        self.file = file;
        self
    }

    pub fn http(mut self, http: HttpOptions) -> Self {
        self.http = http;
        self
    }
}
