//! Source loading strategies.
//!
//! A [`Loader`] turns a [`CanonicalId`] into raw bytes (files, HTTP) or an
//! already-parsed value (pre-supplied documents). Loaders are tried in order;
//! the first one whose [`Loader::can_load`] accepts the id is used.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::LoadError;
use crate::types::{CanonicalId, FileOptions, SourceKind};

#[cfg(feature = "remote")]
use crate::types::HttpOptions;

/// Raw content as returned by a loader.
#[derive(Debug, Clone)]
pub enum SourceData {
    /// Bytes that still need a [`Parser`](crate::Parser).
    Bytes(Vec<u8>),
    /// A value that skips parsing.
    Value(Value),
}

/// A loaded, not yet parsed, source.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub id: CanonicalId,
    /// MIME type reported by the transport, if any.
    pub content_type: Option<String>,
    pub data: SourceData,
}

impl LoadedSource {
    pub fn bytes(id: CanonicalId, bytes: Vec<u8>) -> Self {
        Self {
            id,
            content_type: None,
            data: SourceData::Bytes(bytes),
        }
    }

    pub fn value(id: CanonicalId, value: Value) -> Self {
        Self {
            id,
            content_type: None,
            data: SourceData::Value(value),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The raw bytes, if this source has not been parsed yet.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            SourceData::Bytes(bytes) => Some(bytes),
            SourceData::Value(_) => None,
        }
    }
}

/// A strategy for fetching documents.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether this loader handles `id`.
    fn can_load(&self, id: &CanonicalId) -> bool;

    /// Fetch the document.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` when the source is unreachable.
    async fn load(&self, id: &CanonicalId) -> Result<LoadedSource, LoadError>;
}

/// Reads documents from the local file system.
#[derive(Debug, Clone, Default)]
pub struct FileLoader {
    options: FileOptions,
}

impl FileLoader {
    pub fn new(options: FileOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Loader for FileLoader {
    fn name(&self) -> &'static str {
        "file"
    }

    fn can_load(&self, id: &CanonicalId) -> bool {
        self.options.enabled && id.kind() == SourceKind::File
    }

    async fn load(&self, id: &CanonicalId) -> Result<LoadedSource, LoadError> {
        let path = PathBuf::from(id.as_str());
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(LoadedSource::bytes(id.clone(), bytes)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                Err(LoadError::FileNotFound { path })
            }
            Err(source) => Err(LoadError::ReadError { path, source }),
        }
    }
}

/// Fetches documents over HTTP/HTTPS.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
#[derive(Debug, Clone, Default)]
pub struct HttpLoader {
    options: HttpOptions,
}

#[cfg(feature = "remote")]
impl HttpLoader {
    pub fn new(options: HttpOptions) -> Self {
        Self { options }
    }

    fn client(&self, url: &str) -> Result<reqwest::Client, LoadError> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in &self.options.headers {
            let invalid = |message: String| LoadError::InvalidHeader {
                header: name.clone(),
                message,
            };
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| invalid(e.to_string()))?;
            let value =
                reqwest::header::HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            headers.insert(name, value);
        }

        reqwest::Client::builder()
            .timeout(self.options.timeout)
            .redirect(reqwest::redirect::Policy::limited(self.options.redirects))
            .default_headers(headers)
            .build()
            .map_err(|source| LoadError::NetworkError {
                url: url.to_string(),
                source,
            })
    }
}

#[cfg(feature = "remote")]
#[async_trait]
impl Loader for HttpLoader {
    fn name(&self) -> &'static str {
        "http"
    }

    fn can_load(&self, id: &CanonicalId) -> bool {
        self.options.enabled && id.kind() == SourceKind::Http
    }

    async fn load(&self, id: &CanonicalId) -> Result<LoadedSource, LoadError> {
        let url = id.as_str();
        let network = |source| LoadError::NetworkError {
            url: url.to_string(),
            source,
        };

        let response = self.client(url)?.get(url).send().await.map_err(network)?;

        // Check for HTTP errors before reading the body
        let response = response.error_for_status().map_err(network)?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await.map_err(network)?;
        let mut source = LoadedSource::bytes(id.clone(), bytes.to_vec());
        source.content_type = content_type;
        Ok(source)
    }
}

/// Serves pre-supplied documents by id.
///
/// Placed ahead of the file and HTTP loaders so callers can stand in for any
/// location, including ones that do not exist.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    documents: HashMap<CanonicalId, SourceData>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parsed value under `id`.
    pub fn insert_value(&mut self, id: CanonicalId, value: Value) {
        self.documents.insert(id, SourceData::Value(value));
    }

    /// Register raw content under `id`; it goes through the parsers.
    pub fn insert_bytes(&mut self, id: CanonicalId, bytes: impl Into<Vec<u8>>) {
        self.documents.insert(id, SourceData::Bytes(bytes.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn can_load(&self, id: &CanonicalId) -> bool {
        self.documents.contains_key(id)
    }

    async fn load(&self, id: &CanonicalId) -> Result<LoadedSource, LoadError> {
        let data = self
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| LoadError::NoLoader { id: id.to_string() })?;
        Ok(LoadedSource {
            id: id.clone(),
            content_type: None,
            data,
        })
    }
}
