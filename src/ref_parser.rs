//! High-level entry points: parse, resolve, dereference and bundle.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::bundle::Bundled;
use crate::cancel::CancelToken;
use crate::dereference::Dereferenced;
use crate::error::RefError;
use crate::loader::{Loader, MemoryLoader};
use crate::normalize::{memory_root_id, root_id};
use crate::parser::{default_parsers, Parser};
use crate::registry::{Registry, RegistryEntry};
use crate::resolver::{Resolver, Strategies};
use crate::types::{CanonicalId, ContentKind, RefParserOptions};

/// Where the root document comes from.
#[derive(Debug, Clone)]
pub enum Source {
    /// File path or URL.
    Path(String),
    /// An already-parsed document. Relative refs resolve against `base`, or
    /// against the working directory when there is none.
    Value { value: Value, base: Option<String> },
}

impl Source {
    pub fn value(value: Value) -> Self {
        Source::Value { value, base: None }
    }

    pub fn value_at(value: Value, base: impl Into<String>) -> Self {
        Source::Value {
            value,
            base: Some(base.into()),
        }
    }
}

impl From<&str> for Source {
    fn from(path: &str) -> Self {
        Source::Path(path.to_string())
    }
}

impl From<String> for Source {
    fn from(path: String) -> Self {
        Source::Path(path)
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Source::Path(path.to_string_lossy().into_owned())
    }
}

impl From<Value> for Source {
    fn from(value: Value) -> Self {
        Source::value(value)
    }
}

/// The root document and every document it (transitively) refers to.
#[derive(Debug)]
pub struct Resolution {
    pub root: CanonicalId,
    /// The root document as parsed.
    pub value: Value,
    pub registry: Registry,
}

/// Configured `$ref` parser.
///
/// ```no_run
/// use schema_refs::{RefParser, RefParserOptions};
///
/// # async fn run() -> Result<(), schema_refs::RefError> {
/// let parser = RefParser::new(RefParserOptions::new().continue_on_error(true));
/// let bundled = parser.bundle("schemas/order.json").await?;
/// println!("{}", bundled.value);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RefParser {
    options: RefParserOptions,
    memory: MemoryLoader,
    loaders: Vec<Arc<dyn Loader>>,
    parsers: Vec<Arc<dyn Parser>>,
    cancel: Option<CancelToken>,
}

impl Default for RefParser {
    fn default() -> Self {
        Self::new(RefParserOptions::default())
    }
}

impl RefParser {
    pub fn new(options: RefParserOptions) -> Self {
        Self {
            options,
            memory: MemoryLoader::new(),
            loaders: Vec::new(),
            parsers: default_parsers(),
            cancel: None,
        }
    }

    pub fn options(&self) -> &RefParserOptions {
        &self.options
    }

    /// Try `loader` before every loader added so far and the built-in ones.
    pub fn prepend_loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loaders.insert(0, Arc::new(loader));
        self
    }

    /// Try `parser` before every parser added so far and the built-in ones.
    pub fn prepend_parser(mut self, parser: impl Parser + 'static) -> Self {
        self.parsers.insert(0, Arc::new(parser));
        self
    }

    /// Serve `value` for `location` instead of loading it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` if `location` is not a valid path or URL.
    pub fn with_document(mut self, location: &str, value: Value) -> Result<Self, RefError> {
        let id = root_id(location)?;
        self.memory.insert_value(id, value);
        Ok(self)
    }

    /// Abort loads once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Load and parse the root document without touching its refs.
    ///
    /// # Errors
    ///
    /// Returns `Load` or `Parse` errors for the root document.
    pub async fn parse(&self, source: impl Into<Source>) -> Result<Value, RefError> {
        let strategies = self.strategies();
        let entry = self.root_entry(&strategies, source.into()).await?;
        Ok(entry.value)
    }

    /// Load the root document and every document reachable through `$ref`.
    ///
    /// # Errors
    ///
    /// See [`Resolver::resolve`].
    pub async fn resolve(&self, source: impl Into<Source>) -> Result<Resolution, RefError> {
        let strategies = self.strategies();
        let entry = self.root_entry(&strategies, source.into()).await?;
        let root = entry.id.clone();
        let value = entry.value.clone();
        let registry = self.resolver(&strategies).resolve(entry).await?;
        Ok(Resolution {
            root,
            value,
            registry,
        })
    }

    /// Resolve, then replace every `$ref` with the node it points to.
    ///
    /// # Errors
    ///
    /// Resolution errors, then see [`Dereferenced::from_registry`].
    pub async fn dereference(&self, source: impl Into<Source>) -> Result<Dereferenced, RefError> {
        let resolution = self.resolve(source).await?;
        Dereferenced::from_registry(resolution.registry, &self.options)
    }

    /// Resolve, then inline external documents into the root.
    ///
    /// # Errors
    ///
    /// Resolution errors, then see [`Bundled::from_registry`].
    pub async fn bundle(&self, source: impl Into<Source>) -> Result<Bundled, RefError> {
        let resolution = self.resolve(source).await?;
        Bundled::from_registry(resolution.registry, &self.options)
    }

    fn strategies(&self) -> Strategies {
        let builtin = Strategies::from_options(&self.options);
        let mut loaders: Vec<Arc<dyn Loader>> = Vec::new();
        if !self.memory.is_empty() {
            loaders.push(Arc::new(self.memory.clone()));
        }
        loaders.extend(self.loaders.iter().cloned());
        loaders.extend(builtin.loaders);

        Strategies {
            loaders,
            parsers: self.parsers.clone(),
        }
    }

    fn resolver<'a>(&'a self, strategies: &'a Strategies) -> Resolver<'a> {
        Resolver::new(strategies, &self.options).with_cancel(self.cancel.as_ref())
    }

    async fn root_entry(
        &self,
        strategies: &Strategies,
        source: Source,
    ) -> Result<RegistryEntry, RefError> {
        match source {
            Source::Path(path) => {
                let id = root_id(&path)?;
                tracing::debug!(root = %id, "loading root document");
                self.resolver(strategies).load_root(&id).await
            }
            Source::Value { value, base } => {
                let id = match base {
                    Some(base) => root_id(&base)?,
                    None => memory_root_id(),
                };
                Ok(RegistryEntry::new(id, ContentKind::Value, value))
            }
        }
    }
}

/// [`RefParser::parse`] with default options.
pub async fn parse(source: impl Into<Source>) -> Result<Value, RefError> {
    RefParser::default().parse(source).await
}

/// [`RefParser::resolve`] with default options.
pub async fn resolve(source: impl Into<Source>) -> Result<Resolution, RefError> {
    RefParser::default().resolve(source).await
}

/// [`RefParser::dereference`] with default options.
pub async fn dereference(source: impl Into<Source>) -> Result<Dereferenced, RefError> {
    RefParser::default().dereference(source).await
}

/// [`RefParser::bundle`] with default options.
pub async fn bundle(source: impl Into<Source>) -> Result<Bundled, RefError> {
    RefParser::default().bundle(source).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelHandle;
    use crate::error::{LoadError, ParseError};
    use crate::loader::LoadedSource;
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixed;

    #[async_trait]
    impl Loader for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn can_load(&self, id: &CanonicalId) -> bool {
            id.as_str().starts_with("fixed:")
        }

        async fn load(&self, id: &CanonicalId) -> Result<LoadedSource, LoadError> {
            Ok(LoadedSource::bytes(id.clone(), b"custom".to_vec()))
        }
    }

    struct Shout;

    impl Parser for Shout {
        fn name(&self) -> &'static str {
            "shout"
        }

        fn content_kind(&self) -> ContentKind {
            ContentKind::Text
        }

        fn can_parse(&self, source: &LoadedSource) -> bool {
            source.id.as_str().starts_with("fixed:")
        }

        fn parse(&self, bytes: &[u8]) -> Result<Value, ParseError> {
            let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotText)?;
            Ok(Value::String(text.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn value_source_without_base() {
        let resolution = RefParser::default()
            .resolve(json!({"type": "string"}))
            .await
            .unwrap();
        assert!(resolution.root.as_str().ends_with('/'));
        assert_eq!(resolution.value, json!({"type": "string"}));
        assert_eq!(resolution.registry.paths(&[]), vec![resolution.root.clone()]);
    }

    #[tokio::test]
    async fn in_memory_documents() {
        let parser = RefParser::default()
            .with_document("/virtual/defs.json", json!({"s": {"type": "string"}}))
            .unwrap();
        let result = parser
            .dereference(Source::value_at(
                json!({"a": {"$ref": "defs.json#/s"}}),
                "/virtual/root.json",
            ))
            .await
            .unwrap();
        assert_eq!(result.to_value().unwrap(), json!({"a": {"type": "string"}}));
    }

    #[tokio::test]
    async fn custom_strategies_go_first() {
        let parser = RefParser::default()
            .prepend_loader(Fixed)
            .prepend_parser(Shout);
        let value = parser.parse("fixed:greeting").await.unwrap();
        assert_eq!(value, json!("CUSTOM"));
    }

    #[tokio::test]
    async fn cancelled_parser_fails() {
        let handle = CancelHandle::new();
        handle.cancel();
        let parser = RefParser::default().with_cancel(handle.token());
        let err = parser.parse("/does/not/matter.json").await.unwrap_err();
        assert!(matches!(err, RefError::Cancelled));
    }

    #[tokio::test]
    async fn free_functions_use_defaults() {
        let doc = json!({"a": {"$ref": "#/b"}, "b": 1});
        assert_eq!(parse(doc.clone()).await.unwrap(), doc);
        assert_eq!(
            dereference(doc.clone()).await.unwrap().to_value().unwrap(),
            json!({"a": 1, "b": 1})
        );
        assert_eq!(bundle(doc.clone()).await.unwrap().value, doc);
        assert_eq!(resolve(doc).await.unwrap().registry.len(), 1);
    }
}
