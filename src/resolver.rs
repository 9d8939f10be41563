//! `$ref` resolution - discovers every reachable document and loads it into
//! a [`Registry`].

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::error::{LoadError, RefError};
use crate::loader::{FileLoader, Loader, SourceData};
use crate::normalize::resolve_reference;
use crate::parser::{default_parsers, parse_source, Parser};
use crate::pointer::JsonPointer;
use crate::registry::{Registry, RegistryEntry};
use crate::types::{ref_string, CanonicalId, RefParserOptions};

#[cfg(feature = "remote")]
use crate::loader::HttpLoader;

/// Ordered loader and parser lists. The first capable strategy wins.
#[derive(Clone)]
pub struct Strategies {
    pub loaders: Vec<Arc<dyn Loader>>,
    pub parsers: Vec<Arc<dyn Parser>>,
}

impl Strategies {
    /// The built-in file (and, with `remote`, HTTP) loaders plus the
    /// default parsers.
    pub fn from_options(options: &RefParserOptions) -> Self {
        let mut loaders: Vec<Arc<dyn Loader>> = Vec::new();
        loaders.push(Arc::new(FileLoader::new(options.file.clone())));
        #[cfg(feature = "remote")]
        loaders.push(Arc::new(HttpLoader::new(options.http.clone())));

        Self {
            loaders,
            parsers: default_parsers(),
        }
    }
}

/// Loads the transitive closure of documents reachable from a root.
pub struct Resolver<'a> {
    strategies: &'a Strategies,
    options: &'a RefParserOptions,
    cancel: Option<&'a CancelToken>,
}

impl<'a> Resolver<'a> {
    pub fn new(strategies: &'a Strategies, options: &'a RefParserOptions) -> Self {
        Self {
            strategies,
            options,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Option<&'a CancelToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Load and parse the root document.
    ///
    /// # Errors
    ///
    /// Always fails on a load or parse error, regardless of
    /// `continue_on_error`.
    pub async fn load_root(&self, id: &CanonicalId) -> Result<RegistryEntry, RefError> {
        self.ensure_live()?;
        let load = load_entry(self.strategies, self.options, id);
        match self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(RefError::Cancelled),
                entry = load => entry,
            },
            None => load.await,
        }
    }

    /// Resolve every document reachable from `root`.
    ///
    /// Loads run concurrently, at most `max_concurrency` at a time. Each
    /// id is reserved in the registry before its load is scheduled, so a
    /// document referenced from many places is fetched once.
    ///
    /// # Errors
    ///
    /// Returns the first load, parse or invalid-reference failure unless
    /// `continue_on_error` is set, and `Cancelled` if the cancel token fires.
    pub async fn resolve(&self, root: RegistryEntry) -> Result<Registry, RefError> {
        let mut registry = Registry::new(root.id.clone());
        let mut queue = VecDeque::new();

        registry.reserve(&root.id);
        self.discover(&root.id, &root.value, &mut registry, &mut queue)?;
        registry.set(root);

        let mut in_flight = FuturesUnordered::new();
        loop {
            self.ensure_live()?;
            while in_flight.len() < self.options.max_concurrency {
                let Some(id) = queue.pop_front() else {
                    break;
                };
                tracing::debug!(id = %id, "scheduling load");
                in_flight.push(fetch(self.strategies, self.options, id));
            }

            let next = match self.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(RefError::Cancelled),
                    next = in_flight.next() => next,
                },
                None => in_flight.next().await,
            };
            let Some((id, result)) = next else {
                break;
            };

            match result {
                Ok(entry) => {
                    tracing::debug!(id = %id, content = ?entry.content, "loaded");
                    self.discover(&entry.id, &entry.value, &mut registry, &mut queue)?;
                    registry.set(entry);
                }
                Err(error) => self.record_failure(&mut registry, id, error)?,
            }
        }

        tracing::info!(
            root = %registry.root(),
            documents = registry.len(),
            errors = registry.errors().count(),
            "resolution complete"
        );
        Ok(registry)
    }

    /// Queue every external document `value` refers to that is not known yet.
    fn discover(
        &self,
        id: &CanonicalId,
        value: &Value,
        registry: &mut Registry,
        queue: &mut VecDeque<CanonicalId>,
    ) -> Result<(), RefError> {
        let mut refs = Vec::new();
        collect_refs(value, &JsonPointer::root(), &mut refs);

        for (pointer, reference) in refs {
            let target = match resolve_reference(reference, id) {
                Ok(target) => target.target,
                Err(error) => {
                    let error = error.at(&pointer);
                    if !self.options.continue_on_error {
                        return Err(error);
                    }
                    tracing::warn!(error = %error, "skipping invalid $ref");
                    registry.record_error(error);
                    continue;
                }
            };

            if &target == id || !self.options.external {
                continue;
            }
            if registry.reserve(&target) {
                queue.push_back(target);
            }
        }
        Ok(())
    }

    fn record_failure(
        &self,
        registry: &mut Registry,
        id: CanonicalId,
        error: RefError,
    ) -> Result<(), RefError> {
        if !self.options.continue_on_error {
            return Err(error);
        }
        tracing::warn!(id = %id, error = %error, "failed to resolve document, continuing");
        registry.fail(id, error);
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), RefError> {
        match self.cancel {
            Some(token) if token.is_cancelled() => Err(RefError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Every `$ref` string under `value`, with the pointer of the node holding it.
pub(crate) fn collect_refs<'v>(
    value: &'v Value,
    pointer: &JsonPointer,
    out: &mut Vec<(JsonPointer, &'v str)>,
) {
    match value {
        Value::Object(map) => {
            if let Some(reference) = ref_string(value) {
                out.push((pointer.clone(), reference));
            }
            for (key, child) in map {
                collect_refs(child, &pointer.child(key.as_str()), out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_refs(child, &pointer.child(i.to_string()), out);
            }
        }
        _ => {}
    }
}

async fn fetch(
    strategies: &Strategies,
    options: &RefParserOptions,
    id: CanonicalId,
) -> (CanonicalId, Result<RegistryEntry, RefError>) {
    let result = load_entry(strategies, options, &id).await;
    (id, result)
}

async fn load_entry(
    strategies: &Strategies,
    options: &RefParserOptions,
    id: &CanonicalId,
) -> Result<RegistryEntry, RefError> {
    let loader = strategies
        .loaders
        .iter()
        .find(|loader| loader.can_load(id))
        .ok_or_else(|| RefError::Load {
            id: id.clone(),
            source: LoadError::NoLoader { id: id.to_string() },
        })?;
    tracing::trace!(id = %id, loader = loader.name(), "loading");

    let source = loader.load(id).await.map_err(|source| RefError::Load {
        id: id.clone(),
        source,
    })?;
    let parsed = parse_source(&strategies.parsers, &source, options.allow_empty).map_err(
        |source| RefError::Parse {
            id: id.clone(),
            source,
        },
    )?;

    let entry = RegistryEntry::new(id.clone(), parsed.content, parsed.value);
    Ok(match source.data {
        SourceData::Bytes(bytes) => entry.with_raw(bytes),
        SourceData::Value(_) => entry,
    })
}
