//! Error types for `$ref` resolution, dereferencing and bundling.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::CanonicalId;

/// Errors raised by a [`Loader`](crate::Loader) strategy.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid HTTP header \"{header}\": {message}")]
    InvalidHeader { header: String, message: String },

    #[error("no loader can handle {id}")]
    NoLoader { id: String },
}

/// Errors raised by a [`Parser`](crate::Parser) strategy.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML: {source}")]
    InvalidYaml {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML has no JSON equivalent: {message}")]
    NotJson { message: String },

    #[error("content is not valid UTF-8 text")]
    NotText,

    #[error("parsed value is empty")]
    Empty,

    #[error("no parser accepted the content")]
    NoParser,
}

/// Errors during resolution, dereferencing and bundling.
///
/// Every variant names the document it happened in; variants with a `path`
/// field also carry the JSON Pointer of the offending node.
#[derive(Debug, Error)]
pub enum RefError {
    #[error("invalid $ref \"{reference}\" in {id}{}: {message}", location_suffix(.path))]
    InvalidReference {
        reference: String,
        id: CanonicalId,
        path: String,
        message: String,
    },

    #[error("cannot load {id}: {source}")]
    Load {
        id: CanonicalId,
        #[source]
        source: LoadError,
    },

    #[error("cannot parse {id}: {source}")]
    Parse {
        id: CanonicalId,
        #[source]
        source: ParseError,
    },

    #[error("cannot resolve \"{pointer}\" in {id}: {message}")]
    PointerResolution {
        id: CanonicalId,
        pointer: String,
        message: String,
    },

    #[error("unresolved $ref \"{reference}\" in {id}{}", location_suffix(.path))]
    UnresolvedReference {
        reference: String,
        id: CanonicalId,
        path: String,
    },

    #[error("circular $ref \"{reference}\" in {id}{}", location_suffix(.path))]
    CircularReference {
        reference: String,
        id: CanonicalId,
        path: String,
    },

    #[error("failed to bundle {id}: {message}")]
    Bundle { id: CanonicalId, message: String },

    #[error("resolution cancelled")]
    Cancelled,
}

fn location_suffix(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" at {}", path)
    }
}

impl RefError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            RefError::Load { .. } => 3,
            RefError::Cancelled => 130,
            _ => 2,
        }
    }

    /// Attach the JSON Pointer of the node where the failure was observed.
    ///
    /// Only fills in a location that is still empty, so the innermost
    /// location wins when errors bubble up through nested refs.
    pub fn at(mut self, pointer: impl std::fmt::Display) -> Self {
        match &mut self {
            RefError::InvalidReference { path, .. }
            | RefError::UnresolvedReference { path, .. }
            | RefError::CircularReference { path, .. } => {
                if path.is_empty() {
                    *path = pointer.to_string();
                }
            }
            _ => {}
        }
        self
    }

    /// The document the error belongs to, if any.
    pub fn id(&self) -> Option<&CanonicalId> {
        match self {
            RefError::InvalidReference { id, .. }
            | RefError::Load { id, .. }
            | RefError::Parse { id, .. }
            | RefError::PointerResolution { id, .. }
            | RefError::UnresolvedReference { id, .. }
            | RefError::CircularReference { id, .. }
            | RefError::Bundle { id, .. } => Some(id),
            RefError::Cancelled => None,
        }
    }
}
