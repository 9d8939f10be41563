//! JSON Schema `$ref` resolution.
//!
//! Loads a root schema (file, URL or in-memory value), follows every `$ref`
//! into local files and remote URLs, and offers three views of the result:
//!
//! - [`resolve`]: the root plus a [`Registry`] of every document reached,
//! - [`dereference`]: a [`Graph`] where each `$ref` is replaced by the node
//!   it points to (shared, possibly cyclic),
//! - [`bundle`]: one self-contained document with external documents inlined
//!   under `$bundled` and only local `$ref`s left.
//!
//! # Example
//!
//! ```
//! use schema_refs::{dereference, Source};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let schema = json!({
//!     "type": "object",
//!     "properties": {
//!         "billing": { "$ref": "#/definitions/address" },
//!         "shipping": { "$ref": "#/definitions/address" }
//!     },
//!     "definitions": {
//!         "address": { "type": "object" }
//!     }
//! });
//!
//! let result = dereference(Source::value(schema)).await.unwrap();
//!
//! // Both refs resolve to the same node.
//! assert_eq!(
//!     result.node_at("/properties/billing"),
//!     result.node_at("/properties/shipping")
//! );
//! assert_eq!(result.to_value().unwrap()["properties"]["billing"]["type"], "object");
//! # });
//! ```
//!
//! # Reference Syntax
//!
//! | `$ref` | Target |
//! |--------|--------|
//! | `#/definitions/a` | Pointer into the same document |
//! | `other.json` | Root of a file relative to the containing document |
//! | `../common.yaml#/x` | Pointer into a relative file |
//! | `https://example.com/s.json#/x` | Pointer into a remote document |
//!
//! Fragments are JSON Pointers (RFC 6901); plain-name anchors are rejected.

mod bundle;
mod cancel;
mod dereference;
mod error;
mod graph;
mod loader;
mod normalize;
mod parser;
mod pointer;
mod ref_parser;
mod registry;
mod resolver;
mod types;

pub use bundle::{Bundled, BUNDLE_KEY};
pub use cancel::{CancelHandle, CancelToken};
pub use dereference::Dereferenced;
pub use error::{LoadError, ParseError, RefError};
pub use graph::{CycleError, Graph, Node, NodeId};
pub use loader::{FileLoader, LoadedSource, Loader, MemoryLoader, SourceData};
pub use normalize::{is_url, memory_root_id, resolve_reference, root_id};
pub use parser::{
    default_parsers, parse_source, BinaryParser, JsonParser, Parsed, Parser, TextParser,
    YamlParser,
};
pub use pointer::JsonPointer;
pub use ref_parser::{bundle, dereference, parse, resolve, RefParser, Resolution, Source};
pub use registry::{Located, Registry, RegistryEntry};
pub use resolver::{Resolver, Strategies};
pub use types::{
    CanonicalId, CircularMode, ContentKind, FileOptions, HttpOptions, Location, RefParserOptions,
    RefPointer, SourceKind,
};

#[cfg(feature = "remote")]
pub use loader::HttpLoader;
