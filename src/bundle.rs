//! Bundling - inlines every external document into the root so the result
//! only contains local `$ref`s.
//!
//! External documents are stored once each under [`BUNDLE_KEY`] in the root
//! object, and every `$ref` is rewritten to a fragment pointing into the
//! bundled document:
//!
//! ```json
//! {
//!   "a": { "$ref": "#/$bundled/other.json/x" },
//!   "$bundled": { "other.json": { "x": 42 } }
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde_json::{Map, Value};
use url::Url;

use crate::error::RefError;
use crate::normalize::{base_dir, relative_path, resolve_reference};
use crate::pointer::JsonPointer;
use crate::registry::Registry;
use crate::types::{CanonicalId, RefParserOptions, SourceKind, REF_KEY};

/// Root key under which external documents are inlined.
pub const BUNDLE_KEY: &str = "$bundled";

/// A self-contained document.
#[derive(Debug)]
pub struct Bundled {
    pub value: Value,
    pub registry: Registry,
}

impl Bundled {
    /// Bundle the registry's root document.
    ///
    /// # Errors
    ///
    /// `UnresolvedReference`/`PointerResolution` for broken refs (unless
    /// `allow_unresolved`), `Bundle` when external documents need a slot but
    /// the root is not an object.
    pub fn from_registry(
        registry: Registry,
        options: &RefParserOptions,
    ) -> Result<Self, RefError> {
        let value = bundle_value(&registry, options)?;
        Ok(Self { value, registry })
    }
}

fn bundle_value(registry: &Registry, options: &RefParserOptions) -> Result<Value, RefError> {
    let root_id = registry.root();
    let root = registry
        .root_entry()
        .ok_or_else(|| RefError::UnresolvedReference {
            reference: root_id.to_string(),
            id: root_id.clone(),
            path: String::new(),
        })?;

    let existing: Vec<String> = root
        .value
        .get(BUNDLE_KEY)
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();
    let slots = assign_slots(registry, &existing);
    let rewriter = Rewriter {
        registry,
        options,
        slots: &slots,
    };

    let mut bundled = root.value.clone();
    rewriter.rewrite(&mut bundled, root_id, &JsonPointer::root())?;

    if slots.is_empty() {
        return Ok(bundled);
    }

    let mut inlined = Vec::with_capacity(slots.len());
    for (id, slot) in &slots {
        let Some(entry) = registry.get(id) else {
            continue;
        };
        let mut value = entry.value.clone();
        rewriter.rewrite(&mut value, id, &JsonPointer::root())?;
        inlined.push((slot.clone(), value));
    }

    let not_object = |message: &str| RefError::Bundle {
        id: root_id.clone(),
        message: message.to_string(),
    };
    let root_map = bundled
        .as_object_mut()
        .ok_or_else(|| not_object("root must be an object to hold external documents"))?;
    let namespace = root_map
        .entry(BUNDLE_KEY)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| not_object("existing \"$bundled\" member is not an object"))?;
    for (slot, value) in inlined {
        namespace.insert(slot, value);
    }

    tracing::debug!(root = %root_id, documents = slots.len(), "bundled");
    Ok(bundled)
}

/// Pick one key per external document. Ties are broken with `-2`, `-3`, ...
/// in id order.
fn assign_slots(registry: &Registry, existing: &[String]) -> BTreeMap<CanonicalId, String> {
    let root = registry.root();
    let mut used: HashSet<String> = existing.iter().cloned().collect();
    let mut slots = BTreeMap::new();

    for id in registry.paths(&[]) {
        if &id == root {
            continue;
        }
        let base = slot_name(&id, root);
        let mut name = base.clone();
        let mut n = 2;
        while used.contains(&name) {
            name = format!("{}-{}", base, n);
            n += 1;
        }
        used.insert(name.clone());
        slots.insert(id, name);
    }
    slots
}

fn slot_name(id: &CanonicalId, root: &CanonicalId) -> String {
    match id.kind() {
        SourceKind::File if root.kind() == SourceKind::File => {
            relative_path(&base_dir(root), Path::new(id.as_str()))
        }
        SourceKind::Http => match Url::parse(id.as_str()) {
            Ok(url) => {
                let host = url.host_str().unwrap_or_default();
                match url.port() {
                    Some(port) => format!("{}:{}{}", host, port, url.path()),
                    None => format!("{}{}", host, url.path()),
                }
            }
            Err(_) => id.to_string(),
        },
        _ => id.to_string(),
    }
}

struct Rewriter<'a> {
    registry: &'a Registry,
    options: &'a RefParserOptions,
    slots: &'a BTreeMap<CanonicalId, String>,
}

impl Rewriter<'_> {
    /// Rewrite every `$ref` under `value`, which lives in document `id`.
    fn rewrite(
        &self,
        value: &mut Value,
        id: &CanonicalId,
        pointer: &JsonPointer,
    ) -> Result<(), RefError> {
        match value {
            Value::Object(map) => {
                let local = match map.get(REF_KEY) {
                    Some(Value::String(reference)) => self.local_ref(reference, id, pointer)?,
                    _ => None,
                };
                if let Some(local) = local {
                    map.insert(REF_KEY.to_string(), Value::String(local));
                }
                for (key, child) in map.iter_mut() {
                    if key == REF_KEY {
                        continue;
                    }
                    self.rewrite(child, id, &pointer.child(key.as_str()))?;
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter_mut().enumerate() {
                    self.rewrite(child, id, &pointer.child(i.to_string()))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The bundle-local form of `reference`, or `None` to leave it as is.
    fn local_ref(
        &self,
        reference: &str,
        id: &CanonicalId,
        pointer: &JsonPointer,
    ) -> Result<Option<String>, RefError> {
        let target = match resolve_reference(reference, id) {
            Ok(target) => target,
            Err(error) => return self.unresolved(error, pointer),
        };
        if &target.target != id && !self.options.external {
            return Ok(None);
        }
        if let Err(error) = self
            .registry
            .resolve_pointer(&target.target, &target.fragment)
        {
            return self.unresolved(error, pointer);
        }

        if &target.target == self.registry.root() {
            return Ok(Some(target.fragment.to_fragment()));
        }
        match self.slots.get(&target.target) {
            Some(slot) => {
                let local = JsonPointer::from_tokens([BUNDLE_KEY, slot.as_str()])
                    .join(&target.fragment);
                Ok(Some(local.to_fragment()))
            }
            None => self.unresolved(
                RefError::UnresolvedReference {
                    reference: reference.to_string(),
                    id: id.clone(),
                    path: String::new(),
                },
                pointer,
            ),
        }
    }

    fn unresolved(
        &self,
        error: RefError,
        pointer: &JsonPointer,
    ) -> Result<Option<String>, RefError> {
        if self.options.allow_unresolved {
            tracing::debug!(error = %error, "leaving unresolved $ref in bundle");
            return Ok(None);
        }
        Err(error.at(pointer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryEntry;
    use crate::types::ContentKind;
    use serde_json::json;

    const ROOT: &str = "/schemas/root.json";

    fn registry(root_id: &str, root: Value, others: &[(&str, Value)]) -> Registry {
        let mut registry = Registry::new(CanonicalId::new(root_id));
        registry.set(RegistryEntry::new(
            CanonicalId::new(root_id),
            ContentKind::Json,
            root,
        ));
        for (id, value) in others {
            registry.set(RegistryEntry::new(
                CanonicalId::new(*id),
                ContentKind::Json,
                value.clone(),
            ));
        }
        registry
    }

    fn bundle(registry: Registry) -> Result<Value, RefError> {
        Bundled::from_registry(registry, &RefParserOptions::default()).map(|b| b.value)
    }

    #[test]
    fn no_refs_is_identity() {
        let doc = json!({"type": "object", "properties": {"a": {"type": "string"}}});
        assert_eq!(bundle(registry(ROOT, doc.clone(), &[])).unwrap(), doc);
    }

    #[test]
    fn inlines_external_document() {
        let result = bundle(registry(
            ROOT,
            json!({"a": {"$ref": "other.json#/x"}}),
            &[("/schemas/other.json", json!({"x": 42}))],
        ))
        .unwrap();
        assert_eq!(
            result,
            json!({
                "a": {"$ref": "#/$bundled/other.json/x"},
                "$bundled": {"other.json": {"x": 42}}
            })
        );
    }

    #[test]
    fn internal_refs_normalized() {
        let result = bundle(registry(
            ROOT,
            json!({"a": {"$ref": "root.json#/b"}, "b": {"$ref": "#/c", "title": "t"}, "c": 1}),
            &[],
        ))
        .unwrap();
        assert_eq!(
            result,
            json!({"a": {"$ref": "#/b"}, "b": {"$ref": "#/c", "title": "t"}, "c": 1})
        );
    }

    #[test]
    fn refs_inside_inlined_documents_are_rewritten() {
        let result = bundle(registry(
            ROOT,
            json!({"a": {"$ref": "defs/a.json"}}),
            &[
                ("/schemas/defs/a.json", json!({"items": {"$ref": "b.json#/s"}, "me": {"$ref": "#/items"}})),
                ("/schemas/defs/b.json", json!({"s": {"back": {"$ref": "../root.json"}}})),
            ],
        ))
        .unwrap();
        assert_eq!(
            result,
            json!({
                "a": {"$ref": "#/$bundled/defs~1a.json"},
                "$bundled": {
                    "defs/a.json": {
                        "items": {"$ref": "#/$bundled/defs~1b.json/s"},
                        "me": {"$ref": "#/$bundled/defs~1a.json/items"}
                    },
                    "defs/b.json": {"s": {"back": {"$ref": "#"}}}
                }
            })
        );
    }

    #[test]
    fn shared_document_inlined_once() {
        let result = bundle(registry(
            ROOT,
            json!({"a": {"$ref": "a.json"}, "b": {"$ref": "b.json"}}),
            &[
                ("/schemas/a.json", json!({"x": {"$ref": "shared.json#/t"}})),
                ("/schemas/b.json", json!({"y": {"$ref": "shared.json#/t"}})),
                ("/schemas/shared.json", json!({"t": {"type": "string"}})),
            ],
        ))
        .unwrap();
        let namespace = result[BUNDLE_KEY].as_object().unwrap();
        assert_eq!(namespace.len(), 3);
        assert_eq!(namespace["shared.json"], json!({"t": {"type": "string"}}));
        assert_eq!(
            namespace["a.json"]["x"]["$ref"],
            json!("#/$bundled/shared.json/t")
        );
        assert_eq!(
            namespace["b.json"]["y"]["$ref"],
            json!("#/$bundled/shared.json/t")
        );
    }

    #[test]
    fn circular_external_refs_are_fine() {
        let result = bundle(registry(
            ROOT,
            json!({"a": {"$ref": "a.json"}}),
            &[("/schemas/a.json", json!({"next": {"$ref": "a.json"}}))],
        ))
        .unwrap();
        assert_eq!(
            result[BUNDLE_KEY]["a.json"]["next"]["$ref"],
            json!("#/$bundled/a.json")
        );
    }

    #[test]
    fn slot_names_for_urls() {
        let result = bundle(registry(
            ROOT,
            json!({"a": {"$ref": "https://example.com/s/a.json#/x"}}),
            &[("https://example.com/s/a.json", json!({"x": true}))],
        ))
        .unwrap();
        assert_eq!(
            result["a"]["$ref"],
            json!("#/$bundled/example.com~1s~1a.json/x")
        );
        assert_eq!(result[BUNDLE_KEY]["example.com/s/a.json"]["x"], json!(true));
    }

    #[test]
    fn slot_collisions_get_suffixes() {
        let result = bundle(registry(
            ROOT,
            json!({"$bundled": {"a.json": "taken"}, "a": {"$ref": "a.json"}}),
            &[("/schemas/a.json", json!({}))],
        ))
        .unwrap();
        assert_eq!(result["a"]["$ref"], json!("#/$bundled/a.json-2"));
        assert_eq!(result[BUNDLE_KEY]["a.json"], json!("taken"));
        assert_eq!(result[BUNDLE_KEY]["a.json-2"], json!({}));
    }

    #[test]
    fn non_object_root_fails() {
        let err = bundle(registry(
            ROOT,
            json!([{"$ref": "a.json"}]),
            &[("/schemas/a.json", json!({}))],
        ))
        .unwrap_err();
        assert!(matches!(err, RefError::Bundle { .. }));
    }

    #[test]
    fn broken_pointer_fails() {
        let err = bundle(registry(ROOT, json!({"a": {"$ref": "#/missing"}}), &[])).unwrap_err();
        assert!(matches!(err, RefError::PointerResolution { .. }));
    }

    #[test]
    fn unresolved_document_fails() {
        let err = bundle(registry(ROOT, json!({"a": {"$ref": "gone.json"}}), &[])).unwrap_err();
        assert!(matches!(
            err,
            RefError::UnresolvedReference { ref path, .. } if path == "/a"
        ));
    }

    #[test]
    fn allow_unresolved_leaves_ref() {
        let options = RefParserOptions::default().allow_unresolved(true);
        let doc = json!({"a": {"$ref": "gone.json"}});
        let bundled = Bundled::from_registry(registry(ROOT, doc.clone(), &[]), &options).unwrap();
        assert_eq!(bundled.value, doc);
    }

    #[test]
    fn external_disabled_leaves_ref() {
        let options = RefParserOptions::default().external(false);
        let doc = json!({"a": {"$ref": "gone.json"}, "b": {"$ref": "#/a"}});
        let bundled = Bundled::from_registry(registry(ROOT, doc.clone(), &[]), &options).unwrap();
        assert_eq!(bundled.value, doc);
    }
}
