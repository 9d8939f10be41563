//! Dereferencing - replaces every `$ref` with the node it points to.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::error::RefError;
use crate::graph::{Graph, Node, NodeId};
use crate::normalize::resolve_reference;
use crate::pointer::JsonPointer;
use crate::registry::{Located, Registry};
use crate::types::{is_pure_ref, ref_string, CircularMode, Location, RefParserOptions, REF_KEY};

/// A fully dereferenced document.
#[derive(Debug)]
pub struct Dereferenced {
    pub graph: Graph,
    pub root: NodeId,
    /// True if at least one circular `$ref` was found.
    pub circular: bool,
    pub registry: Registry,
}

impl Dereferenced {
    /// Build the graph for the registry's root document.
    ///
    /// # Errors
    ///
    /// `UnresolvedReference`/`PointerResolution` for broken refs (unless
    /// `allow_unresolved`), `CircularReference` in `CircularMode::Disallow`.
    pub fn from_registry(
        registry: Registry,
        options: &RefParserOptions,
    ) -> Result<Self, RefError> {
        let (graph, root, circular) = {
            let entry = registry
                .root_entry()
                .ok_or_else(|| RefError::UnresolvedReference {
                    reference: registry.root().to_string(),
                    id: registry.root().clone(),
                    path: String::new(),
                })?;
            let mut builder = Builder::new(&registry, options);
            let root = builder.build(Location::root(entry.id.clone()), &entry.value)?;
            (builder.graph, root, builder.circular)
        };

        tracing::debug!(
            root = %registry.root(),
            nodes = graph.len(),
            circular,
            "dereferenced"
        );
        Ok(Self {
            graph,
            root,
            circular,
            registry,
        })
    }

    /// The dereferenced document as a JSON tree.
    ///
    /// # Errors
    ///
    /// Returns `CircularReference` if the graph has a cycle.
    pub fn to_value(&self) -> Result<Value, RefError> {
        self.graph
            .to_value(self.root)
            .map_err(|cycle| RefError::CircularReference {
                reference: cycle.path.to_fragment(),
                id: self.registry.root().clone(),
                path: cycle.path.to_string(),
            })
    }

    /// Node at `pointer` from the root of the dereferenced document.
    pub fn node_at(&self, pointer: &str) -> Option<NodeId> {
        let pointer = JsonPointer::parse(pointer).ok()?;
        self.graph.pointer(self.root, &pointer)
    }
}

struct Builder<'r> {
    registry: &'r Registry,
    options: &'r RefParserOptions,
    graph: Graph,
    /// Node built for each container location.
    memo: HashMap<Location, NodeId>,
    /// Locations whose node is allocated but whose children are still being
    /// built.
    in_progress: HashSet<Location>,
    circular: bool,
}

impl<'r> Builder<'r> {
    fn new(registry: &'r Registry, options: &'r RefParserOptions) -> Self {
        Self {
            registry,
            options,
            graph: Graph::new(),
            memo: HashMap::new(),
            in_progress: HashSet::new(),
            circular: false,
        }
    }

    fn build(&mut self, location: Location, value: &'r Value) -> Result<NodeId, RefError> {
        if let Some(reference) = ref_string(value) {
            return self.build_ref(location, value, reference);
        }

        match value {
            Value::Object(_) | Value::Array(_) => {}
            scalar => return Ok(self.graph.insert_value(scalar)),
        }

        if let Some(&id) = self.memo.get(&location) {
            if self.in_progress.contains(&location) {
                self.note_cycle(&location.pointer.to_fragment(), &location)?;
                if self.options.circular == CircularMode::Ignore {
                    return Ok(self.graph.insert_value(value));
                }
            }
            return Ok(id);
        }

        let id = self.enter(&location);
        let node = match value {
            Value::Array(items) => {
                let mut children = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    children.push(self.build(location.child(i.to_string()), item)?);
                }
                Node::Array(children)
            }
            Value::Object(map) => {
                let mut members = Vec::with_capacity(map.len());
                for (key, item) in map {
                    members.push((key.clone(), self.build(location.child(key.as_str()), item)?));
                }
                Node::Object(members)
            }
            _ => Node::Null,
        };
        self.leave(&location, id, node);
        Ok(id)
    }

    fn build_ref(
        &mut self,
        location: Location,
        value: &'r Value,
        reference: &str,
    ) -> Result<NodeId, RefError> {
        // An extended ref reached a second time.
        if let Some(&id) = self.memo.get(&location) {
            if self.in_progress.contains(&location) {
                self.note_cycle(reference, &location)?;
                if self.options.circular == CircularMode::Ignore {
                    return Ok(self.graph.insert_value(value));
                }
            }
            return Ok(id);
        }

        let target = match resolve_reference(reference, &location.id) {
            Ok(target) => target,
            Err(error) => return self.unresolved(&location, value, error),
        };
        if target.target != location.id && !self.options.external {
            return Ok(self.graph.insert_value(value));
        }

        let registry = self.registry;
        let located = match registry.locate(&target) {
            Ok(located) => located,
            Err(RefError::CircularReference { .. }) => {
                self.note_cycle(reference, &location)?;
                return Ok(self.graph.insert_value(value));
            }
            Err(error) => return self.unresolved(&location, value, error),
        };

        let extended = !is_pure_ref(value);
        if self.in_progress.contains(&located.location) {
            self.note_cycle(reference, &location)?;
            // An unfinished extended ref has no members to inherit yet.
            let chained = extended && ref_string(located.value).is_some();
            if self.options.circular == CircularMode::Ignore || chained {
                return Ok(self.graph.insert_value(value));
            }
            if !extended {
                if let Some(&id) = self.memo.get(&located.location) {
                    return Ok(id);
                }
            }
        }

        if extended && located.value.is_object() {
            self.build_extended(location, value, reference, located)
        } else {
            self.build(located.location, located.value)
        }
    }

    /// Merge an extended ref's sibling keys over its target's members.
    ///
    /// A target that is itself an extended ref is built first, and its
    /// resolved members are inherited.
    fn build_extended(
        &mut self,
        location: Location,
        value: &'r Value,
        reference: &str,
        target: Located<'r>,
    ) -> Result<NodeId, RefError> {
        let id = self.enter(&location);
        let chained = ref_string(target.value).is_some();
        if chained && self.in_progress.contains(&target.location) {
            self.note_cycle(reference, &location)?;
            let literal = self.graph.insert_value(value);
            let node = self.graph.node(literal).clone();
            self.leave(&location, id, node);
            return Ok(id);
        }

        let mut members = Vec::new();
        if let Some(siblings) = value.as_object() {
            for (key, item) in siblings {
                if key == REF_KEY {
                    continue;
                }
                members.push((key.clone(), self.build(location.child(key.as_str()), item)?));
            }
        }

        let inherited = if chained {
            let built = self.build(target.location.clone(), target.value)?;
            match self.graph.node(built).clone() {
                Node::Object(inherited) => inherited,
                other => {
                    self.leave(&location, id, other);
                    return Ok(id);
                }
            }
        } else {
            let mut inherited = Vec::new();
            if let Some(map) = target.value.as_object() {
                for (key, item) in map {
                    if members.iter().any(|(k, _)| k == key) {
                        continue;
                    }
                    let child = self.build(target.location.child(key.as_str()), item)?;
                    inherited.push((key.clone(), child));
                }
            }
            inherited
        };

        for (key, child) in inherited {
            if key == REF_KEY || members.iter().any(|(k, _)| *k == key) {
                continue;
            }
            members.push((key, child));
        }

        self.leave(&location, id, Node::Object(members));
        Ok(id)
    }

    fn enter(&mut self, location: &Location) -> NodeId {
        let id = self.graph.add(Node::Null);
        self.memo.insert(location.clone(), id);
        self.in_progress.insert(location.clone());
        id
    }

    fn leave(&mut self, location: &Location, id: NodeId, node: Node) {
        self.graph.set(id, node);
        self.in_progress.remove(location);
    }

    fn note_cycle(&mut self, reference: &str, location: &Location) -> Result<(), RefError> {
        if self.options.circular == CircularMode::Disallow {
            return Err(RefError::CircularReference {
                reference: reference.to_string(),
                id: location.id.clone(),
                path: location.pointer.to_string(),
            });
        }
        if !self.circular {
            tracing::debug!(at = %location, reference, "circular $ref");
        }
        self.circular = true;
        Ok(())
    }

    fn unresolved(
        &mut self,
        location: &Location,
        value: &'r Value,
        error: RefError,
    ) -> Result<NodeId, RefError> {
        if self.options.allow_unresolved && !matches!(error, RefError::Cancelled) {
            tracing::debug!(at = %location, error = %error, "keeping unresolved $ref");
            return Ok(self.graph.insert_value(value));
        }
        Err(error.at(&location.pointer))
    }
}
