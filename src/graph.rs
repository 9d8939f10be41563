//! Arena graph for dereferenced documents.
//!
//! A dereferenced schema can share subtrees and contain cycles, which a
//! `serde_json::Value` tree cannot express. Nodes live in a [`Graph`] and
//! refer to their children by [`NodeId`]; two paths that lead to the same
//! `NodeId` lead to the same node.

use std::collections::HashSet;

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::pointer::JsonPointer;

/// Handle of a node inside one [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<NodeId>),
    /// Members in document order.
    Object(Vec<(String, NodeId)>),
}

/// Raised when a cyclic graph is converted back into a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cycle closes at \"{path}\"")]
pub struct CycleError {
    /// Pointer, from the conversion root, of the edge that closes the cycle.
    pub path: JsonPointer,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Replace the node behind `id`.
    pub fn set(&mut self, id: NodeId, node: Node) {
        self.nodes[id.0] = node;
    }

    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Child of an object (by key) or array (by index).
    pub fn child(&self, id: NodeId, token: &str) -> Option<NodeId> {
        match self.get(id)? {
            Node::Object(members) => members
                .iter()
                .find(|(key, _)| key == token)
                .map(|(_, child)| *child),
            Node::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i).copied()),
            _ => None,
        }
    }

    /// Follow `pointer` from `root`.
    pub fn pointer(&self, root: NodeId, pointer: &JsonPointer) -> Option<NodeId> {
        pointer
            .tokens()
            .iter()
            .try_fold(root, |id, token| self.child(id, token))
    }

    /// Set (or add) an object member. Returns false if `object` is not an
    /// object node.
    pub fn insert_member(&mut self, object: NodeId, key: &str, value: NodeId) -> bool {
        match self.node_mut(object) {
            Node::Object(members) => {
                match members.iter_mut().find(|(k, _)| k == key) {
                    Some((_, slot)) => *slot = value,
                    None => members.push((key.to_string(), value)),
                }
                true
            }
            _ => false,
        }
    }

    /// Copy a JSON tree into the graph as fresh nodes.
    pub fn insert_value(&mut self, value: &Value) -> NodeId {
        let node = match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(*b),
            Value::Number(n) => Node::Number(n.clone()),
            Value::String(s) => Node::String(s.clone()),
            Value::Array(items) => {
                Node::Array(items.iter().map(|item| self.insert_value(item)).collect())
            }
            Value::Object(map) => Node::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), self.insert_value(item)))
                    .collect(),
            ),
        };
        self.add(node)
    }

    /// Convert the subgraph under `root` into a JSON tree.
    ///
    /// Shared nodes are duplicated in the output.
    ///
    /// # Errors
    ///
    /// Returns `CycleError` if a node is reachable from itself.
    pub fn to_value(&self, root: NodeId) -> Result<Value, CycleError> {
        let mut path = Vec::new();
        self.to_value_inner(root, &mut path, &mut HashSet::new())
    }

    fn to_value_inner(
        &self,
        id: NodeId,
        path: &mut Vec<String>,
        ancestors: &mut HashSet<NodeId>,
    ) -> Result<Value, CycleError> {
        let value = match self.node(id) {
            Node::Null => return Ok(Value::Null),
            Node::Bool(b) => return Ok(Value::Bool(*b)),
            Node::Number(n) => return Ok(Value::Number(n.clone())),
            Node::String(s) => return Ok(Value::String(s.clone())),
            Node::Array(items) => {
                if !ancestors.insert(id) {
                    return Err(CycleError {
                        path: JsonPointer::from_tokens(path.iter().cloned()),
                    });
                }
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    path.push(i.to_string());
                    out.push(self.to_value_inner(*item, path, ancestors)?);
                    path.pop();
                }
                Value::Array(out)
            }
            Node::Object(members) => {
                if !ancestors.insert(id) {
                    return Err(CycleError {
                        path: JsonPointer::from_tokens(path.iter().cloned()),
                    });
                }
                let mut out = Map::new();
                for (key, member) in members {
                    path.push(key.clone());
                    out.insert(key.clone(), self.to_value_inner(*member, path, ancestors)?);
                    path.pop();
                }
                Value::Object(out)
            }
        };
        ancestors.remove(&id);
        Ok(value)
    }

    /// True if `a` in this graph and `b` in `other` unfold to the same
    /// (possibly infinite) tree.
    ///
    /// Pairs already under comparison are assumed equal, so cycles
    /// terminate. Object member order is ignored.
    pub fn structurally_eq(&self, a: NodeId, other: &Graph, b: NodeId) -> bool {
        self.eq_inner(a, other, b, &mut HashSet::new())
    }

    fn eq_inner(
        &self,
        a: NodeId,
        other: &Graph,
        b: NodeId,
        assumed: &mut HashSet<(NodeId, NodeId)>,
    ) -> bool {
        if !assumed.insert((a, b)) {
            return true;
        }
        match (self.node(a), other.node(b)) {
            (Node::Null, Node::Null) => true,
            (Node::Bool(x), Node::Bool(y)) => x == y,
            (Node::Number(x), Node::Number(y)) => x == y,
            (Node::String(x), Node::String(y)) => x == y,
            (Node::Array(xs), Node::Array(ys)) => {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .zip(ys)
                        .all(|(x, y)| self.eq_inner(*x, other, *y, assumed))
            }
            (Node::Object(xs), Node::Object(ys)) => {
                xs.len() == ys.len()
                    && xs.iter().all(|(key, x)| {
                        ys.iter()
                            .find(|(k, _)| k == key)
                            .is_some_and(|(_, y)| self.eq_inner(*x, other, *y, assumed))
                    })
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_roundtrip_keeps_order() {
        let doc = json!({"z": 1, "a": [true, null, "s"], "m": {"k": 1.5}});
        let mut graph = Graph::new();
        let root = graph.insert_value(&doc);
        let back = graph.to_value(root).unwrap();
        assert_eq!(back, doc);
        let keys: Vec<&String> = back.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn pointer_lookup() {
        let mut graph = Graph::new();
        let root = graph.insert_value(&json!({"a": [{"b": 1}]}));
        let b = graph
            .pointer(root, &JsonPointer::parse("/a/0/b").unwrap())
            .unwrap();
        assert_eq!(graph.node(b), &Node::Number(1.into()));
        assert!(graph
            .pointer(root, &JsonPointer::parse("/a/1").unwrap())
            .is_none());
    }

    #[test]
    fn shared_nodes_duplicate_in_output() {
        let mut graph = Graph::new();
        let shared = graph.insert_value(&json!({"type": "string"}));
        let root = graph.add(Node::Object(vec![
            ("a".into(), shared),
            ("b".into(), shared),
        ]));
        assert_eq!(
            graph.to_value(root).unwrap(),
            json!({"a": {"type": "string"}, "b": {"type": "string"}})
        );
    }

    #[test]
    fn cycle_is_reported() {
        let mut graph = Graph::new();
        let root = graph.add(Node::Object(Vec::new()));
        let child = graph.add(Node::Object(vec![("parent".into(), root)]));
        graph.insert_member(root, "child", child);

        let err = graph.to_value(root).unwrap_err();
        assert_eq!(err.path.to_string(), "/child/parent");
    }

    #[test]
    fn structural_eq_ignores_member_order() {
        let mut a = Graph::new();
        let ra = a.insert_value(&json!({"x": 1, "y": [1, 2]}));
        let mut b = Graph::new();
        let rb = b.insert_value(&json!({"y": [1, 2], "x": 1}));
        assert!(a.structurally_eq(ra, &b, rb));

        let rc = b.insert_value(&json!({"y": [2, 1], "x": 1}));
        assert!(!a.structurally_eq(ra, &b, rc));
    }

    #[test]
    fn structural_eq_terminates_on_cycles() {
        // a: node -> itself; b: two-node loop with the same shape.
        let mut a = Graph::new();
        let na = a.add(Node::Object(Vec::new()));
        a.insert_member(na, "next", na);

        let mut b = Graph::new();
        let n1 = b.add(Node::Object(Vec::new()));
        let n2 = b.add(Node::Object(vec![("next".into(), n1)]));
        b.insert_member(n1, "next", n2);

        assert!(a.structurally_eq(na, &b, n1));
        assert!(b.structurally_eq(n1, &a, na));
    }

    #[test]
    fn insert_member_on_scalar_fails() {
        let mut graph = Graph::new();
        let scalar = graph.add(Node::Bool(true));
        let other = graph.add(Node::Null);
        assert!(!graph.insert_member(scalar, "x", other));
    }
}
