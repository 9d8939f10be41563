//! Integration tests for dereferencing.

use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use schema_refs::{
    dereference, CircularMode, Node, RefError, RefParser, RefParserOptions, Source,
};

fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

fn parser(circular: CircularMode) -> RefParser {
    RefParser::new(RefParserOptions::new().circular(circular))
}

// === Plain replacement ===

mod replacement {
    use super::*;

    #[tokio::test]
    async fn no_refs_is_identity() {
        let schema = json!({
            "type": "object",
            "required": ["id"],
            "properties": {"id": {"type": "string"}, "tags": {"type": "array"}}
        });
        let result = dereference(schema.clone()).await.unwrap();
        assert!(!result.circular);
        assert_eq!(result.to_value().unwrap(), schema);
    }

    #[tokio::test]
    async fn external_pointer() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(&dir, "root.json", r#"{"a": {"$ref": "other.json#/x"}}"#);
        write_temp_file(&dir, "other.json", r#"{"x": 42}"#);

        let result = dereference(root.to_str().unwrap()).await.unwrap();
        assert_eq!(result.to_value().unwrap(), json!({"a": 42}));
        assert_eq!(result.registry.len(), 2);
    }

    #[tokio::test]
    async fn nested_files_and_yaml() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(
            &dir,
            "api/root.yaml",
            "properties:\n  order:\n    $ref: '../models/order.json'\n",
        );
        write_temp_file(
            &dir,
            "models/order.json",
            r#"{"properties": {"total": {"$ref": "money.yaml#/Money"}}}"#,
        );
        write_temp_file(
            &dir,
            "models/money.yaml",
            "Money:\n  type: object\n  properties:\n    amount: {type: integer}\n",
        );

        let result = dereference(root.to_str().unwrap()).await.unwrap();
        assert_eq!(
            result.to_value().unwrap(),
            json!({
                "properties": {
                    "order": {
                        "properties": {
                            "total": {
                                "type": "object",
                                "properties": {"amount": {"type": "integer"}}
                            }
                        }
                    }
                }
            })
        );
    }

    #[tokio::test]
    async fn pointer_through_ref() {
        let schema = json!({
            "a": {"$ref": "#/alias/inner"},
            "alias": {"$ref": "#/real"},
            "real": {"inner": {"const": true}}
        });
        let result = dereference(schema).await.unwrap();
        assert_eq!(result.to_value().unwrap()["a"], json!({"const": true}));
    }

    #[tokio::test]
    async fn escaped_pointer_tokens() {
        let schema = json!({
            "a": {"$ref": "#/definitions/a~1b/c%20d"},
            "definitions": {"a/b": {"c d": {"type": "null"}}}
        });
        let result = dereference(schema).await.unwrap();
        assert_eq!(result.to_value().unwrap()["a"], json!({"type": "null"}));
    }

    #[tokio::test]
    async fn extended_ref_keeps_siblings() {
        let schema = json!({
            "a": {"$ref": "#/definitions/name", "description": "Customer name"},
            "definitions": {"name": {"type": "string", "maxLength": 64}}
        });
        let result = dereference(schema).await.unwrap();
        assert_eq!(
            result.to_value().unwrap()["a"],
            json!({"type": "string", "maxLength": 64, "description": "Customer name"})
        );
    }

    #[tokio::test]
    async fn extended_ref_chain_across_files() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(
            &dir,
            "root.json",
            r#"{"a": {"$ref": "mid.json", "description": "root"}}"#,
        );
        write_temp_file(&dir, "mid.json", r#"{"$ref": "base.json", "title": "mid"}"#);
        write_temp_file(&dir, "base.json", r#"{"type": "string"}"#);

        let result = dereference(root.to_str().unwrap()).await.unwrap();
        assert!(!result.circular);
        let value = result.to_value().unwrap();
        assert_eq!(
            value,
            json!({"a": {"description": "root", "title": "mid", "type": "string"}})
        );

        let twice = dereference(value.clone()).await.unwrap().to_value().unwrap();
        assert_eq!(twice, value);
    }

    #[tokio::test]
    async fn dereference_twice_is_noop() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(
            &dir,
            "root.json",
            r##"{"items": {"$ref": "item.json"}, "extra": {"$ref": "#/items/properties/id"}}"##,
        );
        write_temp_file(&dir, "item.json", r#"{"properties": {"id": {"type": "string"}}}"#);

        let once = dereference(root.to_str().unwrap())
            .await
            .unwrap()
            .to_value()
            .unwrap();
        let twice = dereference(once.clone()).await.unwrap().to_value().unwrap();
        assert_eq!(once, twice);
    }
}

// === Shared identity ===

mod identity {
    use super::*;

    #[tokio::test]
    async fn same_target_same_node() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(
            &dir,
            "root.json",
            r#"{
                "billing": {"$ref": "address.json"},
                "shipping": {"$ref": "./address.json#"}
            }"#,
        );
        write_temp_file(&dir, "address.json", r#"{"type": "object"}"#);

        let mut result = dereference(root.to_str().unwrap()).await.unwrap();
        let billing = result.node_at("/billing").unwrap();
        let shipping = result.node_at("/shipping").unwrap();
        assert_eq!(billing, shipping);

        let flag = result.graph.add(Node::Bool(false));
        result.graph.insert_member(billing, "additionalProperties", flag);
        let value = result.to_value().unwrap();
        assert_eq!(value["shipping"]["additionalProperties"], json!(false));
    }

    #[tokio::test]
    async fn ref_and_definition_share_node() {
        let schema = json!({
            "a": {"$ref": "#/$defs/x"},
            "$defs": {"x": {"type": "integer"}}
        });
        let result = dereference(schema).await.unwrap();
        assert_eq!(result.node_at("/a"), result.node_at("/$defs/x"));
    }
}

// === Circular references ===

mod circular {
    use super::*;

    fn self_referencing() -> Value {
        json!({"a": {"self": {"$ref": "#/a"}}})
    }

    #[tokio::test]
    async fn allow_builds_cycle() {
        let result = dereference(self_referencing()).await.unwrap();
        assert!(result.circular);
        let a = result.node_at("/a").unwrap();
        assert_eq!(result.node_at("/a/self"), Some(a));
        assert!(matches!(
            result.to_value(),
            Err(RefError::CircularReference { .. })
        ));
    }

    #[tokio::test]
    async fn ignore_keeps_ref() {
        let result = parser(CircularMode::Ignore)
            .dereference(self_referencing())
            .await
            .unwrap();
        assert!(result.circular);
        assert_eq!(result.to_value().unwrap(), self_referencing());
    }

    #[tokio::test]
    async fn disallow_fails() {
        let err = parser(CircularMode::Disallow)
            .dereference(self_referencing())
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::CircularReference { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn direct_self_ref_does_not_overflow() {
        let result = dereference(json!({"a": {"$ref": "#/a"}, "b": {"$ref": "#/b"}}))
            .await
            .unwrap();
        assert!(result.circular);
        assert_eq!(
            result.to_value().unwrap(),
            json!({"a": {"$ref": "#/a"}, "b": {"$ref": "#/b"}})
        );
    }

    #[tokio::test]
    async fn extended_cycle_across_files() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(&dir, "a.json", r#"{"$ref": "b.json", "x": 1}"#);
        write_temp_file(&dir, "b.json", r#"{"$ref": "a.json", "y": 2}"#);

        let result = dereference(root.to_str().unwrap()).await.unwrap();
        assert!(result.circular);
        assert_eq!(result.to_value().unwrap(), json!({"x": 1, "y": 2}));

        let err = parser(CircularMode::Disallow)
            .dereference(root.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::CircularReference { .. }));
    }

    #[tokio::test]
    async fn ignore_keeps_cycle_inside_extended_target() {
        let schema = json!({
            "x": {"$ref": "#/t/c"},
            "t": {"c": {"e": {"$ref": "#/t", "k": 1}}}
        });
        let result = parser(CircularMode::Ignore)
            .dereference(schema)
            .await
            .unwrap();
        assert!(result.circular);
        let value = result.to_value().unwrap();
        assert_eq!(value["x"]["e"]["c"], json!({"e": {"$ref": "#/t", "k": 1}}));
    }

    #[tokio::test]
    async fn cycle_across_files() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(&dir, "person.json", r#"{"properties": {"parent": {"$ref": "link.json"}}}"#);
        write_temp_file(&dir, "link.json", r#"{"properties": {"person": {"$ref": "person.json"}}}"#);

        let result = dereference(root.to_str().unwrap()).await.unwrap();
        assert!(result.circular);
        assert_eq!(
            result.node_at("/properties/parent/properties/person"),
            Some(result.root)
        );
    }
}

// === Unresolved references ===

mod unresolved {
    use super::*;

    #[tokio::test]
    async fn missing_pointer_fails() {
        let err = dereference(json!({"a": {"$ref": "#/definitions/missing"}}))
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::PointerResolution { .. }));
    }

    #[tokio::test]
    async fn allow_unresolved_keeps_literal() {
        let schema = json!({"a": {"$ref": "#/definitions/missing"}});
        let result = RefParser::new(RefParserOptions::new().allow_unresolved(true))
            .dereference(schema.clone())
            .await
            .unwrap();
        assert_eq!(result.to_value().unwrap(), schema);
    }

    #[tokio::test]
    async fn continue_on_error_with_allow_unresolved() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(
            &dir,
            "root.json",
            r#"{"a": {"$ref": "missing.json"}, "b": {"$ref": "ok.json"}}"#,
        );
        write_temp_file(&dir, "ok.json", r#"{"type": "boolean"}"#);

        let options = RefParserOptions::new()
            .continue_on_error(true)
            .allow_unresolved(true);
        let result = RefParser::new(options)
            .dereference(root.to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(
            result.to_value().unwrap(),
            json!({"a": {"$ref": "missing.json"}, "b": {"type": "boolean"}})
        );
        assert_eq!(result.registry.errors().count(), 1);
    }

    #[tokio::test]
    async fn continue_on_error_alone_still_fails_on_use() {
        let dir = TempDir::new().unwrap();
        let root = write_temp_file(&dir, "root.json", r#"{"a": {"$ref": "missing.json"}}"#);

        let err = RefParser::new(RefParserOptions::new().continue_on_error(true))
            .dereference(root.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RefError::UnresolvedReference { ref path, .. } if path == "/a"
        ));
    }

    #[tokio::test]
    async fn no_external_keeps_external_refs() {
        let schema = json!({
            "a": {"$ref": "https://example.com/schemas/a.json"},
            "b": {"$ref": "#/c"},
            "c": {"type": "string"}
        });
        let result = RefParser::new(RefParserOptions::new().external(false))
            .dereference(Source::value(schema))
            .await
            .unwrap();
        assert_eq!(
            result.to_value().unwrap(),
            json!({
                "a": {"$ref": "https://example.com/schemas/a.json"},
                "b": {"type": "string"},
                "c": {"type": "string"}
            })
        );
    }
}
