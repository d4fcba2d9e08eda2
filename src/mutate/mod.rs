//! Deterministic, schema-driven fuzz-input generation for the Stress Runner.

use serde_json::{json, Map, Value};
use tracing::warn;

/// Closed set of mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Valid,
    MissingRequired,
    WrongType,
    NullValue,
    EmptyValue,
    Boundary,
    ExtraField,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Mutation {
    pub kind: MutationKind,
    pub label: String,
    pub input: Value,
}

fn default_value_for_type(ty: &str) -> Value {
    match ty {
        "string" => json!("test_value"),
        "integer" | "number" => json!(42),
        "boolean" => json!(true),
        "array" => json!([]),
        "object" => json!({}),
        _ => json!("test_value"),
    }
}

/// A canonical value of a foreign type to the declared one, so a
/// wrong-type mutation always actually changes the field's JSON type.
fn foreign_value_for_type(ty: &str) -> Value {
    match ty {
        "string" => json!(12345),
        "integer" | "number" => json!("wrong_type_value"),
        "boolean" => json!("not_a_boolean"),
        "array" => json!("not_an_array"),
        "object" => json!("not_an_object"),
        _ => json!(12345),
    }
}

fn declared_type(prop_schema: &Value) -> &str {
    prop_schema.get("type").and_then(Value::as_str).unwrap_or("string")
}

/// Generates the finite, deterministic sequence of test inputs for a tool's
/// declared JSON-Schema-shaped input: a valid control, then one or more
/// typed perturbations per property, then a single trailing extra-field
/// variant. Ordering follows property declaration order.
pub fn generate(schema: &Value) -> Vec<Mutation> {
    if let Err(e) = jsonschema::validator_for(schema) {
        warn!("tool input schema does not compile as JSON Schema, proceeding with a best-effort field scan: {e}");
    }

    let empty_props = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty_props);
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut valid = Map::new();
    for (name, prop_schema) in properties {
        valid.insert(name.clone(), default_value_for_type(declared_type(prop_schema)));
    }

    let mut mutations = Vec::new();
    mutations.push(Mutation {
        kind: MutationKind::Valid,
        label: "valid".to_string(),
        input: Value::Object(valid.clone()),
    });

    for (name, prop_schema) in properties {
        let ty = declared_type(prop_schema);

        if required.contains(&name.as_str()) {
            let mut variant = valid.clone();
            variant.remove(name);
            mutations.push(Mutation {
                kind: MutationKind::MissingRequired,
                label: format!("missing_required:{name}"),
                input: Value::Object(variant),
            });
        }

        let mut wrong_type = valid.clone();
        wrong_type.insert(name.clone(), foreign_value_for_type(ty));
        mutations.push(Mutation {
            kind: MutationKind::WrongType,
            label: format!("wrong_type:{name}"),
            input: Value::Object(wrong_type),
        });

        let mut null_variant = valid.clone();
        null_variant.insert(name.clone(), Value::Null);
        mutations.push(Mutation {
            kind: MutationKind::NullValue,
            label: format!("null_value:{name}"),
            input: Value::Object(null_variant),
        });

        match ty {
            "string" => {
                for (label_suffix, kind, value) in [
                    ("empty", MutationKind::EmptyValue, json!("")),
                    ("long", MutationKind::Boundary, json!("x".repeat(10_000))),
                    (
                        "path_traversal",
                        MutationKind::Boundary,
                        json!("../../../etc/passwd"),
                    ),
                ] {
                    let mut variant = valid.clone();
                    variant.insert(name.clone(), value);
                    mutations.push(Mutation {
                        kind,
                        label: format!("{label_suffix}:{name}"),
                        input: Value::Object(variant),
                    });
                }
            }
            "array" => {
                let mut variant = valid.clone();
                variant.insert(name.clone(), json!([]));
                mutations.push(Mutation {
                    kind: MutationKind::EmptyValue,
                    label: format!("empty:{name}"),
                    input: Value::Object(variant),
                });
            }
            "integer" | "number" => {
                for (label_suffix, value) in [
                    ("negative", json!(-1)),
                    ("max_safe_integer", json!(9_007_199_254_740_991i64)),
                ] {
                    let mut variant = valid.clone();
                    variant.insert(name.clone(), value);
                    mutations.push(Mutation {
                        kind: MutationKind::Boundary,
                        label: format!("{label_suffix}:{name}"),
                        input: Value::Object(variant),
                    });
                }
            }
            _ => {}
        }
    }

    let mut extra = valid;
    extra.insert("_unknown_field".to_string(), json!("unexpected"));
    mutations.push(Mutation {
        kind: MutationKind::ExtraField,
        label: "extra_field".to_string(),
        input: Value::Object(extra),
    });

    mutations
}
