//! Structural checks for mapping queries and request-body extraction.

use crate::jobs::traits::MappingValidator;
use crate::{Error, Result};
use serde_json::Value;

const SOURCE_KEYS: [&str; 3] = ["csv_url", "csv_urls", "database"];

/// Accepts a query shaped like:
///
/// ```json
/// {"csv_url": "...", "entities": {"person": {"schema": "Person", "keys": ["id"], "properties": {}}}}
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingSchemaValidator;

impl MappingSchemaValidator {
    pub fn new() -> Self {
        Self
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidMapping(reason.into())
}

impl MappingValidator for MappingSchemaValidator {
    fn validate(&self, query: &Value) -> Result<()> {
        let query = query
            .as_object()
            .ok_or_else(|| invalid("query must be an object"))?;

        if !SOURCE_KEYS.iter().any(|k| query.contains_key(*k)) {
            return Err(invalid(format!(
                "query must name a source ({})",
                SOURCE_KEYS.join(", ")
            )));
        }

        let entities = query
            .get("entities")
            .and_then(Value::as_object)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| invalid("query must define at least one entity"))?;

        for (name, entity) in entities {
            let entity = entity
                .as_object()
                .ok_or_else(|| invalid(format!("entity '{name}' must be an object")))?;

            let schema = entity.get("schema").and_then(Value::as_str).map(str::trim);
            if schema.is_none_or(str::is_empty) {
                return Err(invalid(format!("entity '{name}' has no schema")));
            }

            if let Some(keys) = entity.get("keys") {
                let ok = keys
                    .as_array()
                    .is_some_and(|ks| ks.iter().all(Value::is_string));
                if !ok {
                    return Err(invalid(format!(
                        "entity '{name}': keys must be a list of strings"
                    )));
                }
            }

            if let Some(props) = entity.get("properties") {
                if !props.is_object() {
                    return Err(invalid(format!(
                        "entity '{name}': properties must be an object"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Pick the queries addressed to `foreign_id` out of a mapping request body.
///
/// `queries` comes first, then `query`. Either key may hold a list or a
/// single query; null or missing keys contribute nothing.
pub fn extract_mapping_queries(body: &Value, foreign_id: &str) -> Result<Vec<Value>> {
    let body = body
        .as_object()
        .ok_or_else(|| Error::Validation("mapping body must be an object".to_string()))?;

    let Some(section) = body.get(foreign_id) else {
        return Ok(Vec::new());
    };
    let section = section.as_object().ok_or_else(|| {
        Error::Validation(format!("mapping section '{foreign_id}' must be an object"))
    })?;

    let mut out = Vec::new();
    for key in ["queries", "query"] {
        match section.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => out.extend(items.iter().cloned()),
            Some(single) => out.push(single.clone()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn good() -> Value {
        json!({
            "csv_url": "file:///tmp/people.csv",
            "entities": {
                "person": {"schema": "Person", "keys": ["id"], "properties": {"name": {"column": "name"}}}
            }
        })
    }

    #[test]
    fn accepts_well_formed_query() {
        MappingSchemaValidator.validate(&good()).unwrap();
    }

    #[test]
    fn rejects_structural_problems() {
        let v = MappingSchemaValidator;
        let cases = [
            json!("not an object"),
            json!({"entities": {"p": {"schema": "Person"}}}),
            json!({"csv_url": "x", "entities": {}}),
            json!({"csv_url": "x", "entities": {"p": {"schema": " "}}}),
            json!({"csv_url": "x", "entities": {"p": {"schema": "Person", "keys": [1]}}}),
            json!({"database": "x", "entities": {"p": {"schema": "Person", "properties": []}}}),
        ];
        for case in cases {
            let err = v.validate(&case).unwrap_err();
            assert!(matches!(err, Error::InvalidMapping(_)), "{case}");
        }
    }

    #[test]
    fn extracts_list_single_or_nothing() {
        let body = json!({
            "a": {"queries": [good(), good()]},
            "b": {"query": good()},
            "c": {"queries": null},
        });
        assert_eq!(extract_mapping_queries(&body, "a").unwrap().len(), 2);
        assert_eq!(extract_mapping_queries(&body, "b").unwrap().len(), 1);
        assert!(extract_mapping_queries(&body, "c").unwrap().is_empty());
        assert!(extract_mapping_queries(&body, "d").unwrap().is_empty());
        assert!(extract_mapping_queries(&json!([]), "a").unwrap_err().is_validation());
    }

    #[test]
    fn queries_and_query_are_concatenated_in_order() {
        let first = json!({"csv_url": "file:///1.csv", "entities": {"p": {"schema": "Person"}}});
        let second = json!({"csv_url": "file:///2.csv", "entities": {"p": {"schema": "Person"}}});
        let third = json!({"database": "sqlite:///3.db", "entities": {"c": {"schema": "Company"}}});

        let body = json!({
            "reg": {"queries": [first.clone(), second.clone()], "query": third.clone()},
            "one": {"queries": first.clone(), "query": [second.clone(), third.clone()]},
        });
        assert_eq!(
            extract_mapping_queries(&body, "reg").unwrap(),
            vec![first.clone(), second.clone(), third.clone()]
        );
        assert_eq!(
            extract_mapping_queries(&body, "one").unwrap(),
            vec![first, second, third]
        );
    }
}
