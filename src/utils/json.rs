use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// One field of a JSON merge-patch body: absent, explicitly `null`, or a value.
#[derive(Debug, PartialEq)]
pub enum PatchField<T> {
    Omitted,
    Null,
    Set(T),
}

impl<T> PatchField<T> {
    /// Shape expected by diesel changesets for nullable columns.
    pub fn into_nullable(self) -> Option<Option<T>> {
        match self {
            PatchField::Omitted => None,
            PatchField::Null => Some(None),
            PatchField::Set(value) => Some(Some(value)),
        }
    }
}

pub fn patch_field<T: DeserializeOwned>(
    body: &Map<String, Value>,
    field: &str,
) -> Result<PatchField<T>, String> {
    match body.get(field) {
        None => Ok(PatchField::Omitted),
        Some(Value::Null) => Ok(PatchField::Null),
        Some(value) => serde_json::from_value(value.clone())
            .map(PatchField::Set)
            .map_err(|err| format!("invalid {field}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test bodies are objects"),
        }
    }

    #[test]
    fn distinguishes_absent_null_and_set() {
        let patch = body(json!({ "vendor_pattern": null, "min_amount": 10.5 }));
        assert_eq!(
            patch_field::<String>(&patch, "name").unwrap(),
            PatchField::Omitted
        );
        assert_eq!(
            patch_field::<String>(&patch, "vendor_pattern").unwrap(),
            PatchField::Null
        );
        assert_eq!(
            patch_field::<f64>(&patch, "min_amount").unwrap().into_nullable(),
            Some(Some(10.5))
        );
    }

    #[test]
    fn rejects_wrong_types() {
        let patch = body(json!({ "priority": "high" }));
        let err = patch_field::<i32>(&patch, "priority").unwrap_err();
        assert!(err.starts_with("invalid priority"));
    }
}
