use super::IndexError;
use serde_json::Value;
use std::path::Path;

/// Load the index definition (`settings` + `mappings`) from a JSON file.
pub fn load_index_schema(path: &Path) -> Result<Value, IndexError> {
    let content = std::fs::read_to_string(path).map_err(|source| IndexError::SchemaIo {
        path: path.to_path_buf(),
        source,
    })?;

    match serde_json::from_str::<Value>(&content) {
        Ok(schema @ Value::Object(_)) => Ok(schema),
        Ok(_) => Err(IndexError::SchemaInvalid {
            path: path.to_path_buf(),
            reason: "top-level value must be an object".to_string(),
        }),
        Err(e) => Err(IndexError::SchemaInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}
