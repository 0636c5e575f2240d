use super::{Watermark, WatermarkError, WatermarkStore};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Key of the watermark inside the state object.
pub const WATERMARK_KEY: &str = "modified";

/// Watermark store backed by a small JSON object file:
///
/// ```text
/// {"modified": "2022-05-05T11:00:00+00:00"}
/// ```
///
/// Unknown keys are preserved on write. Writes go to a sibling temp file
/// which is fsynced and renamed over the target.
#[derive(Debug, Clone)]
pub struct JsonFileWatermarkStore {
    path: PathBuf,
}

impl JsonFileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> WatermarkError {
        WatermarkError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Load the whole state object. A missing or blank file is an empty object.
    fn load_state(&self) -> Result<Map<String, Value>, WatermarkError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(state)) => Ok(state),
            Ok(_) => Err(WatermarkError::NotAnObject {
                path: self.path.clone(),
            }),
            Err(source) => Err(WatermarkError::Malformed {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save_state(&self, state: &Map<String, Value>) -> Result<(), WatermarkError> {
        let content = serde_json::to_string_pretty(state).map_err(|source| {
            WatermarkError::Malformed {
                path: self.path.clone(),
                source,
            }
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path).map_err(|e| self.io_error(e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| self.io_error(e))
    }
}

impl WatermarkStore for JsonFileWatermarkStore {
    fn read(&self) -> Result<Option<Watermark>, WatermarkError> {
        let state = self.load_state()?;
        match state.get(WATERMARK_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => Watermark::parse(text.as_str()).map(Some),
            Some(other) => Err(WatermarkError::InvalidTimestamp(other.to_string())),
        }
    }

    fn write(&self, watermark: &Watermark) -> Result<(), WatermarkError> {
        let mut state = self.load_state()?;

        if let Some(Value::String(current)) = state.get(WATERMARK_KEY) {
            if current == watermark.as_str() {
                debug!(
                    "Watermark {} already stored in {:?}, skipping write",
                    watermark, self.path
                );
                return Ok(());
            }
        }

        state.insert(
            WATERMARK_KEY.to_string(),
            Value::String(watermark.as_str().to_string()),
        );
        self.save_state(&state)?;

        debug!("Stored watermark {} in {:?}", watermark, self.path);
        Ok(())
    }
}
