//! Dark-mode preference persisted under the `darkMode` cache key.

use serde_json::Value;

use crate::storage::{keys, Storage, StorageError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThemePreference {
    dark_mode: bool,
}

impl ThemePreference {
    /// Read the saved preference, or fall back to the system's.
    pub fn init(storage: &Storage, system_prefers_dark: bool) -> Result<Self, StorageError> {
        let dark_mode = match storage.get(keys::DARK_MODE)? {
            Some(Value::Bool(b)) => b,
            // Older clients stored the flag as text.
            Some(Value::String(s)) => s == "true",
            Some(_) | None => system_prefers_dark,
        };
        Ok(Self { dark_mode })
    }

    pub fn dark_mode(&self) -> bool {
        self.dark_mode
    }

    /// Flip and persist. Returns the new value.
    pub fn toggle(&mut self, storage: &Storage) -> Result<bool, StorageError> {
        let next = !self.dark_mode;
        storage.set(keys::DARK_MODE, &Value::Bool(next))?;
        self.dark_mode = next;
        Ok(next)
    }
}
