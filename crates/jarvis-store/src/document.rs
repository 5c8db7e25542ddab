//! Persistence of the settings document row.

use chrono::Utc;
use jarvis_shared::models::Settings;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Load the settings document, or `None` if it was never written.
    pub fn load_settings(&self) -> Result<Option<Settings>> {
        let json: Option<String> = self
            .conn()
            .query_row("SELECT json FROM settings_document WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        json.map(|json| {
            serde_json::from_str(&json).map_err(|e| StoreError::Corrupt(e.to_string()))
        })
        .transpose()
    }

    /// Replace the persisted settings document.
    pub fn write_settings(&self, settings: &Settings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO settings_document (id, json, updated_at) VALUES (1, ?1, ?2)",
            params![json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
