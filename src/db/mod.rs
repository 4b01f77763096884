use crate::errors::{AppError, AppResult};
use crate::models::{ConsoleSettings, ExportFormat, ExportHistoryEntry, ExportResponse};
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Local console state: operator settings and the export history.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening settings database at {}", path.display()))?;
        conn.execute_batch(SCHEMA_SQL).context("creating settings database schema")?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        db.ensure_default_settings()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value_json, updated_at) VALUES ('console', ?1, ?2)",
            params![
                serde_json::to_string(&ConsoleSettings::default())?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn get_settings(&self) -> AppResult<ConsoleSettings> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'console'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<ConsoleSettings>(&raw).unwrap_or_default()),
            None => Ok(ConsoleSettings::default()),
        }
    }

    /// Merges a partial JSON update into the stored settings. Null members
    /// in the update leave the stored value alone.
    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<ConsoleSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: ConsoleSettings = serde_json::from_value(merged)
            .map_err(|err| AppError::Precondition(format!("Invalid settings: {}", err)))?;
        validate_settings(&settings)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('console', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;
        tracing::info!(page_size = settings.page_size, api = %settings.api_base_url, "settings updated");

        Ok(settings)
    }

    pub fn record_export(&self, entity: &str, export: &ExportResponse) -> AppResult<ExportHistoryEntry> {
        let entry = ExportHistoryEntry {
            id: Uuid::new_v4().to_string(),
            entity: entity.to_string(),
            format: export.format,
            path: export.path.clone(),
            row_count: export.rows,
            created_at: Utc::now(),
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO export_history (id, entity, format, path, row_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id,
                entry.entity,
                entry.format.as_str(),
                entry.path,
                entry.row_count as i64,
                entry.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(entry)
    }

    /// Most recent exports first.
    pub fn list_exports(&self, limit: usize) -> AppResult<Vec<ExportHistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, entity, format, path, row_count, created_at
             FROM export_history
             ORDER BY created_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit.max(1) as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, entity, format, path, row_count, created_at) = row?;
            let Some(format) = ExportFormat::parse(&format) else {
                tracing::warn!(id = %id, format = %format, "skipping export entry with unknown format");
                continue;
            };
            entries.push(ExportHistoryEntry {
                id,
                entity,
                format,
                path,
                row_count: row_count.max(0) as usize,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(entries)
    }
}

fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| AppError::Internal(format!("Invalid timestamp '{}': {}", raw, err)))
}

fn validate_settings(settings: &ConsoleSettings) -> AppResult<()> {
    if settings.page_size == 0 {
        return Err(AppError::Precondition("pageSize must be at least 1".to_string()));
    }
    if settings.notifications_page_limit == 0 {
        return Err(AppError::Precondition("notificationsPageLimit must be at least 1".to_string()));
    }
    if settings.scroll_threshold_px < 0.0 || !settings.scroll_threshold_px.is_finite() {
        return Err(AppError::Precondition("scrollThresholdPx must be a non-negative number".to_string()));
    }
    let base = settings.api_base_url.trim();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(AppError::Precondition("apiBaseUrl must be an http(s) URL".to_string()));
    }
    if settings.auth_header_name.trim().is_empty() {
        return Err(AppError::Precondition("authHeaderName cannot be empty".to_string()));
    }
    Ok(())
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (_, serde_json::Value::Null) => {}
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::errors::AppError;
    use crate::models::{ExportFormat, ExportResponse};
    use serde_json::json;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("state").join("console.db")).expect("db");
        (dir, db)
    }

    #[test]
    fn unopenable_path_reports_what_was_being_opened() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = Database::new(dir.path()).expect_err("a directory is not a database");
        assert!(matches!(error, AppError::Internal(_)));
        assert!(error.to_string().contains("settings database"), "{error}");
    }

    #[test]
    fn fresh_database_has_default_settings() {
        let (_dir, db) = open();
        let settings = db.get_settings().expect("settings");
        assert_eq!(settings.page_size, 10);
        assert_eq!(settings.auth_header_name, "x-access-token");
        assert!(db.path().ends_with("console.db"));
    }

    #[test]
    fn partial_updates_merge_and_persist() {
        let (dir, db) = open();
        let updated = db
            .update_settings(json!({ "pageSize": 25, "apiBaseUrl": null }))
            .expect("update");
        assert_eq!(updated.page_size, 25);
        assert_eq!(updated.api_base_url, "http://localhost:5000/api");
        drop(db);

        let reopened = Database::new(&dir.path().join("state").join("console.db")).expect("reopen");
        assert_eq!(reopened.get_settings().expect("settings").page_size, 25);
    }

    #[test]
    fn rejects_invalid_settings() {
        let (_dir, db) = open();
        let error = db.update_settings(json!({ "pageSize": 0 })).expect_err("zero page size");
        assert!(matches!(error, AppError::Precondition(_)));
        let error = db
            .update_settings(json!({ "apiBaseUrl": "ftp://legacy" }))
            .expect_err("bad scheme");
        assert!(matches!(error, AppError::Precondition(_)));
        let error = db.update_settings(json!({ "pageSize": "ten" })).expect_err("wrong type");
        assert!(matches!(error, AppError::Precondition(_)));
        assert_eq!(db.get_settings().expect("settings").page_size, 10);
    }

    #[test]
    fn export_history_lists_newest_first() {
        let (_dir, db) = open();
        for (index, format) in [ExportFormat::Csv, ExportFormat::Pdf].into_iter().enumerate() {
            db.record_export(
                "departments",
                &ExportResponse {
                    path: format!("/tmp/departments-{}.{}", index, format.extension()),
                    format,
                    rows: 3 + index,
                },
            )
            .expect("record");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let history = db.list_exports(10).expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].format, ExportFormat::Pdf);
        assert_eq!(history[0].row_count, 4);
        assert_eq!(history[1].entity, "departments");
        assert_eq!(db.list_exports(1).expect("limited").len(), 1);
    }
}
