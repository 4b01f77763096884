use crate::client::{ApiClient, ConsoleApi};
use crate::credentials::CredentialProvider;
use crate::db::Database;
use crate::entities::EntitySpec;
use crate::errors::{AppError, AppResult};
use crate::export::write_export;
use crate::list_view::ListView;
use crate::models::{ConsoleSettings, ExportFormat, ExportHistoryEntry, ExportResponse};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Application root: owns the local database, the API client and the
/// export directory, and hands out list views wired to them.
#[derive(Clone)]
pub struct ConsoleCore {
    db: Arc<Database>,
    api: Arc<RwLock<Arc<dyn ConsoleApi>>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    app_data_dir: PathBuf,
}

impl ConsoleCore {
    pub fn new(app_data_dir: PathBuf, credentials: Arc<dyn CredentialProvider>) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(&app_data_dir.join("console.db"))?);
        let settings = db.get_settings()?;
        let api: Arc<dyn ConsoleApi> = Arc::new(ApiClient::new(&settings, credentials.clone())?);
        Self::assemble(app_data_dir, db, api, Some(credentials))
    }

    /// Same as `new`, with a caller-supplied API. Settings updates keep
    /// using it instead of rebuilding an HTTP client.
    pub fn with_api(app_data_dir: PathBuf, api: Arc<dyn ConsoleApi>) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(&app_data_dir.join("console.db"))?);
        Self::assemble(app_data_dir, db, api, None)
    }

    fn assemble(
        app_data_dir: PathBuf,
        db: Arc<Database>,
        api: Arc<dyn ConsoleApi>,
        credentials: Option<Arc<dyn CredentialProvider>>,
    ) -> AppResult<Arc<Self>> {
        std::fs::create_dir_all(app_data_dir.join("exports")).map_err(|error| AppError::Io(error.to_string()))?;
        tracing::info!(data_dir = %app_data_dir.display(), "console core ready");
        Ok(Arc::new(Self {
            db,
            api: Arc::new(RwLock::new(api)),
            credentials,
            app_data_dir,
        }))
    }

    pub fn export_dir(&self) -> PathBuf {
        self.app_data_dir.join("exports")
    }

    pub fn data_dir(&self) -> &Path {
        &self.app_data_dir
    }

    fn api(&self) -> AppResult<Arc<dyn ConsoleApi>> {
        self.api
            .read()
            .map(|api| api.clone())
            .map_err(|_| AppError::Internal("api lock poisoned".to_string()))
    }

    pub fn open(&self, spec: EntitySpec) -> AppResult<ListView> {
        let settings = self.db.get_settings()?;
        Ok(ListView::new(spec, self.api()?, &settings))
    }

    /// Partner-scoped accident reports. An unknown partner still yields a
    /// view; it reports itself unavailable instead of loading.
    pub fn open_accident_reports(&self, partner: &str) -> AppResult<ListView> {
        self.open(EntitySpec::accident_reports(partner))
    }

    /// Exports the full filtered, sorted view of `view` and records it in the
    /// export history.
    pub fn export(&self, view: &ListView, format: ExportFormat) -> AppResult<ExportResponse> {
        let spec = view.spec();
        if let Some(reason) = &spec.unavailable_reason {
            return Err(AppError::NotFound(reason.clone()));
        }
        let rows = view.export_rows()?;
        let response = write_export(&self.export_dir(), spec, format, &rows)?;
        if let Err(error) = self.db.record_export(spec.kind.as_str(), &response) {
            tracing::warn!(error = %error, path = %response.path, "failed to record export history");
        }
        Ok(response)
    }

    pub fn export_history(&self, limit: usize) -> AppResult<Vec<ExportHistoryEntry>> {
        self.db.list_exports(limit)
    }

    pub fn get_settings(&self) -> AppResult<ConsoleSettings> {
        self.db.get_settings()
    }

    /// Applies a partial settings update. Views opened afterwards pick up
    /// the new API client; views already open keep the one they started with.
    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<ConsoleSettings> {
        let settings = self.db.update_settings(update)?;
        if let Some(credentials) = &self.credentials {
            let rebuilt: Arc<dyn ConsoleApi> = Arc::new(ApiClient::new(&settings, credentials.clone())?);
            let mut api = self
                .api
                .write()
                .map_err(|_| AppError::Internal("api lock poisoned".to_string()))?;
            *api = rebuilt;
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::ConsoleCore;
    use crate::credentials::StaticCredentials;
    use crate::entities::EntitySpec;
    use crate::errors::AppError;
    use crate::models::ExportFormat;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn creates_database_and_export_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = ConsoleCore::new(dir.path().to_path_buf(), Arc::new(StaticCredentials::new(Some("tok"))))
            .expect("core");
        assert!(dir.path().join("console.db").is_file());
        assert!(core.export_dir().is_dir());
        assert_eq!(core.data_dir(), dir.path());
    }

    #[test]
    fn settings_update_is_visible_to_new_views() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = ConsoleCore::new(dir.path().to_path_buf(), Arc::new(StaticCredentials::new(None)))
            .expect("core");
        let updated = core
            .update_settings(json!({ "apiBaseUrl": "https://console.example.com/api", "pageSize": 5 }))
            .expect("update");
        assert_eq!(updated.page_size, 5);
        assert_eq!(core.get_settings().expect("settings").api_base_url, "https://console.example.com/api");
        let view = core.open(EntitySpec::departments()).expect("view");
        assert_eq!(view.snapshot().expect("snapshot").window_size, 0);
    }

    #[test]
    fn unknown_partner_cannot_export() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = ConsoleCore::new(dir.path().to_path_buf(), Arc::new(StaticCredentials::new(None)))
            .expect("core");
        let view = core.open_accident_reports("").expect("view");
        let error = core.export(&view, ExportFormat::Csv).expect_err("unavailable");
        assert!(matches!(error, AppError::NotFound(_)));
        assert!(core.export_history(10).expect("history").is_empty());
    }
}
