use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One entity instance as returned by the API server. The console never
/// interprets records beyond field lookup, so the raw JSON object is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Resolves a dotted path such as `headOfEmployee.name`. Missing
    /// segments and `null` both resolve to `None`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    /// Stable identity as a string; numeric ids are stringified.
    pub fn id(&self, id_field: &str) -> Option<String> {
        match self.0.get(id_field)? {
            Value::String(value) if !value.is_empty() => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Sets `field`, or removes it when `value` is `None` (used to restore
    /// a field that did not exist before an optimistic change).
    pub fn set(&mut self, field: &str, value: Option<Value>) {
        match value {
            Some(value) => {
                self.0.insert(field.to_string(), value);
            }
            None => {
                self.0.remove(field);
            }
        }
    }

    pub fn flag(&self, field: &str) -> bool {
        match self.0.get(field) {
            Some(Value::Bool(value)) => *value,
            Some(Value::Number(value)) => value.as_i64() == Some(1),
            Some(Value::String(value)) => value.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortConfig {
    pub key: Option<String>,
    pub direction: SortDirection,
}

impl SortConfig {
    pub fn by(key: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            key: Some(key.into()),
            direction,
        }
    }

    /// Column-header click: same key flips direction, a new key starts
    /// ascending.
    pub fn toggled(&self, key: &str) -> Self {
        match self.key.as_deref() {
            Some(current) if current == key => Self {
                key: self.key.clone(),
                direction: self.direction.flipped(),
            },
            _ => Self::by(key, SortDirection::Ascending),
        }
    }
}

/// Server-side pagination metadata, passed through to page controls as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaginationMeta {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionPage {
    pub records: Vec<Record>,
    pub pagination: Option<PaginationMeta>,
    pub unread_count: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
}

impl MutationRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationAck {
    pub message: Option<String>,
    pub body: Value,
}

/// An optimistic change that has been applied locally and is waiting on
/// the server. `previous_value` is `None` when the field did not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    pub ticket: Uuid,
    pub target_id: String,
    pub field: String,
    pub previous_value: Option<Value>,
    pub new_value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "state")]
pub enum LoadState {
    Idle,
    Loading,
    Ready,
    Failed { message: String, retryable: bool },
    Unauthenticated,
    Unavailable { reason: String },
}

/// How a settled mutation left the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum MutationOutcome {
    /// The optimistic patch was confirmed and kept.
    LocalPatch,
    /// The record was removed after the server acknowledged the delete.
    Removed { target_id: String },
    /// Server-side effects are unknown locally; the collection was re-fetched.
    RequiresResync,
    /// The operator declined the confirmation; nothing happened.
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationReport {
    pub outcome: MutationOutcome,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSnapshot {
    pub rows: Vec<Record>,
    pub matched: usize,
    pub total: usize,
    pub window_size: usize,
    pub has_more: bool,
    pub filter: String,
    pub sort: SortConfig,
    pub load: LoadState,
    pub pagination: Option<PaginationMeta>,
    pub unread_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsoleSettings {
    pub api_base_url: String,
    pub auth_header_name: String,
    pub token_prefix: String,
    pub page_size: usize,
    pub scroll_threshold_px: f64,
    pub growth_settle_ms: u64,
    pub request_timeout_secs: u64,
    pub notifications_page_limit: u64,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            auth_header_name: "x-access-token".to_string(),
            token_prefix: "Bearer ".to_string(),
            page_size: 10,
            scroll_threshold_px: 200.0,
            growth_settle_ms: 300,
            request_timeout_secs: 30,
            notifications_page_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    Csv,
    Spreadsheet,
    Pdf,
    Print,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Spreadsheet => "spreadsheet",
            Self::Pdf => "pdf",
            Self::Print => "print",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Spreadsheet => "xls",
            Self::Pdf => "pdf",
            Self::Print => "html",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "spreadsheet" | "excel" | "xls" | "xlsx" => Some(Self::Spreadsheet),
            "pdf" => Some(Self::Pdf),
            "print" | "html" => Some(Self::Print),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub path: String,
    pub format: ExportFormat,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportHistoryEntry {
    pub id: String,
    pub entity: String,
    pub format: ExportFormat,
    pub path: String,
    pub row_count: usize,
    pub created_at: DateTime<Utc>,
}
