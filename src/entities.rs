use crate::errors::{AppError, AppResult};
use crate::filter::value_text;
use crate::models::{HttpMethod, MutationRequest, Record, SortConfig, SortDirection};
use crate::mutation::{DeleteGuard, MutationKind};
use crate::sorting::DerivedKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    DocumentSettings,
    AuditLogs,
    Departments,
    Employees,
    AccidentReports,
    Notifications,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DocumentSettings => "document-settings",
            Self::AuditLogs => "audit-logs",
            Self::Departments => "departments",
            Self::Employees => "employees",
            Self::AccidentReports => "accident-reports",
            Self::Notifications => "notifications",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportColumn {
    pub key: &'static str,
    pub label: &'static str,
}

const fn column(key: &'static str, label: &'static str) -> ExportColumn {
    ExportColumn { key, label }
}

/// Everything a list page needs to know about one entity: where it lives,
/// how rows are identified, searched, sorted and exported, and which
/// mutations the page offers.
#[derive(Debug, Clone)]
pub struct EntitySpec {
    pub kind: EntityKind,
    pub title: String,
    pub route: String,
    pub collection_key: &'static str,
    pub id_field: &'static str,
    pub search_fields: Vec<&'static str>,
    pub columns: Vec<ExportColumn>,
    pub derived_keys: Vec<DerivedKey>,
    pub default_sort: SortConfig,
    pub delete_guard: Option<DeleteGuard>,
    pub mutations: Vec<MutationKind>,
    pub server_paginated: bool,
    pub read_field: Option<&'static str>,
    /// Set when the page cannot be shown at all, e.g. a missing route
    /// parameter. The list renders a not-found state instead of loading.
    pub unavailable_reason: Option<String>,
}

fn refuse_active_document(record: &Record) -> Option<String> {
    record
        .flag("isActive")
        .then(|| "The active document setting cannot be deleted. Activate another one first.".to_string())
}

fn refuse_staffed_department(record: &Record) -> Option<String> {
    let staffed = department_employee_count(record)
        .and_then(|value| value.as_u64())
        .unwrap_or(0);
    (staffed > 0).then(|| format!("This department still has {} employee(s) assigned.", staffed))
}

fn department_employee_count(record: &Record) -> Option<Value> {
    match record.get("employees") {
        Some(Value::Array(items)) => Some(json!(items.len())),
        _ => record.get("employeeCount").cloned(),
    }
}

fn required_id(target_id: Option<&str>) -> AppResult<&str> {
    target_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::NotFound("Missing record id".to_string()))
}

impl EntitySpec {
    pub fn document_settings() -> Self {
        Self {
            kind: EntityKind::DocumentSettings,
            title: "Document Settings".to_string(),
            route: "/document-settings".to_string(),
            collection_key: "documentSettings",
            id_field: "id",
            search_fields: vec!["name", "companyName", "headerText", "footerText"],
            columns: vec![
                column("name", "Name"),
                column("companyName", "Company"),
                column("isActive", "Active"),
                column("createdAt", "Created At"),
            ],
            derived_keys: Vec::new(),
            default_sort: SortConfig::by("createdAt", SortDirection::Descending),
            delete_guard: Some(refuse_active_document),
            mutations: vec![
                MutationKind::Create,
                MutationKind::Update,
                MutationKind::Activate,
                MutationKind::Delete,
            ],
            server_paginated: false,
            read_field: None,
            unavailable_reason: None,
        }
    }

    pub fn audit_logs() -> Self {
        Self {
            kind: EntityKind::AuditLogs,
            title: "Audit Log".to_string(),
            route: "/audit-logs".to_string(),
            collection_key: "logs",
            id_field: "id",
            search_fields: vec!["action", "entity", "description", "user.name", "ipAddress"],
            columns: vec![
                column("createdAt", "Date"),
                column("user.name", "User"),
                column("action", "Action"),
                column("entity", "Entity"),
                column("description", "Description"),
                column("ipAddress", "IP Address"),
            ],
            derived_keys: Vec::new(),
            default_sort: SortConfig::by("createdAt", SortDirection::Descending),
            delete_guard: None,
            mutations: Vec::new(),
            server_paginated: false,
            read_field: None,
            unavailable_reason: None,
        }
    }

    pub fn departments() -> Self {
        Self {
            kind: EntityKind::Departments,
            title: "Departments".to_string(),
            route: "/departments".to_string(),
            collection_key: "departments",
            id_field: "id",
            search_fields: vec!["name", "description", "headOfEmployee.name"],
            columns: vec![
                column("name", "Department"),
                column("headOfEmployee.name", "Head of Department"),
                column("employeeCount", "Employees"),
                column("createdAt", "Created At"),
            ],
            derived_keys: vec![DerivedKey {
                name: "employeeCount",
                derive: department_employee_count,
            }],
            default_sort: SortConfig::default(),
            delete_guard: Some(refuse_staffed_department),
            mutations: vec![MutationKind::Create, MutationKind::Update, MutationKind::Delete],
            server_paginated: false,
            read_field: None,
            unavailable_reason: None,
        }
    }

    pub fn employees() -> Self {
        Self {
            kind: EntityKind::Employees,
            title: "Employees".to_string(),
            route: "/employees".to_string(),
            collection_key: "employees",
            id_field: "id",
            search_fields: vec!["name", "email", "phone", "jobTitle", "department.name"],
            columns: vec![
                column("name", "Name"),
                column("email", "Email"),
                column("phone", "Phone"),
                column("jobTitle", "Job Title"),
                column("department.name", "Department"),
            ],
            derived_keys: Vec::new(),
            default_sort: SortConfig::by("name", SortDirection::Ascending),
            delete_guard: None,
            mutations: vec![MutationKind::Create, MutationKind::Update, MutationKind::Delete],
            server_paginated: false,
            read_field: None,
            unavailable_reason: None,
        }
    }

    /// Accident reports are scoped to one insurer partner, e.g. `mashreq`.
    pub fn accident_reports(partner: &str) -> Self {
        let partner = partner.trim().to_ascii_lowercase();
        let valid = !partner.is_empty()
            && partner
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        let mut title = partner.clone();
        if let Some(first) = title.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        Self {
            kind: EntityKind::AccidentReports,
            title: format!("{} Accident Reports", title).trim_start().to_string(),
            route: format!("/accident-reports/{}", partner),
            collection_key: "reports",
            id_field: "id",
            search_fields: vec!["reportNumber", "driverName", "plateNumber", "policyNumber", "location", "status"],
            columns: vec![
                column("reportNumber", "Report No."),
                column("driverName", "Driver"),
                column("plateNumber", "Plate"),
                column("policyNumber", "Policy"),
                column("status", "Status"),
                column("createdAt", "Submitted At"),
            ],
            derived_keys: Vec::new(),
            default_sort: SortConfig::by("createdAt", SortDirection::Descending),
            delete_guard: None,
            mutations: vec![MutationKind::Update, MutationKind::Delete],
            server_paginated: false,
            read_field: None,
            unavailable_reason: (!valid).then(|| format!("Unknown insurance partner '{}'", partner)),
        }
    }

    pub fn notifications() -> Self {
        Self {
            kind: EntityKind::Notifications,
            title: "Notifications".to_string(),
            route: "/notifications".to_string(),
            collection_key: "notifications",
            id_field: "_id",
            search_fields: vec!["title", "message", "type"],
            columns: vec![
                column("title", "Title"),
                column("message", "Message"),
                column("type", "Type"),
                column("isRead", "Read"),
                column("createdAt", "Received At"),
            ],
            derived_keys: Vec::new(),
            default_sort: SortConfig::default(),
            delete_guard: None,
            mutations: vec![MutationKind::MarkRead, MutationKind::MarkAllRead, MutationKind::Delete],
            server_paginated: true,
            read_field: Some("isRead"),
            unavailable_reason: None,
        }
    }

    pub fn supports(&self, kind: MutationKind) -> bool {
        self.mutations.contains(&kind)
    }

    /// Endpoint for a mutation on this entity.
    pub fn request_for(&self, kind: MutationKind, target_id: Option<&str>, body: Option<Value>) -> AppResult<MutationRequest> {
        if !self.supports(kind) {
            return Err(AppError::Precondition(format!(
                "{} does not support {}",
                self.title,
                kind.as_str()
            )));
        }
        let target = || required_id(target_id);
        let request = match kind {
            MutationKind::MarkRead => MutationRequest::new(HttpMethod::Patch, format!("{}/{}/read", self.route, target()?)),
            MutationKind::MarkAllRead => MutationRequest::new(HttpMethod::Patch, format!("{}/read-all", self.route)),
            MutationKind::Delete => MutationRequest::new(HttpMethod::Delete, format!("{}/{}", self.route, target()?)),
            MutationKind::Activate => {
                MutationRequest::new(HttpMethod::Patch, format!("{}/{}/activate", self.route, target()?))
            }
            MutationKind::Create => MutationRequest::new(HttpMethod::Post, self.route.clone()),
            MutationKind::Update => MutationRequest::new(HttpMethod::Put, format!("{}/{}", self.route, target()?)),
        };
        Ok(match body {
            Some(body) => request.with_body(body),
            None => request,
        })
    }

    pub fn confirm_message(&self, kind: MutationKind, record: &Record) -> String {
        let label = self
            .columns
            .first()
            .and_then(|column| record.lookup(column.key))
            .map(value_text)
            .filter(|text| !text.is_empty())
            .or_else(|| record.id(self.id_field))
            .unwrap_or_default();
        match kind {
            MutationKind::Delete => format!("Delete \"{}\"? This cannot be undone.", label),
            MutationKind::Activate => format!(
                "Activate \"{}\"? The currently active entry will be deactivated.",
                label
            ),
            other => format!("Apply {} to \"{}\"?", other.as_str(), label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EntitySpec;
    use crate::models::{HttpMethod, Record};
    use crate::mutation::MutationKind;
    use serde_json::json;

    #[test]
    fn partner_reports_are_route_scoped() {
        let spec = EntitySpec::accident_reports("Mashreq");
        assert_eq!(spec.route, "/accident-reports/mashreq");
        assert_eq!(spec.title, "Mashreq Accident Reports");
        assert!(spec.unavailable_reason.is_none());
        assert!(EntitySpec::accident_reports(" ").unavailable_reason.is_some());
        assert!(EntitySpec::accident_reports("../admin").unavailable_reason.is_some());
    }

    #[test]
    fn requests_follow_entity_routes() {
        let notifications = EntitySpec::notifications();
        let read = notifications
            .request_for(MutationKind::MarkRead, Some("n1"), None)
            .expect("mark read");
        assert_eq!(read.method, HttpMethod::Patch);
        assert_eq!(read.path, "/notifications/n1/read");

        let documents = EntitySpec::document_settings();
        let activate = documents
            .request_for(MutationKind::Activate, Some("7"), None)
            .expect("activate");
        assert_eq!(activate.path, "/document-settings/7/activate");
        assert!(documents.request_for(MutationKind::MarkRead, Some("7"), None).is_err());
        assert!(documents.request_for(MutationKind::Delete, None, None).is_err());
    }

    #[test]
    fn delete_guards_reflect_business_rules() {
        let documents = EntitySpec::document_settings();
        let guard = documents.delete_guard.expect("document guard");
        let active = Record::from_value(json!({ "id": 1, "isActive": true })).expect("record");
        let inactive = Record::from_value(json!({ "id": 2, "isActive": false })).expect("record");
        assert!(guard(&active).is_some());
        assert!(guard(&inactive).is_none());

        let departments = EntitySpec::departments();
        let guard = departments.delete_guard.expect("department guard");
        let staffed = Record::from_value(json!({ "id": 3, "employees": [{ "id": 1 }] })).expect("record");
        let empty = Record::from_value(json!({ "id": 4, "employees": [] })).expect("record");
        assert!(guard(&staffed).is_some());
        assert!(guard(&empty).is_none());
    }

    #[test]
    fn confirm_message_names_the_record() {
        let documents = EntitySpec::document_settings();
        let record = Record::from_value(json!({ "id": 1, "name": "Main letterhead" })).expect("record");
        let message = documents.confirm_message(MutationKind::Delete, &record);
        assert!(message.contains("Main letterhead"));
    }
}
