use crate::errors::{AppError, AppResult};
use crate::models::{PendingMutation, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    MarkRead,
    MarkAllRead,
    Delete,
    Activate,
    Create,
    Update,
}

/// What the local cache does once the server has acknowledged a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The optimistic patch already reflects the server state.
    LocalPatch,
    RemoveRecord,
    /// The server may have changed other records; re-fetch everything.
    FullResync,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarkRead => "mark-read",
            Self::MarkAllRead => "mark-all-read",
            Self::Delete => "delete",
            Self::Activate => "activate",
            Self::Create => "create",
            Self::Update => "update",
        }
    }

    pub fn is_optimistic(self) -> bool {
        matches!(self, Self::MarkRead | Self::MarkAllRead)
    }

    pub fn requires_confirmation(self) -> bool {
        matches!(self, Self::Delete | Self::Activate)
    }

    pub fn resolution(self) -> Resolution {
        match self {
            Self::MarkRead | Self::MarkAllRead => Resolution::LocalPatch,
            Self::Delete => Resolution::RemoveRecord,
            Self::Activate | Self::Create | Self::Update => Resolution::FullResync,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPrompt {
    pub kind: MutationKind,
    pub target_id: String,
    pub message: String,
}

/// Synchronous modal decision taken before a destructive call is issued.
pub trait Confirmation: Send + Sync {
    fn confirm(&self, prompt: &ConfirmPrompt) -> bool;
}

/// Fixed answer, for scripted flows and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Confirmation for FixedAnswer {
    fn confirm(&self, _prompt: &ConfirmPrompt) -> bool {
        self.0
    }
}

/// Returns a refusal reason when business rules forbid deleting the record.
pub type DeleteGuard = fn(&Record) -> Option<String>;

/// Tracks optimistic changes in flight for one collection. At most one
/// pending change exists per `(target_id, field)`.
#[derive(Debug, Default)]
pub struct MutationCoordinator {
    id_field: String,
    pending: HashMap<(String, String), PendingMutation>,
}

impl MutationCoordinator {
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            pending: HashMap::new(),
        }
    }

    pub fn is_pending(&self, target_id: &str, field: &str) -> bool {
        self.pending.contains_key(&(target_id.to_string(), field.to_string()))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn position(&self, records: &[Record], target_id: &str) -> Option<usize> {
        records
            .iter()
            .position(|record| record.id(&self.id_field).as_deref() == Some(target_id))
    }

    /// Snapshot the current value, apply `new_value`, and register the
    /// change as pending.
    pub fn begin(
        &mut self,
        records: &mut [Record],
        target_id: &str,
        field: &str,
        new_value: Value,
    ) -> AppResult<PendingMutation> {
        let key = (target_id.to_string(), field.to_string());
        if self.pending.contains_key(&key) {
            return Err(AppError::Conflict(format!(
                "A change to '{}' on record {} is still being saved",
                field, target_id
            )));
        }
        let index = self
            .position(records, target_id)
            .ok_or_else(|| AppError::NotFound(format!("Record {} is no longer in the list", target_id)))?;

        let record = &mut records[index];
        let pending = PendingMutation {
            ticket: Uuid::new_v4(),
            target_id: target_id.to_string(),
            field: field.to_string(),
            previous_value: record.get(field).cloned(),
            new_value: new_value.clone(),
        };
        record.set(field, Some(new_value));
        self.pending.insert(key, pending.clone());
        Ok(pending)
    }

    /// Optimistically set `field` on every record whose value differs.
    /// Records with a change already pending on that field are skipped.
    pub fn begin_bulk(&mut self, records: &mut [Record], field: &str, new_value: &Value) -> Vec<PendingMutation> {
        let mut started = Vec::new();
        for record in records.iter_mut() {
            let Some(target_id) = record.id(&self.id_field) else {
                continue;
            };
            if record.get(field) == Some(new_value) {
                continue;
            }
            let key = (target_id.clone(), field.to_string());
            if self.pending.contains_key(&key) {
                continue;
            }
            let pending = PendingMutation {
                ticket: Uuid::new_v4(),
                target_id,
                field: field.to_string(),
                previous_value: record.get(field).cloned(),
                new_value: new_value.clone(),
            };
            record.set(field, Some(new_value.clone()));
            self.pending.insert(key, pending.clone());
            started.push(pending);
        }
        started
    }

    fn release(&mut self, pending: &PendingMutation) -> bool {
        let key = (pending.target_id.clone(), pending.field.clone());
        match self.pending.get(&key) {
            Some(current) if current.ticket == pending.ticket => {
                self.pending.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Server confirmed the change; keep it.
    pub fn commit(&mut self, pending: &PendingMutation) -> bool {
        self.release(pending)
    }

    /// Server rejected the change; put back the captured value. A field that
    /// no longer holds `new_value` (a re-fetch replaced it) is left alone.
    pub fn revert(&mut self, records: &mut [Record], pending: &PendingMutation) -> bool {
        if !self.release(pending) {
            return false;
        }
        let Some(index) = self.position(records, &pending.target_id) else {
            return false;
        };
        let record = &mut records[index];
        if record.get(&pending.field) != Some(&pending.new_value) {
            return false;
        }
        record.set(&pending.field, pending.previous_value.clone());
        true
    }

    /// Pure local precondition check run before any confirmation prompt.
    pub fn check_delete(&self, records: &[Record], target_id: &str, guard: Option<DeleteGuard>) -> AppResult<()> {
        let index = self
            .position(records, target_id)
            .ok_or_else(|| AppError::NotFound(format!("Record {} is no longer in the list", target_id)))?;
        if let Some(reason) = guard.and_then(|guard| guard(&records[index])) {
            return Err(AppError::Precondition(reason));
        }
        Ok(())
    }

    pub fn remove(&mut self, records: &mut Vec<Record>, target_id: &str) -> bool {
        let Some(index) = self.position(records, target_id) else {
            return false;
        };
        records.remove(index);
        self.pending.retain(|(id, _), _| id != target_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{MutationCoordinator, MutationKind, Resolution};
    use crate::errors::AppError;
    use crate::models::Record;
    use serde_json::json;

    fn notifications() -> Vec<Record> {
        vec![
            json!({ "_id": "n1", "title": "Report filed", "isRead": false }),
            json!({ "_id": "n2", "title": "SMS sent", "isRead": true }),
            json!({ "_id": "n3", "title": "Payment due" }),
        ]
        .into_iter()
        .filter_map(Record::from_value)
        .collect()
    }

    #[test]
    fn revert_restores_captured_value() {
        let mut records = notifications();
        let mut coordinator = MutationCoordinator::new("_id");
        let pending = coordinator
            .begin(&mut records, "n1", "isRead", json!(true))
            .expect("begin");
        assert!(records[0].flag("isRead"));
        assert!(coordinator.revert(&mut records, &pending));
        assert_eq!(records[0].get("isRead"), Some(&json!(false)));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn revert_removes_field_that_was_absent() {
        let mut records = notifications();
        let mut coordinator = MutationCoordinator::new("_id");
        let pending = coordinator.begin(&mut records, "n3", "isRead", json!(true)).expect("begin");
        coordinator.revert(&mut records, &pending);
        assert!(records[2].get("isRead").is_none());
    }

    #[test]
    fn second_change_to_same_field_is_rejected_while_pending() {
        let mut records = notifications();
        let mut coordinator = MutationCoordinator::new("_id");
        let pending = coordinator.begin(&mut records, "n1", "isRead", json!(true)).expect("begin");
        let error = coordinator
            .begin(&mut records, "n1", "isRead", json!(true))
            .expect_err("conflict");
        assert!(matches!(error, AppError::Conflict(_)));
        coordinator
            .begin(&mut records, "n1", "isPinned", json!(true))
            .expect("other field is independent");
        assert!(coordinator.commit(&pending));
        assert!(!coordinator.is_pending("n1", "isRead"));
    }

    #[test]
    fn bulk_skips_records_already_in_target_state() {
        let mut records = notifications();
        let mut coordinator = MutationCoordinator::new("_id");
        let started = coordinator.begin_bulk(&mut records, "isRead", &json!(true));
        let targets = started.iter().map(|entry| entry.target_id.as_str()).collect::<Vec<_>>();
        assert_eq!(targets, vec!["n1", "n3"]);
        assert!(records.iter().all(|record| record.flag("isRead")));
        for pending in &started {
            coordinator.revert(&mut records, pending);
        }
        assert_eq!(records[0].get("isRead"), Some(&json!(false)));
        assert!(records[1].flag("isRead"));
    }

    #[test]
    fn guard_refuses_active_record() {
        let records: Vec<Record> = vec![json!({ "id": 1, "isActive": true })]
            .into_iter()
            .filter_map(Record::from_value)
            .collect();
        let coordinator = MutationCoordinator::new("id");
        fn active_guard(record: &Record) -> Option<String> {
            record.flag("isActive").then(|| "active".to_string())
        }
        let error = coordinator
            .check_delete(&records, "1", Some(active_guard))
            .expect_err("refused");
        assert!(matches!(error, AppError::Precondition(_)));
        assert!(coordinator.check_delete(&records, "1", None).is_ok());
    }

    #[test]
    fn resolutions_are_declared_per_kind() {
        assert_eq!(MutationKind::Activate.resolution(), Resolution::FullResync);
        assert_eq!(MutationKind::Delete.resolution(), Resolution::RemoveRecord);
        assert!(MutationKind::MarkRead.is_optimistic());
        assert!(!MutationKind::Delete.is_optimistic());
        assert!(MutationKind::Activate.requires_confirmation());
    }
}
