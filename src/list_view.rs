use crate::client::ConsoleApi;
use crate::entities::EntitySpec;
use crate::errors::{AppError, AppResult};
use crate::filter::filter_records;
use crate::models::{
    ConsoleSettings, FetchQuery, ListSnapshot, LoadState, MutationOutcome, MutationReport, PaginationMeta, Record,
    SortConfig,
};
use crate::mutation::{ConfirmPrompt, Confirmation, MutationCoordinator, MutationKind};
use crate::pagination::{GrowthDecision, PaginationWindow, ProximitySignal};
use crate::sorting::sort_records;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

struct ListState {
    records: Vec<Record>,
    filter: String,
    sort: SortConfig,
    window: PaginationWindow,
    load: LoadState,
    pagination: Option<PaginationMeta>,
    unread_count: Option<u64>,
    current_page: u64,
    fetch_generation: u64,
    mounted: bool,
    mutations: MutationCoordinator,
}

impl ListState {
    fn sorted_view<'a>(&'a self, spec: &EntitySpec) -> Vec<&'a Record> {
        let filtered = filter_records(&self.records, &self.filter, &spec.search_fields);
        sort_records(filtered, &self.sort, &spec.derived_keys)
    }

    fn matched(&self, spec: &EntitySpec) -> usize {
        self.sorted_view(spec).len()
    }

    fn find(&self, id_field: &str, target_id: &str) -> Option<&Record> {
        self.records
            .iter()
            .find(|record| record.id(id_field).as_deref() == Some(target_id))
    }
}

/// One list page: the cached collection and the filter, sort and window
/// derived from it, plus the mutations the page offers. Cloning yields
/// another handle to the same page state.
#[derive(Clone)]
pub struct ListView {
    spec: Arc<EntitySpec>,
    api: Arc<dyn ConsoleApi>,
    state: Arc<Mutex<ListState>>,
    settle_delay: Duration,
    scroll_threshold_px: f64,
    server_page_limit: u64,
}

impl ListView {
    pub fn new(spec: EntitySpec, api: Arc<dyn ConsoleApi>, settings: &ConsoleSettings) -> Self {
        let load = match &spec.unavailable_reason {
            Some(reason) => LoadState::Unavailable { reason: reason.clone() },
            None => LoadState::Idle,
        };
        let state = ListState {
            records: Vec::new(),
            filter: String::new(),
            sort: spec.default_sort.clone(),
            window: PaginationWindow::new(settings.page_size),
            load,
            pagination: None,
            unread_count: None,
            current_page: 1,
            fetch_generation: 0,
            mounted: true,
            mutations: MutationCoordinator::new(spec.id_field),
        };
        Self {
            spec: Arc::new(spec),
            api,
            state: Arc::new(Mutex::new(state)),
            settle_delay: Duration::from_millis(settings.growth_settle_ms),
            scroll_threshold_px: settings.scroll_threshold_px,
            server_page_limit: settings.notifications_page_limit.max(1),
        }
    }

    pub fn spec(&self) -> &EntitySpec {
        &self.spec
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, ListState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("list state mutex poisoned".to_string()))
    }

    /// Fetches the collection and replaces the cache wholesale. On failure
    /// the last good collection is kept. Responses that arrive after a newer
    /// fetch started, or after the page was closed, are dropped.
    pub async fn load(&self) -> AppResult<()> {
        let (generation, query) = {
            let mut state = self.lock()?;
            if let LoadState::Unavailable { reason } = &state.load {
                return Err(AppError::NotFound(reason.clone()));
            }
            state.fetch_generation += 1;
            state.load = LoadState::Loading;
            let query = if self.spec.server_paginated {
                FetchQuery {
                    page: Some(state.current_page),
                    limit: Some(self.server_page_limit),
                }
            } else {
                FetchQuery::default()
            };
            (state.fetch_generation, query)
        };

        let result = self
            .api
            .fetch_collection(&self.spec.route, self.spec.collection_key, query)
            .await;

        let mut state = self.lock()?;
        if !state.mounted || generation != state.fetch_generation {
            tracing::debug!(entity = self.spec.kind.as_str(), generation, "dropping stale collection response");
            return Ok(());
        }

        match result {
            Ok(page) => {
                tracing::debug!(entity = self.spec.kind.as_str(), count = page.records.len(), "collection loaded");
                state.records = page.records;
                if let Some(meta) = &page.pagination {
                    if meta.page > 0 {
                        state.current_page = meta.page;
                    }
                }
                state.pagination = page.pagination;
                state.unread_count = page.unread_count;
                state.load = LoadState::Ready;
                Ok(())
            }
            Err(error) => {
                tracing::warn!(entity = self.spec.kind.as_str(), error = %error, "collection fetch failed");
                state.load = match &error {
                    AppError::Unauthenticated(_) => LoadState::Unauthenticated,
                    other => LoadState::Failed {
                        message: other.user_message(),
                        retryable: true,
                    },
                };
                Err(error)
            }
        }
    }

    pub async fn retry(&self) -> AppResult<()> {
        self.load().await
    }

    /// Server-paged lists only: fetch another page and restart the window.
    pub async fn go_to_page(&self, page: u64) -> AppResult<()> {
        if !self.spec.server_paginated {
            return Err(AppError::Precondition(format!(
                "{} is paged locally",
                self.spec.title
            )));
        }
        {
            let mut state = self.lock()?;
            state.current_page = page.max(1);
            state.window.reset();
        }
        self.load().await
    }

    /// Returns `true` when the query changed, which restarts the window.
    pub fn set_filter(&self, query: &str) -> AppResult<bool> {
        let mut state = self.lock()?;
        if state.filter == query {
            return Ok(false);
        }
        state.filter = query.to_string();
        state.window.reset();
        Ok(true)
    }

    /// Header click on `key`. The window size is kept.
    pub fn toggle_sort(&self, key: &str) -> AppResult<SortConfig> {
        let mut state = self.lock()?;
        state.sort = state.sort.toggled(key);
        Ok(state.sort.clone())
    }

    pub fn set_sort(&self, sort: SortConfig) -> AppResult<()> {
        self.lock()?.sort = sort;
        Ok(())
    }

    /// Reads the proximity signal immediately and then settles any growth.
    pub fn on_proximity(
        &self,
        signal: &dyn ProximitySignal,
    ) -> impl Future<Output = AppResult<GrowthDecision>> + Send + '_ {
        let near_end = signal.near_end(self.scroll_threshold_px);
        self.on_scroll(near_end)
    }

    /// Grows the window by one page when the user is near the end. Requests
    /// arriving while a previous one is still settling are rejected.
    pub async fn on_scroll(&self, near_end: bool) -> AppResult<GrowthDecision> {
        if !near_end {
            return Ok(GrowthDecision::NotNearEnd);
        }
        let ticket = {
            let mut state = self.lock()?;
            let total = state.matched(&self.spec);
            match state.window.try_begin_growth(total) {
                Ok(ticket) => ticket,
                Err(decision) => return Ok(decision),
            }
        };

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let mut state = self.lock()?;
        let total = state.matched(&self.spec);
        Ok(state.window.complete_growth(ticket, total))
    }

    pub fn snapshot(&self) -> AppResult<ListSnapshot> {
        let state = self.lock()?;
        let view = state.sorted_view(&self.spec);
        let matched = view.len();
        let rows = state.window.visible(&view).iter().map(|record| (*record).clone()).collect();
        Ok(ListSnapshot {
            rows,
            matched,
            total: state.records.len(),
            window_size: state.window.window_size(matched),
            has_more: state.window.has_more(matched),
            filter: state.filter.clone(),
            sort: state.sort.clone(),
            load: state.load.clone(),
            pagination: state.pagination.clone(),
            unread_count: state.unread_count,
        })
    }

    /// The full filtered and sorted view, ignoring the window.
    pub fn export_rows(&self) -> AppResult<Vec<Record>> {
        let state = self.lock()?;
        Ok(state
            .sorted_view(&self.spec)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn record(&self, target_id: &str) -> AppResult<Option<Record>> {
        Ok(self.lock()?.find(self.spec.id_field, target_id).cloned())
    }

    /// The page was navigated away from. Late responses become no-ops.
    pub fn unmount(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.mounted = false;
        }
    }

    fn read_field(&self) -> AppResult<&'static str> {
        self.spec
            .read_field
            .ok_or_else(|| AppError::Precondition(format!("{} has no read state", self.spec.title)))
    }

    /// Optimistic: the row shows as read at once and is reverted if the
    /// server rejects the change.
    pub async fn mark_read(&self, target_id: &str) -> AppResult<MutationReport> {
        let field = self.read_field()?;
        let request = self.spec.request_for(MutationKind::MarkRead, Some(target_id), None)?;

        let (pending, counted) = {
            let mut state = self.lock()?;
            // An unsettled optimistic value does not mean the record is read.
            if state.mutations.is_pending(target_id, field) {
                return Err(AppError::Conflict(format!(
                    "A change to '{}' on record {} is still being saved",
                    field, target_id
                )));
            }
            let already_read = state
                .find(self.spec.id_field, target_id)
                .ok_or_else(|| AppError::NotFound(format!("Record {} is no longer in the list", target_id)))?
                .flag(field);
            if already_read {
                return Ok(MutationReport {
                    outcome: MutationOutcome::LocalPatch,
                    message: None,
                });
            }
            let state = &mut *state;
            let pending = state.mutations.begin(&mut state.records, target_id, field, json!(true))?;
            let counted = match state.unread_count {
                Some(count) if count > 0 => {
                    state.unread_count = Some(count - 1);
                    true
                }
                _ => false,
            };
            (pending, counted)
        };

        let result = self.api.mutate(&request).await;

        let mut state = self.lock()?;
        if !state.mounted {
            tracing::debug!(entity = self.spec.kind.as_str(), record_id = %target_id, "settled after unmount");
            return result.map(|ack| MutationReport {
                outcome: MutationOutcome::LocalPatch,
                message: ack.message,
            });
        }
        let state = &mut *state;
        match result {
            Ok(ack) => {
                state.mutations.commit(&pending);
                Ok(MutationReport {
                    outcome: MutationOutcome::LocalPatch,
                    message: ack.message,
                })
            }
            Err(error) => {
                let reverted = state.mutations.revert(&mut state.records, &pending);
                if reverted && counted {
                    state.unread_count = state.unread_count.map(|count| count + 1);
                }
                tracing::warn!(
                    entity = self.spec.kind.as_str(),
                    record_id = %target_id,
                    field,
                    error = %error,
                    "mark-as-read rejected; reverted"
                );
                Err(error)
            }
        }
    }

    /// Optimistic bulk update. Every record changed locally gets its own
    /// captured prior value, so a failure restores exactly what was there.
    pub async fn mark_all_read(&self) -> AppResult<MutationReport> {
        let field = self.read_field()?;
        let request = self.spec.request_for(MutationKind::MarkAllRead, None, None)?;

        let (started, previous_unread) = {
            let mut state = self.lock()?;
            let state = &mut *state;
            let started = state.mutations.begin_bulk(&mut state.records, field, &Value::Bool(true));
            let previous_unread = state.unread_count;
            if previous_unread.is_some() {
                state.unread_count = Some(0);
            }
            (started, previous_unread)
        };

        let result = self.api.mutate(&request).await;

        let mut state = self.lock()?;
        if !state.mounted {
            return result.map(|ack| MutationReport {
                outcome: MutationOutcome::LocalPatch,
                message: ack.message,
            });
        }
        let state = &mut *state;
        match result {
            Ok(ack) => {
                for pending in &started {
                    state.mutations.commit(pending);
                }
                tracing::info!(entity = self.spec.kind.as_str(), count = started.len(), "marked all as read");
                Ok(MutationReport {
                    outcome: MutationOutcome::LocalPatch,
                    message: ack.message,
                })
            }
            Err(error) => {
                for pending in &started {
                    state.mutations.revert(&mut state.records, pending);
                }
                state.unread_count = previous_unread;
                tracing::warn!(entity = self.spec.kind.as_str(), error = %error, "mark-all-as-read rejected; reverted");
                Err(error)
            }
        }
    }

    fn prompt(&self, kind: MutationKind, target_id: &str) -> AppResult<ConfirmPrompt> {
        let state = self.lock()?;
        let record = state
            .find(self.spec.id_field, target_id)
            .ok_or_else(|| AppError::NotFound(format!("Record {} is no longer in the list", target_id)))?;
        Ok(ConfirmPrompt {
            kind,
            target_id: target_id.to_string(),
            message: self.spec.confirm_message(kind, record),
        })
    }

    /// Pessimistic: guard, confirm, call, and only then drop the row.
    pub async fn delete(&self, target_id: &str, confirmation: &dyn Confirmation) -> AppResult<MutationReport> {
        let request = self.spec.request_for(MutationKind::Delete, Some(target_id), None)?;
        {
            let state = self.lock()?;
            state
                .mutations
                .check_delete(&state.records, target_id, self.spec.delete_guard)?;
        }
        let prompt = self.prompt(MutationKind::Delete, target_id)?;
        if !confirmation.confirm(&prompt) {
            return Ok(MutationReport {
                outcome: MutationOutcome::Declined,
                message: None,
            });
        }

        let ack = self.api.mutate(&request).await.map_err(|error| {
            tracing::warn!(entity = self.spec.kind.as_str(), record_id = %target_id, error = %error, "delete failed");
            error
        })?;

        let mut state = self.lock()?;
        if state.mounted {
            let state = &mut *state;
            let was_unread = self
                .spec
                .read_field
                .and_then(|field| state.find(self.spec.id_field, target_id).map(|record| !record.flag(field)))
                .unwrap_or(false);
            if state.mutations.remove(&mut state.records, target_id) && was_unread {
                state.unread_count = state.unread_count.map(|count| count.saturating_sub(1));
            }
        }
        tracing::info!(entity = self.spec.kind.as_str(), record_id = %target_id, "record deleted");
        Ok(MutationReport {
            outcome: MutationOutcome::Removed {
                target_id: target_id.to_string(),
            },
            message: ack.message,
        })
    }

    /// Exclusive activation. Other records' flags are whatever the server
    /// says after the re-fetch; nothing is flipped locally.
    pub async fn activate(&self, target_id: &str, confirmation: &dyn Confirmation) -> AppResult<MutationReport> {
        let request = self.spec.request_for(MutationKind::Activate, Some(target_id), None)?;
        let prompt = self.prompt(MutationKind::Activate, target_id)?;
        if !confirmation.confirm(&prompt) {
            return Ok(MutationReport {
                outcome: MutationOutcome::Declined,
                message: None,
            });
        }
        self.resyncing(MutationKind::Activate, target_id, request).await
    }

    pub async fn create(&self, body: Value) -> AppResult<MutationReport> {
        let request = self.spec.request_for(MutationKind::Create, None, Some(body))?;
        self.resyncing(MutationKind::Create, "", request).await
    }

    pub async fn update(&self, target_id: &str, body: Value) -> AppResult<MutationReport> {
        let request = self.spec.request_for(MutationKind::Update, Some(target_id), Some(body))?;
        self.resyncing(MutationKind::Update, target_id, request).await
    }

    async fn resyncing(
        &self,
        kind: MutationKind,
        target_id: &str,
        request: crate::models::MutationRequest,
    ) -> AppResult<MutationReport> {
        let ack = self.api.mutate(&request).await.map_err(|error| {
            tracing::warn!(
                entity = self.spec.kind.as_str(),
                record_id = %target_id,
                mutation = kind.as_str(),
                error = %error,
                "mutation failed"
            );
            error
        })?;
        tracing::info!(entity = self.spec.kind.as_str(), record_id = %target_id, mutation = kind.as_str(), "mutation applied");

        let mounted = self.lock()?.mounted;
        if mounted {
            if let Err(error) = self.load().await {
                // The mutation itself succeeded; the failed refresh is
                // visible through the load state and its retry action.
                tracing::warn!(entity = self.spec.kind.as_str(), error = %error, "resync after mutation failed");
            }
        }
        Ok(MutationReport {
            outcome: MutationOutcome::RequiresResync,
            message: ack.message,
        })
    }
}
