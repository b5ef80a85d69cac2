//! ClaimsViewModel – owns the claims working set and mediates every read and write of it.
//!
//! ## Reconciliation rules
//! * A list load replaces the whole working set in one step. Every load takes a generation
//!   token when it starts and is applied only if no later-started load has been applied yet, so
//!   a slow load can never overwrite the result of a load started after it. A load that never
//!   completes does not hold back the ones started before it.
//! * Row operations (`refresh_claim`, `retry_claim`) touch exactly one claim, located by id.
//!   A row that is absent from the working set is skipped silently. A status response is
//!   discarded if a full load was applied while it was in flight.
//! * Each row carries at most one operation at a time, tracked in a keyed busy map.
//! * Failures never escape an operation: they are stored (list loads) and/or broadcast as
//!   transient notifications.
//!
//! Readers always get owned copies; nothing hands out a reference into the working set.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    api::ClaimsApi,
    config::ClaimsQueueConfig,
    export::{CsvDialect, export_csv_with},
    models::{BucketFilter, Claim, RawClaim, StatusCounts},
    query::{filter_claims, status_counts},
};

const NOTIFICATION_CAPACITY: usize = 64;

/// Operation currently holding a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowActivity {
    Refreshing,
    Retrying,
}

impl RowActivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowActivity::Refreshing => "refreshing",
            RowActivity::Retrying => "retrying",
        }
    }
}

impl fmt::Display for RowActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a row-level operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// The claim was updated in place; carries the new value
    Updated(Claim),
    /// No claim with that id is in the working set
    NotFound,
    /// Another operation already holds the row
    Busy(RowActivity),
    /// The API call failed; the working set is unchanged
    Failed(String),
    /// A full load replaced the working set while the status request was in flight
    Stale,
}

/// Result of a list load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied { count: usize },
    Failed(String),
    /// A load started after this one was applied first; this response was discarded
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

/// Transient, toast-style message for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub claim_id: Option<String>,
}

/// Consistent read of the queue for one render.
#[derive(Debug, Clone, Serialize)]
pub struct QueueView {
    pub claims: Vec<Claim>,
    pub counts: StatusCounts,
    pub loading: bool,
    pub error: Option<String>,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub auto_refresh: bool,
}

#[derive(Debug, Default)]
struct WorkingSet {
    claims: Vec<Claim>,
    load_error: Option<String>,
    last_refreshed: Option<DateTime<Utc>>,
    /// Token of the last load whose result (claims or error) was applied
    applied_generation: u64,
}

pub struct ClaimsViewModel {
    api: Arc<dyn ClaimsApi>,
    config: ClaimsQueueConfig,
    state: RwLock<WorkingSet>,
    load_generation: AtomicU64,
    loads_in_flight: AtomicUsize,
    busy_rows: DashMap<String, RowActivity>,
    notifications: broadcast::Sender<Notification>,
    auto_refresh: Mutex<Option<JoinHandle<()>>>,
}

impl ClaimsViewModel {
    pub fn new(api: Arc<dyn ClaimsApi>, config: ClaimsQueueConfig) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            api,
            config,
            state: RwLock::new(WorkingSet::default()),
            load_generation: AtomicU64::new(0),
            loads_in_flight: AtomicUsize::new(0),
            busy_rows: DashMap::new(),
            notifications,
            auto_refresh: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClaimsQueueConfig {
        &self.config
    }

    /// Fetch the first page of claims and replace the working set with it.
    ///
    /// A `silent` load (auto-refresh) leaves the loading indicator untouched; otherwise the
    /// effects are the same.
    pub async fn load_claims(&self, silent: bool) -> LoadOutcome {
        let token = self.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _loading = (!silent).then(|| LoadingGuard::enter(&self.loads_in_flight));
        debug!(token, silent, "Loading claims");

        let result = self
            .api
            .list_claims(self.config.page_size, self.config.page)
            .await;

        let mut state = self.write_state();
        if token <= state.applied_generation {
            debug!(token, applied = state.applied_generation, "Discarding stale claims response");
            return LoadOutcome::Stale;
        }
        state.applied_generation = token;

        match result {
            Ok(raw) => {
                let claims = map_claims(raw);
                let count = claims.len();
                state.claims = claims;
                state.load_error = None;
                state.last_refreshed = Some(Utc::now());
                drop(state);

                info!(token, count, silent, "Claims loaded");
                LoadOutcome::Applied { count }
            }
            Err(e) => {
                let message = e.user_message();
                state.claims.clear();
                state.load_error = Some(message.clone());
                drop(state);

                error!(token, error = %e, "Failed to load claims");
                self.notify(NotificationLevel::Error, message.clone(), None);
                LoadOutcome::Failed(message)
            }
        }
    }

    /// Pull the live status of one claim and merge it into the working set.
    pub async fn refresh_claim(&self, claim_id: &str) -> RowOutcome {
        if !self.contains(claim_id) {
            debug!(claim_id = %claim_id, "Refresh skipped, claim not in working set");
            return RowOutcome::NotFound;
        }
        let _row = match self.acquire_row(claim_id, RowActivity::Refreshing) {
            Ok(guard) => guard,
            Err(activity) => return RowOutcome::Busy(activity),
        };

        self.refresh_row(claim_id).await
    }

    /// Resubmit a claim, then refresh its status.
    ///
    /// Callers should only offer this for claims whose status is `failed` or `rejected`
    /// (see [`Claim::is_retryable`]); the precondition is not re-checked here.
    pub async fn retry_claim(&self, claim_id: &str) -> RowOutcome {
        if !self.contains(claim_id) {
            debug!(claim_id = %claim_id, "Retry skipped, claim not in working set");
            return RowOutcome::NotFound;
        }
        let row = match self.acquire_row(claim_id, RowActivity::Retrying) {
            Ok(guard) => guard,
            Err(activity) => return RowOutcome::Busy(activity),
        };

        if let Err(e) = self.api.retry_claim(claim_id).await {
            error!(claim_id = %claim_id, error = %e, "Claim retry failed");
            let message = e.user_message();
            self.notify(
                NotificationLevel::Error,
                format!("Retry failed for {}: {}", claim_id, message),
                Some(claim_id),
            );
            return RowOutcome::Failed(message);
        }

        info!(claim_id = %claim_id, "Claim retry submitted");
        self.notify(
            NotificationLevel::Success,
            format!("Retry submitted for {}", claim_id),
            Some(claim_id),
        );

        row.switch_to(RowActivity::Refreshing);
        self.refresh_row(claim_id).await
    }

    async fn refresh_row(&self, claim_id: &str) -> RowOutcome {
        let generation = self.read_state().applied_generation;
        let update = match self.api.claim_status(claim_id).await {
            Ok(update) => update,
            Err(e) => {
                warn!(claim_id = %claim_id, error = %e, "Claim status refresh failed");
                let message = e.user_message();
                self.notify(
                    NotificationLevel::Error,
                    format!("Could not refresh {}: {}", claim_id, message),
                    Some(claim_id),
                );
                return RowOutcome::Failed(message);
            }
        };

        let outcome = {
            let mut state = self.write_state();
            let current = state.applied_generation;
            let outcome = match state.claims.iter_mut().find(|c| c.id == claim_id) {
                None => RowOutcome::NotFound,
                Some(_) if current != generation => RowOutcome::Stale,
                Some(claim) => {
                    claim.apply_status(update);
                    RowOutcome::Updated(claim.clone())
                }
            };
            outcome
        };

        match &outcome {
            RowOutcome::Updated(updated) => {
                debug!(claim_id = %claim_id, status = %updated.status, bucket = %updated.bucket, "Claim refreshed");
            }
            RowOutcome::NotFound => {
                debug!(claim_id = %claim_id, "Claim left the working set during refresh");
                self.notify(
                    NotificationLevel::Info,
                    format!("{} left the queue before its status arrived", claim_id),
                    Some(claim_id),
                );
            }
            RowOutcome::Stale => {
                debug!(claim_id = %claim_id, generation, "Discarding status fetched before a reload");
                self.notify(
                    NotificationLevel::Info,
                    format!("Queue reloaded while refreshing {}, status update discarded", claim_id),
                    Some(claim_id),
                );
            }
            RowOutcome::Busy(_) | RowOutcome::Failed(_) => {}
        }
        outcome
    }

    /// Owned copy of the whole working set, in API order.
    pub fn claims(&self) -> Vec<Claim> {
        self.read_state().claims.clone()
    }

    pub fn claim(&self, claim_id: &str) -> Option<Claim> {
        self.read_state()
            .claims
            .iter()
            .find(|c| c.id == claim_id)
            .cloned()
    }

    pub fn filtered_claims(&self, filter: BucketFilter, query: &str) -> Vec<Claim> {
        filter_claims(&self.read_state().claims, filter, query)
    }

    /// Bucket counts over the unfiltered working set.
    pub fn status_counts(&self) -> StatusCounts {
        status_counts(&self.read_state().claims)
    }

    pub fn view(&self, filter: BucketFilter, query: &str) -> QueueView {
        let state = self.read_state();
        QueueView {
            claims: filter_claims(&state.claims, filter, query),
            counts: status_counts(&state.claims),
            loading: self.is_loading(),
            error: state.load_error.clone(),
            last_refreshed: state.last_refreshed,
            auto_refresh: self.is_auto_refresh_enabled(),
        }
    }

    pub fn export_csv(&self, filter: BucketFilter, query: &str, dialect: CsvDialect) -> String {
        export_csv_with(&self.filtered_claims(filter, query), dialect)
    }

    pub fn receipt_url(&self, claim_id: &str) -> String {
        self.api.receipt_url(claim_id)
    }

    pub fn is_loading(&self) -> bool {
        self.loads_in_flight.load(Ordering::SeqCst) > 0
    }

    /// Error of the last applied load, kept until a load succeeds.
    pub fn load_error(&self) -> Option<String> {
        self.read_state().load_error.clone()
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.read_state().last_refreshed
    }

    pub fn row_activity(&self, claim_id: &str) -> Option<RowActivity> {
        self.busy_rows.get(claim_id).map(|entry| *entry)
    }

    pub fn is_row_busy(&self, claim_id: &str) -> bool {
        self.busy_rows.contains_key(claim_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Start the silent periodic reload. Must be called from within a tokio runtime.
    ///
    /// The first reload fires one full interval after this call; calling it again restarts
    /// the schedule.
    pub fn start_auto_refresh(self: &Arc<Self>) {
        let period = self.config.auto_refresh_interval;
        let first_tick = Instant::now() + period;
        let view_model = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(view_model) = view_model.upgrade() else {
                    break;
                };
                // the load runs on its own task so stopping the timer never cancels it
                tokio::spawn(async move {
                    view_model.load_claims(true).await;
                });
            }
        });

        let previous = self
            .auto_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(interval_secs = period.as_secs_f64(), "Auto-refresh enabled");
    }

    /// Cancel the pending auto-refresh timer. Loads already sent still complete.
    pub fn stop_auto_refresh(&self) {
        let handle = self
            .auto_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Auto-refresh disabled");
        }
    }

    pub fn is_auto_refresh_enabled(&self) -> bool {
        self.auto_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn contains(&self, claim_id: &str) -> bool {
        self.read_state().claims.iter().any(|c| c.id == claim_id)
    }

    fn acquire_row(
        &self,
        claim_id: &str,
        activity: RowActivity,
    ) -> Result<RowGuard<'_>, RowActivity> {
        match self.busy_rows.entry(claim_id.to_string()) {
            Entry::Occupied(entry) => {
                debug!(claim_id = %claim_id, current = ?entry.get(), "Row busy");
                Err(*entry.get())
            }
            Entry::Vacant(entry) => {
                entry.insert(activity);
                Ok(RowGuard {
                    rows: &self.busy_rows,
                    claim_id: claim_id.to_string(),
                })
            }
        }
    }

    fn notify(&self, level: NotificationLevel, message: String, claim_id: Option<&str>) {
        // no subscribers is fine
        let _ = self.notifications.send(Notification {
            level,
            message,
            claim_id: claim_id.map(str::to_string),
        });
    }

    fn read_state(&self) -> RwLockReadGuard<'_, WorkingSet> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, WorkingSet> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ClaimsViewModel {
    fn drop(&mut self) {
        let handle = self
            .auto_refresh
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Map API records into claims, keeping the first occurrence of each id.
fn map_claims(raw: Vec<RawClaim>) -> Vec<Claim> {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut claims = Vec::with_capacity(raw.len());
    for record in raw {
        let Some(claim) = Claim::from_raw(record) else {
            warn!("Skipping claim record without a claim id");
            continue;
        };
        if !seen.insert(claim.id.clone()) {
            warn!(claim_id = %claim.id, "Skipping duplicate claim record");
            continue;
        }
        claims.push(claim);
    }
    claims
}

/// Marks a row busy until dropped.
struct RowGuard<'a> {
    rows: &'a DashMap<String, RowActivity>,
    claim_id: String,
}

impl RowGuard<'_> {
    fn switch_to(&self, activity: RowActivity) {
        if let Some(mut entry) = self.rows.get_mut(&self.claim_id) {
            *entry = activity;
        }
    }
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        self.rows.remove(&self.claim_id);
    }
}

struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Endpoint, InMemoryClaimsApi};
    use crate::error::{ClaimsError, Result};
    use crate::models::{Bucket, ClaimStatusUpdate, Priority, RawProgress};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn raw(id: &str, patient: &str, status: &str, percentage: f64, amount: f64) -> RawClaim {
        serde_json::from_value(json!({
            "claimId": id,
            "patientName": patient,
            "patientId": format!("P-{}", id),
            "facilityId": "FAC-1",
            "status": status,
            "progress": { "percentage": percentage, "currentStage": null },
            "totalAmount": amount,
        }))
        .unwrap()
    }

    fn seed() -> Vec<RawClaim> {
        vec![
            raw("CLM-1", "Ahmed Al-Rashid", "failed", 100.0, 500.0),
            raw("CLM-2", "Sara Haddad", "processing", 10.0, 120.0),
            raw("CLM-3", "Omar Khalil", "approved", 100.0, 75.0),
            raw("CLM-4", "Lina Nasser", "processing", 60.0, 40.0),
        ]
    }

    fn view_model(api: Arc<dyn ClaimsApi>) -> Arc<ClaimsViewModel> {
        Arc::new(ClaimsViewModel::new(api, ClaimsQueueConfig::default()))
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn load_replaces_working_set() {
        let api = Arc::new(InMemoryClaimsApi::with_claims(seed()));
        let vm = view_model(api.clone());

        assert_eq!(vm.load_claims(false).await, LoadOutcome::Applied { count: 4 });
        assert_eq!(vm.claims().len(), 4);
        assert!(vm.last_refreshed().is_some());
        assert!(!vm.is_loading());

        api.set_claims(vec![raw("CLM-9", "New Patient", "submitted", 0.0, 1.0)]);
        vm.load_claims(false).await;
        let ids: Vec<String> = vm.claims().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["CLM-9"]);
    }

    #[tokio::test]
    async fn load_failure_clears_set_and_records_error() {
        let api = Arc::new(InMemoryClaimsApi::with_claims(seed()));
        let vm = view_model(api.clone());
        let mut notifications = vm.subscribe();
        vm.load_claims(false).await;

        api.fail(Endpoint::List, "claims backend unavailable");
        let outcome = vm.load_claims(true).await;

        assert_eq!(outcome, LoadOutcome::Failed("claims backend unavailable".to_string()));
        assert!(vm.claims().is_empty());
        assert_eq!(vm.load_error().as_deref(), Some("claims backend unavailable"));
        let note = notifications.recv().await.unwrap();
        assert_eq!(note.level, NotificationLevel::Error);

        api.clear_failure(Endpoint::List);
        vm.load_claims(false).await;
        assert_eq!(vm.load_error(), None);
        assert_eq!(vm.claims().len(), 4);
    }

    #[tokio::test]
    async fn duplicate_and_anonymous_records_are_dropped() {
        let mut records = seed();
        records.push(raw("CLM-1", "Someone Else", "approved", 100.0, 1.0));
        records.push(serde_json::from_value(json!({ "patientName": "No Id" })).unwrap());
        let vm = view_model(Arc::new(InMemoryClaimsApi::with_claims(records)));

        assert_eq!(vm.load_claims(false).await, LoadOutcome::Applied { count: 4 });
        assert_eq!(vm.claim("CLM-1").unwrap().patient, "Ahmed Al-Rashid");
    }

    #[tokio::test]
    async fn failed_claim_end_to_end() {
        let api = Arc::new(InMemoryClaimsApi::with_claims(vec![serde_json::from_value(json!({
            "claimId": "CLM-1",
            "status": "failed",
            "progress": { "percentage": 100 },
            "totalAmount": 500
        }))
        .unwrap()]));
        let vm = view_model(api);
        vm.load_claims(false).await;

        assert_eq!(vm.status_counts().rejected, 1);
        let found = vm.filtered_claims(BucketFilter::All, "CLM-1");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].priority, Priority::Urgent);
        assert_eq!(found[0].amount, 500.0);
    }

    #[tokio::test]
    async fn counts_do_not_depend_on_the_filter() {
        let vm = view_model(Arc::new(InMemoryClaimsApi::with_claims(seed())));
        vm.load_claims(false).await;

        let before = vm.status_counts();
        let filtered = vm.view(BucketFilter::Only(Bucket::Rejected), "ahmed");
        assert_eq!(filtered.claims.len(), 1);
        assert_eq!(filtered.counts, before);
        assert_eq!(vm.status_counts(), before);
        assert_eq!(before.all, 4);
    }

    #[tokio::test]
    async fn refresh_updates_only_the_target_row() {
        let api = Arc::new(InMemoryClaimsApi::with_claims(seed()));
        let vm = view_model(api.clone());
        vm.load_claims(false).await;
        let before = vm.claims();

        api.set_status(
            "CLM-2",
            ClaimStatusUpdate {
                status: Some("processing".to_string()),
                progress: Some(RawProgress {
                    percentage: Some(80.0),
                    current_stage: Some("adjudication".to_string()),
                }),
                ..Default::default()
            },
        );
        let outcome = vm.refresh_claim("CLM-2").await;

        let RowOutcome::Updated(updated) = outcome else {
            panic!("expected update, got {outcome:?}");
        };
        assert_eq!(updated.bucket, Bucket::Processing);
        assert_eq!(updated.current_stage.as_deref(), Some("adjudication"));

        let after = vm.claims();
        assert_eq!(after.len(), before.len());
        for (old, new) in before.iter().zip(after.iter()) {
            assert_eq!(old.id, new.id);
            if old.id != "CLM-2" {
                assert_eq!(old, new);
            }
        }
        assert!(!vm.is_row_busy("CLM-2"));
    }

    #[tokio::test]
    async fn refresh_of_unknown_id_is_a_no_op() {
        let vm = view_model(Arc::new(InMemoryClaimsApi::with_claims(seed())));
        vm.load_claims(false).await;
        let before = vm.claims();

        assert_eq!(vm.refresh_claim("does-not-exist").await, RowOutcome::NotFound);
        assert_eq!(vm.retry_claim("does-not-exist").await, RowOutcome::NotFound);
        assert_eq!(vm.claims(), before);
    }

    #[tokio::test]
    async fn refresh_failure_leaves_row_unchanged() {
        let api = Arc::new(InMemoryClaimsApi::with_claims(seed()));
        let vm = view_model(api.clone());
        vm.load_claims(false).await;
        let mut notifications = vm.subscribe();
        let before = vm.claims();

        api.fail(Endpoint::Status, "status service down");
        let outcome = vm.refresh_claim("CLM-4").await;

        assert_eq!(outcome, RowOutcome::Failed("status service down".to_string()));
        assert_eq!(vm.claims(), before);
        let note = notifications.recv().await.unwrap();
        assert_eq!(note.claim_id.as_deref(), Some("CLM-4"));
        assert!(!vm.is_row_busy("CLM-4"));
    }

    #[tokio::test]
    async fn retry_resubmits_then_refreshes() {
        let api = Arc::new(InMemoryClaimsApi::with_claims(seed()));
        let vm = view_model(api.clone());
        vm.load_claims(false).await;
        assert!(vm.claim("CLM-1").unwrap().is_retryable());

        let outcome = vm.retry_claim("CLM-1").await;

        let RowOutcome::Updated(claim) = outcome else {
            panic!("expected update, got {outcome:?}");
        };
        assert_eq!(api.retry_count("CLM-1"), 1);
        assert_eq!(claim.status, "processing");
        assert_eq!(claim.bucket, Bucket::Pending);
        assert_eq!(vm.claim("CLM-1").unwrap(), claim);
        assert_eq!(vm.status_counts().rejected, 0);
    }

    #[tokio::test]
    async fn retry_failure_is_reported_without_refresh() {
        let api = Arc::new(InMemoryClaimsApi::with_claims(seed()));
        let vm = view_model(api.clone());
        vm.load_claims(false).await;
        let mut notifications = vm.subscribe();

        api.fail(Endpoint::Retry, "retry quota exceeded");
        let outcome = vm.retry_claim("CLM-1").await;

        assert_eq!(outcome, RowOutcome::Failed("retry quota exceeded".to_string()));
        assert_eq!(vm.claim("CLM-1").unwrap().status, "failed");
        let note = notifications.recv().await.unwrap();
        assert_eq!(note.level, NotificationLevel::Error);
        assert!(note.message.contains("retry quota exceeded"));
    }

    #[tokio::test]
    async fn export_follows_the_filtered_view() {
        let vm = view_model(Arc::new(InMemoryClaimsApi::with_claims(seed())));
        vm.load_claims(false).await;

        let csv = vm.export_csv(BucketFilter::Only(Bucket::Relayed), "", CsvDialect::Legacy);
        assert_eq!(
            csv,
            "Claim ID,Patient,Facility,Status,Amount\nCLM-3,Omar Khalil,FAC-1,approved,75"
        );
    }

    /// Claims API whose responses are released by the test.
    struct GatedApi {
        inner: InMemoryClaimsApi,
        list_gates: Mutex<VecDeque<oneshot::Receiver<Vec<RawClaim>>>>,
        status_gate: Mutex<Option<oneshot::Receiver<()>>>,
        list_started: AtomicUsize,
    }

    impl GatedApi {
        fn new(inner: InMemoryClaimsApi) -> Self {
            Self {
                inner,
                list_gates: Mutex::new(VecDeque::new()),
                status_gate: Mutex::new(None),
                list_started: AtomicUsize::new(0),
            }
        }

        fn gate_list(&self) -> oneshot::Sender<Vec<RawClaim>> {
            let (tx, rx) = oneshot::channel();
            self.list_gates.lock().unwrap().push_back(rx);
            tx
        }

        fn gate_status(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.status_gate.lock().unwrap() = Some(rx);
            tx
        }
    }

    #[async_trait]
    impl ClaimsApi for GatedApi {
        async fn list_claims(&self, limit: u32, page: u32) -> Result<Vec<RawClaim>> {
            let gate = self.list_gates.lock().unwrap().pop_front();
            self.list_started.fetch_add(1, Ordering::SeqCst);
            match gate {
                Some(rx) => rx
                    .await
                    .map_err(|_| ClaimsError::Api("gate dropped".to_string())),
                None => self.inner.list_claims(limit, page).await,
            }
        }

        async fn claim_status(&self, claim_id: &str) -> Result<ClaimStatusUpdate> {
            let gate = self.status_gate.lock().unwrap().take();
            if let Some(rx) = gate {
                let _ = rx.await;
            }
            self.inner.claim_status(claim_id).await
        }

        async fn retry_claim(&self, claim_id: &str) -> Result<()> {
            self.inner.retry_claim(claim_id).await
        }

        fn receipt_url(&self, claim_id: &str) -> String {
            self.inner.receipt_url(claim_id)
        }
    }

    #[tokio::test]
    async fn stale_load_does_not_clobber_newer_result() {
        let api = Arc::new(GatedApi::new(InMemoryClaimsApi::new()));
        let vm = view_model(api.clone());

        let first_gate = api.gate_list();
        let second_gate = api.gate_list();

        let first = tokio::spawn({
            let vm = vm.clone();
            async move { vm.load_claims(false).await }
        });
        while api.list_started.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let vm = vm.clone();
            async move { vm.load_claims(true).await }
        });
        while api.list_started.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        assert!(vm.is_loading());

        second_gate
            .send(vec![raw("NEW", "Newer", "submitted", 0.0, 1.0)])
            .unwrap();
        assert_eq!(second.await.unwrap(), LoadOutcome::Applied { count: 1 });

        first_gate
            .send(vec![raw("OLD", "Older", "submitted", 0.0, 1.0)])
            .unwrap();
        assert_eq!(first.await.unwrap(), LoadOutcome::Stale);

        let ids: Vec<String> = vm.claims().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["NEW"]);
        assert!(!vm.is_loading());
    }

    #[tokio::test]
    async fn abandoned_newer_load_does_not_block_older_one() {
        let api = Arc::new(GatedApi::new(InMemoryClaimsApi::new()));
        let vm = view_model(api.clone());

        let first_gate = api.gate_list();
        let _second_gate = api.gate_list();

        let first = tokio::spawn({
            let vm = vm.clone();
            async move { vm.load_claims(true).await }
        });
        while api.list_started.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let vm = vm.clone();
            async move { vm.load_claims(false).await }
        });
        while api.list_started.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        second.abort();
        assert!(second.await.unwrap_err().is_cancelled());
        assert!(!vm.is_loading());

        first_gate
            .send(vec![raw("FRESH", "Fresh Result", "submitted", 0.0, 1.0)])
            .unwrap();
        assert_eq!(first.await.unwrap(), LoadOutcome::Applied { count: 1 });

        let ids: Vec<String> = vm.claims().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["FRESH"]);
        assert!(vm.last_refreshed().is_some());
    }

    #[tokio::test]
    async fn silent_load_leaves_loading_indicator_alone() {
        let api = Arc::new(GatedApi::new(InMemoryClaimsApi::new()));
        let vm = view_model(api.clone());
        let gate = api.gate_list();

        let load = tokio::spawn({
            let vm = vm.clone();
            async move { vm.load_claims(true).await }
        });
        while api.list_started.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        assert!(!vm.is_loading());
        assert!(!vm.view(BucketFilter::All, "").loading);

        gate.send(Vec::new()).unwrap();
        assert_eq!(load.await.unwrap(), LoadOutcome::Applied { count: 0 });
        assert!(!vm.is_loading());
    }

    #[tokio::test]
    async fn foreground_load_shows_loading_indicator_while_in_flight() {
        let api = Arc::new(GatedApi::new(InMemoryClaimsApi::new()));
        let vm = view_model(api.clone());
        let gate = api.gate_list();

        let load = tokio::spawn({
            let vm = vm.clone();
            async move { vm.load_claims(false).await }
        });
        while api.list_started.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        assert!(vm.is_loading());
        assert!(vm.view(BucketFilter::All, "").loading);

        gate.send(Vec::new()).unwrap();
        assert_eq!(load.await.unwrap(), LoadOutcome::Applied { count: 0 });
        assert!(!vm.is_loading());
    }

    #[tokio::test]
    async fn busy_row_rejects_second_operation_but_not_other_rows() {
        let api = Arc::new(GatedApi::new(InMemoryClaimsApi::with_claims(seed())));
        let vm = view_model(api.clone());
        vm.load_claims(false).await;

        let release = api.gate_status();
        let pending = tokio::spawn({
            let vm = vm.clone();
            async move { vm.refresh_claim("CLM-1").await }
        });
        while !vm.is_row_busy("CLM-1") {
            tokio::task::yield_now().await;
        }

        assert_eq!(vm.row_activity("CLM-1"), Some(RowActivity::Refreshing));
        assert_eq!(
            vm.refresh_claim("CLM-1").await,
            RowOutcome::Busy(RowActivity::Refreshing)
        );
        assert_eq!(
            vm.retry_claim("CLM-1").await,
            RowOutcome::Busy(RowActivity::Refreshing)
        );
        assert!(matches!(vm.refresh_claim("CLM-2").await, RowOutcome::Updated(_)));

        release.send(()).unwrap();
        assert!(matches!(pending.await.unwrap(), RowOutcome::Updated(_)));
        assert!(!vm.is_row_busy("CLM-1"));
    }

    #[tokio::test]
    async fn row_dropped_by_reload_during_refresh_is_not_resurrected() {
        let api = Arc::new(GatedApi::new(InMemoryClaimsApi::with_claims(seed())));
        let vm = view_model(api.clone());
        vm.load_claims(false).await;

        let release = api.gate_status();
        let pending = tokio::spawn({
            let vm = vm.clone();
            async move { vm.refresh_claim("CLM-1").await }
        });
        while !vm.is_row_busy("CLM-1") {
            tokio::task::yield_now().await;
        }

        api.inner.set_status(
            "CLM-1",
            ClaimStatusUpdate {
                status: Some("approved".to_string()),
                ..Default::default()
            },
        );
        api.inner
            .set_claims(vec![raw("CLM-2", "Sara Haddad", "processing", 10.0, 120.0)]);
        vm.load_claims(false).await;
        release.send(()).unwrap();

        assert_eq!(pending.await.unwrap(), RowOutcome::NotFound);
        assert_eq!(vm.claims().len(), 1);
        assert!(vm.claim("CLM-1").is_none());
    }

    #[tokio::test]
    async fn status_in_flight_across_a_reload_is_discarded() {
        let api = Arc::new(GatedApi::new(InMemoryClaimsApi::with_claims(seed())));
        let vm = view_model(api.clone());
        vm.load_claims(false).await;
        let mut notifications = vm.subscribe();

        let release = api.gate_status();
        let pending = tokio::spawn({
            let vm = vm.clone();
            async move { vm.refresh_claim("CLM-2").await }
        });
        while !vm.is_row_busy("CLM-2") {
            tokio::task::yield_now().await;
        }

        api.inner.set_status(
            "CLM-2",
            ClaimStatusUpdate {
                status: Some("processing".to_string()),
                progress: Some(RawProgress {
                    percentage: Some(80.0),
                    current_stage: Some("adjudication".to_string()),
                }),
                ..Default::default()
            },
        );
        api.inner
            .set_claims(vec![raw("CLM-2", "Sara Haddad", "approved", 100.0, 120.0)]);
        vm.load_claims(false).await;
        release.send(()).unwrap();

        assert_eq!(pending.await.unwrap(), RowOutcome::Stale);
        let claim = vm.claim("CLM-2").unwrap();
        assert_eq!(claim.status, "approved");
        assert_eq!(claim.bucket, Bucket::Relayed);
        assert!(!vm.is_row_busy("CLM-2"));

        let note = notifications.recv().await.unwrap();
        assert_eq!(note.level, NotificationLevel::Info);
        assert_eq!(note.claim_id.as_deref(), Some("CLM-2"));
    }

    #[test]
    fn row_activity_displays_lowercase() {
        assert_eq!(RowActivity::Refreshing.to_string(), "refreshing");
        assert_eq!(RowActivity::Retrying.to_string(), "retrying");
    }

    #[tokio::test(start_paused = true)]
    async fn auto_refresh_reloads_on_interval_until_stopped() {
        let api = Arc::new(InMemoryClaimsApi::with_claims(seed()));
        let vm = view_model(api.clone());

        vm.start_auto_refresh();
        assert!(vm.is_auto_refresh_enabled());
        settle().await;
        assert_eq!(api.list_calls(), 0);

        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(api.list_calls(), 1);
        assert_eq!(vm.claims().len(), 4);
        assert!(!vm.is_loading());

        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(api.list_calls(), 2);

        vm.stop_auto_refresh();
        assert!(!vm.is_auto_refresh_enabled());
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(api.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn re_enabling_auto_refresh_starts_a_fresh_interval() {
        let api = Arc::new(InMemoryClaimsApi::with_claims(seed()));
        let vm = view_model(api.clone());

        vm.start_auto_refresh();
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        vm.stop_auto_refresh();
        vm.start_auto_refresh();

        // the old schedule would have fired at 15s
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(api.list_calls(), 0);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(api.list_calls(), 1);
        vm.stop_auto_refresh();
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_auto_refresh_lets_in_flight_load_finish() {
        let api = Arc::new(GatedApi::new(InMemoryClaimsApi::new()));
        let vm = view_model(api.clone());
        let gate = api.gate_list();

        vm.start_auto_refresh();
        tokio::time::advance(Duration::from_secs(15)).await;
        while api.list_started.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        vm.stop_auto_refresh();

        gate.send(vec![raw("LATE", "Late Arrival", "submitted", 0.0, 1.0)])
            .unwrap();
        settle().await;
        assert_eq!(vm.claims().len(), 1);
        assert_eq!(vm.claims()[0].id, "LATE");
    }
}
