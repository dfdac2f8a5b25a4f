//! Subscriber aggregator: the one place a consumer registers its bridge
//! listeners, and the one handle that tears them all down.
//!
//! The aggregator is handed the store it updates; it never reaches for
//! shared state of its own.

use crate::bridge::{EventBridge, HandlerError, HandlerResult, ListenerSet};
use crate::events::{BridgeEvent, EventName, IdentityFilter};
use crate::models::{GenerationResult, GenerationStatus, JobIdentity, JobKind};
use crate::rate_limit::{RateLimitEvent, RateLimitInterceptor, RateLimitSink};
use crate::utils::lock_mutex_recover;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Local state a subscriber keeps up to date from bridge events
pub trait GenerationStore: Send + Sync {
    fn apply_status(&self, identity: &JobIdentity, status: GenerationStatus) -> HandlerResult;

    /// The result is shared with every other subscriber of the same event
    fn apply_result(&self, identity: &JobIdentity, result: Arc<GenerationResult>)
        -> HandlerResult;

    fn apply_error(&self, identity: &JobIdentity, error: &str) -> HandlerResult;

    fn apply_stopped(&self, identity: &JobIdentity) -> HandlerResult;
}

fn apply_event(store: &dyn GenerationStore, event: &BridgeEvent) -> HandlerResult {
    match event {
        BridgeEvent::Progress { identity, status } => store.apply_status(identity, status.clone()),
        BridgeEvent::Complete { identity, result } => {
            store.apply_result(identity, Arc::clone(result))
        }
        BridgeEvent::Error { identity, error } => store.apply_error(identity, error),
        BridgeEvent::Stopped { identity } => store.apply_stopped(identity),
        BridgeEvent::RateLimit { .. } => Err(HandlerError::new(
            "rate-limit events are not generation events",
        )),
    }
}

pub struct SubscriberAggregator {
    store: Arc<dyn GenerationStore>,
    rate_limits: Option<Arc<RateLimitInterceptor>>,
    filter: IdentityFilter,
    kinds: Vec<JobKind>,
}

impl SubscriberAggregator {
    pub fn new(store: Arc<dyn GenerationStore>) -> Self {
        Self {
            store,
            rate_limits: None,
            filter: IdentityFilter::Any,
            kinds: JobKind::ALL.to_vec(),
        }
    }

    /// Also route both rate-limit events through `interceptor`
    pub fn with_rate_limits(mut self, interceptor: Arc<RateLimitInterceptor>) -> Self {
        self.rate_limits = Some(interceptor);
        self
    }

    /// Only follow jobs of one project
    pub fn for_project(mut self, project_id: impl Into<String>) -> Self {
        self.filter = IdentityFilter::Project(project_id.into());
        self
    }

    /// Only follow one job kind
    pub fn for_kind(mut self, kind: JobKind) -> Self {
        self.kinds = vec![kind];
        self
    }

    /// Register every listener this subscriber needs. Dropping the returned
    /// set, or calling `dispose_all`, removes all of them.
    pub fn attach(&self, bridge: &EventBridge) -> ListenerSet {
        let mut listeners = ListenerSet::new();

        for kind in &self.kinds {
            for name in EventName::job_events(*kind) {
                let store = Arc::clone(&self.store);
                listeners.push(bridge.register(name, self.filter.clone(), move |event| {
                    apply_event(store.as_ref(), event)
                }));
            }
        }

        if let Some(interceptor) = &self.rate_limits {
            listeners.extend(interceptor.attach(bridge));
        }

        log::debug!(
            "[Subscriber] Attached {} listeners ({:?})",
            listeners.len(),
            self.filter
        );
        listeners
    }
}

#[derive(Debug, Clone, Default)]
struct JobView {
    status: GenerationStatus,
    result: Option<Arc<GenerationResult>>,
}

/// In-memory [`GenerationStore`] that also collects rate-limit notifications
#[derive(Default)]
pub struct GenerationViewState {
    jobs: Mutex<HashMap<JobIdentity, JobView>>,
    rate_limits: Mutex<Vec<RateLimitEvent>>,
}

impl GenerationViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, identity: &JobIdentity) -> GenerationStatus {
        lock_mutex_recover(&self.jobs)
            .get(identity)
            .map(|view| view.status.clone())
            .unwrap_or_default()
    }

    /// Latest completed result; kept across stop and refresh until replaced
    pub fn result(&self, identity: &JobIdentity) -> Option<Arc<GenerationResult>> {
        lock_mutex_recover(&self.jobs)
            .get(identity)
            .and_then(|view| view.result.clone())
    }

    pub fn last_rate_limit(&self) -> Option<RateLimitEvent> {
        lock_mutex_recover(&self.rate_limits).last().cloned()
    }

    pub fn rate_limit_count(&self) -> usize {
        lock_mutex_recover(&self.rate_limits).len()
    }

    fn update<F: FnOnce(&mut JobView)>(&self, identity: &JobIdentity, f: F) {
        let mut jobs = lock_mutex_recover(&self.jobs);
        f(jobs.entry(identity.clone()).or_default());
    }
}

impl GenerationStore for GenerationViewState {
    fn apply_status(&self, identity: &JobIdentity, status: GenerationStatus) -> HandlerResult {
        self.update(identity, |view| view.status = status);
        Ok(())
    }

    fn apply_result(
        &self,
        identity: &JobIdentity,
        result: Arc<GenerationResult>,
    ) -> HandlerResult {
        self.update(identity, |view| {
            view.status = GenerationStatus::complete();
            view.result = Some(result);
        });
        Ok(())
    }

    fn apply_error(&self, identity: &JobIdentity, error: &str) -> HandlerResult {
        self.update(identity, |view| {
            view.status = GenerationStatus::failed(view.status.progress, error);
        });
        Ok(())
    }

    fn apply_stopped(&self, identity: &JobIdentity) -> HandlerResult {
        self.update(identity, |view| view.status = GenerationStatus::idle());
        Ok(())
    }
}

impl RateLimitSink for GenerationViewState {
    fn notify(&self, event: RateLimitEvent) {
        lock_mutex_recover(&self.rate_limits).push(event);
    }
}
