//! Pipeline stage that drops already-fetched requests.
//!
//! [`DedupFilter`] sits on the output stream of a processing stage. For every
//! batch it receives the originating work unit and the outputs produced
//! while processing it:
//!
//! - a request whose key is in the seen-set is dropped
//! - any other request is forwarded unchanged
//! - an item is forwarded unchanged and records the *originating* unit
//!
//! Relative order of the forwarded outputs is preserved. Storage errors
//! during a batch never drop output: the affected request or item is
//! forwarded and the error is logged as a warning.
//!
//! # Lifecycle
//!
//! ```text
//! Unopened --job_opened--> Open --job_closed--> Closed
//! ```
//!
//! Batches are only valid while `Open`. Closing waits for in-flight batches
//! to finish before the store is released.

use crate::config::DeltaFetchConfig;
use crate::models::{DedupEvent, DedupEventKind, Fingerprint, Job, Output, WorkUnit};
use crate::observability::{EventBus, global_event_bus};
use crate::services::{Fingerprinter, RequestFingerprinter, SeenSetPolicy};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tracing::instrument;

/// Start and end of a job, as signalled by the surrounding engine.
pub trait JobLifecycle: Send + Sync {
    /// Called once when the job starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage cannot be prepared for the job.
    fn job_opened(&self, job: &Job) -> Result<()>;

    /// Called once when the job ends, after the last batch completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage cannot be shut down cleanly.
    fn job_closed(&self, job: &Job) -> Result<()>;
}

/// A stage that transforms the outputs of one processed work unit.
pub trait OutputStage: Send + Sync {
    /// Filters the outputs produced while processing `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error only for misuse of the stage; per-output failures
    /// are absorbed.
    fn process_output(&self, origin: &WorkUnit, outputs: Vec<Output>) -> Result<Vec<Output>>;
}

/// A stage with both lifecycle hooks and output processing.
pub trait PipelineStage: JobLifecycle + OutputStage {}

impl<T: JobLifecycle + OutputStage> PipelineStage for T {}

/// Returns the stage to install for `config`.
///
/// With dedup disabled the engine gets a [`Passthrough`], so the output
/// stream is left untouched.
#[must_use]
pub fn install(config: DeltaFetchConfig) -> Box<dyn PipelineStage> {
    if config.enabled {
        Box::new(DedupFilter::new(config))
    } else {
        tracing::debug!("Deltafetch disabled, installing passthrough");
        Box::new(Passthrough)
    }
}

/// Stage that forwards everything unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl JobLifecycle for Passthrough {
    fn job_opened(&self, _job: &Job) -> Result<()> {
        Ok(())
    }

    fn job_closed(&self, _job: &Job) -> Result<()> {
        Ok(())
    }
}

impl OutputStage for Passthrough {
    fn process_output(&self, _origin: &WorkUnit, outputs: Vec<Output>) -> Result<Vec<Output>> {
        Ok(outputs)
    }
}

enum FilterState {
    Unopened,
    Open(SeenSetPolicy),
    Closed,
}

impl FilterState {
    const fn name(&self) -> &'static str {
        match self {
            Self::Unopened => "unopened",
            Self::Open(_) => "open",
            Self::Closed => "closed",
        }
    }
}

/// Cross-run request deduplication stage.
///
/// `process_output` may be called concurrently for different batches; the
/// store serializes its own access. `job_closed` blocks until every batch in
/// flight has returned.
///
/// # Example
///
/// ```rust,ignore
/// use deltafetch::{DedupFilter, DeltaFetchConfig, Job, JobLifecycle, OutputStage};
///
/// let filter = DedupFilter::new(DeltaFetchConfig::default().with_enabled(true));
/// let job = Job::new("alpha");
///
/// filter.job_opened(&job)?;
/// let forwarded = filter.process_output(&origin, outputs)?;
/// filter.job_closed(&job)?;
/// ```
pub struct DedupFilter {
    /// Storage location, backend and persistent reset flag.
    config: DeltaFetchConfig,
    /// Key derivation handed to the policy at open.
    fingerprinter: Arc<dyn Fingerprinter>,
    /// Receives one event per decision.
    events: EventBus,
    /// Batches hold the read side; open and close take the write side.
    state: RwLock<FilterState>,
}

impl DedupFilter {
    /// Creates an unopened filter.
    #[must_use]
    pub fn new(config: DeltaFetchConfig) -> Self {
        Self {
            config,
            fingerprinter: Arc::new(RequestFingerprinter::new()),
            events: global_event_bus().clone(),
            state: RwLock::new(FilterState::Unopened),
        }
    }

    /// Replaces the fingerprinter used for requests without an override key.
    #[must_use]
    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    /// Publishes decisions to `events` instead of the global bus.
    #[must_use]
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &DeltaFetchConfig {
        &self.config
    }

    /// Returns true between `job_opened` and `job_closed`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(*self.read_state(), FilterState::Open(_))
    }

    /// Opens the filter over an already configured policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContractViolation`] unless the filter is unopened.
    pub fn open_with_policy(&self, policy: SeenSetPolicy) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*state, FilterState::Unopened) {
            return Err(Error::ContractViolation(format!(
                "cannot open job '{}': filter is {}",
                policy.job(),
                state.name()
            )));
        }
        *state = FilterState::Open(policy);
        Ok(())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, FilterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, kind: DedupEventKind, job: &Arc<str>, key: Fingerprint) {
        self.events
            .publish(DedupEvent::new(kind, Arc::clone(job), key));
    }

    /// Decides one request; returns false if it must be dropped.
    fn admit_request(&self, policy: &SeenSetPolicy, unit: &WorkUnit) -> bool {
        let key = policy.derive_key(unit);
        match policy.has_seen_key(&key) {
            Ok(true) => {
                tracing::info!(job = %policy.job(), url = %unit.url, "Ignoring already visited");
                metrics::counter!("deltafetch_suppressed_total").increment(1);
                self.publish(DedupEventKind::Suppressed, policy.job(), key);
                false
            },
            Ok(false) => {
                metrics::counter!("deltafetch_forwarded_total").increment(1);
                self.publish(DedupEventKind::Forwarded, policy.job(), key);
                true
            },
            Err(e) => {
                tracing::warn!(
                    job = %policy.job(),
                    url = %unit.url,
                    error = %e,
                    "Seen-set lookup failed, forwarding request"
                );
                metrics::counter!("deltafetch_lookup_failed_total").increment(1);
                metrics::counter!("deltafetch_forwarded_total").increment(1);
                self.publish(DedupEventKind::Forwarded, policy.job(), key);
                true
            },
        }
    }

    /// Records that `origin` produced an item.
    fn record_item(&self, policy: &SeenSetPolicy, origin: &WorkUnit) {
        match policy.record_seen(origin, Utc::now()) {
            Ok(key) => {
                tracing::debug!(job = %policy.job(), url = %origin.url, "Recorded result");
                metrics::counter!("deltafetch_recorded_total").increment(1);
                self.publish(DedupEventKind::Recorded, policy.job(), key);
            },
            Err(e) => {
                tracing::warn!(
                    job = %policy.job(),
                    url = %origin.url,
                    error = %e,
                    "Failed to record result, it may be fetched again next run"
                );
                metrics::counter!("deltafetch_write_failed_total").increment(1);
            },
        }
    }
}

impl JobLifecycle for DedupFilter {
    #[instrument(skip_all, fields(job = %job.name, reset = self.config.reset || job.reset))]
    fn job_opened(&self, job: &Job) -> Result<()> {
        // Held across configure so a second open cannot touch the store
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*state, FilterState::Unopened) {
            return Err(Error::ContractViolation(format!(
                "cannot open job '{}': filter is {}",
                job.name,
                state.name()
            )));
        }

        let reset = self.config.reset || job.reset;
        let policy =
            SeenSetPolicy::configure(&job.name, &self.config.dir, reset, self.config.backend)?
                .with_fingerprinter(Arc::clone(&self.fingerprinter));
        *state = FilterState::Open(policy);
        Ok(())
    }

    #[instrument(skip_all, fields(job = %job.name))]
    fn job_closed(&self, job: &Job) -> Result<()> {
        // Taking the write lock waits for in-flight batches
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *state, FilterState::Closed) {
            FilterState::Open(policy) => {
                if policy.job().as_ref() != job.name.as_str() {
                    tracing::warn!(
                        open_job = %policy.job(),
                        "Closing filter with a different job than it was opened with"
                    );
                }
                policy.close()
            },
            other => {
                let name = other.name();
                *state = other;
                Err(Error::ContractViolation(format!(
                    "cannot close job '{}': filter is {name}",
                    job.name
                )))
            },
        }
    }
}

impl OutputStage for DedupFilter {
    #[instrument(skip_all, fields(url = %origin.url, outputs = outputs.len()))]
    fn process_output(&self, origin: &WorkUnit, outputs: Vec<Output>) -> Result<Vec<Output>> {
        let state = self.read_state();
        let FilterState::Open(policy) = &*state else {
            return Err(Error::ContractViolation(format!(
                "process_output called while filter is {}",
                state.name()
            )));
        };

        let forwarded = outputs
            .into_iter()
            .filter(|output| match output {
                Output::Request(unit) => self.admit_request(policy, unit),
                Output::Item(_) => {
                    self.record_item(policy, origin);
                    true
                },
            })
            .collect();

        Ok(forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;
    use crate::models::Item;
    use crate::storage::{KeyStore, MemoryKeyStore};

    struct FailingStore;

    impl KeyStore for FailingStore {
        fn backend_name(&self) -> &'static str {
            "failing"
        }

        fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>> {
            Err(Error::OperationFailed {
                operation: "get_seen".to_string(),
                cause: "disk I/O error".to_string(),
            })
        }

        fn put(&self, _key: &[u8], _value: &[u8]) -> Result<()> {
            Err(Error::WriteFailed {
                cause: "database or disk is full".to_string(),
            })
        }

        fn len(&self) -> Result<usize> {
            Ok(0)
        }

        fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    fn unit(url: &str) -> WorkUnit {
        WorkUnit::get(url).unwrap()
    }

    fn item(title: &str) -> Output {
        Output::from(Item::new().with_field("title", title))
    }

    fn memory_filter() -> DedupFilter {
        let config = DeltaFetchConfig::default()
            .with_enabled(true)
            .with_backend(StoreBackend::Memory);
        DedupFilter::new(config).with_event_bus(EventBus::new(64))
    }

    fn opened_over(store: Box<dyn KeyStore>) -> DedupFilter {
        let filter = memory_filter();
        let policy =
            SeenSetPolicy::with_store("alpha", store, Arc::new(RequestFingerprinter::new()));
        filter.open_with_policy(policy).unwrap();
        filter
    }

    #[test]
    fn test_suppresses_requests_whose_origin_yielded_items() {
        let filter = opened_over(Box::new(MemoryKeyStore::new()));
        let listing = unit("https://example.com/list");
        let a = unit("https://example.com/a");

        let out = filter
            .process_output(&listing, vec![a.clone().into()])
            .unwrap();
        assert_eq!(out, vec![Output::from(a.clone())]);

        // Processing A yields an item, which records A
        let out = filter.process_output(&a, vec![item("A")]).unwrap();
        assert_eq!(out.len(), 1);

        let out = filter
            .process_output(&listing, vec![a.clone().into()])
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_preserves_order_of_forwarded_outputs() {
        let filter = opened_over(Box::new(MemoryKeyStore::new()));
        let seen = unit("https://example.com/seen");
        filter.process_output(&seen, vec![item("x")]).unwrap();

        let origin = unit("https://example.com/page/1");
        let outputs = vec![
            item("first"),
            unit("https://example.com/new/1").into(),
            seen.clone().into(),
            item("second"),
            unit("https://example.com/new/2").into(),
            seen.into(),
        ];
        let expected = vec![
            outputs[0].clone(),
            outputs[1].clone(),
            outputs[3].clone(),
            outputs[4].clone(),
        ];

        assert_eq!(filter.process_output(&origin, outputs).unwrap(), expected);
    }

    #[test]
    fn test_items_record_origin_not_sibling_requests() {
        let filter = opened_over(Box::new(MemoryKeyStore::new()));
        let origin = unit("https://example.com/page/1");
        let sibling = unit("https://example.com/page/2");

        filter
            .process_output(&origin, vec![sibling.clone().into(), item("a")])
            .unwrap();

        let out = filter
            .process_output(&sibling, vec![origin.clone().into(), sibling.clone().into()])
            .unwrap();
        assert_eq!(out, vec![Output::from(sibling)]);
    }

    #[test]
    fn test_fail_open_on_storage_errors() {
        let filter = opened_over(Box::new(FailingStore));
        let origin = unit("https://example.com/");
        let outputs = vec![unit("https://example.com/a").into(), item("a")];

        let out = filter.process_output(&origin, outputs.clone()).unwrap();
        assert_eq!(out, outputs);
    }

    #[test]
    fn test_events_follow_decisions() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe_filtered(|_| true);
        let filter = opened_over(Box::new(MemoryKeyStore::new())).with_event_bus(bus);

        let a = unit("https://example.com/a");
        filter.process_output(&a, vec![item("a")]).unwrap();
        filter
            .process_output(&a, vec![a.clone().into(), unit("https://example.com/b").into()])
            .unwrap();

        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                DedupEventKind::Recorded,
                DedupEventKind::Suppressed,
                DedupEventKind::Forwarded
            ]
        );
    }

    #[test]
    fn test_process_before_open_is_contract_violation() {
        let filter = memory_filter();
        let result = filter.process_output(&unit("https://example.com/"), vec![]);
        assert!(matches!(result, Err(Error::ContractViolation(_))));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let filter = DedupFilter::new(
            DeltaFetchConfig::default()
                .with_enabled(true)
                .with_dir(dir.path()),
        );
        let job = Job::new("alpha");

        assert!(matches!(
            filter.job_closed(&job),
            Err(Error::ContractViolation(_))
        ));

        filter.job_opened(&job).unwrap();
        assert!(filter.is_open());
        assert!(dir.path().join("alpha.db").is_file());
        assert!(matches!(
            filter.job_opened(&job),
            Err(Error::ContractViolation(_))
        ));

        filter.job_closed(&job).unwrap();
        assert!(!filter.is_open());
        assert!(matches!(
            filter.job_closed(&job),
            Err(Error::ContractViolation(_))
        ));
        assert!(matches!(
            filter.job_opened(&job),
            Err(Error::ContractViolation(_))
        ));
        assert!(matches!(
            filter.process_output(&unit("https://example.com/"), vec![]),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_open_failure_leaves_filter_unopened() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let filter = DedupFilter::new(
            DeltaFetchConfig::default()
                .with_enabled(true)
                .with_dir(blocker.join("state")),
        );
        let err = filter.job_opened(&Job::new("alpha")).unwrap_err();
        assert!(err.is_fatal());
        assert!(!filter.is_open());
    }

    #[test]
    fn test_per_run_reset() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeltaFetchConfig::default()
            .with_enabled(true)
            .with_dir(dir.path());
        let a = unit("https://example.com/a");

        let first = DedupFilter::new(config.clone());
        first.job_opened(&Job::new("alpha")).unwrap();
        first.process_output(&a, vec![item("a")]).unwrap();
        first.job_closed(&Job::new("alpha")).unwrap();

        let second = DedupFilter::new(config);
        let job = Job::new("alpha").with_reset(true);
        second.job_opened(&job).unwrap();
        let out = second
            .process_output(&unit("https://example.com/"), vec![a.clone().into()])
            .unwrap();
        assert_eq!(out, vec![Output::from(a)]);
        second.job_closed(&job).unwrap();
    }

    #[test]
    fn test_concurrent_opens_leave_one_policy() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeltaFetchConfig::default()
            .with_enabled(true)
            .with_dir(dir.path());
        let a = unit("https://example.com/a");

        let seed = DedupFilter::new(config.clone()).with_event_bus(EventBus::new(8));
        seed.job_opened(&Job::new("alpha")).unwrap();
        seed.process_output(&a, vec![item("a")]).unwrap();
        seed.job_closed(&Job::new("alpha")).unwrap();

        let filter = Arc::new(DedupFilter::new(config).with_event_bus(EventBus::new(8)));
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let filter = Arc::clone(&filter);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let reset = t % 2 == 1;
                    barrier.wait();
                    let result = filter.job_opened(&Job::new("alpha").with_reset(reset));
                    (reset, result)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<bool> = results
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(reset, _)| *reset)
            .collect();
        assert_eq!(winners.len(), 1);
        assert!(
            results
                .iter()
                .filter_map(|(_, result)| result.as_ref().err())
                .all(|e| matches!(e, Error::ContractViolation(_)))
        );

        // Losing opens must not have reset the winner's store
        let out = filter
            .process_output(&unit("https://example.com/"), vec![a.clone().into()])
            .unwrap();
        if winners[0] {
            assert_eq!(out, vec![Output::from(a)]);
        } else {
            assert!(out.is_empty());
        }
        filter.job_closed(&Job::new("alpha")).unwrap();
    }

    #[test]
    fn test_concurrent_batches() {
        let filter = Arc::new(opened_over(Box::new(MemoryKeyStore::new())));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let filter = Arc::clone(&filter);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let origin = unit(&format!("https://example.com/{t}/{i}"));
                        let out = filter.process_output(&origin, vec![item("x")]).unwrap();
                        assert_eq!(out.len(), 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let origin = unit("https://example.com/");
        let repeat: Vec<Output> = (0..4)
            .flat_map(|t| (0..25).map(move |i| unit(&format!("https://example.com/{t}/{i}"))))
            .map(Output::from)
            .collect();
        assert!(filter.process_output(&origin, repeat).unwrap().is_empty());
    }

    #[test]
    fn test_passthrough_forwards_everything() {
        let stage = Passthrough;
        let origin = unit("https://example.com/");
        let outputs = vec![origin.clone().into(), item("a")];

        stage.job_opened(&Job::new("alpha")).unwrap();
        assert_eq!(stage.process_output(&origin, outputs.clone()).unwrap(), outputs);
        stage.job_closed(&Job::new("alpha")).unwrap();
    }

    #[test]
    fn test_install_respects_enabled_flag() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new("alpha");

        let disabled = install(DeltaFetchConfig::default().with_dir(dir.path()));
        disabled.job_opened(&job).unwrap();
        disabled.job_closed(&job).unwrap();
        assert!(!dir.path().join("alpha.db").exists());

        let enabled = install(
            DeltaFetchConfig::default()
                .with_enabled(true)
                .with_dir(dir.path()),
        );
        enabled.job_opened(&job).unwrap();
        enabled.job_closed(&job).unwrap();
        assert!(dir.path().join("alpha.db").exists());
    }
}
