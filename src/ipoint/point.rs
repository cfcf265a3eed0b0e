//! The issuing point controller.
//!
//! An [`IssuingPoint`] ties the cache, schedule, and generator of one CRL
//! stream together and runs them on a dedicated worker thread. All public
//! operations are safe to call from any thread while a cycle is running;
//! they take effect on the next iteration of the worker.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration as StdDuration, Instant};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use crate::api::{
    IssuingPointHandle, IssuingPointStatus, PublishStatus, RevokedEntry,
    Serial, UpdateStatus,
};
use crate::commons::crypto::SigningAlgorithm;
use crate::commons::error::{CrlIoError, Error};
use crate::commons::CrlResult;
use crate::constants::AUDIT_LOG_TARGET as AUDIT;
use super::cache::{CacheRecord, CacheSettings, RevocationCache, Watermark};
use super::config::{ConfigUpdateReport, IssuingPointConfig};
use super::generator::{
    CrlGenerator, CycleOutcome, GeneratedCrl, GenerationKind,
};
use super::record::{IssuingPointRecord, PointStorage};
use super::schedule::{NextUpdate, ScheduleCalculator, ScheduleState};
use super::worker::{Action, Backoff, Triggers, WakeReason};
use super::Collaborators;

/// The longest the worker sleeps before looking at the clock again.
const MAX_WAIT: StdDuration = StdDuration::from_secs(60);

/// Minutes to wait before retrying a failed cache flush.
const FLUSH_RETRY_MINUTES: i64 = 1;

/// The shortest wait before publishing a CRL again after a failure.
const MIN_REPUBLISH_WAIT_MINUTES: i64 = 1;


//------------ IssuingPoint --------------------------------------------------

#[derive(Clone, Debug)]
pub struct IssuingPoint {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    handle: IssuingPointHandle,
    state: Mutex<PointState>,
    cond: Condvar,
    cache: RevocationCache,
    storage: Arc<PointStorage>,
    collaborators: Collaborators,
}

#[derive(Debug)]
struct PointState {
    config: IssuingPointConfig,
    calculator: ScheduleCalculator,
    schedule: ScheduleState,
    crl_size: usize,
    update: UpdateStatus,
    publish: PublishStatus,
    backoff: Backoff,
    manual: Option<ManualRequest>,
    last_auto_update: bool,
    republish_pending: bool,
    last_publish_failure: Option<DateTime<Utc>>,
    flush_due: Option<DateTime<Utc>>,
    generating: bool,
    shutdown: bool,
    worker: Option<JoinHandle<()>>,
}

#[derive(Clone, Copy, Debug)]
struct ManualRequest {
    algorithm: Option<SigningAlgorithm>,
}

/// One generation cycle as taken from the point state.
struct Job {
    kind: GenerationKind,
    manual: Option<ManualRequest>,
    last_auto_update: bool,
    slot: Option<NextUpdate>,
    algorithm: SigningAlgorithm,
    config: IssuingPointConfig,
    calculator: ScheduleCalculator,
    schedule: ScheduleState,
}

fn cache_settings(config: &IssuingPointConfig) -> CacheSettings {
    CacheSettings {
        enabled: config.enable_cache,
        flush_interval: config.cache_update_interval,
        include_expired: config.include_expired_certs,
    }
}

/// # Creating and stopping
impl IssuingPoint {
    /// Creates an issuing point, continuing from its stored state if there
    /// is any.
    ///
    /// Changes that were not stored when the point last stopped are
    /// recovered from the request log, or the cache is rebuilt from the
    /// certificate store on the next full CRL. The worker is not started
    /// yet, see [`start`](Self::start).
    pub fn create(
        mut config: IssuingPointConfig, collaborators: Collaborators
    ) -> CrlResult<Self> {
        config.verify()?;
        let calculator = ScheduleCalculator::from_config(&config)?;
        let handle = config.name.clone();
        let storage = Arc::new(PointStorage::new(
            handle.clone(), collaborators.repository.clone()
        ));
        let cache = RevocationCache::new(
            handle.clone(), storage.clone(), cache_settings(&config)
        );
        let now = collaborators.clock.now();
        let stored = storage.load()?;

        let mut state = PointState {
            schedule: ScheduleState::new(config.initial_crl_number),
            calculator,
            crl_size: 0,
            update: UpdateStatus::Never,
            publish: PublishStatus::Never,
            backoff: Backoff::new(
                config.unexpected_exception_wait_time,
                config.unexpected_exception_loop_max,
            ),
            manual: None,
            last_auto_update: false,
            republish_pending: false,
            last_publish_failure: None,
            flush_due: None,
            generating: false,
            shutdown: false,
            worker: None,
            config,
        };

        match stored.record {
            Some(record) => {
                let has_crl = stored.crl.is_some();
                let committed = stored
                    .crl
                    .map(|crl| crl.entries().to_vec())
                    .unwrap_or_default();
                cache.restore(
                    committed,
                    stored.cache.unwrap_or_default(),
                    stored.watermark,
                );
                Self::recover(
                    &cache, &state.config, &collaborators, stored.watermark, now
                )?;

                state.schedule = record.schedule;
                state.schedule.scheduled = state.calculator.next_update(
                    &state.schedule, now, true, true
                );
                state.crl_size = record.crl_size;
                state.republish_pending = record.republish_pending
                    || (state.config.publish_on_start && has_crl);
                info!(
                    "Issuing point '{handle}': loaded at CRL number {}",
                    state.schedule.crl_number
                );
            }
            None => {
                cache.restore(
                    vec![], CacheRecord::default(), Watermark::NeedsRebuild
                );
                if !state.calculator.policy().is_disabled() {
                    state.schedule.scheduled = Some(NextUpdate::immediate(now));
                }
                info!(target: AUDIT, "Issuing point '{handle}': created");
            }
        }

        Ok(IssuingPoint {
            shared: Arc::new(Shared {
                handle,
                state: Mutex::new(state),
                cond: Condvar::new(),
                cache,
                storage,
                collaborators,
            }),
        })
    }

    fn recover(
        cache: &RevocationCache,
        config: &IssuingPointConfig,
        collaborators: &Collaborators,
        watermark: Watermark,
        now: DateTime<Utc>,
    ) -> CrlResult<()> {
        let handle = &config.name;
        match watermark {
            Watermark::Clean => Ok(()),
            Watermark::At(from)
                if config.enable_cache && config.enable_cache_recovery =>
            {
                info!(
                    target: AUDIT,
                    "Issuing point '{handle}': recovering from request {from}"
                );
                let replayed = cache.rebuild_from_request_log(
                    collaborators.requests.as_ref(),
                    from,
                    &config.filter(),
                    now,
                );
                match replayed {
                    Ok(_) => cache.flush(),
                    Err(e) => {
                        warn!(
                            "Issuing point '{handle}': recovery failed, will \
                             rebuild from certificate store: {e}"
                        );
                        cache.clear()
                    }
                }
            }
            _ => {
                info!(
                    target: AUDIT,
                    "Issuing point '{handle}': cache will be rebuilt from \
                     certificate store"
                );
                cache.clear()
            }
        }
    }

    /// Starts the worker thread.
    ///
    /// Triggers received before this, such as a manual update, are acted
    /// on right away.
    pub fn start(&self) -> CrlResult<()> {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(Error::IssuingPointShutDown(self.shared.handle.clone()))
        }
        if state.worker.is_some() {
            return Ok(())
        }
        let shared = self.shared.clone();
        let worker = thread::Builder::new()
            .name(format!("crld-{}", self.shared.handle))
            .spawn(move || shared.run())
            .map_err(|e| {
                CrlIoError::new(
                    format!("cannot start worker for '{}'", self.shared.handle),
                    e,
                )
            })?;
        state.worker = Some(worker);
        debug!("Issuing point '{}': worker started", self.shared.handle);
        Ok(())
    }

    /// Stops the worker and stores the cache.
    ///
    /// A running cycle is completed first. The cache is marked clean so the
    /// next start needs no recovery.
    pub fn shutdown(&self) -> CrlResult<()> {
        let worker = {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.worker.take()
        };
        self.shared.cond.notify_all();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("Issuing point '{}': worker panicked", self.shared.handle);
            }
        }
        self.shared.cache.flush_clean()?;
        let record = self.shared.lock().record();
        self.shared.storage.store_record(&record)?;
        info!(target: AUDIT, "Issuing point '{}': shut down", self.shared.handle);
        Ok(())
    }

    /// Shuts the point down and removes all its stored state.
    pub fn delete(&self) -> CrlResult<()> {
        self.shutdown()?;
        self.shared.storage.delete()?;
        info!(target: AUDIT, "Issuing point '{}': deleted", self.shared.handle);
        Ok(())
    }
}

/// # Triggers and notifications
impl IssuingPoint {
    pub fn enable(&self, enabled: bool) {
        let mut state = self.shared.lock();
        if state.config.enabled != enabled {
            state.config.enabled = enabled;
            info!(
                target: AUDIT,
                "Issuing point '{}': {}",
                self.shared.handle,
                if enabled { "enabled" } else { "disabled" }
            );
        }
        self.shared.cond.notify_all();
    }

    /// Requests a full CRL as soon as possible.
    ///
    /// The CRL is signed with `algorithm` if given, otherwise with the
    /// configured algorithm.
    pub fn request_manual_update(
        &self, algorithm: Option<SigningAlgorithm>
    ) -> CrlResult<()> {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(Error::IssuingPointShutDown(self.shared.handle.clone()))
        }
        if !state.config.enabled {
            return Err(Error::IssuingPointDisabled(self.shared.handle.clone()))
        }
        state.manual = Some(ManualRequest { algorithm });
        info!(
            target: AUDIT,
            "Issuing point '{}': manual update requested", self.shared.handle
        );
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Records a completed revocation.
    pub fn add_revoked(
        &self, entry: RevokedEntry, request_id: Option<u64>
    ) -> CrlResult<()> {
        self.shared.check_running()?;
        let flush = self.shared.cache.record_revoked(entry, request_id)?;
        self.shared.flush_needed(flush);
        Ok(())
    }

    /// Records that a revocation was lifted.
    pub fn add_unrevoked(
        &self, serial: &Serial, request_id: Option<u64>
    ) -> CrlResult<()> {
        self.shared.check_running()?;
        let now = self.shared.now();
        let flush = self.shared.cache.record_unrevoked(
            serial, request_id, now
        )?;
        self.shared.flush_needed(flush);
        Ok(())
    }

    /// Records that a revoked certificate expired.
    pub fn add_expired(&self, serial: &Serial) -> CrlResult<()> {
        self.shared.check_running()?;
        let flush = self.shared.cache.record_expired(serial)?;
        self.shared.flush_needed(flush);
        Ok(())
    }

    /// Drops the cache so the next full CRL is rebuilt from the certificate
    /// store.
    pub fn clear_cache(&self) -> CrlResult<()> {
        self.shared.cache.clear()?;
        self.shared.cache.flush()?;
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Makes the worker look at the clock again.
    pub fn wake(&self) {
        self.shared.cond.notify_all();
    }

    /// Waits until no cycle is running or due, or the timeout passed.
    ///
    /// Returns whether the point became idle.
    pub fn wait_idle(&self, timeout: StdDuration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            let now = self.shared.now();
            let busy = state.generating
                || matches!(state.triggers(now).action(now), Action::Run(_));
            if !busy {
                return true
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false
            }
            state = self
                .shared
                .cond
                .wait_timeout(state, remaining)
                .expect("poisoned lock")
                .0;
        }
    }
}

/// # Configuration
impl IssuingPoint {
    /// Applies a batch of textual configuration changes.
    ///
    /// Keys are applied one by one, a rejected key does not stop the rest.
    /// However many keys change, the cache is cleared at most once and the
    /// schedule recalculated at most once.
    pub fn update_config(
        &self, changes: &BTreeMap<String, String>
    ) -> CrlResult<ConfigUpdateReport> {
        let handle = &self.shared.handle;
        let mut state = self.shared.lock();
        let mut config = state.config.clone();
        let (effect, mut report) = config.apply_batch(changes);
        config.verify()?;
        let calculator = ScheduleCalculator::from_config(&config)?;

        let was_scheduled = !state.calculator.policy().is_disabled();
        state.backoff.configure(
            config.unexpected_exception_wait_time,
            config.unexpected_exception_loop_max,
        );
        self.shared.cache.set_settings(cache_settings(&config));
        state.config = config;
        state.calculator = calculator;

        if effect.content {
            self.shared.cache.clear()?;
            self.shared.cache.flush()?;
            report.content_affected = true;
        }

        if effect.schedule {
            let now = self.shared.now();
            if state.calculator.policy().is_disabled() {
                state.schedule.scheduled = None;
                state.last_auto_update = was_scheduled;
            } else if state.config.apply_schedule_immediately
                || state.schedule.scheduled.is_none()
            {
                state.schedule.scheduled = state
                    .calculator
                    .next_update(&state.schedule, now, true, true)
                    .map(|mut next| {
                        next.at = next.at.max(now);
                        next
                    });
                state.config.apply_schedule_immediately = false;
            }
            report.schedule_affected = true;
        }

        if let Err(e) = self.shared.storage.store_record(&state.record()) {
            warn!("Issuing point '{handle}': could not store record: {e}");
        }
        info!(target: AUDIT, "Issuing point '{handle}': configuration {report}");
        self.shared.cond.notify_all();
        Ok(report)
    }

    pub fn config(&self) -> IssuingPointConfig {
        self.shared.lock().config.clone()
    }
}

/// # Status
impl IssuingPoint {
    pub fn handle(&self) -> &IssuingPointHandle {
        &self.shared.handle
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.lock().config.enabled
    }

    /// Returns whether the point lists certificates with this serial.
    pub fn in_range(&self, serial: &Serial) -> bool {
        self.shared.lock().config.in_range(serial)
    }

    pub fn crl_number(&self) -> u64 {
        self.shared.lock().schedule.crl_number
    }

    pub fn delta_crl_number(&self) -> u64 {
        self.shared.lock().schedule.delta_crl_number
    }

    /// Returns the number of entries on the current full CRL.
    pub fn crl_size(&self) -> usize {
        self.shared.lock().crl_size
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().schedule.last_update
    }

    /// Returns the nextUpdate of the current full CRL.
    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().schedule.next_update
    }

    pub fn next_delta_update(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().schedule.next_delta_update
    }

    /// Returns the update the worker is waiting for.
    pub fn next_scheduled_update(&self) -> Option<NextUpdate> {
        self.shared.lock().schedule.scheduled
    }

    pub fn schedule(&self) -> ScheduleState {
        self.shared.lock().schedule.clone()
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.shared.lock().config.enable_cache
    }

    pub fn is_cache_empty(&self) -> bool {
        self.shared.cache.is_empty()
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.shared.lock().generating
    }

    pub fn cache(&self) -> &RevocationCache {
        &self.shared.cache
    }

    pub fn current_crl(&self) -> CrlResult<Option<GeneratedCrl>> {
        self.shared
            .collaborators
            .repository
            .get_crl(&self.shared.handle, false)
    }

    pub fn current_delta_crl(&self) -> CrlResult<Option<GeneratedCrl>> {
        self.shared
            .collaborators
            .repository
            .get_crl(&self.shared.handle, true)
    }

    pub fn status(&self) -> IssuingPointStatus {
        let state = self.shared.lock();
        IssuingPointStatus {
            handle: self.shared.handle.clone(),
            enabled: state.config.enabled,
            crl_number: state.schedule.crl_number,
            delta_crl_number: state.schedule.delta_crl_number,
            crl_size: state.crl_size,
            last_update: state.schedule.last_update,
            next_update: state.schedule.next_update,
            next_delta_update: state.schedule.next_delta_update,
            cache_enabled: state.config.enable_cache,
            cache_empty: self.shared.cache.is_empty(),
            update_in_progress: state.generating,
            update: state.update.clone(),
            publish: state.publish.clone(),
            failures: state.backoff.failures(),
        }
    }
}


//------------ PointState ----------------------------------------------------

impl PointState {
    fn triggers(&self, now: DateTime<Utc>) -> Triggers {
        let republish_due = self.republish_pending.then(|| {
            let wait = self.backoff.wait().max(
                Duration::minutes(MIN_REPUBLISH_WAIT_MINUTES)
            );
            self.last_publish_failure.map_or(now, |failure| failure + wait)
        });
        Triggers {
            shutdown: self.shutdown,
            enabled: self.config.enabled,
            generating: self.generating,
            manual: self.manual.is_some(),
            last_auto_update: self.last_auto_update,
            scheduled: self.schedule.scheduled.map(|next| next.at),
            flush_due: self.flush_due,
            republish_due,
            backoff_until: self.backoff.until(),
        }
    }

    fn record(&self) -> IssuingPointRecord {
        IssuingPointRecord {
            schedule: self.schedule.clone(),
            crl_size: self.crl_size,
            republish_pending: self.republish_pending,
        }
    }

    /// Takes the next generation cycle out of the state.
    fn take_job(
        &mut self, now: DateTime<Utc>, cache: &RevocationCache
    ) -> Option<Job> {
        if self.generating || self.shutdown || !self.config.enabled {
            return None
        }
        let slot = self.schedule.scheduled.filter(|next| next.at <= now);
        if self.manual.is_none() && !self.last_auto_update && slot.is_none() {
            return None
        }
        if self.backoff.until().is_some_and(|until| until > now) {
            return None
        }

        let manual = self.manual.take();
        let last_auto_update = std::mem::take(&mut self.last_auto_update);

        let delta_possible = cache.settings().enabled
            && self.calculator.delta_mode()
            && !cache.needs_rebuild()
            && self.schedule.last_update.is_some();
        let kind = match slot {
            Some(slot)
                if manual.is_none() && !last_auto_update && !slot.full
                    && delta_possible =>
            {
                GenerationKind::Delta { schema_counter: slot.schema_counter }
            }
            _ => GenerationKind::Full,
        };
        let algorithm = manual
            .and_then(|manual| manual.algorithm)
            .unwrap_or(self.config.signing_algorithm);

        self.generating = true;
        self.schedule.update_in_progress = true;
        self.update = UpdateStatus::Started { at: now };

        Some(Job {
            kind,
            manual,
            last_auto_update,
            slot,
            algorithm,
            config: self.config.clone(),
            calculator: self.calculator.clone(),
            schedule: self.schedule.clone(),
        })
    }
}


//------------ Shared --------------------------------------------------------

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PointState> {
        self.state.lock().expect("poisoned lock")
    }

    fn now(&self) -> DateTime<Utc> {
        self.collaborators.clock.now()
    }

    fn check_running(&self) -> CrlResult<()> {
        if self.lock().shutdown {
            Err(Error::IssuingPointShutDown(self.handle.clone()))
        } else {
            Ok(())
        }
    }

    /// Makes sure a cache flush is scheduled.
    fn flush_needed(&self, needed: bool) {
        if !needed {
            return
        }
        let now = self.now();
        let mut state = self.lock();
        if state.flush_due.is_none() {
            let interval = i64::from(state.config.cache_update_interval);
            state.flush_due = Some(now + Duration::minutes(interval));
            self.cond.notify_all();
        }
    }

    /// The worker loop.
    fn run(&self) {
        loop {
            let state = self.lock();
            let now = self.now();
            match state.triggers(now).action(now) {
                Action::Stop => break,
                Action::Wait(delay) => {
                    let _ = self
                        .cond
                        .wait_timeout(state, delay.min(MAX_WAIT))
                        .expect("poisoned lock");
                }
                Action::WaitForTrigger => {
                    let _ = self
                        .cond
                        .wait_timeout(state, MAX_WAIT)
                        .expect("poisoned lock");
                }
                Action::Run(reasons) => {
                    drop(state);
                    self.run_cycle(&reasons, now);
                }
            }
        }
        debug!("Issuing point '{}': worker stopped", self.handle);
    }

    fn run_cycle(&self, reasons: &[WakeReason], now: DateTime<Utc>) {
        debug!("Issuing point '{}': woke up for {reasons:?}", self.handle);
        if reasons.contains(&WakeReason::CacheFlush) {
            self.flush_cache(now);
        }
        if reasons.iter().any(|reason| reason.generates()) {
            self.generate(now);
        }
        if reasons.contains(&WakeReason::Republish) {
            self.republish(now);
        }
        self.cond.notify_all();
    }

    fn flush_cache(&self, now: DateTime<Utc>) {
        self.lock().flush_due = None;
        if let Err(e) = self.cache.flush() {
            warn!("Issuing point '{}': cannot store cache: {e}", self.handle);
            self.lock().flush_due.get_or_insert(
                now + Duration::minutes(FLUSH_RETRY_MINUTES)
            );
        }
    }

    fn generate(&self, now: DateTime<Utc>) {
        let Some(job) = self.lock().take_job(now, &self.cache) else {
            return
        };
        info!(
            target: AUDIT,
            "Issuing point '{}': {} CRL generation started",
            self.handle,
            if job.kind == GenerationKind::Full { "full" } else { "delta" }
        );

        let generator = CrlGenerator {
            handle: &self.handle,
            config: &job.config,
            calculator: &job.calculator,
            cache: &self.cache,
            storage: &self.storage,
            collaborators: &self.collaborators,
        };
        let result = generator.generate(
            job.kind, &job.schedule, now, job.algorithm
        );

        let mut state = self.lock();
        state.generating = false;
        state.schedule.update_in_progress = false;

        match result {
            Ok(CycleOutcome::Generated { crl, state: schedule, published }) => {
                info!(
                    target: AUDIT,
                    "Issuing point '{}': generated {crl}", self.handle
                );
                state.schedule = schedule;
                // The configuration may have changed while generating.
                state.schedule.scheduled = state
                    .calculator
                    .next_update(&state.schedule, now, true, true);
                if !crl.is_delta() {
                    state.crl_size = crl.len();
                }
                state.update = UpdateStatus::Succeeded {
                    at: now,
                    crl_number: crl.crl_number(),
                    delta: crl.is_delta(),
                };
                state.backoff.succeeded();

                match published {
                    Ok(()) => {
                        state.publish = PublishStatus::Published {
                            at: now,
                            crl_number: crl.crl_number(),
                        };
                        state.republish_pending = false;
                        state.last_publish_failure = None;
                    }
                    Err(error) => {
                        info!(
                            target: AUDIT,
                            "Issuing point '{}': publication of CRL {} \
                             failed: {error}",
                            self.handle,
                            crl.crl_number()
                        );
                        state.publish = PublishStatus::Pending {
                            since: now, error
                        };
                        state.republish_pending = true;
                        state.last_publish_failure = Some(now);
                        self.store_record(&state);
                    }
                }
            }
            Ok(CycleOutcome::Skipped { reason }) => {
                info!("Issuing point '{}': skipped CRL: {reason}", self.handle);
                state.update = UpdateStatus::Skipped { at: now, reason };
                state.backoff.succeeded();

                // The slot is used up even though nothing was issued.
                if let Some(slot) = job.slot {
                    let mut reference = state.schedule.clone();
                    reference.last_update = Some(slot.at);
                    reference.schema_counter = slot.schema_counter;
                    state.schedule.schema_counter = slot.schema_counter;
                    state.schedule.scheduled = job
                        .calculator
                        .next_update(&reference, now, true, true);
                }
                self.store_record(&state);
            }
            Err(e) => {
                error!(
                    "Issuing point '{}': CRL generation failed ({} error): {e}",
                    self.handle,
                    e.kind()
                );
                info!(
                    target: AUDIT,
                    "Issuing point '{}': CRL generation failed: {e}",
                    self.handle
                );
                state.update = UpdateStatus::Failed {
                    at: now,
                    error: e.to_string(),
                };
                state.backoff.failed(now);
                if state.manual.is_none() {
                    state.manual = job.manual;
                }
                state.last_auto_update |= job.last_auto_update;
            }
        }
    }

    fn republish(&self, now: DateTime<Utc>) {
        let destination = {
            let state = self.lock();
            if !state.republish_pending {
                return
            }
            state.config.publish_destination.clone()
        };

        let result = self.publish_current(destination.as_deref());

        let mut state = self.lock();
        match result {
            Ok(crl_number) => {
                info!(
                    target: AUDIT,
                    "Issuing point '{}': republished CRL {crl_number}",
                    self.handle
                );
                state.publish = PublishStatus::Published { at: now, crl_number };
                state.republish_pending = false;
                state.last_publish_failure = None;
            }
            Err(e) => {
                warn!("Issuing point '{}': republication failed: {e}", self.handle);
                let since = match &state.publish {
                    PublishStatus::Pending { since, .. } => *since,
                    _ => now,
                };
                state.publish = PublishStatus::Pending {
                    since, error: e.to_string()
                };
                state.last_publish_failure = Some(now);
            }
        }
        self.store_record(&state);
    }

    /// Publishes the current full CRL and its delta CRL, if any.
    fn publish_current(&self, destination: Option<&str>) -> CrlResult<u64> {
        let repository = &self.collaborators.repository;
        let publisher = &self.collaborators.publisher;

        let crl = repository.get_crl(&self.handle, false)?.ok_or_else(|| {
            Error::publish(format!("no CRL for '{}' yet", self.handle))
        })?;
        publisher.publish(&crl, destination)?;

        if let Some(delta) = repository.get_crl(&self.handle, true)? {
            if delta.base_crl_number() == Some(crl.crl_number()) {
                publisher.publish(&delta, destination)?;
                return Ok(delta.crl_number())
            }
        }
        Ok(crl.crl_number())
    }

    fn store_record(&self, state: &PointState) {
        if let Err(e) = self.storage.store_record(&state.record()) {
            warn!("Issuing point '{}': could not store record: {e}", self.handle);
        }
    }
}
