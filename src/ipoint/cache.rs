//! The revocation cache of an issuing point.
//!
//! The cache holds the content of the last full CRL (the committed set)
//! and all changes since then (the pending sets). Full CRLs are built by
//! merging the pending sets into the committed set, delta CRLs list the
//! pending sets.
//!
//! Pending changes are written to the repository periodically. Until they
//! are, the watermark tells where in the request log recovery has to start
//! if the process dies.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use chrono::{DateTime, Utc};
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use crate::api::{IssuingPointHandle, RevokedEntry, Serial};
use crate::commons::CrlResult;
use crate::stores::{
    CertificateStore, LoggedRequest, RequestKind, RequestLog, RevokedQuery,
};
use super::config::ContentFilter;
use super::record::PointStorage;

const PAGE_SIZE: usize = 500;

pub type EntryMap = BTreeMap<Serial, RevokedEntry>;


//------------ Watermark -----------------------------------------------------

/// Where recovery has to start after a crash.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "request")]
pub enum Watermark {
    /// All changes are stored.
    #[default]
    Clean,

    /// Changes from this request on may not be stored.
    At(u64),

    /// Changes may be missing that are not in the request log.
    NeedsRebuild,
}

impl Watermark {
    pub fn is_clean(self) -> bool {
        self == Watermark::Clean
    }

    /// Returns the watermark covering both `self` and `other`.
    pub fn combine(self, other: Watermark) -> Watermark {
        match (self, other) {
            (Watermark::NeedsRebuild, _) | (_, Watermark::NeedsRebuild) => {
                Watermark::NeedsRebuild
            }
            (Watermark::At(a), Watermark::At(b)) => Watermark::At(a.min(b)),
            (Watermark::At(a), Watermark::Clean)
            | (Watermark::Clean, Watermark::At(a)) => Watermark::At(a),
            (Watermark::Clean, Watermark::Clean) => Watermark::Clean,
        }
    }

    /// Returns the watermark after a change caused by the given request.
    ///
    /// Changes without a request cannot be replayed from the log.
    fn after_change(self, request_id: Option<u64>) -> Watermark {
        self.combine(match request_id {
            Some(id) => Watermark::At(id),
            None => Watermark::NeedsRebuild,
        })
    }
}


//------------ CacheSettings -------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheSettings {
    pub enabled: bool,

    /// Minutes between writes of pending changes, zero writes every
    /// change right away.
    pub flush_interval: u32,

    /// Expiry notifications are ignored when expired certificates stay on
    /// the CRL.
    pub include_expired: bool,
}


//------------ CacheState ----------------------------------------------------

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CacheState {
    pub committed: EntryMap,
    pub pending_revoked: EntryMap,
    pub pending_unrevoked: EntryMap,
    pub pending_expired: EntryMap,

    /// Expired entries kept on the last full CRL one more time.
    pub deferred_expired: BTreeSet<Serial>,

    pub watermark: Watermark,

    /// Whether pending changes differ from the stored ones.
    pub dirty: bool,

    version: u64,
}

impl CacheState {
    fn revoke(&mut self, entry: RevokedEntry) -> bool {
        let serial = entry.serial.clone();
        if self.pending_unrevoked.remove(&serial).is_some() {
            true
        } else if self.committed.get(&serial) == Some(&entry)
            || self.pending_revoked.get(&serial) == Some(&entry)
        {
            false
        } else {
            self.pending_revoked.insert(serial, entry);
            true
        }
    }

    fn unrevoke(&mut self, serial: &Serial, date: DateTime<Utc>) -> bool {
        if self.pending_revoked.remove(serial).is_some() {
            return true
        }
        if self.pending_unrevoked.contains_key(serial) {
            return false
        }
        let entry = match self.committed.get(serial) {
            Some(entry) => entry.clone(),
            None => RevokedEntry::new(
                serial.clone(), date, crate::api::RevocationReason::RemoveFromCrl
            ),
        };
        self.pending_unrevoked.insert(serial.clone(), entry);
        true
    }

    fn expire(&mut self, serial: &Serial) -> bool {
        if self.pending_revoked.remove(serial).is_some() {
            return true
        }
        if self.pending_expired.contains_key(serial)
            || self.pending_unrevoked.contains_key(serial)
        {
            return false
        }
        match self.committed.get(serial) {
            Some(entry) => {
                self.pending_expired.insert(serial.clone(), entry.clone());
                true
            }
            None => false,
        }
    }

    fn touch(&mut self) {
        self.version += 1;
        self.dirty = true;
    }

    /// Drops pending changes that are already part of the committed set.
    ///
    /// These are left behind when the process stopped between storing a
    /// full CRL and storing the cache.
    fn normalize(&mut self) {
        let committed = &self.committed;
        self.pending_revoked.retain(|s, e| committed.get(s) != Some(e));
        self.pending_expired.retain(|s, _| committed.contains_key(s));
        self.deferred_expired.retain(|s| committed.contains_key(s));
    }

    fn record(&self) -> CacheRecord {
        CacheRecord {
            pending_revoked: self.pending_revoked.values().cloned().collect(),
            pending_unrevoked: self
                .pending_unrevoked
                .values()
                .cloned()
                .collect(),
            pending_expired: self.pending_expired.values().cloned().collect(),
            deferred_expired: self.deferred_expired.iter().cloned().collect(),
        }
    }
}


//------------ Change --------------------------------------------------------

/// A change recorded while a full CRL is being built.
#[derive(Clone, Debug)]
enum Change {
    Revoked(RevokedEntry),
    Unrevoked(Serial, DateTime<Utc>),
    Expired(Serial),
}

impl Change {
    fn apply(&self, state: &mut CacheState) -> bool {
        match self {
            Change::Revoked(entry) => state.revoke(entry.clone()),
            Change::Unrevoked(serial, date) => state.unrevoke(serial, *date),
            Change::Expired(serial) => state.expire(serial),
        }
    }
}


//------------ CacheRecord ---------------------------------------------------

/// The stored form of the pending changes.
///
/// The committed set is not part of this: it is the content of the last
/// stored full CRL.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CacheRecord {
    #[serde(default)]
    pub pending_revoked: Vec<RevokedEntry>,

    #[serde(default)]
    pub pending_unrevoked: Vec<RevokedEntry>,

    #[serde(default)]
    pub pending_expired: Vec<RevokedEntry>,

    #[serde(default)]
    pub deferred_expired: Vec<Serial>,
}

fn to_map(entries: Vec<RevokedEntry>) -> EntryMap {
    entries.into_iter().map(|e| (e.serial.clone(), e)).collect()
}


//------------ CacheSnapshot -------------------------------------------------

/// A copy of the cache taken before building a CRL.
#[derive(Clone, Debug)]
pub struct CacheSnapshot {
    pub committed: EntryMap,
    pub pending_revoked: EntryMap,
    pub pending_unrevoked: EntryMap,
    pub pending_expired: EntryMap,
    pub deferred_expired: BTreeSet<Serial>,
    pub needs_rebuild: bool,
    version: u64,
}

impl CacheSnapshot {
    /// Returns the content of the next full CRL and the expired entries
    /// that stay on it one more time.
    pub fn full_content(
        &self, filter: &ContentFilter
    ) -> (EntryMap, BTreeSet<Serial>) {
        let mut content = self.committed.clone();
        for serial in &self.deferred_expired {
            content.remove(serial);
        }
        for (serial, entry) in &self.pending_revoked {
            content.insert(serial.clone(), entry.clone());
        }
        for serial in self.pending_unrevoked.keys() {
            content.remove(serial);
        }

        let mut deferred = BTreeSet::new();
        if !filter.include_expired {
            for serial in self.pending_expired.keys() {
                if filter.expired_one_extra_time {
                    if content.contains_key(serial) {
                        deferred.insert(serial.clone());
                    }
                } else {
                    content.remove(serial);
                }
            }
        }

        content.retain(|_, entry| filter.accepts(entry));
        deferred.retain(|serial| content.contains_key(serial));
        (content, deferred)
    }

    /// Returns the content of a delta CRL against the last full CRL.
    pub fn delta_content(
        &self, filter: &ContentFilter, date: DateTime<Utc>
    ) -> EntryMap {
        let mut content = EntryMap::new();
        let mut remove = |entry: &RevokedEntry| {
            if self.committed.contains_key(&entry.serial) {
                let marker = entry.removal_marker(date);
                if filter.accepts(&marker) {
                    content.insert(marker.serial.clone(), marker);
                }
            }
        };

        for entry in self.pending_unrevoked.values() {
            remove(entry);
        }
        if !filter.include_expired {
            if !filter.expired_one_extra_time {
                for entry in self.pending_expired.values() {
                    remove(entry);
                }
            }
            for serial in &self.deferred_expired {
                if let Some(entry) = self.committed.get(serial) {
                    remove(entry);
                }
            }
        }
        for (serial, entry) in &self.pending_revoked {
            if filter.accepts(entry) {
                content.insert(serial.clone(), entry.clone());
            }
        }
        content
    }

    /// Marks a committed entry as expired in this snapshot only.
    ///
    /// The cache itself learns about it when the snapshot is committed.
    pub fn expire(&mut self, serial: &Serial) -> bool {
        if self.pending_revoked.remove(serial).is_some() {
            return true
        }
        if self.pending_expired.contains_key(serial)
            || self.pending_unrevoked.contains_key(serial)
        {
            return false
        }
        match self.committed.get(serial) {
            Some(entry) => {
                self.pending_expired.insert(serial.clone(), entry.clone());
                true
            }
            None => false,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending_revoked.len()
            + self.pending_unrevoked.len()
            + self.pending_expired.len()
    }
}


//------------ RevocationCache -----------------------------------------------

/// The revocation cache of one issuing point.
///
/// All mutation happens under the cache lock. Writes to the repository go
/// through [`PointStorage`], whose lock may be taken while holding the
/// cache lock but never the other way around.
#[derive(Debug)]
pub struct RevocationCache {
    handle: IssuingPointHandle,
    storage: Arc<PointStorage>,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: CacheState,
    settings: CacheSettings,

    /// Changes since the last snapshot, `None` if the cache was cleared or
    /// restored since.
    changes: Option<Vec<Change>>,
}

impl Inner {
    fn apply(&mut self, change: Change) -> bool {
        if !change.apply(&mut self.state) {
            return false
        }
        if let Some(changes) = self.changes.as_mut() {
            changes.push(change);
        }
        true
    }
}

impl RevocationCache {
    pub fn new(
        handle: IssuingPointHandle,
        storage: Arc<PointStorage>,
        settings: CacheSettings,
    ) -> Self {
        RevocationCache {
            handle,
            storage,
            inner: Mutex::new(Inner {
                state: CacheState {
                    watermark: Watermark::NeedsRebuild,
                    ..Default::default()
                },
                settings,
                changes: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("poisoned lock")
    }

    pub fn settings(&self) -> CacheSettings {
        self.lock().settings
    }

    pub fn set_settings(&self, settings: CacheSettings) {
        self.lock().settings = settings;
    }

    /// Restores the cache from its stored parts.
    pub fn restore(
        &self,
        committed: Vec<RevokedEntry>,
        record: CacheRecord,
        watermark: Watermark,
    ) {
        let mut inner = self.lock();
        let mut state = CacheState {
            committed: to_map(committed),
            pending_revoked: to_map(record.pending_revoked),
            pending_unrevoked: to_map(record.pending_unrevoked),
            pending_expired: to_map(record.pending_expired),
            deferred_expired: record.deferred_expired.into_iter().collect(),
            watermark,
            dirty: false,
            version: inner.state.version + 1,
        };
        state.normalize();
        inner.state = state;
        inner.changes = None;
    }
}

/// # Recording changes
impl RevocationCache {
    /// Records a revocation.
    ///
    /// Returns whether there are changes that still need to be written.
    pub fn record_revoked(
        &self, entry: RevokedEntry, request_id: Option<u64>
    ) -> CrlResult<bool> {
        let mut inner = self.lock();
        if !inner.settings.enabled {
            return Ok(false)
        }
        trace!("{}: revoked {}", self.handle, entry.serial);
        if !inner.apply(Change::Revoked(entry)) {
            return Ok(false)
        }
        self.changed(&mut inner, request_id)
    }

    /// Records that a revocation was lifted.
    pub fn record_unrevoked(
        &self,
        serial: &Serial,
        request_id: Option<u64>,
        date: DateTime<Utc>,
    ) -> CrlResult<bool> {
        let mut inner = self.lock();
        if !inner.settings.enabled {
            return Ok(false)
        }
        trace!("{}: unrevoked {serial}", self.handle);
        if !inner.apply(Change::Unrevoked(serial.clone(), date)) {
            return Ok(false)
        }
        self.changed(&mut inner, request_id)
    }

    /// Records that a revoked certificate expired.
    pub fn record_expired(&self, serial: &Serial) -> CrlResult<bool> {
        let mut inner = self.lock();
        if !inner.settings.enabled || inner.settings.include_expired {
            return Ok(false)
        }
        trace!("{}: expired {serial}", self.handle);
        if !inner.apply(Change::Expired(serial.clone())) {
            return Ok(false)
        }
        self.changed(&mut inner, None)
    }

    fn changed(
        &self, inner: &mut Inner, request_id: Option<u64>
    ) -> CrlResult<bool> {
        inner.state.touch();
        let watermark = inner.state.watermark.after_change(request_id);
        inner.state.watermark = watermark;

        if inner.settings.flush_interval == 0 {
            self.storage.store_cache(
                &inner.state.record(), inner.state.version
            )?;
            self.storage.store_watermark(Watermark::Clean)?;
            inner.state.watermark = Watermark::Clean;
            inner.state.dirty = false;
            Ok(false)
        } else {
            self.storage.raise_watermark(watermark)?;
            Ok(true)
        }
    }
}

/// # Writing and committing
impl RevocationCache {
    /// Writes pending changes to the repository.
    ///
    /// The pending sets are copied under the cache lock and written without
    /// it. The watermark is only set to clean if nothing changed in the
    /// meantime.
    pub fn flush(&self) -> CrlResult<()> {
        let (record, version) = {
            let inner = self.lock();
            if !inner.state.dirty {
                return Ok(())
            }
            (inner.state.record(), inner.state.version)
        };

        if !self.storage.store_cache(&record, version)? {
            debug!("{}: newer cache already stored", self.handle);
        }

        let mut inner = self.lock();
        if inner.state.version == version {
            inner.state.dirty = false;
            if let Watermark::At(_) = inner.state.watermark {
                self.storage.store_watermark(Watermark::Clean)?;
                inner.state.watermark = Watermark::Clean;
            }
        }
        Ok(())
    }

    /// Writes the cache and marks it clean, used on shutdown.
    pub fn flush_clean(&self) -> CrlResult<()> {
        let mut inner = self.lock();
        if inner.state.dirty {
            self.storage.store_cache(
                &inner.state.record(), inner.state.version
            )?;
            inner.state.dirty = false;
        }
        if let Watermark::At(_) = inner.state.watermark {
            self.storage.store_watermark(Watermark::Clean)?;
            inner.state.watermark = Watermark::Clean;
        }
        Ok(())
    }

    /// Takes a copy of the cache.
    ///
    /// Changes from now on are kept until the next snapshot so that
    /// [`commit`](Self::commit) can apply them on top of the new CRL.
    pub fn snapshot(&self) -> CacheSnapshot {
        let mut inner = self.lock();
        inner.changes = Some(Vec::new());
        let state = &inner.state;
        CacheSnapshot {
            committed: state.committed.clone(),
            pending_revoked: state.pending_revoked.clone(),
            pending_unrevoked: state.pending_unrevoked.clone(),
            pending_expired: state.pending_expired.clone(),
            deferred_expired: state.deferred_expired.clone(),
            needs_rebuild: state.watermark == Watermark::NeedsRebuild,
            version: state.version,
        }
    }

    /// Makes the content of a stored full CRL the committed set.
    ///
    /// The CRL contains all pending changes of the snapshot. Changes
    /// recorded after the snapshot become the new pending changes.
    pub fn commit(
        &self,
        snapshot: &CacheSnapshot,
        committed: EntryMap,
        deferred: BTreeSet<Serial>,
    ) -> CrlResult<()> {
        let mut inner = self.lock();
        let Some(changes) = inner.changes.take() else {
            debug!(
                "{}: cache cleared while building the CRL, not committing",
                self.handle
            );
            return Ok(())
        };

        let state = &mut inner.state;
        state.committed = committed;
        state.deferred_expired = deferred;
        state.pending_revoked.clear();
        state.pending_unrevoked.clear();
        state.pending_expired.clear();
        for change in &changes {
            change.apply(state);
        }
        state.normalize();

        let unchanged = state.version == snapshot.version;
        state.touch();

        if unchanged && state.watermark == Watermark::NeedsRebuild {
            self.storage.store_watermark(Watermark::Clean)?;
            state.watermark = Watermark::Clean;
        }
        Ok(())
    }

    /// Drops all cached content.
    ///
    /// The next full CRL is rebuilt from the certificate store.
    pub fn clear(&self) -> CrlResult<()> {
        let mut inner = self.lock();
        let state = &mut inner.state;
        state.committed.clear();
        state.pending_revoked.clear();
        state.pending_unrevoked.clear();
        state.pending_expired.clear();
        state.deferred_expired.clear();
        state.touch();
        state.watermark = Watermark::NeedsRebuild;
        inner.changes = None;
        self.storage.raise_watermark(Watermark::NeedsRebuild)?;
        info!("{}: revocation cache cleared", self.handle);
        Ok(())
    }
}

/// # Recovery
impl RevocationCache {
    /// Replays completed requests from the request log.
    ///
    /// Requests are applied the same way as live notifications, so
    /// replaying the same requests again does not change the result.
    /// Returns the number of requests replayed.
    pub fn rebuild_from_request_log(
        &self,
        log: &dyn RequestLog,
        from: u64,
        filter: &ContentFilter,
        now: DateTime<Utc>,
    ) -> CrlResult<usize> {
        let mut next = from;
        let mut count = 0;
        loop {
            let page = log.completed_since(next, PAGE_SIZE)?;
            let Some(last) = page.last() else { break };
            next = last.id + 1;
            let page_len = page.len();

            let mut inner = self.lock();
            for LoggedRequest { kind, .. } in page {
                match kind {
                    RequestKind::Revoke(entry) => {
                        if filter.in_range(&entry.serial) {
                            inner.apply(Change::Revoked(entry));
                        }
                    }
                    RequestKind::Unrevoke(serial) => {
                        if filter.in_range(&serial) {
                            inner.apply(Change::Unrevoked(serial, now));
                        }
                    }
                }
            }
            inner.state.touch();
            drop(inner);

            count += page_len;
            if page_len < PAGE_SIZE {
                break
            }
        }
        info!(
            "{}: replayed {count} requests from request {from}", self.handle
        );
        Ok(count)
    }

    /// Replaces the committed set with the revoked certificates in the
    /// certificate store.
    pub fn rebuild_full(
        &self,
        store: &dyn CertificateStore,
        filter: &ContentFilter,
        now: DateTime<Utc>,
    ) -> CrlResult<usize> {
        let query = RevokedQuery {
            include_expired: filter.include_expired,
            begin_serial: filter.begin_serial.clone(),
            end_serial: filter.end_serial.clone(),
            now,
        };

        let mut committed = EntryMap::new();
        let mut after: Option<Serial> = None;
        loop {
            let page = store.revoked_page(&query, after.as_ref(), PAGE_SIZE)?;
            let Some(last) = page.last() else { break };
            after = Some(last.serial.clone());
            let page_len = page.len();
            for entry in page {
                if filter.accepts(&entry) {
                    committed.insert(entry.serial.clone(), entry);
                }
            }
            if page_len < PAGE_SIZE {
                break
            }
        }

        let count = committed.len();
        let mut inner = self.lock();
        inner.state.committed = committed;
        inner.state.deferred_expired.clear();
        inner.state.normalize();
        inner.state.touch();
        info!(
            "{}: rebuilt cache with {count} revoked certificates", self.handle
        );
        Ok(count)
    }
}

/// # Status
impl RevocationCache {
    pub fn is_empty(&self) -> bool {
        let inner = self.lock();
        inner.state.committed.is_empty()
            && inner.state.pending_revoked.is_empty()
            && inner.state.pending_unrevoked.is_empty()
            && inner.state.pending_expired.is_empty()
    }

    /// Returns the number of committed entries.
    pub fn len(&self) -> usize {
        self.lock().state.committed.len()
    }

    pub fn pending_len(&self) -> usize {
        let inner = self.lock();
        inner.state.pending_revoked.len()
            + inner.state.pending_unrevoked.len()
            + inner.state.pending_expired.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().state.dirty
    }

    pub fn watermark(&self) -> Watermark {
        self.lock().state.watermark
    }

    pub fn needs_rebuild(&self) -> bool {
        self.watermark() == Watermark::NeedsRebuild
    }

    /// Returns the serials of all committed entries.
    pub fn committed_serials(&self) -> Vec<Serial> {
        self.lock().state.committed.keys().cloned().collect()
    }

    pub fn state(&self) -> CacheState {
        self.lock().state.clone()
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RevocationReason;
    use crate::stores::{KvCertStore, KvRepository, KvRequestLog};
    use crate::test;

    fn entry(serial: u64) -> RevokedEntry {
        RevokedEntry::new(
            Serial::from(serial),
            test::time("2024-03-01T00:00:00Z"),
            RevocationReason::KeyCompromise,
        )
    }

    fn cache(flush_interval: u32) -> (RevocationCache, Arc<PointStorage>) {
        let handle = test::handle("master");
        let repo = Arc::new(KvRepository::create(&test::mem_storage()).unwrap());
        let storage = Arc::new(PointStorage::new(handle.clone(), repo));
        let cache = RevocationCache::new(
            handle,
            storage.clone(),
            CacheSettings {
                enabled: true,
                flush_interval,
                include_expired: false,
            },
        );
        cache.restore(vec![], CacheRecord::default(), Watermark::Clean);
        (cache, storage)
    }

    fn committed(cache: &RevocationCache, entries: &[RevokedEntry]) {
        let snapshot = cache.snapshot();
        let content = entries
            .iter()
            .map(|e| (e.serial.clone(), e.clone()))
            .collect();
        cache.commit(&snapshot, content, BTreeSet::new()).unwrap();
    }

    #[test]
    fn revoke_then_unrevoke_cancels_out() {
        let (cache, _) = cache(15);
        let now = Utc::now();

        assert!(cache.record_revoked(entry(1), Some(1)).unwrap());
        cache.record_unrevoked(&Serial::from(1), Some(2), now).unwrap();

        let state = cache.state();
        assert!(state.pending_revoked.is_empty());
        assert!(state.pending_unrevoked.is_empty());
        assert_eq!(state.watermark, Watermark::At(1));
    }

    #[test]
    fn unrevoke_then_revoke_cancels_out() {
        let (cache, _) = cache(15);
        committed(&cache, &[entry(1)]);
        let now = Utc::now();

        cache.record_unrevoked(&Serial::from(1), Some(3), now).unwrap();
        assert_eq!(cache.state().pending_unrevoked.len(), 1);
        cache.record_revoked(entry(1), Some(4)).unwrap();

        let state = cache.state();
        assert!(state.pending_revoked.is_empty());
        assert!(state.pending_unrevoked.is_empty());
        assert!(state.committed.contains_key(&Serial::from(1)));
    }

    #[test]
    fn watermark_without_request_needs_rebuild() {
        let (cache, storage) = cache(15);
        cache.record_revoked(entry(1), Some(7)).unwrap();
        cache.record_revoked(entry(2), Some(5)).unwrap();
        assert_eq!(cache.watermark(), Watermark::At(5));
        assert_eq!(storage.load().unwrap().watermark, Watermark::At(5));

        cache.record_revoked(entry(3), None).unwrap();
        assert_eq!(cache.watermark(), Watermark::NeedsRebuild);
        assert_eq!(
            storage.load().unwrap().watermark, Watermark::NeedsRebuild
        );
    }

    #[test]
    fn flush_stores_pending_and_cleans_watermark() {
        let (cache, storage) = cache(15);
        cache.record_revoked(entry(1), Some(1)).unwrap();
        assert!(cache.is_dirty());

        cache.flush().unwrap();
        assert!(!cache.is_dirty());
        assert_eq!(cache.watermark(), Watermark::Clean);

        let stored = storage.load().unwrap();
        assert_eq!(stored.watermark, Watermark::Clean);
        assert_eq!(stored.cache.unwrap().pending_revoked, vec![entry(1)]);
    }

    #[test]
    fn zero_flush_interval_writes_right_away() {
        let (cache, storage) = cache(0);
        assert!(!cache.record_revoked(entry(1), Some(1)).unwrap());
        assert_eq!(cache.watermark(), Watermark::Clean);
        assert!(!cache.is_dirty());

        let stored = storage.load().unwrap();
        assert_eq!(stored.cache.unwrap().pending_revoked.len(), 1);
    }

    #[test]
    fn full_content_merges_and_filters() {
        let (cache, _) = cache(15);
        committed(&cache, &[entry(1), entry(2), entry(3).with_ca(true)]);
        let now = Utc::now();

        cache.record_revoked(entry(4), Some(1)).unwrap();
        cache.record_revoked(entry(5).with_ca(true), Some(2)).unwrap();
        cache.record_unrevoked(&Serial::from(2), Some(3), now).unwrap();
        cache.record_expired(&Serial::from(1)).unwrap();

        let snapshot = cache.snapshot();
        let filter = ContentFilter::default();
        let (content, deferred) = snapshot.full_content(&filter);
        assert_eq!(
            content.keys().cloned().collect::<Vec<_>>(),
            vec![Serial::from(3), Serial::from(4), Serial::from(5)]
        );
        assert!(deferred.is_empty());

        let filter = ContentFilter { ca_certs_only: true, ..Default::default() };
        let (content, _) = snapshot.full_content(&filter);
        assert_eq!(
            content.keys().cloned().collect::<Vec<_>>(),
            vec![Serial::from(3), Serial::from(5)]
        );
    }

    #[test]
    fn delta_content_lists_changes() {
        let (cache, _) = cache(15);
        committed(&cache, &[entry(1), entry(2)]);
        let now = Utc::now();

        cache.record_revoked(entry(3), Some(1)).unwrap();
        cache.record_unrevoked(&Serial::from(1), Some(2), now).unwrap();
        cache.record_expired(&Serial::from(2)).unwrap();
        // Never on the base CRL, so no removal marker.
        cache.record_unrevoked(&Serial::from(9), Some(3), now).unwrap();

        let delta = cache.snapshot().delta_content(&ContentFilter::default(), now);
        let reasons: Vec<_> = delta.values().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            vec![
                RevocationReason::RemoveFromCrl,
                RevocationReason::RemoveFromCrl,
                RevocationReason::KeyCompromise,
            ]
        );
    }

    #[test]
    fn expired_entries_stay_one_extra_full_crl() {
        let (cache, _) = cache(15);
        committed(&cache, &[entry(1), entry(2)]);
        let filter = ContentFilter {
            expired_one_extra_time: true,
            ..Default::default()
        };

        cache.record_expired(&Serial::from(1)).unwrap();

        // The first full CRL after expiry still has the entry.
        let snapshot = cache.snapshot();
        let (content, deferred) = snapshot.full_content(&filter);
        assert!(content.contains_key(&Serial::from(1)));
        assert_eq!(deferred.len(), 1);
        cache.commit(&snapshot, content, deferred).unwrap();
        assert!(cache.state().pending_expired.is_empty());

        // Deltas against it announce the removal.
        let delta = cache.snapshot().delta_content(&filter, Utc::now());
        assert!(delta[&Serial::from(1)].is_removal_marker());

        // The next one drops it.
        let snapshot = cache.snapshot();
        let (content, deferred) = snapshot.full_content(&filter);
        assert!(!content.contains_key(&Serial::from(1)));
        assert!(deferred.is_empty());
    }

    #[test]
    fn commit_keeps_changes_made_after_snapshot() {
        let (cache, _) = cache(15);
        cache.record_revoked(entry(1), Some(1)).unwrap();

        let snapshot = cache.snapshot();
        cache.record_revoked(entry(2), Some(2)).unwrap();

        let (content, deferred) = snapshot.full_content(&ContentFilter::default());
        cache.commit(&snapshot, content, deferred).unwrap();

        let state = cache.state();
        assert_eq!(state.committed.len(), 1);
        assert_eq!(
            state.pending_revoked.keys().cloned().collect::<Vec<_>>(),
            vec![Serial::from(2)]
        );
    }

    #[test]
    fn revoke_again_while_building_stays_revoked() {
        let (cache, _) = cache(15);
        committed(&cache, &[entry(1)]);
        let filter = ContentFilter::default();

        cache.record_unrevoked(&Serial::from(1), Some(1), Utc::now()).unwrap();
        let snapshot = cache.snapshot();
        cache.record_revoked(entry(1), Some(2)).unwrap();

        let (content, deferred) = snapshot.full_content(&filter);
        assert!(content.is_empty());
        cache.commit(&snapshot, content, deferred).unwrap();

        let snapshot = cache.snapshot();
        assert_eq!(
            snapshot.pending_revoked.keys().cloned().collect::<Vec<_>>(),
            vec![Serial::from(1)]
        );
        let (content, _) = snapshot.full_content(&filter);
        assert!(content.contains_key(&Serial::from(1)));
        let delta = snapshot.delta_content(&filter, Utc::now());
        assert_eq!(delta[&Serial::from(1)], entry(1));
    }

    #[test]
    fn unrevoke_while_building_is_removed_next_time() {
        let (cache, _) = cache(15);
        let filter = ContentFilter::default();
        let now = Utc::now();

        cache.record_revoked(entry(1), Some(1)).unwrap();
        let snapshot = cache.snapshot();
        cache.record_unrevoked(&Serial::from(1), Some(2), now).unwrap();

        let (content, deferred) = snapshot.full_content(&filter);
        assert!(content.contains_key(&Serial::from(1)));
        cache.commit(&snapshot, content, deferred).unwrap();

        let snapshot = cache.snapshot();
        let (content, _) = snapshot.full_content(&filter);
        assert!(!content.contains_key(&Serial::from(1)));
        let delta = snapshot.delta_content(&filter, now);
        assert_eq!(delta.len(), 1);
        assert!(delta[&Serial::from(1)].is_removal_marker());
    }

    #[test]
    fn clear_while_building_skips_commit() {
        let (cache, _) = cache(15);
        cache.record_revoked(entry(1), Some(1)).unwrap();

        let snapshot = cache.snapshot();
        cache.clear().unwrap();
        let (content, deferred) =
            snapshot.full_content(&ContentFilter::default());
        cache.commit(&snapshot, content, deferred).unwrap();

        assert!(cache.is_empty());
        assert!(cache.needs_rebuild());
    }

    #[test]
    fn expiry_in_snapshot_leaves_cache_alone() {
        let (cache, _) = cache(15);
        committed(&cache, &[entry(1), entry(2)]);

        let mut snapshot = cache.snapshot();
        assert!(snapshot.expire(&Serial::from(1)));
        assert!(!snapshot.expire(&Serial::from(1)));
        assert!(!snapshot.expire(&Serial::from(3)));
        assert_eq!(cache.pending_len(), 0);

        let (content, deferred) =
            snapshot.full_content(&ContentFilter::default());
        assert_eq!(
            content.keys().cloned().collect::<Vec<_>>(),
            vec![Serial::from(2)]
        );
        cache.commit(&snapshot, content, deferred).unwrap();
        assert_eq!(cache.committed_serials(), vec![Serial::from(2)]);
        assert_eq!(cache.pending_len(), 0);
    }

    #[test]
    fn replay_is_idempotent() {
        let (cache, _) = cache(15);
        committed(&cache, &[entry(1)]);

        let log = KvRequestLog::create(&test::mem_storage()).unwrap();
        let first = log.append(RequestKind::Revoke(entry(2))).unwrap();
        log.append(RequestKind::Unrevoke(Serial::from(1))).unwrap();
        log.append(RequestKind::Revoke(entry(3))).unwrap();
        log.append(RequestKind::Unrevoke(Serial::from(3))).unwrap();
        log.append(RequestKind::Revoke(entry(1))).unwrap();

        let filter = ContentFilter::default();
        let now = Utc::now();

        assert_eq!(
            cache.rebuild_from_request_log(&log, first, &filter, now).unwrap(),
            5
        );
        let once = cache.state();

        cache.rebuild_from_request_log(&log, first, &filter, now).unwrap();
        let twice = cache.state();

        assert_eq!(once.pending_revoked, twice.pending_revoked);
        assert_eq!(once.pending_unrevoked, twice.pending_unrevoked);
        assert_eq!(once.pending_expired, twice.pending_expired);
        assert_eq!(
            once.pending_revoked.keys().cloned().collect::<Vec<_>>(),
            vec![Serial::from(2)]
        );
        assert!(once.pending_unrevoked.is_empty());
    }

    #[test]
    fn clear_and_rebuild_from_store() {
        let (cache, storage) = cache(15);
        committed(&cache, &[entry(1)]);

        let certs = KvCertStore::create(&test::mem_storage()).unwrap();
        certs.add(test::revoked_cert(5, false)).unwrap();
        certs.add(test::revoked_cert(6, true)).unwrap();
        certs.add(test::valid_cert(7)).unwrap();

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert!(cache.needs_rebuild());
        assert_eq!(
            storage.load().unwrap().watermark, Watermark::NeedsRebuild
        );

        let filter = ContentFilter { ca_certs_only: true, ..Default::default() };
        assert_eq!(cache.rebuild_full(&certs, &filter, Utc::now()).unwrap(), 1);
        assert_eq!(cache.committed_serials(), vec![Serial::from(6)]);
    }

    #[test]
    fn disabled_cache_ignores_notifications() {
        let (cache, _) = cache(15);
        cache.set_settings(CacheSettings {
            enabled: false,
            flush_interval: 15,
            include_expired: false,
        });
        assert!(!cache.record_revoked(entry(1), Some(1)).unwrap());
        assert!(cache.is_empty());
    }
}
