//! The stored state of an issuing point.

use std::sync::{Arc, Mutex};
use serde::{Deserialize, Serialize};
use crate::api::IssuingPointHandle;
use crate::commons::CrlResult;
use crate::stores::IssuingPointRepository;
use super::cache::{CacheRecord, Watermark};
use super::generator::GeneratedCrl;
use super::schedule::ScheduleState;


//------------ IssuingPointRecord --------------------------------------------

/// What an issuing point keeps between restarts besides its CRLs and cache.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct IssuingPointRecord {
    pub schedule: ScheduleState,

    /// Number of entries on the current full CRL.
    #[serde(default)]
    pub crl_size: usize,

    /// Whether the current CRL still has to be published.
    #[serde(default)]
    pub republish_pending: bool,
}


//------------ StoredPoint ---------------------------------------------------

/// Everything the repository holds for an issuing point.
#[derive(Clone, Debug, Default)]
pub struct StoredPoint {
    pub record: Option<IssuingPointRecord>,
    pub cache: Option<CacheRecord>,
    pub watermark: Watermark,
    pub crl: Option<GeneratedCrl>,
    pub delta_crl: Option<GeneratedCrl>,
}


//------------ PointStorage --------------------------------------------------

/// Serializes all writes of one issuing point to the repository.
///
/// It also remembers what was written last so that a slow writer cannot
/// replace newer pending changes with older ones, and the stored watermark
/// never falls behind the one in memory.
#[derive(Debug)]
pub struct PointStorage {
    handle: IssuingPointHandle,
    repo: Arc<dyn IssuingPointRepository>,
    written: Mutex<Written>,
}

#[derive(Debug, Default)]
struct Written {
    cache_version: u64,
    watermark: Watermark,
}

impl PointStorage {
    pub fn new(
        handle: IssuingPointHandle, repo: Arc<dyn IssuingPointRepository>
    ) -> Self {
        PointStorage { handle, repo, written: Mutex::new(Written::default()) }
    }

    pub fn handle(&self) -> &IssuingPointHandle {
        &self.handle
    }

    pub fn load(&self) -> CrlResult<StoredPoint> {
        let mut written = self.written.lock().expect("poisoned lock");
        let stored = StoredPoint {
            record: self.repo.get_record(&self.handle)?,
            cache: self.repo.get_cache(&self.handle)?,
            watermark: self.repo.get_watermark(&self.handle)?,
            crl: self.repo.get_crl(&self.handle, false)?,
            delta_crl: self.repo.get_crl(&self.handle, true)?,
        };
        written.watermark = stored.watermark;
        Ok(stored)
    }

    pub fn store_record(&self, record: &IssuingPointRecord) -> CrlResult<()> {
        let _written = self.written.lock().expect("poisoned lock");
        self.repo.store_record(&self.handle, record)
    }

    /// Stores a new CRL together with the record describing it.
    pub fn store_generated(
        &self, crl: &GeneratedCrl, record: &IssuingPointRecord
    ) -> CrlResult<()> {
        let _written = self.written.lock().expect("poisoned lock");
        self.repo.store_crl(&self.handle, crl, record)
    }

    /// Stores the pending changes of the cache at the given version.
    ///
    /// Returns `false` without writing if a later version was stored
    /// already.
    pub fn store_cache(
        &self, record: &CacheRecord, version: u64
    ) -> CrlResult<bool> {
        let mut written = self.written.lock().expect("poisoned lock");
        if written.cache_version > version {
            return Ok(false)
        }
        self.repo.store_cache(&self.handle, record)?;
        written.cache_version = version;
        Ok(true)
    }

    pub fn store_watermark(&self, watermark: Watermark) -> CrlResult<()> {
        let mut written = self.written.lock().expect("poisoned lock");
        if written.watermark != watermark {
            self.repo.store_watermark(&self.handle, watermark)?;
            written.watermark = watermark;
        }
        Ok(())
    }

    /// Makes sure the stored watermark covers `watermark`.
    pub fn raise_watermark(&self, watermark: Watermark) -> CrlResult<()> {
        let mut written = self.written.lock().expect("poisoned lock");
        let combined = written.watermark.combine(watermark);
        if combined != written.watermark {
            self.repo.store_watermark(&self.handle, combined)?;
            written.watermark = combined;
        }
        Ok(())
    }

    pub fn delete(&self) -> CrlResult<()> {
        let mut written = self.written.lock().expect("poisoned lock");
        self.repo.delete(&self.handle)?;
        *written = Written::default();
        Ok(())
    }
}
