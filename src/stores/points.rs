//! Persistence of issuing point state and CRLs.

use std::fmt;
use std::str::FromStr;
use log::warn;
use url::Url;
use crate::api::IssuingPointHandle;
use crate::commons::storage::{Key, KeyValueStore};
use crate::commons::CrlResult;
use crate::ipoint::{CacheRecord, GeneratedCrl, IssuingPointRecord, Watermark};

const NAMESPACE: &str = "issuing_points";

const RECORD: &str = "record.json";
const CACHE: &str = "cache.json";
const WATERMARK: &str = "watermark.json";
const CRL: &str = "crl.json";
const DELTA_CRL: &str = "delta_crl.json";


//------------ IssuingPointRepository ----------------------------------------

/// Stores everything an issuing point needs to continue after a restart.
pub trait IssuingPointRepository: fmt::Debug + Send + Sync {
    fn get_record(
        &self, ip: &IssuingPointHandle
    ) -> CrlResult<Option<IssuingPointRecord>>;

    fn store_record(
        &self, ip: &IssuingPointHandle, record: &IssuingPointRecord
    ) -> CrlResult<()>;

    fn get_cache(
        &self, ip: &IssuingPointHandle
    ) -> CrlResult<Option<CacheRecord>>;

    fn store_cache(
        &self, ip: &IssuingPointHandle, cache: &CacheRecord
    ) -> CrlResult<()>;

    /// Returns the stored watermark, clean if there is none.
    fn get_watermark(&self, ip: &IssuingPointHandle) -> CrlResult<Watermark>;

    fn store_watermark(
        &self, ip: &IssuingPointHandle, watermark: Watermark
    ) -> CrlResult<()>;

    /// Returns the current full or delta CRL.
    fn get_crl(
        &self, ip: &IssuingPointHandle, delta: bool
    ) -> CrlResult<Option<GeneratedCrl>>;

    /// Stores a new CRL and the record describing it in one go.
    fn store_crl(
        &self,
        ip: &IssuingPointHandle,
        crl: &GeneratedCrl,
        record: &IssuingPointRecord,
    ) -> CrlResult<()>;

    fn delete(&self, ip: &IssuingPointHandle) -> CrlResult<()>;

    /// Returns all issuing points with stored state.
    fn issuing_points(&self) -> CrlResult<Vec<IssuingPointHandle>>;
}


//------------ KvRepository --------------------------------------------------

/// An issuing point repository in a key value store.
///
/// Each issuing point uses its handle as scope.
#[derive(Debug)]
pub struct KvRepository {
    kv: KeyValueStore,
}

impl KvRepository {
    pub fn create(storage_uri: &Url) -> CrlResult<Self> {
        Ok(KvRepository {
            kv: KeyValueStore::create(storage_uri, NAMESPACE)?,
        })
    }

    fn key(ip: &IssuingPointHandle, name: &str) -> CrlResult<Key> {
        Ok(Key::new_scoped(ip.as_str(), name)?)
    }
}

impl IssuingPointRepository for KvRepository {
    fn get_record(
        &self, ip: &IssuingPointHandle
    ) -> CrlResult<Option<IssuingPointRecord>> {
        Ok(self.kv.get(&Self::key(ip, RECORD)?)?)
    }

    fn store_record(
        &self, ip: &IssuingPointHandle, record: &IssuingPointRecord
    ) -> CrlResult<()> {
        Ok(self.kv.store(&Self::key(ip, RECORD)?, record)?)
    }

    fn get_cache(
        &self, ip: &IssuingPointHandle
    ) -> CrlResult<Option<CacheRecord>> {
        Ok(self.kv.get(&Self::key(ip, CACHE)?)?)
    }

    fn store_cache(
        &self, ip: &IssuingPointHandle, cache: &CacheRecord
    ) -> CrlResult<()> {
        Ok(self.kv.store(&Self::key(ip, CACHE)?, cache)?)
    }

    fn get_watermark(&self, ip: &IssuingPointHandle) -> CrlResult<Watermark> {
        Ok(self.kv.get(&Self::key(ip, WATERMARK)?)?.unwrap_or_default())
    }

    fn store_watermark(
        &self, ip: &IssuingPointHandle, watermark: Watermark
    ) -> CrlResult<()> {
        Ok(self.kv.store(&Self::key(ip, WATERMARK)?, &watermark)?)
    }

    fn get_crl(
        &self, ip: &IssuingPointHandle, delta: bool
    ) -> CrlResult<Option<GeneratedCrl>> {
        let name = if delta { DELTA_CRL } else { CRL };
        Ok(self.kv.get(&Self::key(ip, name)?)?)
    }

    fn store_crl(
        &self,
        ip: &IssuingPointHandle,
        crl: &GeneratedCrl,
        record: &IssuingPointRecord,
    ) -> CrlResult<()> {
        let crl_key = Self::key(ip, if crl.is_delta() { DELTA_CRL } else { CRL })?;
        let delta_key = Self::key(ip, DELTA_CRL)?;
        let record_key = Self::key(ip, RECORD)?;
        self.kv.execute(Some(ip.as_str()), |kv| {
            kv.store(&crl_key, crl)?;
            if !crl.is_delta() {
                // A delta against an older full CRL is of no use any more.
                kv.drop_key(&delta_key)?;
            }
            kv.store(&record_key, record)
        })?;
        Ok(())
    }

    fn delete(&self, ip: &IssuingPointHandle) -> CrlResult<()> {
        Ok(self.kv.drop_scope(ip.as_str())?)
    }

    fn issuing_points(&self) -> CrlResult<Vec<IssuingPointHandle>> {
        let mut res = vec![];
        for scope in self.kv.scopes()? {
            match IssuingPointHandle::from_str(&scope) {
                Ok(handle) => res.push(handle),
                Err(e) => warn!("Ignoring stored issuing point: {e}"),
            }
        }
        Ok(res)
    }
}


//------------ Tests ---------------------------------------------------------
