//! Access to issued certificates and their revocation state.

use std::fmt;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;
use crate::api::{RevocationReason, RevokedEntry, Serial};
use crate::commons::error::Error;
use crate::commons::storage::{Key, KeyValueError, KeyValueStore};
use crate::commons::CrlResult;

const NAMESPACE: &str = "certificates";


//------------ StoredCertificate ---------------------------------------------

/// What the certificate store knows about an issued certificate.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StoredCertificate {
    pub serial: Serial,
    pub not_after: DateTime<Utc>,

    #[serde(default)]
    pub is_ca: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked: Option<RevokedEntry>,
}

impl StoredCertificate {
    pub fn new(serial: Serial, not_after: DateTime<Utc>) -> Self {
        StoredCertificate {
            serial,
            not_after,
            is_ca: false,
            profile: None,
            revoked: None,
        }
    }

    pub fn with_ca(mut self, is_ca: bool) -> Self {
        self.is_ca = is_ca;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Marks the certificate revoked and returns the CRL entry for it.
    pub fn revoke(
        &mut self, date: DateTime<Utc>, reason: RevocationReason
    ) -> RevokedEntry {
        let mut entry = RevokedEntry::new(self.serial.clone(), date, reason)
            .with_ca(self.is_ca);
        entry.profile = self.profile.clone();
        self.revoked = Some(entry.clone());
        entry
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after <= now
    }
}


//------------ RevokedQuery --------------------------------------------------

/// Selects revoked certificates for a full CRL.
#[derive(Clone, Debug)]
pub struct RevokedQuery {
    pub include_expired: bool,
    pub begin_serial: Option<Serial>,
    pub end_serial: Option<Serial>,

    /// Certificates that expired before this are left out unless
    /// `include_expired` is set.
    pub now: DateTime<Utc>,
}

impl RevokedQuery {
    pub fn matches(&self, cert: &StoredCertificate) -> bool {
        cert.revoked.is_some()
            && (self.include_expired || !cert.is_expired(self.now))
            && self.begin_serial.as_ref().is_none_or(|b| &cert.serial >= b)
            && self.end_serial.as_ref().is_none_or(|e| &cert.serial <= e)
    }
}


//------------ CertificateStore ----------------------------------------------

/// The source of truth for revocations.
///
/// Errors are reported as [`Error::CertStoreUnavailable`] so that callers
/// retry on a later cycle.
pub trait CertificateStore: fmt::Debug + Send + Sync {
    /// Returns up to `limit` revoked certificates matching the query with
    /// a serial above `after`, in ascending serial order.
    fn revoked_page(
        &self,
        query: &RevokedQuery,
        after: Option<&Serial>,
        limit: usize,
    ) -> CrlResult<Vec<RevokedEntry>>;

    fn lookup(&self, serial: &Serial) -> CrlResult<Option<StoredCertificate>>;
}


//------------ KvCertStore ---------------------------------------------------

/// A certificate store kept in a key value store.
#[derive(Debug)]
pub struct KvCertStore {
    kv: KeyValueStore,
}

impl KvCertStore {
    pub fn create(storage_uri: &Url) -> CrlResult<Self> {
        let kv = KeyValueStore::create(storage_uri, NAMESPACE)
            .map_err(Error::cert_store)?;
        Ok(KvCertStore { kv })
    }

    fn key(serial: &Serial) -> CrlResult<Key> {
        Key::new_global(&format!("{:x}.json", serial.as_biguint()))
            .map_err(Error::cert_store)
    }

    pub fn add(&self, cert: StoredCertificate) -> CrlResult<()> {
        self.kv
            .store(&Self::key(&cert.serial)?, &cert)
            .map_err(Error::cert_store)
    }

    /// Revokes a known certificate, returning its CRL entry.
    pub fn revoke(
        &self,
        serial: &Serial,
        date: DateTime<Utc>,
        reason: RevocationReason,
    ) -> CrlResult<RevokedEntry> {
        let key = Self::key(serial)?;
        self.kv
            .execute(None, |kv| {
                let mut cert: StoredCertificate = kv.get(&key)?.ok_or_else(|| {
                    KeyValueError::Other(format!(
                        "unknown certificate {serial}"
                    ))
                })?;
                let entry = cert.revoke(date, reason);
                kv.store(&key, &cert)?;
                Ok(entry)
            })
            .map_err(Error::cert_store)
    }

    /// Lifts the revocation of a certificate.
    ///
    /// Returns whether the certificate was revoked.
    pub fn unrevoke(&self, serial: &Serial) -> CrlResult<bool> {
        let key = Self::key(serial)?;
        self.kv
            .execute(None, |kv| {
                let Some(mut cert) = kv.get::<StoredCertificate>(&key)? else {
                    return Ok(false)
                };
                let revoked = cert.revoked.take().is_some();
                kv.store(&key, &cert)?;
                Ok(revoked)
            })
            .map_err(Error::cert_store)
    }

    fn all(&self) -> CrlResult<Vec<StoredCertificate>> {
        let mut res = vec![];
        for key in self.kv.keys(None).map_err(Error::cert_store)? {
            if let Some(cert) = self.kv.get(&key).map_err(Error::cert_store)? {
                res.push(cert);
            }
        }
        Ok(res)
    }
}

impl CertificateStore for KvCertStore {
    fn revoked_page(
        &self,
        query: &RevokedQuery,
        after: Option<&Serial>,
        limit: usize,
    ) -> CrlResult<Vec<RevokedEntry>> {
        let mut entries: Vec<RevokedEntry> = self
            .all()?
            .into_iter()
            .filter(|cert| query.matches(cert))
            .filter(|cert| after.is_none_or(|after| &cert.serial > after))
            .filter_map(|cert| cert.revoked)
            .collect();
        entries.sort_by(|a, b| a.serial.cmp(&b.serial));
        entries.truncate(limit);
        debug!("certificate store: {} revoked entries in page", entries.len());
        Ok(entries)
    }

    fn lookup(&self, serial: &Serial) -> CrlResult<Option<StoredCertificate>> {
        self.kv.get(&Self::key(serial)?).map_err(Error::cert_store)
    }
}


//------------ Tests ---------------------------------------------------------
