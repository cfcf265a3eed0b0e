//! Building, signing, storing and publishing CRLs.

use std::fmt;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use crate::api::{IssuingPointHandle, RevokedEntry};
use crate::commons::crypto::{Signature, SigningAlgorithm};
use crate::commons::error::Error;
use crate::commons::CrlResult;
use super::cache::{CacheSnapshot, RevocationCache};
use super::config::IssuingPointConfig;
use super::record::{IssuingPointRecord, PointStorage};
use super::schedule::{ScheduleCalculator, ScheduleState};
use super::Collaborators;


//------------ TbsCrl --------------------------------------------------------

/// The signed part of a CRL.
///
/// The signature covers the compact JSON encoding of this structure with
/// entries in ascending serial order.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TbsCrl {
    pub issuing_point: IssuingPointHandle,
    pub crl_number: u64,

    /// The number of the full CRL a delta CRL applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_crl_number: Option<u64>,

    pub this_update: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_update: Option<DateTime<Utc>>,

    pub algorithm: SigningAlgorithm,
    pub entries: Vec<RevokedEntry>,
}

impl TbsCrl {
    pub fn is_delta(&self) -> bool {
        self.base_crl_number.is_some()
    }

    pub fn to_signed_data(&self) -> CrlResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::CrlEncoding(e.to_string()))
    }
}


//------------ GeneratedCrl --------------------------------------------------

/// A signed full or delta CRL.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GeneratedCrl {
    #[serde(flatten)]
    tbs: TbsCrl,
    signature: Signature,
}

impl GeneratedCrl {
    pub fn new(tbs: TbsCrl, signature: Signature) -> Self {
        GeneratedCrl { tbs, signature }
    }

    pub fn tbs(&self) -> &TbsCrl {
        &self.tbs
    }

    pub fn issuing_point(&self) -> &IssuingPointHandle {
        &self.tbs.issuing_point
    }

    pub fn crl_number(&self) -> u64 {
        self.tbs.crl_number
    }

    pub fn base_crl_number(&self) -> Option<u64> {
        self.tbs.base_crl_number
    }

    pub fn is_delta(&self) -> bool {
        self.tbs.is_delta()
    }

    pub fn this_update(&self) -> DateTime<Utc> {
        self.tbs.this_update
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.tbs.next_update
    }

    pub fn entries(&self) -> &[RevokedEntry] {
        &self.tbs.entries
    }

    pub fn len(&self) -> usize {
        self.tbs.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tbs.entries.is_empty()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Returns the encoding that is stored and published.
    pub fn to_bytes(&self) -> CrlResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| Error::CrlEncoding(e.to_string()))
    }
}

impl fmt::Display for GeneratedCrl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.tbs.base_crl_number {
            Some(base) => write!(
                f, "delta CRL {} (base {base}) of '{}' with {} entries",
                self.tbs.crl_number, self.tbs.issuing_point, self.len()
            ),
            None => write!(
                f, "CRL {} of '{}' with {} entries",
                self.tbs.crl_number, self.tbs.issuing_point, self.len()
            ),
        }
    }
}


//------------ GenerationKind ------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GenerationKind {
    Full,

    /// A delta CRL, leaving the schema counter at the given value.
    Delta { schema_counter: u32 },
}


//------------ CycleOutcome --------------------------------------------------

#[derive(Debug)]
pub enum CycleOutcome {
    /// A CRL was stored. Publication may still have failed.
    Generated {
        crl: GeneratedCrl,
        state: ScheduleState,
        published: Result<(), String>,
    },

    /// Nothing was issued.
    Skipped { reason: String },
}


//------------ CrlGenerator --------------------------------------------------

/// Runs one generation cycle of an issuing point.
///
/// Nothing changes if building or signing fails. Once a CRL is stored it
/// is the current CRL, even if it cannot be published.
pub struct CrlGenerator<'a> {
    pub handle: &'a IssuingPointHandle,
    pub config: &'a IssuingPointConfig,
    pub calculator: &'a ScheduleCalculator,
    pub cache: &'a RevocationCache,
    pub storage: &'a PointStorage,
    pub collaborators: &'a Collaborators,
}

impl CrlGenerator<'_> {
    pub fn generate(
        &self,
        kind: GenerationKind,
        schedule: &ScheduleState,
        now: DateTime<Utc>,
        algorithm: SigningAlgorithm,
    ) -> CrlResult<CycleOutcome> {
        match kind {
            GenerationKind::Full => self.generate_full(schedule, now, algorithm),
            GenerationKind::Delta { schema_counter } => {
                self.generate_delta(schedule, now, algorithm, schema_counter)
            }
        }
    }

    fn generate_full(
        &self,
        schedule: &ScheduleState,
        now: DateTime<Utc>,
        algorithm: SigningAlgorithm,
    ) -> CrlResult<CycleOutcome> {
        let filter = self.config.filter();
        let certs = self.collaborators.certs.as_ref();

        let rebuild =
            !self.cache.settings().enabled || self.cache.needs_rebuild();
        if rebuild {
            self.cache.rebuild_full(certs, &filter, now)?;
        }

        let mut snapshot = self.cache.snapshot();
        if !rebuild && !filter.include_expired {
            self.sweep_expired(&mut snapshot, now)?;
        }
        let (content, deferred) = snapshot.full_content(&filter);
        if content.is_empty() && self.config.no_crl_if_empty {
            return Ok(CycleOutcome::Skipped {
                reason: "no revoked certificates".into(),
            })
        }

        let this_update = self.calculator.this_update(now);
        let mut state = schedule.clone();
        let crl_number = state.advance_full(this_update);
        let next_update =
            self.calculator.published_next_update(&state, now, true);
        state.next_update = next_update;
        state.next_delta_update = next_update;

        let tbs = TbsCrl {
            issuing_point: self.handle.clone(),
            crl_number,
            base_crl_number: None,
            this_update,
            next_update,
            algorithm,
            entries: content.values().map(|e| filter.prepare(e)).collect(),
        };
        let crl = self.sign(tbs)?;

        state.scheduled = self.calculator.next_update(&state, now, true, true);
        self.storage.store_generated(
            &crl,
            &IssuingPointRecord {
                schedule: state.clone(),
                crl_size: crl.len(),
                republish_pending: false,
            },
        )?;
        info!("Issuing point '{}': stored {crl}", self.handle);

        self.cache.commit(&snapshot, content, deferred)?;
        if let Err(e) = self.cache.flush() {
            warn!(
                "Issuing point '{}': could not store cache after CRL: {e}",
                self.handle
            );
        }

        let published = self.publish(&crl);
        Ok(CycleOutcome::Generated { crl, state, published })
    }

    fn generate_delta(
        &self,
        schedule: &ScheduleState,
        now: DateTime<Utc>,
        algorithm: SigningAlgorithm,
        schema_counter: u32,
    ) -> CrlResult<CycleOutcome> {
        let filter = self.config.filter();
        let this_update = self.calculator.this_update(now);

        let snapshot = self.cache.snapshot();
        let content = snapshot.delta_content(&filter, this_update);
        if content.is_empty()
            && (!self.config.always_update || self.config.no_crl_if_empty)
        {
            return Ok(CycleOutcome::Skipped {
                reason: "no changes since the last CRL".into(),
            })
        }

        let mut state = schedule.clone();
        let crl_number = state.advance_delta(this_update, schema_counter);
        let next_update =
            self.calculator.published_next_update(&state, now, false);
        state.next_delta_update = next_update;

        let tbs = TbsCrl {
            issuing_point: self.handle.clone(),
            crl_number,
            base_crl_number: Some(state.crl_number),
            this_update,
            next_update,
            algorithm,
            entries: content.values().map(|e| filter.prepare(e)).collect(),
        };
        let crl = self.sign(tbs)?;

        state.scheduled = self.calculator.next_update(&state, now, true, true);
        self.storage.store_generated(
            &crl,
            &IssuingPointRecord {
                schedule: state.clone(),
                crl_size: snapshot.committed.len(),
                republish_pending: false,
            },
        )?;
        info!("Issuing point '{}': stored {crl}", self.handle);

        let published = self.publish(&crl);
        Ok(CycleOutcome::Generated { crl, state, published })
    }

    /// Marks committed entries of expired certificates as expired.
    ///
    /// Only the snapshot changes, the cache follows on commit.
    fn sweep_expired(
        &self, snapshot: &mut CacheSnapshot, now: DateTime<Utc>
    ) -> CrlResult<()> {
        let certs = self.collaborators.certs.as_ref();
        let mut expired = 0;
        let serials: Vec<_> = snapshot.committed.keys().cloned().collect();
        for serial in serials {
            if let Some(cert) = certs.lookup(&serial)? {
                if cert.not_after <= now && snapshot.expire(&serial) {
                    expired += 1;
                }
            }
        }
        if expired > 0 {
            debug!(
                "Issuing point '{}': {expired} revoked certificates expired",
                self.handle
            );
        }
        Ok(())
    }

    fn sign(&self, tbs: TbsCrl) -> CrlResult<GeneratedCrl> {
        let data = tbs.to_signed_data()?;
        let signature = self.collaborators.signer.sign(&data, tbs.algorithm)?;
        Ok(GeneratedCrl::new(tbs, signature))
    }

    /// Publishes a CRL, returning the reason if that failed.
    pub fn publish(&self, crl: &GeneratedCrl) -> Result<(), String> {
        let destination = self.config.publish_destination.as_deref();
        match self.collaborators.publisher.publish(crl, destination) {
            Ok(()) => {
                debug!("Issuing point '{}': published {crl}", self.handle);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Issuing point '{}': could not publish {crl}: {e}",
                    self.handle
                );
                Err(e.to_string())
            }
        }
    }
}


//------------ Tests ---------------------------------------------------------
