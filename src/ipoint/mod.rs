//! CRL issuing points.
//!
//! An issuing point caches revocations, decides when a new full or delta
//! CRL is due, and runs the sign, store, and publish pipeline on its own
//! worker thread.

pub use self::cache::{
    CacheRecord, CacheSettings, CacheSnapshot, RevocationCache, Watermark,
};
pub use self::config::{
    ConfigEffect, ConfigUpdateReport, ContentFilter, IpDefaults,
    IssuingPointConfig,
};
pub use self::generator::{
    CrlGenerator, CycleOutcome, GeneratedCrl, GenerationKind, TbsCrl,
};
pub use self::point::IssuingPoint;
pub use self::record::{IssuingPointRecord, PointStorage, StoredPoint};
pub use self::schedule::{
    DailyList, NextUpdate, ScheduleCalculator, SchedulePolicy, ScheduleState,
    Slot,
};
pub use self::worker::{Action, Backoff, Triggers, WakeReason};

pub mod cache;
pub mod config;
pub mod generator;
pub mod point;
pub mod record;
pub mod schedule;
pub mod worker;

use std::fmt;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use crate::commons::crypto::CrlSigner;
use crate::publish::Publisher;
use crate::stores::{CertificateStore, IssuingPointRepository, RequestLog};


//------------ Clock ---------------------------------------------------------

/// The source of the current time for an issuing point.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}


//------------ Collaborators -------------------------------------------------

/// The services an issuing point uses.
///
/// Several issuing points of one CA usually share all of them.
#[derive(Clone, Debug)]
pub struct Collaborators {
    pub certs: Arc<dyn CertificateStore>,
    pub requests: Arc<dyn RequestLog>,
    pub repository: Arc<dyn IssuingPointRepository>,
    pub signer: Arc<dyn CrlSigner>,
    pub publisher: Arc<dyn Publisher>,
    pub clock: Arc<dyn Clock>,
}
