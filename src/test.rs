//! Helper functions and fake collaborators for testing crld.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use chrono::{DateTime, Duration, Utc};
use url::Url;
use crate::api::{IssuingPointHandle, RevocationReason, RevokedEntry, Serial};
use crate::commons::crypto::{CrlSigner, Signature, SignerError, SigningAlgorithm};
use crate::commons::error::Error;
use crate::commons::CrlResult;
use crate::ipoint::{Clock, Collaborators, GeneratedCrl};
use crate::publish::Publisher;
use crate::stores::{
    KvCertStore, KvRepository, KvRequestLog, RequestKind, StoredCertificate,
};


//------------ Basic Values --------------------------------------------------

fn random_hex_string() -> String {
    let mut bytes = [0; 8];
    openssl::rand::rand_bytes(&mut bytes).unwrap();
    hex::encode(bytes)
}

/// Returns the URI of a fresh in-memory store.
pub fn mem_storage() -> Url {
    Url::parse(&format!("memory://{}", random_hex_string())).unwrap()
}

pub fn handle(s: &str) -> IssuingPointHandle {
    IssuingPointHandle::from_str(s).unwrap()
}

pub fn time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn serial(n: u64) -> Serial {
    Serial::from(n)
}

pub fn far_future() -> DateTime<Utc> {
    time("2099-01-01T00:00:00Z")
}

/// A certificate that was revoked for key compromise.
pub fn revoked_cert(serial: u64, is_ca: bool) -> StoredCertificate {
    let mut cert = StoredCertificate::new(Serial::from(serial), far_future())
        .with_ca(is_ca);
    cert.revoke(
        time("2024-03-01T00:00:00Z"), RevocationReason::KeyCompromise
    );
    cert
}

pub fn valid_cert(serial: u64) -> StoredCertificate {
    StoredCertificate::new(Serial::from(serial), far_future())
}


//------------ ManualClock ---------------------------------------------------

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        ManualClock { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}


//------------ TestSigner ----------------------------------------------------

/// A signer that hashes instead of signing and can be made to fail.
#[derive(Debug, Default)]
pub struct TestSigner {
    failing: AtomicBool,
    signed: AtomicUsize,
}

impl TestSigner {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns how many times something was signed.
    pub fn signed(&self) -> usize {
        self.signed.load(Ordering::SeqCst)
    }
}

impl CrlSigner for TestSigner {
    fn sign(
        &self, data: &[u8], algorithm: SigningAlgorithm
    ) -> Result<Signature, SignerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SignerError::other("signing key unavailable"))
        }
        self.signed.fetch_add(1, Ordering::SeqCst);
        Ok(Signature::new(algorithm, openssl::sha::sha256(data).to_vec()))
    }
}


//------------ RecordingPublisher --------------------------------------------

/// A publisher that keeps everything it was asked to publish.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    failing: AtomicBool,
    published: Mutex<Vec<(GeneratedCrl, Option<String>)>>,
}

impl RecordingPublisher {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<GeneratedCrl> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(crl, _)| crl.clone())
            .collect()
    }

    pub fn destinations(&self) -> Vec<Option<String>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, destination)| destination.clone())
            .collect()
    }

    pub fn last(&self) -> Option<GeneratedCrl> {
        self.published().pop()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(
        &self, crl: &GeneratedCrl, destination: Option<&str>
    ) -> CrlResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::publish("publication point unreachable"))
        }
        self.published
            .lock()
            .unwrap()
            .push((crl.clone(), destination.map(ToString::to_string)));
        Ok(())
    }
}


//------------ TestEnv -------------------------------------------------------

/// Collaborators for issuing points backed by in-memory stores.
///
/// The certificate store, request log, and repository of one environment
/// share a single storage URI, so a second environment created with
/// [`TestEnv::reopen`] sees the same data, like a restarted process would.
#[derive(Clone, Debug)]
pub struct TestEnv {
    pub storage_uri: Url,
    pub certs: Arc<KvCertStore>,
    pub requests: Arc<KvRequestLog>,
    pub repository: Arc<KvRepository>,
    pub signer: Arc<TestSigner>,
    pub publisher: Arc<RecordingPublisher>,
    pub clock: Arc<ManualClock>,
}

impl TestEnv {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::open(mem_storage(), now)
    }

    /// Opens the stores of an existing environment with fresh fakes.
    pub fn reopen(&self) -> Self {
        Self::open(self.storage_uri.clone(), self.clock.now())
    }

    fn open(storage_uri: Url, now: DateTime<Utc>) -> Self {
        TestEnv {
            certs: Arc::new(KvCertStore::create(&storage_uri).unwrap()),
            requests: Arc::new(KvRequestLog::create(&storage_uri).unwrap()),
            repository: Arc::new(KvRepository::create(&storage_uri).unwrap()),
            signer: Arc::new(TestSigner::default()),
            publisher: Arc::new(RecordingPublisher::default()),
            clock: Arc::new(ManualClock::new(now)),
            storage_uri,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            certs: self.certs.clone(),
            requests: self.requests.clone(),
            repository: self.repository.clone(),
            signer: self.signer.clone(),
            publisher: self.publisher.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Issues a certificate.
    pub fn issue(&self, serial: u64, is_ca: bool) {
        self.certs.add(valid_cert(serial).with_ca(is_ca)).unwrap();
    }

    /// Revokes an issued certificate the way the CA does.
    ///
    /// Returns the entry and the id of the logged request.
    pub fn revoke(&self, serial: u64) -> (RevokedEntry, u64) {
        let entry = self
            .certs
            .revoke(
                &Serial::from(serial),
                self.now(),
                RevocationReason::KeyCompromise,
            )
            .unwrap();
        let id = self
            .requests
            .append(RequestKind::Revoke(entry.clone()))
            .unwrap();
        (entry, id)
    }

    /// Lifts a revocation the way the CA does.
    pub fn unrevoke(&self, serial: u64) -> u64 {
        let serial = Serial::from(serial);
        self.certs.unrevoke(&serial).unwrap();
        self.requests.append(RequestKind::Unrevoke(serial)).unwrap()
    }
}
