#![allow(dead_code)] // Different tests use different parts.

use std::time::Duration;
use chrono::{DateTime, Utc};
use crld::ipoint::{IssuingPoint, IssuingPointConfig};
use crld::test::{self, TestEnv};


//------------ Environment ---------------------------------------------------

/// The time all tests start at, a Tuesday.
pub fn start_time() -> DateTime<Utc> {
    test::time("2024-03-05T10:00:00Z")
}

pub fn env() -> TestEnv {
    init_logging();
    TestEnv::new(start_time())
}

pub fn init_logging() {
    let _ = stderrlog::new().verbosity(3).init();
}


//------------ Issuing Points ------------------------------------------------

/// A config for scheduled updates every four hours in UTC.
pub fn config(name: &str) -> IssuingPointConfig {
    let mut config = IssuingPointConfig::new(test::handle(name));
    config.utc_offset_minutes = Some(0);
    config.auto_update_interval = 240;
    config
}

/// Creates and starts a point and waits for its first CRL.
pub fn started(config: IssuingPointConfig, env: &TestEnv) -> IssuingPoint {
    let point = IssuingPoint::create(config, env.collaborators()).unwrap();
    point.start().unwrap();
    settle(&point);
    point
}

/// Waits until the worker of a point has nothing left to do.
pub fn settle(point: &IssuingPoint) {
    point.wake();
    assert!(
        point.wait_idle(Duration::from_secs(10)),
        "issuing point '{}' did not become idle",
        point.handle()
    );
}

/// Moves the clock forward and lets the point catch up.
pub fn advance(env: &TestEnv, point: &IssuingPoint, minutes: i64) {
    env.clock.advance(chrono::Duration::minutes(minutes));
    settle(point);
}

pub fn serials(crl: &crld::ipoint::GeneratedCrl) -> Vec<u64> {
    crl.entries()
        .iter()
        .map(|entry| {
            entry.serial.as_biguint().try_into().unwrap()
        })
        .collect()
}
