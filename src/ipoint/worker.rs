//! Deciding what the update worker of an issuing point does next.
//!
//! The worker thread itself lives in [`point`](super::point). This module
//! only turns the trigger conditions of a point into an [`Action`], which
//! keeps the decision free of locks and clocks.

use std::time::Duration as StdDuration;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};


//------------ WakeReason ----------------------------------------------------

/// Why the worker runs a cycle.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeReason {
    ManualUpdate,
    ScheduledUpdate,

    /// The final update after scheduled updates were switched off.
    LastAutoUpdate,

    CacheFlush,
    Republish,
}

impl WakeReason {
    /// Returns whether this reason asks for a new CRL.
    pub fn generates(self) -> bool {
        matches!(
            self,
            WakeReason::ManualUpdate
                | WakeReason::ScheduledUpdate
                | WakeReason::LastAutoUpdate
        )
    }
}


//------------ Action --------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Action {
    /// Run a cycle for these reasons now.
    Run(Vec<WakeReason>),

    /// Nothing is due before this much time passed.
    Wait(StdDuration),

    /// Nothing is due until something changes.
    WaitForTrigger,

    /// The point was shut down.
    Stop,
}


//------------ Backoff -------------------------------------------------------

/// Slows down retries after repeated failed cycles.
///
/// Once more than `loop_max` cycles in a row failed, the next attempt is
/// delayed until `wait` after the last failure.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Backoff {
    failures: u32,
    last_failure: Option<DateTime<Utc>>,
    wait: Duration,
    loop_max: u32,
}

impl Backoff {
    pub fn new(wait_secs: u32, loop_max: u32) -> Self {
        Backoff {
            failures: 0,
            last_failure: None,
            wait: Duration::seconds(wait_secs.into()),
            loop_max,
        }
    }

    pub fn configure(&mut self, wait_secs: u32, loop_max: u32) {
        self.wait = Duration::seconds(wait_secs.into());
        self.loop_max = loop_max;
    }

    pub fn failed(&mut self, now: DateTime<Utc>) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);
    }

    pub fn succeeded(&mut self) {
        self.failures = 0;
        self.last_failure = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Returns the time before which no new attempt is made.
    pub fn until(&self) -> Option<DateTime<Utc>> {
        if self.failures > self.loop_max {
            self.last_failure.map(|failure| failure + self.wait)
        } else {
            None
        }
    }
}


//------------ Triggers ------------------------------------------------------

/// The trigger conditions of an issuing point at one moment.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Triggers {
    pub shutdown: bool,
    pub enabled: bool,

    /// A cycle is running already.
    pub generating: bool,

    pub manual: bool,
    pub last_auto_update: bool,
    pub scheduled: Option<DateTime<Utc>>,
    pub flush_due: Option<DateTime<Utc>>,
    pub republish_due: Option<DateTime<Utc>>,
    pub backoff_until: Option<DateTime<Utc>>,
}

impl Triggers {
    pub fn action(&self, now: DateTime<Utc>) -> Action {
        if self.shutdown {
            return Action::Stop
        }

        let mut due = vec![];
        let mut next: Option<DateTime<Utc>> = None;
        let mut check = |at: DateTime<Utc>, reason: WakeReason| {
            if at <= now {
                due.push(reason);
            } else {
                next = Some(next.map_or(at, |next| next.min(at)));
            }
        };
        let gated = |at: DateTime<Utc>| {
            self.backoff_until.map_or(at, |until| at.max(until))
        };

        if let Some(at) = self.flush_due {
            check(at, WakeReason::CacheFlush);
        }
        if self.enabled && !self.generating {
            if self.manual {
                check(gated(now), WakeReason::ManualUpdate);
            }
            if self.last_auto_update {
                check(gated(now), WakeReason::LastAutoUpdate);
            }
            if let Some(at) = self.scheduled {
                check(gated(at), WakeReason::ScheduledUpdate);
            }
            if let Some(at) = self.republish_due {
                check(at, WakeReason::Republish);
            }
        }

        if !due.is_empty() {
            Action::Run(due)
        } else if let Some(next) = next {
            Action::Wait((next - now).to_std().unwrap_or_default())
        } else {
            Action::WaitForTrigger
        }
    }
}


//------------ Tests ---------------------------------------------------------
