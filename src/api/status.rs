//! Status reporting for issuing points.

use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::IssuingPointHandle;


//------------ UpdateStatus --------------------------------------------------

/// The outcome of the most recent generation cycle.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum UpdateStatus {
    #[default]
    Never,
    Started {
        at: DateTime<Utc>,
    },
    Succeeded {
        at: DateTime<Utc>,
        crl_number: u64,
        delta: bool,
    },
    Skipped {
        at: DateTime<Utc>,
        reason: String,
    },
    Failed {
        at: DateTime<Utc>,
        error: String,
    },
}

impl UpdateStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, UpdateStatus::Failed { .. })
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UpdateStatus::Never => write!(f, "never"),
            UpdateStatus::Started { at } => {
                write!(f, "started at {}", at.to_rfc3339())
            }
            UpdateStatus::Succeeded { at, crl_number, delta } => {
                let kind = if *delta { "delta CRL" } else { "CRL" };
                write!(f, "{kind} {crl_number} generated at {}", at.to_rfc3339())
            }
            UpdateStatus::Skipped { at, reason } => {
                write!(f, "skipped at {}: {reason}", at.to_rfc3339())
            }
            UpdateStatus::Failed { at, error } => {
                write!(f, "failed at {}: {error}", at.to_rfc3339())
            }
        }
    }
}


//------------ PublishStatus -------------------------------------------------

/// The outcome of the most recent publication.
///
/// Publication is tracked apart from generation: a generated CRL stays
/// valid even when it could not be published yet.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum PublishStatus {
    #[default]
    Never,
    Published {
        at: DateTime<Utc>,
        crl_number: u64,
    },
    Pending {
        since: DateTime<Utc>,
        error: String,
    },
}

impl PublishStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, PublishStatus::Pending { .. })
    }
}

impl fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PublishStatus::Never => write!(f, "never"),
            PublishStatus::Published { at, crl_number } => {
                write!(f, "CRL {crl_number} published at {}", at.to_rfc3339())
            }
            PublishStatus::Pending { since, error } => write!(
                f,
                "waiting for republication since {}: {error}",
                since.to_rfc3339()
            ),
        }
    }
}


//------------ IssuingPointStatus --------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IssuingPointStatus {
    pub handle: IssuingPointHandle,
    pub enabled: bool,
    pub crl_number: u64,
    pub delta_crl_number: u64,
    pub crl_size: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
    pub next_delta_update: Option<DateTime<Utc>>,
    pub cache_enabled: bool,
    pub cache_empty: bool,
    pub update_in_progress: bool,
    pub update: UpdateStatus,
    pub publish: PublishStatus,
    pub failures: u32,
}

impl fmt::Display for IssuingPointStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn time(t: &Option<DateTime<Utc>>) -> String {
            t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
        }

        writeln!(f, "Issuing point: {}", self.handle)?;
        writeln!(f, "  enabled:           {}", self.enabled)?;
        writeln!(f, "  CRL number:        {}", self.crl_number)?;
        writeln!(f, "  delta CRL number:  {}", self.delta_crl_number)?;
        writeln!(f, "  entries:           {}", self.crl_size)?;
        writeln!(f, "  last update:       {}", time(&self.last_update))?;
        writeln!(f, "  next update:       {}", time(&self.next_update))?;
        writeln!(
            f, "  next delta update: {}", time(&self.next_delta_update)
        )?;
        writeln!(f, "  update:            {}", self.update)?;
        writeln!(f, "  publication:       {}", self.publish)?;
        if self.failures > 0 {
            writeln!(f, "  failed cycles:     {}", self.failures)?;
        }
        Ok(())
    }
}
