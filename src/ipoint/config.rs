//! Configuration of a single issuing point.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use crate::api::{IssuingPointHandle, RevocationReason, RevokedEntry, Serial};
use crate::commons::crypto::SigningAlgorithm;
use crate::commons::error::Error;
use crate::commons::CrlResult;
use super::schedule::DailyList;


//------------ IpDefaults ----------------------------------------------------

pub struct IpDefaults;

impl IpDefaults {
    fn yes() -> bool {
        true
    }

    fn cache_update_interval() -> u32 {
        15
    }

    fn auto_update_interval() -> u32 {
        240
    }

    fn update_schema() -> u32 {
        1
    }

    fn unexpected_exception_wait_time() -> u32 {
        30
    }

    fn unexpected_exception_loop_max() -> u32 {
        10
    }
}


//------------ IssuingPointConfig --------------------------------------------

/// The settings of one issuing point.
///
/// Intervals are in minutes, except for `unexpected_exception_wait_time`
/// which is in seconds.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IssuingPointConfig {
    pub name: IssuingPointHandle,

    #[serde(default = "IpDefaults::yes")]
    pub enabled: bool,

    #[serde(default = "IpDefaults::yes")]
    pub enable_cache: bool,

    #[serde(default = "IpDefaults::cache_update_interval")]
    pub cache_update_interval: u32,

    #[serde(default = "IpDefaults::yes")]
    pub enable_cache_recovery: bool,

    #[serde(default = "IpDefaults::yes")]
    pub enable_update_schedule: bool,

    #[serde(default)]
    pub enable_daily_updates: bool,

    #[serde(default)]
    pub daily_updates: String,

    #[serde(default = "IpDefaults::yes")]
    pub enable_interval_updates: bool,

    #[serde(default = "IpDefaults::auto_update_interval")]
    pub auto_update_interval: u32,

    #[serde(default)]
    pub min_update_interval: u32,

    /// Every `update_schema`-th update is a full CRL, the ones in between
    /// are delta CRLs. A value of 1 disables delta CRLs.
    #[serde(default = "IpDefaults::update_schema")]
    pub update_schema: u32,

    #[serde(default)]
    pub extended_next_update: bool,

    #[serde(default)]
    pub next_update_grace_period: u32,

    #[serde(default)]
    pub always_update: bool,

    #[serde(default = "IpDefaults::unexpected_exception_wait_time")]
    pub unexpected_exception_wait_time: u32,

    #[serde(default = "IpDefaults::unexpected_exception_loop_max")]
    pub unexpected_exception_loop_max: u32,

    #[serde(default)]
    pub ca_certs_only: bool,

    #[serde(default)]
    pub profile_list: Vec<String>,

    #[serde(default)]
    pub only_some_reasons: Vec<RevocationReason>,

    #[serde(default)]
    pub include_expired_certs: bool,

    #[serde(default)]
    pub include_expired_certs_one_extra_time: bool,

    #[serde(default)]
    pub begin_serial: Option<Serial>,

    #[serde(default)]
    pub end_serial: Option<Serial>,

    #[serde(default = "IpDefaults::yes")]
    pub allow_extensions: bool,

    #[serde(default)]
    pub signing_algorithm: SigningAlgorithm,

    #[serde(default)]
    pub no_crl_if_empty: bool,

    #[serde(default)]
    pub apply_schedule_immediately: bool,

    #[serde(default)]
    pub future_this_update: Option<DateTime<Utc>>,

    #[serde(default)]
    pub forbid_future_this_update: bool,

    #[serde(default)]
    pub publish_on_start: bool,

    #[serde(default)]
    pub publish_destination: Option<String>,

    /// Offset of local time to UTC used for daily update times. When
    /// missing, the offset of the host at start up is used.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,

    #[serde(default)]
    pub initial_crl_number: u64,
}

impl IssuingPointConfig {
    /// Creates a config with all defaults for the given point.
    pub fn new(name: IssuingPointHandle) -> Self {
        IssuingPointConfig {
            name,
            enabled: true,
            enable_cache: true,
            cache_update_interval: IpDefaults::cache_update_interval(),
            enable_cache_recovery: true,
            enable_update_schedule: true,
            enable_daily_updates: false,
            daily_updates: String::new(),
            enable_interval_updates: true,
            auto_update_interval: IpDefaults::auto_update_interval(),
            min_update_interval: 0,
            update_schema: IpDefaults::update_schema(),
            extended_next_update: false,
            next_update_grace_period: 0,
            always_update: false,
            unexpected_exception_wait_time:
                IpDefaults::unexpected_exception_wait_time(),
            unexpected_exception_loop_max:
                IpDefaults::unexpected_exception_loop_max(),
            ca_certs_only: false,
            profile_list: vec![],
            only_some_reasons: vec![],
            include_expired_certs: false,
            include_expired_certs_one_extra_time: false,
            begin_serial: None,
            end_serial: None,
            allow_extensions: true,
            signing_algorithm: SigningAlgorithm::default(),
            no_crl_if_empty: false,
            apply_schedule_immediately: false,
            future_this_update: None,
            forbid_future_this_update: false,
            publish_on_start: false,
            publish_destination: None,
            utc_offset_minutes: None,
            initial_crl_number: 0,
        }
    }

    /// Checks the settings that cannot be checked by parsing alone.
    ///
    /// An unusable daily update list does not fail verification, it only
    /// switches daily updates off.
    pub fn verify(&mut self) -> CrlResult<()> {
        if self.update_schema == 0 {
            return Err(Error::invalid_value(
                "update_schema", 0, "must be at least 1"
            ))
        }
        check_range(self.begin_serial.as_ref(), self.end_serial.as_ref())?;
        if self.forbid_future_this_update && self.future_this_update.is_some()
        {
            return Err(Error::FutureThisUpdateForbidden)
        }
        if self.enable_daily_updates {
            if let Err(e) = DailyList::from_str(&self.daily_updates) {
                warn!(
                    "Issuing point '{}': disabling daily updates: {e}",
                    self.name
                );
                self.enable_daily_updates = false;
            }
        }
        Ok(())
    }

    /// Returns whether delta CRLs are issued.
    pub fn delta_mode(&self) -> bool {
        self.enable_cache && self.update_schema > 1
    }

    pub fn filter(&self) -> ContentFilter {
        ContentFilter {
            ca_certs_only: self.ca_certs_only,
            profiles: self.profile_list.clone(),
            reasons: self.only_some_reasons.clone(),
            begin_serial: self.begin_serial.clone(),
            end_serial: self.end_serial.clone(),
            include_expired: self.include_expired_certs,
            expired_one_extra_time: self.include_expired_certs_one_extra_time,
            allow_extensions: self.allow_extensions,
        }
    }

    pub fn in_range(&self, serial: &Serial) -> bool {
        self.filter().in_range(serial)
    }
}

/// # Updating
impl IssuingPointConfig {
    /// Applies a batch of textual settings.
    ///
    /// Keys that cannot be applied keep their old value and are listed as
    /// rejected. The serial range is checked once the whole batch is in.
    pub fn apply_batch(
        &mut self, changes: &BTreeMap<String, String>
    ) -> (ConfigEffect, ConfigUpdateReport) {
        let range = (self.begin_serial.clone(), self.end_serial.clone());
        let mut effect = ConfigEffect::default();
        let mut report = ConfigUpdateReport::default();

        for (key, value) in changes {
            match self.apply(key, value) {
                Ok(key_effect) => {
                    effect.merge(key_effect);
                    report.applied.push(key.clone());
                }
                Err(e) => {
                    warn!("Issuing point '{}': rejected '{key}': {e}", self.name);
                    report.rejected.insert(key.clone(), e.to_string());
                }
            }
        }

        let range_check =
            check_range(self.begin_serial.as_ref(), self.end_serial.as_ref());
        if let Err(e) = range_check {
            warn!("Issuing point '{}': rejected serial range: {e}", self.name);
            (self.begin_serial, self.end_serial) = range;
            report.applied.retain(|key| {
                if key == "begin_serial" || key == "end_serial" {
                    report.rejected.insert(key.clone(), e.to_string());
                    false
                } else {
                    true
                }
            });
        }

        (effect, report)
    }

    /// Applies a single textual setting.
    ///
    /// On error the config is left unchanged, except for an invalid daily
    /// update list which switches daily updates off.
    pub fn apply(&mut self, key: &str, value: &str) -> CrlResult<ConfigEffect> {
        let value = value.trim();
        let mut effect = ConfigEffect::default();

        match key {
            "enabled" => self.enabled = parse(key, value)?,
            "enable_cache" => {
                let enable = parse(key, value)?;
                if enable != self.enable_cache {
                    effect.content = true;
                    effect.schedule = true;
                }
                self.enable_cache = enable;
            }
            "cache_update_interval" => {
                self.cache_update_interval = parse(key, value)?;
            }
            "enable_cache_recovery" => {
                self.enable_cache_recovery = parse(key, value)?;
            }
            "enable_update_schedule" => {
                self.enable_update_schedule = parse(key, value)?;
                effect.schedule = true;
            }
            "enable_daily_updates" => {
                self.enable_daily_updates = parse(key, value)?;
                effect.schedule = true;
            }
            "daily_updates" => {
                if let Err(e) = DailyList::from_str(value) {
                    self.enable_daily_updates = false;
                    effect.schedule = true;
                    return Err(Error::invalid_value(key, value, e))
                }
                self.daily_updates = value.to_string();
                effect.schedule = true;
            }
            "enable_interval_updates" => {
                self.enable_interval_updates = parse(key, value)?;
                effect.schedule = true;
            }
            "auto_update_interval" => {
                self.auto_update_interval = parse(key, value)?;
                effect.schedule = true;
            }
            "min_update_interval" => {
                self.min_update_interval = parse(key, value)?;
                effect.schedule = true;
            }
            "update_schema" => {
                let schema: u32 = parse(key, value)?;
                if schema == 0 {
                    return Err(Error::invalid_value(
                        key, value, "must be at least 1"
                    ))
                }
                self.update_schema = schema;
                effect.schedule = true;
            }
            "extended_next_update" => {
                self.extended_next_update = parse(key, value)?;
                effect.schedule = true;
            }
            "next_update_grace_period" => {
                self.next_update_grace_period = parse(key, value)?;
                effect.schedule = true;
            }
            "always_update" => self.always_update = parse(key, value)?,
            "unexpected_exception_wait_time" => {
                self.unexpected_exception_wait_time = parse(key, value)?;
            }
            "unexpected_exception_loop_max" => {
                self.unexpected_exception_loop_max = parse(key, value)?;
            }
            "ca_certs_only" => {
                self.ca_certs_only = parse(key, value)?;
                effect.content = true;
            }
            "profile_list" => {
                self.profile_list = split_list(value)
                    .map(ToString::to_string)
                    .collect();
                effect.content = true;
            }
            "only_some_reasons" => {
                self.only_some_reasons = split_list(value)
                    .map(RevocationReason::from_str)
                    .collect::<Result<_, _>>()
                    .map_err(|e| Error::invalid_value(key, value, e))?;
                effect.content = true;
            }
            "include_expired_certs" => {
                self.include_expired_certs = parse(key, value)?;
                effect.content = true;
            }
            "include_expired_certs_one_extra_time" => {
                self.include_expired_certs_one_extra_time =
                    parse(key, value)?;
            }
            "begin_serial" => {
                self.begin_serial = parse_serial(key, value)?;
                effect.content = true;
            }
            "end_serial" => {
                self.end_serial = parse_serial(key, value)?;
                effect.content = true;
            }
            "allow_extensions" => self.allow_extensions = parse(key, value)?,
            "signing_algorithm" => {
                self.signing_algorithm = SigningAlgorithm::from_str(value)
                    .map_err(|e| Error::invalid_value(key, value, e))?;
            }
            "no_crl_if_empty" => self.no_crl_if_empty = parse(key, value)?,
            "apply_schedule_immediately" => {
                self.apply_schedule_immediately = parse(key, value)?;
            }
            "future_this_update" => {
                let time = if value.is_empty() {
                    None
                } else {
                    let time = DateTime::parse_from_rfc3339(value)
                        .map_err(|e| Error::invalid_value(key, value, e))?;
                    Some(time.with_timezone(&Utc))
                };
                if time.is_some() && self.forbid_future_this_update {
                    return Err(Error::FutureThisUpdateForbidden)
                }
                self.future_this_update = time;
                effect.schedule = true;
            }
            "forbid_future_this_update" => {
                let forbid = parse(key, value)?;
                if forbid && self.future_this_update.is_some() {
                    return Err(Error::FutureThisUpdateForbidden)
                }
                self.forbid_future_this_update = forbid;
            }
            "publish_on_start" => self.publish_on_start = parse(key, value)?,
            "publish_destination" => {
                self.publish_destination = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "utc_offset_minutes" => {
                self.utc_offset_minutes = if value.is_empty() {
                    None
                } else {
                    let offset: i32 = parse(key, value)?;
                    if offset.abs() >= 24 * 60 {
                        return Err(Error::invalid_value(
                            key, value, "must be less than a day"
                        ))
                    }
                    Some(offset)
                };
                effect.schedule = true;
            }
            "name" | "initial_crl_number" => {
                return Err(Error::invalid_value(
                    key, value, "can only be set when the point is created"
                ))
            }
            _ => return Err(Error::ConfigUnknownKey(key.to_string())),
        }

        Ok(effect)
    }
}


//------------ ConfigEffect --------------------------------------------------

/// What a configuration change affects.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConfigEffect {
    pub schedule: bool,
    pub content: bool,
}

impl ConfigEffect {
    pub fn merge(&mut self, other: ConfigEffect) {
        self.schedule |= other.schedule;
        self.content |= other.content;
    }
}


//------------ ConfigUpdateReport --------------------------------------------

/// The result of applying a batch of configuration changes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ConfigUpdateReport {
    pub applied: Vec<String>,
    pub rejected: BTreeMap<String, String>,
    pub schedule_affected: bool,
    pub content_affected: bool,
}

impl ConfigUpdateReport {
    /// Returns whether every key was applied.
    pub fn success(&self) -> bool {
        self.rejected.is_empty()
    }
}

impl fmt::Display for ConfigUpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "applied: [{}]", self.applied.join(", "))?;
        for (key, reason) in &self.rejected {
            write!(f, ", rejected '{key}': {reason}")?;
        }
        Ok(())
    }
}


//------------ ContentFilter -------------------------------------------------

/// Decides which revoked certificates end up on the CRL.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContentFilter {
    pub ca_certs_only: bool,
    pub profiles: Vec<String>,
    pub reasons: Vec<RevocationReason>,
    pub begin_serial: Option<Serial>,
    pub end_serial: Option<Serial>,
    pub include_expired: bool,
    pub expired_one_extra_time: bool,
    pub allow_extensions: bool,
}

impl ContentFilter {
    pub fn in_range(&self, serial: &Serial) -> bool {
        self.begin_serial.as_ref().is_none_or(|begin| serial >= begin)
            && self.end_serial.as_ref().is_none_or(|end| serial <= end)
    }

    /// Returns whether a revoked entry belongs on the CRL.
    pub fn accepts(&self, entry: &RevokedEntry) -> bool {
        if self.ca_certs_only && !entry.is_ca {
            return false
        }
        if !self.profiles.is_empty() {
            match &entry.profile {
                Some(profile) if self.profiles.contains(profile) => {}
                _ => return false,
            }
        }
        if !self.reasons.is_empty()
            && !entry.is_removal_marker()
            && !self.reasons.contains(&entry.reason)
        {
            return false
        }
        self.in_range(&entry.serial)
    }

    /// Returns the entry the way it goes onto the CRL.
    pub fn prepare(&self, entry: &RevokedEntry) -> RevokedEntry {
        let mut entry = entry.clone();
        if !self.allow_extensions {
            entry.extensions.clear();
        }
        entry
    }
}


//------------ Helpers -------------------------------------------------------

fn parse<T>(key: &str, value: &str) -> CrlResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse().map_err(|e| Error::invalid_value(key, value, e))
}

fn parse_serial(key: &str, value: &str) -> CrlResult<Option<Serial>> {
    if value.is_empty() {
        Ok(None)
    } else {
        Serial::from_str(value)
            .map(Some)
            .map_err(|e| Error::invalid_value(key, value, e))
    }
}

fn check_range(begin: Option<&Serial>, end: Option<&Serial>) -> CrlResult<()> {
    match (begin, end) {
        (Some(begin), Some(end)) if begin > end => Err(Error::invalid_value(
            "end_serial", end, "must not be below begin_serial"
        )),
        _ => Ok(()),
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> IssuingPointConfig {
        IssuingPointConfig::new(IssuingPointHandle::from_str("master").unwrap())
    }

    #[test]
    fn parse_from_toml_with_defaults() {
        let cfg: IssuingPointConfig = toml::from_str(
            r#"
            name = "master"
            update_schema = 4
            only_some_reasons = [ "keyCompromise", "caCompromise" ]
            begin_serial = "0x100"
            "#,
        ).unwrap();

        assert!(cfg.enabled);
        assert_eq!(cfg.auto_update_interval, 240);
        assert_eq!(cfg.update_schema, 4);
        assert!(cfg.delta_mode());
        assert_eq!(cfg.only_some_reasons.len(), 2);
        assert_eq!(cfg.begin_serial, Some(Serial::from(0x100)));
    }

    #[test]
    fn apply_reports_effects() {
        let mut cfg = config();

        let effect = cfg.apply("ca_certs_only", "true").unwrap();
        assert_eq!(effect, ConfigEffect { schedule: false, content: true });
        assert!(cfg.ca_certs_only);

        let effect = cfg.apply("auto_update_interval", "60").unwrap();
        assert_eq!(effect, ConfigEffect { schedule: true, content: false });

        let effect = cfg.apply("signing_algorithm", "SHA512withRSA").unwrap();
        assert_eq!(effect, ConfigEffect::default());

        let effect = cfg.apply("enable_cache", "false").unwrap();
        assert_eq!(effect, ConfigEffect { schedule: true, content: true });
    }

    #[test]
    fn reject_bad_values_and_keep_previous() {
        let mut cfg = config();
        cfg.apply("begin_serial", "0x10").unwrap();

        assert!(cfg.apply("begin_serial", "-1").is_err());
        assert_eq!(cfg.begin_serial, Some(Serial::from(0x10)));


        assert!(cfg.apply("update_schema", "0").is_err());
        assert_eq!(cfg.update_schema, 1);

        assert!(matches!(
            cfg.apply("no_such_key", "1"),
            Err(Error::ConfigUnknownKey(_))
        ));
        assert!(cfg.apply("initial_crl_number", "5").is_err());
    }

    fn batch(changes: &[(&str, &str)]) -> BTreeMap<String, String> {
        changes
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn batch_checks_serial_range_after_all_keys() {
        let mut cfg = config();
        cfg.apply("end_serial", "0x50").unwrap();

        let (effect, report) = cfg.apply_batch(&batch(&[
            ("begin_serial", "0x100"),
            ("end_serial", "0x200"),
        ]));
        assert!(report.success());
        assert_eq!(report.applied, vec!["begin_serial", "end_serial"]);
        assert!(effect.content);
        assert_eq!(cfg.begin_serial, Some(Serial::from(0x100)));
        assert_eq!(cfg.end_serial, Some(Serial::from(0x200)));
    }

    #[test]
    fn batch_with_bad_serial_range_keeps_old_range() {
        let mut cfg = config();
        cfg.apply("begin_serial", "0x10").unwrap();

        let (_, report) = cfg.apply_batch(&batch(&[
            ("end_serial", "0x5"),
            ("no_crl_if_empty", "true"),
        ]));
        assert_eq!(report.applied, vec!["no_crl_if_empty"]);
        assert!(report.rejected.contains_key("end_serial"));
        assert_eq!(cfg.begin_serial, Some(Serial::from(0x10)));
        assert_eq!(cfg.end_serial, None);
        assert!(cfg.no_crl_if_empty);
        assert!(cfg.verify().is_ok());
    }

    #[test]
    fn invalid_daily_list_disables_daily_updates() {
        let mut cfg = config();
        cfg.apply("daily_updates", "1:00,13:00").unwrap();
        cfg.apply("enable_daily_updates", "true").unwrap();

        assert!(cfg.apply("daily_updates", "25:99").is_err());
        assert!(!cfg.enable_daily_updates);
        assert_eq!(cfg.daily_updates, "1:00,13:00");
    }

    #[test]
    fn future_this_update_can_be_forbidden() {
        let mut cfg = config();
        cfg.apply("forbid_future_this_update", "true").unwrap();
        assert!(matches!(
            cfg.apply("future_this_update", "2030-01-01T00:00:00Z"),
            Err(Error::FutureThisUpdateForbidden)
        ));
        assert!(cfg.future_this_update.is_none());

        cfg.apply("forbid_future_this_update", "false").unwrap();
        cfg.apply("future_this_update", "2030-01-01T00:00:00Z").unwrap();
        assert_eq!(
            cfg.future_this_update,
            Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn filter_by_class_reason_and_range() {
        let now = Utc::now();
        let mut cfg = config();
        cfg.apply("profile_list", "tls-server, tls-client").unwrap();
        cfg.apply("only_some_reasons", "keyCompromise").unwrap();
        cfg.apply("end_serial", "0xff").unwrap();
        let filter = cfg.filter();

        let entry = RevokedEntry::new(
            Serial::from(0x10), now, RevocationReason::KeyCompromise
        ).with_profile("tls-server");
        assert!(filter.accepts(&entry));

        let mut other = entry.clone();
        other.reason = RevocationReason::Superseded;
        assert!(!filter.accepts(&other));

        let other = entry.clone().with_profile("code-signing");
        assert!(!filter.accepts(&other));

        let mut other = entry.clone();
        other.serial = Serial::from(0x100);
        assert!(!filter.accepts(&other));

        cfg.apply("ca_certs_only", "true").unwrap();
        assert!(!cfg.filter().accepts(&entry));
        assert!(cfg.filter().accepts(&entry.clone().with_ca(true)));
    }
}
