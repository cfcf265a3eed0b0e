//! Deciding when the next CRL is due.
//!
//! The [`ScheduleCalculator`] is pure computation: given the schedule
//! state of an issuing point and the current time, it returns the instant
//! of the next update and whether that update produces a full CRL.

use std::fmt;
use std::str::FromStr;
use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, Local, NaiveDate,
    Offset, TimeZone, Utc,
};
use log::debug;
use serde::{Deserialize, Serialize};
use crate::commons::error::Error;
use crate::commons::CrlResult;
use super::config::IssuingPointConfig;

const MINUTES_PER_DAY: u32 = 24 * 60;


//------------ Slot ----------------------------------------------------------

/// A time of day at which an update happens.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Slot {
    /// Minutes after local midnight.
    pub minute: u32,

    /// Whether this slot produces a full CRL in an extended list.
    pub full: bool,
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (full, time) = match s.strip_prefix('*') {
            Some(time) => (true, time.trim()),
            None => (false, s),
        };
        let (hours, minutes) = time
            .split_once(':')
            .ok_or_else(|| format!("expected H:MM, found '{s}'"))?;
        let hours: u32 = hours
            .parse()
            .map_err(|_| format!("invalid hours in '{s}'"))?;
        let minutes: u32 = minutes
            .parse()
            .map_err(|_| format!("invalid minutes in '{s}'"))?;
        if hours > 23 || minutes > 59 || time.len() > 5 {
            return Err(format!("invalid time of day '{s}'"))
        }
        Ok(Slot { minute: hours * 60 + minutes, full })
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.full {
            f.write_str("*")?;
        }
        write!(f, "{}:{:02}", self.minute / 60, self.minute % 60)
    }
}


//------------ DailyList -----------------------------------------------------

/// The times of day at which updates happen.
///
/// Written as a comma separated list of `H:MM` times. Either a single list
/// applies to every day, or seven lists separated by `;` give the times
/// for Sunday through Saturday. Times prefixed with `*` produce full CRLs,
/// a list with such marks is an extended list in which all other times
/// produce delta CRLs only.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DailyList {
    days: Vec<Vec<Slot>>,
    extended: bool,
}

impl DailyList {
    /// Creates the list of times for an anchor and an interval.
    fn anchored(anchor: u32, interval: u32) -> Self {
        let slots = (anchor..MINUTES_PER_DAY)
            .step_by(interval.max(1) as usize)
            .map(|minute| Slot { minute, full: false })
            .collect();
        DailyList { days: vec![slots], extended: false }
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Returns the total number of slots in the list.
    pub fn slot_count(&self) -> usize {
        self.days.iter().map(Vec::len).sum()
    }

    /// Returns the only time in the list if there is exactly one.
    pub fn single_slot(&self) -> Option<Slot> {
        match self.days.as_slice() {
            [day] if day.len() == 1 && !self.extended => Some(day[0]),
            _ => None,
        }
    }

    fn day(&self, weekday: usize) -> &[Slot] {
        if self.days.len() == 1 {
            &self.days[0]
        } else {
            &self.days[weekday % 7]
        }
    }
}

impl FromStr for DailyList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty list of daily update times".to_string())
        }

        let mut days = vec![];
        for day in s.split(';') {
            let mut slots: Vec<Slot> = vec![];
            for time in day.split(',').map(str::trim).filter(|t| !t.is_empty())
            {
                let slot = Slot::from_str(time)?;
                if let Some(last) = slots.last() {
                    if last.minute >= slot.minute {
                        return Err(format!(
                            "times must be ascending, found '{slot}' after \
                             '{last}'"
                        ))
                    }
                }
                slots.push(slot);
            }
            days.push(slots);
        }

        if days.len() != 1 && days.len() != 7 {
            return Err(format!(
                "expected one list or seven lists, found {}", days.len()
            ))
        }

        let list = DailyList {
            extended: days.iter().flatten().any(|slot| slot.full),
            days,
        };
        if list.slot_count() == 0 {
            return Err("empty list of daily update times".to_string())
        }
        Ok(list)
    }
}

impl fmt::Display for DailyList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let days: Vec<String> = self
            .days
            .iter()
            .map(|slots| {
                slots
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect();
        f.write_str(&days.join(";"))
    }
}


//------------ SchedulePolicy ------------------------------------------------

/// The resolved way in which scheduled updates happen.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SchedulePolicy {
    /// No scheduled updates, only manual ones.
    Disabled,

    /// Updates at a fixed interval after the last update.
    Interval { interval: Duration },

    /// Updates at given times of day.
    DailyList(DailyList),

    /// Updates at a fixed interval, counted from a time of day.
    IntervalWithAnchor {
        anchor: u32,
        interval: Duration,
        slots: DailyList,
    },
}

impl SchedulePolicy {
    /// Resolves the policy from the configuration flags.
    pub fn from_config(config: &IssuingPointConfig) -> Self {
        if !config.enable_update_schedule {
            return SchedulePolicy::Disabled
        }

        let interval = if config.enable_interval_updates
            && config.auto_update_interval > 0
        {
            Some(config.auto_update_interval)
        } else {
            None
        };

        if config.enable_daily_updates {
            if let Ok(list) = DailyList::from_str(&config.daily_updates) {
                return match (list.single_slot(), interval) {
                    (Some(anchor), Some(interval)) => {
                        SchedulePolicy::IntervalWithAnchor {
                            anchor: anchor.minute,
                            interval: minutes(interval),
                            slots: DailyList::anchored(
                                anchor.minute, interval
                            ),
                        }
                    }
                    _ => SchedulePolicy::DailyList(list),
                }
            }
        }

        match interval {
            Some(interval) => SchedulePolicy::Interval {
                interval: minutes(interval),
            },
            None => SchedulePolicy::Disabled,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, SchedulePolicy::Disabled)
    }
}


//------------ ScheduleState -------------------------------------------------

/// Timing and numbering state of an issuing point.
///
/// Full and delta CRLs share one number sequence, so after every
/// generation `next_crl_number` and `next_delta_crl_number` are equal.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ScheduleState {
    pub last_update: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
    pub next_delta_update: Option<DateTime<Utc>>,
    pub crl_number: u64,
    pub delta_crl_number: u64,
    pub next_crl_number: u64,
    pub next_delta_crl_number: u64,
    pub schema_counter: u32,
    pub current_day: usize,
    pub last_day: usize,

    /// The update the worker acts on next.
    #[serde(default)]
    pub scheduled: Option<NextUpdate>,

    #[serde(skip)]
    pub update_in_progress: bool,
}

impl ScheduleState {
    pub fn new(initial_crl_number: u64) -> Self {
        ScheduleState {
            crl_number: initial_crl_number,
            delta_crl_number: initial_crl_number,
            next_crl_number: initial_crl_number + 1,
            next_delta_crl_number: initial_crl_number + 1,
            ..Default::default()
        }
    }

    /// Moves the numbering forward for a new full CRL.
    pub fn advance_full(&mut self, this_update: DateTime<Utc>) -> u64 {
        self.crl_number = self.next_crl_number;
        self.delta_crl_number = self.crl_number;
        self.next_crl_number = self.crl_number + 1;
        self.next_delta_crl_number = self.next_crl_number;
        self.schema_counter = 0;
        self.last_update = Some(this_update);
        self.crl_number
    }

    /// Moves the numbering forward for a new delta CRL.
    pub fn advance_delta(
        &mut self, this_update: DateTime<Utc>, schema_counter: u32
    ) -> u64 {
        self.delta_crl_number = self.next_delta_crl_number;
        self.next_delta_crl_number = self.delta_crl_number + 1;
        self.next_crl_number = self.next_delta_crl_number;
        self.schema_counter = schema_counter;
        self.last_update = Some(this_update);
        self.delta_crl_number
    }

    /// Records that the worker moved on to the given day.
    pub fn move_to_day(&mut self, day: usize) {
        self.last_day = self.current_day;
        self.current_day = day;
    }
}


//------------ NextUpdate ----------------------------------------------------

/// The outcome of a schedule calculation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NextUpdate {
    /// When the update is due.
    pub at: DateTime<Utc>,

    /// The value to publish as the CRL's nextUpdate.
    pub next_update: DateTime<Utc>,

    /// Whether this update produces a full CRL.
    pub full: bool,

    /// The schema counter after this update.
    pub schema_counter: u32,

    /// The weekday of the update, 0 is Sunday.
    pub day: usize,
}

impl NextUpdate {
    /// An update that is due right away.
    pub fn immediate(now: DateTime<Utc>) -> Self {
        NextUpdate {
            at: now,
            next_update: now,
            full: true,
            schema_counter: 0,
            day: now.weekday().num_days_from_sunday() as usize,
        }
    }

    /// Returns how long to wait from `now`, zero if the update is due.
    pub fn delay(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.at - now).to_std().unwrap_or_default()
    }
}


//------------ ScheduleCalculator --------------------------------------------

#[derive(Clone, Debug)]
pub struct ScheduleCalculator {
    policy: SchedulePolicy,
    schema: u32,
    delta_mode: bool,
    min_interval: Duration,
    grace: Duration,
    offset: FixedOffset,
    future_this_update: Option<DateTime<Utc>>,
    extended_next_update: bool,
}

impl ScheduleCalculator {
    pub fn from_config(config: &IssuingPointConfig) -> CrlResult<Self> {
        if config.forbid_future_this_update
            && config.future_this_update.is_some()
        {
            return Err(Error::FutureThisUpdateForbidden)
        }

        let offset = match config.utc_offset_minutes {
            Some(offset) => FixedOffset::east_opt(offset * 60).ok_or_else(|| {
                Error::invalid_value(
                    "utc_offset_minutes", offset, "out of range"
                )
            })?,
            None => Local::now().offset().fix(),
        };

        Ok(ScheduleCalculator {
            policy: SchedulePolicy::from_config(config),
            schema: config.update_schema.max(1),
            delta_mode: config.delta_mode(),
            min_interval: minutes(config.min_update_interval),
            grace: minutes(config.next_update_grace_period),
            offset,
            future_this_update: config.future_this_update,
            extended_next_update: config.extended_next_update,
        })
    }

    pub fn policy(&self) -> &SchedulePolicy {
        &self.policy
    }

    pub fn delta_mode(&self) -> bool {
        self.delta_mode
    }

    /// Returns the forced future thisUpdate if it is still ahead of `now`.
    pub fn forced_this_update(
        &self, now: DateTime<Utc>
    ) -> Option<DateTime<Utc>> {
        self.future_this_update.filter(|forced| *forced > now)
    }

    /// Returns the thisUpdate for a CRL generated at `now`.
    pub fn this_update(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.forced_this_update(now).unwrap_or(now)
    }

    /// Calculates the next update.
    ///
    /// With `from_last_update` the calculation starts at the last update
    /// in `state`, otherwise at `now`. With `delta` the next update of any
    /// kind is returned, otherwise the next one producing a full CRL.
    /// Returns `None` if there are no scheduled updates.
    pub fn next_update(
        &self,
        state: &ScheduleState,
        now: DateTime<Utc>,
        from_last_update: bool,
        delta: bool,
    ) -> Option<NextUpdate> {
        let mut reference = match (from_last_update, state.last_update) {
            (true, Some(last)) => last,
            _ => now,
        };
        if let Some(forced) = self.forced_this_update(now) {
            reference = reference.max(forced);
        }

        let counter = state.schema_counter;
        let next = match &self.policy {
            SchedulePolicy::Disabled => return None,
            SchedulePolicy::Interval { interval } => {
                self.interval_update(*interval, reference, counter, delta)
            }
            SchedulePolicy::DailyList(list) => {
                self.daily_update(list, reference, counter, delta)
            }
            SchedulePolicy::IntervalWithAnchor { slots, .. } => {
                self.daily_update(slots, reference, counter, delta)
            }
        };

        debug!(
            "next {} update after {}: {} (counter {})",
            if next.full { "full" } else { "delta" },
            reference.to_rfc3339(),
            next.at.to_rfc3339(),
            next.schema_counter
        );
        Some(next)
    }

    /// Returns the nextUpdate to publish on a CRL issued with `state`.
    ///
    /// The state must already reflect the new CRL. For a full CRL with
    /// `extended_next_update` this is the time of the next full CRL.
    pub fn published_next_update(
        &self, state: &ScheduleState, now: DateTime<Utc>, full: bool
    ) -> Option<DateTime<Utc>> {
        let delta = !(full && self.extended_next_update && self.delta_mode);
        self.next_update(state, now, true, delta).map(|next| next.next_update)
    }

    /// Returns the counter after one more slot and whether it is full.
    fn count(&self, counter: u32) -> (u32, bool) {
        if !self.delta_mode {
            return (0, true)
        }
        let next = counter + 1;
        if next >= self.schema {
            (0, true)
        } else {
            (next, false)
        }
    }

    fn interval_update(
        &self,
        interval: Duration,
        reference: DateTime<Utc>,
        counter: u32,
        delta: bool,
    ) -> NextUpdate {
        let step = interval.max(self.min_interval);
        let mut counter = counter;
        let mut at = reference;
        loop {
            let (next, full) = self.count(counter);
            counter = next;
            at += step;
            if delta || full {
                return self.make(at, full, counter)
            }
        }
    }

    fn daily_update(
        &self,
        list: &DailyList,
        reference: DateTime<Utc>,
        counter: u32,
        delta: bool,
    ) -> NextUpdate {
        let total = list.slot_count().max(1) as u32;
        let needed = if delta || !self.delta_mode || list.is_extended() {
            2
        } else {
            self.schema.saturating_sub(counter).max(1)
        };
        let max_days = 8 + 7 * u64::from(needed);

        let start = reference.with_timezone(&self.offset).date_naive();
        let mut counter = counter;

        for day in 0..max_days {
            let Some(date) = start.checked_add_days(Days::new(day)) else {
                break
            };
            let weekday = date.weekday().num_days_from_sunday() as usize;
            for slot in list.day(weekday) {
                let at = self.slot_time(date, slot);
                if at <= reference || at - reference < self.min_interval {
                    continue
                }
                let (next, full) = if list.is_extended() && self.delta_mode {
                    if slot.full {
                        (0, true)
                    } else {
                        ((counter + 1) % total, false)
                    }
                } else {
                    self.count(counter)
                };
                counter = next;
                if delta || full {
                    return self.make_on_day(at, full, counter, weekday)
                }
            }
        }

        // No usable time found, take the first time of the following day.
        self.first_slot_after(list, start, counter)
    }

    fn first_slot_after(
        &self, list: &DailyList, start: NaiveDate, counter: u32
    ) -> NextUpdate {
        for day in 1..=7 {
            let Some(date) = start.checked_add_days(Days::new(day)) else {
                break
            };
            let weekday = date.weekday().num_days_from_sunday() as usize;
            if let Some(slot) = list.day(weekday).first() {
                let at = self.slot_time(date, slot);
                let (counter, full) = if list.is_extended() && self.delta_mode
                {
                    (if slot.full { 0 } else { counter + 1 }, slot.full)
                } else {
                    self.count(counter)
                };
                return self.make_on_day(at, full, counter, weekday)
            }
        }
        // Only reachable for an empty list, which cannot be parsed.
        self.make(start_of(start, self.offset) + Duration::days(1), true, 0)
    }

    fn slot_time(&self, date: NaiveDate, slot: &Slot) -> DateTime<Utc> {
        start_of(date, self.offset) + Duration::minutes(i64::from(slot.minute))
    }

    fn make(&self, at: DateTime<Utc>, full: bool, counter: u32) -> NextUpdate {
        let day = at
            .with_timezone(&self.offset)
            .weekday()
            .num_days_from_sunday() as usize;
        self.make_on_day(at, full, counter, day)
    }

    fn make_on_day(
        &self, at: DateTime<Utc>, full: bool, counter: u32, day: usize
    ) -> NextUpdate {
        NextUpdate {
            at,
            next_update: at + self.grace,
            full,
            schema_counter: counter,
            day,
        }
    }
}


//------------ Helpers -------------------------------------------------------

fn minutes(value: u32) -> Duration {
    Duration::minutes(i64::from(value))
}

/// Returns local midnight of the given date as UTC.
fn start_of(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    match offset.from_local_datetime(&midnight).single() {
        Some(local) => local.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&midnight),
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::IssuingPointHandle;

    fn config() -> IssuingPointConfig {
        let mut cfg = IssuingPointConfig::new(
            IssuingPointHandle::from_str("master").unwrap()
        );
        cfg.utc_offset_minutes = Some(0);
        cfg
    }

    fn time(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn state_at(last: &str, counter: u32) -> ScheduleState {
        let mut state = ScheduleState::new(0);
        state.last_update = Some(time(last));
        state.schema_counter = counter;
        state
    }

    fn daily(list: &str) -> IssuingPointConfig {
        let mut cfg = config();
        cfg.enable_daily_updates = true;
        cfg.enable_interval_updates = false;
        cfg.daily_updates = list.to_string();
        cfg
    }

    #[test]
    fn parse_daily_lists() {
        let list = DailyList::from_str("1:00, 13:30").unwrap();
        assert_eq!(list.slot_count(), 2);
        assert!(!list.is_extended());
        assert_eq!(list.to_string(), "1:00,13:30");

        let list = DailyList::from_str("*0:00,6:00,12:00,18:00").unwrap();
        assert!(list.is_extended());

        let week = DailyList::from_str("1:00;2:00;;4:00;5:00;6:00;7:00").unwrap();
        assert_eq!(week.slot_count(), 6);
        assert!(week.day(2).is_empty());

        assert!(DailyList::from_str("").is_err());
        assert!(DailyList::from_str("24:00").is_err());
        assert!(DailyList::from_str("3:60").is_err());
        assert!(DailyList::from_str("13:00,1:00").is_err());
        assert!(DailyList::from_str("1:00;2:00").is_err());
        assert!(DailyList::from_str("noon").is_err());
    }

    #[test]
    fn resolve_policies() {
        let mut cfg = config();
        assert_eq!(
            SchedulePolicy::from_config(&cfg),
            SchedulePolicy::Interval { interval: Duration::minutes(240) }
        );

        cfg.enable_daily_updates = true;
        cfg.daily_updates = "2:00".to_string();
        assert!(matches!(
            SchedulePolicy::from_config(&cfg),
            SchedulePolicy::IntervalWithAnchor { anchor: 120, .. }
        ));

        cfg.daily_updates = "2:00,14:00".to_string();
        assert!(matches!(
            SchedulePolicy::from_config(&cfg),
            SchedulePolicy::DailyList(_)
        ));

        cfg.daily_updates = "garbage".to_string();
        assert!(matches!(
            SchedulePolicy::from_config(&cfg),
            SchedulePolicy::Interval { .. }
        ));

        cfg.enable_interval_updates = false;
        assert!(SchedulePolicy::from_config(&cfg).is_disabled());

        cfg.enable_update_schedule = false;
        cfg.enable_interval_updates = true;
        assert!(SchedulePolicy::from_config(&cfg).is_disabled());
    }

    #[test]
    fn daily_single_time_rolls_to_next_day() {
        let calc = ScheduleCalculator::from_config(&daily("03:45")).unwrap();
        let state = state_at("2024-03-05T04:00:00Z", 0);

        let next = calc
            .next_update(&state, time("2024-03-05T04:00:10Z"), true, true)
            .unwrap();
        assert_eq!(next.at, time("2024-03-06T03:45:00Z"));
        assert!(next.full);
    }

    #[test]
    fn daily_applies_local_offset() {
        let mut cfg = daily("03:45");
        cfg.utc_offset_minutes = Some(120);
        let calc = ScheduleCalculator::from_config(&cfg).unwrap();

        // 04:00 local is 02:00 UTC.
        let state = state_at("2024-03-05T02:00:00Z", 0);
        let next = calc
            .next_update(&state, time("2024-03-05T02:00:00Z"), true, true)
            .unwrap();
        assert_eq!(next.at, time("2024-03-06T01:45:00Z"));
    }

    #[test]
    fn daily_skips_times_within_min_interval() {
        let mut cfg = daily("1:00,2:00,12:00");
        cfg.min_update_interval = 90;
        let calc = ScheduleCalculator::from_config(&cfg).unwrap();

        let state = state_at("2024-03-05T00:45:00Z", 0);
        let next = calc
            .next_update(&state, time("2024-03-05T00:45:00Z"), true, true)
            .unwrap();
        assert_eq!(next.at, time("2024-03-05T12:00:00Z"));
    }

    #[test]
    fn daily_falls_back_to_first_time_of_next_day() {
        let mut cfg = daily("1:00,2:00");
        cfg.min_update_interval = 60 * 24 * 30;
        let calc = ScheduleCalculator::from_config(&cfg).unwrap();

        let state = state_at("2024-03-05T01:30:00Z", 0);
        let next = calc
            .next_update(&state, time("2024-03-05T01:30:00Z"), true, true)
            .unwrap();
        assert_eq!(next.at, time("2024-03-06T01:00:00Z"));
    }

    #[test]
    fn weekly_list_walks_days() {
        // 2024-03-05 is a Tuesday, Wednesday has no times.
        let calc = ScheduleCalculator::from_config(
            &daily("1:00;1:00;1:00;;4:00;5:00;6:00")
        ).unwrap();

        let state = state_at("2024-03-05T02:00:00Z", 0);
        let next = calc
            .next_update(&state, time("2024-03-05T02:00:00Z"), true, true)
            .unwrap();
        assert_eq!(next.at, time("2024-03-07T04:00:00Z"));
        assert_eq!(next.day, 4);
    }

    #[test]
    fn schema_counter_on_daily_list() {
        let mut cfg = daily("0:00,6:00,12:00,18:00");
        cfg.update_schema = 4;
        let calc = ScheduleCalculator::from_config(&cfg).unwrap();

        let mut state = state_at("2024-03-05T00:00:00Z", 0);
        let now = time("2024-03-05T00:00:00Z");

        let mut fulls = vec![];
        for _ in 0..8 {
            let next = calc.next_update(&state, now, true, true).unwrap();
            assert!(next.schema_counter < 4);
            fulls.push(next.full);
            state.last_update = Some(next.at);
            state.schema_counter = next.schema_counter;
        }
        assert_eq!(
            fulls,
            vec![false, false, false, true, false, false, false, true]
        );

        // Full timing from the start of the cycle skips the deltas.
        let state = state_at("2024-03-05T00:00:00Z", 0);
        let full = calc.next_update(&state, now, true, false).unwrap();
        assert_eq!(full.at, time("2024-03-06T00:00:00Z"));
        assert!(full.full);
        assert_eq!(full.schema_counter, 0);
    }

    #[test]
    fn extended_list_marks_full_times() {
        let mut cfg = daily("*0:00,6:00,12:00,18:00");
        cfg.update_schema = 2;
        let calc = ScheduleCalculator::from_config(&cfg).unwrap();
        let now = time("2024-03-05T00:00:00Z");

        let state = state_at("2024-03-05T00:00:00Z", 0);
        let next = calc.next_update(&state, now, true, true).unwrap();
        assert_eq!(next.at, time("2024-03-05T06:00:00Z"));
        assert!(!next.full);
        assert_eq!(next.schema_counter, 1);

        let full = calc.next_update(&state, now, true, false).unwrap();
        assert_eq!(full.at, time("2024-03-06T00:00:00Z"));
        assert!(full.full);
        assert_eq!(full.schema_counter, 0);
    }

    #[test]
    fn interval_with_delta_schema() {
        let mut cfg = config();
        cfg.auto_update_interval = 60;
        cfg.update_schema = 3;
        let calc = ScheduleCalculator::from_config(&cfg).unwrap();
        let now = time("2024-03-05T10:00:00Z");

        let state = state_at("2024-03-05T10:00:00Z", 0);
        let next = calc.next_update(&state, now, true, true).unwrap();
        assert_eq!(next.at, time("2024-03-05T11:00:00Z"));
        assert!(!next.full);

        let full = calc.next_update(&state, now, true, false).unwrap();
        assert_eq!(full.at, time("2024-03-05T13:00:00Z"));
        assert!(full.full);

        let state = state_at("2024-03-05T10:00:00Z", 2);
        let next = calc.next_update(&state, now, true, true).unwrap();
        assert!(next.full);
        assert_eq!(next.schema_counter, 0);
    }

    #[test]
    fn interval_clamped_to_min_and_grace_added() {
        let mut cfg = config();
        cfg.auto_update_interval = 10;
        cfg.min_update_interval = 30;
        cfg.next_update_grace_period = 5;
        let calc = ScheduleCalculator::from_config(&cfg).unwrap();
        let now = time("2024-03-05T10:00:00Z");

        let next = calc
            .next_update(&ScheduleState::new(0), now, false, true)
            .unwrap();
        assert_eq!(next.at, time("2024-03-05T10:30:00Z"));
        assert_eq!(next.next_update, time("2024-03-05T10:35:00Z"));
    }

    #[test]
    fn anchored_interval() {
        let mut cfg = daily("2:00");
        cfg.enable_interval_updates = true;
        cfg.auto_update_interval = 360;
        let calc = ScheduleCalculator::from_config(&cfg).unwrap();
        let now = time("2024-03-05T09:00:00Z");

        let state = state_at("2024-03-05T09:00:00Z", 0);
        let next = calc.next_update(&state, now, true, true).unwrap();
        assert_eq!(next.at, time("2024-03-05T14:00:00Z"));

        let state = state_at("2024-03-05T21:00:00Z", 0);
        let next = calc.next_update(&state, now, true, true).unwrap();
        assert_eq!(next.at, time("2024-03-06T02:00:00Z"));
    }

    #[test]
    fn anchored_interval_scales_full_timing() {
        let mut cfg = daily("0:00");
        cfg.enable_interval_updates = true;
        cfg.auto_update_interval = 60;
        cfg.update_schema = 4;
        let calc = ScheduleCalculator::from_config(&cfg).unwrap();
        let now = time("2024-03-05T10:00:00Z");

        let state = state_at("2024-03-05T10:00:00Z", 0);
        let full = calc.next_update(&state, now, true, false).unwrap();
        assert_eq!(full.at, time("2024-03-05T14:00:00Z"));
    }

    #[test]
    fn forced_future_this_update() {
        let mut cfg = config();
        cfg.auto_update_interval = 60;
        cfg.future_this_update = Some(time("2024-03-06T00:00:00Z"));
        let calc = ScheduleCalculator::from_config(&cfg).unwrap();
        let now = time("2024-03-05T10:00:00Z");

        assert_eq!(calc.this_update(now), time("2024-03-06T00:00:00Z"));
        let next = calc
            .next_update(&ScheduleState::new(0), now, false, true)
            .unwrap();
        assert_eq!(next.at, time("2024-03-06T01:00:00Z"));

        // Once passed, the override no longer applies.
        let later = time("2024-03-07T00:00:00Z");
        assert_eq!(calc.this_update(later), later);

        cfg.forbid_future_this_update = true;
        assert!(matches!(
            ScheduleCalculator::from_config(&cfg),
            Err(Error::FutureThisUpdateForbidden)
        ));
    }

    #[test]
    fn disabled_schedule() {
        let mut cfg = config();
        cfg.enable_update_schedule = false;
        let calc = ScheduleCalculator::from_config(&cfg).unwrap();
        assert!(calc
            .next_update(&ScheduleState::new(0), Utc::now(), false, true)
            .is_none());
    }

    #[test]
    fn numbering() {
        let now = time("2024-03-05T10:00:00Z");
        let mut state = ScheduleState::new(0);
        assert_eq!(state.advance_full(now), 1);
        assert_eq!(state.delta_crl_number, 1);
        assert_eq!(state.advance_delta(now, 1), 2);
        assert_eq!(state.crl_number, 1);
        assert_eq!(state.advance_full(now), 3);
        assert_eq!(state.delta_crl_number, 3);
        assert_eq!(state.schema_counter, 0);
        assert_eq!(state.next_crl_number, state.next_delta_crl_number);
    }
}
