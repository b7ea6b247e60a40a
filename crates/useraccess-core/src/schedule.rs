//! Recurring trigger for the notification batch run.
//!
//! Installing the plugin registers a schedule in the kv store; uninstalling
//! cancels it. A tick only runs the batch when the registration is due.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::clock::{format_timestamp, parse_timestamp};
use crate::error::DatabaseError;
use crate::storage::UserDirectory;

const KEY_RECURRENCE: &str = "schedule.recurrence";
const KEY_NEXT_RUN: &str = "schedule.next_run";

/// How often the batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    #[default]
    Daily,
    TwiceWeekly,
}

impl Recurrence {
    pub fn interval(self) -> Duration {
        match self {
            Recurrence::Daily => Duration::days(1),
            Recurrence::TwiceWeekly => Duration::hours(84),
        }
    }

    /// Longest gap between runs, in whole days rounded up.
    pub fn max_gap_days(self) -> i64 {
        let hours = self.interval().num_hours();
        (hours + 23) / 24
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Recurrence::Daily => "daily",
            Recurrence::TwiceWeekly => "twice_weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Recurrence::Daily),
            "twice_weekly" => Some(Recurrence::TwiceWeekly),
            _ => None,
        }
    }
}

/// A registered schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub recurrence: Recurrence,
    #[serde(with = "crate::user::ts_format")]
    pub next_run: NaiveDateTime,
}

impl ScheduleState {
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        now >= self.next_run
    }

    /// Next run strictly after `now`, keeping the registered cadence.
    pub fn advanced(&self, now: NaiveDateTime) -> Self {
        let step = self.recurrence.interval();
        let mut next = self.next_run;
        while next <= now {
            next += step;
        }
        Self {
            recurrence: self.recurrence,
            next_run: next,
        }
    }
}

/// Current registration, if any.
pub fn state(dir: &dyn UserDirectory) -> Result<Option<ScheduleState>, DatabaseError> {
    let (Some(recurrence), Some(next_run)) = (dir.kv_get(KEY_RECURRENCE)?, dir.kv_get(KEY_NEXT_RUN)?)
    else {
        return Ok(None);
    };
    let recurrence = Recurrence::parse(&recurrence).ok_or_else(|| DatabaseError::CorruptValue {
        user_id: 0,
        key: KEY_RECURRENCE.into(),
        value: recurrence.clone(),
    })?;
    let next_run = parse_timestamp(&next_run).ok_or_else(|| DatabaseError::CorruptValue {
        user_id: 0,
        key: KEY_NEXT_RUN.into(),
        value: next_run.clone(),
    })?;
    Ok(Some(ScheduleState {
        recurrence,
        next_run,
    }))
}

pub fn save(dir: &dyn UserDirectory, state: &ScheduleState) -> Result<(), DatabaseError> {
    dir.kv_set(KEY_RECURRENCE, state.recurrence.as_str())?;
    dir.kv_set(KEY_NEXT_RUN, &format_timestamp(state.next_run))
}

/// Register the recurring run, first due at `now`.
///
/// An existing registration keeps its next run time; only the recurrence
/// is updated.
pub fn register(
    dir: &dyn UserDirectory,
    recurrence: Recurrence,
    now: NaiveDateTime,
) -> Result<ScheduleState, DatabaseError> {
    let state = match state(dir)? {
        Some(existing) => ScheduleState {
            recurrence,
            ..existing
        },
        None => ScheduleState {
            recurrence,
            next_run: now,
        },
    };
    save(dir, &state)?;
    tracing::info!(
        recurrence = recurrence.as_str(),
        next_run = %format_timestamp(state.next_run),
        "batch run scheduled"
    );
    Ok(state)
}

/// Remove the registration. Returns whether one existed.
pub fn cancel(dir: &dyn UserDirectory) -> Result<bool, DatabaseError> {
    let existed = state(dir)?.is_some();
    dir.kv_delete(KEY_RECURRENCE)?;
    dir.kv_delete(KEY_NEXT_RUN)?;
    if existed {
        tracing::info!("batch run schedule cancelled");
    }
    Ok(existed)
}
