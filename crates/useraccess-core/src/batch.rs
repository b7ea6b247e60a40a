//! One scheduled batch run: scan and dispatch for every notification kind.
//!
//! Overlapping runs are not guarded against here; the caller's scheduler
//! must invoke at most one run at a time.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::format_timestamp;
use crate::error::Result;
use crate::notify::{scan, template_for, window_for, DeliveryReport, Dispatcher, MailTransport};
use crate::schedule;
use crate::storage::{Config, UserDirectory};
use crate::user::NotificationKind;

/// Admin-facing summary of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    #[serde(with = "crate::user::ts_format")]
    pub started_at: NaiveDateTime,
    pub reports: Vec<DeliveryReport>,
}

impl BatchReport {
    /// Why the run stopped early, if it did.
    pub fn fatal(&self) -> Option<&str> {
        self.reports.iter().find_map(|r| r.aborted.as_deref())
    }

    pub fn report(&self, kind: NotificationKind) -> Option<&DeliveryReport> {
        self.reports.iter().find(|r| r.kind == kind)
    }

    pub fn total_sent(&self) -> usize {
        self.reports.iter().map(DeliveryReport::sent_count).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.reports.iter().map(DeliveryReport::failed_count).sum()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {} at {}",
            self.run_id,
            format_timestamp(self.started_at)
        )?;
        for r in &self.reports {
            writeln!(
                f,
                "  {}: {} sent, {} failed",
                r.kind.label(),
                r.sent_count(),
                r.failed_count()
            )?;
            for addr in &r.failed {
                writeln!(f, "    failed: {addr}")?;
            }
            if let Some(reason) = &r.aborted {
                writeln!(f, "    aborted: {reason}")?;
            }
        }
        Ok(())
    }
}

/// Kinds that run under `config`, in order.
fn enabled_kinds(config: &Config) -> Vec<NotificationKind> {
    let mut kinds = vec![NotificationKind::ExpiryWarning];
    if config.welcome.enabled {
        kinds.push(NotificationKind::Welcome);
    }
    kinds
}

/// Scan and dispatch every enabled kind at `now`.
///
/// Storage failures while scanning are returned as errors. Delivery
/// problems are folded into the report; once the transport is unavailable
/// the remaining kinds are recorded as aborted without being attempted.
pub fn run_batch(
    dir: &dyn UserDirectory,
    config: &Config,
    transport: &dyn MailTransport,
    now: NaiveDateTime,
) -> Result<BatchReport> {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("batch_run", %run_id);
    let _enter = span.enter();

    if config.welcome.enabled {
        let gap = config.schedule.recurrence.max_gap_days();
        if config.welcome.grace_days < gap {
            tracing::warn!(
                grace_days = config.welcome.grace_days,
                max_gap_days = gap,
                "welcome grace window is shorter than the run interval; users can be missed"
            );
        }
    }

    let dispatcher = Dispatcher::new(dir, transport, &config.mail);
    let mut reports = Vec::new();
    let mut fatal: Option<String> = None;

    for kind in enabled_kinds(config) {
        if let Some(reason) = &fatal {
            let mut skipped = DeliveryReport::new(kind);
            skipped.aborted = Some(format!("skipped: {reason}"));
            reports.push(skipped);
            continue;
        }

        let window = window_for(kind, config, now);
        let due = scan(dir, kind, window)?;
        tracing::info!(
            kind = kind.label(),
            due = due.len(),
            start = %format_timestamp(window.start),
            end = %format_timestamp(window.end),
            "scan finished"
        );

        let report = dispatcher.dispatch(kind, &due, &template_for(kind, config), now);
        fatal = report.aborted.clone();
        reports.push(report);
    }

    let report = BatchReport {
        run_id,
        started_at: now,
        reports,
    };
    match report.fatal() {
        Some(reason) => tracing::error!(reason, "batch run aborted"),
        None => tracing::info!(
            sent = report.total_sent(),
            failed = report.total_failed(),
            "batch run finished"
        ),
    }
    Ok(report)
}

/// Run the batch if the registered schedule is due, then move the schedule
/// forward. Returns `None` when nothing ran.
pub fn tick(
    dir: &dyn UserDirectory,
    config: &Config,
    transport: &dyn MailTransport,
    now: NaiveDateTime,
) -> Result<Option<BatchReport>> {
    let Some(state) = schedule::state(dir)? else {
        tracing::debug!("no batch schedule registered");
        return Ok(None);
    };
    if !state.is_due(now) {
        return Ok(None);
    }

    let report = run_batch(dir, config, transport, now)?;
    schedule::save(dir, &state.advanced(now))?;
    Ok(Some(report))
}
