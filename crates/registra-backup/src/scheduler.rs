//! Automatic backup scheduling.
//!
//! One background task polls on a fixed interval and asks the orchestrator
//! whether the schedule is due. The next run is always advanced by one full
//! period from the *previous scheduled time*, never from "now", so repeated
//! delays do not drift the cadence. A late scheduler catches up one period
//! per tick.

use crate::orchestrator::BackupOrchestrator;
use crate::{BackupError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::info;

/// Recognized backup cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    /// Parse the external string form; anything else is `InvalidSchedule`.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            other => Err(BackupError::InvalidSchedule(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
        }
    }

    /// One period after `from`, calendar-aware for monthly and yearly.
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Frequency::Daily => from + ChronoDuration::days(1),
            Frequency::Weekly => from + ChronoDuration::weeks(1),
            Frequency::Monthly => from + Months::new(1),
            Frequency::Yearly => from + Months::new(12),
        }
    }
}

/// Process-wide automatic trigger state. Mutated only through
/// `BackupOrchestrator::update_schedule`; read on every scheduler tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub frequency: Frequency,
    pub next_run: DateTime<Utc>,
}

impl ScheduleConfig {
    /// Schedule whose first fire is one period after `now`.
    pub fn starting_at(frequency: Frequency, now: DateTime<Utc>) -> Self {
        Self {
            frequency,
            next_run: frequency.advance(now),
        }
    }
}

/// Background timer driving scheduled backups.
pub struct Scheduler {
    poll_interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Spawn the polling task. Errors if already running.
    pub async fn start(&self, orchestrator: Arc<BackupOrchestrator>) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(BackupError::Internal("scheduler already running".into()));
            }
            *running = true;
        }
        info!("backup scheduler started (poll every {:?})", self.poll_interval);

        let running = self.running.clone();
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            loop {
                ticker.tick().await;
                if !*running.read().await {
                    break;
                }
                orchestrator.run_scheduled_tick().await;
            }
            info!("backup scheduler stopped");
        });

        Ok(())
    }

    /// Ask the polling task to exit on its next tick.
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_accepts_the_four_frequencies() {
        assert_eq!(Frequency::parse("daily").unwrap(), Frequency::Daily);
        assert_eq!(Frequency::parse("weekly").unwrap(), Frequency::Weekly);
        assert_eq!(Frequency::parse("monthly").unwrap(), Frequency::Monthly);
        assert_eq!(Frequency::parse("yearly").unwrap(), Frequency::Yearly);
    }

    #[test]
    fn parse_rejects_unknown_values() {
        for bad in ["hourly", "DAILY", "", "fortnightly"] {
            match Frequency::parse(bad) {
                Err(BackupError::InvalidSchedule(v)) => assert_eq!(v, bad),
                other => panic!("expected InvalidSchedule, got {other:?}"),
            }
        }
    }

    #[test]
    fn advance_is_anchored_to_the_previous_time() {
        let anchor = Utc.with_ymd_and_hms(2026, 1, 15, 2, 0, 0).unwrap();

        assert_eq!(
            Frequency::Daily.advance(anchor),
            Utc.with_ymd_and_hms(2026, 1, 16, 2, 0, 0).unwrap()
        );
        assert_eq!(
            Frequency::Weekly.advance(anchor),
            Utc.with_ymd_and_hms(2026, 1, 22, 2, 0, 0).unwrap()
        );
        assert_eq!(
            Frequency::Monthly.advance(anchor),
            Utc.with_ymd_and_hms(2026, 2, 15, 2, 0, 0).unwrap()
        );
        assert_eq!(
            Frequency::Yearly.advance(anchor),
            Utc.with_ymd_and_hms(2027, 1, 15, 2, 0, 0).unwrap()
        );
    }

    #[test]
    fn monthly_advance_clamps_short_months() {
        let jan31 = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            Frequency::Monthly.advance(jan31),
            Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn starting_at_fires_one_period_out() {
        let now = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();
        let schedule = ScheduleConfig::starting_at(Frequency::Weekly, now);
        assert_eq!(schedule.next_run, now + ChronoDuration::weeks(1));
    }
}
