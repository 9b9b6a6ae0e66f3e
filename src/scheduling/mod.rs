//! Schedule evaluation
//!
//! Decides, for a pipeline and an instant, whether a run is due: the
//! instant must fall within the tolerance window around the scheduled
//! occurrence and the pipeline must not have run in that period already.
//! All decision functions take `now` explicitly so they stay deterministic
//! and repeatable.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use cron::Schedule;
use tracing::{debug, warn};

use crate::config::SchedulingConfig;
use crate::errors::EngineResult;
use crate::models::{Frequency, Pipeline};
use crate::storage::PipelineStore;

pub struct Scheduler {
    pipelines: Arc<dyn PipelineStore>,
    config: SchedulingConfig,
}

impl Scheduler {
    pub fn new(pipelines: Arc<dyn PipelineStore>, config: SchedulingConfig) -> Self {
        Self { pipelines, config }
    }

    fn tolerance(&self) -> Duration {
        Duration::minutes(i64::from(self.config.tolerance_minutes))
    }

    // never zero: a zero step would make the occurrence loops spin forever
    fn interval_hours(&self, configured: u32) -> i64 {
        let hours = if configured == 0 {
            i64::from(self.config.custom_interval_hours)
        } else {
            i64::from(configured)
        };
        hours.max(1)
    }

    /// Whether the pipeline is due at `now`
    pub fn is_ready_for_execution(&self, pipeline: &Pipeline, now: DateTime<Utc>) -> bool {
        let schedule = &pipeline.schedule;
        if !schedule.is_active {
            return false;
        }
        let Some(occurrence) = self.current_occurrence(pipeline, now) else {
            return false;
        };
        if (now - occurrence).abs() > self.tolerance() {
            return false;
        }
        // already ran for this occurrence
        if let Some(last) = schedule.last_executed_at {
            if last >= occurrence - self.tolerance() {
                return false;
            }
        }
        true
    }

    /// The next occurrence strictly after `now`
    ///
    /// Pure in `pipeline` and `now`: calling it twice without an
    /// intervening execution yields the same timestamp.
    pub fn calculate_next_execution(
        &self,
        pipeline: &Pipeline,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let schedule = &pipeline.schedule;
        let start = schedule.start_time;
        match &schedule.frequency {
            Frequency::Daily => {
                let today = now.date_naive().and_time(start).and_utc();
                if today > now {
                    Some(today)
                } else {
                    Some(today + Duration::days(1))
                }
            }
            Frequency::Hourly => {
                let this_hour = now
                    .date_naive()
                    .and_hms_opt(now.hour(), start.minute(), start.second())?
                    .and_utc();
                if this_hour > now {
                    Some(this_hour)
                } else {
                    Some(this_hour + Duration::hours(1))
                }
            }
            Frequency::CustomInterval(hours) => {
                let step = Duration::hours(self.interval_hours(*hours));
                let mut occurrence = now.date_naive().and_time(start).and_utc() - Duration::days(1);
                while occurrence <= now {
                    occurrence += step;
                }
                Some(occurrence)
            }
            Frequency::Cron(expression) => match Schedule::from_str(expression) {
                Ok(schedule) => schedule.after(&now).next(),
                Err(e) => {
                    warn!(
                        pipeline_id = pipeline.id,
                        expression, error = %e,
                        "invalid cron expression"
                    );
                    None
                }
            },
        }
    }

    /// The occurrence `now` belongs to: the latest one at or before
    /// `now + tolerance`
    fn current_occurrence(&self, pipeline: &Pipeline, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let probe = now + self.tolerance();
        let schedule = &pipeline.schedule;
        let start = schedule.start_time;
        match &schedule.frequency {
            Frequency::Daily => {
                let today = probe.date_naive().and_time(start).and_utc();
                if today <= probe {
                    Some(today)
                } else {
                    Some(today - Duration::days(1))
                }
            }
            Frequency::Hourly => {
                let this_hour = probe
                    .date_naive()
                    .and_hms_opt(probe.hour(), start.minute(), start.second())?
                    .and_utc();
                if this_hour <= probe {
                    Some(this_hour)
                } else {
                    Some(this_hour - Duration::hours(1))
                }
            }
            Frequency::CustomInterval(hours) => {
                let step = Duration::hours(self.interval_hours(*hours));
                let mut occurrence = probe.date_naive().and_time(start).and_utc() - Duration::days(1);
                let mut previous = occurrence;
                while occurrence <= probe {
                    previous = occurrence;
                    occurrence += step;
                }
                Some(previous)
            }
            Frequency::Cron(expression) => {
                let schedule = Schedule::from_str(expression).ok()?;
                // the cron crate only iterates forward; step back far
                // enough to cover the tolerance window
                schedule
                    .after(&(now - self.tolerance() - Duration::seconds(1)))
                    .take_while(|occurrence| *occurrence <= probe)
                    .last()
            }
        }
    }

    /// Active pipelines, optionally narrowed to one frequency kind
    pub async fn get_scheduled_pipelines(
        &self,
        frequency: Option<&Frequency>,
    ) -> EngineResult<Vec<Pipeline>> {
        let pipelines = self.pipelines.all().await?;
        Ok(pipelines
            .into_iter()
            .filter(|p| p.schedule.is_active)
            .filter(|p| {
                frequency.map_or(true, |f| {
                    std::mem::discriminant(f) == std::mem::discriminant(&p.schedule.frequency)
                })
            })
            .collect())
    }

    /// Pipelines due at `now`
    pub async fn due_pipelines(&self, now: DateTime<Utc>) -> EngineResult<Vec<Pipeline>> {
        let pipelines = self.get_scheduled_pipelines(None).await?;
        Ok(pipelines
            .into_iter()
            .filter(|p| self.is_ready_for_execution(p, now))
            .collect())
    }

    /// Record a run and persist the recomputed next occurrence
    pub async fn mark_executed(
        &self,
        pipeline: &Pipeline,
        now: DateTime<Utc>,
    ) -> EngineResult<Pipeline> {
        let mut updated = pipeline.clone();
        updated.schedule.last_executed_at = Some(now);
        updated.schedule.next_execution_at = self.calculate_next_execution(&updated, now);
        self.pipelines.update(updated).await
    }

    /// Administrative recovery: recompute `next_execution_at` for every
    /// active pipeline
    pub async fn recompute_all(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let pipelines = self.get_scheduled_pipelines(None).await?;
        let mut updated = 0;
        for pipeline in pipelines {
            let next = self.calculate_next_execution(&pipeline, now);
            if next != pipeline.schedule.next_execution_at {
                let mut changed = pipeline;
                changed.schedule.next_execution_at = next;
                self.pipelines.update(changed).await?;
                updated += 1;
            }
        }
        debug!(updated, "recomputed schedules");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn pipeline(frequency: serde_json::Value, start_time: &str) -> Pipeline {
        serde_json::from_value(json!({
            "id": 1,
            "organization_id": 1,
            "name": "nightly",
            "source": {"url": "https://example.com/feed.csv"},
            "reader": {"reader_type": "csv"},
            "schedule": {
                "frequency": frequency,
                "start_time": start_time,
                "is_active": true
            }
        }))
        .unwrap()
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(MemoryStorage::shared(), SchedulingConfig::default())
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn daily_is_due_inside_the_tolerance_window() {
        let scheduler = scheduler();
        let p = pipeline(json!({"kind": "daily"}), "06:00:00");

        assert!(scheduler.is_ready_for_execution(&p, at("2026-03-01T06:03:00Z")));
        assert!(scheduler.is_ready_for_execution(&p, at("2026-03-01T05:57:00Z")));
        assert!(!scheduler.is_ready_for_execution(&p, at("2026-03-01T06:20:00Z")));
        assert!(!scheduler.is_ready_for_execution(&p, at("2026-03-01T12:00:00Z")));
    }

    #[test]
    fn a_run_in_the_current_period_suppresses_the_next_trigger() {
        let scheduler = scheduler();
        let mut p = pipeline(json!({"kind": "daily"}), "06:00:00");
        p.schedule.last_executed_at = Some(at("2026-03-01T06:00:30Z"));

        assert!(!scheduler.is_ready_for_execution(&p, at("2026-03-01T06:03:00Z")));
        // next day is a fresh period
        assert!(scheduler.is_ready_for_execution(&p, at("2026-03-02T06:01:00Z")));
    }

    #[test]
    fn inactive_pipelines_are_never_due() {
        let scheduler = scheduler();
        let mut p = pipeline(json!({"kind": "daily"}), "06:00:00");
        p.schedule.is_active = false;
        assert!(!scheduler.is_ready_for_execution(&p, at("2026-03-01T06:00:00Z")));
    }

    #[test]
    fn next_execution_is_idempotent() {
        let scheduler = scheduler();
        let now = at("2026-03-01T09:00:00Z");
        for frequency in [
            json!({"kind": "daily"}),
            json!({"kind": "hourly"}),
            json!({"kind": "custom_interval", "value": 6}),
            json!({"kind": "cron", "value": "0 30 6 * * * *"}),
        ] {
            let p = pipeline(frequency, "06:30:00");
            let first = scheduler.calculate_next_execution(&p, now);
            let second = scheduler.calculate_next_execution(&p, now);
            assert!(first.is_some());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn daily_next_execution_rolls_over_midnight() {
        let scheduler = scheduler();
        let p = pipeline(json!({"kind": "daily"}), "06:00:00");
        assert_eq!(
            scheduler.calculate_next_execution(&p, at("2026-03-01T05:00:00Z")),
            Some(at("2026-03-01T06:00:00Z"))
        );
        assert_eq!(
            scheduler.calculate_next_execution(&p, at("2026-03-01T07:00:00Z")),
            Some(at("2026-03-02T06:00:00Z"))
        );
    }

    #[test]
    fn custom_interval_steps_from_the_daily_anchor() {
        let scheduler = scheduler();
        let p = pipeline(json!({"kind": "custom_interval", "value": 6}), "02:00:00");
        assert_eq!(
            scheduler.calculate_next_execution(&p, at("2026-03-01T09:00:00Z")),
            Some(at("2026-03-01T14:00:00Z"))
        );
        assert!(scheduler.is_ready_for_execution(&p, at("2026-03-01T08:02:00Z")));
    }

    #[test]
    fn zero_interval_falls_back_to_the_configured_hours() {
        let scheduler = scheduler();
        let p = pipeline(json!({"kind": "custom_interval", "value": 0}), "00:00:00");
        // config default is 6 hours
        assert_eq!(
            scheduler.calculate_next_execution(&p, at("2026-03-01T01:00:00Z")),
            Some(at("2026-03-01T06:00:00Z"))
        );
    }

    #[test]
    fn zero_interval_everywhere_steps_hourly_instead_of_spinning() {
        let mut config = SchedulingConfig::default();
        config.custom_interval_hours = 0;
        let scheduler = Scheduler::new(MemoryStorage::shared(), config);
        let p = pipeline(json!({"kind": "custom_interval", "value": 0}), "00:00:00");

        assert_eq!(
            scheduler.calculate_next_execution(&p, at("2026-03-01T01:30:00Z")),
            Some(at("2026-03-01T02:00:00Z"))
        );
        assert!(scheduler.is_ready_for_execution(&p, at("2026-03-01T02:01:00Z")));
    }

    #[test]
    fn invalid_cron_is_never_due() {
        let scheduler = scheduler();
        let p = pipeline(json!({"kind": "cron", "value": "not cron"}), "00:00:00");
        assert!(scheduler.calculate_next_execution(&p, Utc::now()).is_none());
        assert!(!scheduler.is_ready_for_execution(&p, Utc::now()));
    }

    #[tokio::test]
    async fn recompute_all_persists_next_occurrences() {
        let storage = MemoryStorage::shared();
        let scheduler = Scheduler::new(storage.clone(), SchedulingConfig::default());
        storage
            .create(pipeline(json!({"kind": "daily"}), "06:00:00"))
            .await
            .unwrap();

        let updated = scheduler.recompute_all(at("2026-03-01T05:00:00Z")).await.unwrap();
        assert_eq!(updated, 1);
        let stored = PipelineStore::find(storage.as_ref(), 1).await.unwrap().unwrap();
        assert_eq!(
            stored.schedule.next_execution_at,
            Some(at("2026-03-01T06:00:00Z"))
        );
    }
}
