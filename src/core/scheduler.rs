//! Periodic schedule triggers
//!
//! Each `SchedulePeriod` owns a well-known fan-out handler. Triggering a
//! period pushes one fan-out task whose collision sign keeps at most one of
//! them live at a time.

use crate::error::{Error, Result};
use crate::models::{Params, PushOptions, Task, DEFAULT_TOPIC};
use crate::queue::QueueService;
use clap::ValueEnum;
use cron::Schedule;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum SchedulePeriod {
    #[value(name = "every-10-minutes")]
    TenMinutes,
    #[value(name = "hour-start")]
    HourStart,
    #[value(name = "day-start")]
    DayStart,
    #[value(name = "week-start")]
    WeekStart,
    #[value(name = "month-start")]
    MonthStart,
}

impl SchedulePeriod {
    pub const ALL: [SchedulePeriod; 5] = [
        SchedulePeriod::TenMinutes,
        SchedulePeriod::HourStart,
        SchedulePeriod::DayStart,
        SchedulePeriod::WeekStart,
        SchedulePeriod::MonthStart,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SchedulePeriod::TenMinutes => "every-10-minutes",
            SchedulePeriod::HourStart => "hour-start",
            SchedulePeriod::DayStart => "day-start",
            SchedulePeriod::WeekStart => "week-start",
            SchedulePeriod::MonthStart => "month-start",
        }
    }

    /// Cron format: second minute hour day month weekday
    pub fn cron_expression(&self) -> &'static str {
        match self {
            SchedulePeriod::TenMinutes => "0 */10 * * * *",
            SchedulePeriod::HourStart => "0 0 * * * *",
            SchedulePeriod::DayStart => "0 0 0 * * *",
            SchedulePeriod::WeekStart => "0 0 0 * * Mon",
            SchedulePeriod::MonthStart => "0 0 0 1 * *",
        }
    }

    pub fn schedule(&self) -> Result<Schedule> {
        Schedule::from_str(self.cron_expression()).map_err(|e| {
            Error::Config(format!(
                "invalid cron expression '{}': {}",
                self.cron_expression(),
                e
            ))
        })
    }

    /// Name of the fan-out handler this period enqueues.
    pub fn handler(&self) -> String {
        format!("schedule.{}", self.name())
    }

    pub fn collision_sign(&self) -> String {
        format!("schedule:{}", self.name())
    }
}

impl fmt::Display for SchedulePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchedulePeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SchedulePeriod::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| Error::Config(format!("unknown schedule period '{}'", s)))
    }
}

/// Push the fan-out task for `period`.
pub async fn trigger(queue: &QueueService, period: SchedulePeriod) -> Result<Task> {
    let task = queue
        .push(
            &period.handler(),
            Params::new(),
            PushOptions::default()
                .topic(DEFAULT_TOPIC)
                .collision_sign(period.collision_sign()),
        )
        .await?;
    info!(
        period = %period,
        task_id = %task.id,
        status = %task.status,
        "Schedule: triggered {} (task {} is {})",
        period,
        task.id,
        task.status
    );
    Ok(task)
}

/// In-process cron loop that triggers every period on its own schedule.
pub struct PeriodScheduler {
    queue: Arc<QueueService>,
    periods: Vec<SchedulePeriod>,
    handles: Arc<RwLock<Vec<tokio::task::JoinHandle<()>>>>,
}

impl PeriodScheduler {
    pub fn new(queue: Arc<QueueService>, periods: Vec<SchedulePeriod>) -> Result<Self> {
        for period in &periods {
            period.schedule()?;
            queue.registry().ensure_registered([period.handler().as_str()])?;
        }
        Ok(Self {
            queue,
            periods,
            handles: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// Start one cron loop per period.
    pub async fn start(&self) -> Result<()> {
        let mut handles = self.handles.write().await;
        for period in &self.periods {
            let schedule = period.schedule()?;
            let queue = self.queue.clone();
            let period = *period;

            handles.push(tokio::spawn(async move {
                info!(period = %period, cron = %period.cron_expression(), "PeriodScheduler: waiting for {}", period);
                loop {
                    let mut upcoming = schedule.upcoming(chrono::Utc);
                    if let Some(next_tick) = upcoming.next() {
                        let now = chrono::Utc::now();
                        if next_tick > now {
                            let duration = (next_tick - now).to_std().unwrap_or_default();
                            tokio::time::sleep(duration).await;
                        }
                    } else {
                        tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;
                        continue;
                    }

                    debug!(period = %period, "PeriodScheduler: cron tick for {}", period);
                    if let Err(e) = trigger(&queue, period).await {
                        error!(period = %period, error = %e, "PeriodScheduler: failed to trigger {}", period);
                    }
                }
            }));
        }
        info!(periods = self.periods.len(), "PeriodScheduler: started");
        Ok(())
    }

    pub async fn stop(&self) {
        let mut handles = self.handles.write().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("PeriodScheduler: stopped");
    }

    pub async fn is_running(&self) -> bool {
        !self.handles.read().await.is_empty()
    }
}
