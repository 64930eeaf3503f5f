//! Business-hours gate and the per-source interval loop.

use crate::models::RunSummary;
use crate::pipeline::Pipeline;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Inclusive `[start_hour, end_hour]` range of fractional local hours,
/// e.g. `9.5` for 09:30.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start_hour: f64,
    pub end_hour: f64,
}

impl TimeWindow {
    pub const fn from_hours(start_hour: f64, end_hour: f64) -> Self {
        Self { start_hour, end_hour }
    }

    pub fn new(start_hour: f64, end_hour: f64) -> Result<Self> {
        for h in [start_hour, end_hour] {
            if !(0.0..=24.0).contains(&h) {
                bail!("Hour {} is outside 0..=24", h);
            }
        }
        if start_hour > end_hour {
            bail!("Window start {} is after end {}", start_hour, end_hour);
        }
        Ok(Self { start_hour, end_hour })
    }

    /// `"HH:MM"` → fractional hour.
    pub fn parse_hhmm(s: &str) -> Result<f64> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| anyhow!("Expected HH:MM, got '{}'", s))?;
        let h: u32 = h.parse().with_context(|| format!("Bad hour in '{}'", s))?;
        let m: u32 = m.parse().with_context(|| format!("Bad minute in '{}'", s))?;
        if h > 24 || m > 59 || (h == 24 && m > 0) {
            bail!("Time '{}' is out of range", s);
        }
        Ok(h as f64 + m as f64 / 60.0)
    }

    pub fn contains(&self, hour: f64) -> bool {
        hour >= self.start_hour && hour <= self.end_hour
    }
}

/// Decides whether a source may run at a given instant: Monday to Friday,
/// inside the window, in the market's time zone.
#[derive(Debug, Clone)]
pub struct ScheduleGate {
    tz: Tz,
    window: TimeWindow,
}

impl ScheduleGate {
    pub fn new(timezone: &str, window: TimeWindow) -> Result<Self> {
        let tz: Tz = timezone
            .parse()
            .map_err(|e| anyhow!("Unknown time zone '{}': {}", timezone, e))?;
        Ok(Self { tz, window })
    }

    /// The first run of a process always goes ahead.
    pub fn should_run(&self, now: DateTime<Utc>, has_run_before: bool) -> bool {
        if !has_run_before {
            return true;
        }
        let local = now.with_timezone(&self.tz);
        if local.weekday().number_from_monday() > 5 {
            return false;
        }
        let hour = local.hour() as f64 + local.minute() as f64 / 60.0;
        self.window.contains(hour)
    }
}

/// Drives one source's pipeline on a fixed interval behind its gate.
pub struct Runner {
    pipeline: Pipeline,
    gate: ScheduleGate,
    interval: Duration,
    has_run: bool,
}

impl Runner {
    pub fn new(pipeline: Pipeline, gate: ScheduleGate, interval: Duration) -> Self {
        Self { pipeline, gate, interval, has_run: false }
    }

    pub fn source(&self) -> &str {
        self.pipeline.source()
    }

    pub async fn tick(&mut self) -> Option<RunSummary> {
        self.tick_at(Utc::now()).await
    }

    /// One scheduled evaluation. Returns the run summary when the gate
    /// allowed a run and the run completed.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Option<RunSummary> {
        if !self.gate.should_run(now, self.has_run) {
            debug!("{}: outside business hours, skipping", self.source());
            return None;
        }
        self.has_run = true;

        match self.pipeline.run().await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!("{}: run failed: {:#}", self.source(), e);
                None
            }
        }
    }

    /// Tick forever. A slow run delays the next tick instead of overlapping it.
    pub async fn run_forever(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("{}: scheduled every {:?}", self.source(), self.interval);

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn gate() -> ScheduleGate {
        ScheduleGate::new("America/Sao_Paulo", TimeWindow::from_hours(10.0, 17.0)).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_weekend_is_closed() {
        // Saturday 12:00 in São Paulo
        assert!(!gate().should_run(utc(2024, 6, 15, 15, 0), true));
    }

    #[test]
    fn test_weekday_inside_window() {
        // Tuesday 11:00 in São Paulo
        assert!(gate().should_run(utc(2024, 6, 18, 14, 0), true));
    }

    #[test]
    fn test_first_run_ignores_window() {
        assert!(gate().should_run(utc(2024, 6, 15, 15, 0), false));
        assert!(gate().should_run(utc(2024, 6, 18, 3, 0), false));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let g = gate();
        assert!(g.should_run(utc(2024, 6, 18, 13, 0), true)); // 10:00
        assert!(g.should_run(utc(2024, 6, 18, 20, 0), true)); // 17:00
        assert!(!g.should_run(utc(2024, 6, 18, 20, 1), true)); // 17:01
        assert!(!g.should_run(utc(2024, 6, 18, 12, 59), true)); // 09:59
    }

    #[test]
    fn test_half_hour_window() {
        let g = ScheduleGate::new("America/Sao_Paulo", TimeWindow::from_hours(9.5, 17.5)).unwrap();
        assert!(!g.should_run(utc(2024, 6, 18, 12, 29), true)); // 09:29
        assert!(g.should_run(utc(2024, 6, 18, 12, 30), true)); // 09:30
        assert!(g.should_run(utc(2024, 6, 18, 14, 0), true)); // 11:00
        assert!(g.should_run(utc(2024, 6, 18, 20, 30), true)); // 17:30
    }

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(TimeWindow::parse_hhmm("09:30").unwrap(), 9.5);
        assert_eq!(TimeWindow::parse_hhmm("24:00").unwrap(), 24.0);
        assert!(TimeWindow::parse_hhmm("9").is_err());
        assert!(TimeWindow::parse_hhmm("25:99").is_err());
        assert!(TimeWindow::parse_hhmm("ab:cd").is_err());
    }

    #[test]
    fn test_window_validation() {
        assert!(TimeWindow::new(17.0, 10.0).is_err());
        assert!(TimeWindow::new(-1.0, 10.0).is_err());
        assert!(TimeWindow::new(10.0, 10.0).is_ok());
    }

    #[test]
    fn test_runner_gates_after_first_tick() {
        use crate::models::RawPage;
        use crate::testing::{fast_settings, rows, source_spec, MemoryStore, ScriptedAdapter};
        use std::sync::Arc;

        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new());
            let adapter = ScriptedAdapter::new().page(0, vec![Some(RawPage::new(rows("A", 1)))]);
            let pipeline =
                Pipeline::new(source_spec("b3_data"), Arc::new(adapter), store.clone(), &fast_settings());
            let mut runner = Runner::new(pipeline, gate(), Duration::from_secs(600));

            let saturday = utc(2024, 6, 15, 15, 0);
            assert!(runner.tick_at(saturday).await.is_some());
            assert!(runner.tick_at(saturday).await.is_none());
            assert!(runner.tick_at(utc(2024, 6, 18, 14, 0)).await.is_some());
            assert_eq!(store.runs.lock().unwrap().len(), 2);
        });
    }

    #[test]
    fn test_unknown_timezone() {
        assert!(ScheduleGate::new("Mars/Olympus", TimeWindow::from_hours(0.0, 24.0)).is_err());
    }
}
