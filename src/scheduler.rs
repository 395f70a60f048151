//! background overdue sweeps
//!
//! The scheduler only knows a [`Ticker`]; what drives it (a tokio interval, a cron bridge, a
//! test channel) is up to the caller. Shutdown is honored between cycles and between loans of
//! a running cycle, never in the middle of one loan.

use async_trait::async_trait;
use hourglass_rs::SafeTimeProvider;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{error, info};

use crate::config::SchedulerConfig;
use crate::overdue::{OverdueProcessor, SweepReport};

/// source of sweep cycles
#[async_trait]
pub trait Ticker: Send {
    /// wait for the next cycle; false once the ticker is exhausted
    async fn tick(&mut self) -> bool;
}

/// fixed-period ticker on the tokio timer
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(Duration::from_secs(config.sweep_interval_secs))
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// builds the clock each cycle runs against
pub type ClockFactory = Arc<dyn Fn() -> SafeTimeProvider + Send + Sync>;

/// wall-clock factory for production use
pub fn system_clock() -> ClockFactory {
    Arc::new(|| SafeTimeProvider::new(hourglass_rs::TimeSource::System))
}

#[derive(Default)]
struct SchedulerStats {
    cycles: AtomicU64,
    last_report: Mutex<Option<SweepReport>>,
}

pub struct SweepScheduler;

impl SweepScheduler {
    /// start sweeping on every tick
    pub fn spawn(processor: Arc<OverdueProcessor>, ticker: impl Ticker + 'static, clock: ClockFactory) -> SchedulerHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(SchedulerStats::default());
        let task = tokio::spawn(run(processor, Box::new(ticker), clock, shutdown_rx, stats.clone()));

        SchedulerHandle { shutdown, task, stats }
    }

    /// start an interval scheduler unless disabled in `config`
    pub fn from_config(
        processor: Arc<OverdueProcessor>,
        config: &SchedulerConfig,
        clock: ClockFactory,
    ) -> Option<SchedulerHandle> {
        if !config.enabled {
            info!("overdue sweep scheduler disabled");
            return None;
        }
        Some(Self::spawn(processor, IntervalTicker::from_config(config), clock))
    }
}

async fn run(
    processor: Arc<OverdueProcessor>,
    mut ticker: Box<dyn Ticker>,
    clock: ClockFactory,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<SchedulerStats>,
) {
    info!("overdue sweep scheduler started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            more = ticker.tick() => {
                if !more {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let processor = processor.clone();
        let clock = clock.clone();
        let stop = shutdown.clone();
        let cycle = tokio::task::spawn_blocking(move || {
            let time = clock();
            processor.run_sweep_until(&time, || *stop.borrow())
        })
        .await;

        match cycle {
            Ok(report) => {
                stats.cycles.fetch_add(1, Ordering::SeqCst);
                *stats.last_report.lock() = Some(report);
            }
            Err(e) => error!(error = %e, "overdue sweep cycle panicked"),
        }
    }
    info!(cycles = stats.cycles.load(Ordering::SeqCst), "overdue sweep scheduler stopped");
}

/// running scheduler
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    stats: Arc<SchedulerStats>,
}

impl SchedulerHandle {
    pub fn cycles_completed(&self) -> u64 {
        self.stats.cycles.load(Ordering::SeqCst)
    }

    pub fn last_report(&self) -> Option<SweepReport> {
        self.stats.last_report.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// stop after the loan in progress and wait for the task to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "overdue sweep scheduler task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use crate::status::LoanStatus;
    use crate::test_support::{start, Harness};
    use crate::types::{LoanApplication, LoanType};
    use chrono::Duration as ChronoDuration;
    use hourglass_rs::TimeSource;
    use tokio::sync::mpsc;

    struct ManualTicker {
        ticks: mpsc::UnboundedReceiver<()>,
    }

    #[async_trait]
    impl Ticker for ManualTicker {
        async fn tick(&mut self) -> bool {
            self.ticks.recv().await.is_some()
        }
    }

    fn manual() -> (mpsc::UnboundedSender<()>, ManualTicker) {
        let (tx, ticks) = mpsc::unbounded_channel();
        (tx, ManualTicker { ticks })
    }

    fn clock_at(days: i64) -> ClockFactory {
        let at = start() + ChronoDuration::days(days);
        Arc::new(move || SafeTimeProvider::new(TimeSource::Test(at)))
    }

    async fn wait_for_cycles(handle: &SchedulerHandle, cycles: u64) {
        for _ in 0..200 {
            if handle.cycles_completed() >= cycles {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scheduler did not complete {} cycles", cycles);
    }

    #[tokio::test]
    async fn test_tick_runs_sweep() {
        let h = Harness::new();
        h.borrower("alice", 720);
        let loan = h.active_loan(LoanApplication::new("alice", LoanType::Personal, Money::from_major(10_000), 12));
        let processor = Arc::new(OverdueProcessor::new(h.manager.clone()));

        let (tx, ticker) = manual();
        let handle = SweepScheduler::spawn(processor, ticker, clock_at(32));
        tx.send(()).unwrap();
        wait_for_cycles(&handle, 1).await;

        let report = handle.last_report().unwrap();
        assert_eq!(report.installments_missed, 1);
        assert_eq!(h.manager.get_loan(loan.loan_id).unwrap().status, LoanStatus::Overdue);

        tx.send(()).unwrap();
        wait_for_cycles(&handle, 2).await;
        assert_eq!(handle.last_report().unwrap().installments_missed, 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_without_cycles() {
        let h = Harness::new();
        let processor = Arc::new(OverdueProcessor::new(h.manager.clone()));

        let (_tx, ticker) = manual();
        let handle = SweepScheduler::spawn(processor, ticker, clock_at(0));
        assert_eq!(handle.cycles_completed(), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_ticker_stops_scheduler() {
        let h = Harness::new();
        let processor = Arc::new(OverdueProcessor::new(h.manager.clone()));

        let (tx, ticker) = manual();
        let handle = SweepScheduler::spawn(processor, ticker, clock_at(0));
        tx.send(()).unwrap();
        drop(tx);

        for _ in 0..200 {
            if handle.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.is_finished());
        assert_eq!(handle.cycles_completed(), 1);
        assert!(handle.last_report().unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_disabled_config_spawns_nothing() {
        let h = Harness::new();
        let processor = Arc::new(OverdueProcessor::new(h.manager.clone()));
        let config = SchedulerConfig {
            enabled: false,
            sweep_interval_secs: 60,
        };

        assert!(SweepScheduler::from_config(processor, &config, system_clock()).is_none());
    }
}
