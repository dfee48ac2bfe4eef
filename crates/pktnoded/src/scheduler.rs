//! Maintenance scheduler - periodic package updates and guest restarts.
//!
//! Every tick reloads the settings, evaluates the two policies on their own
//! and persists a new last-run timestamp only for a policy whose operation
//! succeeded. A failing policy never blocks the other one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::lifecycle::LifecycleController;
use crate::settings::SettingsStore;

/// Operations the scheduler drives
#[async_trait]
pub trait MaintenanceOps: Send + Sync {
    async fn update_packages(&self, name: &str) -> bool;
    async fn restart(&self, name: &str) -> bool;
}

#[async_trait]
impl MaintenanceOps for LifecycleController {
    async fn update_packages(&self, name: &str) -> bool {
        match LifecycleController::update_packages(self, name).await {
            Ok(done) => done,
            Err(e) => {
                warn!("Scheduled package update skipped: {}", e);
                false
            }
        }
    }

    async fn restart(&self, name: &str) -> bool {
        match self.reboot(name).await {
            Ok(done) => done,
            Err(e) => {
                warn!("Scheduled restart skipped: {}", e);
                false
            }
        }
    }
}

/// What one tick did. `None` means the policy was not due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub package_update: Option<bool>,
    pub restart: Option<bool>,
}

pub struct Scheduler {
    ops: Arc<dyn MaintenanceOps>,
    store: Arc<dyn SettingsStore>,
    distribution: String,
    period: Duration,
}

impl Scheduler {
    pub fn new(
        ops: Arc<dyn MaintenanceOps>,
        store: Arc<dyn SettingsStore>,
        distribution: &str,
        period: Duration,
    ) -> Self {
        Self {
            ops,
            store,
            distribution: distribution.to_string(),
            period,
        }
    }

    /// Evaluate both policies at `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        let mut settings = match self.store.load() {
            Ok(settings) => settings,
            Err(e) => {
                error!("Scheduler could not load settings: {}", e);
                return TickOutcome::default();
            }
        };
        let mut outcome = TickOutcome::default();

        if settings.maintenance.package_update_due(now) {
            info!("Package update due for {}", self.distribution);
            let ok = self.ops.update_packages(&self.distribution).await;
            if ok {
                settings.maintenance.last_package_update = Some(now);
            }
            outcome.package_update = Some(ok);
        }

        if settings.maintenance.restart_due(now) {
            info!("Scheduled restart due for {}", self.distribution);
            let ok = self.ops.restart(&self.distribution).await;
            if ok {
                settings.maintenance.last_restart = Some(now);
            }
            outcome.restart = Some(ok);
        }

        if outcome.package_update == Some(true) || outcome.restart == Some(true) {
            if let Err(e) = self.store.save(&settings) {
                error!("Failed to persist maintenance timestamps: {}", e);
            }
        } else {
            debug!("Maintenance tick: {:?}", outcome);
        }
        outcome
    }

    /// Run `tick` forever on the configured period; the first tick fires
    /// immediately.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = maintenance_ticker(self.period);
            info!("Maintenance scheduler running every {:?}", self.period);
            loop {
                ticker.tick().await;
                self.tick(Utc::now()).await;
            }
        })
    }
}

/// Interval for periodic host work. Ticks missed while the host slept are
/// skipped rather than replayed back to back.
pub fn maintenance_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{MemorySettingsStore, Settings};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct FakeOps {
        update_ok: bool,
        restart_ok: bool,
        updates: AtomicU32,
        restarts: AtomicU32,
    }

    #[async_trait]
    impl MaintenanceOps for FakeOps {
        async fn update_packages(&self, _name: &str) -> bool {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.update_ok
        }

        async fn restart(&self, _name: &str) -> bool {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            self.restart_ok
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn scheduler(ops: Arc<FakeOps>, settings: Settings) -> (Scheduler, Arc<MemorySettingsStore>) {
        let store = Arc::new(MemorySettingsStore::new(settings));
        let scheduler = Scheduler::new(ops, store.clone(), "PKTWinNode", Duration::from_secs(3600));
        (scheduler, store)
    }

    fn both_enabled() -> Settings {
        let mut settings = Settings::default();
        settings.maintenance.package_updates_enabled = true;
        settings.maintenance.restart_enabled = true;
        settings
    }

    #[tokio::test]
    async fn test_disabled_policies_do_nothing() {
        let ops = Arc::new(FakeOps::default());
        let (scheduler, store) = scheduler(ops.clone(), Settings::default());
        assert_eq!(scheduler.tick(now()).await, TickOutcome::default());
        assert_eq!(ops.updates.load(Ordering::SeqCst), 0);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_success_persists_timestamps() {
        let ops = Arc::new(FakeOps {
            update_ok: true,
            restart_ok: true,
            ..Default::default()
        });
        let (scheduler, store) = scheduler(ops.clone(), both_enabled());
        let outcome = scheduler.tick(now()).await;
        assert_eq!(outcome.package_update, Some(true));
        assert_eq!(outcome.restart, Some(true));

        let saved = store.current().unwrap();
        assert_eq!(saved.maintenance.last_package_update, Some(now()));
        assert_eq!(saved.maintenance.last_restart, Some(now()));

        // Not due again an hour later
        let later = now() + chrono::Duration::hours(1);
        assert_eq!(scheduler.tick(later).await, TickOutcome::default());
        assert_eq!(ops.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_in_one_policy_does_not_block_other() {
        let ops = Arc::new(FakeOps {
            update_ok: false,
            restart_ok: true,
            ..Default::default()
        });
        let (scheduler, store) = scheduler(ops.clone(), both_enabled());
        let outcome = scheduler.tick(now()).await;
        assert_eq!(outcome.package_update, Some(false));
        assert_eq!(outcome.restart, Some(true));
        assert_eq!(ops.restarts.load(Ordering::SeqCst), 1);

        let saved = store.current().unwrap();
        assert_eq!(saved.maintenance.last_package_update, None);
        assert_eq!(saved.maintenance.last_restart, Some(now()));

        // The failed policy is retried on the next tick
        scheduler.tick(now() + chrono::Duration::hours(1)).await;
        assert_eq!(ops.updates.load(Ordering::SeqCst), 2);
        assert_eq!(ops.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_failures_do_not_save() {
        let ops = Arc::new(FakeOps::default());
        let (scheduler, store) = scheduler(ops, both_enabled());
        scheduler.tick(now()).await;
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_ticker_skips_missed_ticks() {
        let ticker = maintenance_ticker(Duration::from_secs(3600));
        assert_eq!(ticker.missed_tick_behavior(), MissedTickBehavior::Skip);
    }
}
