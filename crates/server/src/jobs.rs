//! Periodic background work: a fixed-interval ticker and a once-per-day run
//! marker for jobs that must not repeat within the same date.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::AppState;

pub struct Ticker {
    name: &'static str,
    interval: Duration,
}

impl Ticker {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self { name, interval }
    }

    /// Run `job` every interval, starting one interval from now. A slow run
    /// delays the next one instead of stacking ticks.
    pub fn spawn<F, Fut>(self, job: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            tracing::info!(job = self.name, every = ?self.interval, "ticker started");
            loop {
                interval.tick().await;
                tracing::trace!(job = self.name, "tick");
                job().await;
            }
        })
    }
}

/// "Ran today" flag. `try_mark` returns true only for the first call on a
/// given date.
#[derive(Default)]
pub struct RunMarker {
    last_run: Mutex<Option<NaiveDate>>,
}

impl RunMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_mark(&self, date: NaiveDate) -> bool {
        let Ok(mut last_run) = self.last_run.lock() else {
            return false;
        };
        if *last_run == Some(date) {
            return false;
        }
        *last_run = Some(date);
        true
    }

    pub fn last_run(&self) -> Option<NaiveDate> {
        self.last_run.lock().ok().and_then(|d| *d)
    }
}

/// Expire presence sessions that stopped heartbeating and announce the
/// users who went offline because of it.
pub async fn sweep_presence(state: &AppState) -> usize {
    let offline = state.presence.sweep().await;
    for user_id in &offline {
        tracing::info!(user_id, "presence expired");
        state.coordinator.presence_changed(user_id, false).await;
    }
    offline.len()
}

/// Daily delivery-bus summary. Repeated ticks on the same day are no-ops.
pub fn report_bus_health(state: &AppState, marker: &RunMarker) -> bool {
    if !marker.try_mark(Utc::now().date_naive()) {
        return false;
    }
    let stats = state.bus.stats();
    tracing::info!(
        published = stats.published,
        acked = stats.acked,
        forwarded = stats.forwarded,
        malformed = stats.malformed,
        dead_lettered = stats.dead_lettered,
        "daily delivery bus report"
    );
    true
}

pub fn spawn_background_jobs(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    let sweep_state = state.clone();
    let sweep = Ticker::new("presence-sweep", state.config.presence_sweep_interval()).spawn(
        move || {
            let state = sweep_state.clone();
            async move {
                sweep_presence(&state).await;
            }
        },
    );

    let marker = Arc::new(RunMarker::new());
    let report = Ticker::new("bus-report", Duration::from_secs(3600)).spawn(move || {
        let state = state.clone();
        let marker = marker.clone();
        async move {
            report_bus_health(&state, &marker);
        }
    });

    vec![sweep, report]
}
