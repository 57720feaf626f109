use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use anyhow::Context;
use futures::FutureExt;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ReconcilerConfig, credential::CredentialVault, media::pipe::PipeLauncher,
    reconciler::Reconciler,
};

/// The registry lock: held for the whole of every pass.
pub type SharedReconciler = Arc<Mutex<Reconciler>>;

pub struct ControlLoop {
    reconciler: SharedReconciler,
    interval: Duration,
    cancel: CancellationToken,
}

impl ControlLoop {
    /// Resolves credentials and runs the first pass synchronously.
    ///
    /// Fails without starting anything if credentials cannot be resolved.
    pub async fn initial_setup(
        config: &ReconcilerConfig,
        launcher: Arc<dyn PipeLauncher>,
    ) -> anyhow::Result<Self> {
        let vault = CredentialVault::resolve(
            config.username_b64.as_deref(),
            config.password_b64.as_deref(),
        )
        .inspect_err(|e| log::error!("ControlLoop: {}", e))
        .context("credentials unavailable, no pipeline can be started")?;
        log::info!("ControlLoop: credentials resolved");

        let mut reconciler = Reconciler::new(config, vault, launcher);
        let report = reconciler.reconcile(true).await;
        log::info!(
            "ControlLoop: initial pass started {:?}, failed {:?}",
            report.started,
            report.failed
        );

        Ok(Self {
            reconciler: Arc::new(Mutex::new(reconciler)),
            interval: config.interval,
            cancel: CancellationToken::new(),
        })
    }

    pub fn reconciler(&self) -> SharedReconciler {
        Arc::clone(&self.reconciler)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns the periodic pass: sleep one interval, reconcile, repeat until cancelled.
    pub fn run(&self) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let cancel = self.cancel.clone();
        let period = self.interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            run_every(period, cancel, || run_pass(&reconciler)).await;
        })
    }

    /// Stops the loop, waits for an in-flight pass, then stops every pipeline.
    pub async fn shutdown(&self, handle: JoinHandle<()>) {
        self.cancel.cancel();
        if let Err(e) = handle.await {
            log::error!("ControlLoop: loop task failed: {}", e);
        }
        self.reconciler.lock().await.shutdown().await;
    }
}

/// Calls `pass` one full `period` after the previous call returned, until cancelled.
///
/// A pass in flight is never interrupted by cancellation.
async fn run_every<F, Fut>(period: Duration, cancel: CancellationToken, mut pass: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("ControlLoop: cancelled");
                break;
            }
            _ = ticker.tick() => {
                pass().await;
                ticker.reset();
            }
        }
    }
}

async fn run_pass(reconciler: &Mutex<Reconciler>) {
    let mut guard = reconciler.lock().await;
    match AssertUnwindSafe(guard.reconcile(false)).catch_unwind().await {
        Ok(report) if (report.skipped || report.is_noop()) && report.reaped.is_empty() => {}
        Ok(report) => log::info!(
            "ControlLoop: pass started {:?}, stopped {:?}, removed {:?}, failed {:?}, exited {:?}",
            report.started,
            report.stopped,
            report.removed,
            report.failed,
            report.reaped
        ),
        Err(_) => log::error!("ControlLoop: reconciliation pass panicked, continuing"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{manager::ChannelState, media::testing::RecordingLauncher};

    fn setup(dir: &std::path::Path, with_credentials: bool) -> ReconcilerConfig {
        let resource = json!({"rtsp": {
            "rtsp_ip": "10.0.0.2",
            "stream_title": "Yard",
            "test_channel": "off",
            "channel_count": 1,
            "channel_list": [3]
        }});
        std::fs::write(dir.join("resource.json"), resource.to_string()).unwrap();
        std::fs::write(
            dir.join("status.json"),
            json!({"3": {"is_active": true, "error_msg": null, "livestream_link": null, "black_ok": false}}).to_string(),
        )
        .unwrap();

        ReconcilerConfig {
            resource_path: dir.join("resource.json"),
            validation_path: dir.join("status.json"),
            output_root: dir.join("hls"),
            interval: Duration::from_millis(20),
            stop_grace: Duration::from_millis(100),
            username_b64: with_credentials.then(|| "YWRtaW4=".to_string()),
            password_b64: with_credentials.then(|| "cEBzcw==".to_string()),
            ..ReconcilerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_initial_setup_starts_active_channel() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path(), true);
        let launcher = RecordingLauncher::new();

        let control = ControlLoop::initial_setup(&config, launcher.clone()).await.unwrap();
        let shared = control.reconciler();
        assert_eq!(shared.lock().await.state(3), ChannelState::Running);
        assert_eq!(launcher.live_count(3), 1);
    }

    #[tokio::test]
    async fn test_initial_setup_aborts_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path(), false);
        let launcher = RecordingLauncher::new();

        let result = ControlLoop::initial_setup(&config, launcher.clone()).await;
        assert!(result.is_err());
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_loop_picks_up_changes_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path(), true);
        let launcher = RecordingLauncher::new();
        let control = ControlLoop::initial_setup(&config, launcher.clone()).await.unwrap();
        let handle = control.run();

        std::fs::write(
            &config.validation_path,
            json!({"3": {"is_active": false, "error_msg": null, "livestream_link": null, "black_ok": false}}).to_string(),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while launcher.live_count(3) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(launcher.live_count(3), 0);
        assert_eq!(control.reconciler().lock().await.state(3), ChannelState::Stopped);

        // reactivate, then shutdown must leave nothing running
        std::fs::write(
            &config.validation_path,
            json!({"3": {"is_active": true, "error_msg": null, "livestream_link": null, "black_ok": true}}).to_string(),
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while launcher.live_count(3) == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(launcher.live_count(3), 1);

        control.shutdown(handle).await;
        assert_eq!(launcher.live_count(3), 0);
        assert!(control.cancel_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_interval_between_slow_passes() {
        let period = Duration::from_secs(10);
        let cancel = CancellationToken::new();
        let passes: Arc<std::sync::Mutex<Vec<(Instant, Instant)>>> = Arc::default();
        let begin = Instant::now();

        let task = {
            let passes = Arc::clone(&passes);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_every(period, cancel, || {
                    let passes = Arc::clone(&passes);
                    async move {
                        let start = Instant::now();
                        // longer than the period, like several graceful stops in a row
                        tokio::time::sleep(Duration::from_secs(25)).await;
                        passes.lock().unwrap().push((start, Instant::now()));
                    }
                })
                .await;
            })
        };

        tokio::time::sleep(Duration::from_secs(200)).await;
        cancel.cancel();
        task.await.unwrap();

        let passes = passes.lock().unwrap().clone();
        assert!(passes.len() >= 3, "only {} passes", passes.len());
        assert!(passes[0].0 - begin >= period);
        for pair in passes.windows(2) {
            assert!(pair[1].0 - pair[0].1 >= period);
        }
    }
}
