use std::sync::Arc;

use crate::{
    config::ReconcilerConfig,
    credential::{CredentialVault, DefaultUrl},
    manager::{ChannelState, ChannelStatus, PipelineRegistry},
    media::{
        pipe::{PipeLauncher, ProcessSupervisor, forward_stderr},
        types::LaunchRequest,
    },
    state::{
        diff::{diff_channels, diff_validation},
        source::StateSource,
        types::{ChannelId, ChannelValidation, DesiredStateSnapshot, ValidationSnapshot},
    },
};

/// What one pass does to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Not declared any more: stop if running, then forget.
    Remove,
    /// Validation reports an error: stop if running, stay `Stopped`.
    Fault(String),
    Start,
    Stop,
    Hold,
}

/// Per-channel rule: absence beats error, error beats activation.
pub fn decide(
    declared: bool,
    validation: Option<&ChannelValidation>,
    state: ChannelState,
) -> Transition {
    if !declared {
        return Transition::Remove;
    }
    if let Some(msg) = validation.and_then(ChannelValidation::error) {
        return Transition::Fault(msg.to_string());
    }
    let active = validation.map(|v| v.is_active).unwrap_or(false);
    match (active, state) {
        (true, ChannelState::Running) => Transition::Hold,
        (true, _) => Transition::Start,
        (false, ChannelState::Running) => Transition::Stop,
        (false, _) => Transition::Hold,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Neither document changed; no transitions were evaluated.
    pub skipped: bool,
    pub started: Vec<ChannelId>,
    pub stopped: Vec<ChannelId>,
    pub removed: Vec<ChannelId>,
    pub failed: Vec<ChannelId>,
    /// Processes found dead before the pass.
    pub reaped: Vec<ChannelId>,
}

impl PassReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty()
            && self.stopped.is_empty()
            && self.removed.is_empty()
            && self.failed.is_empty()
    }
}

/// Owns the registry and converges it towards the two external documents.
pub struct Reconciler {
    source: StateSource,
    vault: CredentialVault,
    supervisor: ProcessSupervisor,
    registry: PipelineRegistry,
    desired: Option<DesiredStateSnapshot>,
    validation: Option<ValidationSnapshot>,
    rtsp_port: u16,
    rtsp_subtype: u32,
}

impl Reconciler {
    pub fn new(
        config: &ReconcilerConfig,
        vault: CredentialVault,
        launcher: Arc<dyn PipeLauncher>,
    ) -> Self {
        Self {
            source: StateSource::new(
                config.resource_path.clone(),
                &config.resource_section,
                config.validation_path.clone(),
            ),
            vault,
            supervisor: ProcessSupervisor::new(launcher, config.stop_grace),
            registry: PipelineRegistry::new(),
            desired: None,
            validation: None,
            rtsp_port: config.rtsp_port,
            rtsp_subtype: config.rtsp_subtype,
        }
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    pub fn state(&self, id: ChannelId) -> ChannelState {
        self.registry.state(id)
    }

    pub fn status(&self) -> Vec<ChannelStatus> {
        self.registry.status()
    }

    pub fn desired(&self) -> Option<&DesiredStateSnapshot> {
        self.desired.as_ref()
    }

    pub fn validation(&self) -> Option<&ValidationSnapshot> {
        self.validation.as_ref()
    }

    pub fn source(&self) -> &StateSource {
        &self.source
    }

    /// One reconciliation pass.
    ///
    /// Transitions are evaluated only when a document fingerprint changed, or
    /// when `force` is set (initial setup).
    pub async fn reconcile(&mut self, force: bool) -> PassReport {
        let mut report = PassReport::default();

        for id in self.registry.reap_exited() {
            log::warn!(
                "Reconciler: channel {} transcoder exited on its own, stopped until the next document change",
                id
            );
            report.reaped.push(id);
        }

        let desired_changed = self.refresh_desired().await;
        let validation_changed = self.refresh_validation().await;
        if !force && !desired_changed && !validation_changed {
            log::debug!("Reconciler: documents unchanged, nothing to do");
            report.skipped = true;
            return report;
        }

        let Some(desired) = self.desired.clone() else {
            log::warn!("Reconciler: no desired state loaded yet");
            return report;
        };

        let delta = diff_channels(self.registry.tracked().iter(), &desired);
        for id in &delta.added {
            log::info!("Reconciler: channel {} declared", id);
        }

        for &id in &desired.channels {
            self.registry.track(id);
            let validation = self.validation.as_ref().and_then(|v| v.get(id)).cloned();
            self.registry.set_override_link(
                id,
                validation.as_ref().and_then(ChannelValidation::override_link),
            );
            let transition = decide(true, validation.as_ref(), self.registry.state(id));
            self.apply(id, transition, validation.as_ref(), &desired, &mut report)
                .await;
        }

        for &id in &delta.removed {
            self.apply(id, Transition::Remove, None, &desired, &mut report)
                .await;
        }

        report
    }

    async fn refresh_desired(&mut self) -> bool {
        let Some(snapshot) = self.source.refresh_desired().await else {
            return false;
        };
        let delta = diff_channels(self.registry.tracked().iter(), &snapshot);
        log::info!(
            "Reconciler: desired state {} -> {} channels (+{:?} -{:?})",
            snapshot.fingerprint,
            snapshot.channels.len(),
            delta.added,
            delta.removed
        );
        self.desired = Some(snapshot);
        true
    }

    async fn refresh_validation(&mut self) -> bool {
        let Some(snapshot) = self.source.refresh_validation().await else {
            return false;
        };
        let delta = diff_validation(self.validation.as_ref(), &snapshot);
        if delta.is_empty() {
            log::debug!("Reconciler: validation {} has no entry changes", snapshot.fingerprint);
        }
        log::info!(
            "Reconciler: validation state {} (+{:?} ~{:?} -{:?})",
            snapshot.fingerprint,
            delta.added,
            delta.changed,
            delta.removed
        );
        self.validation = Some(snapshot);
        true
    }

    async fn apply(
        &mut self,
        id: ChannelId,
        transition: Transition,
        validation: Option<&ChannelValidation>,
        desired: &DesiredStateSnapshot,
        report: &mut PassReport,
    ) {
        match transition {
            Transition::Remove => {
                if let Some(process) = self.registry.forget(id) {
                    self.supervisor.stop(id, process).await;
                    report.stopped.push(id);
                }
                log::info!("Reconciler: channel {} removed", id);
                report.removed.push(id);
            }
            Transition::Fault(msg) => {
                if let Some(process) = self.registry.take_process(id) {
                    log::warn!("Reconciler: channel {} error {:?}, stopping", id, msg);
                    self.supervisor.stop(id, process).await;
                    report.stopped.push(id);
                } else {
                    log::debug!("Reconciler: channel {} error {:?}, kept stopped", id, msg);
                }
            }
            Transition::Stop => {
                if let Some(process) = self.registry.take_process(id) {
                    log::info!("Reconciler: channel {} deactivated, stopping", id);
                    self.supervisor.stop(id, process).await;
                    report.stopped.push(id);
                }
            }
            Transition::Start => {
                let link = validation.and_then(ChannelValidation::override_link);
                if self.start_channel(id, link, desired).await {
                    report.started.push(id);
                } else {
                    report.failed.push(id);
                }
            }
            Transition::Hold => {}
        }
    }

    async fn start_channel(
        &mut self,
        id: ChannelId,
        link: Option<&str>,
        desired: &DesiredStateSnapshot,
    ) -> bool {
        let url = self.vault.build_channel_url(
            link,
            DefaultUrl {
                host: &desired.default_host,
                port: self.rtsp_port,
                subtype: self.rtsp_subtype,
            },
            id,
        );
        let request = LaunchRequest {
            channel: id,
            title: desired.stream_title.clone(),
            masked_url: self.vault.mask(&url),
            url,
        };

        let Some(mut process) = self.supervisor.start(&request).await else {
            // TODO: retry failed spawns with backoff instead of waiting for a document change
            log::warn!(
                "Reconciler: channel {} stays stopped until a document changes",
                id
            );
            return false;
        };
        if let Some(stderr) = process.take_stderr() {
            let vault = self.vault.clone();
            tokio::spawn(forward_stderr(id, stderr, move |line| vault.mask(line)));
        }
        match self.registry.set_running(id, process) {
            Ok(()) => true,
            Err(process) => {
                log::error!("Reconciler: channel {} already bound, stopping duplicate", id);
                self.supervisor.stop(id, process).await;
                false
            }
        }
    }

    /// Stops every live pipeline. Channels stay tracked as `Stopped`.
    pub async fn shutdown(&mut self) {
        for (id, process) in self.registry.drain_processes() {
            self.supervisor.stop(id, process).await;
        }
        log::info!("Reconciler: all pipelines stopped");
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;
