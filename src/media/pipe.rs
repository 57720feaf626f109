use std::{process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
};

use crate::{
    error::PipeError,
    media::types::{LaunchRequest, TranscodeSettings, display_command, transcode_args},
    state::types::ChannelId,
};

/// A running transcoder owned by the registry.
#[async_trait]
pub trait PipeProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking check whether the process has exited.
    fn has_exited(&mut self) -> bool;

    /// Asks the process to exit gracefully.
    fn terminate(&mut self) -> std::io::Result<()>;

    /// Forced kill; returns without waiting.
    fn kill(&mut self) -> std::io::Result<()>;

    async fn wait(&mut self) -> std::io::Result<()>;

    /// Diagnostic output of the process, handed out once.
    fn take_stderr(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        None
    }
}

#[async_trait]
pub trait PipeLauncher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn PipeProcess>, PipeError>;
}

/// Spawns one ffmpeg per channel writing a rolling HLS playlist.
pub struct FfmpegLauncher {
    settings: TranscodeSettings,
}

impl FfmpegLauncher {
    pub fn new(settings: TranscodeSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PipeLauncher for FfmpegLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn PipeProcess>, PipeError> {
        let dir = self.settings.channel_dir(request.channel);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| PipeError::OutputDir {
                path: dir.clone(),
                source,
            })?;

        let mut command = Command::new(&self.settings.ffmpeg_bin);
        command
            .args(transcode_args(&self.settings, request, &request.url))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // own process group: a terminal ctrl-c reaches the controller, not the children
        #[cfg(unix)]
        command.process_group(0);

        log::debug!("Pipe: {}", display_command(&self.settings, request));
        let child = command.spawn().map_err(|source| PipeError::Spawn {
            channel: request.channel,
            source,
        })?;
        Ok(Box::new(FfmpegProcess::new(request.channel, child)))
    }
}

pub struct FfmpegProcess {
    channel: ChannelId,
    child: Child,
}

impl FfmpegProcess {
    pub fn new(channel: ChannelId, child: Child) -> Self {
        Self { channel, child }
    }
}

#[async_trait]
impl PipeProcess for FfmpegProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("Pipe: channel {} exited with {}", self.channel, status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                log::warn!("Pipe: channel {} try_wait failed: {}", self.channel, e);
                false
            }
        }
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> std::io::Result<()> {
        use nix::{
            sys::signal::{Signal, kill},
            unistd::Pid,
        };

        // no pid means the child was already reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> std::io::Result<()> {
        self.kill()
    }

    fn kill(&mut self) -> std::io::Result<()> {
        if self.child.id().is_none() {
            return Ok(());
        }
        self.child.start_kill()
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        self.child.wait().await.map(|_| ())
    }

    fn take_stderr(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as Box<dyn AsyncRead + Send + Unpin>)
    }
}

/// Log message for one stderr line, `None` for blank lines.
pub fn stderr_message<M>(channel: ChannelId, line: &str, mask: M) -> Option<String>
where
    M: Fn(&str) -> String,
{
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }
    Some(format!("Pipe: channel {} ffmpeg: {}", channel, mask(line)))
}

/// Drains transcoder stderr into the log until it closes; returns the number of lines logged.
///
/// Must keep running while the process lives, a full pipe would block it.
pub async fn forward_stderr<R, M>(channel: ChannelId, stderr: R, mask: M) -> usize
where
    R: AsyncRead + Unpin,
    M: Fn(&str) -> String,
{
    let mut lines = BufReader::new(stderr).lines();
    let mut logged = 0;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(message) = stderr_message(channel, &line, &mask) {
                    log::warn!("{}", message);
                    logged += 1;
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::debug!("Pipe: channel {} stderr closed: {}", channel, e);
                break;
            }
        }
    }
    logged
}

/// Starts and stops pipelines, with logging that never exposes credentials.
pub struct ProcessSupervisor {
    launcher: Arc<dyn PipeLauncher>,
    grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(launcher: Arc<dyn PipeLauncher>, grace: Duration) -> Self {
        Self { launcher, grace }
    }

    /// Launches a pipeline; failures are logged and yield `None`.
    pub async fn start(&self, request: &LaunchRequest) -> Option<Box<dyn PipeProcess>> {
        match self.launcher.launch(request).await {
            Ok(process) => {
                log::info!(
                    "Pipe: channel {} started (pid {:?}) from {}",
                    request.channel,
                    process.pid(),
                    request.masked_url
                );
                Some(process)
            }
            Err(e) => {
                log::error!("Pipe: {}", e);
                None
            }
        }
    }

    /// Graceful stop with a forced kill after the grace period. Safe on exited processes.
    pub async fn stop(&self, channel: ChannelId, mut process: Box<dyn PipeProcess>) {
        if process.has_exited() {
            log::debug!("Pipe: channel {} already exited", channel);
            return;
        }

        if let Err(e) = process.terminate() {
            log::warn!("Pipe: channel {} terminate failed: {}", channel, e);
        }

        match tokio::time::timeout(self.grace, process.wait()).await {
            Ok(Ok(())) => log::info!("Pipe: channel {} stopped", channel),
            Ok(Err(e)) => log::warn!("Pipe: channel {} wait failed: {}", channel, e),
            Err(_) => {
                log::warn!("Pipe: {}, killing", PipeError::TerminationTimeout(channel));
                if let Err(e) = process.kill() {
                    log::warn!("Pipe: channel {} kill failed: {}", channel, e);
                }
                if tokio::time::timeout(self.grace, process.wait()).await.is_err() {
                    log::error!("Pipe: channel {} did not exit after kill", channel);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "pipe_test.rs"]
mod pipe_test;
