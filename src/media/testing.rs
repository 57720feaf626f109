//! In-memory launcher used by reconciler and supervisor tests.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    error::PipeError,
    media::{
        pipe::{PipeLauncher, PipeProcess},
        types::LaunchRequest,
    },
    state::types::ChannelId,
};

#[derive(Debug)]
pub struct FakeState {
    pub channel: ChannelId,
    pub pid: u32,
    pub alive: AtomicBool,
    pub ignore_terminate: bool,
    pub terminate_calls: AtomicUsize,
    pub kill_calls: AtomicUsize,
}

pub struct FakeProcess {
    state: Arc<FakeState>,
}

impl FakeProcess {
    pub fn new(state: Arc<FakeState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl PipeProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.state.pid)
    }

    fn has_exited(&mut self) -> bool {
        !self.state.alive.load(Ordering::SeqCst)
    }

    fn terminate(&mut self) -> std::io::Result<()> {
        self.state.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.state.ignore_terminate {
            self.state.alive.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.state.kill_calls.fetch_add(1, Ordering::SeqCst);
        self.state.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        while self.state.alive.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }
}

pub fn fake_state(channel: ChannelId, pid: u32, ignore_terminate: bool) -> Arc<FakeState> {
    Arc::new(FakeState {
        channel,
        pid,
        alive: AtomicBool::new(true),
        ignore_terminate,
        terminate_calls: AtomicUsize::new(0),
        kill_calls: AtomicUsize::new(0),
    })
}

/// Records every launch and hands out [`FakeProcess`]es.
#[derive(Default)]
pub struct RecordingLauncher {
    requests: Mutex<Vec<LaunchRequest>>,
    processes: Mutex<Vec<Arc<FakeState>>>,
    failing: Mutex<HashSet<ChannelId>>,
}

impl RecordingLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Launches for `channel` fail until [`Self::heal`] is called.
    pub fn fail_channel(&self, channel: ChannelId) {
        self.failing.lock().unwrap().insert(channel);
    }

    pub fn heal(&self, channel: ChannelId) {
        self.failing.lock().unwrap().remove(&channel);
    }

    pub fn launch_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn processes(&self) -> Vec<Arc<FakeState>> {
        self.processes.lock().unwrap().clone()
    }

    pub fn live_count(&self, channel: ChannelId) -> usize {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.channel == channel && p.alive.load(Ordering::SeqCst))
            .count()
    }

    pub fn stop_count(&self) -> usize {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.terminate_calls.load(Ordering::SeqCst) > 0)
            .count()
    }

    /// Simulates a transcoder dying on its own.
    pub fn crash(&self, channel: ChannelId) {
        for p in self.processes.lock().unwrap().iter() {
            if p.channel == channel {
                p.alive.store(false, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl PipeLauncher for RecordingLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn PipeProcess>, PipeError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.lock().unwrap().contains(&request.channel) {
            return Err(PipeError::Spawn {
                channel: request.channel,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such binary"),
            });
        }
        let mut processes = self.processes.lock().unwrap();
        let state = fake_state(request.channel, 1000 + processes.len() as u32, false);
        processes.push(Arc::clone(&state));
        Ok(Box::new(FakeProcess::new(state)))
    }
}
