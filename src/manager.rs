use std::collections::BTreeMap;

use serde::Serialize;

use crate::{media::pipe::PipeProcess, state::types::ChannelId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Absent,
    Stopped,
    Running,
}

/// A tracked channel. It is `Running` exactly when it owns a process handle.
pub struct ChannelRecord {
    id: ChannelId,
    process: Option<Box<dyn PipeProcess>>,
    override_link: Option<String>,
}

impl ChannelRecord {
    fn new(id: ChannelId) -> Self {
        Self {
            id,
            process: None,
            override_link: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        if self.process.is_some() {
            ChannelState::Running
        } else {
            ChannelState::Stopped
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    pub fn override_link(&self) -> Option<&str> {
        self.override_link.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub id: ChannelId,
    pub state: ChannelState,
    pub pid: Option<u32>,
}

/// Authoritative view of tracked channels and their live processes.
#[derive(Default)]
pub struct PipelineRegistry {
    channels: BTreeMap<ChannelId, ChannelRecord>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: ChannelId) -> ChannelState {
        self.channels
            .get(&id)
            .map(ChannelRecord::state)
            .unwrap_or(ChannelState::Absent)
    }

    pub fn get(&self, id: ChannelId) -> Option<&ChannelRecord> {
        self.channels.get(&id)
    }

    pub fn tracked(&self) -> Vec<ChannelId> {
        self.channels.keys().copied().collect()
    }

    /// Starts tracking `id` as `Stopped`; returns true if it was `Absent`.
    pub fn track(&mut self, id: ChannelId) -> bool {
        if self.channels.contains_key(&id) {
            return false;
        }
        self.channels.insert(id, ChannelRecord::new(id));
        true
    }

    pub fn set_override_link(&mut self, id: ChannelId, link: Option<&str>) {
        if let Some(record) = self.channels.get_mut(&id) {
            record.override_link = link.map(str::to_string);
        }
    }

    /// Binds a live process to a tracked channel.
    ///
    /// Hands the process back if the channel is untracked or already running,
    /// so the caller can stop it instead of leaking a second pipeline.
    pub fn set_running(
        &mut self,
        id: ChannelId,
        process: Box<dyn PipeProcess>,
    ) -> Result<(), Box<dyn PipeProcess>> {
        match self.channels.get_mut(&id) {
            Some(record) if record.process.is_none() => {
                record.process = Some(process);
                Ok(())
            }
            _ => Err(process),
        }
    }

    /// Detaches the process of a running channel, leaving it `Stopped`.
    pub fn take_process(&mut self, id: ChannelId) -> Option<Box<dyn PipeProcess>> {
        self.channels.get_mut(&id).and_then(|r| r.process.take())
    }

    /// Drops all bookkeeping for `id`, returning its process if it had one.
    pub fn forget(&mut self, id: ChannelId) -> Option<Box<dyn PipeProcess>> {
        self.channels.remove(&id).and_then(|r| r.process)
    }

    /// Moves channels whose process exited on its own back to `Stopped`.
    pub fn reap_exited(&mut self) -> Vec<ChannelId> {
        let mut reaped = Vec::new();
        for (id, record) in self.channels.iter_mut() {
            let exited = record
                .process
                .as_mut()
                .map(|p| p.has_exited())
                .unwrap_or(false);
            if exited {
                record.process = None;
                reaped.push(*id);
            }
        }
        reaped
    }

    /// Detaches every live process, leaving all channels `Stopped`.
    pub fn drain_processes(&mut self) -> Vec<(ChannelId, Box<dyn PipeProcess>)> {
        self.channels
            .iter_mut()
            .filter_map(|(id, record)| record.process.take().map(|p| (*id, p)))
            .collect()
    }

    pub fn status(&self) -> Vec<ChannelStatus> {
        self.channels
            .values()
            .map(|r| ChannelStatus {
                id: r.id,
                state: r.state(),
                pid: r.pid(),
            })
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.channels
            .values()
            .filter(|r| r.state() == ChannelState::Running)
            .count()
    }
}
