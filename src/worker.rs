/// The worker-side contract consumed by the isolation module
use crate::config::Configuration;
use crate::types::{ExecutorId, TaskGroupId};
use crossbeam_channel::{Receiver, Sender};
use log::warn;
use std::path::PathBuf;

/// Callbacks and context the hosting worker provides.
///
/// `kill_framework` and `executor_exited` may be called from the reaper
/// thread, hence `Send + Sync`.
pub trait Worker: Send + Sync {
    fn worker_id(&self) -> &str;

    fn configuration(&self) -> &Configuration;

    /// Address executors use to reach this worker
    fn worker_address(&self) -> String;

    /// Whether the worker runs in local (single-machine) mode
    fn is_local(&self) -> bool {
        false
    }

    fn unique_work_directory(&self, task_group: &TaskGroupId, executor: &ExecutorId) -> PathBuf;

    /// Escalation: tear down every executor of `task_group`
    fn kill_framework(&self, task_group: &TaskGroupId);

    /// An executor's control process exited with `status`
    fn executor_exited(&self, task_group: &TaskGroupId, executor: &ExecutorId, status: i32);

    /// Disconnects once the worker terminates
    fn link(&self) -> Receiver<()> {
        crossbeam_channel::never()
    }
}

/// Notifications delivered by [`ChannelWorker`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerEvent {
    KillFramework {
        task_group: TaskGroupId,
    },
    ExecutorExited {
        task_group: TaskGroupId,
        executor: ExecutorId,
        status: i32,
    },
}

/// Held by whoever owns the worker's lifetime; dropping it terminates linked actors
#[derive(Debug)]
pub struct WorkerLink {
    _alive: Sender<()>,
}

/// Worker that forwards its hooks as [`WorkerEvent`]s over a channel
pub struct ChannelWorker {
    worker_id: String,
    address: String,
    configuration: Configuration,
    work_root: PathBuf,
    local: bool,
    events: Sender<WorkerEvent>,
    link: Receiver<()>,
}

impl ChannelWorker {
    /// Returns the worker, the event stream and the link guard
    pub fn new(
        worker_id: impl Into<String>,
        configuration: Configuration,
        work_root: PathBuf,
    ) -> (Self, Receiver<WorkerEvent>, WorkerLink) {
        let worker_id = worker_id.into();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (link_tx, link_rx) = crossbeam_channel::bounded(0);

        let worker = Self {
            address: format!("worker-{}@{}", worker_id, std::process::id()),
            worker_id,
            configuration,
            work_root,
            local: false,
            events: events_tx,
            link: link_rx,
        };
        (worker, events_rx, WorkerLink { _alive: link_tx })
    }

    pub fn local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    fn send(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            warn!("Worker event receiver dropped; event discarded");
        }
    }
}

impl Worker for ChannelWorker {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    fn worker_address(&self) -> String {
        self.address.clone()
    }

    fn is_local(&self) -> bool {
        self.local
    }

    fn unique_work_directory(&self, task_group: &TaskGroupId, executor: &ExecutorId) -> PathBuf {
        self.work_root
            .join(format!("framework-{}", task_group))
            .join(format!("executor-{}", executor))
    }

    fn kill_framework(&self, task_group: &TaskGroupId) {
        self.send(WorkerEvent::KillFramework {
            task_group: task_group.clone(),
        });
    }

    fn executor_exited(&self, task_group: &TaskGroupId, executor: &ExecutorId, status: i32) {
        self.send(WorkerEvent::ExecutorExited {
            task_group: task_group.clone(),
            executor: executor.clone(),
            status,
        });
    }

    fn link(&self) -> Receiver<()> {
        self.link.clone()
    }
}
