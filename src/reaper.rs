/// Background detection of exited container control processes
use crate::tracking::{lock_table, ContainerTable, ExitMatch};
use crate::types::{ExecutorId, Result, TaskGroupId};
use crate::worker::Worker;
use crossbeam_channel::{select, Sender};
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Status reported for a control process that vanished without being reaped by us
pub const LOST_STATUS: i32 = -1;

/// A control process that has exited
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: Pid,
    /// Exit code, or `128 + signal` when killed by a signal
    pub status: i32,
}

/// Non-blocking source of process exits
pub trait ExitSource: Send + Sync {
    /// Exits among `candidates` that happened since the previous poll
    fn poll(&self, candidates: &[Pid]) -> Vec<ChildExit>;
}

/// Polls each candidate with `waitpid(pid, WNOHANG)`.
///
/// Only PIDs we forked are waited on, so children spawned elsewhere in the
/// process (toolkit invocations included) are left to their owners.
#[derive(Clone, Copy, Debug, Default)]
pub struct WaitpidExitSource;

impl ExitSource for WaitpidExitSource {
    fn poll(&self, candidates: &[Pid]) -> Vec<ChildExit> {
        candidates
            .iter()
            .filter_map(|&pid| match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => Some(ChildExit { pid, status: code }),
                Ok(WaitStatus::Signaled(pid, signal, _)) => Some(ChildExit {
                    pid,
                    status: 128 + signal as i32,
                }),
                Ok(_) => None,
                Err(Errno::ECHILD) => {
                    warn!("Control process {} is no longer our child", pid);
                    Some(ChildExit { pid, status: LOST_STATUS })
                }
                Err(e) => {
                    warn!("waitpid({}) failed: {}", pid, e);
                    None
                }
            })
            .collect()
    }
}

/// Poll once for exited control processes and notify the worker.
///
/// Matching happens under the table lock; notifications are sent after it is
/// released. Returns the number of notifications sent.
pub fn reap(table: &Mutex<ContainerTable>, exits: &dyn ExitSource, worker: &dyn Worker) -> usize {
    let lost: Vec<(TaskGroupId, ExecutorId, i32)> = {
        let mut table = lock_table(table);
        let watched = table.watched_pids();
        let mut lost = Vec::new();

        for exit in exits.poll(&watched) {
            match table.take_exited(exit.pid) {
                ExitMatch::Owner { task_group, executor, record } => {
                    let uptime = chrono::Utc::now() - record.launched_at;
                    info!(
                        "Container {} exited after {}s (control pid {}, status {}); telling worker of lost executor {} of framework {}",
                        record.container_name,
                        uptime.num_seconds(),
                        exit.pid,
                        exit.status,
                        executor,
                        task_group
                    );
                    lost.push((task_group, executor, exit.status));
                }
                ExitMatch::Orphan => {
                    debug!("Collected control process {} of a stopped container", exit.pid);
                }
                ExitMatch::Unknown => {
                    debug!("Exited process {} matches no container, ignoring", exit.pid);
                }
            }
        }
        lost
    };

    for (task_group, executor, status) in &lost {
        worker.executor_exited(task_group, executor, *status);
    }
    lost.len()
}

enum ReaperSignal {
    Terminate,
}

/// Handle to the reaper thread.
///
/// Dropping the handle terminates the thread and waits for it to finish.
pub struct Reaper {
    control: Sender<ReaperSignal>,
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl Reaper {
    /// Start polling every `interval` until terminated or the worker goes away
    pub fn spawn(
        table: Arc<Mutex<ContainerTable>>,
        exits: Arc<dyn ExitSource>,
        worker: Arc<dyn Worker>,
        interval: Duration,
    ) -> Result<Self> {
        let (control_tx, control_rx) = crossbeam_channel::bounded(1);
        let link = worker.link();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("isolation-reaper".to_string())
            .spawn(move || {
                loop {
                    select! {
                        recv(control_rx) -> _ => {
                            debug!("Reaper terminating");
                            break;
                        }
                        recv(link) -> _ => {
                            info!("Linked worker terminated, reaper exiting");
                            break;
                        }
                        default(interval) => {
                            reap(&table, exits.as_ref(), worker.as_ref());
                        }
                    }
                }
                flag.store(false, Ordering::SeqCst);
            })?;

        Ok(Self {
            control: control_tx,
            handle: Some(handle),
            running,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal termination and block until the thread has exited
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.control.try_send(ReaperSignal::Terminate);
            if handle.join().is_err() {
                error!("Reaper thread panicked");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
