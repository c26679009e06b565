/// Bookkeeping of launched containers and their control processes
use crate::types::{ExecutorId, TaskGroupId};
use chrono::{DateTime, Utc};
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// State of one executor's container
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerRecord {
    pub container_name: String,
    /// Control process running the container start command; `None` until forked
    pub control_pid: Option<Pid>,
    pub launched_at: DateTime<Utc>,
}

impl ContainerRecord {
    pub fn new(container_name: String) -> Self {
        Self {
            container_name,
            control_pid: None,
            launched_at: Utc::now(),
        }
    }
}

/// Outcome of matching an exited PID against the table
#[derive(Debug, PartialEq)]
pub enum ExitMatch {
    /// The PID belonged to a tracked executor; its record has been removed
    Owner {
        task_group: TaskGroupId,
        executor: ExecutorId,
        record: ContainerRecord,
    },
    /// The PID belonged to a container that was already killed
    Orphan,
    Unknown,
}

/// Map from (task group, executor) to container state.
///
/// Control PIDs of removed records are kept as orphans until the reaper
/// collects them, so killed containers never linger as zombies.
#[derive(Debug, Default)]
pub struct ContainerTable {
    records: HashMap<TaskGroupId, HashMap<ExecutorId, ContainerRecord>>,
    orphans: HashSet<Pid>,
}

impl ContainerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a record, displacing (and orphaning) any previous one for the pair
    pub fn insert(
        &mut self,
        task_group: &TaskGroupId,
        executor: &ExecutorId,
        record: ContainerRecord,
    ) -> Option<ContainerRecord> {
        let previous = self
            .records
            .entry(task_group.clone())
            .or_default()
            .insert(executor.clone(), record);
        self.orphan(previous.as_ref());
        previous
    }

    pub fn get(&self, task_group: &TaskGroupId, executor: &ExecutorId) -> Option<&ContainerRecord> {
        self.records.get(task_group)?.get(executor)
    }

    /// Name of the active container, if any
    pub fn container_name(&self, task_group: &TaskGroupId, executor: &ExecutorId) -> Option<String> {
        self.get(task_group, executor)
            .map(|record| record.container_name.clone())
            .filter(|name| !name.is_empty())
    }

    pub fn set_control_pid(&mut self, task_group: &TaskGroupId, executor: &ExecutorId, pid: Pid) -> bool {
        match self
            .records
            .get_mut(task_group)
            .and_then(|executors| executors.get_mut(executor))
        {
            Some(record) => {
                record.control_pid = Some(pid);
                true
            }
            None => false,
        }
    }

    /// Stop tracking a pair; its control process, if any, becomes an orphan
    pub fn remove(&mut self, task_group: &TaskGroupId, executor: &ExecutorId) -> Option<ContainerRecord> {
        let executors = self.records.get_mut(task_group)?;
        let removed = executors.remove(executor);
        if executors.is_empty() {
            self.records.remove(task_group);
        }
        self.orphan(removed.as_ref());
        removed
    }

    /// Every PID the reaper should poll: live control processes and orphans
    pub fn watched_pids(&self) -> Vec<Pid> {
        self.records
            .values()
            .flat_map(|executors| executors.values())
            .filter_map(|record| record.control_pid)
            .chain(self.orphans.iter().copied())
            .collect()
    }

    /// Resolve an exited PID, removing whatever referenced it
    pub fn take_exited(&mut self, pid: Pid) -> ExitMatch {
        if self.orphans.remove(&pid) {
            return ExitMatch::Orphan;
        }

        let owner = self.records.iter().find_map(|(task_group, executors)| {
            executors
                .iter()
                .find(|(_, record)| record.control_pid == Some(pid))
                .map(|(executor, _)| (task_group.clone(), executor.clone()))
        });

        match owner {
            Some((task_group, executor)) => {
                let executors = self.records.get_mut(&task_group);
                let record = executors.and_then(|executors| executors.remove(&executor));
                if self.records.get(&task_group).map_or(false, |e| e.is_empty()) {
                    self.records.remove(&task_group);
                }
                match record {
                    Some(record) => ExitMatch::Owner {
                        task_group,
                        executor,
                        record,
                    },
                    None => ExitMatch::Unknown,
                }
            }
            None => ExitMatch::Unknown,
        }
    }

    pub fn len(&self) -> usize {
        self.records.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    fn orphan(&mut self, record: Option<&ContainerRecord>) {
        if let Some(pid) = record.and_then(|r| r.control_pid) {
            self.orphans.insert(pid);
        }
    }
}

/// Lock the shared table; a panic in another holder does not invalidate the map
pub(crate) fn lock_table(table: &Mutex<ContainerTable>) -> MutexGuard<'_, ContainerTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}
