/// Executor isolation inside LXC containers
use crate::driver::{ContainerDriver, LxcDriver};
use crate::launcher::ExecutorLauncher;
use crate::reaper::{self, ExitSource, Reaper, WaitpidExitSource};
use crate::resource_limits::CgroupLimits;
use crate::tracking::{lock_table, ContainerRecord, ContainerTable};
use crate::types::{Executor, ExecutorId, IsolationConfig, IsolationError, Result, TaskGroup, TaskGroupId};
use crate::worker::Worker;
use log::{debug, error, info, warn};
use nix::unistd::Pid;
use std::sync::{Arc, Mutex};

/// Executor status while its container runs is this prefix plus the container name
pub const STATUS_RUNNING_PREFIX: &str = "Container: ";
pub const STATUS_NOT_RUNNING: &str = "No executor running";

/// Lifecycle contract between the worker and an isolation backend.
///
/// For one (task group, executor) pair the worker calls these in order:
/// launch, any number of resource changes, at most one kill.
pub trait IsolationModule {
    /// Check the environment and start background monitoring
    fn initialize(&mut self, worker: Arc<dyn Worker>) -> Result<()>;

    /// Start the executor; returns once the control process is forked
    fn launch_executor(&mut self, task_group: &TaskGroup, executor: &mut Executor) -> Result<()>;

    /// Stop the executor's container, if any. Never fails.
    fn kill_executor(&mut self, task_group: &TaskGroup, executor: &mut Executor);

    /// Apply the executor's current resource assignment to its container
    fn resources_changed(&mut self, task_group: &TaskGroup, executor: &Executor);
}

/// Isolation backend running each executor in its own LXC container
pub struct LxcIsolationModule {
    config: IsolationConfig,
    driver: Arc<dyn ContainerDriver>,
    exits: Arc<dyn ExitSource>,
    table: Arc<Mutex<ContainerTable>>,
    worker: Option<Arc<dyn Worker>>,
    reaper: Option<Reaper>,
}

impl LxcIsolationModule {
    pub fn new(config: IsolationConfig) -> Self {
        let driver = LxcDriver::new(config.toolkit.clone());
        Self::with_backends(config, Arc::new(driver), Arc::new(WaitpidExitSource))
    }

    pub fn with_backends(
        config: IsolationConfig,
        driver: Arc<dyn ContainerDriver>,
        exits: Arc<dyn ExitSource>,
    ) -> Self {
        Self {
            config,
            driver,
            exits,
            table: Arc::new(Mutex::new(ContainerTable::new())),
            worker: None,
            reaper: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.worker.is_some()
    }

    pub fn reaper_running(&self) -> bool {
        self.reaper.as_ref().map_or(false, Reaper::is_running)
    }

    /// Name of the active container for a pair
    pub fn container_name(&self, task_group: &TaskGroupId, executor: &ExecutorId) -> Option<String> {
        lock_table(&self.table).container_name(task_group, executor)
    }

    pub fn control_pid(&self, task_group: &TaskGroupId, executor: &ExecutorId) -> Option<Pid> {
        lock_table(&self.table)
            .get(task_group, executor)
            .and_then(|record| record.control_pid)
    }

    pub fn tracked_containers(&self) -> usize {
        lock_table(&self.table).len()
    }

    /// Run one reaper pass on the calling thread
    #[doc(hidden)]
    pub fn reap_now(&self) -> usize {
        match &self.worker {
            Some(worker) => reaper::reap(&self.table, self.exits.as_ref(), worker.as_ref()),
            None => 0,
        }
    }

    fn container_name_for(&self, worker: &dyn Worker, task_group: &TaskGroupId, executor: &ExecutorId) -> String {
        container_name(&self.config.container_prefix, worker.worker_id(), task_group, executor)
    }
}

impl IsolationModule for LxcIsolationModule {
    fn initialize(&mut self, worker: Arc<dyn Worker>) -> Result<()> {
        if self.is_initialized() {
            return Err(IsolationError::AlreadyInitialized);
        }

        self.driver.check_environment()?;

        let reaper = Reaper::spawn(
            self.table.clone(),
            self.exits.clone(),
            worker.clone(),
            self.config.reaper_interval,
        )?;

        info!("LXC isolation initialized for worker {}", worker.worker_id());
        self.worker = Some(worker);
        self.reaper = Some(reaper);
        Ok(())
    }

    fn launch_executor(&mut self, task_group: &TaskGroup, executor: &mut Executor) -> Result<()> {
        let worker = self.worker.clone().ok_or(IsolationError::NotInitialized)?;

        info!(
            "Starting executor {} for framework {}: {}",
            executor.id, task_group.id, executor.uri
        );

        let name = self.container_name_for(worker.as_ref(), &task_group.id, &executor.id);
        let conf = worker.configuration();
        let launcher = ExecutorLauncher::from_configuration(
            task_group.id.clone(),
            executor.id.clone(),
            executor.uri.clone(),
            task_group.user.clone(),
            worker.unique_work_directory(&task_group.id, &executor.id),
            worker.worker_address(),
            worker.is_local(),
            conf,
            task_group.executor_params.clone(),
        );
        let command = ExecutorLauncher::launcher_path(&conf.get("home", "."), &self.config.launcher_name);
        let env = launcher.environment();

        // The lock spans record creation, fork and PID store so the reaper
        // never sees an exit before the PID is recorded.
        let mut table = lock_table(&self.table);
        if let Some(previous) = table.insert(&task_group.id, &executor.id, ContainerRecord::new(name.clone())) {
            warn!(
                "Replacing container {} for executor {} of framework {}",
                previous.container_name, executor.id, task_group.id
            );
        }
        executor.status = format!("{}{}", STATUS_RUNNING_PREFIX, name);

        match self.driver.start(&name, &command.to_string_lossy(), &[], &env) {
            Ok(pid) => {
                table.set_control_pid(&task_group.id, &executor.id, pid);
                info!("Started control process for {}, pid = {}", name, pid);
                Ok(())
            }
            Err(e) => {
                table.remove(&task_group.id, &executor.id);
                executor.status = STATUS_NOT_RUNNING.to_string();
                error!("Failed to launch container {}: {}", name, e);
                Err(e)
            }
        }
    }

    fn kill_executor(&mut self, task_group: &TaskGroup, executor: &mut Executor) {
        let removed = lock_table(&self.table).remove(&task_group.id, &executor.id);
        let Some(record) = removed else {
            debug!(
                "No container for executor {} of framework {}, nothing to stop",
                executor.id, task_group.id
            );
            // The reaper may have collected the container already.
            if executor.status.starts_with(STATUS_RUNNING_PREFIX) {
                executor.status = STATUS_NOT_RUNNING.to_string();
            }
            return;
        };

        if !record.container_name.is_empty() {
            info!("Stopping container {}", record.container_name);
            if let Err(e) = self.driver.stop(&record.container_name) {
                error!("Failed to stop container {}: {}", record.container_name, e);
            }
        }
        executor.status = STATUS_NOT_RUNNING.to_string();
    }

    fn resources_changed(&mut self, task_group: &TaskGroup, executor: &Executor) {
        let Some(name) = self.container_name(&task_group.id, &executor.id) else {
            debug!(
                "No container for executor {} of framework {}, ignoring resource change",
                executor.id, task_group.id
            );
            return;
        };
        let Some(worker) = self.worker.clone() else {
            return;
        };

        let limits = CgroupLimits::for_resources(&executor.resources);
        for (property, value) in limits.properties() {
            info!(
                "Setting {} for executor {} of framework {} to {}",
                property, executor.id, task_group.id, value
            );
            if let Err(e) = self.driver.set_property(&name, property, &value.to_string()) {
                error!(
                    "Failed to set {} for framework {}: {}; killing framework",
                    property, task_group.id, e
                );
                worker.kill_framework(&task_group.id);
                return;
            }
        }
    }
}

impl Drop for LxcIsolationModule {
    fn drop(&mut self) {
        // The reaper shares the table and calls into the worker; it must be
        // gone before either is released.
        if let Some(reaper) = self.reaper.take() {
            reaper.terminate();
        }
    }
}

/// Deterministic container name for an executor of a task group on a worker.
///
/// Components are escaped so distinct inputs never share a name: only
/// `[A-Za-z0-9-]` pass through, every other byte becomes `_XX` (hex), which
/// keeps `.` free to separate components.
pub fn container_name(
    prefix: &str,
    worker_id: &str,
    task_group: &TaskGroupId,
    executor: &ExecutorId,
) -> String {
    format!(
        "{}.worker-{}.framework-{}.executor-{}",
        escape(prefix),
        escape(worker_id),
        escape(&task_group.0),
        escape(&executor.0)
    )
}

fn escape(component: &str) -> String {
    let mut escaped = String::with_capacity(component.len());
    for byte in component.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("_{:02X}", byte));
        }
    }
    escaped
}
