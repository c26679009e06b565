/// Environment and command for bootstrapping an executor inside a container
use crate::config::Configuration;
use crate::types::{ExecutorId, TaskGroupId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parameters the executor launcher needs once inside the container
#[derive(Clone, Debug)]
pub struct ExecutorLauncher {
    pub task_group_id: TaskGroupId,
    pub executor_id: ExecutorId,
    pub executor_uri: String,
    pub user: String,
    pub work_directory: PathBuf,
    pub worker_address: String,
    pub frameworks_home: String,
    pub home: String,
    pub hadoop_home: String,
    pub redirect_io: bool,
    pub switch_user: bool,
    pub params: BTreeMap<String, String>,
}

impl ExecutorLauncher {
    /// Launcher settings drawn from the worker configuration
    #[allow(clippy::too_many_arguments)]
    pub fn from_configuration(
        task_group_id: TaskGroupId,
        executor_id: ExecutorId,
        executor_uri: String,
        user: String,
        work_directory: PathBuf,
        worker_address: String,
        local: bool,
        conf: &Configuration,
        params: BTreeMap<String, String>,
    ) -> Self {
        Self {
            task_group_id,
            executor_id,
            executor_uri,
            user,
            work_directory,
            worker_address,
            frameworks_home: conf.get("frameworks_home", ""),
            home: conf.get("home", ""),
            hadoop_home: conf.get("hadoop_home", ""),
            redirect_io: !local,
            switch_user: conf.get_bool("switch_user", true),
            params,
        }
    }

    /// Path of the launcher binary under an installation home
    pub fn launcher_path(home: &str, launcher_name: &str) -> PathBuf {
        Path::new(home).join(launcher_name)
    }

    /// Variables the launcher reads on startup.
    ///
    /// Executor parameters come last and override nothing set above them.
    pub fn environment(&self) -> Vec<(String, String)> {
        let flag = |value: bool| if value { "1" } else { "0" }.to_string();

        let mut env = vec![
            ("EXECUTOR_FRAMEWORK_ID".to_string(), self.task_group_id.to_string()),
            ("EXECUTOR_ID".to_string(), self.executor_id.to_string()),
            ("EXECUTOR_URI".to_string(), self.executor_uri.clone()),
            ("EXECUTOR_USER".to_string(), self.user.clone()),
            (
                "EXECUTOR_WORK_DIRECTORY".to_string(),
                self.work_directory.display().to_string(),
            ),
            ("WORKER_ADDRESS".to_string(), self.worker_address.clone()),
            ("FRAMEWORKS_HOME".to_string(), self.frameworks_home.clone()),
            ("ISOLATION_HOME".to_string(), self.home.clone()),
            ("HADOOP_HOME".to_string(), self.hadoop_home.clone()),
            ("REDIRECT_IO".to_string(), flag(self.redirect_io)),
            ("SWITCH_USER".to_string(), flag(self.switch_user)),
        ];

        for (key, value) in &self.params {
            if !env.iter().any(|(existing, _)| existing == key) {
                env.push((key.clone(), value.clone()));
            }
        }

        env
    }
}
