/// Core types shared by the isolation module, the driver and the reaper
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Isolation module configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Identity of the worker, embedded in every container name
    pub worker_id: String,
    /// Leading component of container names
    pub container_prefix: String,
    /// File name of the executor launcher under the installation home
    pub launcher_name: String,
    /// How often the reaper polls for exited control processes
    pub reaper_interval: Duration,
    /// Container toolkit command names
    pub toolkit: ToolkitCommands,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            container_prefix: "lxcbox".to_string(),
            launcher_name: "executor-launcher".to_string(),
            reaper_interval: Duration::from_secs(1),
            toolkit: ToolkitCommands::default(),
        }
    }
}

impl IsolationConfig {
    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            IsolationError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

/// Names of the external container toolkit commands
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolkitCommands {
    pub version: String,
    pub execute: String,
    pub cgroup: String,
    pub stop: String,
}

impl Default for ToolkitCommands {
    fn default() -> Self {
        Self {
            version: "lxc-version".to_string(),
            execute: "lxc-execute".to_string(),
            cgroup: "lxc-cgroup".to_string(),
            stop: "lxc-stop".to_string(),
        }
    }
}

/// Identifier of a task group (the framework an executor belongs to)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskGroupId(pub String);

/// Identifier of an executor within a task group
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutorId(pub String);

impl fmt::Display for TaskGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskGroupId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ExecutorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A task group as seen by the isolation layer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: TaskGroupId,
    /// User the executor should run as
    pub user: String,
    /// Executor parameters handed to the launcher verbatim
    pub executor_params: BTreeMap<String, String>,
}

impl TaskGroup {
    pub fn new(id: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id: TaskGroupId(id.into()),
            user: user.into(),
            executor_params: BTreeMap::new(),
        }
    }
}

/// An executor and its current resource assignment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Executor {
    pub id: ExecutorId,
    /// Location of the executor package
    pub uri: String,
    pub resources: Resources,
    /// Human-readable status, owned by the isolation module
    pub status: String,
}

impl Executor {
    pub fn new(id: impl Into<String>, uri: impl Into<String>, resources: Resources) -> Self {
        Self {
            id: ExecutorId(id.into()),
            uri: uri.into(),
            resources,
            status: String::new(),
        }
    }
}

/// Named scalar resources such as `cpu` and `mem`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources(BTreeMap<String, f64>);

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scalar(mut self, name: &str, value: f64) -> Self {
        self.set_scalar(name, value);
        self
    }

    pub fn set_scalar(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }
}

/// Container toolkit operation that failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolkitOperation {
    Version,
    Start,
    SetProperty,
    Stop,
}

impl fmt::Display for ToolkitOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolkitOperation::Version => "version",
            ToolkitOperation::Start => "start",
            ToolkitOperation::SetProperty => "set-property",
            ToolkitOperation::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// Errors raised by the isolation layer
#[derive(Error, Debug)]
pub enum IsolationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Container toolkit unavailable: {0}")]
    ToolkitUnavailable(String),

    #[error("Insufficient privilege: {0}")]
    InsufficientPrivilege(String),

    #[error("Failed to fork control process for {container}: {source}")]
    Fork {
        container: String,
        #[source]
        source: nix::Error,
    },

    #[error("Isolation module used before initialization")]
    NotInitialized,

    #[error("Isolation module already initialized")]
    AlreadyInitialized,

    #[error("Container {operation} failed for {container}: exit code {}", exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    Toolkit {
        operation: ToolkitOperation,
        container: String,
        exit_code: Option<i32>,
    },
}

impl IsolationError {
    /// Errors after which the worker process cannot safely continue
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IsolationError::ToolkitUnavailable(_)
                | IsolationError::InsufficientPrivilege(_)
                | IsolationError::Fork { .. }
                | IsolationError::NotInitialized
                | IsolationError::AlreadyInitialized
        )
    }
}

/// Result type alias for isolation operations
pub type Result<T> = std::result::Result<T, IsolationError>;
