/// Command line interface for running executors under LXC isolation
use crate::config::Configuration;
use crate::driver::{ContainerDriver, LxcDriver};
use crate::isolation::{IsolationModule, LxcIsolationModule};
use crate::resource_limits::CgroupLimits;
use crate::types::{Executor, IsolationConfig, Resources, TaskGroup};
use crate::worker::{ChannelWorker, WorkerEvent};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lxc-isolation")]
#[command(about = "Run cluster executors inside resource-limited LXC containers", long_about = None)]
pub struct Cli {
    /// Isolation configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the LXC tools are installed and we run as root
    Check,

    /// Print the cgroup values for a resource assignment
    Limits {
        /// Number of CPUs (fractional allowed)
        #[arg(long, default_value = "1")]
        cpus: f64,

        /// Memory in MB
        #[arg(long, default_value = "128")]
        mem: f64,
    },

    /// Launch one executor in a container and wait for it to exit
    Run {
        /// Task group (framework) identifier
        #[arg(long)]
        group: String,

        /// Executor identifier
        #[arg(long, default_value = "default")]
        executor: String,

        /// Location of the executor package
        #[arg(long)]
        uri: String,

        /// User to run the executor as
        #[arg(long, default_value = "root")]
        user: String,

        /// Number of CPUs (fractional allowed)
        #[arg(long, default_value = "1")]
        cpus: f64,

        /// Memory in MB
        #[arg(long, default_value = "128")]
        mem: f64,

        /// Worker settings file (flat JSON object)
        #[arg(long)]
        worker_config: Option<PathBuf>,

        /// Root under which executor work directories are created
        #[arg(long, default_value = "/tmp/lxc-isolation/work")]
        work_root: PathBuf,

        /// Run in local mode (executor output is not redirected)
        #[arg(long)]
        local: bool,

        /// Executor parameter passed to the launcher (KEY=VALUE, repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// Stop a container by name
    Stop {
        /// Container name
        #[arg(long)]
        name: String,
    },
}

/// Outcome of `run`, printed as JSON
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub container: String,
    pub framework: String,
    pub executor: String,
    pub limits: CgroupLimits,
    pub outcome: RunOutcome,
    pub exit_status: i32,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Exited,
    FrameworkKilled,
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn load_config(path: Option<&Path>) -> Result<IsolationConfig> {
    match path {
        Some(path) => IsolationConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(IsolationConfig::default()),
    }
}

/// Execute a parsed command line; returns the process exit code
pub fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check => {
            LxcDriver::new(config.toolkit.clone()).check_environment()?;
            println!("LXC isolation available");
            Ok(0)
        }
        Commands::Limits { cpus, mem } => {
            let limits = CgroupLimits::new(cpus, mem);
            println!("{}", serde_json::to_string_pretty(&limits)?);
            Ok(0)
        }
        Commands::Stop { name } => {
            LxcDriver::new(config.toolkit.clone()).stop(&name)?;
            println!("Stopped {}", name);
            Ok(0)
        }
        Commands::Run {
            group,
            executor,
            uri,
            user,
            cpus,
            mem,
            worker_config,
            work_root,
            local,
            params,
        } => {
            let conf = match worker_config {
                Some(path) => Configuration::load(&path)
                    .with_context(|| format!("Failed to load worker settings from {}", path.display()))?,
                None => Configuration::default(),
            };

            let (worker, events, link) = ChannelWorker::new(config.worker_id.clone(), conf, work_root);
            let worker = Arc::new(worker.local(local));

            let mut task_group = TaskGroup::new(group, user);
            task_group.executor_params = params.into_iter().collect();
            let resources = Resources::new().with_scalar("cpu", cpus).with_scalar("mem", mem);
            let mut executor = Executor::new(executor, uri, resources);

            let mut module = LxcIsolationModule::new(config);
            module.initialize(worker)?;
            module.launch_executor(&task_group, &mut executor)?;
            let container = module
                .container_name(&task_group.id, &executor.id)
                .unwrap_or_default();
            module.resources_changed(&task_group, &executor);
            info!("{}", executor.status);

            let (outcome, exit_status) = match events.recv()? {
                WorkerEvent::ExecutorExited { status, .. } => (RunOutcome::Exited, status),
                WorkerEvent::KillFramework { .. } => {
                    module.kill_executor(&task_group, &mut executor);
                    (RunOutcome::FrameworkKilled, 1)
                }
            };

            drop(module);
            drop(link);

            let summary = RunSummary {
                container,
                framework: task_group.id.to_string(),
                executor: executor.id.to_string(),
                limits: CgroupLimits::for_resources(&executor.resources),
                outcome,
                exit_status,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);

            Ok(if (0..=255).contains(&exit_status) { exit_status } else { 1 })
        }
    }
}
