/// lxc-isolation: run cluster executors inside resource-limited LXC containers
///
/// # Usage
/// ```bash
/// lxc-isolation check
/// lxc-isolation limits --cpus 0.5 --mem 256
/// lxc-isolation run --group fw-1 --uri hdfs://pkg/executor.tgz --cpus 2 --mem 1024
/// lxc-isolation stop --name lxcbox.worker-w1.framework-fw-1.executor-default
/// ```
use anyhow::Result;
use clap::Parser;
use lxc_isolation::cli::{self, Cli};
use lxc_isolation::types::IsolationError;

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli::run(cli) {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // Continuing after a fatal error would run executors unisolated.
            if let Some(fatal) = e.downcast_ref::<IsolationError>().filter(|err| err.is_fatal()) {
                log::error!("Fatal isolation error: {}", fatal);
            }
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
