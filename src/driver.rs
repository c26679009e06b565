/// Container toolkit driver: start, set-property and stop against LXC
use crate::types::{IsolationError, Result, ToolkitCommands, ToolkitOperation};
use log::{debug, warn};
use nix::unistd::{fork, geteuid, ForkResult, Pid};
use std::collections::BTreeMap;
use std::ffi::{CString, OsString};
use std::os::raw::c_char;
use std::os::unix::ffi::OsStringExt;
use std::process::{Command, Stdio};

/// Exit status of a control process whose exec failed
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Privileged container operations required by the isolation module
pub trait ContainerDriver: Send + Sync {
    /// Verify the toolkit is installed and the process may manage containers
    fn check_environment(&self) -> Result<()>;

    /// Fork a control process running `command args..` inside a new container.
    ///
    /// Returns the control process PID as soon as the fork succeeds; a failure
    /// to exec shows up later as the control process exiting.
    fn start(
        &self,
        container: &str,
        command: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<Pid>;

    /// Set a control property on a running container
    fn set_property(&self, container: &str, key: &str, value: &str) -> Result<()>;

    /// Forcibly stop a container
    fn stop(&self, container: &str) -> Result<()>;
}

/// Driver shelling out to the LXC command line tools
#[derive(Clone, Debug)]
pub struct LxcDriver {
    commands: ToolkitCommands,
}

impl LxcDriver {
    pub fn new(commands: ToolkitCommands) -> Self {
        Self { commands }
    }

    /// Run one toolkit command to completion; only the exit status is meaningful
    fn run_toolkit(
        &self,
        operation: ToolkitOperation,
        container: &str,
        program: &str,
        args: &[&str],
    ) -> Result<()> {
        debug!("Running {} {}", program, args.join(" "));

        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(IsolationError::Toolkit {
                operation,
                container: container.to_string(),
                exit_code: status.code(),
            }),
            Err(e) => {
                warn!("Could not run {}: {}", program, e);
                Err(IsolationError::Toolkit {
                    operation,
                    container: container.to_string(),
                    exit_code: None,
                })
            }
        }
    }
}

impl Default for LxcDriver {
    fn default() -> Self {
        Self::new(ToolkitCommands::default())
    }
}

impl ContainerDriver for LxcDriver {
    fn check_environment(&self) -> Result<()> {
        if let Err(e) = self.run_toolkit(ToolkitOperation::Version, "", &self.commands.version, &[]) {
            return Err(IsolationError::ToolkitUnavailable(format!(
                "could not run {} ({}); make sure the Linux Container tools are installed",
                self.commands.version, e
            )));
        }

        let euid = geteuid();
        if !euid.is_root() {
            return Err(IsolationError::InsufficientPrivilege(format!(
                "LXC isolation requires the worker to run as root, running as uid {}",
                euid
            )));
        }

        Ok(())
    }

    fn start(
        &self,
        container: &str,
        command: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<Pid> {
        // Callers may hold locks across the fork, so everything the child needs,
        // pointer arrays included, is allocated first. The child only execs.
        let program = cstring(&self.commands.execute)?;
        let mut argv = vec![program.clone(), cstring("-n")?, cstring(container)?, cstring(command)?];
        for arg in args {
            argv.push(cstring(arg)?);
        }
        let envp = exec_environment(env)?;
        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => Ok(child),
            Ok(ForkResult::Child) => {
                const MSG: &[u8] = b"lxc-isolation: could not exec container start command\n";
                unsafe {
                    libc::execvpe(program.as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
                    libc::write(libc::STDERR_FILENO, MSG.as_ptr() as *const libc::c_void, MSG.len());
                    libc::_exit(EXEC_FAILURE_STATUS)
                }
            }
            Err(e) => Err(IsolationError::Fork {
                container: container.to_string(),
                source: e,
            }),
        }
    }

    fn set_property(&self, container: &str, key: &str, value: &str) -> Result<()> {
        self.run_toolkit(
            ToolkitOperation::SetProperty,
            container,
            &self.commands.cgroup,
            &["-n", container, key, value],
        )
    }

    fn stop(&self, container: &str) -> Result<()> {
        self.run_toolkit(ToolkitOperation::Stop, container, &self.commands.stop, &["-n", container])
    }
}

fn cstring(value: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| IsolationError::Config(format!("Argument contains a NUL byte: {:?}", value)))
}

/// Pointer array for exec, built before forking
fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// Inherited environment with `overrides` applied, as `KEY=VALUE` entries
fn exec_environment(overrides: &[(String, String)]) -> Result<Vec<CString>> {
    let mut merged: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
    for (key, value) in overrides {
        merged.insert(OsString::from(key), OsString::from(value));
    }

    merged
        .into_iter()
        .map(|(key, value)| {
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend(value.into_vec());
            CString::new(entry).map_err(|_| {
                IsolationError::Config("Environment entry contains a NUL byte".to_string())
            })
        })
        .collect()
}
