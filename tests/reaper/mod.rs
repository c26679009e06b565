use crate::common::{executor, harness, harness_with, task_group, FakeDriver, FIRST_PID};
use lxc_isolation::config::Configuration;
use lxc_isolation::driver::{ContainerDriver, LxcDriver, EXEC_FAILURE_STATUS};
use lxc_isolation::reaper::WaitpidExitSource;
use lxc_isolation::types::{IsolationConfig, Result, ToolkitCommands};
use lxc_isolation::worker::{ChannelWorker, WorkerEvent};
use lxc_isolation::{IsolationModule, LxcIsolationModule};
use nix::unistd::Pid;
use serial_test::serial;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn test_background_reaper_reports_exit() {
    let mut h = harness_with(FakeDriver::new(), Duration::from_millis(20));
    let group = task_group("fw-1");
    let mut exec = executor("exec-1", 1.0, 256.0);
    h.module.launch_executor(&group, &mut exec).unwrap();

    h.exits.exit(FIRST_PID, 9);

    let event = h
        .events
        .recv_timeout(Duration::from_secs(5))
        .expect("reaper should report the exit");
    assert_eq!(
        event,
        WorkerEvent::ExecutorExited {
            task_group: group.id.clone(),
            executor: exec.id.clone(),
            status: 9,
        }
    );
    assert_eq!(h.module.container_name(&group.id, &exec.id), None);

    // Nothing further for the same exit.
    assert!(h.events.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_unmatched_exit_is_ignored() {
    let mut h = harness();
    let group = task_group("fw-1");
    let mut exec = executor("exec-1", 1.0, 256.0);
    h.module.launch_executor(&group, &mut exec).unwrap();

    h.exits.exit(31337, 0);

    assert_eq!(h.module.reap_now(), 0);
    assert!(h.events.try_recv().is_err());
    assert_eq!(h.module.tracked_containers(), 1);
    assert_eq!(h.module.control_pid(&group.id, &exec.id), Some(Pid::from_raw(FIRST_PID)));
}

#[test]
fn test_exit_after_kill_is_silent() {
    let mut h = harness();
    let group = task_group("fw-1");
    let mut exec = executor("exec-1", 1.0, 256.0);
    h.module.launch_executor(&group, &mut exec).unwrap();
    h.module.kill_executor(&group, &mut exec);

    h.exits.exit(FIRST_PID, 137);

    assert_eq!(h.module.reap_now(), 0);
    assert!(h.events.try_recv().is_err());
}

#[test]
fn test_exit_reported_once_per_launch() {
    let mut h = harness();
    let group = task_group("fw-1");
    let mut exec = executor("exec-1", 1.0, 256.0);
    h.module.launch_executor(&group, &mut exec).unwrap();

    h.exits.exit(FIRST_PID, 0);
    h.exits.exit(FIRST_PID, 0);

    assert_eq!(h.module.reap_now(), 1);
    assert_eq!(h.module.reap_now(), 0);
    assert_eq!(h.events.try_iter().count(), 1);
}

#[test]
fn test_relaunch_reports_only_new_exit() {
    let mut h = harness();
    let group = task_group("fw-1");
    let mut exec = executor("exec-1", 1.0, 256.0);
    h.module.launch_executor(&group, &mut exec).unwrap();
    h.module.launch_executor(&group, &mut exec).unwrap();
    let second = FIRST_PID + 1;
    assert_eq!(h.module.control_pid(&group.id, &exec.id), Some(Pid::from_raw(second)));

    // The displaced first launch dies quietly.
    h.exits.exit(FIRST_PID, 1);
    assert_eq!(h.module.reap_now(), 0);
    assert_eq!(h.module.tracked_containers(), 1);

    h.exits.exit(second, 3);
    assert_eq!(h.module.reap_now(), 1);
    assert_eq!(
        h.events.try_recv().unwrap(),
        WorkerEvent::ExecutorExited {
            task_group: group.id.clone(),
            executor: exec.id.clone(),
            status: 3,
        }
    );
}

#[test]
fn test_concurrent_kill_and_exit() {
    for _ in 0..20 {
        let mut h = harness_with(FakeDriver::new(), Duration::from_millis(1));
        let group = task_group("fw-1");
        let mut exec = executor("exec-1", 1.0, 256.0);
        h.module.launch_executor(&group, &mut exec).unwrap();

        h.exits.exit(FIRST_PID, 0);
        h.module.kill_executor(&group, &mut exec);

        // Either the reaper won and reported, or the kill won and the exit
        // became an orphan. Never both, never twice.
        thread::sleep(Duration::from_millis(20));
        assert!(h.events.try_iter().count() <= 1);
        assert_eq!(h.module.container_name(&group.id, &exec.id), None);
    }
}

#[test]
fn test_reaper_stops_when_worker_goes_away() {
    let mut h = harness_with(FakeDriver::new(), Duration::from_millis(20));
    assert!(h.module.reaper_running());

    drop(h.link.take());

    assert!(wait_until(Duration::from_secs(5), || !h.module.reaper_running()));
}

/// Real LXC driver minus the environment probe, so toolkit stand-ins can run unprivileged
struct UncheckedLxc(LxcDriver);

impl ContainerDriver for UncheckedLxc {
    fn check_environment(&self) -> Result<()> {
        Ok(())
    }

    fn start(&self, container: &str, command: &str, args: &[String], env: &[(String, String)]) -> Result<Pid> {
        self.0.start(container, command, args, env)
    }

    fn set_property(&self, container: &str, key: &str, value: &str) -> Result<()> {
        self.0.set_property(container, key, value)
    }

    fn stop(&self, container: &str) -> Result<()> {
        self.0.stop(container)
    }
}

fn run_real(execute: &str) -> WorkerEvent {
    let toolkit = ToolkitCommands {
        execute: execute.to_string(),
        ..ToolkitCommands::default()
    };
    let config = IsolationConfig {
        worker_id: "w1".to_string(),
        reaper_interval: Duration::from_millis(20),
        toolkit: toolkit.clone(),
        ..IsolationConfig::default()
    };
    let driver = Arc::new(UncheckedLxc(LxcDriver::new(toolkit)));
    let mut module = LxcIsolationModule::with_backends(config, driver, Arc::new(WaitpidExitSource));

    let work_root = tempfile::tempdir().unwrap();
    let (worker, events, _link) =
        ChannelWorker::new("w1", Configuration::default(), work_root.path().to_path_buf());
    module.initialize(Arc::new(worker)).unwrap();

    let group = task_group("fw-real");
    let mut exec = executor("exec-real", 1.0, 128.0);
    module.launch_executor(&group, &mut exec).unwrap();

    events
        .recv_timeout(Duration::from_secs(10))
        .expect("control process exit should be reported")
}

#[test]
#[serial]
fn test_real_control_process_exit_status() {
    match run_real("false") {
        WorkerEvent::ExecutorExited { executor, status, .. } => {
            assert_eq!(executor.0, "exec-real");
            assert_eq!(status, 1);
        }
        event => panic!("unexpected event: {:?}", event),
    }
}

#[test]
#[serial]
fn test_real_exec_failure_surfaces_as_exit() {
    match run_real("/nonexistent/lxc-execute") {
        WorkerEvent::ExecutorExited { status, .. } => assert_eq!(status, EXEC_FAILURE_STATUS),
        event => panic!("unexpected event: {:?}", event),
    }
}

#[test]
#[serial]
fn test_real_reaper_leaves_toolkit_children_alone() {
    let toolkit = ToolkitCommands {
        execute: "false".to_string(),
        cgroup: "true".to_string(),
        ..ToolkitCommands::default()
    };
    let config = IsolationConfig {
        worker_id: "w1".to_string(),
        reaper_interval: Duration::from_millis(1),
        toolkit: toolkit.clone(),
        ..IsolationConfig::default()
    };
    let probe = LxcDriver::new(toolkit.clone());
    let driver = Arc::new(UncheckedLxc(LxcDriver::new(toolkit)));
    let mut module = LxcIsolationModule::with_backends(config, driver, Arc::new(WaitpidExitSource));
    let (worker, events, _link) =
        ChannelWorker::new("w1", Configuration::default(), PathBuf::from("/tmp/lxc-isolation-tests"));
    module.initialize(Arc::new(worker)).unwrap();

    let group = task_group("fw-real");
    let mut exec = executor("exec-real", 1.0, 128.0);
    module.launch_executor(&group, &mut exec).unwrap();

    // Toolkit calls wait on their own children while the reaper polls.
    for _ in 0..20 {
        probe
            .set_property("lxcbox.probe", "cpu.shares", "1024")
            .expect("toolkit status must not be stolen by the reaper");
    }

    match events.recv_timeout(Duration::from_secs(10)) {
        Ok(WorkerEvent::ExecutorExited { status, .. }) => assert_eq!(status, 1),
        other => panic!("unexpected event: {:?}", other),
    }
}
