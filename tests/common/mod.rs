//! In-memory process table shared by a fake launcher and inspector.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use warden::launcher::executable_stem;
use warden::{
    CommandSignature, DaemonSpec, Launcher, LiveProcess, ManualClock, ProcessHandle,
    ProcessInspector, Registry, RestartPolicy, SpawnError, Supervisor,
};

#[derive(Default)]
pub struct ProcessTable {
    procs: Mutex<HashMap<u32, LiveProcess>>,
    next_pid: AtomicU32,
}

impl ProcessTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            procs: Mutex::new(HashMap::new()),
            next_pid: AtomicU32::new(1000),
        })
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.procs.lock().contains_key(&pid)
    }

    /// Simulate a crash.
    pub fn kill(&self, pid: u32) {
        self.procs.lock().remove(&pid);
    }

    /// Put an unrelated program at `pid`.
    pub fn occupy(&self, pid: u32, name: &str) {
        self.procs.lock().insert(
            pid,
            LiveProcess {
                pid,
                name: name.to_string(),
                exe: None,
                cmd: vec![name.to_string()],
                zombie: false,
            },
        );
    }

    pub fn running_count(&self) -> usize {
        self.procs.lock().len()
    }
}

pub struct FakeInspector(pub Arc<ProcessTable>);

impl ProcessInspector for FakeInspector {
    fn inspect(&self, pid: u32) -> Option<LiveProcess> {
        self.0.procs.lock().get(&pid).cloned()
    }
}

pub struct FakeLauncher {
    table: Arc<ProcessTable>,
    spawned: Mutex<Vec<(String, u32)>>,
    fail_spawns: AtomicBool,
    /// Daemons that ignore termination requests.
    stubborn: Mutex<HashSet<String>>,
    /// Daemons that survive a forced kill.
    unkillable: Mutex<HashSet<String>>,
    owners: Mutex<HashMap<u32, String>>,
    terminated: Mutex<Vec<u32>>,
    force_killed: Mutex<Vec<u32>>,
}

impl FakeLauncher {
    pub fn new(table: Arc<ProcessTable>) -> Arc<Self> {
        Arc::new(Self {
            table,
            spawned: Mutex::new(Vec::new()),
            fail_spawns: AtomicBool::new(false),
            stubborn: Mutex::new(HashSet::new()),
            unkillable: Mutex::new(HashSet::new()),
            owners: Mutex::new(HashMap::new()),
            terminated: Mutex::new(Vec::new()),
            force_killed: Mutex::new(Vec::new()),
        })
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().len()
    }

    pub fn spawned(&self) -> Vec<(String, u32)> {
        self.spawned.lock().clone()
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawns.store(fail, Ordering::SeqCst);
    }

    pub fn ignore_termination(&self, name: &str) {
        self.stubborn.lock().insert(name.to_string());
    }

    pub fn survive_force_kill(&self, name: &str) {
        self.unkillable.lock().insert(name.to_string());
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().clone()
    }

    pub fn force_killed(&self) -> Vec<u32> {
        self.force_killed.lock().clone()
    }
}

impl Launcher for FakeLauncher {
    fn spawn(&self, spec: &DaemonSpec) -> Result<ProcessHandle, SpawnError> {
        if self.fail_spawns.load(Ordering::SeqCst) {
            return Err(SpawnError::NotFound {
                program: spec.command.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        let pid = self.table.next_pid.fetch_add(1, Ordering::SeqCst);
        let mut cmd = vec![spec.command.clone()];
        cmd.extend(spec.args.iter().cloned());
        self.table.procs.lock().insert(
            pid,
            LiveProcess {
                pid,
                name: executable_stem(&spec.command).to_string(),
                exe: None,
                cmd,
                zombie: false,
            },
        );
        self.owners.lock().insert(pid, spec.name.clone());
        self.spawned.lock().push((spec.name.clone(), pid));

        Ok(ProcessHandle {
            pid,
            signature: CommandSignature::for_spec(spec),
        })
    }

    fn terminate(&self, pid: u32) -> warden::Result<()> {
        self.terminated.lock().push(pid);
        let owner = self.owners.lock().get(&pid).cloned();
        let stubborn = owner.is_some_and(|name| self.stubborn.lock().contains(&name));
        if !stubborn {
            self.table.kill(pid);
        }
        Ok(())
    }

    fn force_kill(&self, pid: u32) -> warden::Result<()> {
        self.force_killed.lock().push(pid);
        let owner = self.owners.lock().get(&pid).cloned();
        let unkillable = owner.is_some_and(|name| self.unkillable.lock().contains(&name));
        if !unkillable {
            self.table.kill(pid);
        }
        Ok(())
    }
}

/// Everything a supervisor test needs, wired to fakes.
pub struct Harness {
    pub table: Arc<ProcessTable>,
    pub launcher: Arc<FakeLauncher>,
    pub clock: ManualClock,
    pub supervisor: Arc<Supervisor>,
}

impl Harness {
    pub fn new(state_dir: &Path, specs: Vec<DaemonSpec>) -> Self {
        Self::with_policy(state_dir, specs, RestartPolicy::default())
    }

    pub fn with_policy(state_dir: &Path, specs: Vec<DaemonSpec>, policy: RestartPolicy) -> Self {
        let table = ProcessTable::new();
        let launcher = FakeLauncher::new(Arc::clone(&table));
        let clock = ManualClock::default();
        let supervisor = Supervisor::builder(Registry::new(specs).unwrap())
            .state_dir(state_dir)
            .restart_policy(policy)
            .launcher(launcher.clone())
            .inspector(Arc::new(FakeInspector(Arc::clone(&table))))
            .clock(Arc::new(clock.clone()))
            .grace_period(Duration::from_millis(300))
            .build()
            .unwrap();

        Self {
            table,
            launcher,
            clock,
            supervisor: Arc::new(supervisor),
        }
    }

    pub fn pid_of(&self, name: &str) -> Option<u32> {
        self.supervisor
            .pid_store()
            .load(name)
            .unwrap()
            .map(|record| record.pid)
    }
}

pub fn watcher() -> DaemonSpec {
    DaemonSpec::new("watcher", "/usr/bin/watcher")
        .with_args(["--poll"])
        .with_interval(Duration::from_secs(300))
}
