/// In-memory platform used by the orchestration tests
///
/// Volumes are plain directories under a tempdir and the data mover runs the
/// real archive transport against them, so byte-for-byte round trips can be
/// asserted without a Docker daemon.

use anyhow::{anyhow, bail, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use crate::core::archive;
use crate::core::discovery::Project;
use crate::core::platform::Platform;
use crate::core::volume::{Direction, MoverJob};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Stop(String),
    Start(String),
    Up(String),
    CreateVolume(String),
    Export(String),
    Import(String),
}

#[derive(Default)]
struct FakeState {
    pings: usize,
    unreachable_after: Option<usize>,
    /// volume name -> owning compose project
    volumes: BTreeMap<String, String>,
    /// compose project -> running containers; projects not listed run one
    running: BTreeMap<String, usize>,
    fail_stop: HashSet<String>,
    fail_start: HashSet<String>,
    fail_export: HashSet<String>,
    fail_import: HashSet<String>,
    vanish_on_stop: HashSet<String>,
    stop_hooks: BTreeMap<String, Box<dyn Fn()>>,
    calls: Vec<Call>,
}

pub struct FakePlatform {
    root: TempDir,
    state: RefCell<FakeState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("tempdir"),
            state: RefCell::new(FakeState::default()),
        }
    }

    fn volume_dir(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    pub fn add_volume(&self, compose_project: &str, name: &str, files: &[(&str, &[u8])]) {
        let dir = self.volume_dir(name);
        fs::create_dir_all(&dir).unwrap();
        for (path, content) in files {
            let path = dir.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        self.state
            .borrow_mut()
            .volumes
            .insert(name.to_string(), compose_project.to_string());
    }

    pub fn volume_file(&self, name: &str, path: &str) -> Option<Vec<u8>> {
        fs::read(self.volume_dir(name).join(path)).ok()
    }

    pub fn volume_label(&self, name: &str) -> Option<String> {
        self.state.borrow().volumes.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn set_running(&self, compose_project: &str, count: usize) {
        self.state
            .borrow_mut()
            .running
            .insert(compose_project.to_string(), count);
    }

    /// Pings beyond `count` fail
    pub fn unreachable_after(&self, count: usize) {
        self.state.borrow_mut().unreachable_after = Some(count);
    }

    pub fn fail_stop(&self, project: &str) {
        self.state.borrow_mut().fail_stop.insert(project.to_string());
    }

    pub fn fail_start(&self, project: &str) {
        self.state.borrow_mut().fail_start.insert(project.to_string());
    }

    pub fn fail_export(&self, volume: &str) {
        self.state.borrow_mut().fail_export.insert(volume.to_string());
    }

    pub fn fail_import(&self, volume: &str) {
        self.state.borrow_mut().fail_import.insert(volume.to_string());
    }

    /// Delete the project's directory when it is stopped, so its tree archive fails
    pub fn vanish_on_stop(&self, project: &str) {
        self.state.borrow_mut().vanish_on_stop.insert(project.to_string());
    }

    /// Run `hook` right after the project is stopped
    pub fn on_stop(&self, project: &str, hook: impl Fn() + 'static) {
        self.state
            .borrow_mut()
            .stop_hooks
            .insert(project.to_string(), Box::new(hook));
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl Platform for FakePlatform {
    async fn ping(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.pings += 1;
        match state.unreachable_after {
            Some(limit) if state.pings > limit => Err(anyhow!("connection refused")),
            _ => Ok(()),
        }
    }

    async fn project_volumes(&self, compose_project: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .borrow()
            .volumes
            .iter()
            .filter(|(_, owner)| owner.as_str() == compose_project)
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn running_services(&self, compose_project: &str) -> Result<usize> {
        Ok(*self.state.borrow().running.get(compose_project).unwrap_or(&1))
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.borrow().volumes.contains_key(name))
    }

    async fn create_volume(&self, name: &str, compose_project: &str) -> Result<()> {
        self.record(Call::CreateVolume(name.to_string()));
        self.add_volume(compose_project, name, &[]);
        Ok(())
    }

    async fn compose_stop(&self, project: &Project) -> Result<()> {
        self.record(Call::Stop(project.name.clone()));
        let state = self.state.borrow();
        if state.fail_stop.contains(&project.name) {
            bail!("stop of {} timed out", project.name);
        }
        if state.vanish_on_stop.contains(&project.name) {
            fs::remove_dir_all(&project.path)?;
        }
        if let Some(hook) = state.stop_hooks.get(&project.name) {
            hook();
        }
        Ok(())
    }

    async fn compose_start(&self, project: &Project) -> Result<()> {
        self.record(Call::Start(project.name.clone()));
        if self.state.borrow().fail_start.contains(&project.name) {
            bail!("start of {} failed", project.name);
        }
        Ok(())
    }

    async fn compose_up(&self, project: &Project) -> Result<()> {
        self.record(Call::Up(project.name.clone()));
        if self.state.borrow().fail_start.contains(&project.name) {
            bail!("up of {} failed", project.name);
        }
        Ok(())
    }

    async fn run_mover(&self, job: &MoverJob) -> Result<()> {
        let volume_dir = self.volume_dir(&job.volume);

        match job.direction {
            Direction::Export => {
                self.record(Call::Export(job.volume.clone()));
                if self.state.borrow().fail_export.contains(&job.volume) {
                    bail!("mover exited with status 1");
                }
                archive::pack_contents(&volume_dir, &job.archive_path())?;
            }
            Direction::Import => {
                self.record(Call::Import(job.volume.clone()));
                if self.state.borrow().fail_import.contains(&job.volume) {
                    bail!("mover exited with status 2");
                }
                archive::unpack(&job.archive_path(), &volume_dir)?;
            }
        }

        Ok(())
    }
}
