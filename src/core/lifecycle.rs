/// Lifecycle controller
///
/// Quiesces projects before their data is archived and brings them back
/// afterwards. Every decision to restart is taken from the `RunOutcome`: a
/// project is restarted only if this same run stopped it.

use tracing::{debug, error, info, warn};

use crate::core::discovery::Project;
use crate::core::outcome::{ProjectState, RunOutcome};
use crate::core::platform::Platform;

pub struct LifecycleController<'a, P: Platform> {
    platform: &'a P,
}

impl<'a, P: Platform> LifecycleController<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }

    /// Stop a project's running services.
    ///
    /// Projects without a composition file or without running services are left
    /// alone. A failed stop is recorded and the project stays archive-only.
    pub async fn stop(&self, project: &Project, outcome: &mut RunOutcome) {
        outcome.track(&project.name);

        if project.compose_file.is_none() {
            return;
        }

        let running = match self.platform.running_services(&project.compose_project).await {
            Ok(count) => count,
            Err(e) => {
                warn!(project = %project.name, error = %format!("{:#}", e), "Could not query running services");
                outcome.set_state(&project.name, ProjectState::StopFailed);
                outcome.step_failed(&project.name, "stop", &e);
                return;
            }
        };

        if running == 0 {
            debug!(project = %project.name, "No running services, nothing to stop");
            return;
        }

        info!(project = %project.name, services = running, "Stopping services");
        match self.platform.compose_stop(project).await {
            Ok(()) => {
                outcome.mark_stopped(&project.name);
                outcome.step_ok(&project.name, "stop");
            }
            Err(e) => {
                error!(project = %project.name, error = %format!("{:#}", e), "Stop failed; archiving without restart");
                outcome.set_state(&project.name, ProjectState::StopFailed);
                outcome.step_failed(&project.name, "stop", &e);
            }
        }
    }

    /// Resume every project this run stopped. Failures are recorded, not raised.
    pub async fn restart_stopped(&self, projects: &[Project], outcome: &mut RunOutcome) {
        for name in outcome.awaiting_restart() {
            let Some(project) = projects.iter().find(|p| p.name == name) else {
                continue;
            };

            info!(project = %name, "Restarting services");
            match self.platform.compose_start(project).await {
                Ok(()) => {
                    outcome.set_state(&name, ProjectState::Restarted);
                    outcome.step_ok(&name, "restart");
                }
                Err(e) => {
                    error!(project = %name, error = %format!("{:#}", e), "Restart failed; manual intervention needed");
                    outcome.set_state(&name, ProjectState::RestartFailed);
                    outcome.step_failed(&name, "restart", &e);
                }
            }
        }
    }

    /// Best-effort restart of already-stopped projects when a run aborts
    pub async fn rollback(&self, projects: &[Project], outcome: &mut RunOutcome) {
        let pending = outcome.awaiting_restart();
        if pending.is_empty() {
            return;
        }

        warn!(projects = ?pending, "Run aborted, restarting projects stopped so far");
        self.restart_stopped(projects, outcome).await;
    }

    /// Bring up restored projects that have a composition file
    pub async fn start_restored(&self, projects: &[Project], outcome: &mut RunOutcome) {
        for project in projects {
            if project.compose_file.is_none() {
                outcome.warn(&project.name, "no composition file; not started");
                continue;
            }

            info!(project = %project.name, "Starting services");
            match self.platform.compose_up(project).await {
                Ok(()) => {
                    outcome.set_state(&project.name, ProjectState::Started);
                    outcome.step_ok(&project.name, "start");
                }
                Err(e) => {
                    error!(project = %project.name, error = %format!("{:#}", e), "Start failed");
                    outcome.set_state(&project.name, ProjectState::StartFailed);
                    outcome.step_failed(&project.name, "start", &e);
                }
            }
        }
    }
}
