/// Per-run outcome tracking and the final report
///
/// A `RunOutcome` is built fresh by every backup or restore run and handed back
/// to the caller. It is the only record of which projects this run stopped, so
/// it alone decides who gets restarted.

use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectState {
    NotAttempted,
    Stopped,
    StopFailed,
    Archived,
    ArchiveFailed,
    RestartFailed,
    Restarted,
    Restored,
    RestoreFailed,
    Started,
    StartFailed,
}

impl ProjectState {
    pub fn label(&self) -> &'static str {
        match self {
            ProjectState::NotAttempted => "not attempted",
            ProjectState::Stopped => "stopped",
            ProjectState::StopFailed => "stop failed",
            ProjectState::Archived => "archived",
            ProjectState::ArchiveFailed => "archive failed",
            ProjectState::RestartFailed => "restart failed",
            ProjectState::Restarted => "restarted",
            ProjectState::Restored => "restored",
            ProjectState::RestoreFailed => "restore failed",
            ProjectState::Started => "started",
            ProjectState::StartFailed => "start failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProjectState::StopFailed
                | ProjectState::ArchiveFailed
                | ProjectState::RestartFailed
                | ProjectState::RestoreFailed
                | ProjectState::StartFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub name: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectOutcome {
    pub state: ProjectState,
    /// Set only when this run's stop call succeeded
    pub stopped_by_run: bool,
    pub steps: Vec<Step>,
    pub warnings: Vec<String>,
}

impl Default for ProjectOutcome {
    fn default() -> Self {
        Self {
            state: ProjectState::NotAttempted,
            stopped_by_run: false,
            steps: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl ProjectOutcome {
    pub fn failures(&self) -> impl Iterator<Item = &Step> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
    }

    pub fn has_failures(&self) -> bool {
        self.state.is_failure() || self.failures().next().is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    projects: BTreeMap<String, ProjectOutcome>,
}

impl RunOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(&self, name: &str) -> Option<&ProjectOutcome> {
        self.projects.get(name)
    }

    pub fn projects(&self) -> impl Iterator<Item = (&String, &ProjectOutcome)> {
        self.projects.iter()
    }

    fn entry(&mut self, name: &str) -> &mut ProjectOutcome {
        self.projects.entry(name.to_string()).or_default()
    }

    /// Register a project as seen by this run
    pub fn track(&mut self, name: &str) {
        self.entry(name);
    }

    pub fn set_state(&mut self, name: &str, state: ProjectState) {
        self.entry(name).state = state;
    }

    pub fn mark_stopped(&mut self, name: &str) {
        let outcome = self.entry(name);
        outcome.state = ProjectState::Stopped;
        outcome.stopped_by_run = true;
    }

    /// Archiving finished. The project counts as archived only if its tree
    /// archive was written; a failed stop stays visible as the project's state.
    pub fn mark_archived(&mut self, name: &str) {
        let outcome = self.entry(name);
        if !matches!(outcome.state, ProjectState::NotAttempted | ProjectState::Stopped) {
            return;
        }

        let tree_ok = outcome
            .steps
            .iter()
            .any(|s| s.name == "tree" && s.status == StepStatus::Ok);
        outcome.state = if tree_ok {
            ProjectState::Archived
        } else {
            ProjectState::ArchiveFailed
        };
    }

    pub fn step_ok(&mut self, name: &str, step: impl Into<String>) {
        self.entry(name).steps.push(Step {
            name: step.into(),
            status: StepStatus::Ok,
        });
    }

    pub fn step_failed(&mut self, name: &str, step: impl Into<String>, error: &anyhow::Error) {
        self.entry(name).steps.push(Step {
            name: step.into(),
            status: StepStatus::Failed(format!("{:#}", error)),
        });
    }

    pub fn warn(&mut self, name: &str, warning: impl Into<String>) {
        self.entry(name).warnings.push(warning.into());
    }

    /// Projects this run stopped and has not yet tried to bring back, sorted
    pub fn awaiting_restart(&self) -> Vec<String> {
        self.projects
            .iter()
            .filter(|(_, o)| {
                o.stopped_by_run
                    && !matches!(o.state, ProjectState::Restarted | ProjectState::RestartFailed)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether any project recorded a failure
    pub fn is_degraded(&self) -> bool {
        self.projects.values().any(|o| o.has_failures())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Backup,
    Restore,
}

/// What a finished run hands back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub kind: RunKind,
    pub backup_set: PathBuf,
    pub outcome: RunOutcome,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_degraded(&self) -> bool {
        self.outcome.is_degraded()
    }

    /// Print the per-project summary operators use to spot partial failure
    pub fn print_summary(&self) {
        let title = match self.kind {
            RunKind::Backup => "Backup summary",
            RunKind::Restore => "Restore summary",
        };
        println!("\n{} ({})\n", title.bold(), self.backup_set.display());
        println!("{:<30} {:<16} {}", "Project", "State", "Steps");
        println!("{}", "-".repeat(70));

        for (name, outcome) in self.outcome.projects() {
            let total = outcome.steps.len();
            let failed = outcome.failures().count();
            let marker = if outcome.has_failures() {
                "✗".red()
            } else if outcome.state == ProjectState::NotAttempted && total == 0 {
                "–".dimmed()
            } else {
                "✓".green()
            };

            println!(
                "{} {:<28} {:<16} {}/{} ok",
                marker,
                name,
                outcome.state.label(),
                total - failed,
                total
            );

            for step in outcome.failures() {
                if let StepStatus::Failed(err) = &step.status {
                    println!("    {} {}: {}", "✗".red(), step.name, err);
                }
            }
            for warning in &outcome.warnings {
                println!("    {} {}", "!".yellow(), warning);
            }
        }

        let elapsed = humantime::format_duration(Duration::from_secs(self.elapsed.as_secs()));
        if self.is_degraded() {
            println!(
                "\n{} Completed with failures in {}; intervene on the projects marked ✗",
                "⚠".yellow(),
                elapsed
            );
        } else {
            println!("\n{} Completed in {}", "✓".green(), elapsed);
        }
    }
}
