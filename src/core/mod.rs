pub mod archive;
pub mod backup;
pub mod discovery;
pub mod docker;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod outcome;
pub mod platform;
pub mod restore;
pub mod selector;
pub mod volume;

#[cfg(test)]
pub mod testing;

pub use backup::BackupManager;
pub use discovery::Project;
pub use docker::DockerPlatform;
pub use error::{RunError, RunResult};
pub use manifest::BackupManifest;
pub use outcome::{RunOutcome, RunReport};
pub use platform::Platform;
pub use restore::RestoreManager;
pub use selector::{list_backups, select_backup, BackupSet};
