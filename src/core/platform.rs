/// Container platform seam
///
/// Everything the engine asks of Docker goes through this trait so the
/// orchestration can be exercised against a fake in tests.

use anyhow::Result;

use crate::core::discovery::Project;
use crate::core::volume::MoverJob;

#[allow(async_fn_in_trait)]
pub trait Platform {
    /// Fails when the daemon cannot be reached
    async fn ping(&self) -> Result<()>;

    /// Names of volumes labelled as owned by a Compose project, sorted
    async fn project_volumes(&self, compose_project: &str) -> Result<Vec<String>>;

    /// Number of running containers labelled as belonging to a Compose project
    async fn running_services(&self, compose_project: &str) -> Result<usize>;

    async fn volume_exists(&self, name: &str) -> Result<bool>;

    /// Create a volume labelled so Compose adopts it
    async fn create_volume(&self, name: &str, compose_project: &str) -> Result<()>;

    /// `docker compose stop`
    async fn compose_stop(&self, project: &Project) -> Result<()>;

    /// `docker compose start`, resuming previously stopped services
    async fn compose_start(&self, project: &Project) -> Result<()>;

    /// `docker compose up -d`
    async fn compose_up(&self, project: &Project) -> Result<()>;

    /// Run one disposable data mover container to completion
    async fn run_mover(&self, job: &MoverJob) -> Result<()>;
}
