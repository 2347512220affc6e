/// Docker and Docker Compose integration
///
/// Volumes, container queries and the data mover go through the Docker Engine
/// API; project lifecycle goes through the `docker compose` CLI run from the
/// project directory.

use anyhow::{anyhow, bail, Context, Result};
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions};
use bollard::Docker;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::ffi::OsString;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::core::discovery::Project;
use crate::core::platform::Platform;
use crate::core::volume::MoverJob;
use crate::utils::{MOVER_NAME_PREFIX, PROJECT_LABEL, VOLUME_LABEL};

#[derive(Clone)]
pub struct DockerPlatform {
    docker: Docker,
    mover_image: String,
}

impl DockerPlatform {
    /// Create a platform handle. The daemon is not contacted until `ping`.
    pub fn new(mover_image: impl Into<String>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon. Is Docker running?")?;

        Ok(Self {
            docker,
            mover_image: mover_image.into(),
        })
    }

    /// Execute a docker compose command for one project
    async fn compose_command(&self, project: &Project, args: &[&str]) -> Result<String> {
        let output = Command::new("docker")
            .args(compose_args(project, args)?)
            .current_dir(&project.path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to execute docker compose command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("docker compose {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn label_filter(compose_project: &str) -> HashMap<String, Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}={}", PROJECT_LABEL, compose_project)],
        );
        filters
    }

    /// Pull the mover image unless it is already present
    async fn ensure_mover_image(&self) -> Result<()> {
        if self.docker.inspect_image(&self.mover_image).await.is_ok() {
            return Ok(());
        }

        info!(image = %self.mover_image, "Pulling data mover image");
        let (from_image, tag) = split_image(&self.mover_image);
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image,
                    tag,
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .with_context(|| format!("Failed to pull image {}", self.mover_image))?;

        Ok(())
    }

    async fn start_and_wait(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start data mover")?;

        let mut wait = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        while let Some(result) = wait.next().await {
            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    let logs = self.tail_logs(id).await;
                    return Err(anyhow!(e).context(format!("Data mover failed: {}", logs)));
                }
            };

            if response.status_code != 0 {
                let logs = self.tail_logs(id).await;
                bail!(
                    "Data mover exited with status {}: {}",
                    response.status_code,
                    logs
                );
            }
        }

        Ok(())
    }

    /// Last lines of a container's output, for error messages
    async fn tail_logs(&self, id: &str) -> String {
        let lines: Vec<String> = self
            .docker
            .logs(
                id,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    tail: "20".to_string(),
                    ..Default::default()
                }),
            )
            .filter_map(|line| async move { line.ok().map(|l| l.to_string()) })
            .collect()
            .await;

        lines.concat().trim().to_string()
    }
}

/// Arguments to `docker` for a compose subcommand. An explicit `-f` disables
/// Compose's own override lookup, so the override file is passed as well.
fn compose_args(project: &Project, args: &[&str]) -> Result<Vec<OsString>> {
    let compose_file = project
        .compose_file
        .as_deref()
        .ok_or_else(|| anyhow!("{} has no composition file", project.name))?;

    let mut command: Vec<OsString> = vec![
        "compose".into(),
        "--project-directory".into(),
        project.path.clone().into(),
        "-f".into(),
        compose_file.into(),
    ];
    if let Some(override_file) = &project.override_file {
        command.push("-f".into());
        command.push(override_file.into());
    }
    command.extend(args.iter().map(OsString::from));

    Ok(command)
}

/// Split `image[:tag]` into name and tag, defaulting the tag to `latest`
fn split_image(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (image, "latest"),
    }
}

impl Platform for DockerPlatform {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .context("Docker daemon did not answer ping")?;
        Ok(())
    }

    async fn project_volumes(&self, compose_project: &str) -> Result<Vec<String>> {
        let response = self
            .docker
            .list_volumes(Some(ListVolumesOptions {
                filters: Self::label_filter(compose_project),
            }))
            .await
            .context("Failed to list volumes")?;

        let mut names: Vec<String> = response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn running_services(&self, compose_project: &str) -> Result<usize> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: false,
                filters: Self::label_filter(compose_project),
                ..Default::default()
            }))
            .await
            .context("Failed to list containers")?;

        Ok(containers.len())
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(anyhow!(e).context(format!("Failed to inspect volume {}", name))),
        }
    }

    async fn create_volume(&self, name: &str, compose_project: &str) -> Result<()> {
        let local_name = name
            .strip_prefix(&format!("{}_", compose_project))
            .unwrap_or(name);

        let mut labels = HashMap::new();
        labels.insert(PROJECT_LABEL, compose_project);
        labels.insert(VOLUME_LABEL, local_name);

        self.docker
            .create_volume(CreateVolumeOptions {
                name,
                driver: "local",
                driver_opts: HashMap::new(),
                labels,
            })
            .await
            .with_context(|| format!("Failed to create volume {}", name))?;

        Ok(())
    }

    async fn compose_stop(&self, project: &Project) -> Result<()> {
        self.compose_command(project, &["stop"]).await?;
        Ok(())
    }

    async fn compose_start(&self, project: &Project) -> Result<()> {
        self.compose_command(project, &["start"]).await?;
        Ok(())
    }

    async fn compose_up(&self, project: &Project) -> Result<()> {
        self.compose_command(project, &["up", "-d"]).await?;
        Ok(())
    }

    async fn run_mover(&self, job: &MoverJob) -> Result<()> {
        self.ensure_mover_image().await?;

        let name = format!(
            "{}{}-{}",
            MOVER_NAME_PREFIX,
            job.volume,
            chrono::Utc::now().timestamp_millis()
        );

        let config = Config {
            image: Some(self.mover_image.clone()),
            cmd: Some(job.command()),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                binds: Some(job.binds()),
                network_mode: Some("none".to_string()),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .context("Failed to create data mover container")?;

        debug!(container = %name, volume = %job.volume, direction = ?job.direction, "Data mover created");
        let result = self.start_and_wait(&created.id).await;

        // The mover is disposable whatever happened inside it
        if let Err(e) = self
            .docker
            .remove_container(
                &created.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            debug!(container = %name, error = %e, "Failed to remove data mover");
        }

        result
    }
}
