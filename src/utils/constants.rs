/// Fixed names and layout conventions shared by backup and restore

/// Composition file basenames, checked in this order. The first one present wins.
pub const COMPOSE_FILE_CANDIDATES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Override files Compose merges by default, checked in this order
pub const COMPOSE_OVERRIDE_CANDIDATES: &[&str] = &[
    "docker-compose.override.yml",
    "docker-compose.override.yaml",
    "compose.override.yml",
    "compose.override.yaml",
];

/// Basename every restored composition file is written under
pub const CANONICAL_COMPOSE_FILE: &str = "docker-compose.yml";

/// Environment file looked up at each project root
pub const ENV_FILE_NAME: &str = ".env";

/// Label Compose puts on every container and volume it owns
pub const PROJECT_LABEL: &str = "com.docker.compose.project";

/// Label Compose uses for a volume's local (unprefixed) name
pub const VOLUME_LABEL: &str = "com.docker.compose.volume";

/// Variable in `.env` that overrides the Compose project name
pub const PROJECT_NAME_VAR: &str = "COMPOSE_PROJECT_NAME";

// Backup set layout
pub const BACKUP_PREFIX: &str = "docker-backup-";
pub const BACKUP_ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub const PROJECTS_DIR: &str = "projects";
pub const COMPOSE_DIR: &str = "compose";
pub const VOLUMES_DIR: &str = "volumes";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: u32 = 1;

// Artifact naming
pub const TREE_ARCHIVE_SUFFIX: &str = "-project.tar.gz";
pub const ENV_ARTIFACT_SUFFIX: &str = "-env.env";
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

// Data mover
pub const DEFAULT_MOVER_IMAGE: &str = "alpine:3.20";
pub const MOVER_VOLUME_MOUNT: &str = "/volume";
pub const MOVER_ARCHIVE_MOUNT: &str = "/backup";
pub const MOVER_NAME_PREFIX: &str = "stackvault-mover-";

// Default roots when neither flags, environment nor config file set them
pub const DEFAULT_SOURCE_ROOT: &str = "/opt/stacks";
pub const DEFAULT_BACKUP_ROOT: &str = "/opt/backups";
pub const DEFAULT_RESTORE_ROOT: &str = "/opt/stacks";
