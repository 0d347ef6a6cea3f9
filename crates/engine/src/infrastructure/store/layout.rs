//! On-disk layout of persisted state.
//!
//! ```text
//! experiences/<experience_id>/
//!   config                       experience configuration
//!   state/world                  shared-world snapshot
//!   state/world.template         initial-state template
//!   templates/items/<id>         template content
//!   templates/npcs/<id>
//!   templates/quests/<id>
//! players/<user_id>/<experience_id>/view
//! ```
//!
//! All files are UTF-8 JSON. Writes are atomic: write-to-temp + rename
//! within the same directory.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use waymark_domain::{ExperienceId, TemplateId, TemplateKind, UserId};

use super::StoreError;

/// Path schema rooted at the engine's data directory.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn experience_dir(&self, experience: &ExperienceId) -> PathBuf {
        self.root.join("experiences").join(experience.as_str())
    }

    pub fn config_path(&self, experience: &ExperienceId) -> PathBuf {
        self.experience_dir(experience).join("config")
    }

    pub fn world_path(&self, experience: &ExperienceId) -> PathBuf {
        self.experience_dir(experience).join("state").join("world")
    }

    pub fn world_template_path(&self, experience: &ExperienceId) -> PathBuf {
        self.experience_dir(experience)
            .join("state")
            .join("world.template")
    }

    pub fn template_path(
        &self,
        experience: &ExperienceId,
        kind: TemplateKind,
        template_id: &TemplateId,
    ) -> PathBuf {
        self.experience_dir(experience)
            .join("templates")
            .join(kind.dir_name())
            .join(template_id.as_str())
    }

    pub fn players_dir(&self) -> PathBuf {
        self.root.join("players")
    }

    pub fn view_path(&self, user: &UserId, experience: &ExperienceId) -> PathBuf {
        self.players_dir()
            .join(user.as_str())
            .join(experience.as_str())
            .join("view")
    }

    /// Side-car lock file for `path`. Locks never target the data file
    /// itself: the atomic rename on commit would swap the locked inode.
    pub fn lock_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        path.with_file_name(name)
    }
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

/// Read and parse a JSON file; `Ok(None)` when it does not exist.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StoreError::Io {
                path: path_str(path),
                source: e,
            })
        }
    };
    serde_json::from_slice(&bytes).map(Some).map_err(|e| StoreError::Corrupt {
        path: path_str(path),
        source: e,
    })
}

/// Serialize and atomically write a JSON file (temp + rename).
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |e: std::io::Error| StoreError::Io {
        path: path_str(path),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Corrupt {
        path: path_str(path),
        source: e,
    })?;

    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)
}
