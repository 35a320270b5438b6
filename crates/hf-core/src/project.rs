//! Project discovery and loading

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::snapshot::{discover_snapshots, Snapshot};
use std::path::{Path, PathBuf};

/// Represents a histflow project
#[derive(Debug)]
pub struct Project {
    /// Project root directory
    pub root: PathBuf,

    /// Project configuration
    pub config: Config,

    /// Snapshot definitions, sorted by name
    pub snapshots: Vec<Snapshot>,
}

impl Project {
    /// Load a project from a directory
    pub fn load(root: &Path) -> CoreResult<Self> {
        if !root.is_dir() {
            return Err(CoreError::ProjectNotFound {
                path: root.display().to_string(),
            });
        }

        let config = Config::load_from_dir(root)?;
        let snapshots = discover_snapshots(root, &config.snapshot_paths)?;
        log::debug!(
            "Loaded project '{}' with {} snapshot definitions",
            config.name,
            snapshots.len()
        );

        Ok(Self {
            root: root.to_path_buf(),
            config,
            snapshots,
        })
    }

    /// Target directory for run artifacts
    pub fn target_dir(&self) -> PathBuf {
        self.config.target_path_absolute(&self.root)
    }

    /// Look up a snapshot by name
    pub fn snapshot(&self, name: &str) -> CoreResult<&Snapshot> {
        self.snapshots
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| CoreError::SnapshotNotFound {
                name: name.to_string(),
            })
    }

    /// Snapshots selected by a comma-separated name list (all when `None`).
    ///
    /// Unknown names are an error rather than silently skipped.
    pub fn select_snapshots(&self, names: Option<&str>) -> CoreResult<Vec<&Snapshot>> {
        match names {
            None => Ok(self.snapshots.iter().collect()),
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(|n| self.snapshot(n))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_project(root: &Path) {
        std::fs::write(root.join("histflow.yml"), "name: movielens\n").unwrap();
        let dir = root.join("snapshots");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("tags.yml"),
            r#"
snapshots:
  - name: snap_tags
    key_attributes: [tag_id]
    tracked_attributes: [tag]
    extract: full
  - name: snap_ratings
    key_attributes: [user_id, movie_id]
    tracked_attributes: [rating]
    extract: partial
"#,
        )
        .unwrap();
    }

    #[test]
    fn test_load_project() {
        let temp = TempDir::new().unwrap();
        write_project(temp.path());

        let project = Project::load(temp.path()).unwrap();
        assert_eq!(project.config.name, "movielens");
        assert_eq!(project.snapshots.len(), 2);
        assert_eq!(project.snapshots[0].name, "snap_ratings");
        assert_eq!(project.target_dir(), temp.path().join("target"));
    }

    #[test]
    fn test_select_snapshots() {
        let temp = TempDir::new().unwrap();
        write_project(temp.path());
        let project = Project::load(temp.path()).unwrap();

        assert_eq!(project.select_snapshots(None).unwrap().len(), 2);
        let picked = project.select_snapshots(Some(" snap_tags ,")).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "snap_tags");
        assert!(matches!(
            project.select_snapshots(Some("snap_tags,nope")),
            Err(CoreError::SnapshotNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_project_dir() {
        let err = Project::load(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, CoreError::ProjectNotFound { .. }));
    }
}
