//! Workspace layout resolution.
//!
//! A groundwork root directory holds a `.workspace` pointer file naming the
//! active workspace under `workspaces/`. Each workspace carries a
//! `.project_id` file and a materialized `groundwork-config` directory with
//! a `keys/` subdirectory and a `variables.env` file.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const WORKSPACE_FILE_NAME: &str = ".workspace";
pub const PROJECT_ID_FILE_NAME: &str = ".project_id";
pub const WORKSPACES_DIR_NAME: &str = "workspaces";
pub const CONFIG_DIR_NAME: &str = "groundwork-config";
pub const KEYS_DIR_NAME: &str = "keys";
pub const VARIABLES_FILE_NAME: &str = "variables.env";

/// Files in the template directory carry this filename prefix. It is
/// stripped during materialization and re-added when locating a template
/// counterpart during drift comparison.
pub const TEMPLATE_PREFIX: &str = "TEMPLATE-";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workspace {
    pub root: PathBuf,
    pub name: Arc<str>,
    pub project_id: Arc<str>,
}

fn read_first_line(path: &Path, missing_hint: &str) -> anyhow::Result<Arc<str>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("{missing_hint} The file {} is missing.", path.display()))?;
    let line = content.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return Err(anyhow::anyhow!("The file {} is empty.", path.display()));
    }
    Ok(line.into())
}

impl Workspace {
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let name = read_first_line(
            root.join(WORKSPACE_FILE_NAME).as_path(),
            "Select a workspace by running `groundwork bootstrap` first!",
        )?;

        let mut workspace = Self {
            root: root.to_path_buf(),
            name,
            project_id: "".into(),
        };

        workspace.project_id = read_first_line(
            workspace
                .workspace_dir()
                .join(PROJECT_ID_FILE_NAME)
                .as_path(),
            "Select a project by running `groundwork bootstrap` first!",
        )?;

        if !workspace.config_dir().is_dir() {
            return Err(anyhow::anyhow!(
                "{} is not a configuration directory.",
                workspace.config_dir().display()
            ));
        }
        if !workspace.keys_dir().is_dir() {
            return Err(anyhow::anyhow!(
                "{} is not a keys directory.",
                workspace.keys_dir().display()
            ));
        }

        Ok(workspace)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join(WORKSPACES_DIR_NAME).join(self.name.as_ref())
    }

    pub fn config_dir(&self) -> PathBuf {
        self.workspace_dir().join(CONFIG_DIR_NAME)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.config_dir().join(KEYS_DIR_NAME)
    }

    pub fn variables_file(&self) -> PathBuf {
        self.config_dir().join(VARIABLES_FILE_NAME)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn create_workspace_tree(root: &Path) {
        std::fs::write(root.join(WORKSPACE_FILE_NAME), "dev\n").unwrap();
        let workspace_dir = root.join(WORKSPACES_DIR_NAME).join("dev");
        let config_dir = workspace_dir.join(CONFIG_DIR_NAME);
        std::fs::create_dir_all(config_dir.join(KEYS_DIR_NAME)).unwrap();
        std::fs::write(workspace_dir.join(PROJECT_ID_FILE_NAME), "my-project\n").unwrap();
        std::fs::write(config_dir.join(VARIABLES_FILE_NAME), "").unwrap();
    }

    #[test]
    fn test_load_resolves_paths() {
        let root = tempfile::tempdir().unwrap();
        create_workspace_tree(root.path());

        let workspace = Workspace::load(root.path()).unwrap();
        assert_eq!(workspace.name.as_ref(), "dev");
        assert_eq!(workspace.project_id.as_ref(), "my-project");
        assert!(workspace
            .variables_file()
            .ends_with(PathBuf::from(CONFIG_DIR_NAME).join(VARIABLES_FILE_NAME)));
    }

    #[test]
    fn test_missing_workspace_file_is_descriptive() {
        let root = tempfile::tempdir().unwrap();
        let error = Workspace::load(root.path()).unwrap_err();
        assert!(format!("{error:#}").contains(".workspace"));
    }

    #[test]
    fn test_missing_project_id_is_descriptive() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join(WORKSPACE_FILE_NAME), "dev\n").unwrap();
        let error = Workspace::load(root.path()).unwrap_err();
        assert!(format!("{error:#}").contains(PROJECT_ID_FILE_NAME));
    }
}
