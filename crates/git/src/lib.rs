//! Version-control CLI wrapper used to push the materialized configuration
//! directory to its cloud source repository.

use runner::{CommandRunner, ExecuteOptions};
use std::sync::Arc;

pub const CREDENTIAL_HELPER_KEY: &str =
    "credential.https://source.developers.google.com.helper";
pub const CREDENTIAL_HELPER: &str = "gcloud.sh";
pub const REMOTE_NAME: &str = "google";

pub fn source_repo_url(project_id: &str, repo_name: &str) -> Arc<str> {
    format!("https://source.developers.google.com/p/{project_id}/r/{repo_name}").into()
}

/// A working tree addressed through the runner port. Commands run in the
/// repository directory and are fire-and-forget: a non-zero exit is logged
/// and tolerated (re-running the bootstrap hits `git init` on an existing
/// repository, remotes that already exist, and so on).
pub struct Repository<'a> {
    runner: &'a dyn CommandRunner,
    pub full_path: Arc<str>,
}

impl<'a> Repository<'a> {
    pub fn new(runner: &'a dyn CommandRunner, full_path: &str) -> Self {
        Self {
            runner,
            full_path: full_path.into(),
        }
    }

    pub fn execute(&self, arguments: Vec<Arc<str>>) -> anyhow::Result<()> {
        let mut options = ExecuteOptions {
            arguments,
            working_directory: Some(self.full_path.clone()),
            ..Default::default()
        };
        options
            .environment
            .push(("GIT_TERMINAL_PROMPT".into(), "0".into()));

        let full_command = options.get_full_command("git");
        tracing::debug!("{full_command}");
        let output = self.runner.run("git", options)?;
        if !output.is_success {
            tracing::warn!(
                "`{full_command}` exited with status {:?}: {}",
                output.code,
                String::from_utf8_lossy(output.stderr.as_slice()).trim()
            );
        }
        Ok(())
    }

    pub fn configure_credential_helper(&self) -> anyhow::Result<()> {
        self.execute(vec![
            "config".into(),
            "--global".into(),
            CREDENTIAL_HELPER_KEY.into(),
            CREDENTIAL_HELPER.into(),
        ])
    }

    pub fn init(&self) -> anyhow::Result<()> {
        self.execute(vec!["init".into()])
    }

    pub fn add_remote(&self, name: &str, url: &str) -> anyhow::Result<()> {
        self.execute(vec![
            "remote".into(),
            "add".into(),
            name.into(),
            url.into(),
        ])
    }

    pub fn add_all(&self) -> anyhow::Result<()> {
        self.execute(vec!["add".into(), ".".into()])
    }

    pub fn commit(&self, message: &str) -> anyhow::Result<()> {
        self.execute(vec!["commit".into(), "-m".into(), message.into()])
    }

    pub fn push_all(&self, remote: &str) -> anyhow::Result<()> {
        self.execute(vec!["push".into(), "--all".into(), remote.into()])
    }
}

/// Creates the source repository remote and pushes the initial commit of
/// the materialized configuration directory.
pub fn push_initial_commit(
    runner: &dyn CommandRunner,
    directory: &str,
    project_id: &str,
    repo_name: &str,
) -> anyhow::Result<()> {
    let repository = Repository::new(runner, directory);
    repository.configure_credential_helper()?;
    repository.init()?;
    repository.add_remote(REMOTE_NAME, source_repo_url(project_id, repo_name).as_ref())?;
    repository.add_all()?;
    repository.commit("Initial commit of bootstrapped repository")?;
    repository.push_all(REMOTE_NAME)?;
    Ok(())
}
