//! The provisioning sequence: a linear, single-shot run of idempotent
//! resource creations plus the materialization of the configuration
//! directory from the template directory.

use crate::prompt;
use anyhow::Context;
use runner::CommandRunner;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Template subtree that is skipped when the operator does not configure a
/// notification webhook.
pub const NOTIFICATIONS_DIR_NAME: &str = "notifications";

/// Only these file types carry placeholders; everything else is copied
/// byte for byte.
const SUBSTITUTED_EXTENSIONS: &[&str] = &["yaml", "env"];

#[derive(Debug, Clone)]
pub struct Options {
    pub workspace: PathBuf,
    pub project_id: Arc<str>,
    pub template_dir: PathBuf,
    pub is_recreate: bool,
}

pub fn run(runner: &dyn CommandRunner, options: &Options) -> anyhow::Result<()> {
    let config_dir = check_if_config_exists(options)?;

    if !options.template_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Template directory {} is missing.",
            options.template_dir.display()
        ));
    }

    let is_confirmed = prompt::confirm(
        format!(
            "\nBootstrapping project '{}'.\n\n\
             NOTE! This is a destructive operation if you already \
             bootstrapped it before.\n\nAre you sure (y/n)?: ",
            options.project_id
        )
        .as_str(),
    )?;
    if !is_confirmed {
        return Err(anyhow::anyhow!("Aborted by operator"));
    }

    clear_config_dir(config_dir.as_path())?;

    std::fs::create_dir_all(options.workspace.as_path()).with_context(|| {
        format!(
            "Failed to create workspace directory {}",
            options.workspace.display()
        )
    })?;
    let project_id_file = options.workspace.join(ws::PROJECT_ID_FILE_NAME);
    std::fs::write(
        project_id_file.as_path(),
        format!("{}\n", options.project_id),
    )
    .with_context(|| format!("Failed to write {}", project_id_file.display()))?;

    let project = gcloud::Project::new(runner, options.project_id.as_ref());
    project.enable_service("cloudkms.googleapis.com")?;
    project.enable_service("cloudbuild.googleapis.com")?;
    project.create_keyring_and_key()?;

    let mut variables = template::Variables::new();
    variables.insert("GCP_PROJECT_ID", options.project_id.as_ref());

    let password = prompt::ask("Password to use for the Postgres and MySQL databases: ")?;
    let encrypted_password = project
        .encrypt_value(password.as_str())
        .context("Failed to encrypt the database password")?;
    variables.insert("ENCRYPTED_PASSWORD", encrypted_password.as_ref());

    let postgres_ip = prompt::ask("IP of the Postgres database: ")?;
    variables.insert("POSTGRES_IP", postgres_ip.as_str());
    let mysql_ip = prompt::ask("IP of the MySQL database: ")?;
    variables.insert("MYSQL_IP", mysql_ip.as_str());
    let github_organization = prompt::ask("Your GitHub user/organization name: ")?;
    variables.insert("GITHUB_ORGANIZATION", github_organization.as_str());

    let notification_hook = prompt::ask(
        "Webhook to post build status notifications to \
         (ENTER skips notifications): ",
    )?;
    let is_notifications = !notification_hook.is_empty();
    if is_notifications {
        variables.insert("NOTIFICATION_HOOK", notification_hook.as_str());
    }

    materialize(
        options.template_dir.as_path(),
        config_dir.as_path(),
        &variables,
        is_notifications,
    )
    .context("Failed to materialize the configuration directory")?;

    let keys_dir = config_dir.join(ws::KEYS_DIR_NAME);
    std::fs::create_dir_all(keys_dir.as_path())
        .with_context(|| format!("Failed to create keys directory {}", keys_dir.display()))?;

    println!();
    println!("Creating all service accounts ...");
    println!();
    for account in gcloud::builtin_service_accounts() {
        project.create_service_account(&account, keys_dir.as_path(), options.is_recreate)?;
    }

    println!();
    println!("Creating buckets ...");
    println!();
    for bucket in gcloud::builtin_buckets() {
        project.create_bucket(&bucket, options.is_recreate)?;
    }

    project.create_source_repository(ws::CONFIG_DIR_NAME)?;
    git::push_initial_commit(
        runner,
        config_dir.to_string_lossy().as_ref(),
        options.project_id.as_ref(),
        ws::CONFIG_DIR_NAME,
    )?;

    Ok(())
}

fn check_if_config_exists(options: &Options) -> anyhow::Result<PathBuf> {
    let config_dir = options.workspace.join(ws::CONFIG_DIR_NAME);
    if config_dir.is_dir() && !options.is_recreate {
        return Err(anyhow::anyhow!(
            "Configuration directory {} already exists. Remove it or pass \
             --recreate to bootstrap from scratch.",
            config_dir.display()
        ));
    }
    Ok(config_dir)
}

/// Recreating materializes from scratch: files that are no longer in the
/// template must not survive and flag drift later.
fn clear_config_dir(config_dir: &Path) -> anyhow::Result<()> {
    if config_dir.is_dir() {
        std::fs::remove_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to remove existing configuration directory {}",
                config_dir.display()
            )
        })?;
    }
    Ok(())
}

fn is_substituted(path: &Path) -> bool {
    path.extension()
        .and_then(std::ffi::OsStr::to_str)
        .is_some_and(|extension| SUBSTITUTED_EXTENSIONS.contains(&extension))
}

/// Copies the template tree to the destination, stripping the `TEMPLATE-`
/// filename prefix and expanding placeholders in substituted file types.
pub(crate) fn materialize(
    template_dir: &Path,
    destination: &Path,
    variables: &template::Variables,
    is_notifications: bool,
) -> anyhow::Result<()> {
    for entry in walkdir::WalkDir::new(template_dir) {
        let entry = entry.context("Failed to walk the template directory")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative_path = entry
            .path()
            .strip_prefix(template_dir)
            .context("Internal error: path not prefixed by template directory")?;
        if !is_notifications && relative_path.starts_with(NOTIFICATIONS_DIR_NAME) {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        let destination_name = file_name
            .strip_prefix(ws::TEMPLATE_PREFIX)
            .unwrap_or(file_name.as_str());
        let destination_path = destination.join(relative_path).with_file_name(destination_name);

        if let Some(parent) = destination_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        if is_substituted(destination_path.as_path()) {
            let content = variables.substitute_file(entry.path())?;
            std::fs::write(destination_path.as_path(), content).with_context(|| {
                format!("Failed to write {}", destination_path.display())
            })?;
        } else {
            std::fs::copy(entry.path(), destination_path.as_path()).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    destination_path.display()
                )
            })?;
        }
    }
    Ok(())
}
