//! Resolves the workspace `variables.env` entries for IDE run
//! configurations: every entry is printed as-is, and encrypted entries are
//! additionally printed decrypted under their suffix-stripped key.

use anyhow::Context;
use runner::CommandRunner;
use std::path::Path;
use std::sync::Arc;

pub(crate) fn resolve_entries(
    project: &gcloud::Project,
    entries: Vec<envfile::Entry>,
) -> anyhow::Result<Vec<(Arc<str>, Arc<str>)>> {
    let mut resolved = Vec::new();
    for entry in entries {
        resolved.push((entry.key.clone(), entry.value.clone()));
        if let Some(plain_key) = envfile::decrypted_key(entry.key.as_ref()) {
            let plaintext = project
                .decrypt_value(entry.value.as_ref())
                .with_context(|| format!("Failed to decrypt {}", entry.key))?;
            resolved.push((plain_key.into(), plaintext.into()));
        }
    }
    Ok(resolved)
}

pub fn run(runner: &dyn CommandRunner, root: &Path) -> anyhow::Result<()> {
    let workspace = ws::Workspace::load(root)?;
    let entries = envfile::read_entries(workspace.variables_file().as_path())?;
    let project = gcloud::Project::new(runner, workspace.project_id.as_ref());
    for (key, value) in resolve_entries(&project, entries)? {
        println!("{key}={value}");
    }
    Ok(())
}
