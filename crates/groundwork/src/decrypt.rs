//! Decrypts all encrypted variables from the process environment.

use anyhow::Context;
use runner::CommandRunner;
use std::sync::Arc;

/// Every `*_ENCRYPTED` variable is base64 ciphertext; the plaintext lands
/// under the suffix-stripped key.
pub(crate) fn decrypt_environment(
    project: &gcloud::Project,
    environment: impl Iterator<Item = (String, String)>,
) -> anyhow::Result<Vec<(Arc<str>, Arc<str>)>> {
    let mut decrypted = Vec::new();
    for (key, value) in environment {
        if envfile::is_encrypted_key(key.as_str()) {
            let plain_key = envfile::decrypted_key(key.as_str()).unwrap_or(key.as_str());
            let plaintext = project
                .decrypt_value(value.as_str())
                .with_context(|| format!("Failed to decrypt {key}"))?;
            decrypted.push((plain_key.into(), plaintext.into()));
        }
    }
    Ok(decrypted)
}

pub fn run(runner: &dyn CommandRunner, project_id: &str) -> anyhow::Result<()> {
    let project = gcloud::Project::new(runner, project_id);
    for (key, value) in decrypt_environment(&project, std::env::vars())? {
        println!("{key}={value}");
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use base64::Engine;
    use runner::{FakeRunner, Output};

    #[test]
    fn test_only_encrypted_variables_are_decrypted() {
        let fake = FakeRunner::new();
        fake.on(&["gcloud", "kms", "decrypt"], |invocation| {
            Output::success(invocation.stdin.clone().unwrap_or_default())
        });
        let project = gcloud::Project::new(&fake, "my-project");

        let ciphertext = base64::engine::general_purpose::STANDARD.encode("hunter2");
        let environment = vec![
            ("PASSWORD_ENCRYPTED".to_string(), ciphertext),
            ("PLAIN".to_string(), "visible".to_string()),
        ];

        let decrypted = decrypt_environment(&project, environment.into_iter()).unwrap();
        assert_eq!(decrypted.len(), 1);
        assert_eq!(decrypted[0].0.as_ref(), "PASSWORD");
        assert_eq!(decrypted[0].1.as_ref(), "hunter2");
    }
}
