//! Wrappers around the `gcloud` and `gsutil` command line tools.
//!
//! All calls go through the [`runner::CommandRunner`] port. Output is
//! parsed minimally: existence checks use the exit status, keyring listing
//! uses the JSON array length. Resource creation is idempotent: existence
//! is checked first and creation is skipped unless the recreate flag asks
//! for delete-then-create. There is no retry and no rollback; a failure
//! partway leaves the project partially provisioned and is fixed by
//! re-running.

use anyhow::Context;
use base64::Engine;
use runner::{CommandRunner, ExecuteOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const KEYRING: &str = "groundwork";
pub const CRYPTO_KEY: &str = "service-accounts-crypto-key";
pub const KMS_LOCATION: &str = "global";

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Static description of one automation identity. The built-in list is
/// never mutated at run time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceAccount {
    /// Name of the key file written under the workspace `keys/` directory.
    pub keyfile: Arc<str>,
    pub account_name: Arc<str>,
    pub display_name: Arc<str>,
    pub roles: Vec<Arc<str>>,
    /// APIs enabled before the roles are bound.
    pub services: Vec<Arc<str>>,
    /// Whether the platform default account must grant this account
    /// impersonation rights.
    pub is_default_account_impersonation: bool,
}

impl ServiceAccount {
    pub fn email(&self, project_id: &str) -> Arc<str> {
        format!("{}@{}.iam.gserviceaccount.com", self.account_name, project_id).into()
    }
}

pub fn builtin_service_accounts() -> Vec<ServiceAccount> {
    vec![
        ServiceAccount {
            keyfile: "gcp_bigtable.json".into(),
            account_name: "gcp-bigtable-account".into(),
            display_name: "Bigtable account".into(),
            roles: vec!["roles/bigtable.admin".into()],
            services: vec!["bigtable.googleapis.com".into()],
            is_default_account_impersonation: false,
        },
        ServiceAccount {
            keyfile: "gcp_cloudsql.json".into(),
            account_name: "gcp-cloudsql-account".into(),
            display_name: "CloudSQL account".into(),
            roles: vec!["roles/cloudsql.admin".into()],
            services: vec![
                "sqladmin.googleapis.com".into(),
                "sql-component.googleapis.com".into(),
            ],
            is_default_account_impersonation: false,
        },
        ServiceAccount {
            keyfile: "gcp_compute.json".into(),
            account_name: "gcp-compute-account".into(),
            display_name: "Compute account".into(),
            roles: vec![
                "roles/compute.instanceAdmin".into(),
                "roles/compute.instanceAdmin.v1".into(),
                "roles/iam.serviceAccountUser".into(),
            ],
            services: vec!["compute.googleapis.com".into()],
            is_default_account_impersonation: false,
        },
        ServiceAccount {
            keyfile: "gcp_function.json".into(),
            account_name: "gcp-function-account".into(),
            display_name: "Cloud Function account".into(),
            roles: vec![
                "roles/source.reader".into(),
                "roles/cloudfunctions.developer".into(),
            ],
            services: vec!["cloudfunctions.googleapis.com".into()],
            is_default_account_impersonation: true,
        },
        ServiceAccount {
            keyfile: "gcp_spanner.json".into(),
            account_name: "gcp-spanner-account".into(),
            display_name: "Cloud Spanner account".into(),
            roles: vec!["roles/spanner.admin".into()],
            services: vec!["spanner.googleapis.com".into()],
            is_default_account_impersonation: false,
        },
    ]
}

/// Static description of one storage bucket. The full bucket name is
/// `<project-id>-<suffix>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bucket {
    pub suffix: Arc<str>,
    pub display_name: Arc<str>,
}

pub fn builtin_buckets() -> Vec<Bucket> {
    vec![
        Bucket {
            suffix: "build-logs".into(),
            display_name: "Build logs".into(),
        },
        Bucket {
            suffix: "test-data".into(),
            display_name: "Test data".into(),
        },
    ]
}

/// One cloud project, addressed through the runner port.
pub struct Project<'a> {
    runner: &'a dyn CommandRunner,
    pub project_id: Arc<str>,
}

impl<'a> Project<'a> {
    pub fn new(runner: &'a dyn CommandRunner, project_id: &str) -> Self {
        Self {
            runner,
            project_id: project_id.into(),
        }
    }

    fn project_flag(&self) -> Arc<str> {
        format!("--project={}", self.project_id).into()
    }

    /// Fire-and-forget call: a non-zero exit is logged and otherwise
    /// ignored, matching the provisioning sequence's tolerance for
    /// already-configured resources.
    fn gcloud_unchecked(&self, arguments: Vec<Arc<str>>) -> anyhow::Result<()> {
        let options = ExecuteOptions {
            arguments,
            ..Default::default()
        };
        let full_command = options.get_full_command("gcloud");
        let output = self.runner.run("gcloud", options)?;
        if !output.is_success {
            tracing::warn!(
                "`{full_command}` exited with status {:?}: {}",
                output.code,
                String::from_utf8_lossy(output.stderr.as_slice()).trim()
            );
        }
        Ok(())
    }

    pub fn enable_service(&self, service: &str) -> anyhow::Result<()> {
        println!("Enabling service {service}");
        self.gcloud_unchecked(vec![
            "services".into(),
            "enable".into(),
            service.into(),
            self.project_flag(),
        ])
    }

    pub fn keyring_exists(&self) -> anyhow::Result<bool> {
        let options = ExecuteOptions {
            arguments: vec![
                "kms".into(),
                "keyrings".into(),
                "list".into(),
                format!("--filter={KEYRING}").into(),
                "--format=json".into(),
                self.project_flag(),
                format!("--location={KMS_LOCATION}").into(),
            ],
            ..Default::default()
        };
        let stdout = self.runner.run_text("gcloud", options)?;
        let keyrings: serde_json::Value = serde_json::from_str(stdout.trim())
            .context("Failed to parse keyring listing as JSON")?;
        Ok(keyrings
            .as_array()
            .is_some_and(|entries| !entries.is_empty()))
    }

    /// Keyrings cannot be deleted, so the recreate flag never applies here:
    /// an existing keyring is always reused.
    pub fn create_keyring_and_key(&self) -> anyhow::Result<()> {
        println!();
        println!("Creating keyring and crypto key ...");
        println!();
        if self.keyring_exists()? {
            println!("The keyring is already created. Not creating it again!");
            return Ok(());
        }
        self.gcloud_unchecked(vec![
            "kms".into(),
            "keyrings".into(),
            "create".into(),
            KEYRING.into(),
            self.project_flag(),
            format!("--location={KMS_LOCATION}").into(),
        ])?;
        self.gcloud_unchecked(vec![
            "kms".into(),
            "keys".into(),
            "create".into(),
            CRYPTO_KEY.into(),
            self.project_flag(),
            format!("--keyring={KEYRING}").into(),
            "--purpose=encryption".into(),
            format!("--location={KMS_LOCATION}").into(),
        ])
    }

    fn kms_arguments(&self, operation: &str) -> Vec<Arc<str>> {
        vec![
            "kms".into(),
            operation.into(),
            "--plaintext-file=-".into(),
            "--ciphertext-file=-".into(),
            format!("--location={KMS_LOCATION}").into(),
            format!("--keyring={KEYRING}").into(),
            format!("--key={CRYPTO_KEY}").into(),
            self.project_flag(),
        ]
    }

    /// Encrypts a secret value. The returned ciphertext is base64 so it can
    /// live in environment files.
    pub fn encrypt_value(&self, plaintext: &str) -> anyhow::Result<Arc<str>> {
        let options = ExecuteOptions {
            arguments: self.kms_arguments("encrypt"),
            stdin: Some(plaintext.as_bytes().to_vec()),
            ..Default::default()
        };
        let ciphertext = self
            .runner
            .run_checked("gcloud", options)
            .context("Failed to encrypt value")?;
        Ok(BASE64.encode(ciphertext).into())
    }

    /// Reverses [`Project::encrypt_value`]: base64-decode, then pipe
    /// through the KMS decrypt call.
    pub fn decrypt_value(&self, ciphertext_base64: &str) -> anyhow::Result<String> {
        let ciphertext = BASE64
            .decode(ciphertext_base64.trim())
            .context("Failed to base64-decode ciphertext")?;
        let options = ExecuteOptions {
            arguments: self.kms_arguments("decrypt"),
            stdin: Some(ciphertext),
            ..Default::default()
        };
        let plaintext = self
            .runner
            .run_checked("gcloud", options)
            .context("Failed to decrypt value")?;
        String::from_utf8(plaintext).context("Decrypted value is not UTF-8")
    }

    pub fn encrypt_file(&self, path: &Path) -> anyhow::Result<()> {
        println!("Encrypting file {}", path.display());
        self.gcloud_unchecked(vec![
            "kms".into(),
            "encrypt".into(),
            format!("--plaintext-file={}", path.display()).into(),
            format!("--ciphertext-file={}.enc", path.display()).into(),
            format!("--location={KMS_LOCATION}").into(),
            format!("--keyring={KEYRING}").into(),
            format!("--key={CRYPTO_KEY}").into(),
            self.project_flag(),
        ])
    }

    pub fn service_account_exists(&self, email: &str) -> anyhow::Result<bool> {
        let options = ExecuteOptions {
            arguments: vec![
                "iam".into(),
                "service-accounts".into(),
                "describe".into(),
                email.into(),
                self.project_flag(),
                "--quiet".into(),
            ],
            is_quiet: true,
            ..Default::default()
        };
        self.runner.run_status("gcloud", options)
    }

    fn delete_service_account(&self, email: &str) -> anyhow::Result<()> {
        let options = ExecuteOptions {
            arguments: vec![
                "iam".into(),
                "service-accounts".into(),
                "delete".into(),
                email.into(),
                self.project_flag(),
                "--quiet".into(),
            ],
            is_quiet: true,
            ..Default::default()
        };
        let _ = self.runner.run("gcloud", options)?;
        Ok(())
    }

    fn add_role_binding(&self, email: &str, role: &str) -> anyhow::Result<()> {
        println!("Assigning {role} role to {email}");
        self.gcloud_unchecked(vec![
            "projects".into(),
            "add-iam-policy-binding".into(),
            self.project_id.clone(),
            "--member".into(),
            format!("serviceAccount:{email}").into(),
            "--role".into(),
            role.into(),
        ])
    }

    fn add_default_account_impersonation(&self, email: &str) -> anyhow::Result<()> {
        println!(
            "Assigning default account {}@appspot.gserviceaccount.com \
             service account user role for {email}",
            self.project_id
        );
        self.gcloud_unchecked(vec![
            "iam".into(),
            "service-accounts".into(),
            "add-iam-policy-binding".into(),
            format!("{}@appspot.gserviceaccount.com", self.project_id).into(),
            self.project_flag(),
            "--member".into(),
            format!("serviceAccount:{email}").into(),
            "--role".into(),
            "roles/iam.serviceAccountUser".into(),
        ])
    }

    /// Creates one service account with its key file, enabled services, and
    /// role bindings. Returns whether a creation call was issued.
    pub fn create_service_account(
        &self,
        account: &ServiceAccount,
        keys_dir: &Path,
        is_recreate: bool,
    ) -> anyhow::Result<bool> {
        let email = account.email(self.project_id.as_ref());
        let is_present = self.service_account_exists(email.as_ref())?;
        if is_present && !is_recreate {
            println!("Service account {email} already exists. Not creating it again!");
            return Ok(false);
        }
        if is_present {
            self.delete_service_account(email.as_ref())?;
        }

        self.gcloud_unchecked(vec![
            "iam".into(),
            "service-accounts".into(),
            "create".into(),
            account.account_name.clone(),
            "--display-name".into(),
            account.display_name.clone(),
            self.project_flag(),
        ])?;

        let key_file = keys_dir.join(account.keyfile.as_ref());
        self.gcloud_unchecked(vec![
            "iam".into(),
            "service-accounts".into(),
            "keys".into(),
            "create".into(),
            key_file.display().to_string().into(),
            "--iam-account".into(),
            email.clone(),
            self.project_flag(),
        ])?;
        self.encrypt_file(key_file.as_path())?;

        for service in account.services.iter() {
            self.enable_service(service)?;
        }
        for role in account.roles.iter() {
            self.add_role_binding(email.as_ref(), role)?;
        }
        if account.is_default_account_impersonation {
            self.add_default_account_impersonation(email.as_ref())?;
        }
        Ok(true)
    }

    pub fn bucket_exists(&self, bucket_name: &str) -> anyhow::Result<bool> {
        let options = ExecuteOptions {
            arguments: vec!["ls".into(), "-b".into(), format!("gs://{bucket_name}").into()],
            is_quiet: true,
            ..Default::default()
        };
        self.runner.run_status("gsutil", options)
    }

    /// Creates one storage bucket. Returns whether a creation call was
    /// issued.
    pub fn create_bucket(&self, bucket: &Bucket, is_recreate: bool) -> anyhow::Result<bool> {
        let bucket_name = format!("{}-{}", self.project_id, bucket.suffix);
        let is_present = self.bucket_exists(bucket_name.as_str())?;
        if is_present && !is_recreate {
            println!("Bucket gs://{bucket_name} already exists. Not creating it again!");
            return Ok(false);
        }
        if is_present {
            let options = ExecuteOptions {
                arguments: vec!["rm".into(), "-r".into(), format!("gs://{bucket_name}").into()],
                ..Default::default()
            };
            let _ = self.runner.run("gsutil", options)?;
        }

        println!("Creating bucket gs://{bucket_name} ({})", bucket.display_name);
        let options = ExecuteOptions {
            arguments: vec![
                "mb".into(),
                "-p".into(),
                self.project_id.clone(),
                format!("gs://{bucket_name}").into(),
            ],
            ..Default::default()
        };
        let output = self.runner.run("gsutil", options)?;
        if !output.is_success {
            tracing::warn!("Failed to create bucket gs://{bucket_name}");
        }
        Ok(true)
    }

    pub fn create_source_repository(&self, repo_name: &str) -> anyhow::Result<()> {
        self.gcloud_unchecked(vec![
            "source".into(),
            "repos".into(),
            "create".into(),
            repo_name.into(),
            self.project_flag(),
        ])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use runner::{FakeRunner, Output};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_builtin_lists_are_unique() {
        let accounts = builtin_service_accounts();
        let keyfiles: HashSet<_> = accounts.iter().map(|a| a.keyfile.clone()).collect();
        let names: HashSet<_> = accounts.iter().map(|a| a.account_name.clone()).collect();
        assert_eq!(keyfiles.len(), accounts.len());
        assert_eq!(names.len(), accounts.len());

        let buckets = builtin_buckets();
        let suffixes: HashSet<_> = buckets.iter().map(|b| b.suffix.clone()).collect();
        assert_eq!(suffixes.len(), buckets.len());
    }

    #[test]
    fn test_keyring_existence_uses_json_array_length() {
        let fake = FakeRunner::new();
        fake.respond(&["gcloud", "kms", "keyrings", "list"], Output::success("[]"));
        let project = Project::new(&fake, "my-project");
        assert!(!project.keyring_exists().unwrap());

        let fake = FakeRunner::new();
        fake.respond(
            &["gcloud", "kms", "keyrings", "list"],
            Output::success(r#"[{"name": "projects/p/locations/global/keyRings/groundwork"}]"#),
        );
        let project = Project::new(&fake, "my-project");
        assert!(project.keyring_exists().unwrap());
    }

    #[test]
    fn test_existing_keyring_is_not_recreated() {
        let fake = FakeRunner::new();
        fake.respond(
            &["gcloud", "kms", "keyrings", "list"],
            Output::success(r#"[{"name": "kr"}]"#),
        );
        let project = Project::new(&fake, "my-project");
        project.create_keyring_and_key().unwrap();
        assert_eq!(fake.count_matching(&["gcloud", "kms", "keyrings", "create"]), 0);
        assert_eq!(fake.count_matching(&["gcloud", "kms", "keys", "create"]), 0);
    }

    #[test]
    fn test_decrypt_reverses_base64_kms_pipeline() {
        // Identity decrypt: the fake echoes the piped ciphertext back.
        let fake = FakeRunner::new();
        fake.on(&["gcloud", "kms", "decrypt"], |invocation| {
            Output::success(invocation.stdin.clone().unwrap_or_default())
        });
        let project = Project::new(&fake, "my-project");

        let ciphertext_base64 = BASE64.encode("the plain value");
        let plaintext = project.decrypt_value(ciphertext_base64.as_str()).unwrap();
        assert_eq!(plaintext, "the plain value");
    }

    #[test]
    fn test_decrypt_rejects_invalid_base64() {
        let fake = FakeRunner::new();
        let project = Project::new(&fake, "my-project");
        assert!(project.decrypt_value("%%% not base64 %%%").is_err());
        assert!(fake.invocations().is_empty());
    }

    fn stateful_service_account_fake() -> FakeRunner {
        let fake = FakeRunner::new();
        let created = std::sync::Arc::new(AtomicBool::new(false));
        let created_for_describe = created.clone();
        fake.on(
            &["gcloud", "iam", "service-accounts", "describe"],
            move |_| {
                if created_for_describe.load(Ordering::SeqCst) {
                    Output::success(Vec::<u8>::new())
                } else {
                    Output::failure(1)
                }
            },
        );
        fake.on(&["gcloud", "iam", "service-accounts", "create"], move |_| {
            created.store(true, Ordering::SeqCst);
            Output::success(Vec::<u8>::new())
        });
        fake
    }

    #[test]
    fn test_service_account_creation_is_idempotent() {
        let fake = stateful_service_account_fake();
        let keys_dir = tempfile::tempdir().unwrap();
        let project = Project::new(&fake, "my-project");
        let account = builtin_service_accounts().remove(0);

        assert!(project
            .create_service_account(&account, keys_dir.path(), false)
            .unwrap());
        assert!(!project
            .create_service_account(&account, keys_dir.path(), false)
            .unwrap());

        // The existence check runs every time; creation happens at most once.
        assert_eq!(
            fake.count_matching(&["gcloud", "iam", "service-accounts", "describe"]),
            2
        );
        assert_eq!(
            fake.count_matching(&["gcloud", "iam", "service-accounts", "create"]),
            1
        );
    }

    #[test]
    fn test_recreate_deletes_existing_service_account_first() {
        let fake = stateful_service_account_fake();
        let keys_dir = tempfile::tempdir().unwrap();
        let project = Project::new(&fake, "my-project");
        let account = builtin_service_accounts().remove(0);

        assert!(project
            .create_service_account(&account, keys_dir.path(), false)
            .unwrap());
        assert!(project
            .create_service_account(&account, keys_dir.path(), true)
            .unwrap());

        assert_eq!(
            fake.count_matching(&["gcloud", "iam", "service-accounts", "delete"]),
            1
        );
        assert_eq!(
            fake.count_matching(&["gcloud", "iam", "service-accounts", "create"]),
            2
        );
    }

    #[test]
    fn test_bucket_creation_is_idempotent() {
        let fake = FakeRunner::new();
        let exists = std::sync::Arc::new(AtomicBool::new(false));
        let exists_for_ls = exists.clone();
        fake.on(&["gsutil", "ls", "-b"], move |_| {
            if exists_for_ls.load(Ordering::SeqCst) {
                Output::success(Vec::<u8>::new())
            } else {
                Output::failure(1)
            }
        });
        fake.on(&["gsutil", "mb"], move |_| {
            exists.store(true, Ordering::SeqCst);
            Output::success(Vec::<u8>::new())
        });

        let project = Project::new(&fake, "my-project");
        let bucket = builtin_buckets().remove(0);
        assert!(project.create_bucket(&bucket, false).unwrap());
        assert!(!project.create_bucket(&bucket, false).unwrap());
        assert_eq!(fake.count_matching(&["gsutil", "mb"]), 1);
    }
}
