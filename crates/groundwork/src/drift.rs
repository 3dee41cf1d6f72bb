//! Drift detection: compares the materialized configuration directory
//! against the template directory after applying the current variable
//! mapping, and compares the variable key sets of the two environment
//! files. Any divergence anywhere flags the run and the command exits
//! non-zero.

use anyhow::Context;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

const EXCLUDED_DIR_NAMES: &[&str] = &["node_modules", ".git", ws::KEYS_DIR_NAME];
const EXCLUDED_EXTENSIONS: &[&str] = &["enc", "iml"];
const EXCLUDED_NAME_FRAGMENT: &str = "decrypted_variables";
/// Generated files with no template counterpart.
const EXCLUDED_FILE_NAMES: &[&str] = &["all.variables.yaml"];

const BANNER: &str =
    "!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!";

/// The process-wide confirmation flag of the comparison run, threaded
/// explicitly instead of living in a global.
#[derive(Debug, Default)]
pub struct Report {
    drift_count: usize,
}

impl Report {
    pub fn is_drift(&self) -> bool {
        self.drift_count > 0
    }

    fn flag(&mut self) {
        self.drift_count += 1;
    }
}

pub fn run(root: &Path, template_dir: &Path) -> anyhow::Result<Report> {
    let workspace = ws::Workspace::load(root)?;
    let variables = template::Variables::from_env();
    let mut report = Report::default();

    let template_variables_file = template_dir.join(format!(
        "{}{}",
        ws::TEMPLATE_PREFIX,
        ws::VARIABLES_FILE_NAME
    ));
    let comparison = compare_variable_keys(
        workspace.variables_file().as_path(),
        template_variables_file.as_path(),
    )?;
    report_key_comparison(
        &comparison,
        workspace.variables_file().as_path(),
        template_variables_file.as_path(),
        &mut report,
    );

    check_all_files(
        workspace.config_dir().as_path(),
        template_dir,
        &variables,
        &mut report,
    )?;

    Ok(report)
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct KeyComparison {
    /// Keys present in the materialized file only.
    pub new_current_keys: BTreeSet<Arc<str>>,
    /// Keys present in the template file only.
    pub new_template_keys: BTreeSet<Arc<str>>,
}

pub(crate) fn compare_variable_keys(
    current_file: &Path,
    template_file: &Path,
) -> anyhow::Result<KeyComparison> {
    let current_keys = envfile::read_keys(current_file)?;
    let template_keys = envfile::read_keys(template_file)?;
    Ok(KeyComparison {
        new_current_keys: current_keys.difference(&template_keys).cloned().collect(),
        new_template_keys: template_keys.difference(&current_keys).cloned().collect(),
    })
}

fn report_key_comparison(
    comparison: &KeyComparison,
    current_file: &Path,
    template_file: &Path,
    report: &mut Report,
) {
    if !comparison.new_template_keys.is_empty() {
        report.flag();
        println!("{BANNER}");
        println!();
        println!(
            "There are new keys in the template file {}",
            template_file.display()
        );
        println!();
        for key in comparison.new_template_keys.iter() {
            println!("{key}");
        }
        println!();
        println!("Re-run `groundwork bootstrap --recreate` to add the new values to your configuration");
        println!();
        println!("{BANNER}");
    }
    if !comparison.new_current_keys.is_empty() {
        report.flag();
        println!("{BANNER}");
        println!();
        println!(
            "There are new keys in your configuration file {}",
            current_file.display()
        );
        println!();
        for key in comparison.new_current_keys.iter() {
            println!("{key}");
        }
        println!();
        println!(
            "Remember to add the new keys to the template: {}",
            template_file.display()
        );
        println!();
        println!("{BANNER}");
    }
}

fn is_exempt(path: &Path) -> bool {
    let is_excluded_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .is_some_and(|name| {
            name.contains(EXCLUDED_NAME_FRAGMENT) || EXCLUDED_FILE_NAMES.contains(&name)
        });
    let is_excluded_extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .is_some_and(|extension| EXCLUDED_EXTENSIONS.contains(&extension));
    is_excluded_name || is_excluded_extension
}

pub(crate) fn check_all_files(
    config_dir: &Path,
    template_dir: &Path,
    variables: &template::Variables,
    report: &mut Report,
) -> anyhow::Result<()> {
    let walker = walkdir::WalkDir::new(config_dir)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| EXCLUDED_DIR_NAMES.contains(&name)))
        });

    for entry in walker {
        let entry = entry.context("Failed to walk the configuration directory")?;
        // Symlinks are exempt: their file type is neither file nor dir here.
        if !entry.file_type().is_file() {
            continue;
        }
        if is_exempt(entry.path()) {
            continue;
        }

        let relative_path = entry
            .path()
            .strip_prefix(config_dir)
            .context("Internal error: path not prefixed by configuration directory")?;
        let template_path = template_dir.join(relative_path).with_file_name(format!(
            "{}{}",
            ws::TEMPLATE_PREFIX,
            entry.file_name().to_string_lossy()
        ));

        println!(
            "Comparing {} <> {}",
            entry.path().display(),
            template_path.display()
        );

        let template_content = std::fs::read_to_string(template_path.as_path())
            .with_context(|| {
                format!(
                    "Missing template counterpart {} for {}",
                    template_path.display(),
                    entry.path().display()
                )
            })?;
        let config_content = std::fs::read_to_string(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;

        let expected = variables.substitute(template_content.as_str());
        if config_content != expected {
            report.flag();
            println!("{BANNER}");
            println!();
            println!(
                "The file in your workspace {} differs from the template {} \
                 after substituting the current variables",
                entry.path().display(),
                template_path.display()
            );
            println!();
            let diff = similar::TextDiff::from_lines(config_content.as_str(), expected.as_str());
            print!(
                "{}",
                diff.unified_diff().header(
                    entry.path().display().to_string().as_str(),
                    template_path.display().to_string().as_str()
                )
            );
            println!();
            println!("Make sure to align them!");
            println!();
            println!("{BANNER}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    fn write(path: PathBuf, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn test_variables() -> template::Variables {
        let mut variables = template::Variables::new();
        variables.insert("GCP_PROJECT_ID", "my-project");
        variables
    }

    #[test]
    fn test_no_drift_when_materialized_matches_substituted_template() {
        let config_dir = tempfile::tempdir().unwrap();
        let template_dir = tempfile::tempdir().unwrap();
        write(
            template_dir.path().join("TEMPLATE-variables.env"),
            "GCP_PROJECT_ID={{ GCP_PROJECT_ID }}\n",
        );
        write(
            config_dir.path().join("variables.env"),
            "GCP_PROJECT_ID=my-project\n",
        );

        let mut report = Report::default();
        check_all_files(
            config_dir.path(),
            template_dir.path(),
            &test_variables(),
            &mut report,
        )
        .unwrap();
        assert!(!report.is_drift());
    }

    #[test]
    fn test_divergent_file_flags_drift() {
        let config_dir = tempfile::tempdir().unwrap();
        let template_dir = tempfile::tempdir().unwrap();
        write(
            template_dir.path().join("TEMPLATE-variables.env"),
            "GCP_PROJECT_ID={{ GCP_PROJECT_ID }}\n",
        );
        write(
            config_dir.path().join("variables.env"),
            "GCP_PROJECT_ID=other-project\n",
        );

        let mut report = Report::default();
        check_all_files(
            config_dir.path(),
            template_dir.path(),
            &test_variables(),
            &mut report,
        )
        .unwrap();
        assert!(report.is_drift());
    }

    #[test]
    fn test_exempt_files_are_ignored() {
        let config_dir = tempfile::tempdir().unwrap();
        let template_dir = tempfile::tempdir().unwrap();
        write(config_dir.path().join("secret.json.enc"), "ciphertext");
        write(config_dir.path().join("decrypted_variables.env"), "X=1\n");
        write(config_dir.path().join("all.variables.yaml"), "merged: true\n");
        write(config_dir.path().join("keys/gcp_compute.json"), "{}");

        let mut report = Report::default();
        check_all_files(
            config_dir.path(),
            template_dir.path(),
            &test_variables(),
            &mut report,
        )
        .unwrap();
        assert!(!report.is_drift());
    }

    #[test]
    fn test_variable_key_comparison_is_symmetric() {
        let directory = tempfile::tempdir().unwrap();
        let left = directory.path().join("left.env");
        let right = directory.path().join("right.env");
        write(left.clone(), "SHARED=1\nONLY_LEFT=1\n");
        write(right.clone(), "SHARED=2\nONLY_RIGHT=2\n");

        let comparison = compare_variable_keys(left.as_path(), right.as_path()).unwrap();
        assert_eq!(
            comparison.new_current_keys,
            BTreeSet::from(["ONLY_LEFT".into()])
        );
        assert_eq!(
            comparison.new_template_keys,
            BTreeSet::from(["ONLY_RIGHT".into()])
        );

        // Swapping the inputs swaps which side reports new keys.
        let swapped = compare_variable_keys(right.as_path(), left.as_path()).unwrap();
        assert_eq!(swapped.new_current_keys, comparison.new_template_keys);
        assert_eq!(swapped.new_template_keys, comparison.new_current_keys);
    }

    #[test]
    fn test_key_comparison_flags_report_in_both_directions() {
        let directory = tempfile::tempdir().unwrap();
        let current = directory.path().join("variables.env");
        let template = directory.path().join("TEMPLATE-variables.env");
        write(current.clone(), "A=1\n");
        write(template.clone(), "A=1\nB=2\n");

        let comparison = compare_variable_keys(current.as_path(), template.as_path()).unwrap();
        let mut report = Report::default();
        report_key_comparison(&comparison, current.as_path(), template.as_path(), &mut report);
        assert!(report.is_drift());
    }
}
