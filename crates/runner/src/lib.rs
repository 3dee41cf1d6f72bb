//! Command execution port.
//!
//! Every shell-out in the workspace goes through [`CommandRunner`] so the
//! provisioning and drift logic can be exercised against [`FakeRunner`]
//! without a live cloud project. The real implementation is
//! [`ProcessRunner`], a blocking wrapper around `std::process::Command`.

use anyhow::Context;
use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub arguments: Vec<Arc<str>>,
    pub environment: Vec<(Arc<str>, Arc<str>)>,
    pub working_directory: Option<Arc<str>>,
    /// Bytes piped to the child's stdin. `None` closes stdin.
    pub stdin: Option<Vec<u8>>,
    /// Discard the child's stderr (fire-and-forget calls).
    pub is_quiet: bool,
}

impl ExecuteOptions {
    pub fn get_full_command(&self, command: &str) -> String {
        let mut full_command = command.to_string();
        for argument in self.arguments.iter() {
            full_command.push(' ');
            full_command.push_str(argument);
        }
        if let Some(directory) = self.working_directory.as_ref() {
            full_command.push_str(format!(" (in {directory})").as_str());
        }
        full_command
    }
}

#[derive(Debug, Clone)]
pub struct Output {
    pub is_success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Output {
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            is_success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    pub fn failure(code: i32) -> Self {
        Self {
            is_success: false,
            code: Some(code),
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }
}

pub trait CommandRunner {
    /// Runs the command to completion. An `Err` means the command could not
    /// be spawned; a command that ran and exited non-zero is an `Ok` with
    /// `is_success == false`.
    fn run(&self, command: &str, options: ExecuteOptions) -> anyhow::Result<Output>;

    /// Runs the command and treats a non-zero exit as an error carrying the
    /// captured stderr.
    fn run_checked(&self, command: &str, options: ExecuteOptions) -> anyhow::Result<Vec<u8>> {
        let full_command = options.get_full_command(command);
        let output = self.run(command, options)?;
        if !output.is_success {
            return Err(anyhow::anyhow!(
                "`{full_command}` exited with status {:?}: {}",
                output.code,
                String::from_utf8_lossy(output.stderr.as_slice()).trim()
            ));
        }
        Ok(output.stdout)
    }

    /// [`CommandRunner::run_checked`] with UTF-8 stdout.
    fn run_text(&self, command: &str, options: ExecuteOptions) -> anyhow::Result<String> {
        let full_command = options.get_full_command(command);
        let stdout = self.run_checked(command, options)?;
        String::from_utf8(stdout)
            .with_context(|| format!("`{full_command}` produced non UTF-8 output"))
    }

    /// Runs the command and reports its exit status as a boolean. Used for
    /// describe/list existence checks.
    fn run_status(&self, command: &str, options: ExecuteOptions) -> anyhow::Result<bool> {
        Ok(self.run(command, options)?.is_success)
    }
}

/// The real port: synchronous, blocking, no timeout. A hang in the external
/// tool hangs the whole command.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, command: &str, options: ExecuteOptions) -> anyhow::Result<Output> {
        let mut process = std::process::Command::new(command);
        for argument in options.arguments.iter() {
            process.arg(argument.as_ref());
        }
        for (key, value) in options.environment.iter() {
            process.env(key.as_ref(), value.as_ref());
        }
        if let Some(directory) = options.working_directory.as_ref() {
            process.current_dir(directory.as_ref());
        }
        process.stdout(std::process::Stdio::piped());
        process.stderr(if options.is_quiet {
            std::process::Stdio::null()
        } else {
            std::process::Stdio::piped()
        });
        process.stdin(if options.stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        });

        tracing::debug!("{}", options.get_full_command(command));

        let mut child = process
            .spawn()
            .with_context(|| format!("Failed to spawn `{command}`"))?;

        // Stdin is written from its own thread: writing inline would
        // deadlock once both pipe buffers fill, since nothing drains the
        // child's stdout until `wait_with_output`.
        let writer = match options.stdin {
            Some(stdin_bytes) => {
                let mut stdin_handle = child
                    .stdin
                    .take()
                    .ok_or_else(|| anyhow::anyhow!("No stdin handle for `{command}`"))?;
                Some(std::thread::spawn(move || {
                    stdin_handle.write_all(stdin_bytes.as_slice())
                }))
            }
            None => None,
        };

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for `{command}`"))?;

        if let Some(writer) = writer {
            writer
                .join()
                .map_err(|_| anyhow::anyhow!("Stdin writer for `{command}` panicked"))?
                .with_context(|| format!("Failed to write stdin of `{command}`"))?;
        }

        Ok(Output {
            is_success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// One recorded call through the fake port.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: Arc<str>,
    pub arguments: Vec<Arc<str>>,
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    /// The command followed by its arguments, used for prefix matching.
    pub fn tokens(&self) -> Vec<Arc<str>> {
        let mut tokens = vec![self.command.clone()];
        tokens.extend(self.arguments.iter().cloned());
        tokens
    }

    pub fn matches_prefix(&self, prefix: &[&str]) -> bool {
        let tokens = self.tokens();
        prefix.len() <= tokens.len()
            && prefix
                .iter()
                .zip(tokens.iter())
                .all(|(expected, actual)| *expected == actual.as_ref())
    }
}

type Responder = Box<dyn FnMut(&Invocation) -> Output + Send>;

/// Recording fake. Responses are registered against a command token prefix;
/// unmatched invocations succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
    invocations: Mutex<Vec<Invocation>>,
    rules: Mutex<Vec<(Vec<Arc<str>>, Responder)>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a responder for invocations whose `command arguments...`
    /// tokens start with `prefix`. Later registrations win.
    pub fn on<F>(&self, prefix: &[&str], responder: F)
    where
        F: FnMut(&Invocation) -> Output + Send + 'static,
    {
        let prefix = prefix
            .iter()
            .map(|token| Arc::from(*token))
            .collect::<Vec<Arc<str>>>();
        self.rules
            .lock()
            .unwrap()
            .push((prefix, Box::new(responder)));
    }

    pub fn respond(&self, prefix: &[&str], output: Output) {
        self.on(prefix, move |_| output.clone());
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn count_matching(&self, prefix: &[&str]) -> usize {
        self.invocations()
            .iter()
            .filter(|invocation| invocation.matches_prefix(prefix))
            .count()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, command: &str, options: ExecuteOptions) -> anyhow::Result<Output> {
        let invocation = Invocation {
            command: command.into(),
            arguments: options.arguments.clone(),
            stdin: options.stdin.clone(),
        };
        self.invocations.lock().unwrap().push(invocation.clone());

        let tokens = invocation.tokens();
        let mut rules = self.rules.lock().unwrap();
        for (prefix, responder) in rules.iter_mut().rev() {
            let is_match = prefix.len() <= tokens.len()
                && prefix
                    .iter()
                    .zip(tokens.iter())
                    .all(|(expected, actual)| expected == actual);
            if is_match {
                return Ok(responder(&invocation));
            }
        }
        Ok(Output::success(Vec::<u8>::new()))
    }
}
