//! Child process primitives. Everything runs from an argument vector,
//! never through a shell.

use serde::Serialize;
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CapturedRun {
    pub program: String,
    pub args: Vec<String>,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedRun {
    fn from_output(program: &str, args: &[String], output: Output) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            exit_code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }

    /// A run that never started (spawn failure). Reported like a failed run
    /// so callers that only log the result need no extra branch.
    pub fn spawn_failed(program: &str, args: &[String], error: &std::io::Error) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            exit_code: None,
            success: false,
            stdout: String::new(),
            stderr: format!("failed to start {}: {}", program, error),
        }
    }

    /// Command line for logs and audit rows.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        crate::utils::shell::quote_args(&parts)
    }
}

/// Builder for one child process invocation.
pub struct ProcessSpec<'a> {
    program: &'a str,
    args: Vec<String>,
    cwd: Option<&'a Path>,
    env: Vec<(OsString, OsString)>,
    merge_stderr: bool,
}

impl<'a> ProcessSpec<'a> {
    pub fn new(program: &'a str) -> Self {
        Self {
            program,
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            merge_stderr: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &'a Path) -> Self {
        self.cwd = Some(dir);
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (k, v) in vars {
            self = self.env(k, v);
        }
        self
    }

    /// Send stderr into the same pipe as stdout, preserving interleaving.
    pub fn merge_stderr(mut self) -> Self {
        self.merge_stderr = true;
        self
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(self.program);
        cmd.args(&self.args);
        if let Some(dir) = self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }

    /// Run to completion. Spawn errors are returned as `Err`.
    pub fn run(&self) -> std::io::Result<CapturedRun> {
        if self.merge_stderr {
            return self.run_merged();
        }

        let output = self.build().stdin(Stdio::null()).output()?;
        Ok(CapturedRun::from_output(self.program, &self.args, output))
    }

    /// Run to completion, folding spawn errors into a failed `CapturedRun`.
    pub fn run_captured(&self) -> CapturedRun {
        self.run()
            .unwrap_or_else(|e| CapturedRun::spawn_failed(self.program, &self.args, &e))
    }

    fn run_merged(&self) -> std::io::Result<CapturedRun> {
        let (mut reader, writer) = std::io::pipe()?;
        let writer_err = writer.try_clone()?;

        let mut cmd = self.build();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(writer_err));

        let mut child = cmd.spawn()?;
        // `cmd` still owns the parent's write ends; drop it so the reader
        // sees EOF once the child exits.
        drop(cmd);

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        let status = child.wait()?;

        Ok(CapturedRun {
            program: self.program.to_string(),
            args: self.args.clone(),
            exit_code: status.code(),
            success: status.success(),
            stdout: String::from_utf8_lossy(&buf).to_string(),
            stderr: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_failure_folds_into_captured_run() {
        let captured = ProcessSpec::new("nonexistent_command_xyz")
            .arg("--flag")
            .run_captured();
        assert!(!captured.success);
        assert_eq!(captured.exit_code, None);
        assert!(captured.stderr.contains("failed to start nonexistent_command_xyz"));
    }

    #[cfg(unix)]
    #[test]
    fn merged_output_contains_both_streams() {
        let captured = ProcessSpec::new("sh")
            .args(["-c", "echo out; echo err 1>&2; exit 3"])
            .merge_stderr()
            .run()
            .unwrap();

        assert!(!captured.success);
        assert_eq!(captured.exit_code, Some(3));
        assert!(captured.stdout.contains("out"));
        assert!(captured.stdout.contains("err"));
        assert!(captured.stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn merged_output_larger_than_pipe_buffer() {
        let captured = ProcessSpec::new("sh")
            .args([
                "-c",
                "i=0; while [ $i -lt 20000 ]; do echo line$i; echo err$i 1>&2; i=$((i+1)); done",
            ])
            .merge_stderr()
            .run()
            .unwrap();

        assert!(captured.success);
        assert_eq!(captured.stdout.lines().count(), 40000);
        assert!(captured.stdout.ends_with("err19999\n"));
    }

    #[cfg(unix)]
    #[test]
    fn env_and_cwd_reach_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let captured = ProcessSpec::new("sh")
            .args(["-c", "printf '%s|' \"$DBTRUN_MARKER\"; pwd"])
            .env("DBTRUN_MARKER", "yes")
            .current_dir(dir.path())
            .run()
            .unwrap();

        assert!(captured.success);
        assert!(captured.stdout.starts_with("yes|"));
        let reported = captured.stdout.trim().trim_start_matches("yes|");
        assert_eq!(
            std::fs::canonicalize(reported).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }

    #[test]
    fn display_command_quotes_arguments() {
        let captured = CapturedRun {
            program: "git".to_string(),
            args: vec!["commit".to_string(), "-m".to_string(), "two words".to_string()],
            ..Default::default()
        };
        assert_eq!(captured.display_command(), "git commit -m 'two words'");
    }
}
