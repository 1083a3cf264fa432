//! Single git invocations. Callers decide what a failure means.

use std::ffi::OsStr;
use std::path::Path;

use crate::ssh::AgentSession;
use crate::utils::command::{CapturedRun, ProcessSpec};

/// Marker git prints on stderr for unrecoverable errors.
pub const FATAL_MARKER: &str = "fatal:";

/// True when a git run failed to start or reported a fatal error.
pub fn is_fatal(run: &CapturedRun) -> bool {
    let never_started = !run.success && run.exit_code.is_none();
    never_started || run.stderr.contains(FATAL_MARKER)
}

fn git<'a>(child_path: &OsStr, agent: Option<&AgentSession>) -> ProcessSpec<'a> {
    let mut spec = ProcessSpec::new("git")
        .env("PATH", child_path)
        .env("GIT_TERMINAL_PROMPT", "0");
    if let Some(agent) = agent {
        spec = spec.envs(agent.env());
    }
    spec
}

/// `git clone -- <url> <destination>`
pub fn clone(
    url: &str,
    destination: &Path,
    child_path: &OsStr,
    agent: Option<&AgentSession>,
) -> CapturedRun {
    git(child_path, agent)
        .args(["clone", "--", url])
        .arg(destination.to_string_lossy())
        .run_captured()
}

/// `git pull origin HEAD` inside `working_copy`.
pub fn pull_head(
    working_copy: &Path,
    child_path: &OsStr,
    agent: Option<&AgentSession>,
) -> CapturedRun {
    git(child_path, agent)
        .args(["pull", "origin", "HEAD"])
        .current_dir(working_copy)
        .run_captured()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_marker_is_detected() {
        let run = CapturedRun {
            exit_code: Some(128),
            stderr: "fatal: repository 'x' does not exist\n".to_string(),
            ..Default::default()
        };
        assert!(is_fatal(&run));
    }

    #[test]
    fn spawn_failure_is_fatal() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file");
        let run = CapturedRun::spawn_failed("git", &[], &err);
        assert!(is_fatal(&run));
    }

    #[test]
    fn warnings_without_marker_are_not_fatal() {
        let run = CapturedRun {
            exit_code: Some(0),
            success: true,
            stderr: "Cloning into 'external-repo-1'...\n\
                     warning: You appear to have cloned an empty repository.\n"
                .to_string(),
            ..Default::default()
        };
        assert!(!is_fatal(&run));
    }
}
