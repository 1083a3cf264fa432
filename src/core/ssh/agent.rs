//! Transient ssh-agent sessions.
//!
//! The agent's socket and pid are passed to children through their
//! environment. The agent is killed when the session is dropped.

use regex::Regex;
use std::ffi::OsString;
use std::path::Path;

use crate::error::{Error, Result};
use crate::utils::command::ProcessSpec;

pub const AUTH_SOCK_VAR: &str = "SSH_AUTH_SOCK";
pub const AGENT_PID_VAR: &str = "SSH_AGENT_PID";

#[derive(Debug)]
pub struct AgentSession {
    auth_sock: String,
    agent_pid: i32,
    child_path: OsString,
}

/// Extract `SSH_AUTH_SOCK` and `SSH_AGENT_PID` from `ssh-agent -s` output.
pub fn parse_agent_output(stdout: &str) -> Option<(String, i32)> {
    let sock = Regex::new(r"SSH_AUTH_SOCK=([^;\s]+)").ok()?;
    let pid = Regex::new(r"SSH_AGENT_PID=(\d+)").ok()?;

    let auth_sock = sock.captures(stdout)?.get(1)?.as_str().to_string();
    let agent_pid = pid.captures(stdout)?.get(1)?.as_str().parse().ok()?;
    Some((auth_sock, agent_pid))
}

impl AgentSession {
    /// Start an agent. `child_path` is the PATH used to find `ssh-agent` and
    /// `ssh-add`.
    pub fn start(child_path: OsString) -> Result<Self> {
        let run = ProcessSpec::new("ssh-agent")
            .arg("-s")
            .env("PATH", &child_path)
            .run()
            .map_err(|e| Error::ssh_agent_failed(format!("failed to start ssh-agent: {}", e)))?;

        if !run.success {
            return Err(Error::ssh_agent_failed(format!(
                "ssh-agent exited with {:?}: {}",
                run.exit_code,
                run.stderr.trim()
            )));
        }

        let (auth_sock, agent_pid) = parse_agent_output(&run.stdout).ok_or_else(|| {
            Error::ssh_agent_failed("ssh-agent output did not contain socket and pid")
        })?;

        tracing::debug!(agent_pid, auth_sock = %auth_sock, "ssh-agent started");
        Ok(Self {
            auth_sock,
            agent_pid,
            child_path,
        })
    }

    pub fn add_key(&self, key: &Path) -> Result<()> {
        let run = ProcessSpec::new("ssh-add")
            .arg(key.to_string_lossy())
            .env("PATH", &self.child_path)
            .envs(self.env())
            .run()
            .map_err(|e| Error::ssh_agent_failed(format!("failed to run ssh-add: {}", e)))?;

        if !run.success {
            return Err(Error::ssh_agent_failed(format!(
                "ssh-add {} failed: {}",
                key.display(),
                run.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Variables a child needs to talk to this agent.
    pub fn env(&self) -> [(&'static str, String); 2] {
        [
            (AUTH_SOCK_VAR, self.auth_sock.clone()),
            (AGENT_PID_VAR, self.agent_pid.to_string()),
        ]
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        let killed = ProcessSpec::new("ssh-agent")
            .arg("-k")
            .env("PATH", &self.child_path)
            .envs(self.env())
            .run()
            .map(|run| run.success)
            .unwrap_or(false);

        if !killed {
            tracing::warn!(agent_pid = self.agent_pid, "ssh-agent -k failed, agent left running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bourne_shell_output() {
        let out = "SSH_AUTH_SOCK=/tmp/ssh-XXXXabcd/agent.4242; export SSH_AUTH_SOCK;\n\
                   SSH_AGENT_PID=4243; export SSH_AGENT_PID;\n\
                   echo Agent pid 4243;\n";
        let (sock, pid) = parse_agent_output(out).unwrap();
        assert_eq!(sock, "/tmp/ssh-XXXXabcd/agent.4242");
        assert_eq!(pid, 4243);
    }

    #[test]
    fn rejects_output_without_pid() {
        assert!(parse_agent_output("SSH_AUTH_SOCK=/tmp/agent.1; export SSH_AUTH_SOCK;").is_none());
    }

    #[test]
    fn session_round_trip_when_agent_available() {
        let path = std::env::var_os("PATH").unwrap_or_default();
        let Ok(session) = AgentSession::start(path) else {
            return;
        };
        let env = session.env();
        assert_eq!(env[0].0, AUTH_SOCK_VAR);
        assert_eq!(env[1].1, session.agent_pid.to_string());
        assert!(!env[0].1.is_empty());
    }
}
