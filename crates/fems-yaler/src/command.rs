//! Synchronous command execution port
//!
//! Everything that shells out (systemctl, dhclient, ntpdate, ...) goes through
//! [`CommandRunner`] so tests can substitute a recording fake.

use std::io;
use std::path::Path;
use std::process::Command;

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a process that exited with `code` and printed nothing
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs a program to completion and captures its output
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[&str]) -> io::Result<CommandOutput>;
}

/// [`CommandRunner`] backed by `std::process::Command`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &Path, args: &[&str]) -> io::Result<CommandOutput> {
        tracing::debug!("Executing {} {}", program.display(), args.join(" "));

        let output = Command::new(program).args(args).output()?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_success() {
        assert!(CommandOutput::with_code(0).success());
        assert!(!CommandOutput::with_code(3).success());
        assert!(!CommandOutput::default().success());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let output = SystemCommandRunner
            .run(Path::new("/bin/sh"), &["-c", "echo hello; echo oops >&2; exit 3"])
            .unwrap();

        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops");
    }

    #[test]
    fn test_system_runner_missing_program() {
        let result = SystemCommandRunner.run(Path::new("/nonexistent/fems-binary"), &[]);
        assert!(result.is_err());
    }
}
