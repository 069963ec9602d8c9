//! Subprocess execution for the external CLIs the harness drives
//! (`helm`, `kubectl`, `minikube`, `orbctl`).

use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Captured output of a finished command.
#[derive(Clone, Debug)]
pub struct CmdOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Render a command line for logs and error messages.
pub fn display(program: &str, args: &[&str]) -> String {
    let mut s = String::from(program);
    for a in args {
        s.push(' ');
        if a.contains(char::is_whitespace) {
            s.push('\'');
            s.push_str(a);
            s.push('\'');
        } else {
            s.push_str(a);
        }
    }
    s
}

/// Run a command; a non-zero exit status is an `Error::Command`.
pub async fn run(program: &str, args: &[&str]) -> Result<CmdOutput> {
    let out = run_unchecked(program, args).await?;
    if !out.success() {
        return Err(Error::Command {
            cmd: display(program, args),
            status: out.status,
            stderr: out.stderr,
        });
    }
    Ok(out)
}

/// Run a command without treating a non-zero exit status as an error.
/// Only a spawn failure is propagated; callers inspect `status`.
pub async fn run_unchecked(program: &str, args: &[&str]) -> Result<CmdOutput> {
    debug!("> {}", self::display(program, args));

    let output = Command::new(program).args(args).output().await?;

    // Killed-by-signal shows up as no exit code; treat it as failure.
    let status = output.status.code().unwrap_or(-1);
    let out = CmdOutput {
        status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !out.success() {
        debug!(status = out.status, stderr = %out.stderr.trim(), "command failed");
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_whitespace_args() {
        let s = display("kubectl", &["exec", "-n", "db", "pod", "--", "clickhouse-client", "-q", "SELECT 1"]);
        assert_eq!(
            s,
            "kubectl exec -n db pod -- clickhouse-client -q 'SELECT 1'"
        );
    }

    #[tokio::test]
    async fn run_unchecked_reports_nonzero_status() -> anyhow::Result<()> {
        let out = run_unchecked("false", &[]).await?;
        assert!(!out.success());
        assert_eq!(out.status, 1);
        Ok(())
    }

    #[tokio::test]
    async fn run_fails_on_nonzero_status() {
        let err = run("false", &[]).await.unwrap_err();
        match err {
            Error::Command { cmd, status, .. } => {
                assert_eq!(cmd, "false");
                assert_eq!(status, 1);
            }
            other => panic!("expected Error::Command, got {other}"),
        }
    }

    #[tokio::test]
    async fn run_captures_stdout() -> anyhow::Result<()> {
        let out = run("echo", &["hello"]).await?;
        assert_eq!(out.stdout.trim(), "hello");
        Ok(())
    }
}
