//! Bounded subprocess execution.
//!
//! Children run in their own process group with a sanitized environment.
//! On timeout the whole group gets SIGTERM, a short grace period, then
//! SIGKILL. Output is captured up to the per-stream cap; bytes beyond the
//! cap are discarded and counted.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::HandlerOutcome;

/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Environment variable name fragments never passed to children.
const SENSITIVE_ENV_FRAGMENTS: &[&str] = &["PASSWORD", "TOKEN", "SECRET", "KEY", "AUTH"];

/// Exit code reported for timed-out commands.
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code reported when the command could not be spawned.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Exit code reported when the command was not found.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Run `argv` under `timeout` with a per-stream `output_cap`.
///
/// Spawn failures are folded into the outcome (exit 126/127) so the
/// dispatcher classifies them like any other handler failure; only empty
/// argv is an input error.
pub async fn run_command(
    argv: &[String],
    timeout: Duration,
    output_cap: usize,
) -> std::io::Result<HandlerOutcome> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty tool command")
    })?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env_clear()
        .envs(sanitized_env())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let exit_code = if e.kind() == std::io::ErrorKind::NotFound {
                EXIT_NOT_FOUND
            } else {
                EXIT_NOT_EXECUTABLE
            };
            return Ok(HandlerOutcome {
                success: false,
                stderr: format!("{program}: {e}"),
                exit_code,
                ..HandlerOutcome::default()
            });
        }
    };

    let pid = child.id();
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(read_capped(stdout_pipe, output_cap));
    let stderr_task = tokio::spawn(read_capped(stderr_pipe, output_cap));

    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => (exit_code_of(status), false),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "failed to await tool subprocess");
            (1, false)
        }
        Err(_) => {
            terminate_group(pid, &mut child).await;
            (EXIT_TIMEOUT, true)
        }
    };

    let (stdout, stdout_trunc) = stdout_task.await.unwrap_or_default();
    let (stderr, stderr_trunc) = stderr_task.await.unwrap_or_default();

    Ok(HandlerOutcome {
        success: exit_code == 0 && !timed_out,
        summary: String::new(),
        data: None,
        stdout,
        stderr,
        exit_code,
        stdout_trunc,
        stderr_trunc,
        timed_out,
    })
}

/// The environment handed to children: the parent's, minus anything
/// matching the sensitive set and anything exposing host control sockets.
pub fn sanitized_env() -> Vec<(String, String)> {
    std::env::vars()
        .filter(|(name, _)| {
            let upper = name.to_uppercase();
            if upper == "DOCKER_HOST" {
                return false;
            }
            !SENSITIVE_ENV_FRAGMENTS.iter().any(|f| upper.contains(f))
        })
        .collect()
}

async fn read_capped(
    pipe: Option<impl tokio::io::AsyncRead + Unpin>,
    cap: usize,
) -> (String, u64) {
    let Some(mut pipe) = pipe else {
        return (String::new(), 0);
    };
    let mut kept = Vec::with_capacity(cap.min(8192));
    let mut discarded: u64 = 0;
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                let take = room.min(n);
                kept.extend_from_slice(&chunk[..take]);
                discarded += (n - take) as u64;
            }
            Err(_) => break,
        }
    }
    (String::from_utf8_lossy(&kept).into_owned(), discarded)
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(1))
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

#[cfg(unix)]
async fn terminate_group(pid: Option<u32>, child: &mut tokio::process::Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        let group = Pid::from_raw(pid as i32);
        let _ = killpg(group, Signal::SIGTERM);
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
        let _ = killpg(group, Signal::SIGKILL);
    } else {
        let _ = child.start_kill();
    }
    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn terminate_group(_pid: Option<u32>, child: &mut tokio::process::Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let outcome = run_command(
            &argv(&["/bin/echo", "hello"]),
            Duration::from_secs(5),
            10240,
        )
        .await
        .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout.trim(), "hello");
        assert_eq!(outcome.stdout_trunc, 0);
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let outcome = run_command(
            &argv(&["/bin/sh", "-c", "echo oops >&2; exit 3"]),
            Duration::from_secs(5),
            10240,
        )
        .await
        .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn truncates_output_beyond_cap_and_counts_discarded_bytes() {
        let outcome = run_command(
            &argv(&["/bin/sh", "-c", "printf 'a%.0s' $(seq 1 5000)"]),
            Duration::from_secs(5),
            1000,
        )
        .await
        .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.stdout.len(), 1000);
        assert_eq!(outcome.stdout_trunc, 4000);
    }

    #[tokio::test]
    async fn times_out_and_kills_the_process() {
        let start = std::time::Instant::now();
        let outcome = run_command(
            &argv(&["/bin/sleep", "30"]),
            Duration::from_millis(300),
            10240,
        )
        .await
        .unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, EXIT_TIMEOUT);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_command_maps_to_127() {
        let outcome = run_command(
            &argv(&["/no/such/binary"]),
            Duration::from_secs(1),
            10240,
        )
        .await
        .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, EXIT_NOT_FOUND);
    }

    #[test]
    fn sanitized_env_drops_sensitive_names() {
        std::env::set_var("OPSGATE_TEST_API_TOKEN", "x");
        std::env::set_var("OPSGATE_TEST_PLAIN", "y");
        let env = sanitized_env();
        assert!(!env.iter().any(|(k, _)| k == "OPSGATE_TEST_API_TOKEN"));
        assert!(env.iter().any(|(k, _)| k == "OPSGATE_TEST_PLAIN"));
        assert!(!env.iter().any(|(k, _)| k == "DOCKER_HOST"));
        std::env::remove_var("OPSGATE_TEST_API_TOKEN");
        std::env::remove_var("OPSGATE_TEST_PLAIN");
    }
}
