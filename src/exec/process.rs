// src/exec/process.rs

//! Child process runner shared by the host and Docker runtimes.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::params::{Redactor, SecretValue};

use super::backend::{ContainerHandle, ExecutionResult};

/// Default per-stream capture limit.
pub const DEFAULT_CAPTURE_LIMIT: usize = 1024 * 1024;

static SET_OUTPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^::set-output ([A-Za-z_][A-Za-z0-9_-]*)=(.*)$").expect("valid set-output pattern")
});

struct Captured {
    bytes: Zeroizing<Vec<u8>>,
    truncated: bool,
}

/// Spawn `cmd`, capture both streams and wait for exit.
///
/// The child is killed if this future is dropped before completion, which
/// is how cancellation force-terminates a running body. Raw captured bytes
/// are zeroed once redacted.
pub(crate) async fn run_captured(
    mut cmd: Command,
    handle: &ContainerHandle,
    redactor: &Redactor,
    capture_limit: usize,
) -> io::Result<ExecutionResult> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (status, out, err) = tokio::try_join!(
        child.wait(),
        capture(stdout, capture_limit),
        capture(stderr, capture_limit),
    )?;

    let exit_code = status.code().unwrap_or(-1);
    let stdout = redact(redactor, &out);
    let stderr = redact(redactor, &err);

    for line in stdout.lines() {
        debug!(task = %handle.task, attempt = handle.attempt, "stdout: {}", line);
    }
    for line in stderr.lines() {
        debug!(task = %handle.task, attempt = handle.attempt, "stderr: {}", line);
    }

    info!(
        task = %handle.task,
        attempt = handle.attempt,
        container = %handle,
        exit_code,
        success = status.success(),
        "task body exited"
    );

    let produced_outputs = parse_outputs(&stdout);
    Ok(ExecutionResult {
        exit_code,
        stdout,
        stderr,
        produced_outputs,
    })
}

/// Collect `::set-output NAME=VALUE` lines. Later lines win.
pub fn parse_outputs(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| {
            let caps = SET_OUTPUT.captures(line.trim_end_matches('\r'))?;
            Some((caps[1].to_string(), caps[2].to_string()))
        })
        .collect()
}

/// Set every resolved value on the child's environment.
pub(crate) fn apply_env(cmd: &mut Command, env: &[(String, SecretValue)]) {
    for (name, value) in env {
        cmd.env(name, os_value(value));
    }
}

#[cfg(unix)]
fn os_value(value: &SecretValue) -> OsString {
    use std::os::unix::ffi::OsStrExt;
    std::ffi::OsStr::from_bytes(value.expose()).to_os_string()
}

#[cfg(not(unix))]
fn os_value(value: &SecretValue) -> OsString {
    OsString::from(String::from_utf8_lossy(value.expose()).into_owned())
}

async fn capture<R>(reader: Option<R>, limit: usize) -> io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Zeroizing::new(Vec::new());
    let mut truncated = false;
    let Some(mut reader) = reader else {
        return Ok(Captured { bytes, truncated });
    };

    let mut chunk = Zeroizing::new([0u8; 8192]);
    loop {
        let n = reader.read(&mut chunk[..]).await?;
        if n == 0 {
            break;
        }
        // Keep draining past the limit so the child never blocks on a full pipe.
        let room = limit.saturating_sub(bytes.len());
        if n > room {
            truncated = true;
        }
        bytes.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok(Captured { bytes, truncated })
}

fn redact(redactor: &Redactor, captured: &Captured) -> String {
    let redacted = if captured.truncated {
        redactor.redact_truncated(&captured.bytes)
    } else {
        redactor.redact(&captured.bytes)
    };
    String::from_utf8_lossy(&redacted).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_declared_output_lines() {
        let out = "building\n::set-output version=1.2.3\n::set-output artifact=/tmp/a b\r\nnoise";
        let outputs = parse_outputs(out);
        assert_eq!(outputs.get("version").map(String::as_str), Some("1.2.3"));
        assert_eq!(outputs.get("artifact").map(String::as_str), Some("/tmp/a b"));
        assert_eq!(outputs.len(), 2);
    }

    #[test]
    fn later_output_line_wins() {
        let outputs = parse_outputs("::set-output v=1\n::set-output v=2\n");
        assert_eq!(outputs.get("v").map(String::as_str), Some("2"));
    }

    #[test]
    fn ignores_malformed_lines() {
        let outputs = parse_outputs("::set-output =x\n ::set-output a=b\n::set-output 9a=1\n");
        assert!(outputs.is_empty());
    }
}
