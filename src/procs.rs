//! In-pod process enumeration
//!
//! Stages a small Python script into the pod and runs it to snapshot the live
//! processes. The snapshot is best-effort: processes that vanish mid-walk are
//! skipped by the script itself, and any transport failure yields an empty
//! list rather than an error. Callers must treat an empty result as
//! ambiguous; it can mean "no processes" or "listing failed".

use std::io::Write;

use tempfile::NamedTempFile;
use tracing::warn;

use crate::credentials::ClusterCredentials;
use crate::exec::ExecGateway;
use crate::transfer::push_file;
use crate::{Error, Result};

/// Where the enumeration script is staged inside the pod
pub const REMOTE_LIST_PATH: &str = "/podtap_ps.py";

/// The staged script: one line per live process, `<pid> <cmdline>`
///
/// Needs nothing beyond /proc; NUL-joined argv entries are collapsed to
/// spaces.
const LIST_SCRIPT: &str = r#"import os

for pid in os.listdir("/proc"):
    try:
        pid = int(pid)
        with open(os.path.join("/proc", str(pid), "cmdline")) as f:
            cmdline = f.read().replace("\0", " ").strip()
        print(pid, cmdline)
    except Exception:
        pass
"#;

/// List the PIDs and command lines currently running inside the pod
///
/// Returns an empty list on any failure (staging, transport, or a non-zero
/// exit). The failure itself is only traced.
pub async fn list_processes(
    gateway: &ExecGateway,
    credentials: &ClusterCredentials,
    pod: &str,
) -> Vec<(String, String)> {
    match try_list(gateway, credentials, pod).await {
        Ok(processes) => processes,
        Err(e) => {
            warn!(pod = %pod, error = %e, "Process listing failed, returning empty list");
            Vec::new()
        }
    }
}

async fn try_list(
    gateway: &ExecGateway,
    credentials: &ClusterCredentials,
    pod: &str,
) -> Result<Vec<(String, String)>> {
    let mut script = NamedTempFile::with_prefix("podtap_ps_")?;
    script.write_all(LIST_SCRIPT.as_bytes())?;
    script.flush()?;

    push_file(credentials, script.path(), pod, REMOTE_LIST_PATH).await?;

    let argv = vec!["python".to_string(), REMOTE_LIST_PATH.to_string()];
    let output = gateway.exec(credentials, pod, &argv, None).await?;
    if !output.success() {
        return Err(Error::transport(format!(
            "process listing exited with code {}",
            output.exit_code
        )));
    }

    Ok(output
        .stdout_lines
        .iter()
        .map(|line| parse_process_line(line))
        .collect())
}

/// Parse one `<pid> <cmdline>` line, first-space-delimited
///
/// Lines without a space yield an empty command line.
pub fn parse_process_line(line: &str) -> (String, String) {
    match line.split_once(' ') {
        Some((pid, cmdline)) => (pid.to_string(), cmdline.to_string()),
        None => (line.to_string(), String::new()),
    }
}
