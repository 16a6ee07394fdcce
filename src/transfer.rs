//! File push into the remote container
//!
//! Thin wrapper over `kubectl cp`, used to stage generated scripts into the
//! pod. A failed copy surfaces as a transport error with no structured
//! detail; partial copies are not cleaned up and retries are the caller's
//! decision.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::credentials::ClusterCredentials;
use crate::{Error, Result};

/// Arguments of the `kubectl ... cp <local> <pod>:<remote>` invocation
pub fn cp_args(
    credentials: &ClusterCredentials,
    local: &Path,
    pod: &str,
    remote: &str,
) -> Vec<String> {
    let mut args = credentials.kubectl_args();
    args.push("cp".to_string());
    args.push(local.to_string_lossy().to_string());
    args.push(format!("{}:{}", pod, remote));
    args
}

/// Copy a local file into the remote container's filesystem
pub async fn push_file(
    credentials: &ClusterCredentials,
    local: &Path,
    pod: &str,
    remote: &str,
) -> Result<()> {
    let args = cp_args(credentials, local, pod, remote);
    debug!(pod = %pod, remote = %remote, "Copying file into pod");

    let output = Command::new("kubectl")
        .args(&args)
        .output()
        .await
        .map_err(|e| Error::transport(format!("failed to run kubectl cp: {}", e)))?;

    if output.status.success() {
        Ok(())
    } else {
        debug!(
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "kubectl cp failed"
        );
        Err(Error::transport(format!(
            "copy to {}:{} failed",
            pod, remote
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Story: the copy invocation carries the connection flags and the
    /// pod-qualified destination
    #[test]
    fn story_cp_invocation_shape() {
        let credentials = ClusterCredentials {
            namespace_name: Some("payments".to_string()),
            ..Default::default()
        };

        let args = cp_args(
            &credentials,
            &PathBuf::from("/tmp/podtap_attach.py"),
            "web-abc",
            "/podtap_attach.py",
        );
        assert_eq!(
            args,
            vec![
                "-n",
                "payments",
                "cp",
                "/tmp/podtap_attach.py",
                "web-abc:/podtap_attach.py",
            ]
        );
    }

    /// Story: no flags, no noise
    #[test]
    fn story_cp_invocation_without_credentials() {
        let args = cp_args(
            &ClusterCredentials::default(),
            &PathBuf::from("tunnel.py"),
            "pod",
            "/podtap_tunnel.py",
        );
        assert_eq!(args, vec!["cp", "tunnel.py", "pod:/podtap_tunnel.py"]);
    }

    /// Story: pushing the same file twice issues the identical invocation
    ///
    /// A recording shim stands in for the real binary. The copy keeps no
    /// state between calls, so re-staging after an aborted session repeats
    /// the same command rather than drifting.
    #[tokio::test]
    async fn story_repeated_push_issues_the_same_invocation() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("invocations");
        let shim = dir.path().join("kubectl");
        std::fs::write(
            &shim,
            format!("#!/bin/sh\nprintf '%s\\n' \"$*\" >> '{}'\n", log.display()),
        )
        .unwrap();
        std::fs::set_permissions(&shim, std::fs::Permissions::from_mode(0o755)).unwrap();

        let script = dir.path().join("attach.py");
        std::fs::write(&script, "pass\n").unwrap();

        let original_path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var(
            "PATH",
            format!("{}:{}", dir.path().display(), original_path),
        );

        let credentials = ClusterCredentials {
            namespace_name: Some("payments".to_string()),
            ..Default::default()
        };
        let first = push_file(&credentials, &script, "web-abc", "/podtap_attach.py").await;
        let second = push_file(&credentials, &script, "web-abc", "/podtap_attach.py").await;
        std::env::set_var("PATH", original_path);
        first.unwrap();
        second.unwrap();

        let recorded = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = recorded.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], lines[1]);
        assert!(lines[0].ends_with("web-abc:/podtap_attach.py"));
    }
}
