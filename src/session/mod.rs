//! Debugger injection bootstrapper
//!
//! Drives the five ordered phases that end with a debugger attached to an
//! already-running process in the pod:
//!
//! 1. Install the debugger package set in the container
//! 2. Stage the tunnel relay script (an embedded resource) into the pod
//! 3. Bind a local listener on an ephemeral port, before any address is
//!    embedded into a remote command
//! 4. Generate and stage the attach script (with the multiprocess dispatcher
//!    handshake when the target forks subprocesses)
//! 5. Trigger code injection against the target PID, backgrounded, keeping
//!    the exec channel open as the session's I/O stream
//!
//! Failure at any phase aborts the rest and surfaces a session-start error.

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::command::{compose, CommandPipeline, UNBUFFERED_ENV};
use crate::credentials::ClusterCredentials;
use crate::exec::{ExecGateway, RemoteProcess};
use crate::reference::ResourceReference;
use crate::resolve::{resolve_pod, ClusterReader};
use crate::transfer::push_file;
use crate::{Error, Result, DEFAULT_CONNECT_TIMEOUT_SECS};

/// Where the tunnel relay script is staged inside the pod
pub const REMOTE_TUNNEL_PATH: &str = "/podtap_tunnel.py";

/// Where the attach script is staged inside the pod
pub const REMOTE_ATTACH_PATH: &str = "/podtap_attach.py";

/// The tunnel relay, embedded at build time; runs on both ends of the pipe
const TUNNEL_SCRIPT: &str = include_str!("../../resources/tunnel.py");

/// Caller-supplied settings for one injection session
#[derive(Clone, Debug)]
pub struct InjectorConfig {
    /// PID of the target process inside the container
    pub pid: String,
    /// Shell command that installs the symbolic debugger in the container
    pub install_command: String,
    /// Debugger package installed alongside the injection helper
    pub debugger_package: String,
    /// Overrides the credentials' resource reference when set
    pub resource_name: Option<String>,
    /// Whether the target process spawns subprocesses that also need debugging
    pub multiprocess: bool,
    /// How long to wait for the tunnel to connect back to the local listener
    pub connect_timeout: Duration,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            pid: "1".to_string(),
            install_command: "yum -y install gdb".to_string(),
            debugger_package: "pydevd-pycharm".to_string(),
            resource_name: None,
            multiprocess: false,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl InjectorConfig {
    /// Validate the configuration before any remote call is attempted
    pub fn validate(&self) -> Result<()> {
        match self.pid.parse::<u64>() {
            Ok(pid) if pid > 0 => Ok(()),
            _ => Err(Error::configuration("the PID should be a positive number")),
        }
    }
}

/// A live injection session, owned by the caller
///
/// Holds the local listener the debugger protocol client accepts on and the
/// handle of the backgrounded tunnel+injection pipeline. Dropping the session
/// terminates the local process tree; anything left running remotely is left
/// to the remote shell to reap.
#[derive(Debug)]
pub struct RemoteSession {
    pod_name: String,
    local_port: u16,
    listener: TcpListener,
    process: RemoteProcess,
    target_pid: String,
    connect_timeout: Duration,
    _staged: Vec<NamedTempFile>,
}

impl RemoteSession {
    /// Name of the pod the session is attached to
    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }

    /// Local port the tunnel relays debugger traffic to
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// PID of the process being debugged, inside the container
    pub fn target_pid(&self) -> &str {
        &self.target_pid
    }

    /// Handle of the backgrounded tunnel+injection pipeline
    pub fn process_mut(&mut self) -> &mut RemoteProcess {
        &mut self.process
    }

    /// The configured ceiling for [`accept_debugger`](Self::accept_debugger)
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Wait for the in-pod side of the tunnel to connect back
    ///
    /// The remote may connect at arbitrary delay; past the configured
    /// [`InjectorConfig::connect_timeout`] this fails with
    /// [`Error::ConnectTimeout`], distinct from the exec timeout.
    pub async fn accept_debugger(&self) -> Result<TcpStream> {
        let (stream, peer) = tokio::time::timeout(self.connect_timeout, self.listener.accept())
            .await
            .map_err(|_| Error::ConnectTimeout)??;
        debug!(peer = %peer, "Debugger connection accepted");
        Ok(stream)
    }

    /// Tear the session down, terminating the local process tree
    pub async fn terminate(mut self) -> Result<()> {
        self.process.terminate().await
    }
}

/// Run the full bootstrap and return a live session
///
/// Resolution failures are remapped to [`Error::NoRunningPod`]; staging and
/// install failures abort the remaining phases.
pub async fn start_session<R: ClusterReader + ?Sized>(
    reader: &R,
    gateway: &ExecGateway,
    credentials: &ClusterCredentials,
    config: &InjectorConfig,
) -> Result<RemoteSession> {
    config.validate()?;

    let resource_name = config
        .resource_name
        .as_deref()
        .or(credentials.resource_name.as_deref())
        .ok_or_else(|| Error::configuration("no resource reference configured"))?;

    let reference = ResourceReference::parse(resource_name);
    let pod = resolve_pod(reader, credentials.namespace(), &reference).await?;
    info!(resource = %resource_name, pod = %pod, "Resolved target pod");

    // Phase 1: install the debugger package set in the container.
    install_dependencies(gateway, credentials, &pod, config).await?;

    // Phase 3 before phase 2's command construction: the listener must be
    // bound before its port is embedded into any remote command.
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let local_port = listener.local_addr()?.port();
    info!(port = local_port, "Local debug listener bound");

    // Phase 2: stage the tunnel relay into the pod.
    let tunnel_script = stage_script(TUNNEL_SCRIPT, "podtap_tunnel_")?;
    push_file(credentials, tunnel_script.path(), &pod, REMOTE_TUNNEL_PATH).await?;
    let tunnel_argv = tunnel_command(
        credentials,
        &pod,
        &tunnel_script.path().to_string_lossy(),
        local_port,
    );

    // Phase 4: generate and stage the attach script. A staging failure here
    // is fatal; continuing would leave the target unattached.
    let attach_script = stage_script(
        &render_attach_script(local_port, config.multiprocess),
        "podtap_attach_",
    )?;
    push_file(credentials, attach_script.path(), &pod, REMOTE_ATTACH_PATH).await?;
    info!(multiprocess = config.multiprocess, "Attach script staged");

    // Phase 5: background the tunnel sidecar and trigger the injection. The
    // trailing idle command keeps the exec channel open as the session's
    // I/O stream.
    let main = vec![
        "bash".to_string(),
        "-c".to_string(),
        format!("pyrasite {} {}; sleep infinity", config.pid, REMOTE_ATTACH_PATH),
    ];
    let pipeline = CommandPipeline::with_sidecar(tunnel_argv, main);
    let composed = compose(credentials, &pod, &pipeline)?;
    let process = gateway.spawn(composed)?;
    info!(pid = %config.pid, pod = %pod, "Injection pipeline started");

    Ok(RemoteSession {
        pod_name: pod,
        local_port,
        listener,
        process,
        target_pid: config.pid.clone(),
        connect_timeout: config.connect_timeout,
        _staged: vec![tunnel_script],
    })
}

async fn install_dependencies(
    gateway: &ExecGateway,
    credentials: &ClusterCredentials,
    pod: &str,
    config: &InjectorConfig,
) -> Result<()> {
    let install_line = format!(
        "{}; pip install pyrasite {}",
        config.install_command, config.debugger_package
    );
    info!(pod = %pod, "Installing debugger dependencies");

    let argv = vec!["bash".to_string(), "-c".to_string(), install_line];
    let output = gateway.exec(credentials, pod, &argv, None).await?;
    if !output.success() {
        return Err(Error::transport(format!(
            "dependency installation failed: {}",
            output.stderr.trim()
        )));
    }
    Ok(())
}

/// The local half of the tunnel invocation
///
/// `PYTHONUNBUFFERED=1 python <script> <port> kubectl ... exec <pod> -i --
/// python -u /podtap_tunnel.py`: the relay spawns the trailing kubectl
/// command as its remote half and bridges the two over the exec pipe.
fn tunnel_command(
    credentials: &ClusterCredentials,
    pod: &str,
    local_script: &str,
    local_port: u16,
) -> Vec<String> {
    let mut argv = vec![
        UNBUFFERED_ENV.to_string(),
        "python".to_string(),
        local_script.to_string(),
        local_port.to_string(),
        "kubectl".to_string(),
    ];
    argv.extend(credentials.kubectl_args());
    argv.extend([
        "exec".to_string(),
        pod.to_string(),
        "-i".to_string(),
        "--".to_string(),
        "python".to_string(),
        "-u".to_string(),
        REMOTE_TUNNEL_PATH.to_string(),
    ]);
    argv
}

/// Render the script injected into the target process
///
/// Three fixed statements (disable any existing trace hook, set the port,
/// final attach call), plus the dispatcher handshake when the target is
/// multi-process-aware: connect to the local port, adopt the possibly
/// reassigned port, and patch the process-spawn hooks so child processes
/// get their own debug sessions. Skipping that handshake for a forking
/// target silently loses the child sessions.
fn render_attach_script(port: u16, multiprocess: bool) -> String {
    let mut script = String::new();
    script.push_str("import pydevd_pycharm\n");
    script.push_str("import pydevd\n");
    script.push_str("import traceback\n");
    script.push_str("pydevd.stoptrace()\n");
    script.push_str(&format!("port={}\n", port));

    if multiprocess {
        script.push_str(
            r#"import os
dispatcher = pydevd.Dispatcher()
try:
    dispatcher.connect('127.0.0.1', port)
    if dispatcher.port is not None:
        port = dispatcher.port
        pydevd.pydev_log.debug("Received port %d\n" % port)
        pydevd.pydev_log.debug("pydev debugger: process %d is connecting\n" % os.getpid())
        try:
            pydevd.pydev_monkey.patch_new_process_functions()
        except:
            pydevd.pydev_log.error("Error patching process functions\n")
            traceback.print_exc()
    else:
        pydevd.pydev_log.error("pydev debugger: couldn't get port for new debug process\n")
finally:
   dispatcher.close()
"#,
        );
    }

    script.push_str(
        "pydevd_pycharm.settrace('127.0.0.1', port=port, stdoutToServer=True, stderrToServer=True)\n",
    );
    script
}

fn stage_script(contents: &str, prefix: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::with_prefix(prefix)?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::MockClusterReader;

    /// Story: a non-numeric or non-positive PID never reaches the cluster
    #[test]
    fn story_pid_validation_catches_cheap_mistakes() {
        for bad in ["0", "-3", "abc", ""] {
            let config = InjectorConfig {
                pid: bad.to_string(),
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "pid: {:?}", bad);
        }

        let config = InjectorConfig {
            pid: "4242".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    /// Story: an invalid configuration aborts before any API call
    ///
    /// The mock has no expectations, so any cluster read would panic.
    #[tokio::test]
    async fn story_bootstrap_validates_before_touching_the_cluster() {
        let reader = MockClusterReader::new();
        let gateway = ExecGateway::default();
        let credentials = ClusterCredentials::default();
        let config = InjectorConfig {
            pid: "not-a-pid".to_string(),
            ..Default::default()
        };

        let err = start_session(&reader, &gateway, &credentials, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    /// Story: with no resource reference anywhere, bootstrap refuses early
    #[tokio::test]
    async fn story_missing_resource_is_a_configuration_error() {
        let reader = MockClusterReader::new();
        let gateway = ExecGateway::default();
        let credentials = ClusterCredentials::default();
        let config = InjectorConfig::default();

        let err = start_session(&reader, &gateway, &credentials, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    /// Story: the plain attach script is exactly three statements plus imports
    #[test]
    fn story_single_process_attach_goes_straight_to_settrace() {
        let script = render_attach_script(41143, false);

        assert!(script.contains("pydevd.stoptrace()\n"));
        assert!(script.contains("port=41143\n"));
        assert!(script.ends_with(
            "pydevd_pycharm.settrace('127.0.0.1', port=port, stdoutToServer=True, stderrToServer=True)\n"
        ));
        assert!(!script.contains("Dispatcher"));

        // stoptrace must run before the attach call, not after.
        let stop = script.find("stoptrace").unwrap();
        let attach = script.find("settrace").unwrap();
        assert!(stop < attach);
    }

    /// Story: a multi-process target gets the dispatcher handshake first
    ///
    /// The handshake adopts a possibly-reassigned port and patches the
    /// process-spawn hooks before the final attach call.
    #[test]
    fn story_multiprocess_attach_runs_the_dispatcher_handshake() {
        let script = render_attach_script(41143, true);

        assert!(script.contains("dispatcher.connect('127.0.0.1', port)"));
        assert!(script.contains("patch_new_process_functions"));

        let handshake = script.find("Dispatcher()").unwrap();
        let attach = script.find("settrace").unwrap();
        assert!(handshake < attach);
    }

    /// Story: the tunnel command embeds the listener port and both halves
    ///
    /// The leading env assignment must stay a bare token so the composer
    /// leaves it unquoted.
    #[test]
    fn story_tunnel_command_shape() {
        let credentials = ClusterCredentials {
            context_name: Some("staging".to_string()),
            ..Default::default()
        };

        let argv = tunnel_command(&credentials, "web-abc", "/tmp/podtap_tunnel.py", 41143);
        assert_eq!(
            argv,
            vec![
                "PYTHONUNBUFFERED=1",
                "python",
                "/tmp/podtap_tunnel.py",
                "41143",
                "kubectl",
                "--context",
                "staging",
                "exec",
                "web-abc",
                "-i",
                "--",
                "python",
                "-u",
                "/podtap_tunnel.py",
            ]
        );
    }

    /// Story: the embedded tunnel resource carries both tunnel halves
    #[test]
    fn story_tunnel_resource_is_embedded() {
        assert!(TUNNEL_SCRIPT.contains("is_local"));
        assert!(TUNNEL_SCRIPT.contains("dispatch_loop"));
    }

    /// Story: the configured connect ceiling is what accept enforces
    ///
    /// A session built with a short ceiling times out distinctly when no
    /// tunnel ever connects back, without waiting the default minute.
    #[tokio::test]
    async fn story_accept_uses_the_configured_connect_timeout() {
        use crate::command::ComposedCommand;

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let local_port = listener.local_addr().unwrap().port();
        let process = ExecGateway::default()
            .spawn(ComposedCommand::local("sleep", vec!["30".to_string()]))
            .unwrap();

        let session = RemoteSession {
            pod_name: "web-abc".to_string(),
            local_port,
            listener,
            process,
            target_pid: "17".to_string(),
            connect_timeout: Duration::from_millis(50),
            _staged: Vec::new(),
        };
        assert_eq!(session.connect_timeout(), Duration::from_millis(50));

        let err = session.accept_debugger().await.unwrap_err();
        assert!(matches!(err, Error::ConnectTimeout));
        session.terminate().await.unwrap();
    }

    /// Story: the connect ceiling defaults to a minute, separately from the
    /// five-minute exec ceiling
    #[test]
    fn story_connect_timeout_default_is_distinct_from_exec() {
        let config = InjectorConfig::default();
        assert_eq!(
            config.connect_timeout,
            Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)
        );
        assert_ne!(config.connect_timeout, ExecGateway::default().timeout());
    }
}
