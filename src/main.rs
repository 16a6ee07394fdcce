//! Podtap - attach a Python debugger to a process already running in a Kubernetes pod

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use podtap::credentials::ClusterCredentials;
use podtap::exec::ExecGateway;
use podtap::procs;
use podtap::reference::ResourceReference;
use podtap::resolve::{self, KubeClusterReader};
use podtap::session::{start_session, InjectorConfig};
use podtap::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_EXEC_TIMEOUT_SECS};

/// Podtap - inject a debugger into a process running inside a Kubernetes pod
#[derive(Parser, Debug)]
#[command(name = "podtap", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Cluster connection settings, shared by every subcommand
#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Path to the kubeconfig file (defaults to the standard locations)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long)]
    context: Option<String>,

    /// Namespace the workloads live in
    #[arg(short = 'n', long)]
    namespace: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Attach a debugger to a running process inside a pod
    ///
    /// Installs the debugger package set in the container, starts the debug
    /// tunnel, injects the attach script into the target PID, and then
    /// streams the session's output until it ends or Ctrl-C.
    Attach(AttachArgs),

    /// List the workloads in the namespace as <kind>/<name> strings
    Resources {
        /// Only check whether this reference exists instead of listing
        #[arg(long)]
        check: Option<String>,
    },

    /// List the processes running inside the resolved pod
    Ps {
        /// Workload reference, e.g. deployment/web or a bare pod name
        resource: String,
    },
}

/// Attach mode arguments
#[derive(Args, Debug)]
struct AttachArgs {
    /// Workload reference, e.g. deployment/web or a bare pod name
    resource: String,

    /// PID of the target process inside the container
    #[arg(long, default_value = "1")]
    pid: String,

    /// Shell command that installs the symbolic debugger in the container
    #[arg(long, default_value = "yum -y install gdb")]
    install_command: String,

    /// Debugger package installed alongside the injection helper
    #[arg(long, default_value = "pydevd-pycharm")]
    debugger_package: String,

    /// The target spawns subprocesses that also need debugging
    #[arg(long)]
    multiprocess: bool,

    /// Ceiling for synchronous remote executions, in seconds
    #[arg(long, default_value_t = DEFAULT_EXEC_TIMEOUT_SECS)]
    exec_timeout_secs: u64,

    /// How long to wait for the tunnel to connect back, in seconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let credentials = ClusterCredentials {
        kubeconfig_path: cli.connection.kubeconfig,
        context_name: cli.connection.context,
        namespace_name: cli.connection.namespace,
        resource_name: None,
    };

    match cli.command {
        Commands::Attach(args) => run_attach(credentials, args).await,
        Commands::Resources { check } => run_resources(credentials, check).await,
        Commands::Ps { resource } => run_ps(credentials, resource).await,
    }
}

/// Start a session and stream its output until it ends or Ctrl-C
async fn run_attach(credentials: ClusterCredentials, args: AttachArgs) -> anyhow::Result<()> {
    let client = credentials.client().await?;
    let reader = KubeClusterReader::new(client);
    let gateway = ExecGateway::new(Duration::from_secs(args.exec_timeout_secs));

    let config = InjectorConfig {
        pid: args.pid,
        install_command: args.install_command,
        debugger_package: args.debugger_package,
        resource_name: Some(args.resource),
        multiprocess: args.multiprocess,
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
    };

    let mut session = start_session(&reader, &gateway, &credentials, &config).await?;
    info!(
        pod = %session.pod_name(),
        port = session.local_port(),
        pid = %session.target_pid(),
        "Session started; debug server port is ready for the protocol client"
    );

    let mut stdout = session
        .process_mut()
        .take_stdout()
        .map(|s| tokio::spawn(stream_to_console(s, false)));
    let mut stderr = session
        .process_mut()
        .take_stderr()
        .map(|s| tokio::spawn(stream_to_console(s, true)));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, terminating the session");
        }
        code = session.process_mut().wait() => {
            info!(exit_code = code?, "Session pipeline exited");
        }
    }

    if let Some(task) = stdout.take() {
        task.abort();
    }
    if let Some(task) = stderr.take() {
        task.abort();
    }
    session.terminate().await?;
    Ok(())
}

async fn stream_to_console(
    mut reader: impl tokio::io::AsyncRead + Unpin,
    to_stderr: bool,
) -> std::io::Result<()> {
    if to_stderr {
        tokio::io::copy(&mut reader, &mut tokio::io::stderr()).await?;
    } else {
        tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await?;
    }
    Ok(())
}

/// List workload names for discovery, or check a single reference
async fn run_resources(credentials: ClusterCredentials, check: Option<String>) -> anyhow::Result<()> {
    let client = credentials.client().await?;
    let reader = KubeClusterReader::new(client);

    if let Some(reference) = check {
        let reference = ResourceReference::parse(&reference);
        let exists = resolve::check_resource(&reader, credentials.namespace(), &reference).await?;
        println!("{} {}", reference, if exists { "found" } else { "not found" });
        return Ok(());
    }

    for name in resolve::list_resources(&reader, credentials.namespace()).await? {
        println!("{name}");
    }
    Ok(())
}

/// List the processes inside the resolved pod
async fn run_ps(credentials: ClusterCredentials, resource: String) -> anyhow::Result<()> {
    let client = credentials.client().await?;
    let reader = KubeClusterReader::new(client);
    let gateway = ExecGateway::default();

    let reference = ResourceReference::parse(&resource);
    let pod = resolve::resolve_pod(&reader, credentials.namespace(), &reference).await?;

    for (pid, cmdline) in procs::list_processes(&gateway, &credentials, &pod).await {
        println!("{pid} {cmdline}");
    }
    Ok(())
}
