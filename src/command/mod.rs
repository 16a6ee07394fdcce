//! Command pipeline composition
//!
//! A pipeline mixes segments that run on the local machine ("sidecar") with a
//! segment that runs inside the remote container ("main"). The composer turns
//! a pipeline into one concrete spawnable command:
//!
//! - no sidecar: the main segment is wrapped with `kubectl ... exec <pod> -i --`
//!   and spawned directly
//! - with sidecar: a shell script is generated that backgrounds the sidecar
//!   line (`&`) and then runs the wrapped main segment; the script itself is
//!   the spawned process
//!
//! Either way the caller gets exactly one process handle to track.

use std::io::Write;

use tempfile::NamedTempFile;

use crate::credentials::ClusterCredentials;
use crate::{Error, Result};

/// Literal separator between sidecar steps, kept unquoted so it stays shell syntax
pub const SEPARATOR: &str = ";";

/// Environment assignment kept unquoted so it applies to the sidecar process
pub const UNBUFFERED_ENV: &str = "PYTHONUNBUFFERED=1";

/// One segment of a pipeline, tagged by where it runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// Runs on the local machine
    Local(Vec<String>),
    /// Runs inside the remote container
    Remote(Vec<String>),
}

/// An ordered pipeline: at most one local sidecar, then exactly one remote main
#[derive(Clone, Debug)]
pub struct CommandPipeline {
    sidecar: Option<Vec<String>>,
    main: Vec<String>,
}

impl CommandPipeline {
    /// A pure remote execution with no sidecar
    pub fn remote(main: Vec<String>) -> Self {
        Self {
            sidecar: None,
            main,
        }
    }

    /// A remote execution preceded by a backgrounded local sidecar
    pub fn with_sidecar(sidecar: Vec<String>, main: Vec<String>) -> Self {
        Self {
            sidecar: Some(sidecar),
            main,
        }
    }

    /// Build a pipeline from tagged segments
    ///
    /// Local segments are concatenated with [`SEPARATOR`] tokens between them
    /// so they execute as one shell line. Exactly one trailing remote segment
    /// is required.
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self> {
        let mut sidecar: Vec<String> = Vec::new();
        let mut main = None;

        for segment in segments {
            match segment {
                Segment::Local(argv) => {
                    if main.is_some() {
                        return Err(Error::configuration(
                            "local segments must precede the remote segment",
                        ));
                    }
                    if !sidecar.is_empty() {
                        sidecar.push(SEPARATOR.to_string());
                    }
                    sidecar.extend(argv);
                }
                Segment::Remote(argv) => {
                    if main.is_some() {
                        return Err(Error::configuration(
                            "a pipeline holds exactly one remote segment",
                        ));
                    }
                    main = Some(argv);
                }
            }
        }

        let main = main
            .ok_or_else(|| Error::configuration("a pipeline holds exactly one remote segment"))?;
        Ok(Self {
            sidecar: (!sidecar.is_empty()).then_some(sidecar),
            main,
        })
    }

    /// The local sidecar tokens, if any
    pub fn sidecar(&self) -> Option<&[String]> {
        self.sidecar.as_deref()
    }

    /// The remote main argv
    pub fn main(&self) -> &[String] {
        &self.main
    }
}

/// A concrete command ready to spawn
///
/// Holds the generated sidecar script (if any) alive for as long as the
/// spawned process may read it.
#[derive(Debug)]
pub struct ComposedCommand {
    /// Program to spawn
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    script: Option<NamedTempFile>,
}

impl ComposedCommand {
    /// A plain local command, used for locally-run helpers
    pub fn local(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            script: None,
        }
    }

    /// Take ownership of the backing script file, if one was generated
    pub(crate) fn take_script(&mut self) -> Option<NamedTempFile> {
        self.script.take()
    }
}

/// The `kubectl ... exec <pod> -i -- <argv>` wrapper for a remote argv
pub fn kubectl_exec_args(
    credentials: &ClusterCredentials,
    pod: &str,
    argv: &[String],
) -> Vec<String> {
    let mut args = vec!["kubectl".to_string()];
    args.extend(credentials.kubectl_args());
    args.push("exec".to_string());
    args.push(pod.to_string());
    args.push("-i".to_string());
    args.push("--".to_string());
    args.extend(argv.iter().cloned());
    args
}

/// Turn a pipeline into one spawnable command
pub fn compose(
    credentials: &ClusterCredentials,
    pod: &str,
    pipeline: &CommandPipeline,
) -> Result<ComposedCommand> {
    match pipeline.sidecar() {
        None => {
            let mut args = kubectl_exec_args(credentials, pod, pipeline.main());
            let program = args.remove(0);
            Ok(ComposedCommand {
                program,
                args,
                script: None,
            })
        }
        Some(sidecar) => {
            let text = render_script(credentials, pod, sidecar, pipeline.main());
            let mut script = NamedTempFile::with_prefix("podtap_pipeline_")?;
            script.write_all(text.as_bytes())?;
            script.flush()?;
            let path = script.path().to_string_lossy().to_string();
            Ok(ComposedCommand {
                program: "bash".to_string(),
                args: vec![path],
                script: Some(script),
            })
        }
    }
}

/// Render the sidecar+main shell script
///
/// Every sidecar token is single-quoted except the two literal tokens
/// [`SEPARATOR`] and [`UNBUFFERED_ENV`], which must stay real shell syntax.
/// The sidecar line is backgrounded with `&`; the second line wraps the main
/// segment with the kubectl exec prefix, quoting only the remote argv.
pub fn render_script(
    credentials: &ClusterCredentials,
    pod: &str,
    sidecar: &[String],
    main: &[String],
) -> String {
    let mut script = String::new();

    for token in sidecar {
        if token == SEPARATOR || token == UNBUFFERED_ENV {
            script.push_str(token);
        } else {
            script.push_str(&quote(token));
        }
        script.push(' ');
    }
    script.push_str("&\n");

    let mut prefix = vec!["kubectl".to_string()];
    prefix.extend(credentials.kubectl_args());
    prefix.push("exec".to_string());
    prefix.push(pod.to_string());
    prefix.push("-i".to_string());
    prefix.push("--".to_string());
    script.push_str(&prefix.join(" "));
    script.push(' ');

    for token in main {
        script.push_str(&quote(token));
        script.push(' ');
    }

    script
}

fn quote(token: &str) -> String {
    format!("'{}'", token)
}
