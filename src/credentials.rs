//! Cluster connection settings
//!
//! [`ClusterCredentials`] is the single value threaded through every component
//! that talks to the cluster, either through the typed API client or through
//! `kubectl`. It is supplied by the caller (UI/config layers are out of scope)
//! and never read from ambient process state.

use std::path::PathBuf;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::{Error, Result, DEFAULT_NAMESPACE};

/// Connection settings for one Kubernetes cluster
///
/// Every field is optional; unset fields fall back to kubectl's and the API
/// client's own defaults rather than being passed as empty flags.
#[derive(Clone, Debug, Default)]
pub struct ClusterCredentials {
    /// Path to the kubeconfig file (defaults to the standard locations)
    pub kubeconfig_path: Option<PathBuf>,
    /// Kubeconfig context to use
    pub context_name: Option<String>,
    /// Namespace the workloads live in (defaults to `"default"`)
    pub namespace_name: Option<String>,
    /// Default workload reference for sessions, e.g. `deployment/web`
    pub resource_name: Option<String>,
}

impl ClusterCredentials {
    /// The effective namespace for API calls
    pub fn namespace(&self) -> &str {
        self.namespace_name.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Connection flags for a `kubectl` invocation
    ///
    /// Flags are omitted entirely (not passed empty) when the corresponding
    /// field is unset.
    pub fn kubectl_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(path) = &self.kubeconfig_path {
            args.push("--kubeconfig".to_string());
            args.push(path.to_string_lossy().to_string());
        }

        if let Some(context) = &self.context_name {
            args.push("--context".to_string());
            args.push(context.clone());
        }

        if let Some(namespace) = &self.namespace_name {
            args.push("-n".to_string());
            args.push(namespace.clone());
        }

        args
    }

    /// Build a typed API client from these credentials
    ///
    /// The client is constructed directly from the credentials value; no
    /// process-wide properties or environment variables are mutated.
    pub async fn client(&self) -> Result<Client> {
        let kubeconfig = match &self.kubeconfig_path {
            Some(path) => Kubeconfig::read_from(path),
            None => Kubeconfig::read(),
        }
        .map_err(|e| Error::configuration(format!("failed to load kubeconfig: {}", e)))?;

        let options = KubeConfigOptions {
            context: self.context_name.clone(),
            cluster: None,
            user: None,
        };

        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| Error::configuration(format!("failed to build cluster config: {}", e)))?;
        config.default_namespace = self.namespace().to_string();

        Client::try_from(config).map_err(Error::Kube)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: unset credential fields produce no kubectl flags at all
    ///
    /// `kubectl --kubeconfig ""` would be an error, so unset means absent.
    #[test]
    fn story_empty_credentials_yield_no_flags() {
        let credentials = ClusterCredentials::default();
        assert!(credentials.kubectl_args().is_empty());
        assert_eq!(credentials.namespace(), "default");
    }

    /// Story: every set field maps to its kubectl flag, in a stable order
    #[test]
    fn story_full_credentials_yield_all_flags() {
        let credentials = ClusterCredentials {
            kubeconfig_path: Some(PathBuf::from("/home/dev/.kube/config")),
            context_name: Some("staging".to_string()),
            namespace_name: Some("payments".to_string()),
            resource_name: Some("deployment/web".to_string()),
        };

        assert_eq!(
            credentials.kubectl_args(),
            vec![
                "--kubeconfig",
                "/home/dev/.kube/config",
                "--context",
                "staging",
                "-n",
                "payments",
            ]
        );
        assert_eq!(credentials.namespace(), "payments");
    }

    /// Story: a partial configuration only carries what was set
    #[test]
    fn story_partial_credentials_skip_unset_flags() {
        let credentials = ClusterCredentials {
            namespace_name: Some("payments".to_string()),
            ..Default::default()
        };

        assert_eq!(credentials.kubectl_args(), vec!["-n", "payments"]);
    }
}
