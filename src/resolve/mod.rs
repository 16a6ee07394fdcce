//! Resource resolution
//!
//! Walks the ownership chain from a workload reference down to one concrete
//! running pod: deployment -> newest owned replica set -> newest owned pod.
//! Resolution is read-only and recomputed on every call; pods are ephemeral
//! and may be replaced between calls, so caching a result is never safe.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::reference::ResourceReference;
use crate::{Error, Result};

/// The metadata slice of a cluster resource that resolution needs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceMeta {
    /// Resource name
    pub name: String,
    /// Creation timestamp, if the API server reported one
    pub created: Option<Time>,
    /// Names of the resources this one is owned by
    pub owners: Vec<String>,
}

/// Read-only view of the workloads in a namespace
///
/// This trait abstracts the Kubernetes API reads for testability; the real
/// implementation is [`KubeClusterReader`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// List all pods in the namespace
    async fn list_pods(&self, namespace: &str) -> Result<Vec<ResourceMeta>>;

    /// List all replica sets in the namespace
    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ResourceMeta>>;

    /// List all deployments in the namespace
    async fn list_deployments(&self, namespace: &str) -> Result<Vec<ResourceMeta>>;

    /// Whether a pod with this exact name exists
    async fn pod_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Whether a deployment with this exact name exists
    async fn deployment_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Whether a replica set with this exact name exists
    async fn replica_set_exists(&self, namespace: &str, name: &str) -> Result<bool>;
}

/// Resolve a reference to the name of one running pod
///
/// A bare pod reference is returned as-is without any API call; existence is
/// verified lazily by the caller attempting to exec into it. Deployments
/// resolve through their newest replica set, replica sets through their
/// newest pod. No match yields [`Error::NoRunningPod`].
pub async fn resolve_pod<R: ClusterReader + ?Sized>(
    reader: &R,
    namespace: &str,
    reference: &ResourceReference,
) -> Result<String> {
    match reference {
        ResourceReference::Pod(name) => Ok(name.clone()),
        ResourceReference::Deployment(name) => {
            let replica_sets = reader.list_replica_sets(namespace).await?;
            let replica_set = newest_owned(&replica_sets, name).ok_or(Error::NoRunningPod)?;
            debug!(deployment = %name, replica_set = %replica_set, "Resolved deployment to replica set");
            resolve_replica_set(reader, namespace, &replica_set).await
        }
        ResourceReference::ReplicaSet(name) => resolve_replica_set(reader, namespace, name).await,
        ResourceReference::Unrecognized(_) => Err(Error::NoRunningPod),
    }
}

async fn resolve_replica_set<R: ClusterReader + ?Sized>(
    reader: &R,
    namespace: &str,
    replica_set: &str,
) -> Result<String> {
    let pods = reader.list_pods(namespace).await?;
    let pod = newest_owned(&pods, replica_set).ok_or(Error::NoRunningPod)?;
    debug!(replica_set = %replica_set, pod = %pod, "Resolved replica set to pod");
    Ok(pod)
}

/// Pick the most recently created resource owned by `owner`
///
/// Ties on the creation timestamp keep the first-seen candidate, so the
/// outcome is a documented policy rather than map iteration order.
fn newest_owned(items: &[ResourceMeta], owner: &str) -> Option<String> {
    let created = |item: &ResourceMeta| item.created.as_ref().map(|t| t.0);
    let mut best: Option<&ResourceMeta> = None;

    for item in items {
        if !item.owners.iter().any(|o| o == owner) {
            continue;
        }
        match best {
            Some(current) if created(item) <= created(current) => {}
            _ => best = Some(item),
        }
    }

    best.map(|item| item.name.clone())
}

/// Cheap existence check for a reference, used for validation
///
/// A direct get-by-name against the matching resource group; "not found"
/// is `false`, never an error. Unrecognized references are `false`.
pub async fn check_resource<R: ClusterReader + ?Sized>(
    reader: &R,
    namespace: &str,
    reference: &ResourceReference,
) -> Result<bool> {
    match reference {
        ResourceReference::Pod(name) => reader.pod_exists(namespace, name).await,
        ResourceReference::Deployment(name) => reader.deployment_exists(namespace, name).await,
        ResourceReference::ReplicaSet(name) => reader.replica_set_exists(namespace, name).await,
        ResourceReference::Unrecognized(_) => Ok(false),
    }
}

/// Enumerate all workloads in the namespace as `<kind>/<name>` strings
///
/// Used to populate discovery UIs. Kind prefixes are exactly `deployment/`,
/// `replicaset/`, and `pod/`, in that order.
pub async fn list_resources<R: ClusterReader + ?Sized>(
    reader: &R,
    namespace: &str,
) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for deployment in reader.list_deployments(namespace).await? {
        names.push(format!("deployment/{}", deployment.name));
    }
    for replica_set in reader.list_replica_sets(namespace).await? {
        names.push(format!("replicaset/{}", replica_set.name));
    }
    for pod in reader.list_pods(namespace).await? {
        names.push(format!("pod/{}", pod.name));
    }

    Ok(names)
}

// =============================================================================
// Real Implementation
// =============================================================================

/// [`ClusterReader`] backed by the typed Kubernetes API client
#[derive(Clone)]
pub struct KubeClusterReader {
    client: Client,
}

impl KubeClusterReader {
    /// Create a reader over an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_meta<K>(resource: &K) -> ResourceMeta
where
    K: kube::Resource<DynamicType = ()>,
{
    let meta = resource.meta();
    ResourceMeta {
        name: resource.name_any(),
        created: meta.creation_timestamp.clone(),
        owners: meta
            .owner_references
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|owner| owner.name.clone())
            .collect(),
    }
}

#[async_trait]
impl ClusterReader for KubeClusterReader {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<ResourceMeta>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default()).await?;
        Ok(pods.items.iter().map(to_meta).collect())
    }

    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ResourceMeta>> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let replica_sets = api.list(&ListParams::default()).await?;
        Ok(replica_sets.items.iter().map(to_meta).collect())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<ResourceMeta>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployments = api.list(&ListParams::default()).await?;
        Ok(deployments.items.iter().map(to_meta).collect())
    }

    async fn pod_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn deployment_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn replica_set_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }
}
