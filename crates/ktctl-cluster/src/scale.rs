//! Deployment replica updates
//!
//! Scaling re-issues the full Deployment with `spec.replicas` changed. There
//! is no retry: a resource-version conflict is returned to the caller as
//! `Error::Conflict`.

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::{error, info};

use crate::client::ClusterClient;
use ktctl_common::Error;

/// Set `deployment`'s replica count and push the update.
///
/// Returns the server's view of the updated Deployment.
pub async fn scale(
    client: &dyn ClusterClient,
    mut deployment: Deployment,
    replicas: i32,
) -> Result<Deployment, Error> {
    let name = deployment.name_any();
    info!(deployment = %name, replicas, "Scaling deployment");

    deployment.spec.get_or_insert_with(Default::default).replicas = Some(replicas);

    match client.replace_deployment(&deployment).await {
        Ok(updated) => {
            let applied = updated.spec.as_ref().and_then(|s| s.replicas);
            info!(
                deployment = %updated.name_any(),
                replicas = ?applied,
                "Deployment scaled"
            );
            Ok(updated)
        }
        Err(e) => {
            error!(deployment = %name, replicas, error = %e, "Failed to scale deployment");
            Err(e)
        }
    }
}

/// Fetch a deployment by name and scale it to `replicas`.
pub async fn scale_to(
    client: &dyn ClusterClient,
    name: &str,
    namespace: &str,
    replicas: i32,
) -> Result<Deployment, Error> {
    let deployment = client.get_deployment(name, namespace).await?;
    scale(client, deployment, replicas).await
}

/// Replica count declared on a deployment; Kubernetes defaults an unset
/// count to 1.
pub fn declared_replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}
