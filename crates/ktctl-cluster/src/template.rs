//! Shadow workload templates
//!
//! Builds the three objects that make up a shadow: the public key ConfigMap,
//! the Deployment running the shadow container, and an optional ClusterIP
//! Service in front of it.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, KeyToPath, PodSpec, PodTemplateSpec, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;

use ktctl_common::SSH_AUTH_KEY;

/// Name of the shadow container
pub const SHADOW_CONTAINER_NAME: &str = "standalone";

/// Volume carrying the public key into the shadow container
pub const SSH_KEY_VOLUME: &str = "ssh-public-key";

/// Where the key volume is mounted inside the shadow container
pub const SSH_KEY_MOUNT_PATH: &str = "/root/.ssh";

/// File the public key is projected to inside the mount
pub const AUTHORIZED_KEYS_FILE: &str = "authorized_keys";

/// Container argument switching the shadow into verbose mode
pub const DEBUG_ARG: &str = "--debug";

fn meta(name: &str, namespace: &str, labels: &BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels.clone()),
        ..Default::default()
    }
}

/// ConfigMap holding the shadow's `authorized_keys` content
pub fn public_key_config_map(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    public_key: &str,
) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(SSH_AUTH_KEY.to_string(), public_key.to_string());
    ConfigMap {
        metadata: meta(name, namespace, labels),
        data: Some(data),
        ..Default::default()
    }
}

/// Single-replica shadow Deployment.
///
/// The selector and the pod template share `labels`, so when `labels` carries
/// an origin deployment's selector labels the origin's Service routes to the
/// shadow too. The public key ConfigMap is mounted as `authorized_keys`.
pub fn shadow_deployment(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    image: &str,
    config_map_name: &str,
    debug: bool,
) -> Deployment {
    let args = if debug {
        Some(vec![DEBUG_ARG.to_string()])
    } else {
        None
    };

    Deployment {
        metadata: meta(name, namespace, labels),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: SHADOW_CONTAINER_NAME.to_string(),
                        image: Some(image.to_string()),
                        image_pull_policy: Some("Always".to_string()),
                        args,
                        volume_mounts: Some(vec![VolumeMount {
                            name: SSH_KEY_VOLUME.to_string(),
                            mount_path: SSH_KEY_MOUNT_PATH.to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: SSH_KEY_VOLUME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: config_map_name.to_string(),
                            items: Some(vec![KeyToPath {
                                key: SSH_AUTH_KEY.to_string(),
                                path: AUTHORIZED_KEYS_FILE.to_string(),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ClusterIP Service selecting pods by `labels` on a single TCP port
pub fn shadow_service(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    port: u16,
) -> Service {
    Service {
        metadata: meta(name, namespace, labels),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels.clone()),
            ports: Some(vec![ServicePort {
                name: Some(format!("kt-{}", port)),
                port: port as i32,
                target_port: Some(IntOrString::Int(port as i32)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
