//! Routable CIDR aggregation and service host discovery
//!
//! The outbound tunnel needs the cluster's pod ranges plus one range covering
//! every Service cluster IP. Pod ranges come from node `spec.podCIDR`; the
//! service range is the /16 shared by all IPv4 cluster IPs. Layouts that
//! can't be covered by a single /16 are rejected rather than approximated.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use k8s_openapi::api::core::v1::{Node, Service};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::client::ClusterClient;
use ktctl_common::Error;

/// Cluster IP value of headless services
const HEADLESS_CLUSTER_IP: &str = "None";

/// All routable ranges for the cluster: pod ranges, then the service range.
///
/// `pod_cidr_fallback` stands in for nodes that don't advertise a pod CIDR;
/// an empty fallback adds nothing for them. The result holds no duplicates.
pub async fn cluster_cidrs(
    client: &dyn ClusterClient,
    pod_cidr_fallback: &str,
) -> Result<Vec<String>, Error> {
    let services = client.list_all_services().await?;
    let nodes = client.list_nodes().await?;

    let mut cidrs = pod_cidrs(&nodes, pod_cidr_fallback);
    cidrs.extend(service_cidr(&services)?);
    let cidrs = dedup(cidrs);

    info!(cidrs = ?cidrs, "Resolved cluster ranges");
    Ok(cidrs)
}

/// Pod ranges advertised by nodes, deduplicated in node order.
pub fn pod_cidrs(nodes: &[Node], fallback: &str) -> Vec<String> {
    let ranges = nodes.iter().filter_map(|node| {
        let advertised = node
            .spec
            .as_ref()
            .and_then(|s| s.pod_cidr.as_deref())
            .filter(|c| !c.is_empty());
        match advertised {
            Some(cidr) => Some(cidr.to_string()),
            None if !fallback.is_empty() => {
                debug!(node = %node.name_any(), fallback = %fallback, "Node has no pod CIDR, using fallback");
                Some(fallback.to_string())
            }
            None => None,
        }
    });
    dedup(ranges)
}

/// Single range covering every IPv4 service cluster IP.
///
/// Headless and IPv6 services are ignored. No services yields no range; IPs
/// spanning more than one /16 fail with `UnsupportedNetwork`.
pub fn service_cidr(services: &[Service]) -> Result<Vec<String>, Error> {
    let ips: Vec<Ipv4Addr> = services
        .iter()
        .filter_map(|svc| svc.spec.as_ref()?.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != HEADLESS_CLUSTER_IP)
        .filter_map(|ip| ip.parse::<Ipv4Addr>().ok())
        .collect();

    let Some(first) = ips.first() else {
        return Ok(Vec::new());
    };
    let [a, b, _, _] = first.octets();

    if let Some(outlier) = ips.iter().find(|ip| {
        let [x, y, _, _] = ip.octets();
        (x, y) != (a, b)
    }) {
        return Err(Error::unsupported_network(format!(
            "service cluster IPs {} and {} do not share a /16",
            first, outlier
        )));
    }

    Ok(vec![format!("{}.{}.0.0/16", a, b)])
}

/// Service name to cluster IP for every Service in `namespace`.
///
/// Used only for hosts-file hints, so a failed lookup degrades to an empty
/// map instead of an error.
pub async fn service_hosts(client: &dyn ClusterClient, namespace: &str) -> BTreeMap<String, String> {
    match client.list_services(namespace).await {
        Ok(services) => services
            .iter()
            .filter_map(|svc| {
                let ip = svc.spec.as_ref()?.cluster_ip.clone()?;
                if ip.is_empty() || ip == HEADLESS_CLUSTER_IP {
                    return None;
                }
                Some((svc.name_any(), ip))
            })
            .collect(),
        Err(e) => {
            warn!(namespace = %namespace, error = %e, "Failed to list services for hosts");
            BTreeMap::new()
        }
    }
}

fn dedup(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
