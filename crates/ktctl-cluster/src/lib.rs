//! Kubernetes capability layer for ktctl
//!
//! All orchestration-API access goes through the [`client::ClusterClient`]
//! trait. Everything else in this crate (readiness waits, shadow
//! provisioning, scaling, network range discovery) is written against that
//! trait, so it runs unchanged against the kube-rs adapter or a test double.
//!
//! # Modules
//!
//! - [`client`] - `ClusterClient` capability trait and kube-rs adapter
//! - [`template`] - Shadow Deployment and Service templates
//! - [`scale`] - Replica count updates
//! - [`readiness`] - Wait for a shadow pod to reach `Running`
//! - [`shadow`] - Stand up a shadow workload end to end
//! - [`network`] - Routable CIDR aggregation and service host discovery

#![deny(missing_docs)]

pub mod client;
pub mod network;
pub mod readiness;
pub mod scale;
pub mod shadow;
pub mod template;

pub use client::{ClusterClient, KubeClusterClient, PodCache};
pub use ktctl_common::{Error, Result};
