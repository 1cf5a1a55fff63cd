//! Run and connect session stories

use std::sync::{Arc, Mutex};

use ktctl::commands::connect::{self, ConnectArgs, CONNECT_DAEMON_PREFIX};
use ktctl::commands::run::{self, RunArgs};
use ktctl::hosts::HOSTS_MARKER;

use super::fake::{FakeCluster, Harness};

/// Story: `run --expose` publishes a local port as a Service that disappears
/// with the session
#[tokio::test]
async fn story_run_exposes_service_for_the_session() {
    let home = tempfile::tempdir().unwrap();
    let cluster = FakeCluster::new();
    let harness = Harness::new(cluster.clone(), home.path());

    let had_service = Arc::new(Mutex::new(false));
    let sink = had_service.clone();
    let watch_cluster = cluster.clone();
    harness.tunnel.on_established(move || {
        *sink.lock().unwrap() = watch_cluster.has_service("tomcat", "default");
    });

    let report = run::run(
        &harness.ctx,
        RunArgs {
            name: Some("tomcat".to_string()),
            port: Some(8080),
            expose: true,
        },
    )
    .await
    .unwrap();

    assert!(*had_service.lock().unwrap());
    let seen = harness.tunnel.observation().unwrap();
    assert_eq!(seen.deployments, vec!["tomcat".to_string()]);
    assert_eq!(seen.expose.map(|e| (e.remote, e.local)), Some((8080, 8080)));

    assert!(report.is_clean(), "failures: {:?}", report.failures());
    assert!(!cluster.has_service("tomcat", "default"));
    assert!(cluster.deployment_names("default").is_empty());
    assert!(cluster.config_map_names("default").is_empty());
}

/// Story: `run` without `--expose` creates no Service
#[tokio::test]
async fn story_run_without_expose_skips_service() {
    let home = tempfile::tempdir().unwrap();
    let cluster = FakeCluster::new();
    let harness = Harness::new(cluster.clone(), home.path());

    let had_service = Arc::new(Mutex::new(true));
    let sink = had_service.clone();
    let watch_cluster = cluster.clone();
    harness.tunnel.on_established(move || {
        *sink.lock().unwrap() = watch_cluster.has_service("tomcat", "default");
    });

    run::run(
        &harness.ctx,
        RunArgs {
            name: Some("tomcat".to_string()),
            port: Some(8080),
            expose: false,
        },
    )
    .await
    .unwrap();

    assert!(!*had_service.lock().unwrap());
}

/// Story: `connect --dump2hosts` routes the cluster ranges, writes service
/// hosts and a PID file, and removes both afterwards
#[tokio::test]
async fn story_connect_routes_cluster_ranges_and_cleans_local_files() {
    let home = tempfile::tempdir().unwrap();
    let hosts_file = home.path().join("hosts");
    std::fs::write(&hosts_file, "127.0.0.1 localhost\n").unwrap();

    let cluster = FakeCluster::new();
    cluster.add_node("node-a", Some("10.244.0.0/24"));
    cluster.add_node("node-b", Some("10.244.1.0/24"));
    cluster.add_service("kubernetes", "default", "10.96.0.1");
    cluster.add_service("redis", "default", "10.96.12.7");
    cluster.add_service("coredns", "kube-system", "10.96.0.10");
    let harness = Harness::new(cluster.clone(), home.path());

    let pid_file = harness.ctx.settings.pid_file();
    let during = Arc::new(Mutex::new((false, String::new())));
    let sink = during.clone();
    let watch_pid = pid_file.clone();
    let watch_hosts = hosts_file.clone();
    harness.tunnel.on_established(move || {
        *sink.lock().unwrap() = (
            watch_pid.exists(),
            std::fs::read_to_string(&watch_hosts).unwrap_or_default(),
        );
    });

    let report = connect::run(
        &harness.ctx,
        ConnectArgs {
            cidr: String::new(),
            dump2hosts: true,
        },
    )
    .await
    .unwrap();

    let seen = harness.tunnel.observation().unwrap();
    assert_eq!(seen.direction, "outbound");
    assert!(seen.cidrs.contains(&"10.244.0.0/24".to_string()));
    assert!(seen.cidrs.contains(&"10.244.1.0/24".to_string()));
    assert!(seen.cidrs.contains(&"10.96.0.0/16".to_string()));
    assert!(seen
        .deployments
        .iter()
        .any(|d| d.starts_with(CONNECT_DAEMON_PREFIX)));

    let (pid_existed, hosts_during) = during.lock().unwrap().clone();
    assert!(pid_existed);
    assert!(hosts_during.contains(&format!("10.96.12.7 redis {}", HOSTS_MARKER)));
    assert!(!hosts_during.contains("coredns"));

    assert!(report.is_clean(), "failures: {:?}", report.failures());
    assert!(!pid_file.exists());
    assert_eq!(
        std::fs::read_to_string(&hosts_file).unwrap().trim_end(),
        "127.0.0.1 localhost"
    );
    assert!(cluster.deployment_names("default").is_empty());
}

/// Story: nodes without a pod CIDR fall back to `--cidr`
#[tokio::test]
async fn story_connect_uses_cidr_flag_for_nodes_without_pod_cidr() {
    let home = tempfile::tempdir().unwrap();
    let cluster = FakeCluster::new();
    cluster.add_node("node-a", None);
    cluster.add_service("kubernetes", "default", "10.96.0.1");
    let harness = Harness::new(cluster.clone(), home.path());

    connect::run(
        &harness.ctx,
        ConnectArgs {
            cidr: "172.16.0.0/16".to_string(),
            dump2hosts: false,
        },
    )
    .await
    .unwrap();

    let seen = harness.tunnel.observation().unwrap();
    assert_eq!(
        seen.cidrs,
        vec!["172.16.0.0/16".to_string(), "10.96.0.0/16".to_string()]
    );
    assert!(!home.path().join("hosts").exists());
}
