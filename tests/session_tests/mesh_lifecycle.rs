//! Mesh session stories
//!
//! A developer meshes `checkout` in `default`. While the tunnel is up the
//! cluster holds the shadow and its key ConfigMap; once the session ends
//! nothing ktctl created is left behind and the origin is untouched.

use std::time::Duration;

use ktctl::commands::mesh::{self, MeshArgs, ISTIO_PROVIDER};
use ktctl::Error;
use ktctl_common::labels::{LABEL_COMPONENT, LABEL_KT};

use super::fake::{FakeCluster, Harness};

fn mesh_args(target: &str) -> MeshArgs {
    MeshArgs {
        target: Some(target.to_string()),
        expose: Some("8080".to_string()),
        auto_inject: false,
        provider: ISTIO_PROVIDER.to_string(),
    }
}

fn checkout_cluster() -> std::sync::Arc<FakeCluster> {
    let cluster = FakeCluster::new();
    cluster.add_deployment("checkout", "default", 2, &[("app", "checkout"), ("env", "prod")]);
    cluster
}

/// Story: a mesh session provisions a shadow next to the origin and removes
/// it again on Ctrl+C
#[tokio::test]
async fn story_mesh_session_provisions_and_cleans_up() {
    let home = tempfile::tempdir().unwrap();
    let cluster = checkout_cluster();
    let harness = Harness::new(cluster.clone(), home.path());

    let report = mesh::run(&harness.ctx, mesh_args("checkout")).await.unwrap();

    // While the tunnel was up
    let seen = harness.tunnel.observation().expect("tunnel was established");
    assert_eq!(seen.direction, "inbound");
    assert!(seen.private_key_existed);
    assert!(seen.private_key_path.starts_with(home.path()));

    let shadow = seen
        .deployments
        .iter()
        .find(|d| d.starts_with("checkout-kt-"))
        .expect("shadow deployment existed")
        .clone();
    let version = shadow.trim_start_matches("checkout-kt-").to_string();
    assert_eq!(version.len(), 5);
    assert_eq!(
        seen.config_maps,
        vec![format!("kt-mesh-public-key-{}", version)]
    );
    assert!(seen.pod_name.starts_with(&shadow));
    assert_eq!(seen.expose.map(|e| (e.remote, e.local)), Some((8080, 8080)));

    // After the session
    assert!(report.is_clean(), "failures: {:?}", report.failures());
    assert_eq!(cluster.deployment_names("default"), vec!["checkout".to_string()]);
    assert!(cluster.config_map_names("default").is_empty());
    assert!(!seen.private_key_path.exists());
    assert_eq!(cluster.replicas("checkout", "default"), Some(2));
    assert!(cluster.scale_calls().is_empty());
}

/// Story: the shadow copies the origin's selector so its Service balances
/// across both, and `--labels` overrides copied values
#[tokio::test]
async fn story_shadow_labels_follow_origin_selector_with_overrides() {
    let home = tempfile::tempdir().unwrap();
    let cluster = checkout_cluster();
    let mut harness = Harness::new(cluster.clone(), home.path());
    harness
        .ctx
        .settings
        .labels
        .insert("env".to_string(), "staging".to_string());

    let watch_cluster = cluster.clone();
    let captured = std::sync::Arc::new(std::sync::Mutex::new(None));
    let sink = captured.clone();
    harness.tunnel.on_established(move || {
        let shadow = watch_cluster
            .deployment_names("default")
            .into_iter()
            .find(|d| d != "checkout")
            .and_then(|name| watch_cluster.deployment(&name, "default"));
        *sink.lock().unwrap() = shadow;
    });

    mesh::run(&harness.ctx, mesh_args("checkout")).await.unwrap();

    let shadow = captured.lock().unwrap().take().expect("shadow captured");
    let pod_labels = shadow
        .spec
        .and_then(|s| s.template.metadata)
        .and_then(|m| m.labels)
        .expect("pod template labels");
    assert_eq!(pod_labels.get("app").map(String::as_str), Some("checkout"));
    assert_eq!(pod_labels.get("env").map(String::as_str), Some("staging"));
    assert_eq!(pod_labels.get(LABEL_COMPONENT).map(String::as_str), Some("mesh"));
    assert!(pod_labels
        .get(LABEL_KT)
        .is_some_and(|kt| kt.starts_with("checkout-kt-")));
}

/// Story: Ctrl+C while the shadow pod is still Pending ends the session
/// cleanly and removes what was already created
#[tokio::test]
async fn story_interrupt_while_waiting_cleans_up() {
    let home = tempfile::tempdir().unwrap();
    let cluster = checkout_cluster();
    cluster.set_pod_phase("Pending");
    let mut harness = Harness::new(cluster.clone(), home.path());
    harness.ctx.settings.wait.timeout = None;

    let cancel = harness.ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let report = mesh::run(&harness.ctx, mesh_args("checkout")).await.unwrap();

    assert!(harness.tunnel.observation().is_none());
    assert!(report.is_clean(), "failures: {:?}", report.failures());
    assert_eq!(cluster.deployment_names("default"), vec!["checkout".to_string()]);
    assert!(cluster.config_map_names("default").is_empty());
}

/// Story: Ctrl+C lands while the API server is still answering the shadow
/// create; the Deployment it already stored is removed anyway
#[tokio::test]
async fn story_interrupt_during_shadow_create_still_removes_it() {
    let home = tempfile::tempdir().unwrap();
    let cluster = checkout_cluster();
    cluster.stall_deployment_create(Duration::from_millis(300));
    let harness = Harness::new(cluster.clone(), home.path());

    let cancel = harness.ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let report = mesh::run(&harness.ctx, mesh_args("checkout")).await.unwrap();

    assert!(harness.tunnel.observation().is_none());
    assert!(report.is_clean(), "failures: {:?}", report.failures());
    assert_eq!(cluster.deployment_names("default"), vec!["checkout".to_string()]);
    assert!(cluster.config_map_names("default").is_empty());
}

/// Story: a shadow that never becomes ready fails the session after the
/// wait deadline, and cleanup still runs
#[tokio::test]
async fn story_readiness_deadline_fails_session_after_cleanup() {
    let home = tempfile::tempdir().unwrap();
    let cluster = checkout_cluster();
    cluster.set_pod_phase("Pending");
    let mut harness = Harness::new(cluster.clone(), home.path());
    harness.ctx.settings.wait.timeout = Some(Duration::from_millis(100));

    let err = mesh::run(&harness.ctx, mesh_args("checkout"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Core(ktctl_common::Error::DeadlineExceeded { .. })
    ));
    assert_eq!(cluster.deployment_names("default"), vec!["checkout".to_string()]);
    assert!(cluster.config_map_names("default").is_empty());
}

/// Story: meshing a deployment that doesn't exist fails before anything is
/// created
#[tokio::test]
async fn story_missing_target_creates_nothing() {
    let home = tempfile::tempdir().unwrap();
    let cluster = checkout_cluster();
    let harness = Harness::new(cluster.clone(), home.path());

    let err = mesh::run(&harness.ctx, mesh_args("payments"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Core(ktctl_common::Error::NotFound { .. })
    ));
    assert!(harness.tunnel.observation().is_none());
    assert!(cluster.config_map_names("default").is_empty());
    assert_eq!(cluster.deployment_names("default"), vec!["checkout".to_string()]);
}

/// Story: a rejected shadow deployment still removes the key ConfigMap
/// created before it
#[tokio::test]
async fn story_failed_shadow_create_removes_config_map() {
    let home = tempfile::tempdir().unwrap();
    let cluster = checkout_cluster();
    cluster.fail_deployment_create();
    let harness = Harness::new(cluster.clone(), home.path());

    let err = mesh::run(&harness.ctx, mesh_args("checkout"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Core(ktctl_common::Error::Internal { .. })));
    assert!(cluster.config_map_names("default").is_empty());
    assert_eq!(
        std::fs::read_dir(home.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("pk_"))
            .count(),
        0
    );
}
