//! End-to-end control-loop scenarios: orchestrator passes and agent
//! reports driving clusters through their full lifecycle against the
//! simulated cloud provider.

use std::sync::Arc;
use std::time::Duration;

use fleet_capacity::{DecisionEngine, EngineConfig, ScalingMode};
use fleet_cloud::{CloudProvider, Poller, SimConfig, SimulatedCloud};
use fleet_reconciler::{FleetOrchestrator, OrchestratorConfig, ReportIngestor};
use fleet_registry::{
    CapacityVector, Cluster, ClusterRegistry, ClusterStatus, NodeReport, ReportCondition,
    ResizeReport, StatusReport, WorkloadRef,
};

struct Harness {
    registry: ClusterRegistry,
    cloud: Arc<SimulatedCloud>,
    orchestrator: FleetOrchestrator,
    ingestor: ReportIngestor,
}

fn harness(install_polls: u32) -> Harness {
    let registry = ClusterRegistry::open_in_memory().unwrap();
    let cloud = Arc::new(SimulatedCloud::with_config(SimConfig {
        install_polls,
        teardown_polls: 0,
    }));
    let config = OrchestratorConfig {
        dynamic_scaling: true,
        empty_dwell_secs: 600,
        min_available_clusters: 1,
        ..Default::default()
    };
    let orchestrator = FleetOrchestrator::new(
        registry.clone(),
        Arc::clone(&cloud) as Arc<dyn CloudProvider>,
        config,
    );
    let ingestor = ReportIngestor::new(
        registry.clone(),
        Arc::clone(&cloud) as Arc<dyn CloudProvider>,
        DecisionEngine::new(EngineConfig {
            mode: ScalingMode::Auto,
            scale_down_margin: 1.0,
        }),
    );
    Harness {
        registry,
        cloud,
        orchestrator,
        ingestor,
    }
}

fn vector(value: i64) -> CapacityVector {
    CapacityVector {
        connections: Some(value),
        partitions: Some(value),
        throughput_mbps: Some(value),
        data_retention_gib: Some(value),
    }
}

fn report(cluster_id: &str, ready: bool, remaining: i64, current_nodes: u32) -> StatusReport {
    StatusReport {
        cluster_id: cluster_id.to_string(),
        conditions: vec![ReportCondition {
            kind: "Ready".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
        }],
        total: vector(1_000_000),
        remaining: vector(remaining),
        node_info: NodeReport {
            current: current_nodes,
            floor: 3,
            ceiling: 20,
            current_workload_minimum: 3,
        },
        resize_info: ResizeReport {
            node_delta: 3,
            delta: vector(10_000),
        },
    }
}

fn seed(registry: &ClusterRegistry, id: &str, status: ClusterStatus, external_id: &str) -> Cluster {
    let cluster = Cluster {
        id: id.to_string(),
        external_id: Some(external_id.to_string()),
        cloud_provider: "aws".to_string(),
        region: "us-east-1".to_string(),
        multi_az: true,
        byoc: false,
        managed: true,
        status,
        identity_provider_id: None,
        cluster_dns: None,
        desired_nodes: None,
        empty_since: None,
        version: 0,
        created_at: 1000,
        updated_at: 1000,
    };
    registry.insert_cluster(&cluster).unwrap()
}

#[tokio::test]
async fn bootstrap_to_ready_end_to_end() {
    let h = harness(1);
    let mut now = 10_000;

    // Empty fleet: the orchestrator bootstraps one cluster.
    let summary = h.orchestrator.pass(now).await.unwrap();
    let id = summary.created.expect("bootstrap creates a cluster");

    // Drive passes until the cluster waits for its agent.
    for _ in 0..4 {
        now += 30;
        h.orchestrator.pass(now).await.unwrap();
    }
    let cluster = h.registry.get_cluster(&id).unwrap().unwrap();
    assert_eq!(cluster.status, ClusterStatus::WaitingForAgent);
    let external_id = cluster.external_id.clone().expect("external id stamped");
    assert_eq!(h.cloud.cluster_count(), 1);

    // First healthy agent report settles the cluster into ready.
    now += 30;
    let status = h
        .ingestor
        .process_report(&report(&id, true, 100_000, 3), now)
        .await
        .unwrap();
    assert_eq!(status, ClusterStatus::Ready);

    // No further cluster is created while this one has capacity.
    now += 30;
    let summary = h.orchestrator.pass(now).await.unwrap();
    assert!(summary.created.is_none());
    assert_eq!(h.cloud.target_nodes(&external_id), Some(3));
}

#[tokio::test]
async fn exhausted_cluster_scales_up_then_settles() {
    let h = harness(0);
    let spec = fleet_cloud::ClusterSpec {
        name: "a".to_string(),
        cloud_provider: "aws".to_string(),
        region: "us-east-1".to_string(),
        multi_az: true,
        base_nodes: 5,
    };
    let ext = h.cloud.create_cluster(&spec).await.unwrap();
    let id = seed(&h.registry, "a", ClusterStatus::Ready, &ext).id;

    // Connections exhausted below the node ceiling: scale up 5 → 8.
    let status = h
        .ingestor
        .process_report(&report(&id, true, 0, 5), 20_000)
        .await
        .unwrap();
    assert_eq!(status, ClusterStatus::ComputeNodeScalingUp);
    assert_eq!(h.cloud.target_nodes(&ext), Some(8));

    // Wait for the simulated provider to converge on the new count.
    let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(1));
    let cloud = Arc::clone(&h.cloud);
    let nodes = poller
        .poll(|| {
            let cloud = Arc::clone(&cloud);
            let ext = ext.clone();
            async move {
                let state = cloud.get_cluster(&ext).await?;
                Ok((state.compute_nodes == 8).then_some(state.compute_nodes))
            }
        })
        .await
        .unwrap();
    assert_eq!(nodes, 8);

    // The next report shows the resize landed and capacity back.
    let status = h
        .ingestor
        .process_report(&report(&id, true, 100_000, 8), 20_100)
        .await
        .unwrap();
    assert_eq!(status, ClusterStatus::Ready);
    let cluster = h.registry.get_cluster(&id).unwrap().unwrap();
    assert_eq!(cluster.desired_nodes, None);
}

#[tokio::test]
async fn fleet_scales_out_when_all_clusters_exhausted_at_ceiling() {
    let h = harness(0);
    seed(&h.registry, "a", ClusterStatus::Ready, "ext-a");
    seed(&h.registry, "b", ClusterStatus::Ready, "ext-b");

    // Both clusters hit their node ceiling with zero remaining
    // capacity: no node-level remedy, both go full.
    for id in ["a", "b"] {
        let mut r = report(id, true, 0, 20);
        r.node_info.ceiling = 20;
        let status = h.ingestor.process_report(&r, 30_000).await.unwrap();
        assert_eq!(status, ClusterStatus::Full);
    }

    // The orchestrator creates exactly one new cluster...
    let summary = h.orchestrator.pass(30_030).await.unwrap();
    assert!(summary.created.is_some());
    assert_eq!(h.registry.list_clusters().unwrap().len(), 3);

    // ...and only one, while it is still pending.
    let summary = h.orchestrator.pass(30_060).await.unwrap();
    assert!(summary.created.is_none());
    assert_eq!(h.registry.list_clusters().unwrap().len(), 3);
}

#[tokio::test]
async fn unhealthy_agent_forces_waiting_even_when_full() {
    let h = harness(0);
    let id = seed(&h.registry, "a", ClusterStatus::Full, "ext-a").id;

    let status = h
        .ingestor
        .process_report(&report(&id, false, 0, 5), 40_000)
        .await
        .unwrap();
    assert_eq!(status, ClusterStatus::WaitingForAgent);

    // Agent recovery re-establishes the capacity status.
    let status = h
        .ingestor
        .process_report(&report(&id, true, 0, 5), 40_060)
        .await
        .unwrap();
    assert_eq!(status, ClusterStatus::Full);
}

#[tokio::test]
async fn idle_cluster_reclaimed_after_dwell_and_removed() {
    let h = harness(0);

    // Two ready clusters backed by real simulated cloud clusters.
    for name in ["a", "b"] {
        let ext = h
            .cloud
            .create_cluster(&fleet_cloud::ClusterSpec {
                name: name.to_string(),
                cloud_provider: "aws".to_string(),
                region: "us-east-1".to_string(),
                multi_az: true,
                base_nodes: 3,
            })
            .await
            .unwrap();
        seed(&h.registry, name, ClusterStatus::Ready, &ext);
    }
    // Cluster b keeps a workload, so only a is ever a candidate.
    h.registry
        .put_workload(&WorkloadRef {
            id: "kafka-1".to_string(),
            cluster_id: "b".to_string(),
            active: true,
        })
        .unwrap();

    // Dwell clock starts.
    h.orchestrator.pass(50_000).await.unwrap();
    assert!(h.orchestrator.pass(50_100).await.unwrap().deprovisioned.is_empty());

    // Past dwell: a is reclaimed and its delete issued.
    let summary = h.orchestrator.pass(50_700).await.unwrap();
    assert_eq!(summary.deprovisioned, vec!["a".to_string()]);
    assert_eq!(
        h.registry.get_cluster("a").unwrap().unwrap().status,
        ClusterStatus::Cleanup
    );

    // Teardown confirms within a pass or two; the row disappears.
    let mut removed = false;
    for now in [50_730, 50_760, 50_790] {
        let summary = h.orchestrator.pass(now).await.unwrap();
        if summary.removed.contains(&"a".to_string()) {
            removed = true;
            break;
        }
    }
    assert!(removed, "row should be removed after teardown confirmation");
    assert!(h.registry.get_cluster("a").unwrap().is_none());
    assert_eq!(h.cloud.cluster_count(), 1);

    // The loaded cluster is untouched.
    assert_eq!(
        h.registry.get_cluster("b").unwrap().unwrap().status,
        ClusterStatus::Ready
    );
}

#[tokio::test]
async fn duplicate_reports_do_not_churn_state() {
    let h = harness(0);
    let id = seed(&h.registry, "a", ClusterStatus::Ready, "ext-a").id;

    let r = report(&id, true, 0, 20);
    let first = h.ingestor.process_report(&r, 60_000).await.unwrap();
    let second = h.ingestor.process_report(&r, 60_001).await.unwrap();
    let third = h.ingestor.process_report(&r, 60_002).await.unwrap();

    assert_eq!(first, ClusterStatus::Full);
    assert_eq!(second, ClusterStatus::Full);
    assert_eq!(third, ClusterStatus::Full);
}
