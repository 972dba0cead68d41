//! End-to-end publish pipeline: request, jobs, registry contents.

use std::collections::BTreeMap;
use std::sync::Arc;

use gatesync_core::GatesyncConfig;
use gatesync_registry::{
    KeyValueStore, KvRegistry, MemoryKeyValueStore, Registry, RegistryError, RegistryProvider,
    RegistryResult, RegistryScope, SharedStoreProvider,
};
use gatesync_release::*;
use gatesync_state::{
    AuthConfig, BackendConfig, BackendHost, EventStatus, GatewaySettings, LoadBalance,
    MicroGatewayConfig, ProxyConfig, PublishStep, ReleaseIntent, ResourceDescriptor, StageBackend,
    StateStore,
};

struct Env {
    store: StateStore,
    kv: Arc<MemoryKeyValueStore>,
    publisher: Publisher,
    gateway_id: u64,
    stage_id: u64,
}

fn route(id: u64, path: &str) -> ResourceDescriptor {
    ResourceDescriptor {
        id,
        name: format!("route_{id}"),
        method: "GET".to_string(),
        path: path.to_string(),
        match_subpath: false,
        enable_websocket: false,
        proxy: ProxyConfig::Http {
            backend_id: 1,
            method: "GET".to_string(),
            path: path.to_string(),
            timeout_secs: None,
        },
        auth: AuthConfig::default(),
        plugin_refs: vec![],
    }
}

fn cluster_config(key_prefix: &str, reports_status: bool) -> MicroGatewayConfig {
    MicroGatewayConfig {
        key_prefix: key_prefix.to_string(),
        endpoint: "http://gatesync.local".to_string(),
        auth_secret: "secret".to_string(),
        engine_version: Some("3.2.1".to_string()),
        reports_status,
        plugin_metadata: BTreeMap::new(),
        managed: None,
    }
}

fn setup_with(config: GatesyncConfig, registries: Option<Arc<dyn RegistryProvider>>) -> Env {
    let store = StateStore::open_in_memory().unwrap();
    let gateway = store.create_gateway("demo", GatewaySettings::default()).unwrap();
    let backend = StageBackend {
        backend_id: 1,
        name: "default".to_string(),
        config: BackendConfig {
            loadbalance: LoadBalance::RoundRobin,
            timeout_secs: 30,
            hosts: vec![BackendHost {
                scheme: "http".to_string(),
                host: "backend.svc:8080".to_string(),
                weight: 100,
            }],
        },
    };
    let stage = store
        .create_stage(gateway.id, "prod", BTreeMap::new(), vec![backend])
        .unwrap();

    let kv = Arc::new(MemoryKeyValueStore::new());
    let registries: Arc<dyn RegistryProvider> = match registries {
        Some(registries) => registries,
        None => Arc::new(SharedStoreProvider::new(kv.clone())),
    };
    let publisher = Publisher::new(store.clone(), Arc::new(config), registries);
    Env {
        store,
        kv,
        publisher,
        gateway_id: gateway.id,
        stage_id: stage.id,
    }
}

fn setup() -> Env {
    setup_with(GatesyncConfig::default(), None)
}

impl Env {
    fn attach_cluster(&self, name: &str, reports_status: bool) -> u64 {
        let cluster = self
            .store
            .create_micro_gateway(
                name,
                Some(self.gateway_id),
                false,
                cluster_config(&format!("/gatesync/{name}"), reports_status),
            )
            .unwrap();
        let mut stage = self.store.get_stage(self.gateway_id, self.stage_id).unwrap().unwrap();
        stage.micro_gateway_ids.push(cluster.id);
        self.store.put_stage(&stage).unwrap();
        cluster.id
    }

    fn version(&self, version: &str, routes: &[(u64, &str)]) -> u64 {
        let resources = routes.iter().map(|(id, path)| route(*id, path)).collect();
        self.store
            .create_resource_version(self.gateway_id, version, resources)
            .unwrap()
            .id
    }

    fn request(&self, version_id: u64) -> PublishRequest {
        PublishRequest {
            gateway_id: self.gateway_id,
            stage_ids: vec![self.stage_id],
            resource_version_id: version_id,
            user: "alice".to_string(),
            comment: String::new(),
        }
    }

    fn revoke_request(&self) -> RevokeRequest {
        RevokeRequest {
            gateway_id: self.gateway_id,
            stage_id: self.stage_id,
            user: "alice".to_string(),
            comment: "retire".to_string(),
        }
    }

    fn keys(&self, prefix: &str) -> Vec<String> {
        self.kv
            .list_prefix(prefix)
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }
}

#[tokio::test]
async fn publishing_a_new_version_replaces_routes() {
    let env = setup();
    env.attach_cluster("cluster-a", false);
    let v1 = env.version("1.0.0", &[(10, "/users"), (11, "/orders")]);
    let v2 = env.version("2.0.0", &[(10, "/users"), (12, "/items")]);

    let reports = env.publisher.publish(&env.request(v1)).unwrap().wait().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].state, PublishState::Succeeded);

    let reports = env.publisher.publish(&env.request(v2)).unwrap().wait().await;
    assert_eq!(reports[0].state, PublishState::Succeeded);
    let sync = reports[0].sync.as_ref().unwrap();
    assert_eq!(sync.deleted, 1);

    let releases = env.store.list_releases(env.gateway_id).unwrap();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].resource_version_id, v2);
    assert_eq!(env.store.list_release_histories(env.gateway_id).unwrap().len(), 2);

    assert_eq!(
        env.keys("/gatesync/cluster-a/route/"),
        vec![
            "/gatesync/cluster-a/route/demo.prod.10".to_string(),
            "/gatesync/cluster-a/route/demo.prod.12".to_string(),
        ]
    );
}

#[tokio::test]
async fn republishing_the_same_version_creates_and_deletes_nothing() {
    let env = setup();
    env.attach_cluster("cluster-a", false);
    let v1 = env.version("1.0.0", &[(10, "/users")]);

    env.publisher.publish(&env.request(v1)).unwrap().wait().await;
    let before = env.keys("/gatesync/cluster-a/");

    let reports = env.publisher.publish(&env.request(v1)).unwrap().wait().await;
    let sync = reports[0].sync.as_ref().unwrap();
    assert_eq!((sync.created, sync.deleted), (0, 0));
    assert!(sync.is_success());
    assert_eq!(env.keys("/gatesync/cluster-a/"), before);
}

#[tokio::test]
async fn shared_cluster_routes_carry_the_path_prefix() {
    let mut config = GatesyncConfig::default();
    config.publish.shared_micro_gateway = Some("shared".to_string());
    let env = setup_with(config, None);
    env.store
        .create_micro_gateway("shared", None, true, cluster_config("/gatesync/shared", false))
        .unwrap();
    let v1 = env.version("1.0.0", &[(10, "/users")]);

    let outcome = env.publisher.publish(&env.request(v1)).unwrap();
    assert_eq!(outcome.tasks().len(), 1);
    outcome.wait().await;

    let registry = KvRegistry::new(env.kv.clone(), RegistryScope::cluster("/gatesync/shared"));
    let routes: Vec<_> = registry
        .iter_by_type(gatesync_convert::ResourceKind::Route)
        .unwrap()
        .collect();
    assert_eq!(routes.len(), 1);
    match &routes[0].spec {
        gatesync_convert::ResourceSpec::Route(spec) => {
            assert_eq!(spec.uri, "/api/demo/prod/users");
        }
        other => panic!("unexpected spec {other:?}"),
    }
}

/// Rejects every write under one key prefix.
struct BrokenCluster {
    inner: Arc<MemoryKeyValueStore>,
    broken_prefix: &'static str,
}

struct BrokenStore {
    inner: Arc<MemoryKeyValueStore>,
}

impl KeyValueStore for BrokenStore {
    fn get(&self, key: &str) -> RegistryResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, _key: &str, _value: &[u8]) -> RegistryResult<()> {
        Err(RegistryError::Backend("etcd unavailable".to_string()))
    }

    fn delete(&self, key: &str) -> RegistryResult<bool> {
        self.inner.delete(key)
    }

    fn list_prefix(&self, prefix: &str) -> RegistryResult<Vec<(String, Vec<u8>)>> {
        self.inner.list_prefix(prefix)
    }
}

impl RegistryProvider for BrokenCluster {
    fn registry(&self, scope: RegistryScope) -> Box<dyn Registry> {
        if scope.key_prefix == self.broken_prefix {
            Box::new(KvRegistry::new(
                BrokenStore {
                    inner: self.inner.clone(),
                },
                scope,
            ))
        } else {
            Box::new(KvRegistry::new(self.inner.clone(), scope))
        }
    }
}

#[tokio::test]
async fn one_failing_cluster_does_not_affect_the_other() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let provider: Arc<dyn RegistryProvider> = Arc::new(BrokenCluster {
        inner: kv.clone(),
        broken_prefix: "/gatesync/cluster-b",
    });
    let mut env = setup_with(GatesyncConfig::default(), Some(provider));
    env.kv = kv;
    env.attach_cluster("cluster-a", false);
    env.attach_cluster("cluster-b", false);
    let v1 = env.version("1.0.0", &[(10, "/users")]);

    let outcome = env.publisher.publish(&env.request(v1)).unwrap();
    let tasks = outcome.tasks().to_vec();
    let reports = outcome.wait().await;
    assert_eq!(reports.len(), 2);

    let by_publish: BTreeMap<_, _> = reports.iter().map(|r| (r.publish_id, r)).collect();
    assert_eq!(by_publish[&tasks[0].publish_id].state, PublishState::Succeeded);
    match &by_publish[&tasks[1].publish_id].state {
        PublishState::Failed { step, detail } => {
            assert_eq!(*step, PublishStep::DistributeConfiguration);
            assert!(detail.as_deref().unwrap_or_default().contains("etcd unavailable"));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert!(!env.keys("/gatesync/cluster-a/route/").is_empty());
    assert!(env.keys("/gatesync/cluster-b/").is_empty());
}

#[tokio::test]
async fn invalid_requests_write_nothing() {
    let env = setup();
    env.attach_cluster("cluster-a", false);
    let v1 = env.version("1.0.0", &[(10, "/users")]);

    let mut empty = env.request(v1);
    empty.stage_ids.clear();
    let err = env.publisher.publish(&empty).err().unwrap();
    assert!(matches!(err, PublishError::Validation(ValidationError::EmptyStages)));

    let err = env.publisher.publish(&env.request(999)).err().unwrap();
    assert!(matches!(
        err,
        PublishError::Validation(ValidationError::UnknownVersion { version_id: 999, .. })
    ));

    let mut foreign_stage = env.request(v1);
    foreign_stage.stage_ids = vec![env.stage_id, 404];
    let err = env.publisher.publish(&foreign_stage).err().unwrap();
    assert!(err.is_validation());

    assert!(env.store.list_release_histories(env.gateway_id).unwrap().is_empty());
    assert!(env.store.list_releases(env.gateway_id).unwrap().is_empty());
}

#[tokio::test]
async fn stage_without_cluster_records_history_failure() {
    let env = setup();
    let v1 = env.version("1.0.0", &[(10, "/users")]);

    let outcome = env.publisher.publish(&env.request(v1)).unwrap();
    assert!(outcome.tasks().is_empty());
    let failure = outcome.history.failure.clone().unwrap();
    assert!(failure.contains("no target cluster"));
    assert!(outcome.wait().await.is_empty());
}

#[tokio::test]
async fn data_plane_reports_finish_the_publish() {
    let env = setup();
    env.attach_cluster("cluster-a", true);
    let v1 = env.version("1.0.0", &[(10, "/users")]);

    let reports = env.publisher.publish(&env.request(v1)).unwrap().wait().await;
    let publish_id = reports[0].publish_id;
    assert_eq!(reports[0].state, PublishState::Running);

    let err = env
        .publisher
        .report_event(publish_id, PublishStep::GenerateTask, EventStatus::Success, None)
        .err()
        .unwrap();
    assert!(matches!(err, PublishError::Validation(ValidationError::NotReportable(_))));

    for step in [
        PublishStep::ParseConfiguration,
        PublishStep::ApplyConfiguration,
        PublishStep::LoadConfiguration,
    ] {
        env.publisher
            .report_event(publish_id, step, EventStatus::Success, None)
            .unwrap();
    }
    let status = env.publisher.publish_status(publish_id).unwrap();
    assert_eq!(status.state, PublishState::Succeeded);
    assert_eq!(status.terminal, PublishStep::LoadConfiguration);
    assert_eq!(status.events.len(), 6);

    let err = env
        .publisher
        .report_event(publish_id, PublishStep::ParseConfiguration, EventStatus::Doing, None)
        .err()
        .unwrap();
    assert!(matches!(err, PublishError::Validation(ValidationError::Regression { .. })));

    let err = env
        .publisher
        .report_event(9999, PublishStep::LoadConfiguration, EventStatus::Success, None)
        .err()
        .unwrap();
    assert!(matches!(err, PublishError::Validation(ValidationError::UnknownPublish(9999))));
}

#[tokio::test]
async fn revoke_removes_release_and_stage_keys() {
    let env = setup();
    env.attach_cluster("cluster-a", false);
    let v1 = env.version("1.0.0", &[(10, "/users")]);

    let err = env.publisher.revoke(&env.revoke_request()).err().unwrap();
    assert!(matches!(err, PublishError::Validation(ValidationError::NotReleased { .. })));

    env.publisher.publish(&env.request(v1)).unwrap().wait().await;
    assert!(!env.keys("/gatesync/cluster-a/route/").is_empty());

    let outcome = env.publisher.revoke(&env.revoke_request()).unwrap();
    assert!(outcome.history.revoke);
    let reports = outcome.wait().await;
    assert_eq!(reports[0].state, PublishState::Succeeded);

    assert!(env.store.get_release(env.gateway_id, env.stage_id).unwrap().is_none());
    assert!(env.keys("/gatesync/cluster-a/route/").is_empty());
    assert!(env.keys("/gatesync/cluster-a/service/").is_empty());
    assert!(env.keys("/gatesync/cluster-a/stage/").is_empty());
    // Cluster-wide entries stay for other stages.
    assert!(!env.keys("/gatesync/cluster-a/gateway-config/").is_empty());
}

#[tokio::test]
async fn revoke_succeeds_after_stage_backends_change() {
    let env = setup();
    env.attach_cluster("cluster-a", false);
    let v1 = env.version("1.0.0", &[(10, "/users"), (11, "/orders")]);
    env.publisher.publish(&env.request(v1)).unwrap().wait().await;
    assert_eq!(env.keys("/gatesync/cluster-a/route/").len(), 2);

    let mut stage = env.store.get_stage(env.gateway_id, env.stage_id).unwrap().unwrap();
    stage.backends.clear();
    env.store.put_stage(&stage).unwrap();

    let reports = env.publisher.revoke(&env.revoke_request()).unwrap().wait().await;
    assert_eq!(reports[0].state, PublishState::Succeeded);
    assert_eq!(reports[0].sync.as_ref().unwrap().deleted, 4);
    assert!(env.keys("/gatesync/cluster-a/route/").is_empty());
    assert!(env.keys("/gatesync/cluster-a/service/").is_empty());
    assert!(env.store.get_release(env.gateway_id, env.stage_id).unwrap().is_none());
}

#[tokio::test]
async fn revoke_job_does_not_need_the_released_version() {
    let env = setup();
    let cluster_id = env.attach_cluster("cluster-a", false);
    let v1 = env.version("1.0.0", &[(10, "/users")]);
    env.publisher.publish(&env.request(v1)).unwrap().wait().await;

    let history = env
        .store
        .record_release(&ReleaseIntent {
            gateway_id: env.gateway_id,
            resource_version_id: v1,
            targets: vec![(env.stage_id, vec![cluster_id])],
            user: "alice".to_string(),
            comment: String::new(),
            revoke: true,
        })
        .unwrap();
    // With the release row gone, retention is free to drop the version
    // before the revoke job runs.
    let dropped = env.store.cleanup_resource_versions(env.gateway_id, 0).unwrap();
    assert_eq!(dropped, vec![v1]);

    let registries: Arc<dyn RegistryProvider> = Arc::new(SharedStoreProvider::new(env.kv.clone()));
    let report = PublishJob::new(
        env.store.clone(),
        Arc::new(GatesyncConfig::default()),
        registries,
        history.tasks[0].clone(),
    )
    .run();
    assert_eq!(report.state, PublishState::Succeeded);
    assert!(env.keys("/gatesync/cluster-a/route/").is_empty());
}

#[tokio::test]
async fn clusters_of_other_gateways_are_refused() {
    let env = setup();
    let other = env.store.create_gateway("other", GatewaySettings::default()).unwrap();
    let foreign = env
        .store
        .create_micro_gateway("other-a", Some(other.id), false, cluster_config("/gatesync/other-a", false))
        .unwrap();
    let mut stage = env.store.get_stage(env.gateway_id, env.stage_id).unwrap().unwrap();
    stage.micro_gateway_ids.push(foreign.id);
    env.store.put_stage(&stage).unwrap();
    let v1 = env.version("1.0.0", &[(10, "/users")]);

    let err = env.publisher.publish(&env.request(v1)).err().unwrap();
    assert!(matches!(
        err,
        PublishError::Validation(ValidationError::ForeignMicroGateway { .. })
    ));
    assert!(env.store.list_release_histories(env.gateway_id).unwrap().is_empty());
    assert!(env.keys("/gatesync/other-a/").is_empty());
}

#[tokio::test]
async fn decommission_wipes_the_cluster_prefix() {
    let env = setup();
    env.attach_cluster("cluster-a", false);
    let v1 = env.version("1.0.0", &[(10, "/users")]);
    env.publisher.publish(&env.request(v1)).unwrap().wait().await;
    env.kv.put("/gatesync/cluster-ab/route/x", b"{}").unwrap();

    let removed = env.publisher.decommission("cluster-a").unwrap();
    assert!(removed > 0);
    assert!(env.keys("/gatesync/cluster-a/").is_empty());
    assert_eq!(env.keys("/gatesync/cluster-ab/").len(), 1);
    assert!(env.store.get_micro_gateway_by_name("cluster-a").unwrap().is_some());

    let err = env.publisher.decommission("missing").err().unwrap();
    assert!(matches!(err, PublishError::Validation(ValidationError::UnknownMicroGateway(_))));
}

#[tokio::test]
async fn cleanup_keeps_released_versions() {
    let mut config = GatesyncConfig::default();
    config.retention.keep_versions = 1;
    let env = setup_with(config, None);
    env.attach_cluster("cluster-a", false);
    let v1 = env.version("1.0.0", &[(10, "/users")]);
    env.version("1.1.0", &[(10, "/users")]);
    env.version("1.2.0", &[(10, "/users")]);
    env.publisher.publish(&env.request(v1)).unwrap().wait().await;

    let deleted = env.publisher.cleanup(env.gateway_id).unwrap();
    assert!(!deleted.contains(&v1));
    let remaining: Vec<_> = env
        .store
        .list_resource_versions(env.gateway_id)
        .unwrap()
        .into_iter()
        .map(|v| v.id)
        .collect();
    assert!(remaining.contains(&v1));
}

#[tokio::test]
async fn publish_outside_a_runtime_is_an_execution_error() {
    let env = setup();
    env.attach_cluster("cluster-a", false);
    let v1 = env.version("1.0.0", &[(10, "/users")]);
    let publisher = env.publisher.clone();
    let request = env.request(v1);

    let err = std::thread::spawn(move || publisher.publish(&request).err())
        .join()
        .unwrap()
        .unwrap();
    assert!(matches!(err, PublishError::Execution(ExecutionError::NoRuntime(_))));
    assert!(env.store.list_release_histories(env.gateway_id).unwrap().is_empty());
}
