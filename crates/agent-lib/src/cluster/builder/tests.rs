use super::*;
use crate::models::{ResourceUnit, MI};

fn web() -> ServiceManifest {
    ServiceManifest::workload("web", "nginx:1.12")
}

fn workload(manifest: ServiceManifest) -> WorkloadBuilder {
    WorkloadBuilder::new("web", ContainerSpec::new(manifest).unwrap())
}

fn route(manifest: &ServiceManifest) -> RouteBuilder {
    RouteBuilder::new("web", manifest, "apps.example.com", "4f2a")
}

fn label<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels.as_ref()?.get(key).map(String::as_str)
}

#[test]
fn test_workload_create_carries_labels_and_limits() {
    let deployment = workload(web()).create();

    assert_eq!(deployment.metadata.name.as_deref(), Some("web"));
    assert_eq!(label(&deployment.metadata, MANAGED_LABEL), Some("true"));
    assert_eq!(label(&deployment.metadata, SERVICE_LABEL), Some("web"));
    assert_eq!(label(&deployment.metadata, TASK_LABEL), Some("web"));

    let spec = deployment.spec.unwrap();
    assert_eq!(spec.replicas, Some(1));
    let selector = spec.selector.match_labels.unwrap();
    assert_eq!(selector.get(SERVICE_LABEL).map(String::as_str), Some("web"));

    let pod = spec.template.spec.unwrap();
    let container = &pod.containers[0];
    assert_eq!(container.image.as_deref(), Some("nginx:1.12"));
    let limits = container.resources.as_ref().unwrap().limits.as_ref().unwrap();
    assert_eq!(limits["cpu"].0, "100m");
    assert_eq!(limits["memory"].0, (128 * MI).to_string());
    assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 80);
}

#[test]
fn test_workload_env_is_split_on_first_equals() {
    let mut manifest = web();
    manifest.env = vec!["MODE=a=b".to_string()];
    let deployment = workload(manifest).create();

    let env = deployment.spec.unwrap().template.spec.unwrap().containers[0]
        .env
        .clone()
        .unwrap();
    assert_eq!(env[0].name, "MODE");
    assert_eq!(env[0].value.as_deref(), Some("a=b"));
}

#[test]
fn test_bare_env_name_has_no_value() {
    let mut manifest = web();
    manifest.env = vec!["DEBUG".to_string(), "LEVEL=".to_string()];
    let deployment = workload(manifest).create();

    let env = deployment.spec.unwrap().template.spec.unwrap().containers[0]
        .env
        .clone()
        .unwrap();
    assert_eq!(env[0].name, "DEBUG");
    assert_eq!(env[0].value, None);
    assert_eq!(env[1].name, "LEVEL");
    assert_eq!(env[1].value.as_deref(), Some(""));
}

#[test]
fn test_env_without_name_rejected() {
    for entry in ["=value", ""] {
        let mut manifest = web();
        manifest.env = vec![entry.to_string()];
        assert!(matches!(
            ContainerSpec::new(manifest),
            Err(ValidationError::MalformedEnv(_))
        ));
    }
}

#[test]
fn test_out_of_range_replicas_and_ports_rejected() {
    let mut manifest = web();
    manifest.replica_count = i32::MAX as u32 + 1;
    assert!(matches!(
        ContainerSpec::new(manifest),
        Err(ValidationError::OutOfRange { field: "replica count", .. })
    ));

    let mut manifest = web();
    manifest.expose = vec![ServiceExpose::web(70000, 80)];
    assert!(matches!(
        ContainerSpec::new(manifest),
        Err(ValidationError::OutOfRange { field: "internal port", value: 70000, .. })
    ));

    let mut manifest = web();
    manifest.expose = vec![ServiceExpose::web(8080, 65536)];
    assert!(ContainerSpec::new(manifest).is_err());

    let mut manifest = web();
    manifest.replica_count = i32::MAX as u32;
    manifest.expose = vec![ServiceExpose::web(65535, 65535)];
    assert!(ContainerSpec::new(manifest).is_ok());
}

#[test]
fn test_workload_update_preserves_foreign_fields() {
    let mut existing = workload(web()).create();
    existing.metadata.resource_version = Some("7".to_string());
    existing
        .metadata
        .labels
        .as_mut()
        .unwrap()
        .insert("team".to_string(), "edge".to_string());

    let mut scaled = web();
    scaled.replica_count = 3;
    let updated = workload(scaled).update(existing);

    assert_eq!(updated.metadata.resource_version.as_deref(), Some("7"));
    assert_eq!(label(&updated.metadata, "team"), Some("edge"));
    assert_eq!(updated.spec.unwrap().replicas, Some(3));
}

#[test]
fn test_workload_zero_replicas_is_removal() {
    let mut manifest = web();
    manifest.replica_count = 0;
    assert!(workload(manifest).is_removal());
    assert!(!workload(web()).is_removal());
}

#[test]
fn test_network_service_ports() {
    let mut manifest = web();
    manifest.expose = vec![ServiceExpose::web(8080, 0), ServiceExpose::web(80, 8000)];
    let service = NetworkServiceBuilder::new("web", &manifest).create();

    let ports = service.spec.unwrap().ports.unwrap();
    assert_eq!(ports.len(), 2);
    assert_eq!(ports[0].port, 8080);
    assert_eq!(ports[0].target_port, Some(IntOrString::Int(8080)));
    assert_eq!(ports[1].port, 8000);
    assert_eq!(ports[1].target_port, Some(IntOrString::Int(80)));
}

#[test]
fn test_network_service_without_expose_is_removal() {
    let manifest = ServiceManifest::job("batch", "busybox");
    assert!(NetworkServiceBuilder::new("batch", &manifest).is_removal());
}

#[test]
fn test_route_create_generates_host() {
    let ingress = route(&web()).create();
    let spec = ingress.spec.unwrap();

    let rules = spec.rules.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].host.as_deref(), Some("web.4f2a.apps.example.com"));

    let backend = spec.default_backend.unwrap().service.unwrap();
    assert_eq!(backend.name, "web");
    assert_eq!(backend.port.unwrap().number, Some(80));
}

#[test]
fn test_route_update_keeps_generated_host() {
    let existing = route(&web()).create();
    let rebuilt = RouteBuilder::new("web", &web(), "apps.example.com", "9999");

    let updated = rebuilt.update(existing);
    assert_eq!(
        generated_hosts(&updated, "web", "apps.example.com"),
        vec!["web.4f2a.apps.example.com".to_string()]
    );
}

#[test]
fn test_route_includes_requested_hosts() {
    let mut manifest = web();
    manifest.expose[0].hosts = vec!["www.example.org".to_string()];
    let ingress = route(&manifest).create();

    let hosts: Vec<String> = ingress
        .spec
        .unwrap()
        .rules
        .unwrap()
        .into_iter()
        .filter_map(|r| r.host)
        .collect();
    assert_eq!(hosts, vec!["www.example.org", "web.4f2a.apps.example.com"]);
}

#[test]
fn test_route_requires_global_web_port() {
    let mut manifest = web();
    manifest.expose = vec![ServiceExpose::web(8080, 8080)];
    assert!(route(&manifest).is_removal());

    manifest.expose = vec![ServiceExpose {
        is_global: false,
        ..ServiceExpose::web(80, 80)
    }];
    assert!(route(&manifest).is_removal());
}

#[test]
fn test_batch_job_never_restarts() {
    let manifest = ServiceManifest::job("batch", "busybox");
    let job = BatchJobBuilder::new("batch", ContainerSpec::new(manifest).unwrap()).create();

    let pod = job.spec.unwrap().template.spec.unwrap();
    assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
    assert!(pod.containers[0].ports.is_none());
}

#[test]
fn test_scheduled_job_update_changes_schedule() {
    let spec = ContainerSpec::new(ServiceManifest::job("cron", "busybox")).unwrap();
    let existing = ScheduledJobBuilder::new("cron", "*/5 * * * *", spec.clone()).create();

    let mut manifest = ServiceManifest::job("cron", "busybox:1.36");
    manifest.unit = ResourceUnit::new(200, 64 * MI, 64 * MI);
    let updated = ScheduledJobBuilder::new("cron", "0 * * * *", ContainerSpec::new(manifest).unwrap())
        .update(existing);

    let spec = updated.spec.unwrap();
    assert_eq!(spec.schedule, "0 * * * *");
    let pod = spec.job_template.spec.unwrap().template.spec.unwrap();
    assert_eq!(pod.containers[0].image.as_deref(), Some("busybox:1.36"));
    assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
}

#[test]
fn test_namespace_update_merges_labels() {
    let mut existing = Namespace::default();
    existing.metadata.name = Some("apps".to_string());
    existing.metadata.labels = Some(Labels::from([("env".to_string(), "prod".to_string())]));

    let updated = NamespaceBuilder::new("apps").update(existing);
    assert_eq!(label(&updated.metadata, "env"), Some("prod"));
    assert_eq!(label(&updated.metadata, MANAGED_LABEL), Some("true"));
}

#[test]
fn test_resource_merge_rejects_wrong_kind() {
    let resource = Resource::Workload(workload(web()));
    let wrong = KubeObject::from(Service::default());
    assert!(matches!(
        resource.merge(wrong),
        Err(ClusterError::KindMismatch { .. })
    ));
}

#[test]
fn test_resource_dispatch() {
    let resource = Resource::Route(route(&web()));
    assert_eq!(resource.kind(), ResourceKind::Route);
    assert_eq!(resource.name(), "web");
    assert!(!resource.is_removal());
    assert_eq!(resource.desired().kind(), ResourceKind::Route);
}
