//! Pure translation from manifests to desired cluster objects
//!
//! Builders never talk to the cluster. `create` produces a fresh object and
//! `update` merges the desired state into an observed one, keeping fields
//! the server or other writers own.

use super::object::KubeObject;
use super::quantity::{bytes_quantity, cpu_quantity};
use super::selector::{MANAGED_LABEL, SERVICE_LABEL, TASK_LABEL};
use crate::error::{ClusterError, ValidationError};
use crate::models::{ResourceKind, ServiceExpose, ServiceManifest};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Namespace, PodSpec, PodTemplateSpec, ResourceRequirements,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector as PodSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

type Labels = BTreeMap<String, String>;

/// Desired-state producer for one object kind
pub trait Builder {
    type Object: Into<KubeObject> + TryFrom<KubeObject, Error = ClusterError>;

    const KIND: ResourceKind;

    fn name(&self) -> String;

    fn create(&self) -> Self::Object;

    fn update(&self, existing: Self::Object) -> Self::Object;

    /// The object should not exist after reconciliation
    fn is_removal(&self) -> bool {
        false
    }
}

fn owner_labels(task_id: &str, service: &str) -> Labels {
    let mut labels = pod_labels(service);
    labels.insert(TASK_LABEL.to_string(), task_id.to_string());
    labels
}

/// Pod selector labels; stable for the life of a workload
fn pod_labels(service: &str) -> Labels {
    Labels::from([
        (MANAGED_LABEL.to_string(), "true".to_string()),
        (SERVICE_LABEL.to_string(), service.to_string()),
    ])
}

fn merge_labels(meta: &mut ObjectMeta, desired: Labels) {
    meta.labels.get_or_insert_with(Labels::new).extend(desired);
}

fn metadata(name: &str, labels: Labels) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

fn parse_env(entries: &[String]) -> Result<Vec<EnvVar>, ValidationError> {
    entries
        .iter()
        .map(|entry| {
            let (key, value) = match entry.split_once('=') {
                Some((key, value)) => (key, Some(value.to_string())),
                None => (entry.as_str(), None),
            };
            if key.is_empty() {
                return Err(ValidationError::MalformedEnv(entry.clone()));
            }
            Ok(EnvVar {
                name: key.to_string(),
                value,
                ..Default::default()
            })
        })
        .collect()
}

const MAX_PORT: u32 = u16::MAX as u32;
const MAX_REPLICAS: u32 = i32::MAX as u32;

fn check_range(field: &'static str, value: u32, max: u32) -> Result<(), ValidationError> {
    if value > max {
        return Err(ValidationError::OutOfRange { field, value, max });
    }
    Ok(())
}

/// Container spec shared by every pod-producing builder.
///
/// Construction bounds replicas and ports, so the `i32` fields of the
/// generated objects never wrap.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    manifest: ServiceManifest,
    env: Vec<EnvVar>,
}

impl ContainerSpec {
    pub fn new(manifest: ServiceManifest) -> Result<Self, ValidationError> {
        check_range("replica count", manifest.replica_count, MAX_REPLICAS)?;
        for expose in &manifest.expose {
            check_range("internal port", expose.internal_port, MAX_PORT)?;
            check_range("external port", expose.external_port, MAX_PORT)?;
        }
        let env = parse_env(&manifest.env)?;
        Ok(Self { manifest, env })
    }

    pub fn manifest(&self) -> &ServiceManifest {
        &self.manifest
    }

    fn container(&self) -> Container {
        let m = &self.manifest;
        let limits = BTreeMap::from([
            ("cpu".to_string(), cpu_quantity(m.unit.cpu_milli)),
            ("memory".to_string(), bytes_quantity(m.unit.memory_bytes)),
            ("ephemeral-storage".to_string(), bytes_quantity(m.unit.disk_bytes)),
        ]);
        let ports: Vec<ContainerPort> = m
            .expose
            .iter()
            .map(|e| ContainerPort {
                container_port: e.internal_port as i32,
                protocol: Some(e.protocol.as_str().to_string()),
                ..Default::default()
            })
            .collect();

        Container {
            name: m.name.clone(),
            image: Some(m.image.clone()),
            args: (!m.args.is_empty()).then(|| m.args.clone()),
            env: (!self.env.is_empty()).then(|| self.env.clone()),
            ports: (!ports.is_empty()).then_some(ports),
            resources: Some(ResourceRequirements {
                limits: Some(limits),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_template(&self, labels: Labels, restart_policy: Option<&str>) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![self.container()],
                restart_policy: restart_policy.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    /// Swap in the desired container, keeping the rest of the pod spec
    fn refresh_template(&self, template: &mut PodTemplateSpec, labels: Labels) {
        merge_labels(template.metadata.get_or_insert_with(Default::default), labels);
        let spec = template.spec.get_or_insert_with(Default::default);
        spec.containers = vec![self.container()];
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceBuilder {
    name: String,
}

impl NamespaceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Builder for NamespaceBuilder {
    type Object = Namespace;
    const KIND: ResourceKind = ResourceKind::Namespace;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn create(&self) -> Namespace {
        Namespace {
            metadata: metadata(&self.name, Labels::from([(MANAGED_LABEL.to_string(), "true".to_string())])),
            ..Default::default()
        }
    }

    fn update(&self, mut existing: Namespace) -> Namespace {
        merge_labels(
            &mut existing.metadata,
            Labels::from([(MANAGED_LABEL.to_string(), "true".to_string())]),
        );
        existing
    }
}

/// Replicated long-running workload
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadBuilder {
    task_id: String,
    spec: ContainerSpec,
}

impl WorkloadBuilder {
    pub fn new(task_id: impl Into<String>, spec: ContainerSpec) -> Self {
        Self {
            task_id: task_id.into(),
            spec,
        }
    }

    fn service(&self) -> &str {
        &self.spec.manifest.name
    }
}

impl Builder for WorkloadBuilder {
    type Object = Deployment;
    const KIND: ResourceKind = ResourceKind::Workload;

    fn name(&self) -> String {
        self.spec.manifest.name.clone()
    }

    fn create(&self) -> Deployment {
        let labels = owner_labels(&self.task_id, self.service());
        Deployment {
            metadata: metadata(self.service(), labels.clone()),
            spec: Some(DeploymentSpec {
                replicas: Some(self.spec.manifest.replica_count as i32),
                selector: PodSelector {
                    match_labels: Some(pod_labels(self.service())),
                    ..Default::default()
                },
                template: self.spec.pod_template(labels, None),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn update(&self, mut existing: Deployment) -> Deployment {
        let labels = owner_labels(&self.task_id, self.service());
        merge_labels(&mut existing.metadata, labels.clone());

        let spec = existing.spec.get_or_insert_with(|| DeploymentSpec {
            selector: PodSelector {
                match_labels: Some(pod_labels(self.service())),
                ..Default::default()
            },
            ..Default::default()
        });
        spec.replicas = Some(self.spec.manifest.replica_count as i32);
        self.spec.refresh_template(&mut spec.template, labels);
        existing
    }

    /// Zero replicas means the workload should be deleted
    fn is_removal(&self) -> bool {
        self.spec.manifest.replica_count == 0
    }
}

/// Stable in-cluster endpoint for a workload's exposed ports
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkServiceBuilder {
    task_id: String,
    name: String,
    expose: Vec<ServiceExpose>,
}

impl NetworkServiceBuilder {
    pub fn new(task_id: impl Into<String>, manifest: &ServiceManifest) -> Self {
        Self {
            task_id: task_id.into(),
            name: manifest.name.clone(),
            expose: manifest.expose.clone(),
        }
    }

    fn ports(&self) -> Vec<ServicePort> {
        self.expose
            .iter()
            .map(|e| ServicePort {
                name: Some(format!("port-{}", e.internal_port)),
                port: e.effective_external_port() as i32,
                target_port: Some(IntOrString::Int(e.internal_port as i32)),
                protocol: Some(e.protocol.as_str().to_string()),
                ..Default::default()
            })
            .collect()
    }
}

impl Builder for NetworkServiceBuilder {
    type Object = Service;
    const KIND: ResourceKind = ResourceKind::NetworkService;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn create(&self) -> Service {
        Service {
            metadata: metadata(&self.name, owner_labels(&self.task_id, &self.name)),
            spec: Some(ServiceSpec {
                selector: Some(pod_labels(&self.name)),
                ports: Some(self.ports()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn update(&self, mut existing: Service) -> Service {
        merge_labels(&mut existing.metadata, owner_labels(&self.task_id, &self.name));
        let spec = existing.spec.get_or_insert_with(Default::default);
        spec.selector = Some(pod_labels(&self.name));
        spec.ports = Some(self.ports());
        existing
    }

    /// Without exposed ports there is nothing to route to
    fn is_removal(&self) -> bool {
        self.expose.is_empty()
    }
}

/// External HTTP route for a globally exposed web port
#[derive(Debug, Clone, PartialEq)]
pub struct RouteBuilder {
    task_id: String,
    name: String,
    expose: Option<ServiceExpose>,
    ingress_host: String,
    token: String,
}

impl RouteBuilder {
    /// `token` makes the generated host unique; it is only used when the
    /// route does not already carry a generated host.
    pub fn new(
        task_id: impl Into<String>,
        manifest: &ServiceManifest,
        ingress_host: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            name: manifest.name.clone(),
            expose: manifest.public_web_expose().cloned(),
            ingress_host: ingress_host.into(),
            token: token.into(),
        }
    }

    pub fn generated_host(&self) -> String {
        format!("{}.{}.{}", self.name, self.token, self.ingress_host)
    }

    fn backend(&self, expose: &ServiceExpose) -> IngressBackend {
        IngressBackend {
            service: Some(IngressServiceBackend {
                name: self.name.clone(),
                port: Some(ServiceBackendPort {
                    number: Some(expose.effective_external_port() as i32),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }
    }

    fn spec(&self, hosts: Vec<String>) -> Option<IngressSpec> {
        let expose = self.expose.as_ref()?;
        let rules = hosts
            .into_iter()
            .map(|host| IngressRule {
                host: Some(host),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: self.backend(expose),
                    }],
                }),
            })
            .collect();

        Some(IngressSpec {
            default_backend: Some(self.backend(expose)),
            rules: Some(rules),
            ..Default::default()
        })
    }

    fn requested_hosts(&self) -> Vec<String> {
        self.expose
            .as_ref()
            .map(|e| e.hosts.clone())
            .unwrap_or_default()
    }
}

/// Hosts on a route that the agent generated for `name`
pub fn generated_hosts(ingress: &Ingress, name: &str, ingress_host: &str) -> Vec<String> {
    let prefix = format!("{}.", name);
    let suffix = format!(".{}", ingress_host);
    ingress
        .spec
        .as_ref()
        .and_then(|s| s.rules.as_ref())
        .map(|rules| {
            rules
                .iter()
                .filter_map(|r| r.host.clone())
                .filter(|h| h.starts_with(&prefix) && h.ends_with(&suffix))
                .collect()
        })
        .unwrap_or_default()
}

impl Builder for RouteBuilder {
    type Object = Ingress;
    const KIND: ResourceKind = ResourceKind::Route;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn create(&self) -> Ingress {
        let mut hosts = self.requested_hosts();
        hosts.push(self.generated_host());
        Ingress {
            metadata: metadata(&self.name, owner_labels(&self.task_id, &self.name)),
            spec: self.spec(hosts),
            ..Default::default()
        }
    }

    fn update(&self, mut existing: Ingress) -> Ingress {
        let mut generated = generated_hosts(&existing, &self.name, &self.ingress_host);
        if generated.is_empty() {
            generated.push(self.generated_host());
        }
        let mut hosts = self.requested_hosts();
        for host in generated {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }

        merge_labels(&mut existing.metadata, owner_labels(&self.task_id, &self.name));
        existing.spec = self.spec(hosts);
        existing
    }

    fn is_removal(&self) -> bool {
        self.expose.is_none()
    }
}

/// Run-to-completion job
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJobBuilder {
    task_id: String,
    spec: ContainerSpec,
}

impl BatchJobBuilder {
    pub fn new(task_id: impl Into<String>, spec: ContainerSpec) -> Self {
        Self {
            task_id: task_id.into(),
            spec,
        }
    }
}

impl Builder for BatchJobBuilder {
    type Object = Job;
    const KIND: ResourceKind = ResourceKind::BatchJob;

    fn name(&self) -> String {
        self.spec.manifest.name.clone()
    }

    fn create(&self) -> Job {
        let name = &self.spec.manifest.name;
        let labels = owner_labels(&self.task_id, name);
        Job {
            metadata: metadata(name, labels.clone()),
            spec: Some(JobSpec {
                template: self.spec.pod_template(labels, Some("Never")),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// A job's pod template is immutable once created
    fn update(&self, mut existing: Job) -> Job {
        merge_labels(
            &mut existing.metadata,
            owner_labels(&self.task_id, &self.spec.manifest.name),
        );
        existing
    }
}

/// Job created on a cron schedule
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJobBuilder {
    task_id: String,
    schedule: String,
    spec: ContainerSpec,
}

impl ScheduledJobBuilder {
    pub fn new(task_id: impl Into<String>, schedule: impl Into<String>, spec: ContainerSpec) -> Self {
        Self {
            task_id: task_id.into(),
            schedule: schedule.into(),
            spec,
        }
    }
}

impl Builder for ScheduledJobBuilder {
    type Object = CronJob;
    const KIND: ResourceKind = ResourceKind::ScheduledJob;

    fn name(&self) -> String {
        self.spec.manifest.name.clone()
    }

    fn create(&self) -> CronJob {
        let name = &self.spec.manifest.name;
        let labels = owner_labels(&self.task_id, name);
        CronJob {
            metadata: metadata(name, labels.clone()),
            spec: Some(CronJobSpec {
                schedule: self.schedule.clone(),
                job_template: JobTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels.clone()),
                        ..Default::default()
                    }),
                    spec: Some(JobSpec {
                        template: self.spec.pod_template(labels, Some("Never")),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn update(&self, mut existing: CronJob) -> CronJob {
        let labels = owner_labels(&self.task_id, &self.spec.manifest.name);
        merge_labels(&mut existing.metadata, labels.clone());

        let spec = existing.spec.get_or_insert_with(Default::default);
        spec.schedule = self.schedule.clone();
        merge_labels(
            spec.job_template.metadata.get_or_insert_with(Default::default),
            labels.clone(),
        );
        let job = spec.job_template.spec.get_or_insert_with(Default::default);
        self.spec.refresh_template(&mut job.template, labels);
        job.template
            .spec
            .get_or_insert_with(Default::default)
            .restart_policy = Some("Never".to_string());
        existing
    }
}

/// One unit of desired state handed to the reconciler
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Namespace(NamespaceBuilder),
    Workload(WorkloadBuilder),
    NetworkService(NetworkServiceBuilder),
    Route(RouteBuilder),
    BatchJob(BatchJobBuilder),
    ScheduledJob(ScheduledJobBuilder),
}

macro_rules! with_builder {
    ($resource:expr, $b:ident => $body:expr) => {
        match $resource {
            Resource::Namespace($b) => $body,
            Resource::Workload($b) => $body,
            Resource::NetworkService($b) => $body,
            Resource::Route($b) => $body,
            Resource::BatchJob($b) => $body,
            Resource::ScheduledJob($b) => $body,
        }
    };
}

fn merge_into<B: Builder>(builder: &B, existing: KubeObject) -> Result<KubeObject, ClusterError> {
    let typed = <B::Object as TryFrom<KubeObject>>::try_from(existing)?;
    Ok(builder.update(typed).into())
}

fn kind_of<B: Builder>(_: &B) -> ResourceKind {
    B::KIND
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        with_builder!(self, b => kind_of(b))
    }

    pub fn name(&self) -> String {
        with_builder!(self, b => b.name())
    }

    pub fn is_removal(&self) -> bool {
        with_builder!(self, b => b.is_removal())
    }

    /// Fresh object for a create
    pub fn desired(&self) -> KubeObject {
        with_builder!(self, b => b.create().into())
    }

    /// Observed object with the desired state merged in
    pub fn merge(&self, existing: KubeObject) -> Result<KubeObject, ClusterError> {
        with_builder!(self, b => merge_into(b, existing))
    }
}

#[cfg(test)]
mod tests;
