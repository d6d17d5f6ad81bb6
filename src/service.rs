//! Service discovery against the cluster API: node-port URLs, endpoint readiness, secrets

use crate::retry::RetryPolicy;
use crate::template::UrlTemplate;
use crate::{Error, Result, ResultExt};
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::runtime::Runtime;
use url::Url;

#[cfg(test)]
use mockall::automock;

/// Poll budget for a service's endpoints to come up
pub const SERVICE_READY_POLICY: RetryPolicy = RetryPolicy::new(20, Duration::from_secs(6));

const NOT_READY_MESSAGE: &str = "Waiting, endpoint for service is not ready yet...";

/// The slice of the cluster API this crate reads and writes
#[cfg_attr(test, automock)]
pub trait ClusterApi {
    fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;

    /// Services in `namespace`; an empty selector matches all
    fn list_services(&self, namespace: &str, label_selector: &str) -> Result<Vec<Service>>;

    fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints>;

    fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;

    fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`ClusterApi`] over kube-rs, driven on a private current-thread runtime
pub struct KubeClusterApi {
    runtime: Runtime,
    client: Client,
}

impl KubeClusterApi {
    /// Connect using the ambient kubeconfig (`$KUBECONFIG` or `~/.kube/config`)
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let client = runtime
            .block_on(Client::try_default())
            .context("Error creating kubernetes client")?;
        Ok(Self { runtime, client })
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl ClusterApi for KubeClusterApi {
    fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        let api = self.api::<Service>(namespace);
        Ok(self.runtime.block_on(api.get(name))?)
    }

    fn list_services(&self, namespace: &str, label_selector: &str) -> Result<Vec<Service>> {
        let api = self.api::<Service>(namespace);
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        Ok(self.runtime.block_on(api.list(&params))?.items)
    }

    fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints> {
        let api = self.api::<Endpoints>(namespace);
        Ok(self.runtime.block_on(api.get(name))?)
    }

    fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api = self.api::<Secret>(namespace);
        Ok(self.runtime.block_on(api.get_opt(name))?)
    }

    fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let api = self.api::<Secret>(namespace);
        self.runtime
            .block_on(api.create(&PostParams::default(), secret))?;
        Ok(())
    }

    fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api = self.api::<Secret>(namespace);
        self.runtime
            .block_on(api.delete(name, &DeleteParams::default()))?;
        Ok(())
    }
}

/// URLs for one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrl {
    pub namespace: String,
    pub name: String,
    pub urls: Vec<String>,
}

pub type ServiceUrls = Vec<ServiceUrl>;

/// Every node port exposed by `service`, or [`Error::MissingNodePort`]
pub fn node_ports(service: &Service) -> Result<Vec<i32>> {
    let spec = service.spec.as_ref();
    let ports: Vec<i32> = spec
        .and_then(|s| s.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .filter_map(|p| p.node_port)
                .filter(|p| *p > 0)
                .collect()
        })
        .unwrap_or_default();

    if ports.is_empty() {
        return Err(Error::MissingNodePort {
            namespace: service.metadata.namespace.clone().unwrap_or_default(),
            name: service.metadata.name.clone().unwrap_or_default(),
            service_type: spec
                .and_then(|s| s.type_.clone())
                .unwrap_or_else(|| "ClusterIP".to_string()),
        });
    }
    Ok(ports)
}

/// Ready once at least one subset exists and each subset has an address
pub fn check_endpoint_ready(endpoints: &Endpoints) -> Result<()> {
    let subsets = endpoints.subsets.as_deref().unwrap_or_default();
    if subsets.is_empty() {
        return Err(Error::retriable(Error::NotReady(
            "Endpoint for service is not ready yet".into(),
        )));
    }
    if subsets
        .iter()
        .any(|s| s.addresses.as_deref().unwrap_or_default().is_empty())
    {
        return Err(Error::retriable(Error::NotReady(
            "No endpoints for service are ready yet".into(),
        )));
    }
    Ok(())
}

/// Turns services into reachable URLs on the VM's address
pub struct ServiceResolver<'a> {
    cluster: &'a dyn ClusterApi,
    ip: String,
    policy: RetryPolicy,
}

impl<'a> ServiceResolver<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, ip: impl Into<String>) -> Self {
        Self {
            cluster,
            ip: ip.into(),
            policy: SERVICE_READY_POLICY,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn resolve_service_urls(
        &self,
        namespace: &str,
        service: &str,
        template: Option<&UrlTemplate>,
    ) -> Result<Vec<String>> {
        let template = require_template(template)?;
        let svc = self
            .cluster
            .get_service(namespace, service)
            .with_context(|| format!("Error getting service {namespace}/{service}"))?;
        self.urls_for(&svc, template)
    }

    /// URLs for every service in `namespace`; services without a node port get none
    pub fn resolve_all_service_urls(
        &self,
        namespace: &str,
        template: Option<&UrlTemplate>,
    ) -> Result<ServiceUrls> {
        let template = require_template(template)?;
        let services = self
            .cluster
            .list_services(namespace, "")
            .with_context(|| format!("Error listing services in {namespace}"))?;

        let mut result = Vec::with_capacity(services.len());
        for svc in &services {
            let urls = match self.urls_for(svc, template) {
                Ok(urls) => urls,
                Err(e) if e.is_missing_node_port() => Vec::new(),
                Err(e) => return Err(e),
            };
            result.push(ServiceUrl {
                namespace: svc
                    .metadata
                    .namespace
                    .clone()
                    .unwrap_or_else(|| namespace.to_string()),
                name: svc.metadata.name.clone().unwrap_or_default(),
                urls,
            });
        }
        Ok(result)
    }

    fn urls_for(&self, service: &Service, template: &UrlTemplate) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        for port in node_ports(service)? {
            let rendered = template.render(&self.ip, port)?;
            Url::parse(&rendered)?;
            urls.push(rendered);
        }
        Ok(urls)
    }

    /// One readiness probe; any failure is retriable
    pub fn check_service(&self, namespace: &str, service: &str) -> Result<()> {
        let endpoints = self
            .cluster
            .get_endpoints(namespace, service)
            .map_err(Error::retriable)?;
        check_endpoint_ready(&endpoints).inspect_err(|_| eprintln!("{NOT_READY_MESSAGE}"))
    }

    pub fn wait_for_ready(&self, namespace: &str, service: &str) -> Result<()> {
        self.policy.run(|| self.check_service(namespace, service))
    }

    /// Wait for endpoints, then resolve; `https` rewrites the first `http`
    pub fn wait_and_resolve(
        &self,
        namespace: &str,
        service: &str,
        template: Option<&UrlTemplate>,
        https: bool,
    ) -> Result<Vec<String>> {
        self.wait_for_ready(namespace, service).with_context(|| {
            format!("Could not find finalized endpoint being pointed to by {service}")
        })?;
        let urls = self.resolve_service_urls(namespace, service, template)?;
        Ok(urls
            .into_iter()
            .map(|u| if https { u.replacen("http", "https", 1) } else { u })
            .collect())
    }
}

fn require_template(template: Option<&UrlTemplate>) -> Result<&UrlTemplate> {
    template.ok_or_else(|| {
        Error::Config("Error, attempted to generate service url with nil --format template".into())
    })
}

pub fn services_by_label(
    cluster: &dyn ClusterApi,
    namespace: &str,
    key: &str,
    value: &str,
) -> Result<Vec<Service>> {
    cluster
        .list_services(namespace, &format!("{key}={value}"))
        .map_err(Error::retriable)
}

/// Replace secret `name` with an Opaque secret holding `data`
pub fn create_secret(
    cluster: &dyn ClusterApi,
    namespace: &str,
    name: &str,
    data: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> Result<()> {
    if cluster
        .get_secret(namespace, name)
        .map_err(Error::retriable)?
        .is_some()
    {
        delete_secret(cluster, namespace, name)?;
    }

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };

    tracing::debug!(namespace, name, keys = data.len(), "Creating secret");
    cluster
        .create_secret(namespace, &secret)
        .map_err(Error::retriable)
}

pub fn delete_secret(cluster: &dyn ClusterApi, namespace: &str, name: &str) -> Result<()> {
    cluster
        .delete_secret(namespace, name)
        .map_err(Error::retriable)
}
