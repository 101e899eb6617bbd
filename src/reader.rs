use std::{collections::BTreeMap, path::Path};

use k8s_openapi::api::{
    core::v1::Service,
    networking::v1::{Ingress, IngressClass, ServiceBackendPort},
};
use kube::{Api, Resource, ResourceExt, api::ListParams};
use serde::{Deserialize, de::DeserializeOwned};

use crate::{
    crds::gce::{BackendConfig, FrontendConfig},
    err::{I2GError, I2GResult},
    ir::ObjectKey,
    utils::ObjectMetaI2GExt,
};

/// Everything the providers may look at.
#[derive(Debug, Clone, Default)]
pub struct InputResources {
    pub ingresses: Vec<Ingress>,
    pub services: BTreeMap<ObjectKey, Service>,
    pub ingress_classes: BTreeMap<String, IngressClass>,
    pub backend_configs: BTreeMap<ObjectKey, BackendConfig>,
    pub frontend_configs: BTreeMap<ObjectKey, FrontendConfig>,
}

impl InputResources {
    /// Parses a multi-document YAML (or JSON) string.
    pub fn from_yaml(content: &str, namespace: Option<&str>) -> I2GResult<Self> {
        let mut resources = Self::default();
        for document in serde_yaml::Deserializer::from_str(content) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            resources.add_value(value, namespace)?;
        }
        Ok(resources)
    }

    pub fn read_file(path: &Path, namespace: Option<&str>) -> I2GResult<Self> {
        tracing::info!("Reading resources from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, namespace)
    }

    /// Lists all supported kinds from the cluster, either in one namespace or
    /// in all of them.
    pub async fn read_cluster(client: kube::Client, namespace: Option<&str>) -> I2GResult<Self> {
        tracing::info!(
            "Reading resources from the cluster in {}",
            namespace.unwrap_or("all namespaces")
        );
        let (ingresses, services, ingress_classes, backend_configs, frontend_configs) = futures::try_join!(
            list_namespaced::<Ingress>(&client, namespace),
            list_namespaced::<Service>(&client, namespace),
            list_cluster::<IngressClass>(&client),
            list_namespaced::<BackendConfig>(&client, namespace),
            list_namespaced::<FrontendConfig>(&client, namespace),
        )?;

        let mut resources = Self::default();
        for ingress in ingresses {
            resources.add_ingress(ingress);
        }
        for service in services {
            resources.services.insert(ObjectKey::of(&service), service);
        }
        for class in ingress_classes {
            resources.ingress_classes.insert(class.name_any(), class);
        }
        for config in backend_configs {
            resources.backend_configs.insert(ObjectKey::of(&config), config);
        }
        for config in frontend_configs {
            resources.frontend_configs.insert(ObjectKey::of(&config), config);
        }
        Ok(resources)
    }

    fn add_value(&mut self, value: serde_yaml::Value, namespace: Option<&str>) -> I2GResult<()> {
        let Some(kind) = value.get("kind").and_then(|kind| kind.as_str()) else {
            return Err(I2GError::InvalidResource(
                "document without a 'kind' field".to_string(),
            ));
        };
        let group = api_group(&value).to_string();
        match kind {
            "List" => {
                let items = value
                    .get("items")
                    .and_then(|items| items.as_sequence())
                    .cloned()
                    .unwrap_or_default();
                for item in items {
                    self.add_value(item, namespace)?;
                }
            }
            "Ingress" => {
                if let Some(ingress) = namespaced::<Ingress>(value, namespace)? {
                    self.add_ingress(ingress);
                }
            }
            "Service" => {
                if let Some(service) = namespaced::<Service>(value, namespace)? {
                    self.services.insert(ObjectKey::of(&service), service);
                }
            }
            "IngressClass" => {
                let class = serde_yaml::from_value::<IngressClass>(value)?;
                self.ingress_classes.insert(class.name_any(), class);
            }
            "BackendConfig" if group == BackendConfig::group(&()) => {
                if let Some(config) = namespaced::<BackendConfig>(value, namespace)? {
                    self.backend_configs.insert(ObjectKey::of(&config), config);
                }
            }
            "FrontendConfig" if group == FrontendConfig::group(&()) => {
                if let Some(config) = namespaced::<FrontendConfig>(value, namespace)? {
                    self.frontend_configs.insert(ObjectKey::of(&config), config);
                }
            }
            other => {
                tracing::debug!("Skipping unsupported kind {other} of group '{group}'");
            }
        }
        Ok(())
    }

    fn add_ingress(&mut self, mut ingress: Ingress) {
        ingress.metadata.namespace = Some(ingress.metadata.namespace_or_default());
        self.ingresses.push(ingress);
    }

    /// Resolves a Service port reference to its number.
    ///
    /// Numbered ports are returned as is; named ports are looked up on the
    /// Service object.
    pub fn service_port(
        &self,
        namespace: &str,
        service: &str,
        port: &ServiceBackendPort,
    ) -> Option<i32> {
        if let Some(number) = port.number {
            return Some(number);
        }
        let port_name = port.name.as_ref()?;
        self.services
            .get(&ObjectKey::new(namespace, service))
            .and_then(|svc| svc.spec.as_ref())
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| {
                ports
                    .iter()
                    .find(|port| port.name.as_ref() == Some(port_name))
            })
            .map(|port| port.port)
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<&Service> {
        self.services.get(&ObjectKey::new(namespace, name))
    }

    /// Controller string of an IngressClass, e.g. `k8s.io/ingress-nginx`.
    pub fn class_controller(&self, class: &str) -> Option<&str> {
        self.ingress_classes
            .get(class)
            .and_then(|class| class.spec.as_ref())
            .and_then(|spec| spec.controller.as_deref())
    }
}

/// Deserializes a namespaced object, defaulting its namespace and applying
/// the namespace filter.
/// API group of a manifest, empty for the core group.
fn api_group(value: &serde_yaml::Value) -> &str {
    value
        .get("apiVersion")
        .and_then(|version| version.as_str())
        .and_then(|version| version.rsplit_once('/'))
        .map_or("", |(group, _)| group)
}

fn namespaced<K>(value: serde_yaml::Value, namespace: Option<&str>) -> I2GResult<Option<K>>
where
    K: kube::Resource + DeserializeOwned,
{
    let mut obj = serde_yaml::from_value::<K>(value)?;
    let obj_namespace = obj.meta().namespace_or_default();
    if namespace.is_some_and(|filter| filter != obj_namespace) {
        tracing::debug!(
            "Skipping {} outside of namespace filter",
            ObjectKey::new(&obj_namespace, obj.name_any())
        );
        return Ok(None);
    }
    obj.meta_mut().namespace = Some(obj_namespace);
    Ok(Some(obj))
}

async fn list_namespaced<K>(client: &kube::Client, namespace: Option<&str>) -> I2GResult<Vec<K>>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let api = match namespace {
        Some(ns) => Api::<K>::namespaced(client.clone(), ns),
        None => Api::<K>::all(client.clone()),
    };
    list_or_empty(api).await
}

async fn list_cluster<K>(client: &kube::Client) -> I2GResult<Vec<K>>
where
    K: kube::Resource<Scope = k8s_openapi::ClusterResourceScope>
        + Clone
        + DeserializeOwned
        + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    list_or_empty(Api::<K>::all(client.clone())).await
}

async fn list_or_empty<K>(api: Api<K>) -> I2GResult<Vec<K>>
where
    K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.list(&ListParams::default()).await {
        Ok(list) => Ok(list.items),
        Err(kube::Error::Api(err)) if err.code == 404 => {
            tracing::debug!("Resource kind is not installed in the cluster, skipping");
            Ok(Vec::new())
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use k8s_openapi::api::networking::v1::ServiceBackendPort;

    use super::*;

    const MANIFESTS: &str = r#"
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: web
spec:
  ingressClassName: nginx
  rules:
    - host: foo.example.com
---
---
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: Service
    metadata:
      name: web
      namespace: default
    spec:
      ports:
        - name: http
          port: 8080
  - apiVersion: networking.k8s.io/v1
    kind: Ingress
    metadata:
      name: other
      namespace: team
    spec: {}
---
apiVersion: networking.k8s.io/v1
kind: IngressClass
metadata:
  name: nginx
spec:
  controller: k8s.io/ingress-nginx
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: ignored
"#;

    #[test]
    fn reads_all_documents() {
        let resources = InputResources::from_yaml(MANIFESTS, None).unwrap();
        assert_eq!(resources.ingresses.len(), 2);
        assert_eq!(
            resources.ingresses[0].metadata.namespace.as_deref(),
            Some("default")
        );
        assert_eq!(resources.services.len(), 1);
        assert_eq!(resources.class_controller("nginx"), Some("k8s.io/ingress-nginx"));
    }

    #[test]
    fn namespace_filter_drops_other_namespaces() {
        let resources = InputResources::from_yaml(MANIFESTS, Some("team")).unwrap();
        assert_eq!(resources.ingresses.len(), 1);
        assert_eq!(resources.ingresses[0].name_any(), "other");
        assert!(resources.services.is_empty());
        assert_eq!(resources.ingress_classes.len(), 1);
    }

    #[test]
    fn document_without_kind_is_an_error() {
        let err = InputResources::from_yaml("apiVersion: v1\nmetadata: {}\n", None);
        assert!(matches!(err, Err(I2GError::InvalidResource(_))));
    }

    #[test]
    fn resolves_named_ports() {
        let resources = InputResources::from_yaml(MANIFESTS, None).unwrap();
        let named = ServiceBackendPort {
            name: Some("http".to_string()),
            number: None,
        };
        let numbered = ServiceBackendPort {
            name: None,
            number: Some(9090),
        };
        let missing = ServiceBackendPort {
            name: Some("grpc".to_string()),
            number: None,
        };
        assert_eq!(resources.service_port("default", "web", &named), Some(8080));
        assert_eq!(resources.service_port("default", "web", &numbered), Some(9090));
        assert_eq!(resources.service_port("default", "web", &missing), None);
    }

    #[test]
    fn gke_configs_are_matched_by_group() {
        let raw = r#"
apiVersion: cloud.google.com/v1
kind: BackendConfig
metadata:
  name: web
  namespace: default
spec:
  securityPolicy:
    name: edge
---
apiVersion: example.com/v1
kind: BackendConfig
metadata:
  name: other
  namespace: default
spec:
  unrelated: true
---
apiVersion: networking.gke.io/v1beta1
kind: FrontendConfig
metadata:
  name: web
  namespace: default
spec: {}
---
apiVersion: example.com/v1
kind: FrontendConfig
metadata:
  name: other
  namespace: default
"#;
        let resources = InputResources::from_yaml(raw, None).unwrap();
        assert_eq!(
            resources.backend_configs.keys().collect::<Vec<_>>(),
            vec![&ObjectKey::new("default", "web")]
        );
        assert_eq!(
            resources.frontend_configs.keys().collect::<Vec<_>>(),
            vec![&ObjectKey::new("default", "web")]
        );
    }

    #[test]
    fn reads_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"apiVersion":"v1","kind":"Service","metadata":{{"name":"api"}},"spec":{{}}}}"#
        )
        .unwrap();
        let resources = InputResources::read_file(file.path(), None).unwrap();
        assert!(resources.service("default", "api").is_some());
    }
}
