use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{Ingress, IngressBackend, IngressRule, IngressTLS};
use kube::ResourceExt;

use crate::utils::{self, ObjectMetaI2GExt};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleGroupKey {
    pub namespace: String,
    pub ingress_class: String,
    pub host: String,
}

/// A rule together with the Ingress it was declared in.
#[derive(Debug, Clone)]
pub struct SourcedRule {
    pub ingress_name: String,
    pub rule: IngressRule,
}

/// Rules of every Ingress sharing a namespace, class and host.
#[derive(Debug, Clone)]
pub struct IngressRuleGroup {
    /// Name of the Ingress that created the group.
    pub name: String,
    pub namespace: String,
    pub ingress_class: String,
    pub host: String,
    pub tls: Vec<IngressTLS>,
    pub rules: Vec<SourcedRule>,
}

impl IngressRuleGroup {
    pub fn has_tls(&self) -> bool {
        !self.tls.is_empty()
    }

    /// Hostname used for the group listeners.
    ///
    /// Falls back to the TLS host when the rule has no host and the group
    /// holds a single certificate for a single host.
    pub fn listener_hostname(&self) -> Option<String> {
        if !self.host.is_empty() {
            return Some(self.host.clone());
        }
        match self.tls.as_slice() {
            [tls] => match tls.hosts.as_deref() {
                Some([host]) if !host.is_empty() => Some(host.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn secret_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.tls.iter().filter_map(|tls| tls.secret_name.as_ref()) {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

#[derive(Debug, Clone)]
pub struct DefaultBackend {
    pub ingress_name: String,
    pub namespace: String,
    pub ingress_class: String,
    pub backend: IngressBackend,
}

#[derive(Debug, Default)]
pub struct IngressAggregator {
    groups: BTreeMap<RuleGroupKey, IngressRuleGroup>,
    /// Group keys in creation order.
    order: Vec<RuleGroupKey>,
    default_backends: Vec<DefaultBackend>,
}

impl IngressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ingress(&mut self, ingress: &Ingress) {
        let namespace = ingress.metadata.namespace_or_default();
        let ingress_class = utils::ingress_class(ingress);
        let ingress_name = ingress.name_any();
        let Some(spec) = ingress.spec.as_ref() else {
            tracing::debug!("Ingress {namespace}/{ingress_name} has no spec");
            return;
        };

        for rule in spec.rules.iter().flatten() {
            let key = RuleGroupKey {
                namespace: namespace.clone(),
                ingress_class: ingress_class.clone(),
                host: rule.host.clone().unwrap_or_default(),
            };
            if !self.groups.contains_key(&key) {
                self.order.push(key.clone());
            }
            let group = self
                .groups
                .entry(key.clone())
                .or_insert_with(|| IngressRuleGroup {
                    name: ingress_name.clone(),
                    namespace: namespace.clone(),
                    ingress_class: ingress_class.clone(),
                    host: key.host.clone(),
                    tls: Vec::new(),
                    rules: Vec::new(),
                });
            for tls in spec.tls.iter().flatten() {
                let duplicate = group
                    .tls
                    .iter()
                    .any(|known| known.secret_name == tls.secret_name && known.hosts == tls.hosts);
                if !duplicate {
                    group.tls.push(tls.clone());
                }
            }
            group.rules.push(SourcedRule {
                ingress_name: ingress_name.clone(),
                rule: rule.clone(),
            });
        }

        if let Some(backend) = spec.default_backend.as_ref() {
            self.default_backends.push(DefaultBackend {
                ingress_name,
                namespace,
                ingress_class,
                backend: backend.clone(),
            });
        }
    }

    /// Rule groups in the order they were created.
    pub fn rule_groups(&self) -> Vec<&IngressRuleGroup> {
        self.order
            .iter()
            .filter_map(|key| self.groups.get(key))
            .collect()
    }

    pub fn default_backends(&self) -> &[DefaultBackend] {
        &self.default_backends
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingresses() -> Vec<Ingress> {
        let raw = r#"
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: first
  namespace: default
spec:
  ingressClassName: nginx
  tls:
    - hosts: [foo.example.com]
      secretName: foo-cert
  defaultBackend:
    service:
      name: fallback
      port:
        number: 80
  rules:
    - host: foo.example.com
      http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: web
                port:
                  number: 80
    - http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: web
                port:
                  number: 80
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: second
  namespace: default
spec:
  ingressClassName: nginx
  tls:
    - hosts: [foo.example.com]
      secretName: foo-cert
  rules:
    - host: foo.example.com
      http:
        paths:
          - path: /api
            pathType: Prefix
            backend:
              service:
                name: api
                port:
                  number: 8080
"#;
        crate::reader::InputResources::from_yaml(raw, None)
            .unwrap()
            .ingresses
    }

    #[test]
    fn groups_rules_by_host() {
        let mut aggregator = IngressAggregator::new();
        for ingress in ingresses() {
            aggregator.add_ingress(&ingress);
        }
        let groups = aggregator.rule_groups();
        assert_eq!(groups.len(), 2);

        let foo = groups[0];
        assert_eq!(foo.host, "foo.example.com");
        assert_eq!(foo.name, "first");
        assert_eq!(foo.rules.len(), 2);
        assert_eq!(
            foo.rules
                .iter()
                .map(|rule| rule.ingress_name.as_str())
                .collect::<Vec<_>>(),
            vec!["first", "second"]
        );
        assert_eq!(foo.tls.len(), 1);
        assert_eq!(foo.secret_names(), vec!["foo-cert"]);

        let catch_all = groups[1];
        assert_eq!(catch_all.host, "");
        assert_eq!(
            catch_all.listener_hostname().as_deref(),
            Some("foo.example.com")
        );

        assert_eq!(aggregator.default_backends().len(), 1);
        assert_eq!(aggregator.default_backends()[0].ingress_name, "first");
    }
}
