//! Cilium ingress controller (`ingress.cilium.io/*`).

use super::{
    FeatureInput, FeatureParser, Provider,
    common::{Annotations, https_redirect, prefix_path_match, routes_of},
};
use crate::{
    converter::ConversionOptions,
    err::I2GResult,
    ir::{Ir, ProviderKind},
    notifications::Notifications,
    reader::InputResources,
};

pub const ANNOTATION_PREFIX: &str = "ingress.cilium.io/";
pub const CONTROLLER: &str = "cilium.io/ingress-controller";
const SOURCE: &str = "cilium";

const FEATURES: &[FeatureParser] = &[force_https];

pub struct CiliumProvider {
    ingress_class: String,
}

impl CiliumProvider {
    pub fn new(ingress_class: &str) -> Self {
        Self {
            ingress_class: ingress_class.to_string(),
        }
    }
}

impl Provider for CiliumProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cilium
    }

    fn to_ir(&self, input: &InputResources, notes: &mut Notifications) -> I2GResult<Ir> {
        let selected = input
            .ingresses
            .iter()
            .filter(|ingress| {
                super::class_matches(ingress, input, &[self.ingress_class.as_str()], Some(CONTROLLER))
            })
            .collect::<Vec<_>>();
        let options = ConversionOptions {
            implementation_specific_match: Some(prefix_path_match),
            ..ConversionOptions::new(SOURCE)
        };
        Ok(super::convert(
            self.kind(),
            input,
            selected,
            &options,
            FEATURES,
            notes,
        ))
    }
}

/// `force-https: enabled` sends plain HTTP clients to HTTPS.
fn force_https(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let annotations = Annotations::new(ingress, ANNOTATION_PREFIX);
        if !annotations.is_true("force-https") {
            continue;
        }
        let key = &annotations.key;
        for route_key in routes_of(ir, &key.namespace, &key.name) {
            https_redirect(ir, &route_key, SOURCE, notes);
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::providers::test_utils::{key, run};

    fn input(force_https: &str) -> String {
        format!(
            r#"
apiVersion: networking.k8s.io/v1
kind: IngressClass
metadata:
  name: shared-lb
spec:
  controller: cilium.io/ingress-controller
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: details
  namespace: default
  annotations:
    ingress.cilium.io/force-https: "{force_https}"
spec:
  ingressClassName: shared-lb
  tls:
    - hosts: [bookinfo.example.com]
      secretName: bookinfo-tls
  rules:
    - host: bookinfo.example.com
      http:
        paths:
          - path: /details
            pathType: Prefix
            backend:
              service:
                name: details
                port:
                  number: 9080
"#
        )
    }

    #[rstest]
    #[case("enabled", true)]
    #[case("true", true)]
    #[case("disabled", false)]
    fn force_https_values(#[case] value: &str, #[case] redirected: bool) {
        let (ir, _) = run(&CiliumProvider::new("cilium"), &input(value));
        assert_eq!(ir.gateways.keys().collect::<Vec<_>>(), vec![&key("shared-lb")]);
        assert_eq!(
            ir.http_routes
                .contains_key(&key("details-bookinfo-example-com-https-redirect")),
            redirected
        );
    }
}
