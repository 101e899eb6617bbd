//! GKE Ingress (`gce` and `gce-internal` classes).
//!
//! GKE keeps most of its settings outside the Ingress: the Gateway side in a
//! `FrontendConfig` and the backend side in `BackendConfig` objects referenced
//! from the Services.

use std::collections::BTreeMap;

use gateway_api::apis::standard::{
    gateways::GatewayAddresses,
    httproutes::{HTTPRouteRulesMatchesPath, HTTPRouteRulesMatchesPathType},
};
use k8s_openapi::api::networking::v1::Ingress;
use serde::Deserialize;

use super::{
    FeatureInput, FeatureParser, Provider,
    common::{https_redirect, routes_of},
};
use crate::{
    converter::{self, ConversionOptions},
    err::I2GResult,
    ir::{GceServiceIr, Ir, ObjectKey, ProviderKind},
    notifications::Notifications,
    reader::InputResources,
    utils::{self, ObjectMetaI2GExt},
};

pub const GCE_CLASS: &str = "gce";
pub const GCE_INTERNAL_CLASS: &str = "gce-internal";
const SOURCE: &str = "gce";

const EXTERNAL_GATEWAY_CLASS: &str = "gke-l7-global-external-managed";
const INTERNAL_GATEWAY_CLASS: &str = "gke-l7-rilb";

const STATIC_IP_ANNOTATION: &str = "kubernetes.io/ingress.global-static-ip-name";
const FRONTEND_CONFIG_ANNOTATION: &str = "networking.gke.io/v1beta1.FrontendConfig";
const BACKEND_CONFIG_ANNOTATIONS: [&str; 2] = [
    "cloud.google.com/backend-config",
    "beta.cloud.google.com/backend-config",
];
const NAMED_ADDRESS: &str = "NamedAddress";

const FEATURES: &[FeatureParser] = &[static_ip, frontend_config, backend_config];

pub struct GceProvider;

impl Provider for GceProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gce
    }

    fn to_ir(&self, input: &InputResources, notes: &mut Notifications) -> I2GResult<Ir> {
        let selected = input
            .ingresses
            .iter()
            .filter(|ingress| {
                super::class_matches(ingress, input, &[GCE_CLASS, GCE_INTERNAL_CLASS], None)
            })
            .collect::<Vec<_>>();
        let options = ConversionOptions {
            implementation_specific_match: Some(implementation_specific_match),
            gateway_class_name,
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

fn gateway_class_name(ingress_class: &str) -> String {
    match ingress_class {
        GCE_INTERNAL_CLASS => INTERNAL_GATEWAY_CLASS,
        _ => EXTERNAL_GATEWAY_CLASS,
    }
    .to_string()
}

/// `/foo/*` is a prefix match on `/foo`, anything else is exact.
fn implementation_specific_match(_: &Ingress, path: &str) -> Option<HTTPRouteRulesMatchesPath> {
    let matched = match path.strip_suffix("/*") {
        Some("") => converter::prefix_match("/"),
        Some(prefix) => converter::prefix_match(prefix),
        None => converter::path_match(HTTPRouteRulesMatchesPathType::Exact, path),
    };
    Some(matched)
}

fn gateway_key(ingress: &Ingress) -> ObjectKey {
    ObjectKey::new(
        ingress.metadata.namespace_or_default(),
        utils::ingress_class(ingress),
    )
}

fn static_ip(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let Some(address) = ingress.metadata.annotation(STATIC_IP_ANNOTATION) else {
            continue;
        };
        let Some(gateway) = ir.gateways.get_mut(&gateway_key(ingress)) else {
            continue;
        };
        let addresses = gateway.gateway.spec.addresses.get_or_insert_with(Vec::new);
        match addresses.first() {
            Some(existing) if existing.value != address => notes.warn(
                SOURCE,
                ObjectKey::of(*ingress),
                format!(
                    "static IP {address} conflicts with {} already set on the Gateway",
                    existing.value
                ),
            ),
            Some(_) => {}
            None => addresses.push(GatewayAddresses {
                r#type: Some(NAMED_ADDRESS.to_string()),
                value: address.to_string(),
            }),
        }
    }
}

fn frontend_config(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let Some(name) = ingress.metadata.annotation(FRONTEND_CONFIG_ANNOTATION) else {
            continue;
        };
        let ingress_key = ObjectKey::of(*ingress);
        let config_key = ObjectKey::new(ingress_key.namespace.clone(), name);
        let Some(config) = input.input.frontend_configs.get(&config_key) else {
            notes.warn(
                SOURCE,
                &ingress_key,
                format!("FrontendConfig {config_key} not found"),
            );
            continue;
        };

        if let Some(ssl_policy) = &config.spec.ssl_policy {
            if let Some(gateway) = ir.gateways.get_mut(&gateway_key(ingress)) {
                let slot = gateway.provider.gce.get_or_insert_with(Default::default);
                match &slot.ssl_policy {
                    Some(existing) if existing != ssl_policy => notes.warn(
                        SOURCE,
                        &ingress_key,
                        format!("sslPolicy {ssl_policy} conflicts with {existing} on the Gateway"),
                    ),
                    _ => slot.ssl_policy = Some(ssl_policy.clone()),
                }
            }
        }

        if config
            .spec
            .redirect_to_https
            .as_ref()
            .is_some_and(|redirect| redirect.enabled)
        {
            for route_key in routes_of(ir, &ingress_key.namespace, &ingress_key.name) {
                https_redirect(ir, &route_key, SOURCE, notes);
            }
        }
    }
}

/// Value of the `cloud.google.com/backend-config` Service annotation.
#[derive(Debug, Default, Deserialize)]
struct BackendConfigReference {
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    ports: BTreeMap<String, String>,
}

fn backend_config(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    let mut services = Vec::new();
    for (route_key, ctx) in &ir.http_routes {
        for rule in 0..ctx.rules().len() {
            for backend in ctx.backend_refs(rule) {
                if backend.kind.as_deref().is_none_or(|kind| kind == "Service") {
                    services.push(ObjectKey::new(route_key.namespace.clone(), backend.name.clone()));
                }
            }
        }
    }
    services.sort();
    services.dedup();

    for service_key in services {
        let Some(service) = input.input.service(&service_key.namespace, &service_key.name) else {
            continue;
        };
        let Some(raw) = BACKEND_CONFIG_ANNOTATIONS
            .iter()
            .find_map(|annotation| service.metadata.annotation(annotation))
        else {
            continue;
        };
        let reference = match serde_json::from_str::<BackendConfigReference>(raw) {
            Ok(reference) => reference,
            Err(err) => {
                notes.warn(
                    SOURCE,
                    &service_key,
                    format!("invalid backend-config annotation: {err}"),
                );
                continue;
            }
        };
        if !reference.ports.is_empty() {
            notes.warn(
                SOURCE,
                &service_key,
                "per-port BackendConfigs are not supported, only the default one is converted",
            );
        }
        let Some(name) = reference.default else {
            continue;
        };
        let config_key = ObjectKey::new(service_key.namespace.clone(), name);
        let Some(config) = input.input.backend_configs.get(&config_key) else {
            notes.warn(
                SOURCE,
                &service_key,
                format!("BackendConfig {config_key} not found"),
            );
            continue;
        };
        ir.service_mut(service_key).provider.gce = Some(GceServiceIr {
            backend_config: Some(config.spec.clone()),
        });
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::providers::test_utils::run;

    #[rstest]
    #[case("/static/*", HTTPRouteRulesMatchesPathType::PathPrefix, "/static")]
    #[case("/*", HTTPRouteRulesMatchesPathType::PathPrefix, "/")]
    #[case("/healthz", HTTPRouteRulesMatchesPathType::Exact, "/healthz")]
    fn implementation_specific_paths(
        #[case] path: &str,
        #[case] kind: HTTPRouteRulesMatchesPathType,
        #[case] value: &str,
    ) {
        let matched = implementation_specific_match(&Ingress::default(), path).unwrap();
        assert_eq!(matched.r#type, Some(kind));
        assert_eq!(matched.value.as_deref(), Some(value));
    }

    const INPUT: &str = r#"
apiVersion: networking.gke.io/v1beta1
kind: FrontendConfig
metadata:
  name: web-frontend
  namespace: shop
spec:
  sslPolicy: modern-tls
  redirectToHttps:
    enabled: true
---
apiVersion: cloud.google.com/v1
kind: BackendConfig
metadata:
  name: web-backend
  namespace: shop
spec:
  sessionAffinity:
    affinityType: GENERATED_COOKIE
    affinityCookieTtlSec: 60
  securityPolicy:
    name: edge-armor
---
apiVersion: v1
kind: Service
metadata:
  name: web
  namespace: shop
  annotations:
    cloud.google.com/backend-config: '{"default": "web-backend"}'
spec:
  ports:
    - name: http
      port: 8080
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: web
  namespace: shop
  annotations:
    kubernetes.io/ingress.class: gce-internal
    kubernetes.io/ingress.global-static-ip-name: web-ip
    networking.gke.io/v1beta1.FrontendConfig: web-frontend
spec:
  tls:
    - secretName: web-cert
  rules:
    - host: shop.example.com
      http:
        paths:
          - path: /*
            pathType: ImplementationSpecific
            backend:
              service:
                name: web
                port:
                  name: http
"#;

    #[test]
    fn converts_gke_settings() {
        let (ir, notes) = run(&GceProvider, INPUT);
        assert!(notes.is_empty(), "{notes}");

        let gateway_key = ObjectKey::new("shop", GCE_INTERNAL_CLASS);
        let gateway = &ir.gateways[&gateway_key];
        assert_eq!(gateway.gateway.spec.gateway_class_name, "gke-l7-rilb");
        let address = &gateway.gateway.spec.addresses.as_ref().unwrap()[0];
        assert_eq!(address.r#type.as_deref(), Some("NamedAddress"));
        assert_eq!(address.value, "web-ip");
        assert_eq!(
            gateway.provider.gce.as_ref().unwrap().ssl_policy.as_deref(),
            Some("modern-tls")
        );

        let route_key = ObjectKey::new("shop", "web-shop-example-com");
        let route = &ir.http_routes[&route_key];
        assert_eq!(route.backend_refs(0)[0].port, Some(8080));
        assert!(ir
            .http_routes
            .contains_key(&ObjectKey::new("shop", "web-shop-example-com-https-redirect")));

        let service = &ir.services[&ObjectKey::new("shop", "web")];
        let config = service
            .provider
            .gce
            .as_ref()
            .unwrap()
            .backend_config
            .as_ref()
            .unwrap();
        assert_eq!(config.security_policy.as_ref().unwrap().name, "edge-armor");
    }
}
