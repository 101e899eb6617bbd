//! GKE Gateway policies for the settings carried over from GKE Ingress.

use super::{Emitter, GatewayResources, report_ingress_nginx_policies};
use crate::{
    crds::{
        PolicyTargetReference,
        gce::{BackendConfigSpec, HealthCheckConfig},
        gke::{
            CommonHealthCheck, GCPBackendPolicy, GCPBackendPolicyConfig, GCPBackendPolicySpec,
            GCPGatewayPolicy, GCPGatewayPolicyConfig, GCPGatewayPolicySpec, HealthCheck,
            HealthCheckPolicy, HealthCheckPolicyConfig, HealthCheckPolicySpec, SessionAffinity,
        },
    },
    err::I2GResult,
    ir::{Ir, ObjectKey},
    notifications::Notifications,
};

const NAME: &str = "gke";
const DEFAULT_HEALTH_CHECK_TYPE: &str = "HTTP";

pub struct GkeEmitter;

impl Emitter for GkeEmitter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn emit(&self, ir: Ir, notes: &mut Notifications) -> I2GResult<GatewayResources> {
        report_ingress_nginx_policies(&ir, NAME, notes);

        let mut resources = GatewayResources::from_ir(&ir);
        for (key, ctx) in &ir.gateways {
            let Some(ssl_policy) = ctx.provider.gce.as_ref().and_then(|gce| gce.ssl_policy.clone())
            else {
                continue;
            };
            let mut policy = GCPGatewayPolicy::new(
                &key.name,
                GCPGatewayPolicySpec {
                    default: GCPGatewayPolicyConfig {
                        ssl_policy: Some(ssl_policy),
                    },
                    target_ref: PolicyTargetReference::gateway(&key.name),
                },
            );
            policy.metadata.namespace = Some(key.namespace.clone());
            resources.push_extension(&policy)?;
        }

        for (key, ctx) in &ir.services {
            let Some(config) = ctx.provider.gce.as_ref().and_then(|gce| gce.backend_config.as_ref())
            else {
                continue;
            };
            if let Some(policy) = backend_policy(key, config) {
                resources.push_extension(&policy)?;
            }
            if let Some(health_check) = &config.health_check {
                resources.push_extension(&health_check_policy(key, health_check, notes))?;
            }
        }
        Ok(resources)
    }
}

fn backend_policy(key: &ObjectKey, config: &BackendConfigSpec) -> Option<GCPBackendPolicy> {
    let session_affinity = config
        .session_affinity
        .as_ref()
        .and_then(|affinity| {
            Some(SessionAffinity {
                affinity_type: affinity.affinity_type.clone()?,
                cookie_ttl_sec: affinity.affinity_cookie_ttl_sec,
            })
        });
    let security_policy = config
        .security_policy
        .as_ref()
        .map(|policy| policy.name.clone());
    if session_affinity.is_none() && security_policy.is_none() {
        return None;
    }
    let mut policy = GCPBackendPolicy::new(
        &key.name,
        GCPBackendPolicySpec {
            default: GCPBackendPolicyConfig {
                session_affinity,
                security_policy,
            },
            target_ref: PolicyTargetReference::service(&key.name),
        },
    );
    policy.metadata.namespace = Some(key.namespace.clone());
    Some(policy)
}

fn health_check_policy(
    key: &ObjectKey,
    health_check: &HealthCheckConfig,
    notes: &mut Notifications,
) -> HealthCheckPolicy {
    let check_type = health_check
        .protocol
        .clone()
        .unwrap_or_else(|| DEFAULT_HEALTH_CHECK_TYPE.to_string())
        .to_uppercase();
    let common = Some(CommonHealthCheck {
        port: health_check.port,
        request_path: health_check.request_path.clone(),
    });
    let mut config = HealthCheck {
        check_type: check_type.clone(),
        ..Default::default()
    };
    match check_type.as_str() {
        "HTTPS" => config.https_health_check = common,
        "HTTP2" => config.http2_health_check = common,
        "HTTP" => config.http_health_check = common,
        other => {
            notes.warn(
                NAME,
                key,
                format!("health check type {other} is not supported, using HTTP"),
            );
            config.check_type = DEFAULT_HEALTH_CHECK_TYPE.to_string();
            config.http_health_check = common;
        }
    }

    let mut policy = HealthCheckPolicy::new(
        &key.name,
        HealthCheckPolicySpec {
            default: HealthCheckPolicyConfig {
                check_interval_sec: health_check.check_interval_sec,
                timeout_sec: health_check.timeout_sec,
                healthy_threshold: health_check.healthy_threshold,
                unhealthy_threshold: health_check.unhealthy_threshold,
                config,
            },
            target_ref: PolicyTargetReference::service(&key.name),
        },
    );
    policy.metadata.namespace = Some(key.namespace.clone());
    policy
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        emitters::test_utils::{ir_of, kinds},
        providers::gce::GceProvider,
    };

    const INPUT: &str = r#"
apiVersion: networking.gke.io/v1beta1
kind: FrontendConfig
metadata:
  name: store-frontend
  namespace: store
spec:
  sslPolicy: restricted-tls
---
apiVersion: cloud.google.com/v1
kind: BackendConfig
metadata:
  name: store-backend
  namespace: store
spec:
  sessionAffinity:
    affinityType: CLIENT_IP
  healthCheck:
    type: HTTP
    requestPath: /ready
    port: 9000
    checkIntervalSec: 10
    unhealthyThreshold: 3
---
apiVersion: v1
kind: Service
metadata:
  name: store
  namespace: store
  annotations:
    cloud.google.com/backend-config: '{"default": "store-backend"}'
spec:
  ports:
    - port: 80
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: store
  namespace: store
  annotations:
    kubernetes.io/ingress.class: gce
    networking.gke.io/v1beta1.FrontendConfig: store-frontend
spec:
  rules:
    - host: store.example.com
      http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: store
                port:
                  number: 80
"#;

    #[test]
    fn emits_gke_policies() {
        let ir = ir_of(&GceProvider, INPUT);
        let mut notes = Notifications::new();
        let resources = GkeEmitter.emit(ir, &mut notes).unwrap();
        assert!(notes.is_empty(), "{notes}");

        assert_eq!(
            kinds(&resources.extensions),
            vec![
                ("GCPGatewayPolicy".to_string(), "gce".to_string()),
                ("GCPBackendPolicy".to_string(), "store".to_string()),
                ("HealthCheckPolicy".to_string(), "store".to_string()),
            ]
        );
        let gateway_policy = &resources.extensions[0];
        assert_eq!(gateway_policy["metadata"]["namespace"], "store");
        assert_eq!(gateway_policy["spec"]["default"]["sslPolicy"], "restricted-tls");
        assert_eq!(gateway_policy["spec"]["targetRef"]["kind"], "Gateway");

        let backend = &resources.extensions[1]["spec"];
        assert_eq!(backend["default"]["sessionAffinity"]["type"], "CLIENT_IP");
        assert!(backend["default"].get("securityPolicy").is_none());
        assert_eq!(backend["targetRef"]["kind"], "Service");

        let health = &resources.extensions[2]["spec"]["default"];
        assert_eq!(health["checkIntervalSec"], 10);
        assert_eq!(health["unhealthyThreshold"], 3);
        assert_eq!(health["config"]["type"], "HTTP");
        assert_eq!(health["config"]["httpHealthCheck"]["port"], 9000);
        assert_eq!(health["config"]["httpHealthCheck"]["requestPath"], "/ready");
    }

    #[rstest]
    #[case(Some("https"), "HTTPS", "httpsHealthCheck", 0)]
    #[case(Some("HTTP2"), "HTTP2", "http2HealthCheck", 0)]
    #[case(None, "HTTP", "httpHealthCheck", 0)]
    #[case(Some("TCP"), "HTTP", "httpHealthCheck", 1)]
    fn health_check_types(
        #[case] protocol: Option<&str>,
        #[case] expected_type: &str,
        #[case] block: &str,
        #[case] warnings: usize,
    ) {
        let config = HealthCheckConfig {
            protocol: protocol.map(str::to_string),
            request_path: Some("/healthz".to_string()),
            ..Default::default()
        };
        let mut notes = Notifications::new();
        let policy = health_check_policy(&ObjectKey::new("store", "store"), &config, &mut notes);
        let value = serde_json::to_value(&policy).unwrap();
        let check = &value["spec"]["default"]["config"];
        assert_eq!(check["type"], expected_type);
        assert_eq!(check[block]["requestPath"], "/healthz");
        assert_eq!(notes.items().len(), warnings);
    }
}
