//! kgateway policies for the ingress-nginx settings that plain Gateway API
//! cannot carry.
//!
//! A route level policy becomes a `TrafficPolicy`, Service level settings are
//! merged into one `BackendConfigPolicy` per Service and access logging turns
//! into an `HTTPListenerPolicy` on the Gateway.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use gateway_api::apis::standard::httproutes::{
    HTTPRouteRulesBackendRefsFilters, HTTPRouteRulesBackendRefsFiltersExtensionRef,
    HTTPRouteRulesBackendRefsFiltersType,
};
use kube::Resource;

use super::{Emitter, GatewayResources, report_gce_settings};
use crate::{
    crds::{
        LocalObjectReference, PolicyTargetReference,
        kgateway::{
            AccessLog, AuthorizationResponse, BackendConfigPolicy, BackendConfigPolicySpec,
            BackendTls, BasicAuth, Buffer, CookieHash, Cors, ExtAuth, ExtAuthHttpService,
            ExtAuthProvider, FileSink, GatewayExtension, GatewayExtensionSpec, HTTPListenerPolicy,
            HTTPListenerPolicySpec, HashPolicy, Http2ProtocolOptions, KGATEWAY_GROUP, LoadBalancer,
            LocalRateLimit, RateLimit, RingHash, ServiceBackendRef, Timeouts, TokenBucket,
            TrafficPolicy, TrafficPolicySpec,
        },
    },
    err::I2GResult,
    ir::{HttpRouteContext, Ir, ObjectKey, Policy, PolicyIndex, policy::SessionAffinityPolicy},
    notifications::Notifications,
    utils::format_duration,
};

const NAME: &str = "kgateway";
const TRAFFIC_POLICY_KIND: &str = "TrafficPolicy";
const EXT_AUTH_TYPE: &str = "ExtAuth";
const ACCESS_LOG_PATH: &str = "/dev/stdout";

pub struct KgatewayEmitter;

impl Emitter for KgatewayEmitter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn emit(&self, mut ir: Ir, notes: &mut Notifications) -> I2GResult<GatewayResources> {
        report_gce_settings(&ir, NAME, notes);

        let (traffic_policies, extensions) = traffic_policies(&mut ir, notes);
        let backend_policies = backend_config_policies(&ir, notes);
        let listener_policies = listener_policies(&ir, notes);
        tracing::debug!(
            traffic = traffic_policies.len(),
            backend = backend_policies.len(),
            listener = listener_policies.len(),
            "Built kgateway policies"
        );

        let mut resources = GatewayResources::from_ir(&ir);
        for policy in &traffic_policies {
            resources.push_extension(policy)?;
        }
        for extension in &extensions {
            resources.push_extension(extension)?;
        }
        for policy in &backend_policies {
            resources.push_extension(policy)?;
        }
        for policy in &listener_policies {
            resources.push_extension(policy)?;
        }
        Ok(resources)
    }
}

fn in_namespace<K: Resource>(mut resource: K, namespace: &str) -> K {
    resource.meta_mut().namespace = Some(namespace.to_string());
    resource
}

/// Hands out names that are unique per namespace by appending `-2`, `-3`, ...
#[derive(Default)]
struct NameAllocator {
    used: BTreeSet<ObjectKey>,
}

impl NameAllocator {
    fn allocate(&mut self, namespace: &str, base: &str) -> String {
        let mut name = base.to_string();
        let mut suffix = 2;
        while !self.used.insert(ObjectKey::new(namespace, name.as_str())) {
            name = format!("{base}-{suffix}");
            suffix += 1;
        }
        name
    }
}

fn traffic_policy_name(route: &str, ingress: &str) -> String {
    if route.starts_with(&format!("{ingress}-")) {
        route.to_string()
    } else {
        format!("{route}-{ingress}")
    }
}

fn ext_auth_name(ingress: &str) -> String {
    format!("{ingress}-ext-auth")
}

fn traffic_policy_spec(
    route_key: &ObjectKey,
    ingress: &str,
    policy: &Policy,
    notes: &mut Notifications,
) -> TrafficPolicySpec {
    let buffer = policy
        .proxy_body_size
        .as_ref()
        .or(policy.client_body_buffer_size.as_ref())
        .map(|size| Buffer {
            max_request_size: size.clone(),
        });
    let cors = policy.cors.as_ref().map(|cors| Cors {
        allow_origins: cors.allow_origins.clone(),
        allow_methods: cors.allow_methods.clone(),
        allow_headers: cors.allow_headers.clone(),
        expose_headers: cors.expose_headers.clone(),
        allow_credentials: cors.allow_credentials,
        max_age: Some(cors.max_age),
    });
    let rate_limit = policy.rate_limit.map(|limit| RateLimit {
        local: LocalRateLimit {
            token_bucket: TokenBucket {
                max_tokens: limit.limit.saturating_mul(limit.burst_multiplier),
                tokens_per_fill: limit.limit,
                fill_interval: format_duration(limit.unit.fill_interval()),
            },
        },
    });
    let timeouts = policy
        .proxy_send_timeout
        .into_iter()
        .chain(policy.proxy_read_timeout)
        .max()
        .map(|request| Timeouts {
            request: format_duration(request),
        });
    let ext_auth = policy.ext_auth.as_ref().map(|_| ExtAuth {
        extension_ref: LocalObjectReference::new(&ext_auth_name(ingress)),
    });
    let basic_auth = match &policy.basic_auth {
        Some(basic) if basic.secret_namespace != route_key.namespace => {
            notes.warn(
                NAME,
                route_key,
                format!(
                    "basic auth secret {}/{} of Ingress {ingress} is in another namespace, basic auth is skipped",
                    basic.secret_namespace, basic.secret_name
                ),
            );
            None
        }
        Some(basic) => Some(BasicAuth {
            secret_ref: LocalObjectReference::new(&basic.secret_name),
        }),
        None => None,
    };
    TrafficPolicySpec {
        target_refs: Vec::new(),
        buffer,
        cors,
        rate_limit,
        timeouts,
        ext_auth,
        basic_auth,
    }
}

fn ext_auth_extension(route_namespace: &str, ingress: &str, policy: &Policy) -> Option<GatewayExtension> {
    let ext_auth = policy.ext_auth.as_ref()?;
    let spec = GatewayExtensionSpec {
        extension_type: EXT_AUTH_TYPE.to_string(),
        ext_auth: Some(ExtAuthProvider {
            http_service: ExtAuthHttpService {
                backend_ref: ServiceBackendRef {
                    name: ext_auth.service_name.clone(),
                    namespace: (ext_auth.service_namespace != route_namespace)
                        .then(|| ext_auth.service_namespace.clone()),
                    port: ext_auth.port,
                },
                path_prefix: Some(ext_auth.path.clone()),
                authorization_response: (!ext_auth.response_headers.is_empty()).then(|| {
                    AuthorizationResponse {
                        headers_to_backend: ext_auth.response_headers.clone(),
                    }
                }),
            },
        }),
    };
    Some(in_namespace(
        GatewayExtension::new(&ext_auth_name(ingress), spec),
        route_namespace,
    ))
}

/// Points every covered backendRef at the TrafficPolicy.
fn attach_to_backends(ctx: &mut HttpRouteContext, coverage: &BTreeSet<PolicyIndex>, name: &str) {
    for index in coverage {
        let Some(backend) = ctx
            .rules_mut()
            .get_mut(index.rule)
            .and_then(|rule| rule.backend_refs.as_mut())
            .and_then(|refs| refs.get_mut(index.backend))
        else {
            continue;
        };
        backend
            .filters
            .get_or_insert_with(Vec::new)
            .push(HTTPRouteRulesBackendRefsFilters {
                r#type: HTTPRouteRulesBackendRefsFiltersType::ExtensionRef,
                extension_ref: Some(HTTPRouteRulesBackendRefsFiltersExtensionRef {
                    group: KGATEWAY_GROUP.to_string(),
                    kind: TRAFFIC_POLICY_KIND.to_string(),
                    name: name.to_string(),
                }),
                ..Default::default()
            });
    }
}

fn traffic_policies(
    ir: &mut Ir,
    notes: &mut Notifications,
) -> (Vec<TrafficPolicy>, Vec<GatewayExtension>) {
    let mut names = NameAllocator::default();
    let mut policies = Vec::new();
    let mut extensions = BTreeMap::<ObjectKey, GatewayExtension>::new();

    for (route_key, ctx) in ir.http_routes.iter_mut() {
        let Some(slot) = ctx.provider.ingress_nginx.as_ref() else {
            continue;
        };
        let attached = slot.policies.clone();
        let positions = ctx.backend_positions();

        for (ingress, policy) in &attached {
            let mut spec = traffic_policy_spec(route_key, ingress, policy, notes);
            if spec.is_noop() {
                continue;
            }
            if let Some(extension) = ext_auth_extension(&route_key.namespace, ingress, policy) {
                extensions
                    .entry(ObjectKey::new(route_key.namespace.clone(), ext_auth_name(ingress)))
                    .or_insert(extension);
            }

            let name = names.allocate(
                &route_key.namespace,
                &traffic_policy_name(&route_key.name, ingress),
            );
            if policy.covers_all(&positions) {
                spec.target_refs = vec![PolicyTargetReference::http_route(&route_key.name)];
            } else {
                attach_to_backends(ctx, &policy.coverage, &name);
            }
            policies.push(in_namespace(TrafficPolicy::new(&name, spec), &route_key.namespace));
        }
    }
    (policies, extensions.into_values().collect())
}

/// Service level settings collected from every policy covering the Service.
#[derive(Default)]
struct BackendSettings {
    connect_timeouts: BTreeSet<Duration>,
    affinity: Option<(String, SessionAffinityPolicy)>,
    tls: Option<BackendTls>,
    http2: bool,
}

impl BackendSettings {
    fn add(&mut self, service_key: &ObjectKey, ingress: &str, policy: &Policy, notes: &mut Notifications) {
        if let Some(timeout) = policy.proxy_connect_timeout {
            self.connect_timeouts.insert(timeout);
        }
        if let Some(affinity) = &policy.session_affinity {
            match &self.affinity {
                Some((owner, existing)) if existing != affinity => notes.warn(
                    NAME,
                    service_key,
                    format!(
                        "session affinity of Ingress {ingress} conflicts with the one from Ingress {owner}, keeping the first"
                    ),
                ),
                Some(_) => {}
                None => self.affinity = Some((ingress.to_string(), affinity.clone())),
            }
        }
        if let Some(protocol) = policy.backend_protocol {
            if protocol.is_tls() && self.tls.is_none() {
                let settings = policy.backend_tls.clone().unwrap_or_default();
                self.tls = Some(BackendTls {
                    secret_ref: settings.secret.as_deref().map(|secret| {
                        let name = secret.rsplit_once('/').map_or(secret, |(_, name)| name);
                        LocalObjectReference::new(name)
                    }),
                    sni: settings.sni,
                    insecure_skip_verify: (!settings.verify).then_some(true),
                });
            }
            self.http2 |= protocol.is_grpc();
        }
    }

    fn into_spec(self, service_key: &ObjectKey, notes: &mut Notifications) -> Option<BackendConfigPolicySpec> {
        let connect_timeout = self.connect_timeouts.first().copied();
        if let Some(chosen) = connect_timeout.filter(|_| self.connect_timeouts.len() > 1) {
            notes.info(
                NAME,
                service_key,
                format!(
                    "proxy-connect-timeout differs between Ingresses, using the lowest value {}",
                    format_duration(chosen)
                ),
            );
        }
        let load_balancer = self.affinity.map(|(_, affinity)| LoadBalancer {
            ring_hash: RingHash {
                hash_policies: vec![HashPolicy {
                    cookie: CookieHash {
                        name: affinity.cookie_name,
                        path: affinity.cookie_path,
                        ttl: affinity
                            .cookie_max_age
                            .and_then(|age| u64::try_from(age).ok())
                            .map(|age| format_duration(Duration::from_secs(age))),
                    },
                }],
            },
        });
        let spec = BackendConfigPolicySpec {
            target_refs: vec![PolicyTargetReference::service(&service_key.name)],
            connect_timeout: connect_timeout.map(format_duration),
            load_balancer,
            tls: self.tls,
            http2_protocol_options: self.http2.then_some(Http2ProtocolOptions {}),
        };
        let empty = spec.connect_timeout.is_none()
            && spec.load_balancer.is_none()
            && spec.tls.is_none()
            && spec.http2_protocol_options.is_none();
        (!empty).then_some(spec)
    }
}

fn backend_config_policies(ir: &Ir, notes: &mut Notifications) -> Vec<BackendConfigPolicy> {
    let mut settings = BTreeMap::<ObjectKey, BackendSettings>::new();
    for (route_key, ctx) in &ir.http_routes {
        let Some(slot) = &ctx.provider.ingress_nginx else {
            continue;
        };
        for (ingress, policy) in &slot.policies {
            for service in &policy.services {
                let service_key = ObjectKey::new(route_key.namespace.clone(), service.clone());
                settings
                    .entry(service_key.clone())
                    .or_default()
                    .add(&service_key, ingress, policy, notes);
            }
        }
    }

    settings
        .into_iter()
        .filter_map(|(service_key, settings)| {
            let spec = settings.into_spec(&service_key, notes)?;
            let name = format!("{}-backend-config", service_key.name);
            Some(in_namespace(
                BackendConfigPolicy::new(&name, spec),
                &service_key.namespace,
            ))
        })
        .collect()
}

/// Gateways the route is attached to.
fn parent_gateways(route_key: &ObjectKey, ctx: &HttpRouteContext) -> Vec<ObjectKey> {
    ctx.route
        .spec
        .parent_refs
        .iter()
        .flatten()
        .filter(|parent| parent.kind.as_deref().is_none_or(|kind| kind == "Gateway"))
        .map(|parent| {
            ObjectKey::new(
                parent
                    .namespace
                    .clone()
                    .unwrap_or_else(|| route_key.namespace.clone()),
                parent.name.clone(),
            )
        })
        .collect()
}

fn listener_policies(ir: &Ir, notes: &mut Notifications) -> Vec<HTTPListenerPolicy> {
    let mut gateways = BTreeSet::new();
    for (route_key, ctx) in &ir.http_routes {
        let Some(slot) = &ctx.provider.ingress_nginx else {
            continue;
        };
        for (ingress, policy) in &slot.policies {
            match policy.enable_access_log {
                Some(true) => gateways.extend(parent_gateways(route_key, ctx)),
                Some(false) => notes.warn(
                    NAME,
                    route_key,
                    format!(
                        "enable-access-log: false on Ingress {ingress} cannot be expressed, access logs are configured per Gateway"
                    ),
                ),
                None => {}
            }
        }
    }

    gateways
        .into_iter()
        .map(|gateway| {
            let spec = HTTPListenerPolicySpec {
                target_refs: vec![PolicyTargetReference::gateway(&gateway.name)],
                access_log: vec![AccessLog {
                    file_sink: FileSink {
                        path: ACCESS_LOG_PATH.to_string(),
                    },
                }],
            };
            in_namespace(
                HTTPListenerPolicy::new(&format!("{}-access-log", gateway.name), spec),
                &gateway.namespace,
            )
        })
        .collect()
}
