//! Conversion of aggregated Ingress rules into Gateway API objects.
//!
//! This part is shared by every provider. Provider specific behavior is
//! injected through [`ConversionOptions`].

use std::collections::{BTreeMap, BTreeSet};

use gateway_api::apis::standard::{
    gateways::{
        Gateway, GatewayListeners, GatewayListenersTls, GatewayListenersTlsCertificateRefs,
        GatewaySpec,
    },
    httproutes::{
        HTTPRoute, HTTPRouteRules, HTTPRouteRulesBackendRefs, HTTPRouteRulesMatches,
        HTTPRouteRulesMatchesPath, HTTPRouteRulesMatchesPathType, HTTPRouteSpec,
    },
};
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};

use crate::{
    aggregator::{DefaultBackend, IngressAggregator, IngressRuleGroup},
    consts,
    ir::{GatewayContext, HttpRouteContext, Ir, ObjectKey, ProviderGatewayIr},
    notifications::Notifications,
    reader::InputResources,
    utils,
};

/// Maps an `ImplementationSpecific` path of the given Ingress to a path match.
pub type ImplementationSpecificMatch = fn(&Ingress, &str) -> Option<HTTPRouteRulesMatchesPath>;

#[derive(Debug, Clone, Copy)]
pub struct ConversionOptions {
    /// Name reported in notifications.
    pub source: &'static str,
    pub implementation_specific_match: Option<ImplementationSpecificMatch>,
    pub gateway_class_name: fn(&str) -> String,
}

impl ConversionOptions {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            implementation_specific_match: None,
            gateway_class_name: str::to_string,
        }
    }
}

pub fn prefix_match(path: &str) -> HTTPRouteRulesMatchesPath {
    path_match(HTTPRouteRulesMatchesPathType::PathPrefix, path)
}

pub fn path_match(kind: HTTPRouteRulesMatchesPathType, path: &str) -> HTTPRouteRulesMatchesPath {
    HTTPRouteRulesMatchesPath {
        r#type: Some(kind),
        value: Some(path.to_string()),
    }
}

pub fn http_listener_name(hostname: Option<&str>) -> String {
    format!("{}http", utils::listener_prefix(hostname))
}

pub fn https_listener_name(hostname: Option<&str>) -> String {
    format!("{}https", utils::listener_prefix(hostname))
}

/// Converts the given Ingresses into a provider-less IR.
pub fn to_ir(
    ingresses: &[&Ingress],
    input: &InputResources,
    options: &ConversionOptions,
    notes: &mut Notifications,
) -> Ir {
    let mut aggregator = IngressAggregator::new();
    for ingress in ingresses {
        aggregator.add_ingress(ingress);
    }
    let by_key = ingresses
        .iter()
        .map(|ingress| (ObjectKey::of(*ingress), *ingress))
        .collect::<BTreeMap<_, _>>();

    let mut ir = Ir::default();
    for group in aggregator.rule_groups() {
        let gateway = ensure_gateway(&mut ir, &group.namespace, &group.ingress_class, options);
        add_listeners(gateway, group);

        let route_key = ObjectKey::new(
            group.namespace.clone(),
            utils::route_name(&group.name, &group.host),
        );
        if ir.http_routes.contains_key(&route_key) {
            notes.warn(
                options.source,
                &route_key,
                "HTTPRoute name is already taken by another rule group, skipping",
            );
            continue;
        }
        let ctx = convert_group(group, &route_key, &by_key, input, options, notes);
        ir.http_routes.insert(route_key, ctx);
    }

    for default_backend in aggregator.default_backends() {
        convert_default_backend(&mut ir, default_backend, input, options, notes);
    }
    ir
}

fn ensure_gateway<'a>(
    ir: &'a mut Ir,
    namespace: &str,
    class: &str,
    options: &ConversionOptions,
) -> &'a mut Gateway {
    let key = ObjectKey::new(namespace, class);
    &mut ir
        .gateways
        .entry(key)
        .or_insert_with(|| {
            let mut gateway = Gateway::new(
                class,
                GatewaySpec {
                    gateway_class_name: (options.gateway_class_name)(class),
                    listeners: Vec::new(),
                    ..Default::default()
                },
            );
            gateway.metadata.namespace = Some(namespace.to_string());
            GatewayContext {
                gateway,
                provider: ProviderGatewayIr::default(),
            }
        })
        .gateway
}

fn push_listener(gateway: &mut Gateway, listener: GatewayListeners) {
    let listeners = &mut gateway.spec.listeners;
    if listeners.iter().all(|known| known.name != listener.name) {
        listeners.push(listener);
    }
}

fn add_listeners(gateway: &mut Gateway, group: &IngressRuleGroup) {
    let hostname = group.listener_hostname();
    push_listener(
        gateway,
        GatewayListeners {
            name: http_listener_name(hostname.as_deref()),
            hostname: hostname.clone(),
            port: consts::HTTP_PORT,
            protocol: consts::HTTP_PROTOCOL.to_string(),
            ..Default::default()
        },
    );
    if !group.has_tls() {
        return;
    }
    let certificate_refs = group
        .secret_names()
        .into_iter()
        .map(|name| GatewayListenersTlsCertificateRefs {
            name,
            ..Default::default()
        })
        .collect::<Vec<_>>();
    push_listener(
        gateway,
        GatewayListeners {
            name: https_listener_name(hostname.as_deref()),
            hostname,
            port: consts::HTTPS_PORT,
            protocol: consts::HTTPS_PROTOCOL.to_string(),
            tls: Some(GatewayListenersTls {
                certificate_refs: Some(certificate_refs),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
}

/// A merged rule under construction: one path match and its deduplicated backends.
struct PendingRule {
    key: (String, String),
    path: HTTPRouteRulesMatchesPath,
    backends: Vec<(HTTPRouteRulesBackendRefs, BTreeSet<String>)>,
}

fn convert_group(
    group: &IngressRuleGroup,
    route_key: &ObjectKey,
    by_key: &BTreeMap<ObjectKey, &Ingress>,
    input: &InputResources,
    options: &ConversionOptions,
    notes: &mut Notifications,
) -> HttpRouteContext {
    let mut pending: Vec<PendingRule> = Vec::new();

    for sourced in &group.rules {
        let ingress_key = ObjectKey::new(group.namespace.clone(), sourced.ingress_name.clone());
        let Some(http) = sourced.rule.http.as_ref() else {
            continue;
        };
        for ingress_path in &http.paths {
            let path = ingress_path.path.clone().unwrap_or_else(|| "/".to_string());
            let path_type = if ingress_path.path_type.is_empty() {
                "Prefix".to_string()
            } else {
                ingress_path.path_type.clone()
            };
            let matched = match path_type.as_str() {
                "Prefix" => Some(prefix_match(&path)),
                "Exact" => Some(path_match(HTTPRouteRulesMatchesPathType::Exact, &path)),
                "ImplementationSpecific" => {
                    match (options.implementation_specific_match, by_key.get(&ingress_key)) {
                        (Some(convert), Some(ingress)) => convert(ingress, &path),
                        _ => None,
                    }
                }
                _ => None,
            };
            let Some(matched) = matched else {
                notes.error(
                    options.source,
                    &ingress_key,
                    format!("path '{path}' with type {path_type} cannot be converted, skipping"),
                );
                continue;
            };
            let backend_ref =
                match backend_ref(&ingress_path.backend, &group.namespace, input) {
                    Ok(backend_ref) => backend_ref,
                    Err(reason) => {
                        notes.error(
                            options.source,
                            &ingress_key,
                            format!("backend of path '{path}' skipped: {reason}"),
                        );
                        continue;
                    }
                };

            let key = (path_type, path);
            let position = match pending.iter().position(|rule| rule.key == key) {
                Some(position) => position,
                None => {
                    pending.push(PendingRule {
                        key,
                        path: matched,
                        backends: Vec::new(),
                    });
                    pending.len() - 1
                }
            };
            let backends = &mut pending[position].backends;
            match backends.iter_mut().find(|(known, _)| *known == backend_ref) {
                Some((_, sources)) => {
                    sources.insert(sourced.ingress_name.clone());
                }
                None => {
                    backends.push((backend_ref, BTreeSet::from([sourced.ingress_name.clone()])));
                }
            }
        }
    }

    let mut rules = Vec::with_capacity(pending.len());
    let mut backend_sources = Vec::with_capacity(pending.len());
    for rule in pending {
        let (refs, sources): (Vec<_>, Vec<_>) = rule.backends.into_iter().unzip();
        rules.push(HTTPRouteRules {
            matches: Some(vec![HTTPRouteRulesMatches {
                path: Some(rule.path),
                ..Default::default()
            }]),
            backend_refs: Some(refs),
            ..Default::default()
        });
        backend_sources.push(sources);
    }

    let mut route = HTTPRoute::new(
        &route_key.name,
        HTTPRouteSpec {
            parent_refs: Some(vec![utils::gateway_parent_ref(
                &group.ingress_class,
                &group.namespace,
                None,
            )]),
            hostnames: (!group.host.is_empty()).then(|| vec![group.host.clone()]),
            rules: Some(rules),
            ..Default::default()
        },
    );
    route.metadata.namespace = Some(group.namespace.clone());
    let mut ctx = HttpRouteContext::new(route, backend_sources);
    ctx.listener_hostname = group.listener_hostname();
    ctx
}

fn convert_default_backend(
    ir: &mut Ir,
    default_backend: &DefaultBackend,
    input: &InputResources,
    options: &ConversionOptions,
    notes: &mut Notifications,
) {
    let ingress_key = ObjectKey::new(
        default_backend.namespace.clone(),
        default_backend.ingress_name.clone(),
    );
    let backend_ref = match backend_ref(&default_backend.backend, &default_backend.namespace, input)
    {
        Ok(backend_ref) => backend_ref,
        Err(reason) => {
            notes.error(
                options.source,
                &ingress_key,
                format!("default backend skipped: {reason}"),
            );
            return;
        }
    };

    let gateway_key = ObjectKey::new(
        default_backend.namespace.clone(),
        default_backend.ingress_class.clone(),
    );
    if !ir.gateways.contains_key(&gateway_key) {
        let gateway = ensure_gateway(
            ir,
            &default_backend.namespace,
            &default_backend.ingress_class,
            options,
        );
        push_listener(
            gateway,
            GatewayListeners {
                name: http_listener_name(None),
                port: consts::HTTP_PORT,
                protocol: consts::HTTP_PROTOCOL.to_string(),
                ..Default::default()
            },
        );
    }

    let route_key = ObjectKey::new(
        default_backend.namespace.clone(),
        format!("{}-default-backend", default_backend.ingress_name),
    );
    let mut route = HTTPRoute::new(
        &route_key.name,
        HTTPRouteSpec {
            parent_refs: Some(vec![utils::gateway_parent_ref(
                &default_backend.ingress_class,
                &default_backend.namespace,
                None,
            )]),
            hostnames: None,
            rules: Some(vec![HTTPRouteRules {
                backend_refs: Some(vec![backend_ref]),
                ..Default::default()
            }]),
            ..Default::default()
        },
    );
    route.metadata.namespace = Some(default_backend.namespace.clone());
    let sources = vec![vec![BTreeSet::from([default_backend.ingress_name.clone()])]];
    ir.http_routes
        .insert(route_key, HttpRouteContext::new(route, sources));
}

/// Converts an Ingress backend into a backendRef.
fn backend_ref(
    backend: &IngressBackend,
    namespace: &str,
    input: &InputResources,
) -> Result<HTTPRouteRulesBackendRefs, String> {
    match (&backend.service, &backend.resource) {
        (Some(_), Some(_)) => Err("both service and resource backends are set".to_string()),
        (Some(service), None) => {
            let Some(port) = service.port.as_ref() else {
                return Err(format!("service {} has no port", service.name));
            };
            let Some(port) = input.service_port(namespace, &service.name, port) else {
                return Err(format!(
                    "cannot resolve port {} of service {}",
                    port.name.as_deref().unwrap_or_default(),
                    service.name
                ));
            };
            Ok(HTTPRouteRulesBackendRefs {
                name: service.name.clone(),
                port: Some(port),
                ..Default::default()
            })
        }
        (None, Some(resource)) => Ok(HTTPRouteRulesBackendRefs {
            group: Some(resource.api_group.clone().unwrap_or_default()),
            kind: Some(resource.kind.clone()),
            name: resource.name.clone(),
            ..Default::default()
        }),
        (None, None) => Err("backend has neither service nor resource".to_string()),
    }
}
