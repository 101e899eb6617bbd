use std::collections::BTreeSet;

use gateway_api::apis::standard::{
    grpcroutes::{
        GRPCRoute, GRPCRouteParentRefs, GRPCRouteRules, GRPCRouteRulesBackendRefs,
        GRPCRouteRulesMatches, GRPCRouteRulesMatchesMethod, GRPCRouteRulesMatchesMethodType,
        GRPCRouteSpec,
    },
    httproutes::{HTTPRouteParentRefs, HTTPRouteRules},
};

use super::{SOURCE, annotations};
use crate::{
    ir::{GrpcRouteContext, Ir, ObjectKey, ProviderGrpcRouteIr},
    notifications::Notifications,
    providers::{
        FeatureInput,
        common::{routes_of, rule_targets_only},
    },
    utils::split_list,
};

fn parent_ref(parent: &HTTPRouteParentRefs) -> GRPCRouteParentRefs {
    GRPCRouteParentRefs {
        group: parent.group.clone(),
        kind: parent.kind.clone(),
        name: parent.name.clone(),
        namespace: parent.namespace.clone(),
        port: parent.port,
        section_name: parent.section_name.clone(),
    }
}

/// `/pkg.Service` and `/pkg.Service/Method` become exact method matches.
fn method_match(path: &str) -> Result<Option<GRPCRouteRulesMatchesMethod>, ()> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(None);
    }
    let mut parts = trimmed.trim_end_matches('/').split('/');
    let service = parts.next().filter(|service| !service.is_empty()).ok_or(())?;
    let method = parts.next().filter(|method| !method.is_empty());
    if parts.next().is_some() {
        return Err(());
    }
    Ok(Some(GRPCRouteRulesMatchesMethod {
        service: Some(service.to_string()),
        method: method.map(str::to_string),
        r#type: Some(GRPCRouteRulesMatchesMethodType::Exact),
    }))
}

fn grpc_rule(rule: HTTPRouteRules, route_key: &ObjectKey, notes: &mut Notifications) -> GRPCRouteRules {
    let path = rule
        .matches
        .iter()
        .flatten()
        .find_map(|route_match| route_match.path.as_ref()?.value.clone())
        .unwrap_or_else(|| "/".to_string());
    let matches = match method_match(&path) {
        Ok(Some(method)) => Some(vec![GRPCRouteRulesMatches {
            method: Some(method),
            ..Default::default()
        }]),
        Ok(None) => None,
        Err(()) => {
            notes.warn(
                SOURCE,
                route_key,
                format!("path '{path}' is not a gRPC service or method, the rule matches every call"),
            );
            None
        }
    };
    let backend_refs = rule
        .backend_refs
        .into_iter()
        .flatten()
        .map(|backend| GRPCRouteRulesBackendRefs {
            group: backend.group,
            kind: backend.kind,
            name: backend.name,
            namespace: backend.namespace,
            port: backend.port,
            weight: backend.weight,
            ..Default::default()
        })
        .collect();
    GRPCRouteRules {
        matches,
        backend_refs: Some(backend_refs),
        ..Default::default()
    }
}

/// Moves the rules of `ingress` that only target gRPC services into a
/// GRPCRoute named like the HTTPRoute. An HTTPRoute left without rules is dropped.
fn move_rules(
    ir: &mut Ir,
    route_key: &ObjectKey,
    ingress: &str,
    services: &BTreeSet<String>,
    notes: &mut Notifications,
) {
    let Some(ctx) = ir.http_routes.get_mut(route_key) else {
        return;
    };
    let mut moved = Vec::new();
    for rule in ctx.rules_of(ingress).into_iter().rev() {
        if rule_targets_only(ctx, rule, services) {
            if let Some((rule, _)) = ctx.remove_rule(rule) {
                moved.push(rule);
            }
        } else if ctx
            .backend_refs(rule)
            .iter()
            .any(|backend| services.contains(&backend.name))
        {
            notes.warn(
                SOURCE,
                route_key,
                format!("rule {rule} mixes gRPC and HTTP backends, it stays an HTTPRoute"),
            );
        }
    }
    if moved.is_empty() {
        return;
    }
    moved.reverse();

    let parent_refs = ctx
        .route
        .spec
        .parent_refs
        .as_ref()
        .map(|refs| refs.iter().map(parent_ref).collect());
    let hostnames = ctx.route.spec.hostnames.clone();
    let mut provider = ProviderGrpcRouteIr::default();
    for kind in ctx.provider.populated() {
        provider.merge(ProviderGrpcRouteIr::for_provider(kind));
    }
    if ctx.rules().is_empty() {
        ir.http_routes.remove(route_key);
    }

    let rules = moved
        .into_iter()
        .map(|rule| grpc_rule(rule, route_key, notes))
        .collect::<Vec<_>>();
    let grpc = ir
        .grpc_routes
        .entry(route_key.clone())
        .or_insert_with(|| {
            let mut route = GRPCRoute::new(
                &route_key.name,
                GRPCRouteSpec {
                    parent_refs,
                    hostnames,
                    rules: Some(Vec::new()),
                    ..Default::default()
                },
            );
            route.metadata.namespace = Some(route_key.namespace.clone());
            GrpcRouteContext { route, provider }
        });
    grpc.route
        .spec
        .rules
        .get_or_insert_with(Vec::new)
        .extend(rules);
}

pub(super) fn parse(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let annotations = annotations(ingress);
        let services = annotations
            .get("grpc-services")
            .map(split_list)
            .unwrap_or_default()
            .into_iter()
            .collect::<BTreeSet<_>>();
        if services.is_empty() {
            continue;
        }
        let key = &annotations.key;
        for route_key in routes_of(ir, &key.namespace, &key.name) {
            move_rules(ir, &route_key, &key.name, &services, notes);
        }
    }
}
