//! Building blocks shared by the annotation features of several providers.

use std::{collections::BTreeSet, str::FromStr};

use gateway_api::apis::standard::{
    gateways::GatewayListeners,
    httproutes::{
        HTTPRoute, HTTPRouteRules, HTTPRouteRulesFilters, HTTPRouteRulesFiltersRequestHeaderModifier,
        HTTPRouteRulesFiltersRequestHeaderModifierSet, HTTPRouteRulesFiltersRequestRedirect,
        HTTPRouteRulesFiltersRequestRedirectScheme, HTTPRouteRulesFiltersResponseHeaderModifier,
        HTTPRouteRulesFiltersResponseHeaderModifierSet, HTTPRouteRulesFiltersType,
        HTTPRouteRulesFiltersUrlRewrite, HTTPRouteRulesFiltersUrlRewritePath,
        HTTPRouteRulesFiltersUrlRewritePathType, HTTPRouteRulesMatchesPath,
        HTTPRouteRulesMatchesPathType, HTTPRouteSpec,
    },
};

use k8s_openapi::api::networking::v1::Ingress;

use crate::{
    consts, converter,
    ir::{HttpRouteContext, Ir, ObjectKey, ProviderHttpRouteIr},
    notifications::Notifications,
    utils::{ObjectMetaI2GExt, parse_flag},
};

/// Reads the annotations of one Ingress under a vendor prefix.
pub struct Annotations<'a> {
    pub ingress: &'a Ingress,
    pub key: ObjectKey,
    prefix: &'static str,
}

impl<'a> Annotations<'a> {
    pub fn new(ingress: &'a Ingress, prefix: &'static str) -> Self {
        Self {
            ingress,
            key: ObjectKey::of(ingress),
            prefix,
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.ingress
            .metadata
            .annotation(&format!("{}{}", self.prefix, name))
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(parse_flag)
    }

    pub fn is_true(&self, name: &str) -> bool {
        self.flag(name).unwrap_or(false)
    }

    /// Parses an annotation, reporting a warning when the value is invalid.
    pub fn parse<T: FromStr>(&self, name: &str, source: &str, notes: &mut Notifications) -> Option<T> {
        let raw = self.get(name)?;
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                self.invalid(name, raw, source, notes);
                None
            }
        }
    }

    pub fn invalid(&self, name: &str, raw: &str, source: &str, notes: &mut Notifications) {
        notes.warn(
            source,
            &self.key,
            format!("ignoring invalid value '{raw}' of annotation {}{name}", self.prefix),
        );
    }

    /// Annotation names under the prefix, without the prefix.
    pub fn names(&self) -> Vec<&'a str> {
        self.ingress
            .metadata
            .annotations
            .iter()
            .flatten()
            .filter_map(|(key, _)| key.strip_prefix(self.prefix))
            .collect()
    }
}

/// ImplementationSpecific paths treated as plain prefixes.
pub fn prefix_path_match(_: &Ingress, path: &str) -> Option<HTTPRouteRulesMatchesPath> {
    Some(converter::prefix_match(path))
}

fn filters_mut(rule: &mut HTTPRouteRules) -> &mut Vec<HTTPRouteRulesFilters> {
    rule.filters.get_or_insert_with(Vec::new)
}

fn filter_of_type(
    rule: &mut HTTPRouteRules,
    kind: HTTPRouteRulesFiltersType,
) -> &mut HTTPRouteRulesFilters {
    let filters = filters_mut(rule);
    let position = match filters.iter().position(|filter| filter.r#type == kind) {
        Some(position) => position,
        None => {
            filters.push(HTTPRouteRulesFilters {
                r#type: kind,
                ..Default::default()
            });
            filters.len() - 1
        }
    };
    &mut filters[position]
}

/// Sets a request header, replacing an earlier value for the same name.
pub fn set_request_header(rule: &mut HTTPRouteRules, name: &str, value: &str) {
    let filter = filter_of_type(rule, HTTPRouteRulesFiltersType::RequestHeaderModifier);
    let modifier = filter
        .request_header_modifier
        .get_or_insert_with(HTTPRouteRulesFiltersRequestHeaderModifier::default);
    let set = modifier.set.get_or_insert_with(Vec::new);
    set.retain(|header| !header.name.eq_ignore_ascii_case(name));
    set.push(HTTPRouteRulesFiltersRequestHeaderModifierSet {
        name: name.to_string(),
        value: value.to_string(),
    });
}

pub fn set_response_header(rule: &mut HTTPRouteRules, name: &str, value: &str) {
    let filter = filter_of_type(rule, HTTPRouteRulesFiltersType::ResponseHeaderModifier);
    let modifier = filter
        .response_header_modifier
        .get_or_insert_with(HTTPRouteRulesFiltersResponseHeaderModifier::default);
    let set = modifier.set.get_or_insert_with(Vec::new);
    set.retain(|header| !header.name.eq_ignore_ascii_case(name));
    set.push(HTTPRouteRulesFiltersResponseHeaderModifierSet {
        name: name.to_string(),
        value: value.to_string(),
    });
}

pub fn remove_response_header(rule: &mut HTTPRouteRules, name: &str) {
    let filter = filter_of_type(rule, HTTPRouteRulesFiltersType::ResponseHeaderModifier);
    let modifier = filter
        .response_header_modifier
        .get_or_insert_with(HTTPRouteRulesFiltersResponseHeaderModifier::default);
    let remove = modifier.remove.get_or_insert_with(Vec::new);
    if !remove.iter().any(|known| known.eq_ignore_ascii_case(name)) {
        remove.push(name.to_string());
    }
}

/// Adds or updates the URLRewrite filter of a rule.
///
/// The path is rewritten with `ReplacePrefixMatch` when every match of the
/// rule is a `PathPrefix`, and with `ReplaceFullPath` otherwise.
pub fn set_url_rewrite(rule: &mut HTTPRouteRules, path: Option<&str>, hostname: Option<&str>) {
    let prefix_only = rule.matches.iter().flatten().all(|matched| {
        matched.path.as_ref().is_none_or(|path| {
            path.r#type
                .as_ref()
                .is_none_or(|kind| *kind == HTTPRouteRulesMatchesPathType::PathPrefix)
        })
    });
    let filter = filter_of_type(rule, HTTPRouteRulesFiltersType::UrlRewrite);
    let rewrite = filter
        .url_rewrite
        .get_or_insert_with(HTTPRouteRulesFiltersUrlRewrite::default);
    if let Some(path) = path {
        rewrite.path = Some(if prefix_only {
            HTTPRouteRulesFiltersUrlRewritePath {
                r#type: HTTPRouteRulesFiltersUrlRewritePathType::ReplacePrefixMatch,
                replace_prefix_match: Some(path.to_string()),
                ..Default::default()
            }
        } else {
            HTTPRouteRulesFiltersUrlRewritePath {
                r#type: HTTPRouteRulesFiltersUrlRewritePathType::ReplaceFullPath,
                replace_full_path: Some(path.to_string()),
                ..Default::default()
            }
        });
    }
    if let Some(hostname) = hostname {
        rewrite.hostname = Some(hostname.to_string());
    }
}

fn find_listener<'a>(
    listeners: &'a [GatewayListeners],
    hostname: Option<&str>,
    protocol: &str,
) -> Option<&'a GatewayListeners> {
    listeners
        .iter()
        .find(|listener| listener.protocol == protocol && listener.hostname.as_deref() == hostname)
}

/// Splits a route into an HTTPS route and an HTTP to HTTPS redirect.
///
/// The original route is pinned to the HTTPS listener of its Gateway and a
/// `<route>-https-redirect` route answering with a 301 is attached to the
/// HTTP listener.
pub fn https_redirect(ir: &mut Ir, route_key: &ObjectKey, source: &str, notes: &mut Notifications) {
    let redirect_key = ObjectKey::new(
        route_key.namespace.clone(),
        format!("{}-https-redirect", route_key.name),
    );
    if ir.http_routes.contains_key(&redirect_key) {
        return;
    }
    let Some(ctx) = ir.http_routes.get(route_key) else {
        return;
    };
    let Some(parent) = ctx
        .route
        .spec
        .parent_refs
        .as_ref()
        .and_then(|refs| refs.first())
        .cloned()
    else {
        return;
    };
    let hostname = ctx.listener_hostname.clone();
    let Some(gateway_key) = parent_gateway(ctx, &route_key.namespace) else {
        return;
    };

    let (http_section, https_section) = match ir.gateways.get(&gateway_key) {
        Some(gateway) => {
            let listeners = gateway.gateway.spec.listeners.as_slice();
            (
                find_listener(listeners, hostname.as_deref(), consts::HTTP_PROTOCOL)
                    .map(|listener| listener.name.clone()),
                find_listener(listeners, hostname.as_deref(), consts::HTTPS_PROTOCOL)
                    .map(|listener| listener.name.clone()),
            )
        }
        None => (None, None),
    };

    // The redirect carries the provider slots but none of their data.
    let mut provider = ProviderHttpRouteIr::default();
    for kind in ctx.provider.populated() {
        provider.merge(ProviderHttpRouteIr::for_provider(kind));
    }
    let hostnames = ctx.route.spec.hostnames.clone();
    let listener_hostname = hostname.clone();

    match https_section {
        Some(section) => {
            if let Some(ctx) = ir.http_routes.get_mut(route_key) {
                for parent_ref in ctx.route.spec.parent_refs.iter_mut().flatten() {
                    parent_ref.section_name = Some(section.clone());
                }
            }
        }
        None => notes.warn(
            source,
            route_key,
            "HTTPS redirect requested but the Gateway has no HTTPS listener for this host",
        ),
    }

    let mut redirect_parent = parent;
    redirect_parent.section_name = http_section;
    let mut route = HTTPRoute::new(
        &redirect_key.name,
        HTTPRouteSpec {
            parent_refs: Some(vec![redirect_parent]),
            hostnames,
            rules: Some(vec![HTTPRouteRules {
                filters: Some(vec![HTTPRouteRulesFilters {
                    r#type: HTTPRouteRulesFiltersType::RequestRedirect,
                    request_redirect: Some(HTTPRouteRulesFiltersRequestRedirect {
                        scheme: Some(HTTPRouteRulesFiltersRequestRedirectScheme::Https),
                        status_code: Some(301),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        },
    );
    route.metadata.namespace = Some(redirect_key.namespace.clone());
    let mut redirect = HttpRouteContext::new(route, vec![Vec::new()]);
    redirect.provider = provider;
    redirect.listener_hostname = listener_hostname;
    ir.http_routes.insert(redirect_key, redirect);
}

/// Key of the Gateway the route attaches to first.
pub fn parent_gateway(ctx: &HttpRouteContext, route_namespace: &str) -> Option<ObjectKey> {
    let parent = ctx.route.spec.parent_refs.as_ref()?.first()?;
    Some(ObjectKey::new(
        parent
            .namespace
            .clone()
            .unwrap_or_else(|| route_namespace.to_string()),
        parent.name.clone(),
    ))
}

/// Whether the Gateway of the route serves its hostname over HTTPS.
pub fn has_https_listener(ir: &Ir, route_key: &ObjectKey) -> bool {
    let Some(ctx) = ir.http_routes.get(route_key) else {
        return false;
    };
    parent_gateway(ctx, &route_key.namespace)
        .and_then(|gateway_key| ir.gateways.get(&gateway_key))
        .is_some_and(|gateway| {
            find_listener(
                &gateway.gateway.spec.listeners,
                ctx.listener_hostname.as_deref(),
                consts::HTTPS_PROTOCOL,
            )
            .is_some()
        })
}

/// Applies `apply` to every rule the Ingress owns alone. Rules shared with
/// other Ingresses are left untouched and reported.
pub fn for_each_owned_rule(
    ir: &mut Ir,
    ingress: &ObjectKey,
    source: &str,
    feature: &str,
    notes: &mut Notifications,
    mut apply: impl FnMut(&mut HTTPRouteRules),
) {
    for route_key in routes_of(ir, &ingress.namespace, &ingress.name) {
        let Some(ctx) = ir.http_routes.get_mut(&route_key) else {
            continue;
        };
        for rule in ctx.rules_of(&ingress.name) {
            if !ctx.rule_owned_by(rule, &ingress.name) {
                notes.warn(
                    source,
                    ingress,
                    format!("rule {rule} of {route_key} is shared with other Ingresses, {feature} skipped"),
                );
                continue;
            }
            if let Some(rule) = ctx.rules_mut().get_mut(rule) {
                apply(rule);
            }
        }
    }
}

/// Route keys of every route built from the given Ingress.
pub fn routes_of(ir: &Ir, namespace: &str, ingress: &str) -> Vec<ObjectKey> {
    ir.http_routes
        .iter()
        .filter(|(key, ctx)| key.namespace == namespace && ctx.source_ingresses().contains(ingress))
        .map(|(key, _)| key.clone())
        .collect()
}

/// Names of the Services the Ingress routes to, default backend included.
pub fn backend_services(ingress: &Ingress) -> BTreeSet<String> {
    let Some(spec) = ingress.spec.as_ref() else {
        return BTreeSet::new();
    };
    let default = spec.default_backend.iter();
    let paths = spec
        .rules
        .iter()
        .flatten()
        .filter_map(|rule| rule.http.as_ref())
        .flat_map(|http| http.paths.iter().map(|path| &path.backend));
    default
        .chain(paths)
        .filter_map(|backend| backend.service.as_ref())
        .map(|service| service.name.clone())
        .collect()
}

/// True when every backend of the rule is one of the given Services.
pub fn rule_targets_only(ctx: &HttpRouteContext, rule: usize, services: &BTreeSet<String>) -> bool {
    let refs = ctx.backend_refs(rule);
    !refs.is_empty() && refs.iter().all(|backend| services.contains(&backend.name))
}
