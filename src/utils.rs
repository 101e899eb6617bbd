use std::{sync::LazyLock, time::Duration};

use gateway_api::apis::standard::{gateways, httproutes::HTTPRouteParentRefs};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{ResourceExt, api::ObjectMeta};
use regex::Regex;

use crate::consts;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-zA-Z0-9]+").expect("static regex"));

pub trait ObjectMetaI2GExt {
    fn annotation(&self, key: &str) -> Option<&str>;

    fn namespace_or_default(&self) -> String;
}

impl ObjectMetaI2GExt for ObjectMeta {
    fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|ann| ann.get(key))
            .map(|value| value.trim())
    }

    fn namespace_or_default(&self) -> String {
        self.namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| consts::DEFAULT_NAMESPACE.to_string())
    }
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "enabled" | "on" | "yes" => Some(true),
        "false" | "disabled" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Turns a hostname into something usable inside an object name.
///
/// Every run of characters outside `[a-zA-Z0-9]` becomes a single `-`,
/// leading and trailing dashes are dropped, and an empty result becomes
/// `all-hosts`.
pub fn name_from_host(host: &str) -> String {
    let replaced = NON_ALPHANUMERIC.replace_all(host, "-");
    let trimmed = replaced.trim_matches('-');
    if trimmed.is_empty() {
        return consts::ALL_HOSTS.to_string();
    }
    trimmed.to_string()
}

pub fn route_name(ingress_name: &str, host: &str) -> String {
    format!("{}-{}", ingress_name, name_from_host(host))
}

/// Prefix shared by the listeners generated for a hostname, e.g. `foo-example-com-`.
pub fn listener_prefix(hostname: Option<&str>) -> String {
    match hostname {
        Some(host) if !host.is_empty() => format!("{}-", name_from_host(host)),
        _ => String::new(),
    }
}

/// Resolves the ingress class the same way ingress controllers do: the
/// `spec.ingressClassName` field wins over the legacy annotation, and an
/// Ingress with neither is grouped under its own name.
pub fn ingress_class(ingress: &Ingress) -> String {
    if let Some(class) = ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.ingress_class_name.as_ref())
        .filter(|class| !class.is_empty())
    {
        return class.clone();
    }
    if let Some(class) = ingress
        .metadata
        .annotation(consts::INGRESS_CLASS_ANNOTATION)
        .filter(|class| !class.is_empty())
    {
        return class.to_string();
    }
    ingress.name_any()
}

/// Splits a comma separated annotation value, dropping empty items.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn gateway_parent_ref(
    gw_name: &str,
    gw_namespace: &str,
    section_name: Option<String>,
) -> HTTPRouteParentRefs {
    let gw_group = <gateways::Gateway as kube::Resource>::group(&());
    let gw_kind = <gateways::Gateway as kube::Resource>::kind(&());
    HTTPRouteParentRefs {
        group: Some(gw_group.to_string()),
        kind: Some(gw_kind.to_string()),
        name: gw_name.to_string(),
        namespace: Some(gw_namespace.to_string()),
        port: None,
        section_name,
    }
}

/// Formats a duration the way Kubernetes duration fields expect it (`30s`, `1500ms`).
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        return format!("{}s", duration.as_secs());
    }
    format!("{}ms", duration.as_millis())
}
