//! Kubernetes community ingress-nginx controller (`nginx.ingress.kubernetes.io/*`).

mod canary;
mod policies;
mod redirect;
mod rewrite;

use std::sync::LazyLock;

use gateway_api::apis::standard::httproutes::{
    HTTPRouteRulesMatchesPath, HTTPRouteRulesMatchesPathType,
};
use k8s_openapi::api::networking::v1::Ingress;
use regex::Regex;

use super::{FeatureInput, FeatureParser, Provider, common::Annotations};
use crate::{
    converter::{self, ConversionOptions},
    err::I2GResult,
    ir::{Ir, ProviderKind},
    notifications::Notifications,
    reader::InputResources,
};

pub const ANNOTATION_PREFIX: &str = "nginx.ingress.kubernetes.io/";
pub const CONTROLLER: &str = "k8s.io/ingress-nginx";
const SOURCE: &str = "ingress-nginx";

static CAPTURE_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\d").expect("static regex"));

/// Annotations understood by at least one feature parser.
const SUPPORTED_ANNOTATIONS: &[&str] = &[
    "canary",
    "canary-weight",
    "canary-weight-total",
    "canary-by-header",
    "canary-by-header-value",
    "canary-by-header-pattern",
    "client-body-buffer-size",
    "proxy-body-size",
    "enable-cors",
    "cors-allow-origin",
    "cors-allow-methods",
    "cors-allow-headers",
    "cors-expose-headers",
    "cors-allow-credentials",
    "cors-max-age",
    "limit-rps",
    "limit-rpm",
    "limit-burst-multiplier",
    "proxy-connect-timeout",
    "proxy-send-timeout",
    "proxy-read-timeout",
    "enable-access-log",
    "auth-url",
    "auth-response-headers",
    "auth-type",
    "auth-secret",
    "auth-secret-type",
    "auth-realm",
    "affinity",
    "session-cookie-name",
    "session-cookie-path",
    "session-cookie-max-age",
    "session-cookie-expires",
    "backend-protocol",
    "proxy-ssl-secret",
    "proxy-ssl-verify",
    "proxy-ssl-name",
    "force-ssl-redirect",
    "ssl-redirect",
    "rewrite-target",
    "upstream-vhost",
    "x-forwarded-prefix",
    "use-regex",
];

const FEATURES: &[FeatureParser] = &[
    report_unsupported,
    canary::parse,
    policies::parse,
    redirect::parse,
    rewrite::parse,
];

pub struct IngressNginxProvider {
    ingress_class: String,
}

impl IngressNginxProvider {
    pub fn new(ingress_class: &str) -> Self {
        Self {
            ingress_class: ingress_class.to_string(),
        }
    }
}

impl Provider for IngressNginxProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::IngressNginx
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
            implementation_specific_match: Some(implementation_specific_match),
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

pub(crate) fn annotations(ingress: &Ingress) -> Annotations<'_> {
    Annotations::new(ingress, ANNOTATION_PREFIX)
}

/// Regex paths are enabled by `use-regex` or implied by a rewrite target
/// that references capture groups.
fn uses_regex(ingress: &Ingress) -> bool {
    let annotations = annotations(ingress);
    annotations.is_true("use-regex")
        || annotations
            .get("rewrite-target")
            .is_some_and(|target| CAPTURE_GROUP.is_match(target))
}

fn implementation_specific_match(ingress: &Ingress, path: &str) -> Option<HTTPRouteRulesMatchesPath> {
    let kind = if uses_regex(ingress) {
        HTTPRouteRulesMatchesPathType::RegularExpression
    } else {
        HTTPRouteRulesMatchesPathType::PathPrefix
    };
    Some(converter::path_match(kind, path))
}

fn report_unsupported(input: &FeatureInput<'_>, _ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let annotations = annotations(ingress);
        for name in annotations.names() {
            if !SUPPORTED_ANNOTATIONS.contains(&name) {
                notes.warn(
                    input.source,
                    &annotations.key,
                    format!("annotation {ANNOTATION_PREFIX}{name} is not supported"),
                );
            }
        }
    }
}
