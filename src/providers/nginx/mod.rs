//! NGINX Inc. controller (`nginx.org/*`).

mod grpc_services;
mod headers;
mod listen_ports;
mod rewrites;
mod ssl_services;

use gateway_api::apis::standard::httproutes::{
    HTTPRouteRulesMatchesPath, HTTPRouteRulesMatchesPathType,
};
use k8s_openapi::api::networking::v1::Ingress;

use super::{
    FeatureInput, FeatureParser, Provider,
    common::{Annotations, https_redirect, routes_of},
};
use crate::{
    converter::{self, ConversionOptions},
    err::I2GResult,
    ir::{Ir, ProviderKind},
    notifications::Notifications,
    reader::InputResources,
};

pub const ANNOTATION_PREFIX: &str = "nginx.org/";
pub const CONTROLLER: &str = "nginx.org/ingress-controller";
const SOURCE: &str = "nginx";

const SUPPORTED_ANNOTATIONS: &[&str] = &[
    "path-regex",
    "listen-ports",
    "listen-ports-ssl",
    "ssl-services",
    "grpc-services",
    "rewrites",
    "proxy-set-headers",
    "proxy-hide-headers",
    "proxy-pass-headers",
    "hsts",
    "hsts-max-age",
    "hsts-include-subdomains",
    "redirect-to-https",
];

const FEATURES: &[FeatureParser] = &[
    report_unsupported,
    listen_ports::parse,
    ssl_services::parse,
    grpc_services::parse,
    rewrites::parse,
    headers::parse,
    headers::parse_hsts,
    redirect_to_https,
];

pub struct NginxProvider {
    ingress_class: String,
}

impl NginxProvider {
    pub fn new(ingress_class: &str) -> Self {
        Self {
            ingress_class: ingress_class.to_string(),
        }
    }
}

impl Provider for NginxProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Nginx
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

fn implementation_specific_match(ingress: &Ingress, path: &str) -> Option<HTTPRouteRulesMatchesPath> {
    let matched = match annotations(ingress).get("path-regex") {
        Some("case_sensitive") => {
            converter::path_match(HTTPRouteRulesMatchesPathType::RegularExpression, path)
        }
        Some("case_insensitive") => converter::path_match(
            HTTPRouteRulesMatchesPathType::RegularExpression,
            &format!("(?i){path}"),
        ),
        Some("exact") => converter::path_match(HTTPRouteRulesMatchesPathType::Exact, path),
        _ => converter::prefix_match(path),
    };
    Some(matched)
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

fn redirect_to_https(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let annotations = annotations(ingress);
        if !annotations.is_true("redirect-to-https") {
            continue;
        }
        let key = &annotations.key;
        for route_key in routes_of(ir, &key.namespace, &key.name) {
            https_redirect(ir, &route_key, SOURCE, notes);
        }
    }
}
