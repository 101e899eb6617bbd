//! Apache APISIX ingress controller (`k8s.apisix.apache.org/*`).

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

pub const ANNOTATION_PREFIX: &str = "k8s.apisix.apache.org/";
pub const CONTROLLER: &str = "apisix.apache.org/apisix-ingress-controller";
const SOURCE: &str = "apisix";

const FEATURES: &[FeatureParser] = &[http_to_https];

pub struct ApisixProvider {
    ingress_class: String,
}

impl ApisixProvider {
    pub fn new(ingress_class: &str) -> Self {
        Self {
            ingress_class: ingress_class.to_string(),
        }
    }
}

impl Provider for ApisixProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Apisix
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

fn http_to_https(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let annotations = Annotations::new(ingress, ANNOTATION_PREFIX);
        if !annotations.is_true("http-to-https") {
            continue;
        }
        let key = &annotations.key;
        for route_key in routes_of(ir, &key.namespace, &key.name) {
            https_redirect(ir, &route_key, SOURCE, notes);
        }
    }
}
