//! Source dialects. Each provider selects the Ingresses of its controller,
//! runs the common converter and then applies its annotation features.

pub mod apisix;
pub mod cilium;
pub mod common;
pub mod gce;
pub mod ingress_nginx;
pub mod nginx;

use k8s_openapi::api::networking::v1::Ingress;

use crate::{
    args::I2GArgs,
    converter::{self, ConversionOptions},
    err::{I2GError, I2GResult},
    ir::{Ir, ProviderKind},
    notifications::Notifications,
    reader::InputResources,
    utils,
};

pub trait Provider {
    fn kind(&self) -> ProviderKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn to_ir(&self, input: &InputResources, notes: &mut Notifications) -> I2GResult<Ir>;
}

/// What a feature parser gets to look at besides the IR it mutates.
pub struct FeatureInput<'a> {
    pub source: &'static str,
    pub input: &'a InputResources,
    pub ingresses: &'a [&'a Ingress],
}

pub type FeatureParser = fn(&FeatureInput<'_>, &mut Ir, &mut Notifications);

pub const PROVIDER_NAMES: [&str; 5] = ["ingress-nginx", "nginx", "apisix", "cilium", "gce"];

pub fn by_name(name: &str, args: &I2GArgs) -> I2GResult<Box<dyn Provider>> {
    let provider: Box<dyn Provider> = match name.trim() {
        "ingress-nginx" => Box::new(ingress_nginx::IngressNginxProvider::new(
            &args.ingress_nginx_ingress_class,
        )),
        "nginx" => Box::new(nginx::NginxProvider::new(&args.nginx_ingress_class)),
        "apisix" => Box::new(apisix::ApisixProvider::new(&args.apisix_ingress_class)),
        "cilium" => Box::new(cilium::CiliumProvider::new(&args.cilium_ingress_class)),
        "gce" => Box::new(gce::GceProvider),
        other => {
            return Err(I2GError::UnknownProvider(
                other.to_string(),
                PROVIDER_NAMES.join(", "),
            ));
        }
    };
    Ok(provider)
}

/// True when the Ingress belongs to the given class, either by name or
/// through an IngressClass handled by the given controller.
pub fn class_matches(
    ingress: &Ingress,
    input: &InputResources,
    classes: &[&str],
    controller: Option<&str>,
) -> bool {
    let class = utils::ingress_class(ingress);
    if classes.contains(&class.as_str()) {
        return true;
    }
    match (controller, input.class_controller(&class)) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => false,
    }
}

/// Shared conversion flow of every provider.
pub fn convert(
    kind: ProviderKind,
    input: &InputResources,
    selected: Vec<&Ingress>,
    options: &ConversionOptions,
    features: &[FeatureParser],
    notes: &mut Notifications,
) -> Ir {
    tracing::info!(
        provider = kind.name(),
        "Converting {} ingresses",
        selected.len()
    );
    let mut ir = converter::to_ir(&selected, input, options, notes);
    ir.claim(kind);
    let feature_input = FeatureInput {
        source: kind.name(),
        input,
        ingresses: &selected,
    };
    for feature in features {
        feature(&feature_input, &mut ir, notes);
    }
    ir
}

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::{
        ir::{Ir, ObjectKey},
        notifications::Notifications,
        reader::InputResources,
    };

    use super::Provider;

    pub fn run(provider: &dyn Provider, yaml: &str) -> (Ir, Notifications) {
        let input = InputResources::from_yaml(yaml, None).unwrap();
        let mut notes = Notifications::new();
        let ir = provider.to_ir(&input, &mut notes).unwrap();
        (ir, notes)
    }

    pub fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn unknown_provider_is_rejected() {
        let args = I2GArgs::parse_from(["i2g", "--providers", "nginx"]);
        assert!(by_name("nginx", &args).is_ok());
        assert!(matches!(
            by_name("traefik", &args),
            Err(I2GError::UnknownProvider(name, _)) if name == "traefik"
        ));
    }
}
