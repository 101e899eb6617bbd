use super::{SOURCE, annotations};
use crate::{
    crds::backend_tls::BackendTLSPolicy,
    ir::{Ir, ObjectKey},
    notifications::Notifications,
    providers::{FeatureInput, common::backend_services},
    utils::split_list,
};

pub(super) fn parse(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let annotations = annotations(ingress);
        let Some(raw) = annotations.get("ssl-services") else {
            continue;
        };
        let backends = backend_services(ingress);
        let key = &annotations.key;
        for service in split_list(raw) {
            if !backends.contains(&service) {
                notes.warn(
                    SOURCE,
                    key,
                    format!("ssl-services lists {service}, which is not a backend of this Ingress"),
                );
                continue;
            }
            let policy = BackendTLSPolicy::for_service(&key.namespace, &service);
            ir.backend_tls_policies
                .entry(ObjectKey::of(&policy))
                .or_insert(policy);
        }
    }
}
