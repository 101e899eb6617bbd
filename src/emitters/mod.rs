//! Turn the provider neutral IR into the objects that get printed.
//!
//! Every emitter starts from the plain Gateway API objects and decides what
//! to do with the provider slots: express them as implementation specific
//! resources or report them as lost.

pub mod gke;
pub mod kgateway;
pub mod standard;

use gateway_api::apis::standard::{gateways::Gateway, grpcroutes::GRPCRoute, httproutes::HTTPRoute};

use crate::{
    crds::backend_tls::BackendTLSPolicy,
    err::{I2GError, I2GResult},
    ir::Ir,
    notifications::Notifications,
};

pub trait Emitter {
    fn name(&self) -> &'static str;

    fn emit(&self, ir: Ir, notes: &mut Notifications) -> I2GResult<GatewayResources>;
}

/// Final set of objects, each list in output order.
#[derive(Debug, Clone, Default)]
pub struct GatewayResources {
    pub gateways: Vec<Gateway>,
    pub http_routes: Vec<HTTPRoute>,
    pub grpc_routes: Vec<GRPCRoute>,
    pub backend_tls_policies: Vec<BackendTLSPolicy>,
    /// Implementation specific resources, already serialized.
    pub extensions: Vec<serde_json::Value>,
}

impl GatewayResources {
    /// Gateway API objects of the IR, without any provider data.
    pub fn from_ir(ir: &Ir) -> Self {
        Self {
            gateways: ir.gateways.values().map(|ctx| ctx.gateway.clone()).collect(),
            http_routes: ir.http_routes.values().map(|ctx| ctx.route.clone()).collect(),
            grpc_routes: ir.grpc_routes.values().map(|ctx| ctx.route.clone()).collect(),
            backend_tls_policies: ir.backend_tls_policies.values().cloned().collect(),
            extensions: Vec::new(),
        }
    }

    pub fn push_extension<K: serde::Serialize>(&mut self, resource: &K) -> I2GResult<()> {
        self.extensions.push(serde_json::to_value(resource)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
            + self.http_routes.len()
            + self.grpc_routes.len()
            + self.backend_tls_policies.len()
            + self.extensions.len()
    }
}

pub const EMITTER_NAMES: [&str; 3] = ["standard", "kgateway", "gke"];

pub fn by_name(name: &str) -> I2GResult<Box<dyn Emitter>> {
    let emitter: Box<dyn Emitter> = match name.trim() {
        "standard" => Box::new(standard::StandardEmitter),
        "kgateway" => Box::new(kgateway::KgatewayEmitter),
        "gke" => Box::new(gke::GkeEmitter),
        other => {
            return Err(I2GError::UnknownEmitter(
                other.to_string(),
                EMITTER_NAMES.join(", "),
            ));
        }
    };
    Ok(emitter)
}

/// Warns once per ingress-nginx policy that the emitter drops.
pub(crate) fn report_ingress_nginx_policies(ir: &Ir, emitter: &str, notes: &mut Notifications) {
    for (route_key, ctx) in &ir.http_routes {
        let Some(slot) = &ctx.provider.ingress_nginx else {
            continue;
        };
        for (ingress, policy) in &slot.policies {
            let fields = policy.populated_fields();
            if fields.is_empty() {
                continue;
            }
            notes.warn(
                emitter,
                route_key,
                format!(
                    "annotations of Ingress {ingress} cannot be expressed and were dropped: {}",
                    fields.join(", ")
                ),
            );
        }
    }
}

/// Warns once per GKE setting that the emitter drops.
pub(crate) fn report_gce_settings(ir: &Ir, emitter: &str, notes: &mut Notifications) {
    for (key, ctx) in &ir.gateways {
        if let Some(ssl_policy) = ctx.provider.gce.as_ref().and_then(|gce| gce.ssl_policy.as_ref()) {
            notes.warn(
                emitter,
                key,
                format!("sslPolicy {ssl_policy} cannot be expressed and was dropped"),
            );
        }
    }
    for (key, ctx) in &ir.services {
        if let Some(config) = ctx.provider.gce.as_ref().and_then(|gce| gce.backend_config.as_ref()) {
            let mut fields = Vec::new();
            if config.session_affinity.is_some() {
                fields.push("sessionAffinity");
            }
            if config.security_policy.is_some() {
                fields.push("securityPolicy");
            }
            if config.health_check.is_some() {
                fields.push("healthCheck");
            }
            if fields.is_empty() {
                continue;
            }
            notes.warn(
                emitter,
                key,
                format!(
                    "BackendConfig settings cannot be expressed and were dropped: {}",
                    fields.join(", ")
                ),
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::{
        ir::Ir,
        providers::{Provider, test_utils::run},
    };

    /// Runs a provider over the fixture and hands back its IR.
    pub fn ir_of(provider: &dyn Provider, yaml: &str) -> Ir {
        let (ir, _) = run(provider, yaml);
        ir
    }

    pub fn kinds(extensions: &[serde_json::Value]) -> Vec<(String, String)> {
        extensions
            .iter()
            .map(|value| {
                (
                    value["kind"].as_str().unwrap_or_default().to_string(),
                    value["metadata"]["name"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_emitter_is_rejected() {
        assert_eq!(by_name("kgateway").unwrap().name(), "kgateway");
        assert!(matches!(
            by_name("istio"),
            Err(I2GError::UnknownEmitter(name, _)) if name == "istio"
        ));
    }
}
