use gateway_api::apis::standard::gateways::{Gateway, GatewayListeners};

use super::{SOURCE, annotations};
use crate::{
    consts,
    converter::{http_listener_name, https_listener_name},
    ir::Ir,
    notifications::Notifications,
    providers::{
        FeatureInput,
        common::{Annotations, parent_gateway, routes_of},
    },
    utils::split_list,
};

fn ports(annotations: &Annotations<'_>, name: &str, notes: &mut Notifications) -> Vec<i32> {
    let Some(raw) = annotations.get(name) else {
        return Vec::new();
    };
    split_list(raw)
        .into_iter()
        .filter_map(|port| match port.parse::<u16>() {
            Ok(port) if port > 0 => Some(i32::from(port)),
            _ => {
                annotations.invalid(name, &port, SOURCE, notes);
                None
            }
        })
        .collect()
}

/// Replaces the `<base>` listener of a hostname with one `<base>-<port>`
/// listener per port. Returns false when an HTTPS listener has no TLS to copy.
fn replace_listeners(
    gateway: &mut Gateway,
    hostname: Option<&str>,
    base: &str,
    protocol: &str,
    ports: &[i32],
) -> bool {
    let listeners = &mut gateway.spec.listeners;
    let tls = listeners
        .iter()
        .find(|listener| listener.protocol == protocol && listener.hostname.as_deref() == hostname)
        .and_then(|listener| listener.tls.clone());
    if protocol == consts::HTTPS_PROTOCOL && tls.is_none() {
        return false;
    }
    listeners.retain(|listener| listener.name != base);
    for port in ports {
        let name = format!("{base}-{port}");
        if listeners.iter().any(|listener| listener.name == name) {
            continue;
        }
        listeners.push(GatewayListeners {
            name,
            hostname: hostname.map(str::to_string),
            port: *port,
            protocol: protocol.to_string(),
            tls: tls.clone(),
            ..Default::default()
        });
    }
    true
}

pub(super) fn parse(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let annotations = annotations(ingress);
        let http = ports(&annotations, "listen-ports", notes);
        let https = ports(&annotations, "listen-ports-ssl", notes);
        if http.is_empty() && https.is_empty() {
            continue;
        }
        let key = &annotations.key;
        for route_key in routes_of(ir, &key.namespace, &key.name) {
            let Some((gateway_key, hostname)) = ir
                .http_routes
                .get(&route_key)
                .and_then(|ctx| Some((parent_gateway(ctx, &route_key.namespace)?, ctx.listener_hostname.clone())))
            else {
                continue;
            };
            let Some(gateway) = ir.gateways.get_mut(&gateway_key) else {
                continue;
            };
            if !http.is_empty() {
                replace_listeners(
                    &mut gateway.gateway,
                    hostname.as_deref(),
                    &http_listener_name(hostname.as_deref()),
                    consts::HTTP_PROTOCOL,
                    &http,
                );
            }
            if !https.is_empty()
                && !replace_listeners(
                    &mut gateway.gateway,
                    hostname.as_deref(),
                    &https_listener_name(hostname.as_deref()),
                    consts::HTTPS_PROTOCOL,
                    &https,
                )
            {
                notes.warn(
                    SOURCE,
                    key,
                    format!("listen-ports-ssl ignored on {route_key}, the Ingress has no TLS for its host"),
                );
            }
        }
    }
}
