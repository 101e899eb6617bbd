use std::collections::BTreeSet;

use super::{SOURCE, annotations};
use crate::{
    ir::Ir,
    notifications::Notifications,
    providers::{
        FeatureInput,
        common::{has_https_listener, https_redirect, routes_of},
    },
};

/// `force-ssl-redirect` always redirects, `ssl-redirect` (on by default) only
/// when the route is served by an HTTPS listener.
pub(super) fn parse(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    let mut redirected = BTreeSet::new();
    for ingress in input.ingresses {
        let annotations = annotations(ingress);
        let force = annotations.is_true("force-ssl-redirect");
        let ssl_redirect = annotations.flag("ssl-redirect").unwrap_or(true);
        if !force && !ssl_redirect {
            continue;
        }
        let key = &annotations.key;
        for route_key in routes_of(ir, &key.namespace, &key.name) {
            if force || has_https_listener(ir, &route_key) {
                redirected.insert(route_key);
            }
        }
    }
    for route_key in &redirected {
        tracing::debug!(route = %route_key, "Adding HTTPS redirect");
        https_redirect(ir, route_key, SOURCE, notes);
    }
}
