use std::collections::{BTreeMap, BTreeSet};

use super::{SOURCE, annotations};
use crate::{
    ir::Ir,
    notifications::Notifications,
    providers::{
        FeatureInput,
        common::{Annotations, routes_of, rule_targets_only, set_url_rewrite},
    },
};

/// Parses `serviceName=tea rewrite=/;serviceName=coffee rewrite=/beans`.
fn parse_rewrites(annotations: &Annotations<'_>, notes: &mut Notifications) -> BTreeMap<String, String> {
    let Some(raw) = annotations.get("rewrites") else {
        return BTreeMap::new();
    };
    let mut rewrites = BTreeMap::new();
    for entry in raw.split(';').map(str::trim).filter(|entry| !entry.is_empty()) {
        let mut service = None;
        let mut rewrite = None;
        for field in entry.split_whitespace() {
            match field.split_once('=') {
                Some(("serviceName", value)) => service = Some(value),
                Some(("rewrite", value)) => rewrite = Some(value),
                _ => {}
            }
        }
        match (service, rewrite) {
            (Some(service), Some(rewrite)) if !service.is_empty() && !rewrite.is_empty() => {
                rewrites.insert(service.to_string(), rewrite.to_string());
            }
            _ => annotations.invalid("rewrites", entry, SOURCE, notes),
        }
    }
    rewrites
}

pub(super) fn parse(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let annotations = annotations(ingress);
        let rewrites = parse_rewrites(&annotations, notes);
        if rewrites.is_empty() {
            continue;
        }
        let key = &annotations.key;
        for route_key in routes_of(ir, &key.namespace, &key.name) {
            let Some(ctx) = ir.http_routes.get_mut(&route_key) else {
                continue;
            };
            for rule in ctx.rules_of(&key.name) {
                let Some((_, target)) = rewrites.iter().find(|(service, _)| {
                    rule_targets_only(ctx, rule, &BTreeSet::from([(*service).clone()]))
                }) else {
                    continue;
                };
                if !ctx.rule_owned_by(rule, &key.name) {
                    notes.warn(
                        SOURCE,
                        key,
                        format!("rule {rule} of {route_key} is shared with other Ingresses, rewrite skipped"),
                    );
                    continue;
                }
                if let Some(rule) = ctx.rules_mut().get_mut(rule) {
                    set_url_rewrite(rule, Some(target), None);
                }
            }
        }
    }
}
