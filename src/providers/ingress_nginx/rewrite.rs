use super::{CAPTURE_GROUP, SOURCE, annotations};
use crate::{
    ir::Ir,
    notifications::Notifications,
    providers::{
        FeatureInput,
        common::{for_each_owned_rule, set_request_header, set_url_rewrite},
    },
};

const FORWARDED_PREFIX_HEADER: &str = "X-Forwarded-Prefix";

pub(super) fn parse(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let annotations = annotations(ingress);
        let mut target = annotations.get("rewrite-target").filter(|t| !t.is_empty());
        if let Some(raw) = target.filter(|raw| CAPTURE_GROUP.is_match(raw)) {
            notes.warn(
                SOURCE,
                &annotations.key,
                format!("rewrite-target '{raw}' uses capture groups, the rewrite is dropped"),
            );
            target = None;
        }
        let vhost = annotations.get("upstream-vhost").filter(|v| !v.is_empty());
        let prefix = annotations.get("x-forwarded-prefix").filter(|p| !p.is_empty());
        if target.is_none() && vhost.is_none() && prefix.is_none() {
            continue;
        }

        for_each_owned_rule(ir, &annotations.key, SOURCE, "rewrite", notes, |rule| {
            if target.is_some() || vhost.is_some() {
                set_url_rewrite(rule, target, vhost);
            }
            if let Some(prefix) = prefix {
                set_request_header(rule, FORWARDED_PREFIX_HEADER, prefix);
            }
        });
    }
}
