use gateway_api::apis::standard::httproutes::HTTPRouteRules;
use kube::ResourceExt;

use super::{SOURCE, annotations};
use crate::{
    ir::{HttpRouteContext, Ir},
    notifications::Notifications,
    providers::{FeatureInput, common::Annotations},
    value_filters::{HeadersMatchersList, MatchRule, MatcherList},
};

const DEFAULT_WEIGHT_TOTAL: i32 = 100;
const DEFAULT_HEADER_VALUE: &str = "always";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CanaryMode {
    Header(MatchRule),
    Weight { weight: i32, total: i32 },
}

fn canary_mode(annotations: &Annotations<'_>, notes: &mut Notifications) -> CanaryMode {
    if let Some(header) = annotations.get("canary-by-header").filter(|h| !h.is_empty()) {
        let rule = match annotations.get("canary-by-header-pattern") {
            Some(pattern) if !pattern.is_empty() => {
                MatchRule::RegularExpression(header.to_string(), pattern.to_string())
            }
            _ => MatchRule::Equal(
                header.to_string(),
                annotations
                    .get("canary-by-header-value")
                    .filter(|value| !value.is_empty())
                    .unwrap_or(DEFAULT_HEADER_VALUE)
                    .to_string(),
            ),
        };
        return CanaryMode::Header(rule);
    }

    // Without a usable weight the canary gets no traffic at all.
    let weight = annotations
        .parse::<i32>("canary-weight", SOURCE, notes)
        .unwrap_or(0);
    let total = annotations
        .parse::<i32>("canary-weight-total", SOURCE, notes)
        .filter(|total| *total > 0)
        .unwrap_or(DEFAULT_WEIGHT_TOTAL);
    if !(0..=total).contains(&weight) {
        notes.warn(
            SOURCE,
            &annotations.key,
            format!("canary weight {weight} is outside of 0..={total}, using 0"),
        );
        return CanaryMode::Weight { weight: 0, total };
    }
    CanaryMode::Weight { weight, total }
}

/// Splits `total` between `count` backends, giving the remainder to the first one.
fn split_weight(total: i32, count: usize) -> Vec<i32> {
    if count == 0 {
        return Vec::new();
    }
    let count_i32 = i32::try_from(count).unwrap_or(i32::MAX);
    let share = total / count_i32;
    let remainder = total - share * count_i32;
    (0..count)
        .map(|idx| if idx == 0 { share + remainder } else { share })
        .collect()
}

/// Positions of the backends of `rule` that only the canary Ingress contributes.
fn canary_backends(ctx: &HttpRouteContext, rule: usize, canary: &str) -> Vec<usize> {
    ctx.backend_sources
        .get(rule)
        .map(|backends| {
            backends
                .iter()
                .enumerate()
                .filter(|(_, sources)| sources.len() == 1 && sources.contains(canary))
                .map(|(idx, _)| idx)
                .collect()
        })
        .unwrap_or_default()
}

fn apply_weight(ctx: &mut HttpRouteContext, rule: usize, canary: &[usize], weight: i32, total: i32) {
    let backend_count = ctx.backend_refs(rule).len();
    let primary = (0..backend_count)
        .filter(|idx| !canary.contains(idx))
        .collect::<Vec<_>>();
    let primary_weights = split_weight(total - weight, primary.len());
    let Some(refs) = ctx
        .rules_mut()
        .get_mut(rule)
        .and_then(|rule| rule.backend_refs.as_mut())
    else {
        return;
    };
    for idx in canary {
        if let Some(backend) = refs.get_mut(*idx) {
            backend.weight = Some(weight);
        }
    }
    for (idx, share) in primary.iter().zip(primary_weights) {
        if let Some(backend) = refs.get_mut(*idx) {
            backend.weight = Some(share);
        }
    }
}

/// Moves the canary backends of `rule` into a new rule right after it that
/// only matches requests carrying the canary header.
fn apply_header(ctx: &mut HttpRouteContext, rule: usize, canary: &[usize], header: &MatchRule) {
    let mut moved = Vec::new();
    let mut moved_sources = Vec::new();
    for idx in canary.iter().rev() {
        if let Some((backend, sources)) = ctx.remove_backend(rule, *idx) {
            moved.push(backend);
            moved_sources.push(sources);
        }
    }
    moved.reverse();
    moved_sources.reverse();

    let mut matches = ctx
        .rules()
        .get(rule)
        .and_then(|rule| rule.matches.clone())
        .unwrap_or_default();
    HeadersMatchersList(MatcherList(vec![header.clone()])).apply(&mut matches);
    ctx.insert_rule(
        rule + 1,
        HTTPRouteRules {
            matches: Some(matches),
            backend_refs: Some(moved),
            ..Default::default()
        },
        moved_sources,
    );
}

pub(super) fn parse(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let annotations = annotations(ingress);
        if !annotations.is_true("canary") {
            continue;
        }
        let mode = canary_mode(&annotations, notes);
        let name = ingress.name_any();
        let namespace = annotations.key.namespace.clone();

        for (key, ctx) in ir.http_routes.iter_mut() {
            if key.namespace != namespace {
                continue;
            }
            // Walk backwards so inserted rules do not shift pending indices.
            for rule in ctx.rules_of(&name).into_iter().rev() {
                let canary = canary_backends(ctx, rule, &name);
                let backend_count = ctx.backend_refs(rule).len();
                if canary.is_empty() {
                    notes.warn(
                        SOURCE,
                        &annotations.key,
                        format!("canary backend shares a path with its primary in {key}, skipping"),
                    );
                    continue;
                }
                if canary.len() == backend_count {
                    notes.warn(
                        SOURCE,
                        &annotations.key,
                        format!("canary has no primary backend on a rule of {key}, skipping"),
                    );
                    continue;
                }
                match &mode {
                    CanaryMode::Header(header) => apply_header(ctx, rule, &canary, header),
                    CanaryMode::Weight { weight, total } => {
                        apply_weight(ctx, rule, &canary, *weight, *total)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use gateway_api::apis::standard::httproutes::HTTPRouteRulesMatchesHeadersType;
    use rstest::rstest;

    use super::*;
    use crate::providers::{
        ingress_nginx::IngressNginxProvider,
        test_utils::{key, run},
    };

    fn input(canary_annotations: &str) -> String {
        format!(
            r#"
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: web
  namespace: default
spec:
  ingressClassName: nginx
  rules:
    - host: shop.example.com
      http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: web-v1
                port:
                  number: 80
          - path: /static
            pathType: Prefix
            backend:
              service:
                name: static
                port:
                  number: 80
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: web-canary
  namespace: default
  annotations:
    nginx.ingress.kubernetes.io/canary: "true"
{canary_annotations}
spec:
  ingressClassName: nginx
  rules:
    - host: shop.example.com
      http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: web-v2
                port:
                  number: 80
"#
        )
    }

    #[rstest]
    #[case(100, 1, vec![100])]
    #[case(80, 2, vec![40, 40])]
    #[case(70, 3, vec![24, 23, 23])]
    #[case(10, 0, vec![])]
    fn splits_weights(#[case] total: i32, #[case] count: usize, #[case] expected: Vec<i32>) {
        assert_eq!(split_weight(total, count), expected);
    }

    #[test]
    fn weighted_canary() {
        let yaml = input(r#"    nginx.ingress.kubernetes.io/canary-weight: "20""#);
        let (ir, _) = run(&IngressNginxProvider::new("nginx"), &yaml);
        let ctx = &ir.http_routes[&key("web-shop-example-com")];
        let refs = ctx.backend_refs(0);
        assert_eq!(refs.len(), 2);
        assert_eq!((refs[0].name.as_str(), refs[0].weight), ("web-v1", Some(80)));
        assert_eq!((refs[1].name.as_str(), refs[1].weight), ("web-v2", Some(20)));
        assert_eq!(ctx.backend_refs(1)[0].weight, None);
    }

    #[test]
    fn weight_total_is_respected() {
        let yaml = input(
            r#"    nginx.ingress.kubernetes.io/canary-weight: "5"
    nginx.ingress.kubernetes.io/canary-weight-total: "10""#,
        );
        let (ir, _) = run(&IngressNginxProvider::new("nginx"), &yaml);
        let refs = ir.http_routes[&key("web-shop-example-com")].backend_refs(0).to_vec();
        assert_eq!(refs[0].weight, Some(5));
        assert_eq!(refs[1].weight, Some(5));
    }

    #[rstest]
    #[case(
        r#"    nginx.ingress.kubernetes.io/canary-by-header: "X-Canary""#,
        "always",
        HTTPRouteRulesMatchesHeadersType::Exact
    )]
    #[case(
        r#"    nginx.ingress.kubernetes.io/canary-by-header: "X-Canary"
    nginx.ingress.kubernetes.io/canary-by-header-value: "yes"
    nginx.ingress.kubernetes.io/canary-weight: "50""#,
        "yes",
        HTTPRouteRulesMatchesHeadersType::Exact
    )]
    #[case(
        r#"    nginx.ingress.kubernetes.io/canary-by-header: "X-Canary"
    nginx.ingress.kubernetes.io/canary-by-header-pattern: "^v2$""#,
        "^v2$",
        HTTPRouteRulesMatchesHeadersType::RegularExpression
    )]
    fn header_canary(
        #[case] annotations: &str,
        #[case] value: &str,
        #[case] kind: HTTPRouteRulesMatchesHeadersType,
    ) {
        let (ir, _) = run(&IngressNginxProvider::new("nginx"), &input(annotations));
        let ctx = &ir.http_routes[&key("web-shop-example-com")];
        assert_eq!(ctx.rules().len(), 3);
        assert_eq!(ctx.backend_refs(0).len(), 1);
        assert_eq!(ctx.backend_refs(0)[0].weight, None);
        let canary_rule = &ctx.rules()[1];
        assert_eq!(canary_rule.backend_refs.as_ref().unwrap()[0].name, "web-v2");
        let route_match = &canary_rule.matches.as_ref().unwrap()[0];
        assert_eq!(
            route_match.path.as_ref().unwrap().value.as_deref(),
            Some("/")
        );
        let header = &route_match.headers.as_ref().unwrap()[0];
        assert_eq!(header.name, "X-Canary");
        assert_eq!(header.value, value);
        assert_eq!(header.r#type, Some(kind));
        assert_eq!(ctx.backend_sources[1][0], BTreeSet::from(["web-canary".to_string()]));
        assert_eq!(
            ctx.rules()[2].matches.as_ref().unwrap()[0]
                .path
                .as_ref()
                .unwrap()
                .value
                .as_deref(),
            Some("/static")
        );
    }

    #[rstest]
    #[case("")]
    #[case(r#"    nginx.ingress.kubernetes.io/canary-weight: "150""#)]
    fn canary_without_usable_weight_gets_no_traffic(#[case] annotations: &str) {
        let (ir, notes) = run(&IngressNginxProvider::new("nginx"), &input(annotations));
        assert_eq!(notes.items().len(), usize::from(!annotations.is_empty()));
        let refs = ir.http_routes[&key("web-shop-example-com")].backend_refs(0).to_vec();
        assert_eq!((refs[0].name.as_str(), refs[0].weight), ("web-v1", Some(100)));
        assert_eq!((refs[1].name.as_str(), refs[1].weight), ("web-v2", Some(0)));
    }
}
