use super::{SOURCE, annotations};
use crate::{
    ir::Ir,
    notifications::Notifications,
    providers::{
        FeatureInput,
        common::{
            for_each_owned_rule, remove_response_header, set_request_header, set_response_header,
        },
    },
    utils::split_list,
};

const DEFAULT_HSTS_MAX_AGE: i64 = 2_592_000;
const HSTS_HEADER: &str = "Strict-Transport-Security";

/// `X-A: value` pairs; a header without a value is set to an empty string.
fn header_pairs(raw: &str) -> Vec<(String, String)> {
    split_list(raw)
        .into_iter()
        .map(|header| match header.split_once(':') {
            Some((name, value)) => (name.trim().to_string(), value.trim().to_string()),
            None => (header, String::new()),
        })
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

pub(super) fn parse(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let annotations = annotations(ingress);
        let key = &annotations.key;
        let set = annotations
            .get("proxy-set-headers")
            .map(header_pairs)
            .unwrap_or_default();
        let hide = annotations
            .get("proxy-hide-headers")
            .map(split_list)
            .unwrap_or_default();
        if annotations.get("proxy-pass-headers").is_some() {
            notes.info(
                SOURCE,
                key,
                "proxy-pass-headers needs no conversion, Gateway implementations pass upstream headers",
            );
        }
        if set.is_empty() && hide.is_empty() {
            continue;
        }
        for_each_owned_rule(ir, key, SOURCE, "proxy headers", notes, |rule| {
            for (name, value) in &set {
                set_request_header(rule, name, value);
            }
            for name in &hide {
                remove_response_header(rule, name);
            }
        });
    }
}

pub(super) fn parse_hsts(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    for ingress in input.ingresses {
        let annotations = annotations(ingress);
        if !annotations.is_true("hsts") {
            continue;
        }
        let max_age = annotations
            .parse::<i64>("hsts-max-age", SOURCE, notes)
            .unwrap_or(DEFAULT_HSTS_MAX_AGE);
        let mut value = format!("max-age={max_age}");
        if annotations.is_true("hsts-include-subdomains") {
            value.push_str("; includeSubDomains");
        }
        let key = &annotations.key;
        for_each_owned_rule(ir, key, SOURCE, "hsts", notes, |rule| {
            set_response_header(rule, HSTS_HEADER, &value);
        });
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::providers::{
        nginx::NginxProvider,
        test_utils::{key, run},
    };

    #[rstest]
    #[case("X-A: 1, X-B", vec![("X-A", "1"), ("X-B", "")])]
    #[case("X-Forwarded-For:$remote_addr", vec![("X-Forwarded-For", "$remote_addr")])]
    #[case(" , ", vec![])]
    fn parses_header_pairs(#[case] raw: &str, #[case] expected: Vec<(&str, &str)>) {
        let expected = expected
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect::<Vec<_>>();
        assert_eq!(header_pairs(raw), expected);
    }

    const INPUT: &str = r#"
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: cafe
  namespace: default
  annotations:
    nginx.org/proxy-set-headers: "X-Env: prod"
    nginx.org/proxy-hide-headers: "Server, X-Powered-By"
    nginx.org/proxy-pass-headers: "X-Trace"
    nginx.org/hsts: "true"
    nginx.org/hsts-include-subdomains: "true"
spec:
  ingressClassName: nginx
  rules:
    - host: cafe.example.com
      http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: tea
                port:
                  number: 80
"#;

    #[test]
    fn header_filters_and_hsts() {
        let (ir, notes) = run(&NginxProvider::new("nginx"), INPUT);
        assert_eq!(notes.items().len(), 1);
        assert_eq!(
            notes.items()[0].level,
            crate::notifications::NotificationLevel::Info
        );

        let ctx = &ir.http_routes[&key("cafe-cafe-example-com")];
        let filters = ctx.rules()[0].filters.as_ref().unwrap();
        let request = filters
            .iter()
            .find_map(|f| f.request_header_modifier.as_ref())
            .unwrap();
        assert_eq!(request.set.as_ref().unwrap()[0].name, "X-Env");
        assert_eq!(request.set.as_ref().unwrap()[0].value, "prod");

        let response = filters
            .iter()
            .find_map(|f| f.response_header_modifier.as_ref())
            .unwrap();
        assert_eq!(
            response.remove.as_deref(),
            Some(&["Server".to_string(), "X-Powered-By".to_string()][..])
        );
        let hsts = &response.set.as_ref().unwrap()[0];
        assert_eq!(hsts.name, "Strict-Transport-Security");
        assert_eq!(hsts.value, "max-age=2592000; includeSubDomains");
    }

    #[test]
    fn shared_rules_keep_their_headers() {
        let other = r#"
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: tea-shop
  namespace: default
spec:
  ingressClassName: nginx
  rules:
    - host: cafe.example.com
      http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: tea
                port:
                  number: 80
"#;
        let (ir, notes) = run(&NginxProvider::new("nginx"), &format!("{INPUT}{other}"));
        let ctx = &ir.http_routes[&key("cafe-cafe-example-com")];
        assert_eq!(ctx.backend_sources[0][0].len(), 2);
        assert!(ctx.rules()[0].filters.is_none());
        let skipped = notes
            .items()
            .iter()
            .filter(|note| note.message.contains("shared with other Ingresses"))
            .count();
        assert_eq!(skipped, 2);
    }
}
