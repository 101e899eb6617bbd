//! Per-Ingress policies that need implementation specific resources.
//!
//! Each source Ingress of a route gets one [`Policy`] that records which
//! backend positions of the route it covers. Emitters decide how to express it.

use std::{collections::BTreeMap, sync::LazyLock};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;

use super::{SOURCE, annotations};
use crate::{
    ir::{
        Ir, ObjectKey, Policy,
        policy::{
            BackendProtocol, BackendTls, BasicAuthPolicy, CorsPolicy, ExtAuthPolicy,
            RateLimitPolicy, RateLimitUnit, SessionAffinityPolicy, parse_nginx_size,
            parse_seconds,
        },
    },
    notifications::Notifications,
    providers::{FeatureInput, common::Annotations},
    utils::split_list,
};

const DEFAULT_CORS_METHODS: &str = "GET, PUT, POST, DELETE, PATCH, OPTIONS";
const DEFAULT_CORS_HEADERS: &str = "DNT,Keep-Alive,User-Agent,X-Requested-With,If-Modified-Since,Cache-Control,Content-Type,Range,Authorization";
const DEFAULT_CORS_MAX_AGE: i64 = 1_728_000;
const DEFAULT_BURST_MULTIPLIER: i32 = 5;
const DEFAULT_SESSION_COOKIE: &str = "INGRESSCOOKIE";

/// `scheme://service[.namespace[.svc[.cluster.local]]][:port][/path]`
static SERVICE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<scheme>https?)://(?P<service>[a-z0-9]([-a-z0-9]*[a-z0-9])?)(\.(?P<namespace>[a-z0-9]([-a-z0-9]*[a-z0-9])?)(\.svc(\.cluster\.local)?)?)?(:(?P<port>\d+))?(?P<path>/.*)?$",
    )
    .expect("static regex")
});

pub(super) fn parse(input: &FeatureInput<'_>, ir: &mut Ir, notes: &mut Notifications) {
    let mut parsed = BTreeMap::<ObjectKey, Policy>::new();
    for ingress in input.ingresses {
        let annotations = annotations(ingress);
        let policy = parse_policy(&annotations, notes);
        if !policy.is_empty() {
            parsed.insert(annotations.key.clone(), policy);
        }
    }
    if parsed.is_empty() {
        return;
    }

    for (key, ctx) in ir.http_routes.iter_mut() {
        let mut attached = BTreeMap::new();
        for ingress in ctx.source_ingresses() {
            let Some(policy) = parsed.get(&ObjectKey::new(key.namespace.clone(), ingress.clone()))
            else {
                continue;
            };
            let mut policy = policy.clone();
            policy.coverage = ctx.positions_of(&ingress);
            policy.services = policy
                .coverage
                .iter()
                .filter_map(|index| {
                    ctx.backend_refs(index.rule)
                        .get(index.backend)
                        .filter(|backend| backend.kind.as_deref().is_none_or(|kind| kind == "Service"))
                        .map(|backend| backend.name.clone())
                })
                .collect();
            attached.insert(ingress, policy);
        }
        if attached.is_empty() {
            continue;
        }
        if let Some(slot) = ctx.provider.ingress_nginx.as_mut() {
            slot.policies.extend(attached);
        }
    }
}

fn parse_policy(annotations: &Annotations<'_>, notes: &mut Notifications) -> Policy {
    let mut policy = Policy::default();
    parse_body_size(annotations, &mut policy, notes);
    parse_cors(annotations, &mut policy, notes);
    parse_rate_limit(annotations, &mut policy, notes);
    parse_timeouts(annotations, &mut policy, notes);
    policy.enable_access_log = annotations.flag("enable-access-log");
    parse_ext_auth(annotations, &mut policy, notes);
    parse_basic_auth(annotations, &mut policy, notes);
    parse_session_affinity(annotations, &mut policy, notes);
    parse_backend_protocol(annotations, &mut policy, notes);
    policy
}

fn size(annotations: &Annotations<'_>, name: &str, notes: &mut Notifications) -> Option<Quantity> {
    let raw = annotations.get(name)?;
    let parsed = parse_nginx_size(raw);
    if parsed.is_none() {
        annotations.invalid(name, raw, SOURCE, notes);
    }
    parsed
}

fn parse_body_size(annotations: &Annotations<'_>, policy: &mut Policy, notes: &mut Notifications) {
    policy.client_body_buffer_size = size(annotations, "client-body-buffer-size", notes);
    policy.proxy_body_size = size(annotations, "proxy-body-size", notes);
}

fn parse_cors(annotations: &Annotations<'_>, policy: &mut Policy, notes: &mut Notifications) {
    if !annotations.is_true("enable-cors") {
        return;
    }
    let list = |name: &str, default: &str| split_list(annotations.get(name).unwrap_or(default));
    policy.cors = Some(CorsPolicy {
        allow_origins: list("cors-allow-origin", "*"),
        allow_methods: list("cors-allow-methods", DEFAULT_CORS_METHODS),
        allow_headers: list("cors-allow-headers", DEFAULT_CORS_HEADERS),
        expose_headers: list("cors-expose-headers", ""),
        allow_credentials: match annotations.get("cors-allow-credentials") {
            Some(raw) => match crate::utils::parse_flag(raw) {
                Some(value) => value,
                None => {
                    annotations.invalid("cors-allow-credentials", raw, SOURCE, notes);
                    true
                }
            },
            None => true,
        },
        max_age: annotations
            .parse::<i64>("cors-max-age", SOURCE, notes)
            .unwrap_or(DEFAULT_CORS_MAX_AGE),
    });
}

fn positive(annotations: &Annotations<'_>, name: &str, notes: &mut Notifications) -> Option<i32> {
    let value = annotations.parse::<i32>(name, SOURCE, notes)?;
    if value <= 0 {
        annotations.invalid(name, &value.to_string(), SOURCE, notes);
        return None;
    }
    Some(value)
}

fn parse_rate_limit(annotations: &Annotations<'_>, policy: &mut Policy, notes: &mut Notifications) {
    let rps = positive(annotations, "limit-rps", notes);
    let rpm = positive(annotations, "limit-rpm", notes);
    let (limit, unit) = match (rps, rpm) {
        (Some(limit), _) => (limit, RateLimitUnit::Second),
        (None, Some(limit)) => (limit, RateLimitUnit::Minute),
        (None, None) => return,
    };
    let burst_multiplier = match annotations.get("limit-burst-multiplier") {
        Some(raw) => match raw.parse::<i32>() {
            Ok(value) if value > 0 => value,
            _ => {
                notes.warn(
                    SOURCE,
                    &annotations.key,
                    format!(
                        "invalid limit-burst-multiplier '{raw}', using {DEFAULT_BURST_MULTIPLIER}"
                    ),
                );
                DEFAULT_BURST_MULTIPLIER
            }
        },
        None => DEFAULT_BURST_MULTIPLIER,
    };
    policy.rate_limit = Some(RateLimitPolicy {
        limit,
        unit,
        burst_multiplier,
    });
}

fn parse_timeouts(annotations: &Annotations<'_>, policy: &mut Policy, notes: &mut Notifications) {
    let mut timeout = |name: &str| {
        let raw = annotations.get(name)?;
        let parsed = parse_seconds(raw);
        if parsed.is_none() {
            annotations.invalid(name, raw, SOURCE, notes);
        }
        parsed
    };
    policy.proxy_connect_timeout = timeout("proxy-connect-timeout");
    policy.proxy_send_timeout = timeout("proxy-send-timeout");
    policy.proxy_read_timeout = timeout("proxy-read-timeout");
}

fn parse_ext_auth(annotations: &Annotations<'_>, policy: &mut Policy, notes: &mut Notifications) {
    let Some(url) = annotations.get("auth-url") else {
        return;
    };
    let Some(captures) = SERVICE_URL.captures(url) else {
        notes.warn(
            SOURCE,
            &annotations.key,
            format!("auth-url '{url}' is not an in-cluster service URL, external auth is skipped"),
        );
        return;
    };
    let scheme = &captures["scheme"];
    let port = match captures.name("port") {
        Some(port) => match port.as_str().parse::<i32>() {
            Ok(port) => port,
            Err(_) => {
                annotations.invalid("auth-url", url, SOURCE, notes);
                return;
            }
        },
        None if scheme == "https" => 443,
        None => 80,
    };
    policy.ext_auth = Some(ExtAuthPolicy {
        service_name: captures["service"].to_string(),
        service_namespace: captures
            .name("namespace")
            .map(|ns| ns.as_str().to_string())
            .unwrap_or_else(|| annotations.key.namespace.clone()),
        port,
        path: captures
            .name("path")
            .map(|path| path.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        response_headers: annotations
            .get("auth-response-headers")
            .map(split_list)
            .unwrap_or_default(),
    });
}

fn parse_basic_auth(annotations: &Annotations<'_>, policy: &mut Policy, notes: &mut Notifications) {
    match annotations.get("auth-type") {
        Some("basic") => {}
        Some(other) => {
            notes.warn(
                SOURCE,
                &annotations.key,
                format!("auth-type '{other}' is not supported"),
            );
            return;
        }
        None => return,
    }
    let Some(secret) = annotations.get("auth-secret").filter(|s| !s.is_empty()) else {
        notes.warn(
            SOURCE,
            &annotations.key,
            "auth-type basic requires auth-secret, basic auth is skipped",
        );
        return;
    };
    if annotations.get("auth-secret-type") == Some("auth-map") {
        notes.warn(
            SOURCE,
            &annotations.key,
            "auth-secret-type auth-map is not supported, basic auth is skipped",
        );
        return;
    }
    let (secret_namespace, secret_name) = match secret.split_once('/') {
        Some((namespace, name)) => (namespace.to_string(), name.to_string()),
        None => (annotations.key.namespace.clone(), secret.to_string()),
    };
    policy.basic_auth = Some(BasicAuthPolicy {
        secret_name,
        secret_namespace,
        realm: annotations.get("auth-realm").map(str::to_string),
    });
}

fn parse_session_affinity(
    annotations: &Annotations<'_>,
    policy: &mut Policy,
    notes: &mut Notifications,
) {
    match annotations.get("affinity") {
        Some("cookie") => {}
        Some(other) => {
            notes.warn(
                SOURCE,
                &annotations.key,
                format!("affinity '{other}' is not supported"),
            );
            return;
        }
        None => return,
    }
    let cookie_max_age = annotations
        .parse::<i64>("session-cookie-max-age", SOURCE, notes)
        .or_else(|| annotations.parse::<i64>("session-cookie-expires", SOURCE, notes));
    policy.session_affinity = Some(SessionAffinityPolicy {
        cookie_name: annotations
            .get("session-cookie-name")
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_SESSION_COOKIE)
            .to_string(),
        cookie_path: annotations.get("session-cookie-path").map(str::to_string),
        cookie_max_age,
    });
}

fn parse_backend_protocol(
    annotations: &Annotations<'_>,
    policy: &mut Policy,
    notes: &mut Notifications,
) {
    let Some(protocol) = annotations.parse::<BackendProtocol>("backend-protocol", SOURCE, notes)
    else {
        return;
    };
    policy.backend_protocol = Some(protocol);
    if protocol.is_tls() {
        policy.backend_tls = Some(BackendTls {
            secret: annotations.get("proxy-ssl-secret").map(str::to_string),
            verify: annotations.get("proxy-ssl-verify") == Some("on"),
            sni: annotations.get("proxy-ssl-name").map(str::to_string),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, time::Duration};

    use rstest::rstest;

    use super::*;
    use crate::{
        ir::PolicyIndex,
        providers::{
            ingress_nginx::IngressNginxProvider,
            test_utils::{key, run},
        },
    };

    fn ingress_with(annotations: &str) -> String {
        format!(
            r#"
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: web
  namespace: default
  annotations:
{annotations}
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
                name: web
                port:
                  number: 80
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: api
  namespace: default
spec:
  ingressClassName: nginx
  rules:
    - host: shop.example.com
      http:
        paths:
          - path: /api
            pathType: Prefix
            backend:
              service:
                name: api
                port:
                  number: 80
"#
        )
    }

    fn policy_of(annotations: &str) -> (Option<Policy>, Notifications) {
        let (ir, notes) = run(&IngressNginxProvider::new("nginx"), &ingress_with(annotations));
        let policy = ir.http_routes[&key("web-shop-example-com")]
            .provider
            .ingress_nginx
            .as_ref()
            .and_then(|slot| slot.policies.get("web").cloned());
        (policy, notes)
    }

    #[test]
    fn coverage_is_partial_per_ingress() {
        let (ir, _) = run(
            &IngressNginxProvider::new("nginx"),
            &ingress_with(r#"    nginx.ingress.kubernetes.io/proxy-body-size: "10m""#),
        );
        let ctx = &ir.http_routes[&key("web-shop-example-com")];
        let policies = &ctx.provider.ingress_nginx.as_ref().unwrap().policies;
        assert_eq!(policies.keys().collect::<Vec<_>>(), vec!["web"]);

        let policy = &policies["web"];
        assert_eq!(policy.proxy_body_size, Some(Quantity("10Mi".to_string())));
        assert_eq!(policy.coverage, BTreeSet::from([PolicyIndex::new(0, 0)]));
        assert_eq!(policy.services, BTreeSet::from(["web".to_string()]));
        assert!(!policy.covers_all(&ctx.backend_positions()));
    }

    #[test]
    fn cors_defaults() {
        let (policy, _) = policy_of(r#"    nginx.ingress.kubernetes.io/enable-cors: "true""#);
        let cors = policy.unwrap().cors.unwrap();
        assert_eq!(cors.allow_origins, vec!["*"]);
        assert_eq!(cors.allow_methods.len(), 6);
        assert_eq!(cors.allow_headers[0], "DNT");
        assert!(cors.expose_headers.is_empty());
        assert!(cors.allow_credentials);
        assert_eq!(cors.max_age, 1_728_000);
    }

    #[rstest]
    #[case(
        r#"    nginx.ingress.kubernetes.io/limit-rps: "10"
    nginx.ingress.kubernetes.io/limit-rpm: "100""#,
        Some(RateLimitPolicy { limit: 10, unit: RateLimitUnit::Second, burst_multiplier: 5 }),
        0
    )]
    #[case(
        r#"    nginx.ingress.kubernetes.io/limit-rpm: "100"
    nginx.ingress.kubernetes.io/limit-burst-multiplier: "3""#,
        Some(RateLimitPolicy { limit: 100, unit: RateLimitUnit::Minute, burst_multiplier: 3 }),
        0
    )]
    #[case(
        r#"    nginx.ingress.kubernetes.io/limit-rps: "10"
    nginx.ingress.kubernetes.io/limit-burst-multiplier: "0""#,
        Some(RateLimitPolicy { limit: 10, unit: RateLimitUnit::Second, burst_multiplier: 5 }),
        1
    )]
    #[case(r#"    nginx.ingress.kubernetes.io/limit-rps: "-1""#, None, 1)]
    fn rate_limits(
        #[case] annotations: &str,
        #[case] expected: Option<RateLimitPolicy>,
        #[case] warnings: usize,
    ) {
        let (policy, notes) = policy_of(annotations);
        assert_eq!(policy.and_then(|p| p.rate_limit), expected);
        assert_eq!(notes.items().len(), warnings);
    }

    #[test]
    fn timeouts_and_access_log() {
        let (policy, _) = policy_of(
            r#"    nginx.ingress.kubernetes.io/proxy-connect-timeout: "5"
    nginx.ingress.kubernetes.io/proxy-read-timeout: "120s"
    nginx.ingress.kubernetes.io/enable-access-log: "false""#,
        );
        let policy = policy.unwrap();
        assert_eq!(policy.proxy_connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(policy.proxy_read_timeout, Some(Duration::from_secs(120)));
        assert_eq!(policy.proxy_send_timeout, None);
        assert_eq!(policy.enable_access_log, Some(false));
    }

    #[rstest]
    #[case("http://auth", Some(("auth", "default", 80, "/")))]
    #[case("https://auth.security.svc.cluster.local/verify", Some(("auth", "security", 443, "/verify")))]
    #[case("http://auth.security.svc:9000/check", Some(("auth", "security", 9000, "/check")))]
    #[case("https://auth.example.com.evil/verify", None)]
    fn ext_auth_urls(#[case] url: &str, #[case] expected: Option<(&str, &str, i32, &str)>) {
        let (policy, _) = policy_of(&format!(
            r#"    nginx.ingress.kubernetes.io/auth-url: "{url}"
    nginx.ingress.kubernetes.io/auth-response-headers: "X-User, X-Email""#
        ));
        let ext_auth = policy.and_then(|p| p.ext_auth);
        match expected {
            Some((service, namespace, port, path)) => {
                let ext_auth = ext_auth.unwrap();
                assert_eq!(ext_auth.service_name, service);
                assert_eq!(ext_auth.service_namespace, namespace);
                assert_eq!(ext_auth.port, port);
                assert_eq!(ext_auth.path, path);
                assert_eq!(ext_auth.response_headers, vec!["X-User", "X-Email"]);
            }
            None => assert!(ext_auth.is_none()),
        }
    }

    #[rstest]
    #[case("htpasswd", None, Some(("default", "htpasswd")))]
    #[case("auth/htpasswd", None, Some(("auth", "htpasswd")))]
    #[case("htpasswd", Some("auth-map"), None)]
    fn basic_auth(
        #[case] secret: &str,
        #[case] secret_type: Option<&str>,
        #[case] expected: Option<(&str, &str)>,
    ) {
        let secret_type = secret_type
            .map(|kind| format!("\n    nginx.ingress.kubernetes.io/auth-secret-type: \"{kind}\""))
            .unwrap_or_default();
        let (policy, _) = policy_of(&format!(
            r#"    nginx.ingress.kubernetes.io/auth-type: "basic"
    nginx.ingress.kubernetes.io/auth-secret: "{secret}"
    nginx.ingress.kubernetes.io/auth-realm: "Restricted"{secret_type}"#
        ));
        let basic = policy.and_then(|p| p.basic_auth);
        assert_eq!(
            basic
                .as_ref()
                .map(|b| (b.secret_namespace.as_str(), b.secret_name.as_str())),
            expected
        );
        if let Some(basic) = basic {
            assert_eq!(basic.realm.as_deref(), Some("Restricted"));
        }
    }

    #[test]
    fn session_affinity_and_tls_backend() {
        let (policy, _) = policy_of(
            r#"    nginx.ingress.kubernetes.io/affinity: "cookie"
    nginx.ingress.kubernetes.io/session-cookie-expires: "3600"
    nginx.ingress.kubernetes.io/backend-protocol: "HTTPS"
    nginx.ingress.kubernetes.io/proxy-ssl-secret: "default/upstream-ca"
    nginx.ingress.kubernetes.io/proxy-ssl-verify: "on"
    nginx.ingress.kubernetes.io/proxy-ssl-name: "web.internal""#,
        );
        let policy = policy.unwrap();
        let affinity = policy.session_affinity.unwrap();
        assert_eq!(affinity.cookie_name, "INGRESSCOOKIE");
        assert_eq!(affinity.cookie_max_age, Some(3600));
        assert_eq!(policy.backend_protocol, Some(BackendProtocol::Https));
        let tls = policy.backend_tls.unwrap();
        assert!(tls.verify);
        assert_eq!(tls.secret.as_deref(), Some("default/upstream-ca"));
        assert_eq!(tls.sni.as_deref(), Some("web.internal"));
    }

    #[test]
    fn empty_policy_is_not_attached() {
        let (policy, _) = policy_of(r#"    nginx.ingress.kubernetes.io/enable-cors: "false""#);
        assert!(policy.is_none());
    }
}
