use std::{collections::BTreeSet, str::FromStr, time::Duration};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::err::I2GError;

/// Position of a single backendRef inside a merged HTTPRoute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PolicyIndex {
    pub rule: usize,
    pub backend: usize,
}

impl PolicyIndex {
    pub fn new(rule: usize, backend: usize) -> Self {
        Self { rule, backend }
    }
}

/// Settings collected from the annotations of one source Ingress.
///
/// Every knob is independent. `coverage` lists the backend positions of the
/// route that came from the Ingress and `services` the backend Services
/// behind those positions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Policy {
    pub client_body_buffer_size: Option<Quantity>,
    pub proxy_body_size: Option<Quantity>,
    pub cors: Option<CorsPolicy>,
    pub rate_limit: Option<RateLimitPolicy>,
    pub proxy_connect_timeout: Option<Duration>,
    pub proxy_send_timeout: Option<Duration>,
    pub proxy_read_timeout: Option<Duration>,
    pub enable_access_log: Option<bool>,
    pub ext_auth: Option<ExtAuthPolicy>,
    pub basic_auth: Option<BasicAuthPolicy>,
    pub session_affinity: Option<SessionAffinityPolicy>,
    pub backend_protocol: Option<BackendProtocol>,
    pub backend_tls: Option<BackendTls>,
    pub coverage: BTreeSet<PolicyIndex>,
    pub services: BTreeSet<String>,
}

impl Policy {
    /// True when no knob is set, regardless of coverage.
    pub fn is_empty(&self) -> bool {
        self.client_body_buffer_size.is_none()
            && self.proxy_body_size.is_none()
            && self.cors.is_none()
            && self.rate_limit.is_none()
            && self.proxy_connect_timeout.is_none()
            && self.proxy_send_timeout.is_none()
            && self.proxy_read_timeout.is_none()
            && self.enable_access_log.is_none()
            && self.ext_auth.is_none()
            && self.basic_auth.is_none()
            && self.session_affinity.is_none()
            && self.backend_protocol.is_none()
            && self.backend_tls.is_none()
    }

    /// Full coverage means the policy applies to every backend position of the route.
    pub fn covers_all(&self, positions: &BTreeSet<PolicyIndex>) -> bool {
        !positions.is_empty() && self.coverage == *positions
    }

    /// Names of the populated knobs, used for reporting.
    pub fn populated_fields(&self) -> Vec<&'static str> {
        let fields = [
            ("client-body-buffer-size", self.client_body_buffer_size.is_some()),
            ("proxy-body-size", self.proxy_body_size.is_some()),
            ("cors", self.cors.is_some()),
            ("rate-limit", self.rate_limit.is_some()),
            ("proxy-connect-timeout", self.proxy_connect_timeout.is_some()),
            ("proxy-send-timeout", self.proxy_send_timeout.is_some()),
            ("proxy-read-timeout", self.proxy_read_timeout.is_some()),
            ("enable-access-log", self.enable_access_log.is_some()),
            ("auth-url", self.ext_auth.is_some()),
            ("auth-type", self.basic_auth.is_some()),
            ("affinity", self.session_affinity.is_some()),
            ("backend-protocol", self.backend_protocol.is_some()),
            ("proxy-ssl", self.backend_tls.is_some()),
        ];
        fields
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsPolicy {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitUnit {
    Second,
    Minute,
}

impl RateLimitUnit {
    pub fn fill_interval(&self) -> Duration {
        match self {
            RateLimitUnit::Second => Duration::from_secs(1),
            RateLimitUnit::Minute => Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: i32,
    pub unit: RateLimitUnit,
    pub burst_multiplier: i32,
}

/// External authorization through an in-cluster HTTP service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtAuthPolicy {
    pub service_name: String,
    pub service_namespace: String,
    pub port: i32,
    pub path: String,
    pub response_headers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuthPolicy {
    pub secret_name: String,
    pub secret_namespace: String,
    pub realm: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAffinityPolicy {
    pub cookie_name: String,
    pub cookie_path: Option<String>,
    pub cookie_max_age: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendProtocol {
    Http,
    Https,
    Grpc,
    Grpcs,
    AutoHttp,
}

impl BackendProtocol {
    pub fn is_tls(&self) -> bool {
        matches!(self, BackendProtocol::Https | BackendProtocol::Grpcs)
    }

    pub fn is_grpc(&self) -> bool {
        matches!(self, BackendProtocol::Grpc | BackendProtocol::Grpcs)
    }
}

impl FromStr for BackendProtocol {
    type Err = I2GError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "HTTP" => Ok(BackendProtocol::Http),
            "HTTPS" => Ok(BackendProtocol::Https),
            "GRPC" => Ok(BackendProtocol::Grpc),
            "GRPCS" => Ok(BackendProtocol::Grpcs),
            "AUTO_HTTP" => Ok(BackendProtocol::AutoHttp),
            other => Err(I2GError::ParseError(format!(
                "unsupported backend protocol '{other}'"
            ))),
        }
    }
}

/// TLS settings used when talking to an HTTPS or GRPCS upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendTls {
    pub secret: Option<String>,
    pub verify: bool,
    pub sni: Option<String>,
}

/// Parses nginx size notation (`8`, `8k`, `1m`, `2g`) into a Kubernetes quantity.
pub fn parse_nginx_size(value: &str) -> Option<Quantity> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let number = digits.parse::<u64>().ok()?;
    let suffix = match unit.to_lowercase().as_str() {
        "" => "",
        "k" => "Ki",
        "m" => "Mi",
        "g" => "Gi",
        _ => return None,
    };
    Some(Quantity(format!("{number}{suffix}")))
}

/// Parses an nginx timeout given in seconds, with an optional `s` suffix.
pub fn parse_seconds(value: &str) -> Option<Duration> {
    let value = value.trim();
    let number = value.strip_suffix('s').unwrap_or(value);
    number.parse::<u64>().ok().map(Duration::from_secs)
}
