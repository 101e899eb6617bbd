use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::PolicyTargetReference;

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "networking.gke.io",
    version = "v1",
    kind = "GCPGatewayPolicy",
    plural = "gcpgatewaypolicies",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct GCPGatewayPolicySpec {
    pub default: GCPGatewayPolicyConfig,
    pub target_ref: PolicyTargetReference,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GCPGatewayPolicyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_policy: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "networking.gke.io",
    version = "v1",
    kind = "GCPBackendPolicy",
    plural = "gcpbackendpolicies",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct GCPBackendPolicySpec {
    pub default: GCPBackendPolicyConfig,
    pub target_ref: PolicyTargetReference,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GCPBackendPolicyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_affinity: Option<SessionAffinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAffinity {
    #[serde(rename = "type")]
    pub affinity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_ttl_sec: Option<i64>,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "networking.gke.io",
    version = "v1",
    kind = "HealthCheckPolicy",
    plural = "healthcheckpolicies",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckPolicySpec {
    pub default: HealthCheckPolicyConfig,
    pub target_ref: PolicyTargetReference,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckPolicyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_interval_sec: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy_threshold: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unhealthy_threshold: Option<i64>,
    pub config: HealthCheck,
}

/// Exactly one of the protocol specific blocks is set, matching `type`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(rename = "type")]
    pub check_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_health_check: Option<CommonHealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_health_check: Option<CommonHealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http2_health_check: Option<CommonHealthCheck>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonHealthCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_path: Option<String>,
}
