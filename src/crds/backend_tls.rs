use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::PolicyTargetReference;

/// `BackendTLSPolicy` is not part of the standard channel bindings of the
/// gateway-api crate, so it is declared here.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1alpha3",
    kind = "BackendTLSPolicy",
    plural = "backendtlspolicies",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct BackendTLSPolicySpec {
    pub target_refs: Vec<PolicyTargetReference>,
    pub validation: BackendTLSPolicyValidation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendTLSPolicyValidation {
    #[serde(
        default,
        rename = "wellKnownCACertificates",
        skip_serializing_if = "Option::is_none"
    )]
    pub well_known_ca_certificates: Option<String>,
    pub hostname: String,
}

impl BackendTLSPolicy {
    /// Policy validating the Service certificate against the system trust store.
    pub fn for_service(namespace: &str, service: &str) -> Self {
        let mut policy = BackendTLSPolicy::new(
            &format!("{service}-backend-tls"),
            BackendTLSPolicySpec {
                target_refs: vec![PolicyTargetReference::service(service)],
                validation: BackendTLSPolicyValidation {
                    well_known_ca_certificates: Some("System".to_string()),
                    hostname: service.to_string(),
                },
            },
        );
        policy.metadata.namespace = Some(namespace.to_string());
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_well_known_ca_field() {
        let policy = BackendTLSPolicy::for_service("default", "secure");
        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["metadata"]["name"], "secure-backend-tls");
        assert_eq!(value["apiVersion"], "gateway.networking.k8s.io/v1alpha3");
        assert_eq!(
            value["spec"]["validation"]["wellKnownCACertificates"],
            "System"
        );
        assert_eq!(value["spec"]["targetRefs"][0]["kind"], "Service");
        assert_eq!(value["spec"]["targetRefs"][0]["group"], "");
    }
}
