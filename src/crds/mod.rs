//! Custom resources that are read from the input or emitted next to the
//! Gateway API objects. None of them are served by this tool, so the
//! OpenAPI schema generation is disabled everywhere.

pub mod backend_tls;
pub mod gce;
pub mod gke;
pub mod kgateway;

use serde::{Deserialize, Serialize};

/// Reference from a policy to the object it attaches to, in the same namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetReference {
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

impl PolicyTargetReference {
    pub fn service(name: &str) -> Self {
        Self {
            group: String::new(),
            kind: crate::consts::SERVICE_KIND.to_string(),
            name: name.to_string(),
            section_name: None,
        }
    }

    pub fn gateway(name: &str) -> Self {
        Self {
            group: crate::consts::GATEWAY_API_GROUP.to_string(),
            kind: "Gateway".to_string(),
            name: name.to_string(),
            section_name: None,
        }
    }

    pub fn http_route(name: &str) -> Self {
        Self {
            group: crate::consts::GATEWAY_API_GROUP.to_string(),
            kind: crate::consts::HTTP_ROUTE_KIND.to_string(),
            name: name.to_string(),
            section_name: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalObjectReference {
    pub name: String,
}

impl LocalObjectReference {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}
