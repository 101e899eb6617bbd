/// Legacy annotation used to select an ingress class before `spec.ingressClassName` existed.
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

pub const DEFAULT_NAMESPACE: &str = "default";

pub const HTTP_PORT: i32 = 80;
pub const HTTPS_PORT: i32 = 443;

pub const HTTP_PROTOCOL: &str = "HTTP";
pub const HTTPS_PROTOCOL: &str = "HTTPS";

pub const SERVICE_KIND: &str = "Service";
pub const HTTP_ROUTE_KIND: &str = "HTTPRoute";

/// Group of every Gateway API kind emitted by this tool.
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// Name used when a listener or route has no hostname to derive one from.
pub const ALL_HOSTS: &str = "all-hosts";
