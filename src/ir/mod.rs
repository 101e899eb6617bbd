//! Provider neutral intermediate representation.
//!
//! Providers produce an [`Ir`] holding plain Gateway API objects, each wrapped
//! in a context with one optional slot per provider for the data that has no
//! Gateway API equivalent. Emitters consume it.

pub mod policy;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use gateway_api::apis::standard::{
    gateways::Gateway,
    grpcroutes::GRPCRoute,
    httproutes::{HTTPRoute, HTTPRouteRules, HTTPRouteRulesBackendRefs},
};
use kube::ResourceExt;

use crate::{
    crds::{backend_tls::BackendTLSPolicy, gce::BackendConfigSpec},
    notifications::Notifications,
    utils::ObjectMetaI2GExt,
};

pub use policy::{Policy, PolicyIndex};

/// `(namespace, name)` of an object; ordering drives the output order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: kube::Resource>(obj: &K) -> Self {
        Self::new(obj.meta().namespace_or_default(), obj.name_any())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderKind {
    IngressNginx,
    Nginx,
    Apisix,
    Cilium,
    Gce,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::IngressNginx,
        ProviderKind::Nginx,
        ProviderKind::Apisix,
        ProviderKind::Cilium,
        ProviderKind::Gce,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::IngressNginx => "ingress-nginx",
            ProviderKind::Nginx => "nginx",
            ProviderKind::Apisix => "apisix",
            ProviderKind::Cilium => "cilium",
            ProviderKind::Gce => "gce",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declares a struct with one optional slot per provider.
macro_rules! provider_slots {
    ($(#[$meta:meta])* $name:ident {
        $($field:ident: $ty:ty => $kind:ident),* $(,)?
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            $(pub $field: Option<$ty>,)*
        }

        impl $name {
            /// Slots with only the given provider populated.
            pub fn for_provider(kind: ProviderKind) -> Self {
                let mut slots = Self::default();
                match kind {
                    $(ProviderKind::$kind => slots.$field = Some(<$ty>::default()),)*
                }
                slots
            }

            pub fn populated(&self) -> Vec<ProviderKind> {
                let mut kinds = Vec::new();
                $(if self.$field.is_some() {
                    kinds.push(ProviderKind::$kind);
                })*
                kinds
            }

            /// Fills the empty slots of `self` from `other`.
            pub fn merge(&mut self, other: Self) {
                $(if self.$field.is_none() {
                    self.$field = other.$field;
                })*
            }
        }
    };
}

provider_slots!(
    /// Provider specific data attached to a Gateway.
    ProviderGatewayIr {
        ingress_nginx: () => IngressNginx,
        nginx: () => Nginx,
        apisix: () => Apisix,
        cilium: () => Cilium,
        gce: GceGatewayIr => Gce,
    }
);

provider_slots!(
    /// Provider specific data attached to an HTTPRoute.
    ProviderHttpRouteIr {
        ingress_nginx: IngressNginxHttpRouteIr => IngressNginx,
        nginx: () => Nginx,
        apisix: () => Apisix,
        cilium: () => Cilium,
        gce: () => Gce,
    }
);

provider_slots!(
    ProviderGrpcRouteIr {
        ingress_nginx: () => IngressNginx,
        nginx: () => Nginx,
        apisix: () => Apisix,
        cilium: () => Cilium,
        gce: () => Gce,
    }
);

provider_slots!(
    /// Provider specific data attached to a backend Service.
    ProviderServiceIr {
        ingress_nginx: () => IngressNginx,
        nginx: () => Nginx,
        apisix: () => Apisix,
        cilium: () => Cilium,
        gce: GceServiceIr => Gce,
    }
);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GceGatewayIr {
    pub ssl_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GceServiceIr {
    pub backend_config: Option<BackendConfigSpec>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngressNginxHttpRouteIr {
    /// Policies keyed by the name of the Ingress they were parsed from.
    pub policies: BTreeMap<String, Policy>,
}

#[derive(Debug, Clone)]
pub struct GatewayContext {
    pub gateway: Gateway,
    pub provider: ProviderGatewayIr,
}

impl GatewayContext {
    /// Appends listeners whose names are not yet present on the Gateway.
    pub fn merge_listeners(&mut self, other: &Gateway) {
        let listeners = &mut self.gateway.spec.listeners;
        for listener in &other.spec.listeners {
            if listeners.iter().all(|known| known.name != listener.name) {
                listeners.push(listener.clone());
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRouteContext {
    pub route: HTTPRoute,
    pub provider: ProviderHttpRouteIr,
    /// `backend_sources[rule][backend]` names the Ingresses behind each backendRef.
    pub backend_sources: Vec<Vec<BTreeSet<String>>>,
    /// Hostname the Gateway listeners of the route were created for. Differs
    /// from the route hostnames when a hostless rule takes its TLS host.
    pub listener_hostname: Option<String>,
}

impl HttpRouteContext {
    pub fn new(route: HTTPRoute, backend_sources: Vec<Vec<BTreeSet<String>>>) -> Self {
        let listener_hostname = route
            .spec
            .hostnames
            .as_ref()
            .and_then(|hostnames| hostnames.first())
            .cloned();
        Self {
            route,
            provider: ProviderHttpRouteIr::default(),
            backend_sources,
            listener_hostname,
        }
    }

    pub fn rules(&self) -> &[HTTPRouteRules] {
        self.route.spec.rules.as_deref().unwrap_or_default()
    }

    pub fn rules_mut(&mut self) -> &mut Vec<HTTPRouteRules> {
        self.route.spec.rules.get_or_insert_with(Vec::new)
    }

    /// Every backend position of the route.
    pub fn backend_positions(&self) -> BTreeSet<PolicyIndex> {
        self.backend_sources
            .iter()
            .enumerate()
            .flat_map(|(rule, backends)| {
                (0..backends.len()).map(move |backend| PolicyIndex::new(rule, backend))
            })
            .collect()
    }

    /// Backend positions contributed by the given Ingress.
    pub fn positions_of(&self, ingress: &str) -> BTreeSet<PolicyIndex> {
        self.backend_sources
            .iter()
            .enumerate()
            .flat_map(|(rule, backends)| {
                backends
                    .iter()
                    .enumerate()
                    .filter(|(_, sources)| sources.contains(ingress))
                    .map(move |(backend, _)| PolicyIndex::new(rule, backend))
            })
            .collect()
    }

    /// All Ingresses contributing to the route.
    pub fn source_ingresses(&self) -> BTreeSet<String> {
        self.backend_sources
            .iter()
            .flatten()
            .flat_map(|sources| sources.iter().cloned())
            .collect()
    }

    /// Rules that have at least one backend from the given Ingress.
    pub fn rules_of(&self, ingress: &str) -> Vec<usize> {
        self.backend_sources
            .iter()
            .enumerate()
            .filter(|(_, backends)| backends.iter().any(|sources| sources.contains(ingress)))
            .map(|(rule, _)| rule)
            .collect()
    }

    /// True when every backend of the rule comes from the given Ingress only.
    pub fn rule_owned_by(&self, rule: usize, ingress: &str) -> bool {
        match self.backend_sources.get(rule) {
            Some(backends) if !backends.is_empty() => backends
                .iter()
                .all(|sources| sources.len() == 1 && sources.contains(ingress)),
            _ => false,
        }
    }

    pub fn backend_refs(&self, rule: usize) -> &[HTTPRouteRulesBackendRefs] {
        self.rules()
            .get(rule)
            .and_then(|rule| rule.backend_refs.as_deref())
            .unwrap_or_default()
    }

    /// Removes a backendRef together with its sources.
    pub fn remove_backend(
        &mut self,
        rule: usize,
        backend: usize,
    ) -> Option<(HTTPRouteRulesBackendRefs, BTreeSet<String>)> {
        let refs = self.rules_mut().get_mut(rule)?.backend_refs.as_mut()?;
        if backend >= refs.len() {
            return None;
        }
        let backend_ref = refs.remove(backend);
        let sources = self.backend_sources.get_mut(rule)?.remove(backend);
        Some((backend_ref, sources))
    }

    /// Inserts a rule at `index`, shifting later rules and their sources.
    pub fn insert_rule(&mut self, index: usize, rule: HTTPRouteRules, sources: Vec<BTreeSet<String>>) {
        let rules = self.rules_mut();
        let index = index.min(rules.len());
        rules.insert(index, rule);
        self.backend_sources.insert(index.min(self.backend_sources.len()), sources);
    }

    pub fn remove_rule(&mut self, index: usize) -> Option<(HTTPRouteRules, Vec<BTreeSet<String>>)> {
        let rules = self.rules_mut();
        if index >= rules.len() {
            return None;
        }
        let rule = rules.remove(index);
        let sources = if index < self.backend_sources.len() {
            self.backend_sources.remove(index)
        } else {
            Vec::new()
        };
        Some((rule, sources))
    }
}

#[derive(Debug, Clone)]
pub struct GrpcRouteContext {
    pub route: GRPCRoute,
    pub provider: ProviderGrpcRouteIr,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceContext {
    pub provider: ProviderServiceIr,
}

#[derive(Debug, Clone, Default)]
pub struct Ir {
    pub gateways: BTreeMap<ObjectKey, GatewayContext>,
    pub http_routes: BTreeMap<ObjectKey, HttpRouteContext>,
    pub grpc_routes: BTreeMap<ObjectKey, GrpcRouteContext>,
    pub backend_tls_policies: BTreeMap<ObjectKey, BackendTLSPolicy>,
    pub services: BTreeMap<ObjectKey, ServiceContext>,
}

impl Ir {
    /// Marks every context as owned by the given provider.
    pub fn claim(&mut self, kind: ProviderKind) {
        for ctx in self.gateways.values_mut() {
            ctx.provider = ProviderGatewayIr::for_provider(kind);
        }
        for ctx in self.http_routes.values_mut() {
            ctx.provider = ProviderHttpRouteIr::for_provider(kind);
        }
        for ctx in self.grpc_routes.values_mut() {
            ctx.provider = ProviderGrpcRouteIr::for_provider(kind);
        }
        for ctx in self.services.values_mut() {
            ctx.provider = ProviderServiceIr::for_provider(kind);
        }
    }

    /// Combines the output of two providers.
    ///
    /// Gateways with the same key share their listeners, everything else keeps
    /// the entry that was seen first.
    pub fn merge(&mut self, other: Ir, notes: &mut Notifications) {
        for (key, ctx) in other.gateways {
            match self.gateways.get_mut(&key) {
                Some(existing) => {
                    existing.merge_listeners(&ctx.gateway);
                    existing.provider.merge(ctx.provider);
                }
                None => {
                    self.gateways.insert(key, ctx);
                }
            }
        }
        merge_first_wins(&mut self.http_routes, other.http_routes, "HTTPRoute", notes);
        merge_first_wins(&mut self.grpc_routes, other.grpc_routes, "GRPCRoute", notes);
        merge_first_wins(
            &mut self.backend_tls_policies,
            other.backend_tls_policies,
            "BackendTLSPolicy",
            notes,
        );
        for (key, ctx) in other.services {
            match self.services.get_mut(&key) {
                Some(existing) => existing.provider.merge(ctx.provider),
                None => {
                    self.services.insert(key, ctx);
                }
            }
        }
    }

    /// Service context for a backend, created on first use.
    pub fn service_mut(&mut self, key: ObjectKey) -> &mut ServiceContext {
        self.services.entry(key).or_default()
    }
}

fn merge_first_wins<T>(
    target: &mut BTreeMap<ObjectKey, T>,
    incoming: BTreeMap<ObjectKey, T>,
    kind: &str,
    notes: &mut Notifications,
) {
    for (key, value) in incoming {
        if target.contains_key(&key) {
            notes.warn(
                "merge",
                &key,
                format!("{kind} produced by more than one provider, keeping the first one"),
            );
            continue;
        }
        target.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use gateway_api::apis::standard::{
        gateways::{GatewayListeners, GatewaySpec},
        httproutes::HTTPRouteSpec,
    };

    use super::*;

    fn gateway(listeners: &[&str]) -> Gateway {
        let mut gw = Gateway::new(
            "nginx",
            GatewaySpec {
                gateway_class_name: "nginx".to_string(),
                listeners: listeners
                    .iter()
                    .map(|name| GatewayListeners {
                        name: name.to_string(),
                        port: 80,
                        protocol: "HTTP".to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            },
        );
        gw.metadata.namespace = Some("default".to_string());
        gw
    }

    fn sources(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn route_ctx(rules: Vec<Vec<BTreeSet<String>>>) -> HttpRouteContext {
        let route_rules = rules
            .iter()
            .map(|backends| HTTPRouteRules {
                backend_refs: Some(
                    backends
                        .iter()
                        .enumerate()
                        .map(|(idx, _)| HTTPRouteRulesBackendRefs {
                            name: format!("svc-{idx}"),
                            port: Some(80),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            })
            .collect();
        let route = HTTPRoute::new(
            "web",
            HTTPRouteSpec {
                rules: Some(route_rules),
                ..Default::default()
            },
        );
        HttpRouteContext::new(route, rules)
    }

    #[test]
    fn merge_dedups_listeners_and_keeps_first_route() {
        let mut first = Ir::default();
        let key = ObjectKey::new("default", "nginx");
        first.gateways.insert(
            key.clone(),
            GatewayContext {
                gateway: gateway(&["http", "foo-http"]),
                provider: ProviderGatewayIr::for_provider(ProviderKind::IngressNginx),
            },
        );
        let route_key = ObjectKey::new("default", "web");
        first
            .http_routes
            .insert(route_key.clone(), route_ctx(vec![vec![sources(&["a"])]]));

        let mut second = Ir::default();
        second.gateways.insert(
            key.clone(),
            GatewayContext {
                gateway: gateway(&["http", "bar-http"]),
                provider: ProviderGatewayIr::for_provider(ProviderKind::Nginx),
            },
        );
        second
            .http_routes
            .insert(route_key.clone(), route_ctx(vec![vec![sources(&["b"])]]));

        let mut notes = Notifications::new();
        first.merge(second, &mut notes);

        let merged = &first.gateways[&key];
        let names = merged
            .gateway
            .spec
            .listeners
            .iter()
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["http", "foo-http", "bar-http"]);
        assert_eq!(
            merged.provider.populated(),
            vec![ProviderKind::IngressNginx, ProviderKind::Nginx]
        );
        assert_eq!(
            first.http_routes[&route_key].source_ingresses(),
            sources(&["a"])
        );
        assert_eq!(notes.items().len(), 1);
    }

    #[test]
    fn claim_populates_exactly_one_slot() {
        let mut ir = Ir::default();
        ir.http_routes.insert(
            ObjectKey::new("default", "web"),
            route_ctx(vec![vec![sources(&["a"])]]),
        );
        ir.claim(ProviderKind::Cilium);
        let ctx = &ir.http_routes[&ObjectKey::new("default", "web")];
        assert_eq!(ctx.provider.populated(), vec![ProviderKind::Cilium]);
    }

    #[test]
    fn coverage_follows_backend_sources() {
        let mut ctx = route_ctx(vec![
            vec![sources(&["a"]), sources(&["b"])],
            vec![sources(&["a", "b"])],
            vec![sources(&["a"])],
        ]);
        assert_eq!(ctx.backend_positions().len(), 4);
        assert_eq!(
            ctx.positions_of("b"),
            [PolicyIndex::new(0, 1), PolicyIndex::new(1, 0)]
                .into_iter()
                .collect()
        );
        assert_eq!(ctx.rules_of("b"), vec![0, 1]);
        assert!(ctx.rule_owned_by(2, "a"));
        assert!(!ctx.rule_owned_by(1, "a"));
        assert!(!ctx.rule_owned_by(0, "a"));

        let (backend, removed) = ctx.remove_backend(0, 1).unwrap();
        assert_eq!(backend.name, "svc-1");
        assert_eq!(removed, sources(&["b"]));
        ctx.insert_rule(
            1,
            HTTPRouteRules {
                backend_refs: Some(vec![backend]),
                ..Default::default()
            },
            vec![removed],
        );
        assert_eq!(ctx.rules().len(), 4);
        assert_eq!(ctx.backend_sources[1], vec![sources(&["b"])]);
        assert!(ctx.rule_owned_by(0, "a"));
        assert!(ctx.rule_owned_by(1, "b"));
    }

    #[test]
    fn object_key_orders_by_namespace_first() {
        let mut keys = [
            ObjectKey::new("b", "a"),
            ObjectKey::new("a", "z"),
            ObjectKey::new("a", "b"),
        ];
        keys.sort();
        assert_eq!(keys[0].to_string(), "a/b");
        assert_eq!(keys[2].to_string(), "b/a");
    }
}
