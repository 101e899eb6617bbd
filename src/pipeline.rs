//! providers -> merge -> emit -> render

use crate::{
    args::I2GArgs,
    emitters::{self, GatewayResources},
    err::I2GResult,
    ir::Ir,
    notifications::Notifications,
    output, providers,
    reader::InputResources,
};

/// Runs every requested provider over the input and merges their IR in the
/// order the providers were given.
pub fn build_ir(args: &I2GArgs, input: &InputResources, notes: &mut Notifications) -> I2GResult<Ir> {
    let mut names = Vec::new();
    for name in &args.providers {
        let name = name.trim();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    let providers = names
        .into_iter()
        .map(|name| providers::by_name(name, args))
        .collect::<I2GResult<Vec<_>>>()?;

    let mut ir = Ir::default();
    for provider in providers {
        let provider_ir = provider.to_ir(input, notes)?;
        tracing::info!(
            provider = provider.name(),
            gateways = provider_ir.gateways.len(),
            http_routes = provider_ir.http_routes.len(),
            grpc_routes = provider_ir.grpc_routes.len(),
            "Provider finished"
        );
        ir.merge(provider_ir, notes);
    }
    Ok(ir)
}

pub fn convert(args: &I2GArgs, input: &InputResources, notes: &mut Notifications) -> I2GResult<GatewayResources> {
    let emitter = emitters::by_name(&args.emitter)?;
    let ir = build_ir(args, input, notes)?;
    let resources = emitter.emit(ir, notes)?;
    tracing::info!(
        emitter = emitter.name(),
        objects = resources.len(),
        "Conversion finished"
    );
    Ok(resources)
}

/// Full run, returning the rendered document.
pub fn run(args: &I2GArgs, input: &InputResources, notes: &mut Notifications) -> I2GResult<String> {
    let resources = convert(args, input, notes)?;
    output::render(&resources, args.output)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::{err::I2GError, notifications::NotificationLevel};

    const INPUT: &str = r#"
apiVersion: v1
kind: Service
metadata:
  name: web
  namespace: default
spec:
  ports:
    - name: http
      port: 8080
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: web
  namespace: default
  annotations:
    nginx.ingress.kubernetes.io/proxy-body-size: 8m
    nginx.ingress.kubernetes.io/server-snippet: "return 200;"
spec:
  ingressClassName: nginx
  tls:
    - hosts: [web.example.com]
      secretName: web-tls
  rules:
    - host: web.example.com
      http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: web
                port:
                  name: http
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: legacy
  namespace: default
  annotations:
    kubernetes.io/ingress.class: gce
spec:
  rules:
    - host: legacy.example.com
      http:
        paths:
          - path: /*
            pathType: ImplementationSpecific
            backend:
              service:
                name: legacy
                port:
                  number: 80
"#;

    fn args(extra: &[&str]) -> I2GArgs {
        let mut argv = vec!["i2g"];
        argv.extend_from_slice(extra);
        I2GArgs::parse_from(argv)
    }

    fn input() -> InputResources {
        InputResources::from_yaml(INPUT, None).unwrap()
    }

    #[test]
    fn kgateway_end_to_end() {
        let args = args(&["--providers", "ingress-nginx,gce,ingress-nginx", "--emitter", "kgateway", "-o", "json"]);
        let mut notes = Notifications::new();
        let rendered = run(&args, &input(), &mut notes).unwrap();
        let list: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        let items = list["items"].as_array().unwrap();
        let kinds = items
            .iter()
            .map(|item| {
                format!(
                    "{}/{}",
                    item["kind"].as_str().unwrap(),
                    item["metadata"]["name"].as_str().unwrap()
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                "Gateway/gce",
                "Gateway/nginx",
                "HTTPRoute/legacy-legacy-example-com",
                "HTTPRoute/web-web-example-com",
                "HTTPRoute/web-web-example-com-https-redirect",
                "TrafficPolicy/web-web-example-com",
            ]
        );

        let web = &items[3];
        assert_eq!(web["spec"]["rules"][0]["backendRefs"][0]["port"], 8080);
        assert_eq!(web["spec"]["parentRefs"][0]["sectionName"], "web-example-com-https");
        let traffic = &items[5]["spec"];
        assert_eq!(traffic["buffer"]["maxRequestSize"], "8Mi");

        assert_eq!(notes.count(NotificationLevel::Warning), 1);
        assert!(notes.items()[0].message.contains("server-snippet"));
    }

    #[test]
    fn standard_yaml_reports_lost_annotations() {
        let args = args(&["--providers", "ingress-nginx"]);
        let mut notes = Notifications::new();
        let rendered = run(&args, &input(), &mut notes).unwrap();
        assert_eq!(rendered.matches("kind: HTTPRoute").count(), 2);
        assert!(!rendered.contains("TrafficPolicy"));
        assert!(notes.items().iter().any(|note| note.source == "standard"
            && note.message.contains("proxy-body-size")));
    }

    #[test]
    fn unknown_names_fail_before_conversion() {
        let mut notes = Notifications::new();
        let err = run(&args(&["--providers", "traefik"]), &input(), &mut notes);
        assert!(matches!(err, Err(I2GError::UnknownProvider(..))));
        let err = run(&args(&["--providers", "gce", "--emitter", "istio"]), &input(), &mut notes);
        assert!(matches!(err, Err(I2GError::UnknownEmitter(..))));
        assert!(notes.is_empty());
    }
}
