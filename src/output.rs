use serde::Serialize;

use crate::{emitters::GatewayResources, err::I2GResult};

#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// Every object as a JSON value, in output order.
fn objects(resources: &GatewayResources) -> I2GResult<Vec<serde_json::Value>> {
    fn push<T: Serialize>(items: &[T], out: &mut Vec<serde_json::Value>) -> I2GResult<()> {
        for item in items {
            out.push(serde_json::to_value(item)?);
        }
        Ok(())
    }

    let mut out = Vec::with_capacity(resources.len());
    push(&resources.gateways, &mut out)?;
    push(&resources.http_routes, &mut out)?;
    push(&resources.grpc_routes, &mut out)?;
    push(&resources.backend_tls_policies, &mut out)?;
    out.extend(resources.extensions.iter().cloned());
    Ok(out)
}

pub fn render(resources: &GatewayResources, format: OutputFormat) -> I2GResult<String> {
    let objects = objects(resources)?;
    match format {
        OutputFormat::Yaml => {
            let documents = objects
                .iter()
                .map(serde_yaml::to_string)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(documents.join("---\n"))
        }
        OutputFormat::Json => {
            let list = serde_json::json!({
                "apiVersion": "v1",
                "kind": "List",
                "items": objects,
            });
            let mut rendered = serde_json::to_string_pretty(&list)?;
            rendered.push('\n');
            Ok(rendered)
        }
    }
}
