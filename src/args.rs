use std::path::PathBuf;

use crate::output::OutputFormat;

#[derive(clap::Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
/// Ingress to Gateway API converter.
///
/// Reads Ingress resources from a file or from the cluster and prints the
/// equivalent Gateway API resources.
pub struct I2GArgs {
    /// File with the resources to convert. Without it the current kubeconfig
    /// context is used.
    #[arg(long, env = "I2G_INPUT_FILE")]
    pub input_file: Option<PathBuf>,

    /// Namespace to read from, defaults to the namespace of the context.
    #[arg(long, short = 'n', env = "I2G_NAMESPACE")]
    pub namespace: Option<String>,

    /// Read from every namespace.
    #[arg(long, short = 'A', env = "I2G_ALL_NAMESPACES", default_value_t = false)]
    pub all_namespaces: bool,

    /// Comma separated list of providers, e.g. `ingress-nginx,gce`.
    #[arg(long, env = "I2G_PROVIDERS", value_delimiter = ',', required = true)]
    pub providers: Vec<String>,

    /// Implementation to emit resources for: standard, kgateway or gke.
    #[arg(long, env = "I2G_EMITTER", default_value = "standard")]
    pub emitter: String,

    #[arg(long, short = 'o', env = "I2G_OUTPUT", value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,

    /// Log level, logs go to stderr.
    #[arg(long, env = "I2G_LOG_LEVEL", default_value_t = tracing::level_filters::LevelFilter::INFO)]
    pub log_level: tracing::level_filters::LevelFilter,

    // Ingress classes handled by each provider
    #[arg(long, env = "I2G_INGRESS_NGINX_INGRESS_CLASS", default_value = "nginx")]
    pub ingress_nginx_ingress_class: String,

    #[arg(long, env = "I2G_NGINX_INGRESS_CLASS", default_value = "nginx")]
    pub nginx_ingress_class: String,

    #[arg(long, env = "I2G_APISIX_INGRESS_CLASS", default_value = "apisix")]
    pub apisix_ingress_class: String,

    #[arg(long, env = "I2G_CILIUM_INGRESS_CLASS", default_value = "cilium")]
    pub cilium_ingress_class: String,
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults() {
        let args = I2GArgs::parse_from(["i2g", "--providers", "ingress-nginx"]);
        assert_eq!(args.providers, vec!["ingress-nginx"]);
        assert_eq!(args.emitter, "standard");
        assert_eq!(args.output, OutputFormat::Yaml);
        assert_eq!(args.cilium_ingress_class, "cilium");
        assert!(!args.all_namespaces);
        assert!(args.input_file.is_none());
    }

    #[rstest]
    #[case(&["i2g", "--providers", "nginx,gce", "-A", "-o", "json"][..])]
    #[case(&["i2g", "--providers=nginx,gce", "--all-namespaces", "--output", "json"][..])]
    fn provider_list_and_flags(#[case] argv: &[&str]) {
        let args = I2GArgs::parse_from(argv);
        assert_eq!(args.providers, vec!["nginx", "gce"]);
        assert!(args.all_namespaces);
        assert_eq!(args.output, OutputFormat::Json);
    }

    #[test]
    fn providers_are_required() {
        assert!(I2GArgs::try_parse_from(["i2g"]).is_err());
    }
}
