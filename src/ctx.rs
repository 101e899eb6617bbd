use clap::Parser;

use crate::{args::I2GArgs, err::I2GResult, reader::InputResources};

#[derive(Clone, Debug)]
pub struct Context {
    pub args: I2GArgs,
}

impl Context {
    pub fn new() -> Self {
        Self {
            args: I2GArgs::parse(),
        }
    }

    /// Loads the input from the file when one is given, from the cluster otherwise.
    pub async fn read_input(&self) -> I2GResult<InputResources> {
        if let Some(path) = &self.args.input_file {
            let namespace = (!self.args.all_namespaces)
                .then_some(self.args.namespace.as_deref())
                .flatten();
            return InputResources::read_file(path, namespace);
        }

        let client = kube::Client::try_default().await?;
        let namespace = match (&self.args.namespace, self.args.all_namespaces) {
            (_, true) => None,
            (Some(namespace), false) => Some(namespace.clone()),
            (None, false) => Some(client.default_namespace().to_string()),
        };
        InputResources::read_cluster(client, namespace.as_deref()).await
    }
}
