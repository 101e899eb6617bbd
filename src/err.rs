pub type I2GResult<T> = Result<T, I2GError>;

#[derive(Debug, thiserror::Error)]
pub enum I2GError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("Failed to parse annotation value: {0}")]
    ParseError(String),
    #[error("Invalid resource: {0}")]
    InvalidResource(String),
    #[error("Unknown provider '{0}', expected one of: {1}")]
    UnknownProvider(String, String),
    #[error("Unknown emitter '{0}', expected one of: {1}")]
    UnknownEmitter(String, String),
    #[error("General error: {0}")]
    General(String),
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
    #[error(transparent)]
    SerdeYamlError(#[from] serde_yaml::Error),
    #[error(transparent)]
    AnyhowError(#[from] anyhow::Error),
}
