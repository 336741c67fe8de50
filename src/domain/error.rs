use {super::provisioning::ProvisionError, thiserror::Error};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("order not found: {0}")]
    OrderNotFound(uuid::Uuid),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("webhook signature: {0}")]
    Signature(String),

    #[error("provisioning: {0}")]
    Provision(#[from] ProvisionError),

    #[error("notify: {0}")]
    Notify(String),
}
