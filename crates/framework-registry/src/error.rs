use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("REGISTRY/DUPLICATE: {name} already registered for host type {host_type}")]
    Duplicate { name: String, host_type: String },

    #[error("REGISTRY/{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
