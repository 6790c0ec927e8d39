//! Crate-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::connections::ConnectError;
use crate::interfaces::RegistryError;
use crate::policy::DeclarationError;
use crate::profile::ComposeError;

/// Any error the engine can return.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
