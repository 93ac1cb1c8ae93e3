use std::{io, net::SocketAddr};

use thiserror::Error;

pub type AnyError = anyhow::Error;
pub type AnyResult<T> = std::result::Result<T, AnyError>;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the server's structural operations.
///
/// Request-local faults raised by valves are plain [`AnyError`]s and never
/// travel through this type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
    #[error("unable to hand off connection: {0}")]
    Handoff(String),
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    #[error("lifecycle fault in {component}: {reason}")]
    Lifecycle { component: String, reason: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn lifecycle(component: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Lifecycle {
            component: component.into(),
            reason: reason.to_string(),
        }
    }
}

macro_rules! policy_violation {
    ($($arg:tt)*) => {
        $crate::Error::PolicyViolation(format!($($arg)*))
    };
}

macro_rules! invalid_config {
    ($($arg:tt)*) => {
        $crate::Error::InvalidConfig(format!($($arg)*))
    };
}
