//! Customized unified error type.

use std::error;
use std::fmt;
use std::io;
use std::num;

/// Customized error type for paxlab.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PaxlabError(String);

impl PaxlabError {
    pub fn msg(msg: impl ToString) -> Self {
        PaxlabError(msg.to_string())
    }
}

impl fmt::Display for PaxlabError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl error::Error for PaxlabError {}

// Helper macro for saving boiler-plate `impl From<X>`s for transparent
// conversion from various common error types to `PaxlabError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for PaxlabError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                PaxlabError(e.to_string())
            }
        }
    };
}

// Helper macro for saving boiler-plate `impl From<X<T>>`s for transparent
// conversion from various common generic error types to `PaxlabError`.
macro_rules! impl_from_error_generic {
    ($error:ty) => {
        impl<T> From<$error> for PaxlabError {
            fn from(e: $error) -> PaxlabError {
                PaxlabError::msg(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(num::ParseIntError);
impl_from_error!(num::ParseFloatError);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(tokio::sync::oneshot::error::RecvError);
impl_from_error!(tokio::sync::watch::error::RecvError);
impl_from_error!(tokio::time::error::Elapsed);
impl_from_error!(tokio::task::JoinError);

impl_from_error_generic!(tokio::sync::mpsc::error::SendError<T>);
impl_from_error_generic!(tokio::sync::watch::error::SendError<T>);
