use core::fmt;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

use crate::config::ConfigError;

/// Startup-time failure. Wrapping the cause in a newtype lets `main` return
/// it directly while still printing a clean one-line message instead of the
/// default `Err(...)` dump.
pub struct FatalError(pub Box<dyn Error>);

impl Debug for FatalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\r\x1b[K{}", self)
    }
}

impl Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl Error for FatalError {}

impl From<ConfigError> for FatalError {
    fn from(e: ConfigError) -> Self {
        FatalError(Box::new(e))
    }
}

impl From<std::io::Error> for FatalError {
    fn from(e: std::io::Error) -> Self {
        FatalError(Box::new(e))
    }
}

impl From<std::net::AddrParseError> for FatalError {
    fn from(e: std::net::AddrParseError) -> Self {
        FatalError(Box::new(e))
    }
}

#[derive(Debug)]
struct Message(String);

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for Message {}

impl From<String> for FatalError {
    fn from(s: String) -> Self {
        FatalError(Box::new(Message(s)))
    }
}

impl From<&str> for FatalError {
    fn from(s: &str) -> Self {
        FatalError(Box::new(Message(s.to_string())))
    }
}

pub type Result<T> = std::result::Result<T, FatalError>;
