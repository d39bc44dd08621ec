//! Error plumbing for the linker. Most passes are infallible once parsing has validated the
//! inputs, so errors here are either resource failures or internal invariant violations.

use std::fmt::Debug;
use std::fmt::Display;

pub type Result<T = (), E = Error> = core::result::Result<T, E>;

pub struct Error {
    message: String,
    source: Option<Box<Error>>,
}

impl Error {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    fn chain(self, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(self)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.message, f)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::new(error.to_string())
    }
}

/// Attaches extra context to errors as they propagate towards the linker driver.
pub trait Context<T> {
    fn context(self, message: &str) -> Result<T>;

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> Context<T> for Result<T, E> {
    fn context(self, message: &str) -> Result<T> {
        self.map_err(|error| error.into().chain(message))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|error| error.into().chain(f()))
    }
}

impl<T> Context<T> for Option<T> {
    fn context(self, message: &str) -> Result<T> {
        self.ok_or_else(|| Error::new(message))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| Error::new(f()))
    }
}

#[macro_export]
macro_rules! error {
    ($($args:tt)*) => {
        $crate::error::Error::new(format!($($args)*))
    };
}

#[macro_export]
macro_rules! bail {
    ($($args:tt)*) => {
        return Err($crate::error!($($args)*))
    };
}

#[macro_export]
macro_rules! ensure {
    ($condition:expr, $($args:tt)*) => {
        if !$condition {
            $crate::bail!($($args)*);
        }
    };
}

/// Like `debug_assert!`, except that in release builds the check becomes a regular linker error
/// rather than being compiled out.
#[macro_export]
macro_rules! debug_assert_bail {
    ($condition:expr, $($args:tt)*) => {
        if cfg!(debug_assertions) {
            assert!($condition, $($args)*);
        } else if !$condition {
            $crate::bail!($($args)*);
        }
    };
}

#[test]
fn test_context_chains_messages() {
    let error: Result<()> = Err(Error::new("inner"));
    let error = error.context("outer").unwrap_err();
    assert_eq!(error.to_string(), "outer: inner");
}
