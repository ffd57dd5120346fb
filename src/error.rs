// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// The result for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur when working with wall-clock helpers.
///
/// Scheduler operations never fail: invalid inputs are programmer errors
/// and panic instead (non-positive ticker intervals), and everything else
/// is infallible by construction. What remains fallible is the wall-clock
/// boundary — parsing a timestamp out of text.
///
/// # Introspection is limited
///
/// Other than implementing the [`std::error::Error`] and
/// [`core::fmt::Debug`] traits, this error type currently provides no
/// introspection capabilities.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(#[from] ErrorKind);

#[derive(Debug, thiserror::Error)]
pub(crate) enum ErrorKind {
    #[error(transparent)]
    Jiff(#[from] jiff::Error),
}

impl Error {
    pub(crate) const fn from_jiff(error: jiff::Error) -> Self {
        Self(ErrorKind::Jiff(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Error: Send, Sync);
    }

    #[test]
    fn jiff_error_message_passes_through() {
        let error = "not a timestamp".parse::<jiff::Timestamp>().unwrap_err();
        let message = error.to_string();
        let error = Error::from_jiff(error);

        assert_eq!(error.to_string(), message);
    }
}
