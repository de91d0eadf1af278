//! Error type shared by the view service, its stubs, and the executables.

use std::error;
use std::fmt;
use std::io;
use std::net;

/// A message-carrying error. Source errors are flattened into their display
/// strings so the type stays `Clone + Eq` for easy assertions.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ViewServError(pub(crate) String);

impl ViewServError {
    pub fn msg(msg: impl ToString) -> Self {
        ViewServError(msg.to_string())
    }
}

impl fmt::Display for ViewServError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl error::Error for ViewServError {}

macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for ViewServError {
            fn from(e: $error) -> Self {
                ViewServError(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(net::AddrParseError);
impl_from_error!(toml::de::Error);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(ctrlc::Error);

impl<T> From<tokio::sync::watch::error::SendError<T>> for ViewServError {
    fn from(e: tokio::sync::watch::error::SendError<T>) -> Self {
        ViewServError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_bare_message() {
        let e = ViewServError::msg("no view yet");
        assert_eq!(e.to_string(), "no view yet");
    }

    #[test]
    fn converts_io_and_codec_errors() {
        let e: ViewServError =
            io::Error::new(io::ErrorKind::ConnectionReset, "peer gone").into();
        assert!(e.0.contains("peer gone"));

        // 0xc1 is a reserved msgpack marker
        let bad: Result<u64, _> = rmp_serde::from_slice(&[0xc1]);
        let e = bad.map_err(ViewServError::from).unwrap_err();
        assert!(!e.0.is_empty());
    }
}
