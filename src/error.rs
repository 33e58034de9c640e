use derive_more::Display;

/// Failure classes of the store.
///
/// Every error produced by the core carries exactly one of these, either as
/// the root cause or as attached context, so callers can tell a missing key
/// from an unreachable quorum without matching on messages.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    #[display(fmt = "bad parameter")]
    BadParameter,
    #[display(fmt = "bad address")]
    BadAddress,
    #[display(fmt = "out of memory")]
    OutOfMemory,
    #[display(fmt = "I/O error")]
    Io,
    #[display(fmt = "network error")]
    Network,
    #[display(fmt = "not found")]
    NotFound,
}

impl std::error::Error for ErrorKind {}

impl ErrorKind {
    pub fn with(self, detail: impl std::fmt::Display + Send + Sync + 'static) -> crate::Error {
        crate::Error::new(self).context(detail)
    }
}

pub fn kind(err: &crate::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ErrorKind>())
        .copied()
}
