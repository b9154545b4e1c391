use failure::Fail;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    inner: failure::Context<ErrorKind>,
}

#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "failed to decode KRPC message: {}", cause)]
    DecodeError { cause: serde_bencode::Error },

    #[fail(display = "failed to encode KRPC message: {}", cause)]
    EncodeError { cause: serde_bencode::Error },

    #[fail(display = "expected a {}-byte {}, got {}", expected, what, got)]
    WrongLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[fail(display = "message exceeds maximum size of {} bytes", limit)]
    MessageTooLarge { limit: usize },

    #[fail(display = "message is missing a sender node id")]
    MissingNodeId,
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&failure::Backtrace> {
        self.inner.backtrace()
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.inner, f)
    }
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: failure::Context::new(kind),
        }
    }
}

impl From<failure::Context<ErrorKind>> for Error {
    fn from(inner: failure::Context<ErrorKind>) -> Error {
        Error { inner }
    }
}
