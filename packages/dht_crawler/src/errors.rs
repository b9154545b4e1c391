use failure::Fail;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    inner: failure::Context<ErrorKind>,
}

#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "transport error: {}", cause)]
    Transport { cause: tokio_krpc::Error },

    #[fail(display = "invalid argument: {}", reason)]
    InvalidArgument { reason: String },

    #[fail(display = "bucket refresh queue is full")]
    VerifierQueueFull,

    #[fail(display = "no bootstrap host resolved to a usable address")]
    BootstrapFailed,
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

impl From<tokio_krpc::Error> for Error {
    fn from(cause: tokio_krpc::Error) -> Error {
        Error::from(ErrorKind::Transport { cause })
    }
}
