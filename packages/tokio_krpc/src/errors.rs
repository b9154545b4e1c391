use failure::Fail;
use krpc_encoding::KRPCError;
use std::net::SocketAddr;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    inner: failure::Context<ErrorKind>,
}

#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "failed to send to {}: {}", to, cause)]
    SendFailed { to: SocketAddr, cause: std::io::Error },

    #[fail(display = "failed to receive on {}: {}", on, cause)]
    RecvFailed { on: SocketAddr, cause: std::io::Error },

    #[fail(display = "failed to bind a UDP socket on any of {} candidate ports", attempts)]
    BindFailed { attempts: usize },

    #[fail(display = "transaction table is full ({} in flight)", capacity)]
    ResourceExhausted { capacity: usize },

    #[fail(display = "transaction timed out")]
    Timeout,

    #[fail(display = "remote returned an error: {}", _0)]
    Peer(KRPCError),

    #[fail(display = "codec error: {}", cause)]
    Codec { cause: krpc_encoding::Error },

    #[fail(display = "response did not match the variant expected for this query")]
    UnexpectedResponse,
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

    /// Outbound send/codec failures are treated as a plain timeout by
    /// the issuing lookup: the node simply didn't answer.
    pub fn is_timeout_equivalent(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::SendFailed { .. } | ErrorKind::Peer(_)
        )
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: failure::Context::new(kind),
        }
    }
}

impl From<krpc_encoding::Error> for Error {
    fn from(cause: krpc_encoding::Error) -> Error {
        Error::from(ErrorKind::Codec { cause })
    }
}
