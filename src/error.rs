//! Crate-wide error type. Bind failures abort the process; everything
//! else is logged and dropped by the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to bind listening socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Codec(#[from] crate::codec::CodecError),

    #[error("wrong number of arguments, expected `<binary> client <port>` or `<binary> server <port>`")]
    Usage,

    #[error("port must be an integer: {0}")]
    InvalidPort(#[source] std::num::ParseIntError),

    #[error("port {0} is not one of this cluster's configured replica addresses")]
    UnknownReplicaPort(u16),
}
