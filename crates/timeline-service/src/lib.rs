//! Wire-level client for the remote Timeline Service.

mod client;
mod error;
mod protocol;
mod transport;

pub use client::ServiceClient;
pub use error::{Result, ServiceError};
pub use protocol::{ClipAddress, ClipHandle, ClipKind, Location, Reply, Request};
pub use transport::{TcpTransport, Transport};
