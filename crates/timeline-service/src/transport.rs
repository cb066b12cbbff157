use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{Result, ServiceError};

/// Blocking request/response channel to the Timeline Service host.
///
/// One call sends one encoded request and waits for its reply. Nothing is
/// pipelined or batched.
pub trait Transport {
    fn exchange(&mut self, request: &str) -> Result<String>;
}

/// Newline-delimited JSON over TCP.
#[derive(Debug)]
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl TcpTransport {
    /// Connects to the host. `timeout` bounds each read and write.
    ///
    /// # Example
    /// ```no_run
    /// use std::time::Duration;
    /// use timeline_service::TcpTransport;
    ///
    /// let _transport = TcpTransport::connect("127.0.0.1:9877", Some(Duration::from_secs(5)))
    ///     .expect("host should be reachable");
    /// ```
    pub fn connect(address: impl ToSocketAddrs, timeout: Option<Duration>) -> Result<Self> {
        let stream = TcpStream::connect(address).map_err(|source| ServiceError::Io {
            context: "connect to timeline service",
            source,
        })?;
        stream
            .set_read_timeout(timeout)
            .and_then(|()| stream.set_write_timeout(timeout))
            .and_then(|()| stream.set_nodelay(true))
            .map_err(|source| ServiceError::Io {
                context: "configure timeline service socket",
                source,
            })?;
        let writer = stream.try_clone().map_err(|source| ServiceError::Io {
            context: "clone timeline service socket",
            source,
        })?;

        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }
}

impl Transport for TcpTransport {
    fn exchange(&mut self, request: &str) -> Result<String> {
        self.writer
            .write_all(request.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush())
            .map_err(|source| ServiceError::Io {
                context: "send request",
                source,
            })?;

        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|source| ServiceError::Io {
                context: "read reply",
                source,
            })?;
        if read == 0 {
            return Err(ServiceError::ConnectionClosed);
        }
        Ok(line)
    }
}
