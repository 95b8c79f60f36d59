//! Byte-stream transports.
//!
//! A [`Connector`] turns an address into a bidirectional stream. The default
//! dials TCP; tests substitute in-memory pipes.

use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

/// Any bidirectional byte stream a connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

pub type BoxedStream = Box<dyn Transport>;

/// Opens a stream to an address.
pub type Connector = Arc<dyn Fn(String) -> BoxFuture<'static, io::Result<BoxedStream>> + Send + Sync>;

/// Dial `address` over TCP.
pub fn tcp_connector() -> Connector {
    Arc::new(|address: String| -> BoxFuture<'static, io::Result<BoxedStream>> {
        Box::pin(async move {
            let stream = tokio::net::TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            Ok::<BoxedStream, io::Error>(Box::new(stream))
        })
    })
}
