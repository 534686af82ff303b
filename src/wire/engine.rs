//! Step-definition engine seam
//!
//! The runner never looks inside the wire protocol. Whatever connection the
//! server accepts is handed, as a plain duplex byte stream, to a
//! [`StepEngine`] that knows how to speak it.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::common::Result;

/// Duplex byte stream over either socket kind
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

/// A connection accepted by the wire server
pub type WireConnection = Box<dyn Duplex>;

/// Consumer of the single accepted wire connection
#[async_trait]
pub trait StepEngine: Send + Sync {
    /// Serve the connection until the client is done with it
    async fn serve(&self, connection: WireConnection) -> Result<()>;
}

/// Engine that reads the connection to EOF and discards it
///
/// Used by the command-line binary, which has no step definitions of its
/// own. Embedders pass their engine to [`crate::runner::execute`] instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainEngine;

#[async_trait]
impl StepEngine for DrainEngine {
    async fn serve(&self, mut connection: WireConnection) -> Result<()> {
        let mut buf = [0u8; 8192];
        let mut total = 0usize;
        loop {
            let n = connection.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n;
        }
        tracing::debug!(bytes = total, "Wire client disconnected");
        Ok(())
    }
}
