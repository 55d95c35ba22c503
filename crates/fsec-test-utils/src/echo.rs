//! Echo handler used across the integration suites.

use fsec_session::StreamRegistry;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A registry with one `"echo"` handler that mirrors raw bytes until EOF.
pub fn echo_registry() -> StreamRegistry {
    StreamRegistry::new().register("echo", |mut stream| async move {
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                    if stream.flush().await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = stream.shutdown().await;
    })
}
