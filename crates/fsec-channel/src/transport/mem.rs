//! In-memory transport pair.
//!
//! Two [`MemTransport`] ends connected by bounded channels, message-for-
//! message compatible with the WebSocket carrier.  Used by the test suites
//! and by in-process sessions; also handy for injecting hand-built frames
//! when exercising the record layer's failure paths.

use tokio::sync::mpsc;

use super::{Message, Transport, TransportError, TransportReader, TransportWriter};

pub struct MemTransport {
    reader: MemReader,
    writer: MemWriter,
}

pub struct MemReader {
    rx: mpsc::Receiver<Message>,
}

pub struct MemWriter {
    tx: Option<mpsc::Sender<Message>>,
}

/// Build a connected transport pair with the given per-direction capacity.
pub fn mem_pair(capacity: usize) -> (MemTransport, MemTransport) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    (
        MemTransport {
            reader: MemReader { rx: a_rx },
            writer: MemWriter { tx: Some(a_tx) },
        },
        MemTransport {
            reader: MemReader { rx: b_rx },
            writer: MemWriter { tx: Some(b_tx) },
        },
    )
}

impl TransportReader for MemReader {
    async fn read_message(&mut self) -> Result<Message, TransportError> {
        match self.rx.recv().await {
            Some(msg) => Ok(msg),
            None => Err(TransportError::Closed { code: None, reason: None }),
        }
    }
}

impl TransportWriter for MemWriter {
    async fn write_message(&mut self, msg: Message) -> Result<(), TransportError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or(TransportError::Closed { code: None, reason: None })?;
        tx.send(msg)
            .await
            .map_err(|_| TransportError::Closed { code: None, reason: None })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

impl Transport for MemTransport {
    type Reader = MemReader;
    type Writer = MemWriter;

    async fn read_message(&mut self) -> Result<Message, TransportError> {
        self.reader.read_message().await
    }

    async fn write_message(&mut self, msg: Message) -> Result<(), TransportError> {
        self.writer.write_message(msg).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.close().await
    }

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }

    fn local_addr(&self) -> Option<String> {
        Some("mem:local".to_owned())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("mem:remote".to_owned())
    }
}
