use std::io;
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, Socket};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use crate::charset::Charset;

/// Longest line accepted from a peer, terminator included.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// One side of a session: a socket, its encoding, and a closed flag.
///
/// Writing and closing go through the shared `Connection`; reading happens
/// through the [`LineReader`] handed out once at construction. Closing never
/// waits for a write in progress: it shuts the socket down through its own
/// handle, which fails any write stuck on a peer that stopped reading.
pub struct Connection {
    label: &'static str,
    writer: Mutex<Option<OwnedWriteHalf>>,
    socket: Socket,
    charset: Charset,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    grace: Duration,
}

impl Connection {
    pub fn new(
        label: &'static str,
        stream: TcpStream,
        charset: Charset,
        grace: Duration,
    ) -> io::Result<(Arc<Self>, LineReader)> {
        let socket = SockRef::from(&stream).try_clone()?;
        let (read, write) = stream.into_split();
        let (close_tx, close_rx) = watch::channel(false);

        let connection = Arc::new(Self {
            label,
            writer: Mutex::new(Some(write)),
            socket,
            charset,
            closed: AtomicBool::new(false),
            close_tx,
            grace,
        });
        let reader = LineReader {
            inner: BufReader::new(read),
            charset,
            close_rx,
            buf: Vec::new(),
        };
        Ok((connection, reader))
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write `text` as one or more CRLF-terminated lines; `\n` separates
    /// lines within `text`.
    pub async fn write_text(&self, text: &str) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(text.len() + 2);
        for line in text.split('\n') {
            bytes.extend(self.charset.encode(line.trim_end_matches('\r')));
            bytes.extend_from_slice(b"\r\n");
        }

        let mut guard = self.writer.lock().await;
        let writer = match guard.as_mut() {
            Some(writer) if !self.is_closed() => writer,
            _ => return Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed")),
        };
        writer.write_all(&bytes).await?;
        writer.flush().await
    }

    /// Shut the socket down: input, then output, then a grace delay before
    /// the final close. Only the first call does anything.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.close_tx.send(true);

        if let Err(err) = self.socket.shutdown(Shutdown::Read) {
            tracing::trace!(side = self.label, %err, "input shutdown failed");
        }
        if let Err(err) = self.socket.shutdown(Shutdown::Write) {
            tracing::trace!(side = self.label, %err, "output shutdown failed");
        }
        tokio::time::sleep(self.grace).await;

        // A writer still holding the lock has been failed by the shutdown
        // and releases the half on its own.
        match self.writer.try_lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(_) => tracing::trace!(side = self.label, "write in progress at close"),
        }
        tracing::trace!(side = self.label, "socket closed");
    }
}

/// Splits the inbound byte stream into lines.
pub struct LineReader {
    inner: BufReader<OwnedReadHalf>,
    charset: Charset,
    close_rx: watch::Receiver<bool>,
    buf: Vec<u8>,
}

impl LineReader {
    /// Next line without its `\n` or `\r\n` terminator. `Ok(None)` at end of
    /// stream or once the owning [`Connection`] is closed. A line longer than
    /// [`MAX_LINE_BYTES`] is an `InvalidData` error.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        if *self.close_rx.borrow() {
            return Ok(None);
        }
        self.buf.clear();

        let mut limited = (&mut self.inner).take(MAX_LINE_BYTES as u64);
        let read = tokio::select! {
            read = limited.read_until(b'\n', &mut self.buf) => read?,
            _ = self.close_rx.changed() => return Ok(None),
        };
        if read == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        } else if read == MAX_LINE_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {MAX_LINE_BYTES} bytes"),
            ));
        }
        Ok(Some(self.charset.decode(&self.buf)))
    }
}
