//! IPC channel for communicating with plugin processes
//!
//! Frames are newline-terminated JSON objects (see [`crate::message`]).
//! The reader half only ever hands out complete frames; bytes belonging to a
//! frame that has not been terminated yet stay buffered until the rest
//! arrives, and are discarded if the stream ends first.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const FRAME_DELIMITER: u8 = b'\n';
const READ_CHUNK: usize = 8 * 1024;

/// Largest frame accepted from a plugin
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Accumulates raw bytes and splits them into complete frames
#[derive(Debug)]
pub struct FrameBuffer {
    pending: Vec<u8>,
    /// Bytes of `pending` already known not to hold a delimiter
    scanned: usize,
    max_len: usize,
    /// Dropping the rest of an oversized frame up to its delimiter
    skipping: bool,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::with_max_len(MAX_FRAME_LEN)
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_len,
            skipping: false,
        }
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pop the next complete frame (without its delimiter)
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let unscanned = &self.pending[self.scanned..];
            let Some(offset) = unscanned.iter().position(|b| *b == FRAME_DELIMITER) else {
                self.scanned = self.pending.len();
                if self.pending.len() > self.max_len {
                    warn!(
                        "Discarding oversized frame ({} bytes without delimiter)",
                        self.pending.len()
                    );
                    self.pending.clear();
                    self.scanned = 0;
                    self.skipping = true;
                }
                return None;
            };
            let end = self.scanned + offset;
            self.scanned = 0;
            let mut frame: Vec<u8> = self.pending.drain(..=end).collect();
            frame.pop();
            if std::mem::take(&mut self.skipping) {
                continue;
            }
            if frame.len() > self.max_len {
                warn!("Discarding oversized frame ({} bytes)", frame.len());
                continue;
            }
            if frame.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(frame);
        }
    }

    /// Number of buffered bytes that do not yet form a frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop whatever partial frame is left; returns how many bytes were lost
    pub fn discard(&mut self) -> usize {
        let lost = self.pending.len();
        self.pending.clear();
        self.scanned = 0;
        self.skipping = false;
        lost
    }
}

/// Writer for sending frames to a plugin process
pub struct IpcWriter {
    stdin: ChildStdin,
}

impl IpcWriter {
    pub fn new(stdin: ChildStdin) -> Self {
        Self { stdin }
    }

    /// Write one already-encoded frame
    pub async fn send(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.stdin.write_all(frame).await?;
        self.stdin.flush().await
    }

    /// Forward frames from `rx` until the channel closes or the pipe breaks
    pub fn spawn(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
        plugin: String,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = self.send(&frame).await {
                    debug!("Plugin {} stopped accepting input: {}", plugin, e);
                    break;
                }
            }
        })
    }
}

/// Reader for receiving frames from a plugin process
pub struct IpcReader {
    stdout: ChildStdout,
    buffer: FrameBuffer,
}

impl IpcReader {
    pub fn new(stdout: ChildStdout) -> Self {
        Self {
            stdout,
            buffer: FrameBuffer::new(),
        }
    }

    /// Receive the next complete frame, `None` on end of stream
    pub async fn recv(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.buffer.next_frame() {
                return Ok(Some(frame));
            }
            let n = self.stdout.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buffer.extend(&chunk[..n]);
        }
    }

    /// Push every complete frame into `tx`; the sender is dropped when the
    /// stream ends so the receiving side observes a disconnect.
    pub fn spawn(mut self, tx: mpsc::UnboundedSender<Vec<u8>>, plugin: String) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.recv().await {
                    Ok(Some(frame)) => {
                        if tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Plugin {} closed its output", plugin);
                        break;
                    }
                    Err(e) => {
                        warn!("Error reading from plugin {}: {}", plugin, e);
                        break;
                    }
                }
            }
            let lost = self.buffer.discard();
            if lost > 0 {
                warn!("Plugin {} left a truncated frame ({} bytes), discarded", plugin, lost);
            }
        })
    }
}
