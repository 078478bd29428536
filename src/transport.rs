use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use crate::codec::FrameCodec;
use crate::protocol::Command;

/// Errors surfaced by the byte transport.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum TransportError {
    /// The link is closed; no further writes will succeed.
    #[error("transport is closed")]
    Closed,
    /// The link failed mid-operation.
    #[error("transport write failed: {reason}")]
    WriteFailed { reason: String },
}

/// Inbound byte chunks, fragmented however the link fragments them.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// Raw byte link to the accessory.
///
/// Implementations deliver bytes as the link fragments them; framing is the
/// caller's concern. [`Transport::incoming`] hands out the inbound stream
/// once, subsequent calls yield an empty stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes one buffer to the link.
    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Takes the inbound byte stream.
    fn incoming(&self) -> ByteStream;
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Script {
    /// Queued verbatim replies, keyed by the opcode of the frame that
    /// triggers them.
    replies: HashMap<u8, VecDeque<Vec<u8>>>,
    /// Opcodes the device stays silent on, overriding auto-acks.
    silent: Vec<u8>,
}

/// In-memory [`Transport`] for tests and demos.
///
/// Plays the device's side of the protocol: by default every sent frame is
/// answered with its acknowledgement (an empty-data echo, or a chunk ack
/// echoing the frame number). Tests can queue verbatim replies per opcode,
/// script silence, inject unsolicited frames, fragment outgoing replies, and
/// fail the next write.
pub struct FakeTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    script: Mutex<Script>,
    incoming_tx: mpsc::Sender<Result<Vec<u8>, TransportError>>,
    incoming_rx: Mutex<Option<mpsc::Receiver<Result<Vec<u8>, TransportError>>>>,
    fail_next_send: AtomicBool,
    disconnected: AtomicBool,
    fragment_size: Option<usize>,
}

impl FakeTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_fragmentation(None)
    }

    /// Creates a fake that splits every inbound delivery into fragments of
    /// at most `fragment_size` bytes, exercising reassembly.
    #[must_use]
    pub fn fragmented(fragment_size: usize) -> Self {
        Self::with_fragmentation(Some(fragment_size))
    }

    fn with_fragmentation(fragment_size: Option<usize>) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(256);
        Self {
            sent: Mutex::new(Vec::new()),
            script: Mutex::new(Script::default()),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            fail_next_send: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            fragment_size,
        }
    }

    /// Queues one verbatim reply for the next frame sent under `command`.
    pub fn queue_reply(&self, command: Command, reply: Vec<u8>) {
        lock_ignoring_poison(&self.script)
            .replies
            .entry(command.as_byte())
            .or_default()
            .push_back(reply);
    }

    /// Makes the device stay silent on `command`, disabling its auto-ack.
    pub fn stay_silent_on(&self, command: Command) {
        lock_ignoring_poison(&self.script)
            .silent
            .push(command.as_byte());
    }

    /// Fails the next `send` call with a write error.
    pub fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    /// Injects bytes into the inbound stream, as if the device spoke
    /// unprompted.
    pub async fn push_incoming(&self, bytes: Vec<u8>) {
        self.deliver(bytes).await;
    }

    /// Closes the inbound stream, as if the link dropped.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Returns every frame written so far, in order.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        lock_ignoring_poison(&self.sent).clone()
    }

    async fn deliver(&self, bytes: Vec<u8>) {
        match self.fragment_size {
            Some(size) if size > 0 => {
                for fragment in bytes.chunks(size) {
                    // A closed receiver just means the reader went away.
                    let _unread = self.incoming_tx.send(Ok(fragment.to_vec())).await;
                }
            }
            _whole => {
                let _unread = self.incoming_tx.send(Ok(bytes)).await;
            }
        }
    }

    /// The device's reply to one received frame: a scripted reply wins,
    /// silence suppresses, otherwise the protocol's standard ack.
    fn reply_for(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let fields = FrameCodec::decode(frame).ok()?;
        let opcode = fields.command_byte();

        let mut script = lock_ignoring_poison(&self.script);
        if let Some(reply) = script
            .replies
            .get_mut(&opcode)
            .and_then(VecDeque::pop_front)
        {
            return Some(reply);
        }
        if script.silent.contains(&opcode) {
            return None;
        }
        drop(script);

        let command = Command::from_byte(opcode)?;
        if command.acks_with_empty_frame() {
            return FrameCodec::encode(command, &[]).ok();
        }
        if command == Command::UploadDoing && fields.data().len() >= 2 {
            // Chunk ack echoes the two-byte frame number.
            return FrameCodec::encode(command, &fields.data()[..2]).ok();
        }
        None
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            debug!("failing a scripted write");
            return Err(TransportError::WriteFailed {
                reason: "scripted write failure".to_owned(),
            });
        }

        trace!(len = bytes.len(), "fake link accepted a write");
        lock_ignoring_poison(&self.sent).push(bytes.to_vec());

        if let Some(reply) = self.reply_for(bytes) {
            self.deliver(reply).await;
        }
        Ok(())
    }

    fn incoming(&self) -> ByteStream {
        match lock_ignoring_poison(&self.incoming_rx).take() {
            Some(receiver) => Box::pin(ReceiverStream::new(receiver)),
            None => Box::pin(tokio_stream::empty()),
        }
    }
}
