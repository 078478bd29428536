use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use derive_more::Display;
use hex::encode as hex_encode;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace, warn};

use crate::correlator::{AckCorrelator, AckNotice, CorrelatorError, DEFAULT_ACK_TIMEOUT};
use crate::packet::{PacketParser, ParsedPacket};
use crate::reassembly::{DEFAULT_MAX_BUFFERED_BYTES, FrameReassembler};
use crate::request::Request;
use crate::transport::{ByteStream, Transport};

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum LinkStopReason {
    /// The inbound stream ended cleanly.
    #[display("stream closed")]
    StreamClosed,
    /// The inbound stream yielded a transport error.
    #[display("stream error")]
    StreamError,
    /// The reassembly buffer cap tripped; the stream was unrecoverable.
    #[display("reassembly buffer overflow")]
    BufferOverflow,
    /// The client was closed.
    #[display("cancelled")]
    Cancelled,
}

/// Client tuning knobs.
#[derive(Debug, Clone, Builder)]
pub struct ClientConfig {
    /// Time to wait for a device response before giving up.
    #[builder(default = DEFAULT_ACK_TIMEOUT)]
    ack_timeout: Duration,
    /// Cap on bytes buffered during frame reassembly.
    #[builder(default = DEFAULT_MAX_BUFFERED_BYTES)]
    max_buffered_bytes: usize,
    /// Capacity of the broadcast channel carrying parsed packets.
    #[builder(default = 64)]
    event_capacity: usize,
}

impl ClientConfig {
    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    #[must_use]
    pub fn max_buffered_bytes(&self) -> usize {
        self.max_buffered_bytes
    }

    #[must_use]
    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Connected protocol client over one transport.
///
/// Owns the read loop that reassembles, parses, and dispatches every inbound
/// frame: responses resolve their in-flight command, and all packets
/// (including unsolicited notices) fan out on a broadcast channel.
pub struct DeviceClient {
    correlator: Arc<AckCorrelator>,
    events: broadcast::Sender<ParsedPacket>,
    shutdown: CancellationToken,
    reader: JoinHandle<LinkStopReason>,
}

impl DeviceClient {
    /// Starts a client with default configuration.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Starts a client, taking the transport's inbound stream and spawning
    /// the read loop.
    #[must_use]
    pub fn with_config(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let incoming = transport.incoming();
        let correlator = Arc::new(AckCorrelator::with_timeout(
            transport,
            config.ack_timeout(),
        ));
        let (events, _initial_rx) = broadcast::channel(config.event_capacity());
        let shutdown = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            incoming,
            Arc::clone(&correlator),
            events.clone(),
            shutdown.clone(),
            config.max_buffered_bytes(),
        ));

        Self {
            correlator,
            events,
            shutdown,
            reader,
        }
    }

    /// Sends one request and waits for the response that confirms it.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate in-flight opcode, a rejected write, or a device
    /// that never answers within the configured timeout.
    pub async fn send<R: Request>(&self, request: &R) -> Result<AckNotice, CorrelatorError> {
        self.correlator.send_and_wait(request).await
    }

    /// [`Self::send`] with an explicit deadline.
    pub async fn send_with_timeout<R: Request>(
        &self,
        request: &R,
        deadline: Duration,
    ) -> Result<AckNotice, CorrelatorError> {
        self.correlator
            .send_and_wait_with_timeout(request, deadline)
            .await
    }

    /// Subscribes to every parsed inbound packet.
    ///
    /// Slow subscribers miss packets once the channel laps them; the
    /// correlator is not affected.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ParsedPacket> {
        self.events.subscribe()
    }

    /// [`Self::events`] as a stream.
    #[must_use]
    pub fn event_stream(&self) -> BroadcastStream<ParsedPacket> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Stops the read loop and reports why it ended.
    pub async fn close(self) -> LinkStopReason {
        self.shutdown.cancel();
        self.reader.await.unwrap_or(LinkStopReason::Cancelled)
    }
}

#[instrument(skip_all, level = "debug")]
async fn read_loop(
    mut incoming: ByteStream,
    correlator: Arc<AckCorrelator>,
    events: broadcast::Sender<ParsedPacket>,
    shutdown: CancellationToken,
    max_buffered_bytes: usize,
) -> LinkStopReason {
    let mut reassembler = FrameReassembler::with_buffer_cap(max_buffered_bytes);

    loop {
        let chunk = tokio::select! {
            () = shutdown.cancelled() => return LinkStopReason::Cancelled,
            chunk = incoming.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(error)) => {
                warn!(%error, "inbound stream failed");
                return LinkStopReason::StreamError;
            }
            None => {
                trace!("inbound stream ended");
                return LinkStopReason::StreamClosed;
            }
        };

        let frames = match reassembler.push(&bytes) {
            Ok(frames) => frames,
            Err(error) => {
                warn!(%error, "tearing down an unrecoverable stream");
                return LinkStopReason::BufferOverflow;
            }
        };

        for frame in frames {
            trace!(frame = %hex_encode(&frame), "frame received");
            let packet = PacketParser::parse(&frame);
            if let Some(notice) = AckNotice::from_packet(&packet) {
                correlator.resolve(notice);
            }
            // No subscribers is fine; correlation already happened.
            let _unread = events.send(packet);
        }
    }
}
