use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hex::encode as hex_encode;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

use crate::codec::FrameCodecError;
use crate::packet::ParsedPacket;
use crate::protocol::Command;
use crate::request::Request;
use crate::transport::{Transport, TransportError};

/// Default time to wait for a device response before giving up.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// A device response that resolves one in-flight command.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AckNotice {
    command: Command,
    frame_number: Option<u16>,
}

impl AckNotice {
    /// Extracts the resolution a packet carries, if it is a response.
    ///
    /// Every valid response resolves the command it answers; unsolicited
    /// and invalid packets resolve nothing.
    #[must_use]
    pub fn from_packet(packet: &ParsedPacket) -> Option<Self> {
        let command = packet.command()?;
        let frame_number = match packet {
            ParsedPacket::UploadChunkAck { frame_number, .. } => Some(*frame_number),
            _other => None,
        };
        Some(Self {
            command,
            frame_number,
        })
    }

    /// The command this notice resolves.
    #[must_use]
    pub fn command(&self) -> Command {
        self.command
    }

    /// The echoed chunk number, present only for chunk acks.
    #[must_use]
    pub fn frame_number(&self) -> Option<u16> {
        self.frame_number
    }
}

/// Errors returned when a command cannot be confirmed.
#[derive(Debug, Error)]
pub enum CorrelatorError {
    /// A command of the same opcode is already awaiting its response.
    #[error("a {command} command is already in flight")]
    DuplicateInFlight { command: Command },
    /// The transport rejected the write; nothing is in flight.
    #[error("sending {command} failed: {source}")]
    SendFailed {
        command: Command,
        source: TransportError,
    },
    /// No response arrived within the deadline.
    #[error("no response to {command} within {timeout_ms}ms")]
    AckTimeout { command: Command, timeout_ms: u128 },
    /// The read loop dropped the waiter, the link is gone.
    #[error("link closed while awaiting a response to {command}")]
    WaiterDropped { command: Command },
    /// A response arrived but resolved a different command. Points at a
    /// pending-map bookkeeping bug, not a device fault.
    #[error("response mismatch: sent {requested}, resolved {actual}")]
    AckMismatch { requested: Command, actual: Command },
    /// The request could not be encoded.
    #[error(transparent)]
    Codec(#[from] FrameCodecError),
}

struct PendingWaiter {
    id: u64,
    tx: oneshot::Sender<AckNotice>,
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a waiter on drop, but only if it is still the same registration.
///
/// The identity check keeps a timed-out waiter from evicting a successor
/// that reused the opcode slot.
struct RemoveOnDrop<'a> {
    pending: &'a Mutex<HashMap<Command, PendingWaiter>>,
    command: Command,
    id: u64,
}

impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        let mut pending = lock_ignoring_poison(self.pending);
        if pending.get(&self.command).is_some_and(|w| w.id == self.id) {
            pending.remove(&self.command);
        }
    }
}

/// Pairs outgoing commands with the device responses that confirm them.
///
/// At most one command per opcode may be in flight; a duplicate fails before
/// any bytes reach the link. Writes are serialised so registration and
/// transmission are atomic with respect to other senders, which rules out a
/// response racing its own registration.
pub struct AckCorrelator {
    transport: Arc<dyn Transport>,
    send_lock: tokio::sync::Mutex<()>,
    pending: Mutex<HashMap<Command, PendingWaiter>>,
    next_waiter_id: AtomicU64,
    ack_timeout: Duration,
}

impl AckCorrelator {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_timeout(transport, DEFAULT_ACK_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(transport: Arc<dyn Transport>, ack_timeout: Duration) -> Self {
        Self {
            transport,
            send_lock: tokio::sync::Mutex::new(()),
            pending: Mutex::new(HashMap::new()),
            next_waiter_id: AtomicU64::new(0),
            ack_timeout,
        }
    }

    /// Sends one request and waits for the response that resolves it.
    ///
    /// # Errors
    ///
    /// Fails fast on a duplicate in-flight opcode or a rejected write, and
    /// with a timeout when the device never answers.
    pub async fn send_and_wait<R: Request>(
        &self,
        request: &R,
    ) -> Result<AckNotice, CorrelatorError> {
        self.send_and_wait_with_timeout(request, self.ack_timeout)
            .await
    }

    /// [`Self::send_and_wait`] with an explicit deadline.
    #[instrument(skip(self, request), level = "debug", fields(command = %request.command()))]
    pub async fn send_and_wait_with_timeout<R: Request>(
        &self,
        request: &R,
        deadline: Duration,
    ) -> Result<AckNotice, CorrelatorError> {
        let command = request.command();
        let frame = request.to_frame()?;

        // The permit covers registration and transmission only, so two
        // senders cannot interleave, but waiting happens unlocked.
        let write_permit = self.send_lock.lock().await;
        trace!(frame = %hex_encode(&frame), "sending frame");

        let (tx, rx) = oneshot::channel();
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = lock_ignoring_poison(&self.pending);
            if pending.contains_key(&command) {
                return Err(CorrelatorError::DuplicateInFlight { command });
            }
            pending.insert(command, PendingWaiter { id, tx });
        }
        let guard = RemoveOnDrop {
            pending: &self.pending,
            command,
            id,
        };

        if let Err(source) = self.transport.send(&frame).await {
            return Err(CorrelatorError::SendFailed { command, source });
        }
        drop(write_permit);

        let notice = match timeout(deadline, rx).await {
            Ok(Ok(notice)) => notice,
            Ok(Err(_closed)) => return Err(CorrelatorError::WaiterDropped { command }),
            Err(_elapsed) => {
                debug!("response deadline elapsed");
                return Err(CorrelatorError::AckTimeout {
                    command,
                    timeout_ms: deadline.as_millis(),
                });
            }
        };
        drop(guard);

        if notice.command() != command {
            return Err(CorrelatorError::AckMismatch {
                requested: command,
                actual: notice.command(),
            });
        }
        Ok(notice)
    }

    /// Hands a response to its waiter. Returns whether a waiter was resolved;
    /// a `false` means the response was unsolicited or arrived late.
    pub fn resolve(&self, notice: AckNotice) -> bool {
        let waiter = lock_ignoring_poison(&self.pending).remove(&notice.command());
        match waiter {
            Some(waiter) => {
                // A closed receiver lost the race with its own timeout.
                let _late = waiter.tx.send(notice);
                true
            }
            None => {
                trace!(command = %notice.command(), "response with no waiter");
                false
            }
        }
    }

    /// Returns whether a command is currently awaiting its response.
    #[must_use]
    pub fn is_pending(&self, command: Command) -> bool {
        lock_ignoring_poison(&self.pending).contains_key(&command)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::codec::FrameCodec;
    use crate::packet::PacketParser;
    use crate::request::{SetVolumeRequest, StatusInfoRequest, StopAudioRequest, Volume};
    use crate::transport::FakeTransport;

    fn correlator_over(transport: Arc<FakeTransport>) -> AckCorrelator {
        AckCorrelator::with_timeout(transport, Duration::from_millis(200))
    }

    /// Pumps the fake's inbound bytes into the correlator until it drains.
    async fn pump(transport: &FakeTransport, correlator: &AckCorrelator) {
        use tokio_stream::StreamExt;

        let mut incoming = transport.incoming();
        while let Ok(Some(Ok(bytes))) =
            tokio::time::timeout(Duration::from_millis(50), incoming.next()).await
        {
            let packet = PacketParser::parse(&bytes);
            if let Some(notice) = AckNotice::from_packet(&packet) {
                correlator.resolve(notice);
            }
        }
    }

    #[tokio::test]
    async fn resolved_command_returns_its_notice() {
        let transport = Arc::new(FakeTransport::new());
        let correlator = correlator_over(Arc::clone(&transport));

        let request = SetVolumeRequest {
            volume: Volume::new(3).expect("in range"),
        };
        let (outcome, ()) = tokio::join!(
            correlator.send_and_wait(&request),
            pump(&transport, &correlator),
        );

        let notice = outcome.expect("auto-acked command resolves");
        assert_eq!(Command::SetVolume, notice.command());
        assert_eq!(None, notice.frame_number());
        assert!(!correlator.is_pending(Command::SetVolume));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_command_times_out_and_frees_its_slot() {
        let transport = Arc::new(FakeTransport::new());
        transport.stay_silent_on(Command::StopAudio);
        let correlator = correlator_over(Arc::clone(&transport));

        let outcome = correlator.send_and_wait(&StopAudioRequest).await;
        assert_matches!(
            outcome,
            Err(CorrelatorError::AckTimeout {
                command: Command::StopAudio,
                timeout_ms: 200,
            })
        );
        assert!(!correlator.is_pending(Command::StopAudio));
        assert_eq!(1, transport.sent_frames().len());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_in_flight_fails_before_the_link_sees_bytes() {
        let transport = Arc::new(FakeTransport::new());
        transport.stay_silent_on(Command::StatusInfo);
        let correlator = Arc::new(correlator_over(Arc::clone(&transport)));

        let first = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move { correlator.send_and_wait(&StatusInfoRequest).await })
        };
        tokio::task::yield_now().await;
        assert!(correlator.is_pending(Command::StatusInfo));

        let duplicate = correlator.send_and_wait(&StatusInfoRequest).await;
        assert_matches!(
            duplicate,
            Err(CorrelatorError::DuplicateInFlight {
                command: Command::StatusInfo,
            })
        );
        assert_eq!(1, transport.sent_frames().len());

        assert_matches!(
            first.await.expect("task completes"),
            Err(CorrelatorError::AckTimeout { .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn opcode_slot_is_reusable_after_a_timeout() {
        let transport = Arc::new(FakeTransport::new());
        transport.stay_silent_on(Command::StopAudio);
        let correlator = correlator_over(Arc::clone(&transport));

        let first = correlator.send_and_wait(&StopAudioRequest).await;
        assert_matches!(first, Err(CorrelatorError::AckTimeout { .. }));

        // Second attempt registers cleanly, and a resolution reaches it.
        let (outcome, resolved) = tokio::join!(
            correlator.send_and_wait(&StopAudioRequest),
            async {
                tokio::task::yield_now().await;
                correlator.resolve(AckNotice {
                    command: Command::StopAudio,
                    frame_number: None,
                })
            },
        );
        assert!(resolved);
        assert_eq!(
            Command::StopAudio,
            outcome.expect("retry resolves").command()
        );
    }

    #[tokio::test]
    async fn rejected_write_leaves_nothing_pending() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next_send();
        let correlator = correlator_over(Arc::clone(&transport));

        let outcome = correlator.send_and_wait(&StopAudioRequest).await;
        assert_matches!(
            outcome,
            Err(CorrelatorError::SendFailed {
                command: Command::StopAudio,
                source: TransportError::WriteFailed { .. },
            })
        );
        assert!(!correlator.is_pending(Command::StopAudio));
    }

    #[tokio::test]
    async fn unsolicited_responses_resolve_nobody() {
        let transport = Arc::new(FakeTransport::new());
        let correlator = correlator_over(transport);

        let frame =
            FrameCodec::encode(Command::SetVolume, &[]).expect("ack frame should encode");
        let packet = PacketParser::parse(&frame);
        let notice = AckNotice::from_packet(&packet).expect("acks carry a notice");
        assert!(!correlator.resolve(notice));
    }

    #[test]
    fn low_battery_and_invalid_packets_carry_no_notice() {
        let low_battery = FrameCodec::encode(Command::LowBattery, &[9])
            .expect("notice frame should encode");
        assert_eq!(
            None,
            AckNotice::from_packet(&PacketParser::parse(&low_battery))
        );

        let mut corrupted =
            FrameCodec::encode(Command::SetVolume, &[]).expect("ack frame should encode");
        corrupted[3] ^= 0x80;
        assert_eq!(
            None,
            AckNotice::from_packet(&PacketParser::parse(&corrupted))
        );
    }
}
