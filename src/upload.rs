use std::time::Duration;

use bon::Builder;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::client::DeviceClient;
use crate::correlator::{CorrelatorError, DEFAULT_ACK_TIMEOUT};
use crate::protocol::MAX_CHUNK_DATA;
use crate::request::{
    DeviceFilename, RequestError, UploadDoingRequest, UploadEndRequest, UploadStartRequest,
};

/// Errors returned when a file transfer cannot be completed.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The payload has no bytes to send.
    #[error("upload payload is empty")]
    EmptyPayload,
    /// The payload needs more chunks than the frame counter can number.
    #[error("upload needs {total_frames} chunks, counter holds at most {max_frames}")]
    TooManyFrames { total_frames: usize, max_frames: u16 },
    /// The device did not accept the transfer start.
    #[error("device rejected starting the upload of {filename}: {source}")]
    StartRejected {
        filename: DeviceFilename,
        source: CorrelatorError,
    },
    /// The device did not confirm one chunk; the transfer is abandoned.
    #[error("chunk {frame_number} of {total_frames} was not confirmed: {source}")]
    ChunkRejected {
        frame_number: u16,
        total_frames: u16,
        source: CorrelatorError,
    },
    /// The device confirmed a chunk other than the one in flight.
    #[error("device acknowledged chunk {actual} while chunk {expected} was in flight")]
    ChunkSequenceMismatch { expected: u16, actual: u16 },
    /// The device did not confirm the transfer end.
    #[error("device rejected finishing the upload of {filename}: {source}")]
    EndRejected {
        filename: DeviceFilename,
        source: CorrelatorError,
    },
    /// A chunk or filename failed request validation.
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// One file transfer to the device.
#[derive(Debug, Clone, Builder)]
pub struct UploadRequest {
    /// Name the file is stored under on the device.
    filename: DeviceFilename,
    /// Complete file contents, chunked for transfer by the handler.
    payload: Vec<u8>,
    /// Per-command response deadline during the transfer.
    #[builder(default = DEFAULT_ACK_TIMEOUT)]
    ack_timeout: Duration,
}

impl UploadRequest {
    #[must_use]
    pub fn filename(&self) -> &DeviceFilename {
        &self.filename
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }
}

/// Observable state of a running transfer.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum UploadProgress {
    /// No transfer running.
    #[default]
    Idle,
    /// Transfer running, with confirmed-chunk progress.
    InProgress {
        percent: u8,
        frames_sent: u16,
        total_frames: u16,
    },
}

/// Summary of one completed transfer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct UploadReceipt {
    bytes_sent: usize,
    frames_sent: u16,
}

impl UploadReceipt {
    #[must_use]
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    #[must_use]
    pub fn frames_sent(&self) -> u16 {
        self.frames_sent
    }
}

/// Restores the progress channel to `Idle` however the transfer ends.
struct IdleOnDrop<'a> {
    progress: &'a watch::Sender<UploadProgress>,
}

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.progress.send_replace(UploadProgress::Idle);
    }
}

/// Drives complete file transfers: start marker, numbered chunks, end marker,
/// each confirmed before the next goes out.
pub struct UploadHandler;

impl UploadHandler {
    /// Runs one transfer without progress reporting.
    ///
    /// # Errors
    ///
    /// Fails on an empty payload, an unnumberable chunk count, or any
    /// command the device does not confirm; a failed chunk abandons the
    /// transfer without sending the end marker.
    pub async fn upload(
        client: &DeviceClient,
        request: &UploadRequest,
    ) -> Result<UploadReceipt, UploadError> {
        let (progress, _unwatched) = watch::channel(UploadProgress::Idle);
        Self::upload_with_progress(client, request, &progress).await
    }

    /// Runs one transfer, publishing confirmed-chunk progress.
    ///
    /// The channel reads `InProgress` after each confirmed chunk and is
    /// restored to `Idle` when the transfer ends, successfully or not.
    #[instrument(
        skip_all,
        level = "debug",
        fields(filename = %request.filename(), payload_len = request.payload().len())
    )]
    pub async fn upload_with_progress(
        client: &DeviceClient,
        request: &UploadRequest,
        progress: &watch::Sender<UploadProgress>,
    ) -> Result<UploadReceipt, UploadError> {
        if request.payload().is_empty() {
            return Err(UploadError::EmptyPayload);
        }
        let chunks: Vec<&[u8]> = request.payload().chunks(MAX_CHUNK_DATA).collect();
        let total_frames =
            u16::try_from(chunks.len()).map_err(|_overflow| UploadError::TooManyFrames {
                total_frames: chunks.len(),
                max_frames: u16::MAX,
            })?;

        let _idle_guard = IdleOnDrop { progress };
        let deadline = request.ack_timeout();

        let start = UploadStartRequest {
            filename: request.filename().clone(),
            total_frames,
        };
        client
            .send_with_timeout(&start, deadline)
            .await
            .map_err(|source| UploadError::StartRejected {
                filename: request.filename().clone(),
                source,
            })?;
        debug!(total_frames, "upload opened");

        let mut bytes_sent = 0;
        for (index, chunk) in chunks.into_iter().enumerate() {
            // The chunk list length was just proven to fit in u16.
            let frame_number = index as u16;
            let doing = UploadDoingRequest::new(frame_number, chunk.to_vec())?;
            let notice = client
                .send_with_timeout(&doing, deadline)
                .await
                .map_err(|source| UploadError::ChunkRejected {
                    frame_number,
                    total_frames,
                    source,
                })?;
            if notice.frame_number() != Some(frame_number) {
                return Err(UploadError::ChunkSequenceMismatch {
                    expected: frame_number,
                    actual: notice.frame_number().unwrap_or_default(),
                });
            }

            bytes_sent += chunk.len();
            let frames_sent = frame_number + 1;
            let percent = u8::try_from(
                u32::from(frames_sent) * 100 / u32::from(total_frames),
            )
            .unwrap_or(100);
            progress.send_replace(UploadProgress::InProgress {
                percent,
                frames_sent,
                total_frames,
            });
        }

        let end = UploadEndRequest {
            filename: request.filename().clone(),
        };
        client
            .send_with_timeout(&end, deadline)
            .await
            .map_err(|source| UploadError::EndRejected {
                filename: request.filename().clone(),
                source,
            })?;
        debug!(bytes_sent, "upload finished");

        Ok(UploadReceipt {
            bytes_sent,
            frames_sent: total_frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn request_with(payload: Vec<u8>) -> UploadRequest {
        UploadRequest::builder()
            .filename(DeviceFilename::new("howl.mp3").expect("short name fits"))
            .payload(payload)
            .build()
    }

    #[test]
    fn request_defaults_the_ack_timeout() {
        let request = request_with(vec![0x01]);
        assert_eq!(DEFAULT_ACK_TIMEOUT, request.ack_timeout());
        assert_eq!("howl.mp3", request.filename().as_str());
        assert_eq!(&[0x01], request.payload());
    }

    #[test]
    fn progress_defaults_to_idle() {
        assert_eq!(UploadProgress::Idle, UploadProgress::default());
    }

    #[tokio::test]
    async fn empty_payload_is_rejected_before_any_command() {
        use std::sync::Arc;

        use crate::transport::FakeTransport;

        let transport = Arc::new(FakeTransport::new());
        let client = crate::client::DeviceClient::new(Arc::clone(&transport) as Arc<dyn crate::transport::Transport>);

        let outcome = UploadHandler::upload(&client, &request_with(Vec::new())).await;
        assert_matches!(outcome, Err(UploadError::EmptyPayload));
        assert!(transport.sent_frames().is_empty());
        client.close().await;
    }
}
