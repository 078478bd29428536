use std::fmt;

use thiserror::Error;

use crate::codec::{FrameCodec, FrameCodecError};
use crate::protocol::{Command, ControlTarget, FILENAME_WIDTH, MAX_CHUNK_DATA, TrainingMode};

/// Errors returned when constructing a request with out-of-range fields.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum RequestError {
    /// Volume outside the device's 0..=10 scale.
    #[error("volume {value} is out of range, device accepts 0..=10")]
    InvalidVolume { value: u8 },
    /// Audio list page outside 1..=255.
    #[error("audio list page {value} is out of range, device accepts 1..=255")]
    InvalidPage { value: u8 },
    /// Training duration outside 0..=100 seconds.
    #[error("training duration {value}s is out of range, device accepts 0..=100")]
    InvalidTrainingSeconds { value: u8 },
    /// Filename wider than its fixed on-wire field.
    #[error("filename is {actual} bytes, on-wire field holds at most {max}")]
    FilenameTooLong { actual: usize, max: usize },
    /// Upload chunk with no bytes in it.
    #[error("upload chunk carries no data")]
    EmptyChunk,
    /// Upload chunk larger than one frame allows.
    #[error("upload chunk is {actual} bytes, frame carries at most {max}")]
    ChunkTooLarge { actual: usize, max: usize },
}

/// Volume level on the device's 0..=10 scale.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Volume(u8);

impl Volume {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 10;

    /// Validates a raw volume level.
    ///
    /// # Errors
    ///
    /// Returns an error when `value` exceeds 10.
    ///
    /// ```
    /// use nabi::Volume;
    ///
    /// assert_eq!(7, Volume::new(7)?.level());
    /// assert!(Volume::new(11).is_err());
    /// # Ok::<(), nabi::RequestError>(())
    /// ```
    pub fn new(value: u8) -> Result<Self, RequestError> {
        if value > Self::MAX {
            return Err(RequestError::InvalidVolume { value });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }
}

/// One-based page index into the SD-card audio listing.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AudioPage(u8);

impl AudioPage {
    /// Validates a page index.
    ///
    /// # Errors
    ///
    /// Returns an error for page 0, the listing is one-based.
    pub fn new(value: u8) -> Result<Self, RequestError> {
        if value == 0 {
            return Err(RequestError::InvalidPage { value });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl Default for AudioPage {
    fn default() -> Self {
        Self(1)
    }
}

/// Training program duration in seconds.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TrainingSeconds(u8);

impl TrainingSeconds {
    pub const MAX: u8 = 100;
    pub const DEFAULT: u8 = 50;

    /// Validates a training duration.
    ///
    /// # Errors
    ///
    /// Returns an error when `value` exceeds 100 seconds.
    pub fn new(value: u8) -> Result<Self, RequestError> {
        if value > Self::MAX {
            return Err(RequestError::InvalidTrainingSeconds { value });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub const fn seconds(self) -> u8 {
        self.0
    }
}

impl Default for TrainingSeconds {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// Filename as stored on the device, at most 64 UTF-8 bytes.
///
/// Encodes to a fixed-width zero-padded field on the wire.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceFilename {
    name: String,
}

impl DeviceFilename {
    /// Validates a filename against the fixed on-wire field width.
    ///
    /// # Errors
    ///
    /// Returns an error when the name exceeds 64 bytes of UTF-8.
    ///
    /// ```
    /// use nabi::DeviceFilename;
    ///
    /// let name = DeviceFilename::new("bark.mp3")?;
    /// assert_eq!("bark.mp3", name.as_str());
    /// assert!(DeviceFilename::new("x".repeat(65)).is_err());
    /// # Ok::<(), nabi::RequestError>(())
    /// ```
    pub fn new(name: impl Into<String>) -> Result<Self, RequestError> {
        let name = name.into();
        if name.len() > FILENAME_WIDTH {
            return Err(RequestError::FilenameTooLong {
                actual: name.len(),
                max: FILENAME_WIDTH,
            });
        }
        Ok(Self { name })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Encodes the name into its fixed-width zero-padded wire field.
    #[must_use]
    pub fn to_wire_field(&self) -> [u8; FILENAME_WIDTH] {
        let mut field = [0u8; FILENAME_WIDTH];
        field[..self.name.len()].copy_from_slice(self.name.as_bytes());
        field
    }
}

impl fmt::Display for DeviceFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One encodable device command.
///
/// Each request type pairs an opcode with its validated DATA layout;
/// [`Request::to_frame`] is the single seam between typed requests and the
/// wire codec.
pub trait Request {
    /// The opcode this request is sent under.
    fn command(&self) -> Command;

    /// The DATA section bytes.
    fn data(&self) -> Vec<u8>;

    /// Encodes the complete wire frame.
    ///
    /// # Errors
    ///
    /// Returns an error when the DATA section exceeds the frame bound,
    /// which validated request types rule out by construction.
    fn to_frame(&self) -> Result<Vec<u8>, FrameCodecError> {
        FrameCodec::encode(self.command(), &self.data())
    }
}

/// Drives one actuator to a raw intensity value.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ControlRequest {
    pub target: ControlTarget,
    pub value: u8,
}

impl Request for ControlRequest {
    fn command(&self) -> Command {
        Command::Control
    }

    fn data(&self) -> Vec<u8> {
        vec![self.target.as_byte(), self.value]
    }
}

/// Requests a full device status snapshot.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct StatusInfoRequest;

impl Request for StatusInfoRequest {
    fn command(&self) -> Command {
        Command::StatusInfo
    }

    fn data(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Starts a training program for a bounded duration.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TrainingModeRequest {
    pub mode: TrainingMode,
    pub duration: TrainingSeconds,
}

impl Request for TrainingModeRequest {
    fn command(&self) -> Command {
        Command::TrainingMode
    }

    fn data(&self) -> Vec<u8> {
        vec![self.mode.as_byte(), self.duration.seconds()]
    }
}

/// Requests one page of the SD-card audio listing.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct GetAudioListRequest {
    pub page: AudioPage,
}

impl Request for GetAudioListRequest {
    fn command(&self) -> Command {
        Command::GetAudioList
    }

    fn data(&self) -> Vec<u8> {
        vec![self.page.index()]
    }
}

/// Starts playback of one stored file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PlayAudioRequest {
    pub filename: DeviceFilename,
}

impl Request for PlayAudioRequest {
    fn command(&self) -> Command {
        Command::PlayAudio
    }

    fn data(&self) -> Vec<u8> {
        self.filename.to_wire_field().to_vec()
    }
}

/// Stops the current playback.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct StopAudioRequest;

impl Request for StopAudioRequest {
    fn command(&self) -> Command {
        Command::StopAudio
    }

    fn data(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Sets the playback volume.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SetVolumeRequest {
    pub volume: Volume,
}

impl Request for SetVolumeRequest {
    fn command(&self) -> Command {
        Command::SetVolume
    }

    fn data(&self) -> Vec<u8> {
        vec![self.volume.level()]
    }
}

/// Opens a file transfer: target filename plus the chunk count to expect.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UploadStartRequest {
    pub filename: DeviceFilename,
    pub total_frames: u16,
}

impl Request for UploadStartRequest {
    fn command(&self) -> Command {
        Command::UploadStart
    }

    fn data(&self) -> Vec<u8> {
        let mut data = self.filename.to_wire_field().to_vec();
        data.extend_from_slice(&self.total_frames.to_be_bytes());
        data
    }
}

/// Carries one numbered file chunk.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UploadDoingRequest {
    frame_number: u16,
    chunk: Vec<u8>,
}

impl UploadDoingRequest {
    /// Validates one chunk payload.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty chunk or one over 2048 bytes.
    pub fn new(frame_number: u16, chunk: Vec<u8>) -> Result<Self, RequestError> {
        if chunk.is_empty() {
            return Err(RequestError::EmptyChunk);
        }
        if chunk.len() > MAX_CHUNK_DATA {
            return Err(RequestError::ChunkTooLarge {
                actual: chunk.len(),
                max: MAX_CHUNK_DATA,
            });
        }
        Ok(Self {
            frame_number,
            chunk,
        })
    }

    #[must_use]
    pub fn frame_number(&self) -> u16 {
        self.frame_number
    }
}

impl Request for UploadDoingRequest {
    fn command(&self) -> Command {
        Command::UploadDoing
    }

    fn data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(2 + self.chunk.len());
        data.extend_from_slice(&self.frame_number.to_be_bytes());
        data.extend_from_slice(&self.chunk);
        data
    }
}

/// Closes the file transfer named by `filename`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UploadEndRequest {
    pub filename: DeviceFilename,
}

impl Request for UploadEndRequest {
    fn command(&self) -> Command {
        Command::UploadEnd
    }

    fn data(&self) -> Vec<u8> {
        self.filename.to_wire_field().to_vec()
    }
}
