use tracing::instrument;

use crate::codec::FrameCodec;
use crate::protocol::Command;

/// Playback outcome reported by a `PlayAudio` response.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PlayResult {
    /// Playback started, 0x01.
    Success,
    /// No SD card present, 0xFF.
    SdCardNotFound,
    /// Device failed to start playback, 0x02.
    PlaybackFailed,
    /// Any other result byte, preserved for diagnostics.
    Unknown(u8),
}

impl PlayResult {
    /// Maps a result byte to its playback outcome.
    ///
    /// ```
    /// use nabi::PlayResult;
    ///
    /// assert_eq!(PlayResult::Success, PlayResult::from_byte(0x01));
    /// assert_eq!(PlayResult::SdCardNotFound, PlayResult::from_byte(0xFF));
    /// assert_eq!(PlayResult::Unknown(0x00), PlayResult::from_byte(0x00));
    /// ```
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Self::Success,
            0xFF => Self::SdCardNotFound,
            0x02 => Self::PlaybackFailed,
            other => Self::Unknown(other),
        }
    }
}

/// Typed view of one reassembled device frame.
///
/// A closed set: malformed or unrecognised frames map to the `InvalidCrc` /
/// `UnknownCommand` variants instead of an error, so one bad frame never
/// tears down the reassembly loop. Every variant keeps the raw frame bytes
/// for diagnostics.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ParsedPacket {
    /// Status snapshot response (0x02).
    StatusInfo {
        raw: Vec<u8>,
        battery: u8,
        film_status: u8,
        fan_status: u8,
        heater_status: u8,
        is_audio_playing: bool,
        volume: u8,
    },
    /// Unsolicited low-battery notice (0x21). Battery values outside
    /// 0..=100 are the consumer's problem, not the parser's.
    LowBattery { raw: Vec<u8>, battery: u8 },
    /// Empty-data acknowledgement echoing the acknowledged opcode.
    Ack { raw: Vec<u8>, command: Command },
    /// SD-card audio listing response (0x04).
    AudioList {
        raw: Vec<u8>,
        current_page: u8,
        total_pages: u8,
        file_count_in_page: u8,
        file_names: Vec<String>,
    },
    /// Playback result response (0x05).
    PlayAudioResult { raw: Vec<u8>, result: PlayResult },
    /// Per-chunk upload acknowledgement (0x12) echoing the frame number.
    UploadChunkAck { raw: Vec<u8>, frame_number: u16 },
    /// Structurally complete frame whose checksum does not match.
    InvalidCrc { raw: Vec<u8> },
    /// Unrecognised opcode, or a known opcode with the wrong data shape.
    UnknownCommand { raw: Vec<u8>, command_byte: u8 },
}

impl ParsedPacket {
    /// Returns the original frame bytes.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        match self {
            Self::StatusInfo { raw, .. }
            | Self::LowBattery { raw, .. }
            | Self::Ack { raw, .. }
            | Self::AudioList { raw, .. }
            | Self::PlayAudioResult { raw, .. }
            | Self::UploadChunkAck { raw, .. }
            | Self::InvalidCrc { raw }
            | Self::UnknownCommand { raw, .. } => raw,
        }
    }

    /// Returns the command this packet responds to, when it is a valid
    /// response to one.
    ///
    /// `LowBattery` is unsolicited and the invalid variants respond to
    /// nothing, so none of them carry a command here.
    #[must_use]
    pub fn command(&self) -> Option<Command> {
        match self {
            Self::StatusInfo { .. } => Some(Command::StatusInfo),
            Self::Ack { command, .. } => Some(*command),
            Self::AudioList { .. } => Some(Command::GetAudioList),
            Self::PlayAudioResult { .. } => Some(Command::PlayAudio),
            Self::UploadChunkAck { .. } => Some(Command::UploadDoing),
            Self::LowBattery { .. } | Self::InvalidCrc { .. } | Self::UnknownCommand { .. } => {
                None
            }
        }
    }
}

/// Decodes structurally complete frames into typed packets.
pub struct PacketParser;

impl PacketParser {
    /// Parses one reassembled frame.
    ///
    /// Total over all inputs: framing defects the reassembler cannot see
    /// (bad checksum, unknown opcode, wrong data shape) come back as the
    /// invalid variants rather than an error.
    ///
    /// ```
    /// use nabi::{Command, FrameCodec, PacketParser, ParsedPacket};
    ///
    /// let frame = FrameCodec::encode(Command::SetVolume, &[])?;
    /// let packet = PacketParser::parse(&frame);
    /// assert!(matches!(
    ///     packet,
    ///     ParsedPacket::Ack { command: Command::SetVolume, .. }
    /// ));
    /// # Ok::<(), nabi::FrameCodecError>(())
    /// ```
    #[instrument(skip(frame), level = "trace", fields(frame_len = frame.len()))]
    pub fn parse(frame: &[u8]) -> ParsedPacket {
        let raw = frame.to_vec();

        let Ok(fields) = FrameCodec::decode(frame) else {
            // The reassembler only hands over delimited frames; anything
            // that still fails field extraction is treated as unknown.
            let command_byte = frame.get(3).copied().unwrap_or_default();
            return ParsedPacket::UnknownCommand { raw, command_byte };
        };

        if !fields.crc_matches() {
            return ParsedPacket::InvalidCrc { raw };
        }

        let command_byte = fields.command_byte();
        let data = fields.data();
        let Some(command) = Command::from_byte(command_byte) else {
            return ParsedPacket::UnknownCommand { raw, command_byte };
        };

        if command.acks_with_empty_frame() {
            return if data.is_empty() {
                ParsedPacket::Ack { raw, command }
            } else {
                ParsedPacket::UnknownCommand { raw, command_byte }
            };
        }

        match command {
            Command::StatusInfo => match data {
                &[battery, film_status, fan_status, heater_status, playing, volume] => {
                    ParsedPacket::StatusInfo {
                        raw,
                        battery,
                        film_status,
                        fan_status,
                        heater_status,
                        is_audio_playing: playing == 0x01,
                        volume,
                    }
                }
                _shape => ParsedPacket::UnknownCommand { raw, command_byte },
            },
            Command::GetAudioList if data.len() > 3 => {
                let file_names = data[3..]
                    .split(|&byte| byte == b',')
                    .filter(|entry| !entry.is_empty())
                    .map(|entry| String::from_utf8_lossy(entry).into_owned())
                    .collect();
                ParsedPacket::AudioList {
                    raw,
                    current_page: data[0],
                    total_pages: data[1],
                    file_count_in_page: data[2],
                    file_names,
                }
            }
            Command::PlayAudio => match data {
                &[result] => ParsedPacket::PlayAudioResult {
                    raw,
                    result: PlayResult::from_byte(result),
                },
                _shape => ParsedPacket::UnknownCommand { raw, command_byte },
            },
            Command::UploadDoing => match data {
                &[high, low] => ParsedPacket::UploadChunkAck {
                    raw,
                    frame_number: u16::from_be_bytes([high, low]),
                },
                _shape => ParsedPacket::UnknownCommand { raw, command_byte },
            },
            Command::LowBattery => match data {
                &[battery] => ParsedPacket::LowBattery { raw, battery },
                _shape => ParsedPacket::UnknownCommand { raw, command_byte },
            },
            _wrong_shape => ParsedPacket::UnknownCommand { raw, command_byte },
        }
    }
}
