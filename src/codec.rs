use thiserror::Error;

use crate::crc::crc16;
use crate::protocol::{Command, ETX, FRAME_OVERHEAD, MAX_FRAME_DATA, STX};

/// Errors returned by frame encoding and decoding.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FrameCodecError {
    /// The DATA section is too large to fit a legal frame.
    #[error("frame data is too large: {data_len} bytes exceeds max {max_data_len}")]
    DataTooLarge { data_len: usize, max_data_len: usize },
    /// The frame has fewer than the mandatory 7 framing bytes.
    #[error("frame is too short: expected at least {FRAME_OVERHEAD} bytes, got {actual}")]
    FrameTooShort { actual: usize },
    /// The declared DATA length does not match the provided slice length.
    #[error("frame length mismatch: LEN declares {declared} data bytes but frame has {actual} bytes total")]
    LengthMismatch { declared: usize, actual: usize },
    /// The first byte is not the STX sentinel.
    #[error("frame does not start with STX: got 0x{byte:02X}")]
    MissingStx { byte: u8 },
    /// The last byte is not the ETX sentinel.
    #[error("frame does not end with ETX: got 0x{byte:02X}")]
    MissingEtx { byte: u8 },
}

/// Borrowed field view over one structurally complete frame.
///
/// Produced by [`FrameCodec::decode`]; boundary search and trailer checks are
/// the reassembler's job, this type only splits a delimited slice into its
/// CMD/DATA/CRC fields.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RawFrame<'a> {
    // CMD byte followed by the DATA section, the exact CRC input.
    cmd_and_data: &'a [u8],
    declared_crc: u16,
}

impl RawFrame<'_> {
    /// Returns the CMD opcode byte.
    ///
    /// ```
    /// use nabi::{Command, FrameCodec};
    ///
    /// let frame = FrameCodec::encode(Command::SetVolume, &[0x07])?;
    /// assert_eq!(0x07, FrameCodec::decode(&frame)?.command_byte());
    /// # Ok::<(), nabi::FrameCodecError>(())
    /// ```
    #[must_use]
    pub fn command_byte(&self) -> u8 {
        self.cmd_and_data[0]
    }

    /// Returns the DATA section.
    ///
    /// ```
    /// use nabi::{Command, FrameCodec};
    ///
    /// let frame = FrameCodec::encode(Command::SetVolume, &[0x07])?;
    /// assert_eq!(&[0x07], FrameCodec::decode(&frame)?.data());
    /// # Ok::<(), nabi::FrameCodecError>(())
    /// ```
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.cmd_and_data[1..]
    }

    /// Returns the CRC16 embedded in the frame trailer.
    #[must_use]
    pub fn declared_crc(&self) -> u16 {
        self.declared_crc
    }

    /// Recomputes the checksum over `CMD || DATA` and compares it to the
    /// embedded one.
    #[must_use]
    pub fn crc_matches(&self) -> bool {
        crc16(self.cmd_and_data) == self.declared_crc
    }
}

/// Encodes and decodes Nabi wire frames.
///
/// Layout: `STX | LEN u16 BE | CMD | DATA | CRC16 u16 BE | ETX`, with the
/// CRC computed over `CMD || DATA` only.
pub struct FrameCodec;

impl FrameCodec {
    /// Encodes one command frame.
    ///
    /// # Errors
    ///
    /// Returns an error when `data` exceeds the 2052-byte frame bound.
    /// Command-specific payload bounds are enforced earlier, at request
    /// construction.
    ///
    /// ```
    /// use nabi::{Command, FrameCodec};
    ///
    /// let frame = FrameCodec::encode(Command::SetVolume, &[0x07])?;
    /// assert_eq!(vec![0x02, 0x00, 0x01, 0x07, 0x07, 0x42, 0x42, 0x03], frame);
    /// # Ok::<(), nabi::FrameCodecError>(())
    /// ```
    pub fn encode(command: Command, data: &[u8]) -> Result<Vec<u8>, FrameCodecError> {
        if data.len() > MAX_FRAME_DATA {
            return Err(FrameCodecError::DataTooLarge {
                data_len: data.len(),
                max_data_len: MAX_FRAME_DATA,
            });
        }

        let data_len = u16::try_from(data.len()).map_err(|_overflow| {
            FrameCodecError::DataTooLarge {
                data_len: data.len(),
                max_data_len: MAX_FRAME_DATA,
            }
        })?;

        let mut cmd_and_data = Vec::with_capacity(1 + data.len());
        cmd_and_data.push(command.as_byte());
        cmd_and_data.extend_from_slice(data);
        let crc = crc16(&cmd_and_data);

        let mut frame = Vec::with_capacity(FRAME_OVERHEAD + data.len());
        frame.push(STX);
        frame.extend_from_slice(&data_len.to_be_bytes());
        frame.extend_from_slice(&cmd_and_data);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame.push(ETX);
        Ok(frame)
    }

    /// Splits an already-delimited frame into its fields.
    ///
    /// # Errors
    ///
    /// Returns an error when the slice is shorter than the framing overhead,
    /// its sentinels are wrong, or LEN disagrees with the slice length.
    ///
    /// ```
    /// use nabi::{Command, FrameCodec};
    ///
    /// let frame = FrameCodec::encode(Command::StopAudio, &[])?;
    /// let raw = FrameCodec::decode(&frame)?;
    /// assert_eq!(0x06, raw.command_byte());
    /// assert!(raw.data().is_empty());
    /// assert!(raw.crc_matches());
    /// # Ok::<(), nabi::FrameCodecError>(())
    /// ```
    pub fn decode(frame: &[u8]) -> Result<RawFrame<'_>, FrameCodecError> {
        if frame.len() < FRAME_OVERHEAD {
            return Err(FrameCodecError::FrameTooShort {
                actual: frame.len(),
            });
        }
        if frame[0] != STX {
            return Err(FrameCodecError::MissingStx { byte: frame[0] });
        }
        let last = frame[frame.len() - 1];
        if last != ETX {
            return Err(FrameCodecError::MissingEtx { byte: last });
        }

        let declared = usize::from(u16::from_be_bytes([frame[1], frame[2]]));
        if frame.len() != FRAME_OVERHEAD + declared {
            return Err(FrameCodecError::LengthMismatch {
                declared,
                actual: frame.len(),
            });
        }

        let crc_offset = 3 + 1 + declared;
        let declared_crc = u16::from_be_bytes([frame[crc_offset], frame[crc_offset + 1]]);
        Ok(RawFrame {
            cmd_and_data: &frame[3..crc_offset],
            declared_crc,
        })
    }
}
