use strum_macros::{Display, EnumIter};

/// Frame start sentinel.
pub const STX: u8 = 0x02;
/// Frame end sentinel.
pub const ETX: u8 = 0x03;

/// Fixed per-frame framing overhead: STX + LEN(2) + CMD + CRC16(2) + ETX.
pub const FRAME_OVERHEAD: usize = 7;
/// Largest DATA section of any frame.
pub const MAX_FRAME_DATA: usize = 2052;
/// Largest file slice carried by one `UploadDoing` frame.
pub const MAX_CHUNK_DATA: usize = 2048;
/// Fixed width of on-wire filenames (zero-padded UTF-8).
pub const FILENAME_WIDTH: usize = 64;

/// Known Nabi protocol command opcodes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, EnumIter)]
pub enum Command {
    /// Actuator control (film/fan/heater), 0x01.
    #[strum(to_string = "control")]
    Control,
    /// Device status snapshot, 0x02.
    #[strum(to_string = "status_info")]
    StatusInfo,
    /// Training-mode activation, 0x03.
    #[strum(to_string = "training_mode")]
    TrainingMode,
    /// SD-card audio listing, 0x04.
    #[strum(to_string = "get_audio_list")]
    GetAudioList,
    /// Audio playback start, 0x05.
    #[strum(to_string = "play_audio")]
    PlayAudio,
    /// Audio playback stop, 0x06.
    #[strum(to_string = "stop_audio")]
    StopAudio,
    /// Volume setting, 0x07.
    #[strum(to_string = "set_volume")]
    SetVolume,
    /// File-transfer start marker, 0x11.
    #[strum(to_string = "upload_start")]
    UploadStart,
    /// File-transfer chunk, 0x12.
    #[strum(to_string = "upload_doing")]
    UploadDoing,
    /// File-transfer end marker, 0x13.
    #[strum(to_string = "upload_end")]
    UploadEnd,
    /// Unsolicited low-battery notice, 0x21. Never acknowledged.
    #[strum(to_string = "low_battery")]
    LowBattery,
}

impl Command {
    /// Returns the one-byte opcode placed in the CMD field.
    ///
    /// ```
    /// use nabi::Command;
    ///
    /// assert_eq!(0x07, Command::SetVolume.as_byte());
    /// assert_eq!(0x21, Command::LowBattery.as_byte());
    /// ```
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Control => 0x01,
            Self::StatusInfo => 0x02,
            Self::TrainingMode => 0x03,
            Self::GetAudioList => 0x04,
            Self::PlayAudio => 0x05,
            Self::StopAudio => 0x06,
            Self::SetVolume => 0x07,
            Self::UploadStart => 0x11,
            Self::UploadDoing => 0x12,
            Self::UploadEnd => 0x13,
            Self::LowBattery => 0x21,
        }
    }

    /// Maps an opcode byte back to a known command.
    ///
    /// ```
    /// use nabi::Command;
    ///
    /// assert_eq!(Some(Command::UploadDoing), Command::from_byte(0x12));
    /// assert_eq!(None, Command::from_byte(0x42));
    /// ```
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Control),
            0x02 => Some(Self::StatusInfo),
            0x03 => Some(Self::TrainingMode),
            0x04 => Some(Self::GetAudioList),
            0x05 => Some(Self::PlayAudio),
            0x06 => Some(Self::StopAudio),
            0x07 => Some(Self::SetVolume),
            0x11 => Some(Self::UploadStart),
            0x12 => Some(Self::UploadDoing),
            0x13 => Some(Self::UploadEnd),
            0x21 => Some(Self::LowBattery),
            _ => None,
        }
    }

    /// Returns whether the device acknowledges this command with an
    /// empty-data frame echoing the opcode.
    #[must_use]
    pub(crate) const fn acks_with_empty_frame(self) -> bool {
        matches!(
            self,
            Self::Control
                | Self::TrainingMode
                | Self::StopAudio
                | Self::SetVolume
                | Self::UploadStart
                | Self::UploadEnd
        )
    }
}

/// Actuator addressed by a `Control` frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum ControlTarget {
    /// Combined film + fan control, 0x00.
    #[strum(to_string = "film_and_fan")]
    FilmAndFan,
    /// Film actuator, 0x01.
    #[strum(to_string = "film")]
    Film,
    /// Fan actuator, 0x02.
    #[strum(to_string = "fan")]
    Fan,
    /// Heater actuator, 0x03.
    #[strum(to_string = "heater")]
    Heater,
}

impl ControlTarget {
    /// Returns the target sub-code byte.
    ///
    /// ```
    /// use nabi::ControlTarget;
    ///
    /// assert_eq!(0x00, ControlTarget::FilmAndFan.as_byte());
    /// assert_eq!(0x03, ControlTarget::Heater.as_byte());
    /// ```
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::FilmAndFan => 0x00,
            Self::Film => 0x01,
            Self::Fan => 0x02,
            Self::Heater => 0x03,
        }
    }
}

/// Training program selected by a `TrainingMode` frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum TrainingMode {
    /// Slow training program, mode byte 1.
    #[strum(to_string = "slow")]
    Slow,
    /// Randomised training program, mode byte 2.
    #[strum(to_string = "random")]
    Random,
}

impl TrainingMode {
    /// Returns the mode byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Slow => 1,
            Self::Random => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn opcode_mapping_round_trips_for_every_command() {
        for command in Command::iter() {
            assert_eq!(Some(command), Command::from_byte(command.as_byte()));
        }
    }

    #[test]
    fn unsolicited_and_response_commands_do_not_ack_with_empty_frames() {
        assert!(!Command::StatusInfo.acks_with_empty_frame());
        assert!(!Command::GetAudioList.acks_with_empty_frame());
        assert!(!Command::PlayAudio.acks_with_empty_frame());
        assert!(!Command::UploadDoing.acks_with_empty_frame());
        assert!(!Command::LowBattery.acks_with_empty_frame());
    }

    #[test]
    fn command_display_uses_wire_names() {
        assert_eq!("set_volume", Command::SetVolume.to_string());
        assert_eq!("upload_doing", Command::UploadDoing.to_string());
    }
}
