//! Protocol client for the Nabi training accessory.
//!
//! Speaks the device's framed serial protocol over any byte [`Transport`]:
//! frames are delimited with STX/ETX sentinels, length-prefixed, and
//! integrity-checked with a Modbus CRC16. The crate reassembles the inbound
//! byte stream into frames, parses them into typed packets, correlates
//! responses with their in-flight commands, and drives chunked file
//! transfers end to end.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nabi::{DeviceClient, SetVolumeRequest, Transport, Volume};
//!
//! async fn set_volume(transport: Arc<dyn Transport>) -> Result<(), nabi::ProtocolError> {
//!     let client = DeviceClient::new(transport);
//!     let request = SetVolumeRequest {
//!         volume: Volume::new(7)?,
//!     };
//!     client.send(&request).await?;
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod correlator;
pub mod crc;
pub mod error;
pub mod packet;
pub mod protocol;
pub mod reassembly;
pub mod request;
pub mod transport;
pub mod upload;

pub use client::{ClientConfig, DeviceClient, LinkStopReason};
pub use codec::{FrameCodec, FrameCodecError, RawFrame};
pub use correlator::{AckCorrelator, AckNotice, CorrelatorError, DEFAULT_ACK_TIMEOUT};
pub use crc::crc16;
pub use error::ProtocolError;
pub use packet::{PacketParser, ParsedPacket, PlayResult};
pub use protocol::{
    Command, ControlTarget, ETX, FILENAME_WIDTH, FRAME_OVERHEAD, MAX_CHUNK_DATA, MAX_FRAME_DATA,
    STX, TrainingMode,
};
pub use reassembly::{DEFAULT_MAX_BUFFERED_BYTES, FrameReassembler, ReassemblyError};
pub use request::{
    AudioPage, ControlRequest, DeviceFilename, GetAudioListRequest, PlayAudioRequest, Request,
    RequestError, SetVolumeRequest, StatusInfoRequest, StopAudioRequest, TrainingModeRequest,
    TrainingSeconds, UploadDoingRequest, UploadEndRequest, UploadStartRequest, Volume,
};
pub use transport::{ByteStream, FakeTransport, Transport, TransportError};
pub use upload::{UploadError, UploadHandler, UploadProgress, UploadReceipt, UploadRequest};
