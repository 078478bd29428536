use derive_more::From;
use thiserror::Error;

use crate::codec::FrameCodecError;
use crate::correlator::CorrelatorError;
use crate::reassembly::ReassemblyError;
use crate::request::RequestError;
use crate::transport::TransportError;
use crate::upload::UploadError;

/// Any error this crate can produce, for callers that want one type at the
/// top of their call chain. Variants are boxed to keep the aggregate small.
#[derive(Debug, Error, From)]
pub enum ProtocolError {
    #[error(transparent)]
    #[from(FrameCodecError, Box<FrameCodecError>)]
    Codec(Box<FrameCodecError>),

    #[error(transparent)]
    #[from(ReassemblyError, Box<ReassemblyError>)]
    Reassembly(Box<ReassemblyError>),

    #[error(transparent)]
    #[from(RequestError, Box<RequestError>)]
    Request(Box<RequestError>),

    #[error(transparent)]
    #[from(TransportError, Box<TransportError>)]
    Transport(Box<TransportError>),

    #[error(transparent)]
    #[from(CorrelatorError, Box<CorrelatorError>)]
    Correlator(Box<CorrelatorError>),

    #[error(transparent)]
    #[from(UploadError, Box<UploadError>)]
    Upload(Box<UploadError>),
}
