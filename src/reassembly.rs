use thiserror::Error;
use tracing::trace;

use crate::protocol::{ETX, FRAME_OVERHEAD, STX};

/// Default cap on bytes buffered without extracting a complete frame.
///
/// Any legal frame is at most 2059 bytes, so the cap only trips on noise or
/// a bogus LEN field that would otherwise grow the accumulator forever.
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 64 * 1024;

/// Errors returned by the stream reassembler.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ReassemblyError {
    /// The accumulator exceeded its cap without yielding a frame.
    #[error("reassembly buffer holds {buffered} bytes without a complete frame, cap is {max_buffered}")]
    BufferOverflow { buffered: usize, max_buffered: usize },
}

/// Reassembles delimited frames out of an arbitrarily fragmented byte stream.
///
/// Incoming chunks are appended to an accumulator; complete frames are found
/// by locating an STX, reading the big-endian LEN, waiting for the full
/// `7 + LEN` bytes, and checking the trailing ETX. Bytes preceding an
/// extracted frame are treated as link noise and dropped with it. An STX
/// whose candidate slice lacks the ETX trailer is discarded one byte at a
/// time so scanning can never loop on false frame starts.
#[derive(Debug)]
pub struct FrameReassembler {
    buffer: Vec<u8>,
    max_buffered: usize,
}

impl FrameReassembler {
    /// Creates a reassembler with the default buffering cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer_cap(DEFAULT_MAX_BUFFERED_BYTES)
    }

    /// Creates a reassembler with an explicit buffering cap.
    ///
    /// ```
    /// use nabi::FrameReassembler;
    ///
    /// let reassembler = FrameReassembler::with_buffer_cap(4096);
    /// assert_eq!(0, reassembler.buffered_len());
    /// ```
    #[must_use]
    pub fn with_buffer_cap(max_buffered: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_buffered,
        }
    }

    /// Returns how many bytes are currently buffered.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Appends one inbound chunk and drains every complete frame it enables.
    ///
    /// # Errors
    ///
    /// Returns an error when the accumulator exceeds the buffering cap with
    /// no complete frame available; the connection should be torn down, the
    /// stream is beyond resynchronisation at that point.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, ReassemblyError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.extract_frame() {
            trace!(
                frame_len = frame.len(),
                buffered = self.buffer.len(),
                "reassembled one frame"
            );
            frames.push(frame);
        }

        // Leading bytes below an STX can never start a frame.
        if let Some(stx) = self.buffer.iter().position(|&byte| byte == STX) {
            self.buffer.drain(..stx);
        } else {
            self.buffer.clear();
        }

        if self.buffer.len() > self.max_buffered {
            return Err(ReassemblyError::BufferOverflow {
                buffered: self.buffer.len(),
                max_buffered: self.max_buffered,
            });
        }

        Ok(frames)
    }

    /// Attempts to cut one complete frame off the front of the accumulator.
    fn extract_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let stx = self.buffer.iter().position(|&byte| byte == STX)?;

            // LEN needs two bytes after the STX.
            if self.buffer.len() < stx + 3 {
                return None;
            }

            let data_len =
                usize::from(u16::from_be_bytes([self.buffer[stx + 1], self.buffer[stx + 2]]));
            let total_len = FRAME_OVERHEAD + data_len;
            if self.buffer.len() < stx + total_len {
                return None;
            }

            if self.buffer[stx + total_len - 1] == ETX {
                let frame = self.buffer[stx..stx + total_len].to_vec();
                self.buffer.drain(..stx + total_len);
                return Some(frame);
            }

            // False frame start: drop the STX byte itself and rescan.
            trace!(position = stx, candidate_len = total_len, "discarding false STX");
            self.buffer.drain(..=stx);
        }
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::codec::FrameCodec;
    use crate::protocol::Command;

    fn status_frame() -> Vec<u8> {
        FrameCodec::encode(Command::StatusInfo, &[50, 10, 0, 0, 1, 5])
            .expect("status frame should encode")
    }

    #[test]
    fn whole_frame_in_one_chunk_is_emitted_once() {
        let frame = status_frame();
        let mut reassembler = FrameReassembler::new();
        let frames = reassembler.push(&frame).expect("push should stay under cap");
        assert_eq!(vec![frame], frames);
        assert_eq!(0, reassembler.buffered_len());
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(5)]
    #[case(12)]
    fn arbitrary_fragmentation_yields_exactly_the_original_frame(#[case] chunk_len: usize) {
        let frame = status_frame();
        let mut reassembler = FrameReassembler::new();

        let mut emitted = Vec::new();
        for chunk in frame.chunks(chunk_len) {
            emitted.extend(reassembler.push(chunk).expect("push should stay under cap"));
        }

        assert_eq!(vec![frame], emitted);
        assert_eq!(0, reassembler.buffered_len());
    }

    #[test]
    fn multiple_frames_in_one_chunk_are_all_emitted_in_order() {
        let first = status_frame();
        let second = FrameCodec::encode(Command::SetVolume, &[]).expect("ack frame should encode");
        let mut stream = first.clone();
        stream.extend_from_slice(&second);

        let mut reassembler = FrameReassembler::new();
        let frames = reassembler.push(&stream).expect("push should stay under cap");
        assert_eq!(vec![first, second], frames);
    }

    #[test]
    fn leading_noise_without_stx_is_discarded() {
        let frame = status_frame();
        let mut noisy = vec![0xAA, 0x55, 0xF0];
        noisy.extend_from_slice(&frame);

        let mut reassembler = FrameReassembler::new();
        let frames = reassembler.push(&noisy).expect("push should stay under cap");
        assert_eq!(vec![frame], frames);
        assert_eq!(0, reassembler.buffered_len());
    }

    #[test]
    fn false_stx_before_a_real_frame_does_not_loop_or_duplicate() {
        let frame = status_frame();
        // 0x02 followed by a tiny bogus LEN whose candidate slice has no ETX
        // trailer, then the real frame.
        let mut noisy = vec![STX, 0x00, 0x01, 0x99];
        noisy.extend_from_slice(&frame);

        let mut reassembler = FrameReassembler::new();
        let frames = reassembler.push(&noisy).expect("push should stay under cap");
        assert_eq!(vec![frame], frames);
    }

    #[test]
    fn incomplete_candidate_waits_for_more_data() {
        let frame = status_frame();
        let mut reassembler = FrameReassembler::new();

        let frames = reassembler
            .push(&frame[..5])
            .expect("push should stay under cap");
        assert!(frames.is_empty());
        assert_eq!(5, reassembler.buffered_len());

        let frames = reassembler
            .push(&frame[5..])
            .expect("push should stay under cap");
        assert_eq!(vec![frame], frames);
    }

    #[test]
    fn bogus_huge_len_trips_the_buffer_cap() {
        // STX with LEN=0xFFFF never completes; the cap must end the stream.
        let mut reassembler = FrameReassembler::with_buffer_cap(64);
        let mut result = reassembler.push(&[STX, 0xFF, 0xFF]);
        while let Ok(frames) = &result {
            assert!(frames.is_empty());
            result = reassembler.push(&[0x00; 32]);
        }
        assert_matches!(
            result,
            Err(ReassemblyError::BufferOverflow { max_buffered: 64, .. })
        );
    }

    #[test]
    fn noise_without_any_stx_never_accumulates() {
        let mut reassembler = FrameReassembler::with_buffer_cap(64);
        for _round in 0..100 {
            let frames = reassembler
                .push(&[0xAA; 32])
                .expect("stx-free noise should be dropped before the cap");
            assert!(frames.is_empty());
        }
        assert_eq!(0, reassembler.buffered_len());
    }
}
