//! Reader frame encoder/decoder.
//!
//! The reader module speaks a binary framed protocol over its UART. This
//! module handles the pure byte-level encoding and decoding of frames and
//! the re-assembly of frames from an arbitrarily chunked byte stream. It
//! performs no I/O.
//!
//! # Frame format
//!
//! ```text
//! 0xBB <type> <cmd> <len_hi> <len_lo> [<param>...] <checksum> 0x7E
//! ```
//!
//! - Header: `0xBB`
//! - `type`: `0x00` command, `0x01` response, `0x02` notice
//! - `cmd`: operation code
//! - `len`: big-endian parameter length (0-65535)
//! - `checksum`: low 8 bits of the sum of every byte from `type` through
//!   the last parameter
//! - End: `0x7E`

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use uhflib_core::error::{Error, Result};
use uhflib_core::helpers::bytes_to_hex;
use uhflib_core::types::ResponseCode;

/// First byte of every frame.
pub const HEADER: u8 = 0xBB;

/// Last byte of every frame.
pub const END: u8 = 0x7E;

/// Size of a frame with no parameters.
pub const MIN_FRAME_LEN: usize = 7;

/// Largest parameter block the 16-bit length field can describe.
pub const MAX_PARAMS_LEN: usize = u16::MAX as usize;

/// Direction/kind of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Host to module.
    Command,
    /// Module reply to a command.
    Response,
    /// Unsolicited module report (tag observations).
    Notice,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(FrameType::Command),
            0x01 => Some(FrameType::Response),
            0x02 => Some(FrameType::Notice),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            FrameType::Command => 0x00,
            FrameType::Response => 0x01,
            FrameType::Notice => 0x02,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameType::Command => "command",
            FrameType::Response => "response",
            FrameType::Notice => "notice",
        };
        write!(f, "{s}")
    }
}

/// A decoded frame.
///
/// Frames are immutable once built or decoded. The checksum is the byte
/// carried on the wire (or computed, for frames built locally);
/// [`Frame::checksum_valid`] compares it against the contents. Frames with
/// a bad checksum are still produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    frame_type: FrameType,
    command: u8,
    parameters: Vec<u8>,
    checksum: u8,
    raw_bytes: Option<Vec<u8>>,
}

impl Frame {
    /// Build a frame with a correct checksum.
    pub fn new(frame_type: FrameType, command: u8, parameters: Vec<u8>) -> Self {
        let checksum = checksum(frame_type.as_byte(), command, &parameters);
        Frame {
            frame_type,
            command,
            parameters,
            checksum,
            raw_bytes: None,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Operation code.
    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn parameters(&self) -> &[u8] {
        &self.parameters
    }

    /// Checksum byte as carried on the wire.
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Exact wire bytes, when the frame was decoded from a stream.
    pub fn raw_bytes(&self) -> Option<&[u8]> {
        self.raw_bytes.as_deref()
    }

    /// Returns `true` if the carried checksum matches the contents.
    pub fn checksum_valid(&self) -> bool {
        self.checksum == checksum(self.frame_type.as_byte(), self.command, &self.parameters)
    }

    /// The response code (first parameter byte) of a response frame.
    pub fn response_code(&self) -> Option<ResponseCode> {
        if self.frame_type != FrameType::Response {
            return None;
        }
        self.parameters.first().map(|&b| ResponseCode::from_byte(b))
    }

    /// Returns `true` for a response frame carrying the success code.
    pub fn is_success(&self) -> bool {
        self.response_code().is_some_and(|code| code.is_success())
    }

    /// Encode to wire bytes, keeping the carried checksum byte.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let len = params_len(&self.parameters)?;
        let mut buf = BytesMut::with_capacity(MIN_FRAME_LEN + self.parameters.len());
        buf.put_u8(HEADER);
        buf.put_u8(self.frame_type.as_byte());
        buf.put_u8(self.command);
        buf.put_u16(len);
        buf.put_slice(&self.parameters);
        buf.put_u8(self.checksum);
        buf.put_u8(END);
        Ok(buf.to_vec())
    }

    /// One-line diagnostic description including a hex dump.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "{} cmd=0x{:02X} len={} params={}",
            self.frame_type,
            self.command,
            self.parameters.len(),
            bytes_to_hex(&self.parameters)
        );
        if let Some(code) = self.response_code() {
            out.push_str(&format!(" ({code})"));
        }
        if !self.checksum_valid() {
            out.push_str(" [bad checksum]");
        }
        if let Some(raw) = &self.raw_bytes {
            out.push_str(&format!(" raw={}", bytes_to_hex(raw)));
        }
        out
    }
}

fn params_len(parameters: &[u8]) -> Result<u16> {
    u16::try_from(parameters.len()).map_err(|_| {
        Error::InvalidParameter(format!(
            "frame parameters too long: {} bytes (max {MAX_PARAMS_LEN})",
            parameters.len()
        ))
    })
}

/// Frame checksum: low 8 bits of `type + cmd + len_hi + len_lo + params`.
///
/// The length bytes are derived from `parameters.len()`; callers must
/// keep parameters within [`MAX_PARAMS_LEN`].
pub fn checksum(frame_type: u8, command: u8, parameters: &[u8]) -> u8 {
    let [len_hi, len_lo] = (parameters.len() as u16).to_be_bytes();
    parameters.iter().fold(
        frame_type
            .wrapping_add(command)
            .wrapping_add(len_hi)
            .wrapping_add(len_lo),
        |acc, &b| acc.wrapping_add(b),
    )
}

/// Encode a frame of any type.
pub fn build_frame(frame_type: FrameType, command: u8, parameters: &[u8]) -> Result<Vec<u8>> {
    params_len(parameters)?;
    Frame::new(frame_type, command, parameters.to_vec()).encode()
}

/// Encode a host command frame.
///
/// # Example
///
/// ```
/// use uhflib_reader::frame::build_command;
///
/// // Get RF power
/// let bytes = build_command(0xB7, &[]).unwrap();
/// assert_eq!(bytes, vec![0xBB, 0x00, 0xB7, 0x00, 0x00, 0xB7, 0x7E]);
/// ```
pub fn build_command(command: u8, parameters: &[u8]) -> Result<Vec<u8>> {
    build_frame(FrameType::Command, command, parameters)
}

/// Encode a response frame, as the module would send it.
pub fn build_response(command: u8, parameters: &[u8]) -> Result<Vec<u8>> {
    build_frame(FrameType::Response, command, parameters)
}

/// Encode a notice frame, as the module would send it.
pub fn build_notice(command: u8, parameters: &[u8]) -> Result<Vec<u8>> {
    build_frame(FrameType::Notice, command, parameters)
}

/// Decode one frame starting at `bytes[0]`.
///
/// Returns `None` when the buffer is shorter than a frame, the header or
/// type byte is wrong, or the end byte is missing at the position implied
/// by the declared length. Bytes after the end byte are ignored. The
/// checksum is not enforced.
pub fn parse_frame(bytes: &[u8]) -> Option<Frame> {
    if bytes.len() < MIN_FRAME_LEN || bytes[0] != HEADER {
        return None;
    }
    let frame_type = FrameType::from_byte(bytes[1])?;
    let command = bytes[2];
    let len = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
    let total = MIN_FRAME_LEN + len;
    if bytes.len() < total || bytes[total - 1] != END {
        return None;
    }
    Some(Frame {
        frame_type,
        command,
        parameters: bytes[5..5 + len].to_vec(),
        checksum: bytes[5 + len],
        raw_bytes: Some(bytes[..total].to_vec()),
    })
}

/// Index of the end byte of the first frame in `buffer`.
///
/// Scans for the first header byte and checks that the frame its length
/// field declares fits inside the buffer. Returns `None` if no header is
/// present or the frame is not complete yet; nothing is consumed, so the
/// caller can append more bytes and retry.
pub fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    let start = buffer.iter().position(|&b| b == HEADER)?;
    if buffer.len() < start + 5 {
        return None;
    }
    let len = u16::from_be_bytes([buffer[start + 3], buffer[start + 4]]) as usize;
    let end = start + MIN_FRAME_LEN + len - 1;
    (end < buffer.len()).then_some(end)
}

/// Split `buffer` into `(frame_bytes, remaining)`.
///
/// Garbage before the first header byte is discarded. Returns `None` if
/// no complete frame is present yet. The returned frame bytes are not
/// validated; pass them to [`parse_frame`].
pub fn extract_frame(buffer: &[u8]) -> Option<(&[u8], &[u8])> {
    let start = buffer.iter().position(|&b| b == HEADER)?;
    let end = find_frame_end(buffer)?;
    Some((&buffer[start..=end], &buffer[end + 1..]))
}

/// Offset of the first header after `buffer[0]` that starts a complete
/// frame with a valid checksum.
fn next_complete_frame(buffer: &[u8]) -> Option<usize> {
    buffer
        .iter()
        .enumerate()
        .skip(1)
        .filter(|&(_, &b)| b == HEADER)
        .map(|(i, _)| i)
        .find(|&i| parse_frame(&buffer[i..]).is_some_and(|frame| frame.checksum_valid()))
}

/// Re-assembles frames from an inbound byte stream.
///
/// Chunks may split frames anywhere and may carry several frames at once.
/// Malformed candidates are skipped one byte at a time so decoding resumes
/// at the next header. An incomplete candidate is abandoned as soon as a
/// complete, checksum-valid frame shows up behind it, so a stray header
/// with a large length field cannot hold the stream back.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes held waiting for the rest of a frame.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Append a chunk and return every frame it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            // Nothing before a header can ever become part of a frame.
            match self.buf.iter().position(|&b| b == HEADER) {
                None => {
                    if !self.buf.is_empty() {
                        tracing::trace!(bytes = self.buf.len(), "discarding bytes with no frame header");
                        self.buf.clear();
                    }
                    break;
                }
                Some(0) => {}
                Some(skip) => {
                    tracing::trace!(bytes = skip, "discarding garbage before frame header");
                    self.buf.advance(skip);
                }
            }

            // Reject an impossible type byte now rather than waiting for the
            // length it claims.
            if self.buf.len() >= 2 && FrameType::from_byte(self.buf[1]).is_none() {
                tracing::debug!(type_byte = self.buf[1], "invalid frame type, resyncing");
                self.buf.advance(1);
                continue;
            }

            let Some((frame_bytes, rest)) = extract_frame(&self.buf) else {
                match next_complete_frame(&self.buf) {
                    Some(skip) => {
                        tracing::debug!(bytes = skip, "incomplete frame candidate is noise, resyncing");
                        self.buf.advance(skip);
                        continue;
                    }
                    None => break,
                }
            };
            let consumed = self.buf.len() - rest.len();
            match parse_frame(frame_bytes) {
                Some(frame) => {
                    tracing::trace!(frame = %frame.describe(), "frame decoded");
                    frames.push(frame);
                    self.buf.advance(consumed);
                }
                None => {
                    tracing::debug!(
                        data = ?frame_bytes,
                        "malformed frame candidate, resyncing"
                    );
                    self.buf.advance(1);
                }
            }
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_power_response() -> Vec<u8> {
        build_response(0xB7, &[0x10, 0x07, 0xD0]).unwrap()
    }

    fn tag_notice() -> Vec<u8> {
        let mut params = vec![0xC8, 0x30, 0x00];
        params.extend_from_slice(&[0x52, 0x46, 0, 0, 0, 0, 0, 0, 0, 0, 0x00, 0x01]);
        build_notice(0x27, &params).unwrap()
    }

    // ---------------------------------------------------------------
    // Encoding
    // ---------------------------------------------------------------

    #[test]
    fn encode_no_params() {
        let bytes = build_command(0x22, &[]).unwrap();
        assert_eq!(bytes, vec![0xBB, 0x00, 0x22, 0x00, 0x00, 0x22, 0x7E]);
    }

    #[test]
    fn encode_start_poll_known_vector() {
        let bytes = build_command(0x27, &[0x22, 0x27, 0x10]).unwrap();
        assert_eq!(
            bytes,
            vec![0xBB, 0x00, 0x27, 0x00, 0x03, 0x22, 0x27, 0x10, 0x83, 0x7E]
        );
    }

    #[test]
    fn encode_length_is_big_endian() {
        let params = vec![0x01; 300];
        let bytes = build_command(0x49, &params).unwrap();
        assert_eq!(bytes.len(), 7 + 300);
        assert_eq!(&bytes[3..5], &[0x01, 0x2C]);
        assert_eq!(*bytes.last().unwrap(), END);
    }

    #[test]
    fn encode_rejects_oversized_params() {
        let params = vec![0u8; MAX_PARAMS_LEN + 1];
        assert!(matches!(
            build_command(0x49, &params),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn checksum_wraps() {
        assert_eq!(checksum(0x01, 0xB7, &[0x10, 0x07, 0xD0]), 0xA2);
        assert_eq!(checksum(0x00, 0xFF, &[0xFF, 0x03]), 0x03);
    }

    // ---------------------------------------------------------------
    // Decoding
    // ---------------------------------------------------------------

    #[test]
    fn command_round_trip() {
        let params = [0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0x06];
        let frame = parse_frame(&build_command(0x49, &params).unwrap()).unwrap();
        assert_eq!(frame.frame_type, FrameType::Command);
        assert_eq!(frame.command, 0x49);
        assert_eq!(frame.parameters, params);
        assert!(frame.checksum_valid());
    }

    #[test]
    fn decode_response_fields() {
        let bytes = get_power_response();
        let frame = parse_frame(&bytes).unwrap();
        assert_eq!(frame.frame_type, FrameType::Response);
        assert_eq!(frame.response_code(), Some(ResponseCode::Success));
        assert!(frame.is_success());
        assert_eq!(frame.raw_bytes.as_deref(), Some(bytes.as_slice()));
    }

    #[test]
    fn decode_error_response() {
        let frame = parse_frame(&build_response(0x49, &[0x17]).unwrap()).unwrap();
        assert!(!frame.is_success());
        assert_eq!(frame.response_code(), Some(ResponseCode::WriteFailed));
    }

    #[test]
    fn notice_has_no_response_code() {
        let frame = parse_frame(&tag_notice()).unwrap();
        assert_eq!(frame.frame_type, FrameType::Notice);
        assert_eq!(frame.response_code(), None);
        assert!(!frame.is_success());
    }

    #[test]
    fn flipped_checksum_only_invalidates_checksum() {
        let mut bytes = get_power_response();
        let good = parse_frame(&bytes).unwrap();
        let idx = bytes.len() - 2;
        bytes[idx] ^= 0xFF;
        let bad = parse_frame(&bytes).unwrap();

        assert!(good.checksum_valid());
        assert!(!bad.checksum_valid());
        assert_eq!(bad.frame_type, good.frame_type);
        assert_eq!(bad.command, good.command);
        assert_eq!(bad.parameters, good.parameters);
        assert!(bad.describe().contains("bad checksum"));
    }

    #[test]
    fn decode_rejects_malformed() {
        assert!(parse_frame(&[]).is_none());
        assert!(parse_frame(&[0xBB, 0x00, 0x22, 0x00, 0x00, 0x22]).is_none());
        // Wrong header
        assert!(parse_frame(&[0xAA, 0x00, 0x22, 0x00, 0x00, 0x22, 0x7E]).is_none());
        // Wrong end byte
        assert!(parse_frame(&[0xBB, 0x00, 0x22, 0x00, 0x00, 0x22, 0x7F]).is_none());
        // Unknown frame type
        assert!(parse_frame(&[0xBB, 0x05, 0x22, 0x00, 0x00, 0x27, 0x7E]).is_none());
        // Declared length longer than the buffer
        assert!(parse_frame(&[0xBB, 0x00, 0x22, 0x00, 0x02, 0x22, 0x7E]).is_none());
    }

    #[test]
    fn encode_preserves_carried_checksum() {
        let mut bytes = get_power_response();
        let idx = bytes.len() - 2;
        bytes[idx] = 0x00;
        let frame = parse_frame(&bytes).unwrap();
        assert_eq!(frame.encode().unwrap(), bytes);
    }

    // ---------------------------------------------------------------
    // find_frame_end / extract_frame
    // ---------------------------------------------------------------

    #[test]
    fn find_end_complete_and_partial() {
        let bytes = get_power_response();
        assert_eq!(find_frame_end(&bytes), Some(bytes.len() - 1));
        assert_eq!(find_frame_end(&bytes[..bytes.len() - 1]), None);
        assert_eq!(find_frame_end(&bytes[..3]), None);
        assert_eq!(find_frame_end(&[0x00, 0x11]), None);
    }

    #[test]
    fn find_end_skips_leading_garbage() {
        let mut buf = vec![0x00, 0x7E, 0x13];
        buf.extend_from_slice(&get_power_response());
        assert_eq!(find_frame_end(&buf), Some(buf.len() - 1));
    }

    #[test]
    fn extract_splits_frame_and_rest() {
        let first = get_power_response();
        let mut buf = vec![0x01, 0x02];
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&[0xBB, 0x01]);

        let (frame, rest) = extract_frame(&buf).unwrap();
        assert_eq!(frame, first.as_slice());
        assert_eq!(rest, &[0xBB, 0x01]);
        assert!(extract_frame(rest).is_none());
    }

    // ---------------------------------------------------------------
    // FrameBuffer
    // ---------------------------------------------------------------

    #[test]
    fn buffer_reassembles_split_frame_at_every_offset() {
        let bytes = tag_notice();
        for split in 1..bytes.len() {
            let mut fb = FrameBuffer::new();
            assert!(fb.push(&bytes[..split]).is_empty(), "split at {split}");
            let frames = fb.push(&bytes[split..]);
            assert_eq!(frames.len(), 1, "split at {split}");
            assert_eq!(frames[0].command, 0x27);
            assert!(fb.is_empty());
        }
    }

    #[test]
    fn buffer_yields_two_frames_from_one_chunk() {
        let mut chunk = get_power_response();
        chunk.extend_from_slice(&tag_notice());

        let frames = FrameBuffer::new().push(&chunk);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].frame_type, FrameType::Response);
        assert_eq!(frames[1].frame_type, FrameType::Notice);
    }

    #[test]
    fn buffer_skips_garbage_prefix() {
        let mut chunk = vec![0x00, 0x13, 0x7E, 0x42];
        chunk.extend_from_slice(&tag_notice());

        let mut fb = FrameBuffer::new();
        let frames = fb.push(&chunk);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0x27);
        assert!(fb.is_empty());
    }

    #[test]
    fn buffer_resyncs_after_bad_end_byte() {
        // A header-looking candidate whose end byte is wrong, then a real frame.
        let mut chunk = vec![0xBB, 0x01, 0xB6, 0x00, 0x00, 0xB7, 0x00];
        chunk.extend_from_slice(&get_power_response());

        let frames = FrameBuffer::new().push(&chunk);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0xB7);
    }

    #[test]
    fn buffer_drops_invalid_type_immediately() {
        let mut fb = FrameBuffer::new();
        assert!(fb.push(&[0xBB, 0x09, 0xFF, 0xFF]).is_empty());
        assert!(fb.is_empty());
    }

    #[test]
    fn buffer_keeps_bad_checksum_frames() {
        let mut bytes = get_power_response();
        let idx = bytes.len() - 2;
        bytes[idx] = bytes[idx].wrapping_add(1);

        let frames = FrameBuffer::new().push(&bytes);
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].checksum_valid());
    }

    #[test]
    fn buffer_skips_stray_header_with_huge_length() {
        // Line noise that looks like the start of a 65535-byte response.
        let mut chunk = vec![0xBB, 0x01, 0xFF, 0xFF];
        chunk.extend_from_slice(&get_power_response());

        let mut fb = FrameBuffer::new();
        let frames = fb.push(&chunk);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command(), 0xB7);
        assert!(fb.is_empty());

        let mut more = Vec::new();
        for _ in 0..3 {
            more.extend_from_slice(&get_power_response());
        }
        assert_eq!(fb.push(&more).len(), 3);
        assert!(fb.is_empty());
    }

    #[test]
    fn buffer_waits_for_split_frame_without_later_frame() {
        let bytes = tag_notice();
        let mut fb = FrameBuffer::new();
        assert!(fb.push(&bytes[..9]).is_empty());
        assert_eq!(fb.len(), 9);
        assert_eq!(fb.push(&bytes[9..]).len(), 1);
    }

    #[test]
    fn buffer_holds_partial_until_cleared() {
        let bytes = tag_notice();
        let mut fb = FrameBuffer::new();
        fb.push(&bytes[..6]);
        assert_eq!(fb.len(), 6);
        fb.clear();
        assert!(fb.push(&bytes[6..]).is_empty());
    }
}
