//! Encoding and decoding of IEEE 488.2 definite-length arbitrary blocks
use std::io;

use crate::{
    channel::{ByteChannel, receive_byte, receive_exact},
    datatype::{ByteOrder, DataType, TypedArray},
    error::ScpiError,
};

pub const BLOCK_MARKER: u8 = b'#';
pub const DEFAULT_TERMINATOR: &[u8] = b"\n";
/// The length field holds at most nine digits.
pub const MAX_BLOCK_LEN: usize = 999_999_999;
/// Largest single receive into a block body
pub(crate) const RECEIVE_CHUNK: usize = 64 * 1024;

/// Options for reading a block from an instrument.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlockOptions {
    /// Terminator that follows the block body.
    pub terminator: Vec<u8>,
    /// Fail if the bytes after the body are not the terminator.
    /// When unset, the terminator is drained on a best-effort basis.
    pub strict_terminator: bool,
    /// Largest body accepted, in bytes.
    pub max_len: usize,
}

impl Default for BlockOptions {
    fn default() -> Self {
        Self {
            terminator: DEFAULT_TERMINATOR.to_vec(),
            strict_terminator: false,
            max_len: MAX_BLOCK_LEN,
        }
    }
}

/// Renders the `#<N><length>` header for a body of `len` bytes.
pub fn block_header(len: usize) -> Result<String, ScpiError> {
    if len > MAX_BLOCK_LEN {
        return Err(ScpiError::Encoding(format!(
            "{} bytes do not fit into a definite-length block (maximum is {} bytes)",
            len, MAX_BLOCK_LEN
        )));
    }
    let digits = len.to_string();
    Ok(format!("#{}{}", digits.len(), digits))
}

/// Builds `<prefix>#<N><length><body>\n` in a single buffer.
pub fn encode_block(
    prefix: &str,
    data: &TypedArray,
    order: ByteOrder,
) -> Result<Vec<u8>, ScpiError> {
    encode_block_with_terminator(prefix, data, order, DEFAULT_TERMINATOR)
}

pub fn encode_block_with_terminator(
    prefix: &str,
    data: &TypedArray,
    order: ByteOrder,
    terminator: &[u8],
) -> Result<Vec<u8>, ScpiError> {
    let header = block_header(data.byte_len())?;
    let mut out =
        Vec::with_capacity(prefix.len() + header.len() + data.byte_len() + terminator.len());
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(header.as_bytes());
    data.write_bytes(order, &mut out);
    out.extend_from_slice(terminator);
    Ok(out)
}

/// Parses the single length-digit-count byte that follows `#`.
pub(crate) fn parse_digit_count(byte: u8) -> Result<usize, ScpiError> {
    match byte {
        b'1'..=b'9' => Ok((byte - b'0') as usize),
        b'0' => Err(ScpiError::Framing(
            "indefinite-length blocks (#0) are not supported".to_string(),
        )),
        other => Err(ScpiError::Framing(format!(
            "expected a length digit after '#', got {:?}",
            other as char
        ))),
    }
}

/// Parses the ASCII decimal body length.
pub(crate) fn parse_body_len(digits: &[u8]) -> Result<usize, ScpiError> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ScpiError::Framing(format!(
            "invalid block length {:?}",
            String::from_utf8_lossy(digits)
        )));
    }
    // At most nine digits, so this cannot overflow.
    Ok(digits
        .iter()
        .fold(0usize, |len, digit| len * 10 + (digit - b'0') as usize))
}

/// Reads one definite-length block and returns its raw body.
///
/// Bytes before the `#` marker are discarded. The body is collected with as many receives
/// as the channel needs, and the terminator is drained afterwards.
pub fn read_block_bytes(
    channel: &mut impl ByteChannel,
    options: &BlockOptions,
) -> Result<Vec<u8>, ScpiError> {
    let mut skipped = 0usize;
    while receive_byte(channel)? != BLOCK_MARKER {
        skipped += 1;
    }
    if skipped > 0 {
        log::debug!("Discarded {} bytes before block marker", skipped);
    }
    read_block_after_marker(channel, options)
}

/// Like [`read_block_bytes`], for callers that already consumed the `#` marker.
pub fn read_block_after_marker(
    channel: &mut impl ByteChannel,
    options: &BlockOptions,
) -> Result<Vec<u8>, ScpiError> {
    let num_digits = parse_digit_count(receive_byte(channel)?)?;
    let mut digits = [0u8; 9];
    receive_exact(channel, &mut digits[..num_digits])?;
    let len = parse_body_len(&digits[..num_digits])?;
    log::debug!("Block header: #{}{}", num_digits, len);
    if len > options.max_len {
        return Err(ScpiError::Framing(format!(
            "block of {} bytes exceeds the limit of {} bytes",
            len, options.max_len
        )));
    }

    // Grow with the data so a corrupt header cannot allocate the full length up front.
    let mut body = Vec::with_capacity(len.min(RECEIVE_CHUNK));
    while body.len() < len {
        let received = body.len();
        let want = (len - received).min(RECEIVE_CHUNK);
        body.resize(received + want, 0);
        let n = channel.receive(&mut body[received..])?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        body.truncate(received + n);
        log::trace!("Received {} of {} block bytes", body.len(), len);
    }

    drain_terminator(channel, options)?;
    Ok(body)
}

fn drain_terminator(
    channel: &mut impl ByteChannel,
    options: &BlockOptions,
) -> Result<(), ScpiError> {
    if options.terminator.is_empty() {
        return Ok(());
    }
    let mut term = vec![0u8; options.terminator.len()];
    match receive_exact(channel, &mut term) {
        Ok(()) if term == options.terminator => Ok(()),
        Ok(()) if options.strict_terminator => Err(ScpiError::Framing(format!(
            "block not terminated correctly, got {:02x?}",
            term
        ))),
        Ok(()) => {
            log::warn!("Unexpected bytes {:02x?} after block body", term);
            Ok(())
        }
        Err(ScpiError::Timeout(_)) | Err(ScpiError::IoError(_)) if !options.strict_terminator => {
            log::debug!("No terminator after block body");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Reads one definite-length block and reinterprets it as `data_type`.
pub fn read_block(
    channel: &mut impl ByteChannel,
    data_type: DataType,
    options: &BlockOptions,
) -> Result<TypedArray, ScpiError> {
    let body = read_block_bytes(channel, options)?;
    TypedArray::from_bytes(data_type, &body)
}
