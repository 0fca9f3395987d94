//! Definite-length block framing for `tokio_util::codec`.
//!
//! ```
//! use bytes::BytesMut;
//! use scpi_protocol::framed::BlockCodec;
//! use scpi_protocol::{DataType, ElementKind, TypedArray};
//! use tokio_util::codec::Decoder;
//!
//! let mut codec = BlockCodec::new(DataType::from(ElementKind::U8));
//! let mut buf = BytesMut::from(&b"#13ab"[..]);
//! assert!(codec.decode(&mut buf).unwrap().is_none());
//! buf.extend_from_slice(b"c\n");
//! assert_eq!(codec.decode(&mut buf).unwrap(), Some(TypedArray::U8(b"abc".to_vec())));
//! ```
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    codec::{
        BLOCK_MARKER, DEFAULT_TERMINATOR, MAX_BLOCK_LEN, RECEIVE_CHUNK,
        encode_block_with_terminator, parse_body_len, parse_digit_count,
    },
    datatype::{DataType, TypedArray},
    error::ScpiError,
};

/// A command prefix with a payload, sent as `<prefix>#<N><length><body><terminator>`.
#[derive(Clone, Debug, PartialEq)]
pub struct BinaryWrite {
    pub prefix: String,
    pub data: TypedArray,
}

/// Decodes a stream of definite-length blocks into [`TypedArray`]s of one datatype.
///
/// Bytes between blocks, including the terminator of the previous block, are skipped.
#[derive(Clone, Debug)]
pub struct BlockCodec {
    data_type: DataType,
    terminator: Vec<u8>,
    max_len: usize,
}

impl BlockCodec {
    pub fn new(data_type: DataType) -> BlockCodec {
        BlockCodec {
            data_type,
            terminator: DEFAULT_TERMINATOR.to_vec(),
            max_len: MAX_BLOCK_LEN,
        }
    }

    pub fn with_terminator(mut self, terminator: &[u8]) -> BlockCodec {
        self.terminator = terminator.to_vec();
        self
    }

    /// Reject blocks whose header announces more than `len` bytes.
    pub fn with_max_len(mut self, len: usize) -> BlockCodec {
        self.max_len = len;
        self
    }
}

impl Decoder for BlockCodec {
    type Item = TypedArray;
    type Error = ScpiError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.iter().position(|&b| b == BLOCK_MARKER) {
            Some(start) => src.advance(start),
            None => {
                src.clear();
                return Ok(None);
            }
        }
        if src.len() < 2 {
            return Ok(None);
        }
        let num_digits = parse_digit_count(src[1])?;
        let header_len = 2 + num_digits;
        if src.len() < header_len {
            return Ok(None);
        }
        let len = parse_body_len(&src[2..header_len])?;
        if len > self.max_len {
            return Err(ScpiError::Framing(format!(
                "block of {} bytes exceeds the limit of {} bytes",
                len, self.max_len
            )));
        }
        if src.len() < header_len + len {
            src.reserve((header_len + len - src.len()).min(RECEIVE_CHUNK));
            return Ok(None);
        }
        log::debug!("Framed block header: #{}{}", num_digits, len);
        src.advance(header_len);
        let body = src.split_to(len);
        TypedArray::from_bytes(self.data_type, &body).map(Some)
    }
}

impl Encoder<BinaryWrite> for BlockCodec {
    type Error = ScpiError;

    fn encode(&mut self, item: BinaryWrite, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = encode_block_with_terminator(
            &item.prefix,
            &item.data,
            self.data_type.order,
            &self.terminator,
        )?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::datatype::{ByteOrder, ElementKind};

    #[test]
    fn decodes_consecutive_blocks() {
        let mut codec = BlockCodec::new(DataType::new(ElementKind::I16, ByteOrder::Big));
        let mut buf = BytesMut::from(&b"#14\x00\x01\xff\xff\n  #12\x00\x02\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(TypedArray::I16(vec![1, -1])));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(TypedArray::I16(vec![2])));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_split_header() {
        let mut codec = BlockCodec::new(DataType::from(ElementKind::U8));
        let mut buf = BytesMut::from(&b"#"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"21");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"0abcdefghij\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(TypedArray::U8(b"abcdefghij".to_vec()))
        );
    }

    #[test]
    fn rejects_indefinite_length() {
        let mut codec = BlockCodec::new(DataType::from(ElementKind::U8));
        let mut buf = BytesMut::from(&b"#0abc\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(ScpiError::Framing(_))));
    }

    #[test]
    fn rejects_blocks_over_the_limit() {
        let mut codec = BlockCodec::new(DataType::from(ElementKind::U8)).with_max_len(8);
        let mut buf = BytesMut::from(&b"#18abcdefgh\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(TypedArray::U8(b"abcdefgh".to_vec()))
        );
        let mut buf = BytesMut::from(&b"#9999999999"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(ScpiError::Framing(_))));
        assert!(buf.capacity() < 1024 * 1024);
    }

    #[test]
    fn encodes_like_encode_block() {
        let mut codec = BlockCodec::new(DataType::new(ElementKind::U8, ByteOrder::Little));
        let mut dst = BytesMut::new();
        codec
            .encode(
                BinaryWrite {
                    prefix: "DATA:ARB1 ".to_string(),
                    data: TypedArray::U8(vec![1, 2, 3, 4]),
                },
                &mut dst,
            )
            .unwrap();
        assert_eq!(&dst[..], b"DATA:ARB1 #14\x01\x02\x03\x04\n");
    }
}
