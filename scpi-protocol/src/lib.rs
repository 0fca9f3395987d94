//! # SCPI Protocol Library
//!
//! Byte-level building blocks for controlling test and measurement instruments over a raw
//! socket (conventionally TCP port 5025) without a VISA stack.
//!
//! ## Overview
//!
//! Plain SCPI commands are lines of text. Two parts of the exchange need more care and are
//! implemented here:
//!
//! - **Binary blocks**: waveforms, traces and other bulk data travel as IEEE 488.2
//!   definite-length arbitrary blocks. [`codec`] encodes typed arrays into blocks and reads
//!   blocks back from a [`ByteChannel`], no matter how the transport fragments them.
//! - **Error checking**: [`error_queue`] drains the instrument's error queue with
//!   `SYST:ERR?`, accepts the different ways vendors say "no error", and always stops
//!   after a bounded number of reads.
//!
//! ## Block Format
//!
//! ```text
//! <command>#<N><N digits of decimal length><raw bytes><terminator>
//! ```
//!
//! `N` is a single digit from 1 to 9. The indefinite-length form `#0` is not supported.
//!
//! ## Basic Usage
//!
//! ### Encoding a Waveform
//!
//! ```
//! use scpi_protocol::{ByteOrder, TypedArray, encode_block};
//!
//! let data = TypedArray::U8(vec![1, 2, 3, 4]);
//! let message = encode_block("DATA:ARB1 ", &data, ByteOrder::Little).unwrap();
//! assert_eq!(message, b"DATA:ARB1 #14\x01\x02\x03\x04\n");
//! ```
//!
//! ### Decoding a Trace
//!
//! ```
//! use scpi_protocol::{
//!     BlockOptions, ByteChannel, ByteOrder, DataType, ElementKind, TypedArray, read_block,
//! };
//!
//! // A channel that delivers a canned response one byte at a time.
//! struct Trickle(Vec<u8>);
//!
//! impl ByteChannel for Trickle {
//!     fn send(&mut self, _bytes: &[u8]) -> std::io::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn receive(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
//!         buf[0] = self.0.remove(0);
//!         Ok(1)
//!     }
//! }
//!
//! let mut channel = Trickle(b"#18\x00\x00\x00\x00\x00\x00\xf0\x3f\n".to_vec());
//! let data_type = DataType::new(ElementKind::F64, ByteOrder::Little);
//! let trace = read_block(&mut channel, data_type, &BlockOptions::default()).unwrap();
//! assert_eq!(trace, TypedArray::F64(vec![1.0]));
//! ```
//!
//! ### Classifying Error Queue Responses
//!
//! ```
//! use scpi_protocol::error_queue::{ErrorCheckConfig, ErrorQueueDrain, Step};
//!
//! let config = ErrorCheckConfig::default();
//! let mut drain = ErrorQueueDrain::new(&config);
//! assert!(matches!(drain.feed("-113,\"Undefined header\""), Step::Query));
//! assert!(matches!(drain.feed("+0,\"No error\""), Step::Done(Err(_))));
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`error::ScpiError`], which keeps timeouts, malformed blocks,
//! broken error-queue handshakes and genuine instrument errors apart.
//!
//! ## Features
//!
//! - `tokio`: [`framed::BlockCodec`], a `tokio_util::codec` decoder/encoder for blocks.
//!
//! ## Thread Safety
//!
//! Nothing here is shared between calls. A channel must not be used by two exchanges at
//! the same time; instruments process one command at a time.

pub mod channel;
pub mod codec;
pub mod datatype;
pub mod error;
pub mod error_queue;
#[cfg(feature = "tokio")]
pub mod framed;

pub use channel::ByteChannel;
pub use codec::{
    BlockOptions, block_header, encode_block, read_block, read_block_after_marker, read_block_bytes,
};
pub use datatype::{ByteOrder, DataType, Element, ElementKind, TypedArray};
pub use error::ScpiError;
pub use error_queue::{DrainMode, ErrorCheckConfig, ErrorRecord, NoErrorVocabulary, check_errors};
