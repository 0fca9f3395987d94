//! The byte transport the protocol runs on.
use std::{
    io::{self, BufReader, ErrorKind, Read, Write},
    net::TcpStream,
};

use crate::error::ScpiError;

/// A bidirectional, ordered and reliable byte stream to one instrument.
///
/// Implementations block up to their configured timeout. A timeout must surface as an
/// [`io::Error`] of kind [`ErrorKind::TimedOut`] or [`ErrorKind::WouldBlock`].
pub trait ByteChannel {
    /// Transmit the whole buffer, or fail.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Receive between 1 and `buf.len()` bytes.
    ///
    /// Fewer bytes than requested is not an error. End of stream is reported as
    /// [`ErrorKind::UnexpectedEof`] instead of `Ok(0)`.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

fn receive_from(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    loop {
        match reader.read(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed by instrument",
                ));
            }
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

impl ByteChannel for TcpStream {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        receive_from(self, buf)
    }
}

/// Reads go through the buffer, writes bypass it.
impl<S: Read + Write> ByteChannel for BufReader<S> {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let inner = self.get_mut();
        inner.write_all(bytes)?;
        inner.flush()
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        receive_from(self, buf)
    }
}

impl<C: ByteChannel + ?Sized> ByteChannel for &mut C {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).send(bytes)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).receive(buf)
    }
}

/// Fill `buf` completely, issuing as many receives as the channel needs.
pub fn receive_exact(channel: &mut impl ByteChannel, mut buf: &mut [u8]) -> Result<(), ScpiError> {
    while !buf.is_empty() {
        let n = channel.receive(buf)?;
        if n == 0 {
            return Err(io::Error::from(ErrorKind::UnexpectedEof).into());
        }
        buf = &mut buf[n..];
    }
    Ok(())
}

/// Receive a single byte.
pub fn receive_byte(channel: &mut impl ByteChannel) -> Result<u8, ScpiError> {
    let mut byte = [0u8; 1];
    receive_exact(channel, &mut byte)?;
    Ok(byte[0])
}

/// Longest text response accepted by [`receive_line`], terminator included.
pub const MAX_LINE_LEN: usize = 16 * 1024 * 1024;

/// Receive bytes until `terminator` has been seen and return the line without it.
///
/// Bytes are pulled one at a time so nothing past the terminator is consumed.
pub fn receive_line(
    channel: &mut impl ByteChannel,
    terminator: &[u8],
) -> Result<Vec<u8>, ScpiError> {
    receive_line_limited(channel, terminator, MAX_LINE_LEN)
}

/// Like [`receive_line`], failing with [`ScpiError::Framing`] once `max_len` bytes have
/// arrived without a terminator.
pub fn receive_line_limited(
    channel: &mut impl ByteChannel,
    terminator: &[u8],
    max_len: usize,
) -> Result<Vec<u8>, ScpiError> {
    let mut line = Vec::with_capacity(64);
    loop {
        if line.len() >= max_len {
            return Err(ScpiError::Framing(format!(
                "no terminator within {} bytes of response",
                max_len
            )));
        }
        line.push(receive_byte(channel)?);
        if !terminator.is_empty() && line.ends_with(terminator) {
            line.truncate(line.len() - terminator.len());
            return Ok(line);
        }
    }
}

/// Instruments answer in latin-1, where every byte maps to the code point of the same value.
pub fn decode_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
pub(crate) mod test {
    use super::ByteChannel;
    use std::collections::VecDeque;
    use std::io::{self, ErrorKind};

    /// In-memory channel that hands out at most `chunk` bytes per receive and
    /// records everything sent to it.
    pub struct ScriptedChannel {
        incoming: VecDeque<u8>,
        chunk: usize,
        pub sent: Vec<u8>,
        pub receive_calls: usize,
    }

    impl ScriptedChannel {
        pub fn new(incoming: &[u8]) -> ScriptedChannel {
            ScriptedChannel::chunked(incoming, usize::MAX)
        }

        pub fn chunked(incoming: &[u8], chunk: usize) -> ScriptedChannel {
            ScriptedChannel {
                incoming: incoming.iter().copied().collect(),
                chunk,
                sent: Vec::new(),
                receive_calls: 0,
            }
        }

        pub fn remaining(&self) -> usize {
            self.incoming.len()
        }
    }

    impl ByteChannel for ScriptedChannel {
        fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.sent.extend_from_slice(bytes);
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.receive_calls += 1;
            if self.incoming.is_empty() {
                // An idle instrument looks like a timed out socket.
                return Err(io::Error::from(ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.chunk).min(self.incoming.len());
            for slot in buf[..n].iter_mut() {
                *slot = self.incoming.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    #[test]
    fn receive_line_stops_at_terminator() {
        let mut channel = ScriptedChannel::chunked(b"+0,\"No error\"\nrest", 3);
        let line = super::receive_line(&mut channel, b"\n").unwrap();
        assert_eq!(line, b"+0,\"No error\"");
        assert_eq!(channel.remaining(), 4);
    }

    #[test]
    fn receive_line_with_crlf() {
        let mut channel = ScriptedChannel::new(b"1\r\n");
        let line = super::receive_line(&mut channel, b"\r\n").unwrap();
        assert_eq!(line, b"1");
    }

    #[test]
    fn unterminated_line_is_bounded() {
        let mut channel = ScriptedChannel::new(&[b'x'; 100]);
        match super::receive_line_limited(&mut channel, b"\n", 16) {
            Err(crate::error::ScpiError::Framing(_)) => {}
            other => panic!("expected Framing, got {:?}", other),
        }
        assert_eq!(channel.remaining(), 84);
        let mut channel = ScriptedChannel::new(b"0123456789abcde\n");
        let line = super::receive_line_limited(&mut channel, b"\n", 16).unwrap();
        assert_eq!(line, b"0123456789abcde");
    }

    #[test]
    fn receive_exact_collects_short_reads() {
        let mut channel = ScriptedChannel::chunked(b"abcdefg", 2);
        let mut buf = [0u8; 7];
        super::receive_exact(&mut channel, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdefg");
        assert_eq!(channel.receive_calls, 4);
    }

    #[test]
    fn latin1_text() {
        assert_eq!(super::decode_text(b"10 \xb5s"), "10 µs");
    }

    #[test]
    fn tcp_eof_is_an_error() {
        let mut reader = io::Cursor::new(Vec::<u8>::new());
        let mut buf = [0u8; 4];
        let err = super::receive_from(&mut reader, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}
