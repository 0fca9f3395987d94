use std::{
    io::{BufReader, ErrorKind, Write},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

use scpi_protocol::{
    BlockOptions, ByteChannel, ScpiError, block_header,
    channel::{decode_text, receive_byte},
    codec::BLOCK_MARKER,
    read_block_after_marker,
};

use crate::{Instrument, ProgramMessage, Response};

#[derive(Debug, Clone)]
pub struct Config {
    /// Largest block accepted from a client, in bytes
    pub max_block_size: usize,
    pub read_write_timeout: Duration,
    /// Responses are written in pieces of at most this many bytes.
    pub max_chunk: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_block_size: 64 * 1024 * 1024,
            read_write_timeout: Duration::from_secs(30),
            max_chunk: usize::MAX,
        }
    }
}

#[derive(Debug)]
pub struct Server<T: Instrument> {
    instrument: T,
    config: Config,
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use scpi_sim::server::Builder;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .max_chunk(1460)
///     .rw_timeout(Duration::from_secs(20))
///     .build(my_instrument);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the highest block size that this server is expected to receive.
    pub fn max_block_size(mut self, size: usize) -> Self {
        self.config.max_block_size = size;
        self
    }

    /// Set the TCP read and write timeout
    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_write_timeout = timeout;
        self
    }

    /// Split responses into writes of at most `size` bytes.
    pub fn max_chunk(mut self, size: usize) -> Self {
        self.config.max_chunk = size.max(1);
        self
    }

    /// Build and return the server
    pub fn build<T: Instrument>(self, instrument: T) -> Server<T> {
        Server::new(instrument, self.config)
    }
}

/// Reads one program message. A `#` in the stream starts a definite-length block, which
/// ends the message.
pub fn read_message(
    channel: &mut impl ByteChannel,
    options: &BlockOptions,
) -> Result<ProgramMessage, ScpiError> {
    let mut text = Vec::with_capacity(64);
    loop {
        let byte = receive_byte(channel)?;
        if byte == BLOCK_MARKER {
            let block = read_block_after_marker(channel, options)?;
            return Ok(ProgramMessage {
                text: decode_text(&text).trim().to_string(),
                block: Some(block),
            });
        }
        text.push(byte);
        if text.ends_with(&options.terminator) {
            text.truncate(text.len() - options.terminator.len());
            return Ok(ProgramMessage::new(decode_text(&text).trim()));
        }
    }
}

impl<T: Instrument> Server<T> {
    pub fn new(instrument: T, config: Config) -> Server<T> {
        Server { instrument, config }
    }

    pub fn listen(&self, addr: impl ToSocketAddrs) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr)?;
        log::info!("Simulator listening on {}", listener.local_addr()?);
        self.serve(listener);
        Ok(())
    }

    /// Accept clients from `listener` one after another, forever.
    pub fn serve(&self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => {
                    if let Ok(addr) = tcp.peer_addr() {
                        log::info!("New client connection from {}", addr);
                    }
                    if let Err(e) = self.handle_client(tcp) {
                        log::error!("Client error: {}", e);
                    }
                }
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
    }

    /// Serve a single client until it disconnects or goes idle past the timeout.
    pub fn handle_client(&self, tcp: TcpStream) -> Result<(), ScpiError> {
        tcp.set_read_timeout(Some(self.config.read_write_timeout))?;
        tcp.set_write_timeout(Some(self.config.read_write_timeout))?;
        tcp.set_nodelay(true)?;

        let options = BlockOptions {
            max_len: self.config.max_block_size,
            ..BlockOptions::default()
        };
        let mut channel = BufReader::new(tcp);
        loop {
            match read_message(&mut channel, &options) {
                Ok(message) => self.process_message(message, channel.get_mut())?,
                Err(ScpiError::Timeout(_)) => {
                    log::error!("Client read timeout, closing connection");
                    break;
                }
                Err(ScpiError::IoError(err))
                    if matches!(
                        err.kind(),
                        ErrorKind::UnexpectedEof
                            | ErrorKind::ConnectionAborted
                            | ErrorKind::ConnectionReset
                    ) =>
                {
                    log::info!("Client disconnected");
                    break;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    /// Process each message, forwarding it to the instrument.
    fn process_message(
        &self,
        message: ProgramMessage,
        tcp: &mut TcpStream,
    ) -> Result<(), ScpiError> {
        log::debug!("Received message: {}", message);
        let Some(response) = self.instrument.handle(&message) else {
            return Ok(());
        };
        let bytes = match response {
            Response::Text(text) => {
                log::debug!("Responding: {}", text);
                let mut bytes = text.into_bytes();
                bytes.push(b'\n');
                bytes
            }
            Response::Block(body) => {
                log::debug!("Responding with {} byte block", body.len());
                let header = block_header(body.len())?;
                let mut bytes = Vec::with_capacity(header.len() + body.len() + 1);
                bytes.extend_from_slice(header.as_bytes());
                bytes.extend_from_slice(&body);
                bytes.push(b'\n');
                bytes
            }
        };
        for chunk in bytes.chunks(self.config.max_chunk.max(1)) {
            tcp.write_all(chunk)?;
            tcp.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io;

    struct Incoming(Vec<u8>);

    impl ByteChannel for Incoming {
        fn send(&mut self, _bytes: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Err(ErrorKind::UnexpectedEof.into());
            }
            buf[0] = self.0.remove(0);
            Ok(1)
        }
    }

    #[test]
    fn reads_text_messages() {
        let mut channel = Incoming(b"*IDN?\n  *RST \n".to_vec());
        let options = BlockOptions::default();
        assert_eq!(
            read_message(&mut channel, &options).unwrap(),
            ProgramMessage::new("*IDN?")
        );
        assert_eq!(
            read_message(&mut channel, &options).unwrap(),
            ProgramMessage::new("*RST")
        );
    }

    #[test]
    fn reads_block_messages() {
        let mut channel = Incoming(b"DATA:ARB1 #14\x01\n\x03\x04\n*OPC?\n".to_vec());
        let options = BlockOptions::default();
        let message = read_message(&mut channel, &options).unwrap();
        assert_eq!(message.text, "DATA:ARB1");
        assert_eq!(message.block, Some(vec![1, b'\n', 3, 4]));
        assert_eq!(
            read_message(&mut channel, &options).unwrap(),
            ProgramMessage::new("*OPC?")
        );
    }

    #[test]
    fn rejects_oversized_blocks() {
        let mut channel = Incoming(b"DATA #3100".to_vec());
        let options = BlockOptions {
            max_len: 10,
            ..BlockOptions::default()
        };
        assert!(matches!(
            read_message(&mut channel, &options),
            Err(ScpiError::Framing(_))
        ));
    }
}
