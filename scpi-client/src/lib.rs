//! # SCPI Client
//!
//! A Rust client library for controlling test and measurement instruments with SCPI
//! commands over a raw TCP socket, without a VISA installation.
//!
//! ## Overview
//!
//! Most instruments accept SCPI over a plain socket on port 5025. This crate wraps that
//! connection in a session that sends commands, reads responses, transfers binary data as
//! IEEE 488.2 definite-length blocks and checks the instrument's error queue.
//!
//! For details on the block format and error queue handling, see the
//! [`scpi_protocol`] crate.
//!
//! ## Basic Usage
//!
//! ### Connecting to an Instrument
//!
//! ```ignore
//! use scpi_client::ScpiClient;
//!
//! let mut vna = ScpiClient::connect("192.168.1.10:5025")?;
//! println!("Connected to {}", vna.instrument_id().unwrap_or("unknown"));
//! vna.write("*RST")?;
//! assert_eq!(vna.query("*OPC?")?, "1");
//! ```
//!
//! ### Reading a Trace
//!
//! ```ignore
//! use scpi_protocol::{ByteOrder, DataType, ElementKind};
//!
//! vna.write("FORM:BORD SWAP")?;
//! vna.write("FORM REAL,64")?;
//! let data_type = DataType::new(ElementKind::F64, ByteOrder::Little);
//! let trace = vna.query_binary("CALC1:DATA? FDATA", data_type)?;
//! ```
//!
//! ### Loading a Waveform
//!
//! ```ignore
//! use scpi_protocol::{ByteOrder, TypedArray};
//!
//! let wfm = TypedArray::I16(samples);
//! awg.write_binary("TRAC:DATA 1,0,", &wfm, ByteOrder::Little, true)?;
//! ```
//!
//! ## Error Checking
//!
//! [`ScpiClient::err_check`] drains `SYST:ERR?` and fails with
//! [`ScpiError::Instrument`] if the instrument reported errors. With
//! [`Config::auto_error_check`] the check runs after every operation.
//!
//! ## Logging
//!
//! Commands and responses are logged through the `log` crate at debug level.
use std::{
    io::{self, BufReader, ErrorKind},
    net::{Shutdown, TcpStream, ToSocketAddrs},
};

use scpi_protocol::{
    BlockOptions, ByteChannel, ByteOrder, DataType, ScpiError, TypedArray,
    channel::{decode_text, receive_line},
    check_errors,
    codec::encode_block_with_terminator,
};

pub mod config;
pub use config::{Builder, Config, DEFAULT_PORT};

/// A session with one instrument.
///
/// Every operation takes `&mut self`: the instrument handles one command at a time,
/// so a session is never shared between concurrent exchanges.
pub struct ScpiClient<C: ByteChannel = BufReader<TcpStream>> {
    channel: C,
    config: Config,
    block_options: BlockOptions,
    instrument_id: Option<String>,
}

fn open_tcp(addr: impl ToSocketAddrs, config: &Config) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addr.to_socket_addrs()? {
        log::debug!("Connecting to {}", addr);
        match TcpStream::connect_timeout(&addr, config.timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err
        .unwrap_or_else(|| io::Error::new(ErrorKind::InvalidInput, "address did not resolve")))
}

impl ScpiClient<BufReader<TcpStream>> {
    /// Connect with the default [`Config`].
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ScpiError> {
        ScpiClient::connect_with(addr, Config::default())
    }

    /// Open the socket, apply the timeouts and identify the instrument with `*IDN?`.
    pub fn connect_with(addr: impl ToSocketAddrs, config: Config) -> Result<Self, ScpiError> {
        let tcp = open_tcp(addr, &config)?;
        tcp.set_read_timeout(Some(config.timeout))?;
        tcp.set_write_timeout(Some(config.timeout))?;
        tcp.set_nodelay(config.no_delay)?;
        if let Ok(peer) = tcp.peer_addr() {
            log::info!("Connected to instrument at {}", peer);
        }

        let verbose = config.verbose_error_check;
        let mut client = ScpiClient::new(BufReader::new(tcp), config);
        let id = client.identify()?;
        log::info!("Instrument: {}", id);
        if verbose {
            client.enable_verbose_errors()?;
        }
        Ok(client)
    }

    /// Shut the connection down in both directions.
    pub fn close(self) -> Result<(), ScpiError> {
        log::debug!("Closing connection");
        self.channel.get_ref().shutdown(Shutdown::Both)?;
        Ok(())
    }
}

impl<C: ByteChannel> ScpiClient<C> {
    /// Wrap an established channel. No command is sent.
    pub fn new(channel: C, config: Config) -> ScpiClient<C> {
        let block_options = BlockOptions {
            terminator: config.terminator.clone(),
            strict_terminator: config.strict_block_terminator,
            max_len: config.max_block_len,
        };
        ScpiClient {
            channel,
            config,
            block_options,
            instrument_id: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Turn automatic error checking on or off for the rest of the session.
    pub fn set_auto_error_check(&mut self, enabled: bool) {
        self.config.auto_error_check = enabled;
    }

    /// The `*IDN?` response, if the instrument has been identified.
    pub fn instrument_id(&self) -> Option<&str> {
        self.instrument_id.as_deref()
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Query `*IDN?` and remember the answer.
    pub fn identify(&mut self) -> Result<&str, ScpiError> {
        let id = self.query_unchecked("*IDN?")?;
        Ok(self.instrument_id.insert(id).as_str())
    }

    /// Send `SYST:ERR:VERB 1`. Instruments that don't know the command only get their
    /// error queue cleared.
    fn enable_verbose_errors(&mut self) -> Result<(), ScpiError> {
        self.send_command("SYST:ERR:VERB 1")?;
        match self.err_check() {
            Err(ScpiError::Instrument(errors)) => {
                log::debug!("Verbose error messages not supported: {:?}", errors);
                Ok(())
            }
            other => other,
        }
    }

    fn validate(&self, cmd: &str) -> Result<(), ScpiError> {
        let terminator = &self.config.terminator;
        if !terminator.is_empty()
            && cmd
                .as_bytes()
                .windows(terminator.len())
                .any(|w| w == terminator.as_slice())
        {
            return Err(ScpiError::InvalidCommand(format!(
                "{:?} contains the message terminator",
                cmd
            )));
        }
        Ok(())
    }

    fn send_command(&mut self, cmd: &str) -> Result<(), ScpiError> {
        self.validate(cmd)?;
        log::debug!("write: {}", cmd);
        let mut msg = Vec::with_capacity(cmd.len() + self.config.terminator.len());
        msg.extend_from_slice(cmd.as_bytes());
        msg.extend_from_slice(&self.config.terminator);
        self.channel.send(&msg)?;
        Ok(())
    }

    fn query_unchecked(&mut self, cmd: &str) -> Result<String, ScpiError> {
        if !cmd.contains('?') {
            return Err(ScpiError::InvalidCommand(format!(
                "query {:?} must include '?'",
                cmd
            )));
        }
        self.send_command(cmd)?;
        self.read()
    }

    fn auto_check(&mut self) -> Result<(), ScpiError> {
        if self.config.auto_error_check {
            self.err_check()
        } else {
            Ok(())
        }
    }

    /// Send a command.
    pub fn write(&mut self, cmd: &str) -> Result<(), ScpiError> {
        self.send_command(cmd)?;
        self.auto_check()
    }

    /// Read one response line, without the terminator and surrounding whitespace.
    pub fn read(&mut self) -> Result<String, ScpiError> {
        let line = receive_line(&mut self.channel, &self.config.terminator)?;
        let response = decode_text(&line).trim().to_string();
        log::debug!("read: {}", response);
        Ok(response)
    }

    /// Send a query and read its response. The command must contain `?`.
    pub fn query(&mut self, cmd: &str) -> Result<String, ScpiError> {
        let response = self.query_unchecked(cmd)?;
        self.auto_check()?;
        Ok(response)
    }

    /// Send a query whose response is a definite-length block and decode it.
    pub fn query_binary(
        &mut self,
        cmd: &str,
        data_type: impl Into<DataType>,
    ) -> Result<TypedArray, ScpiError> {
        let data_type = data_type.into();
        self.send_command(cmd)?;
        let data = scpi_protocol::read_block(&mut self.channel, data_type, &self.block_options)?;
        log::debug!("query_binary: {} -> {} {} values", cmd, data.len(), data_type);
        self.auto_check()?;
        Ok(data)
    }

    /// Send `prefix` followed by `data` as a definite-length block, in one write.
    ///
    /// The error queue is checked afterwards if `check_errors_after` is set or automatic
    /// error checking is enabled.
    pub fn write_binary(
        &mut self,
        prefix: &str,
        data: &TypedArray,
        order: ByteOrder,
        check_errors_after: bool,
    ) -> Result<(), ScpiError> {
        self.validate(prefix)?;
        let msg = encode_block_with_terminator(prefix, data, order, &self.config.terminator)?;
        log::debug!(
            "write_binary: {} <{} {} values, {} bytes>",
            prefix,
            data.len(),
            data.kind(),
            data.byte_len()
        );
        self.channel.send(&msg)?;
        if check_errors_after && !self.config.auto_error_check {
            self.err_check()
        } else {
            self.auto_check()
        }
    }

    /// Drain the error queue and fail if the instrument reported errors.
    pub fn err_check(&mut self) -> Result<(), ScpiError> {
        check_errors(
            &mut self.channel,
            &self.config.error_check,
            &self.config.terminator,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use scpi_protocol::{ElementKind, ErrorRecord};
    use std::collections::VecDeque;

    /// Answers each terminated command with the next canned response.
    struct Replies {
        replies: VecDeque<&'static [u8]>,
        pending: VecDeque<u8>,
        sent: Vec<u8>,
    }

    impl Replies {
        fn new(replies: &[&'static [u8]]) -> Replies {
            Replies {
                replies: replies.iter().copied().collect(),
                pending: VecDeque::new(),
                sent: Vec::new(),
            }
        }
    }

    impl ByteChannel for Replies {
        fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.sent.extend_from_slice(bytes);
            if bytes.contains(&b'?') {
                if let Some(reply) = self.replies.pop_front() {
                    self.pending.extend(reply);
                }
            }
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending.is_empty() {
                return Err(ErrorKind::WouldBlock.into());
            }
            // Short reads on purpose.
            let n = buf.len().min(3).min(self.pending.len());
            for slot in &mut buf[..n] {
                *slot = self.pending.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    fn client(replies: &[&'static [u8]]) -> ScpiClient<Replies> {
        ScpiClient::new(Replies::new(replies), Config::default())
    }

    #[test]
    fn query_trims_response() {
        let mut scpi = client(&[b"  1\r\n"]);
        assert_eq!(scpi.query("*OPC?").unwrap(), "1");
        assert_eq!(scpi.into_inner().sent, b"*OPC?\n");
    }

    #[test]
    fn query_requires_question_mark() {
        let mut scpi = client(&[]);
        assert!(matches!(scpi.query("*OPC"), Err(ScpiError::InvalidCommand(_))));
        assert!(scpi.into_inner().sent.is_empty());
    }

    #[test]
    fn embedded_terminator_is_rejected() {
        let mut scpi = client(&[]);
        assert!(matches!(
            scpi.write("*RST\n*CLS"),
            Err(ScpiError::InvalidCommand(_))
        ));
    }

    #[test]
    fn identify_stores_id() {
        let mut scpi = client(&[b"Keysight Technologies,M8190A,MY1234,5.0\n"]);
        assert_eq!(scpi.instrument_id(), None);
        scpi.identify().unwrap();
        assert_eq!(
            scpi.instrument_id(),
            Some("Keysight Technologies,M8190A,MY1234,5.0")
        );
    }

    #[test]
    fn query_binary_reads_block() {
        let mut scpi = client(&[b"#14\x00\x01\x00\x02\n"]);
        let data_type = DataType::new(ElementKind::U16, ByteOrder::Big);
        let data = scpi.query_binary("TRAC:DATA?", data_type).unwrap();
        assert_eq!(data, TypedArray::U16(vec![1, 2]));
    }

    #[test]
    fn write_binary_sends_one_message() {
        let mut scpi = client(&[]);
        let data = TypedArray::U8(vec![1, 2, 3, 4]);
        scpi.write_binary("DATA:ARB1 ", &data, ByteOrder::Little, false).unwrap();
        assert_eq!(scpi.into_inner().sent, b"DATA:ARB1 #14\x01\x02\x03\x04\n");
    }

    #[test]
    fn write_binary_checks_errors_on_request() {
        let mut scpi = client(&[b"-222,\"Data out of range\"\n", b"+0,\"No error\"\n"]);
        let result = scpi.write_binary(
            "DATA:ARB1 ",
            &TypedArray::U8(vec![1]),
            ByteOrder::Little,
            true,
        );
        match result {
            Err(ScpiError::Instrument(errors)) => {
                assert_eq!(errors, vec![ErrorRecord::new(-222, "Data out of range")])
            }
            other => panic!("expected Instrument, got {:?}", other),
        }
        let sent = scpi.into_inner().sent;
        assert!(sent.ends_with(b"\nSYST:ERR?\nSYST:ERR?\n"));
    }

    #[test]
    fn auto_error_check_after_write() {
        let mut scpi = client(&[b"+0,\"No error\"\n"]);
        scpi.set_auto_error_check(true);
        scpi.write("*RST").unwrap();
        assert_eq!(scpi.into_inner().sent, b"*RST\nSYST:ERR?\n");
    }

    #[test]
    fn auto_error_check_is_off_by_default() {
        let mut scpi = client(&[]);
        scpi.write("*RST").unwrap();
        assert_eq!(scpi.into_inner().sent, b"*RST\n");
    }

    #[test]
    fn oversized_block_is_rejected() {
        let config = Builder::new().max_block_len(4).config();
        let mut scpi = ScpiClient::new(Replies::new(&[b"#15abcde\n"]), config);
        assert!(matches!(
            scpi.query_binary("CURV?", ElementKind::U8),
            Err(ScpiError::Framing(_))
        ));
    }

    #[test]
    fn crlf_terminator() {
        let config = Config {
            terminator: b"\r\n".to_vec(),
            ..Config::default()
        };
        let replies = Replies::new(&[b"#12ab\r\n", b"0,\"No error\"\r\n"]);
        let mut scpi = ScpiClient::new(replies, config);
        let data = scpi.query_binary("CURV?", ElementKind::U8).unwrap();
        assert_eq!(data, TypedArray::U8(b"ab".to_vec()));
        scpi.err_check().unwrap();
        assert_eq!(scpi.into_inner().sent, b"CURV?\r\nSYST:ERR?\r\n");
    }
}
