use std::{
    io::BufReader,
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use scpi_protocol::{ByteChannel, DrainMode, ErrorCheckConfig, ScpiError, codec::MAX_BLOCK_LEN};

use crate::ScpiClient;

pub const DEFAULT_PORT: u16 = 5025;

#[derive(Debug, Clone)]
pub struct Config {
    /// Connect, read and write timeout of the socket
    pub timeout: Duration,
    /// Disable Nagle's algorithm so short commands go out immediately.
    pub no_delay: bool,
    /// Run an error check after every operation.
    pub auto_error_check: bool,
    /// Ask the instrument for verbose error messages (`SYST:ERR:VERB 1`) on connect.
    pub verbose_error_check: bool,
    /// Terminates every command and every response
    pub terminator: Vec<u8>,
    /// Treat anything but the terminator after a block body as an error.
    pub strict_block_terminator: bool,
    /// Largest block body accepted from the instrument, in bytes
    pub max_block_len: usize,
    pub error_check: ErrorCheckConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            no_delay: true,
            auto_error_check: false,
            verbose_error_check: false,
            terminator: b"\n".to_vec(),
            strict_block_terminator: false,
            max_block_len: MAX_BLOCK_LEN,
            error_check: ErrorCheckConfig::default(),
        }
    }
}

/// Builder to create a [ScpiClient] and modify configuration options
///
/// # Example
///
/// ```ignore
/// use scpi_client::Builder;
/// use std::time::Duration;
///
/// let mut awg = Builder::new()
///     .timeout(Duration::from_secs(5))
///     .auto_error_check(true)
///     .connect("192.168.1.20:5025")?;
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the socket connect, read and write timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn no_delay(mut self, no_delay: bool) -> Self {
        self.config.no_delay = no_delay;
        self
    }

    /// Check the error queue after every operation.
    pub fn auto_error_check(mut self, enabled: bool) -> Self {
        self.config.auto_error_check = enabled;
        self
    }

    /// Enable verbose error messages on instruments that support them.
    pub fn verbose_error_check(mut self, enabled: bool) -> Self {
        self.config.verbose_error_check = enabled;
        self
    }

    pub fn terminator(mut self, terminator: &[u8]) -> Self {
        self.config.terminator = terminator.to_vec();
        self
    }

    pub fn strict_block_terminator(mut self, strict: bool) -> Self {
        self.config.strict_block_terminator = strict;
        self
    }

    /// Reject blocks whose header announces more than `len` bytes.
    pub fn max_block_len(mut self, len: usize) -> Self {
        self.config.max_block_len = len;
        self
    }

    /// Set the query used to read the error queue, `SYST:ERR?` by default.
    pub fn error_query(mut self, query: &str) -> Self {
        self.config.error_check.query = query.to_string();
        self
    }

    /// Set the highest number of error queue reads per check.
    pub fn max_error_reads(mut self, max_reads: usize) -> Self {
        self.config.error_check.max_reads = max_reads;
        self
    }

    pub fn drain_mode(mut self, mode: DrainMode) -> Self {
        self.config.error_check.drain_mode = mode;
        self
    }

    /// Accept another "no error" phrasing in error queue responses.
    pub fn no_error_phrase(mut self, phrase: &str) -> Self {
        self.config.error_check.vocabulary.add(phrase);
        self
    }

    pub fn config(self) -> Config {
        self.config
    }

    /// Connect to an instrument over TCP.
    pub fn connect(
        self,
        addr: impl ToSocketAddrs,
    ) -> Result<ScpiClient<BufReader<TcpStream>>, ScpiError> {
        ScpiClient::connect_with(addr, self.config)
    }

    /// Build a client on top of an already established channel.
    pub fn build<C: ByteChannel>(self, channel: C) -> ScpiClient<C> {
        ScpiClient::new(channel, self.config)
    }
}

#[test]
fn builder_sets_options() {
    let config = Builder::new()
        .timeout(Duration::from_millis(250))
        .auto_error_check(true)
        .terminator(b"\r\n")
        .max_error_reads(3)
        .max_block_len(4096)
        .drain_mode(DrainMode::FirstError)
        .no_error_phrase("Queue is empty")
        .config();
    assert_eq!(config.timeout, Duration::from_millis(250));
    assert!(config.auto_error_check);
    assert!(config.no_delay);
    assert_eq!(config.terminator, b"\r\n");
    assert_eq!(config.error_check.max_reads, 3);
    assert_eq!(config.max_block_len, 4096);
    assert_eq!(config.error_check.drain_mode, DrainMode::FirstError);
    assert!(config.error_check.vocabulary.matches("queue is empty."));
}
