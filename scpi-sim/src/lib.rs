//! # SCPI Instrument Simulator
//!
//! This crate serves a simulated SCPI instrument over a raw TCP socket, so that SCPI
//! clients can be exercised without hardware.
//!
//! ## Overview
//!
//! The crate is built around two main components:
//!
//! - **[`Instrument`] Trait**: Defines how an instrument reacts to a program message.
//! - **[`server::Server`]**: Accepts TCP connections, splits the incoming byte stream into
//!   program messages (including embedded definite-length blocks) and writes the
//!   instrument's responses back.
//!
//! [`instrument::SimInstrument`] is a ready-made instrument with an error queue and
//! named traces that can be written and read as binary blocks.
//!
//! ## How It Works
//!
//! 1. Each program message is read up to the terminator. A `#` starts a definite-length
//!    block, which is read by length rather than by terminator.
//! 2. The message is passed to [`Instrument::handle`].
//! 3. A text response is sent as one line, a block response as `#<N><length><body>\n`,
//!    split into writes of at most [`server::Config::max_chunk`] bytes.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use scpi_sim::{instrument::SimInstrument, server::Server};
//! use scpi_sim::server::Config;
//!
//! let server = Server::new(SimInstrument::default(), Config::default());
//! server.listen("127.0.0.1:5025")?;
//! ```
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics:
//! - Client connections and disconnections
//! - Program messages being processed
//! - Protocol errors in the incoming stream
//!
//! ## Thread Model
//!
//! The server processes one client connection at a time in a single thread, like an
//! instrument with a single SCPI socket.
use std::fmt::Display;

pub mod instrument;
pub mod server;

/// One program message received from a client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProgramMessage {
    /// Command text up to the block or terminator, e.g. `TRAC:DATA? wave1`
    pub text: String,
    /// Body of the definite-length block that followed the text, if any.
    pub block: Option<Vec<u8>>,
}

impl ProgramMessage {
    pub fn new(text: impl Into<String>) -> ProgramMessage {
        ProgramMessage {
            text: text.into(),
            block: None,
        }
    }

    /// The command header, without parameters
    pub fn header(&self) -> &str {
        self.text.split_whitespace().next().unwrap_or("")
    }

    /// Everything after the header, trimmed.
    pub fn parameters(&self) -> &str {
        let text = self.text.trim_start();
        text.split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim())
            .unwrap_or("")
    }

    pub fn is_query(&self) -> bool {
        self.header().ends_with('?')
    }
}

impl Display for ProgramMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)?;
        if let Some(block) = &self.block {
            write!(f, "<{} byte block>", block.len())?;
        }
        Ok(())
    }
}

/// What an instrument sends back for a query.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Text(String),
    Block(Vec<u8>),
}

/// Trait that simulated instruments implement.
///
/// The server calls [`Instrument::handle`] once per program message, in the order received.
pub trait Instrument {
    /// React to one program message.
    ///
    /// # Returns
    ///
    /// The response for queries. `None` sends nothing, which is how real instruments react
    /// to commands, and to queries they could not execute (the client then times out and
    /// is expected to read the error queue).
    fn handle(&self, message: &ProgramMessage) -> Option<Response>;
}

impl<T: Instrument + ?Sized> Instrument for std::sync::Arc<T> {
    fn handle(&self, message: &ProgramMessage) -> Option<Response> {
        (**self).handle(message)
    }
}

/// Compares a received SCPI header against a pattern in SCPI notation.
///
/// Each mnemonic of the pattern is written with its short form in upper case
/// (`SYSTem:ERRor?`), and the received header may use either the short or the long form
/// in any case.
pub fn header_matches(header: &str, pattern: &str) -> bool {
    let header_query = header.ends_with('?');
    let pattern_query = pattern.ends_with('?');
    if header_query != pattern_query {
        return false;
    }
    let header = header.trim_end_matches('?').trim_start_matches(':');
    let pattern = pattern.trim_end_matches('?').trim_start_matches(':');

    let mut received = header.split(':');
    let mut expected = pattern.split(':');
    loop {
        match (received.next(), expected.next()) {
            (None, None) => return true,
            (Some(r), Some(e)) => {
                let short: String = e.chars().filter(|c| !c.is_ascii_lowercase()).collect();
                if !r.eq_ignore_ascii_case(&short) && !r.eq_ignore_ascii_case(e) {
                    return false;
                }
            }
            _ => return false,
        }
    }
}
