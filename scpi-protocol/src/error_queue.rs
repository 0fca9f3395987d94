//! Draining and classifying the instrument's error queue.
//!
//! The queue is read with `SYST:ERR?` until the instrument reports that it is empty.
//! Vendors phrase "empty" differently, so the accepted phrasings are configurable, and
//! the number of reads is always capped so a queue that never reports empty cannot
//! stall the caller.
use std::fmt::Display;

use crate::{
    channel::{ByteChannel, decode_text, receive_line_limited},
    error::ScpiError,
};

pub const DEFAULT_ERROR_QUERY: &str = "SYST:ERR?";
pub const DEFAULT_MAX_READS: usize = 64;
/// Error queue entries are short. Longer responses are not error queue entries.
pub const MAX_RESPONSE_LEN: usize = 4096;

/// One entry of the instrument's error queue.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorRecord {
    pub code: i32,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(code: i32, message: impl Into<String>) -> ErrorRecord {
        ErrorRecord {
            code,
            message: message.into(),
        }
    }

    /// Parses `<code>,<message>` where the message may be quoted.
    pub fn parse(line: &str) -> Result<ErrorRecord, ScpiError> {
        let line = line.trim();
        let (code, message) = line.split_once(',').ok_or_else(|| {
            ScpiError::Protocol(format!("malformed error queue response {:?}", line))
        })?;
        let code = code.trim().parse::<i32>().map_err(|_| {
            ScpiError::Protocol(format!("invalid error code in response {:?}", line))
        })?;
        let message = message.trim();
        let message = message
            .strip_prefix('"')
            .and_then(|m| m.strip_suffix('"'))
            .unwrap_or(message);
        Ok(ErrorRecord::new(code, message))
    }
}

impl Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},\"{}\"", self.code, self.message)
    }
}

/// Reduces a message to lowercase words separated by single spaces.
fn normalize(message: &str) -> String {
    message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// The messages that, together with code 0, mean the queue is empty.
///
/// Comparison ignores case, punctuation and spacing, so `No error`, `NO ERROR.` and
/// `No  error` are the same phrasing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NoErrorVocabulary {
    phrases: Vec<String>,
}

impl NoErrorVocabulary {
    pub fn new<S: AsRef<str>>(phrases: impl IntoIterator<Item = S>) -> NoErrorVocabulary {
        let mut vocabulary = NoErrorVocabulary {
            phrases: Vec::new(),
        };
        for phrase in phrases {
            vocabulary.add(phrase.as_ref());
        }
        vocabulary
    }

    /// Accept another phrasing.
    pub fn add(&mut self, phrase: &str) {
        let phrase = normalize(phrase);
        if !self.phrases.contains(&phrase) {
            self.phrases.push(phrase);
        }
    }

    pub fn matches(&self, message: &str) -> bool {
        let message = normalize(message);
        self.phrases.iter().any(|p| *p == message)
    }

    /// Whether `record` reports an empty queue.
    pub fn is_empty_queue(&self, record: &ErrorRecord) -> bool {
        record.code == 0 && self.matches(&record.message)
    }
}

impl Default for NoErrorVocabulary {
    fn default() -> Self {
        NoErrorVocabulary::new([
            "No error",
            "No errors",
            "No events to report - queue empty",
            "No events to report",
        ])
    }
}

/// What to do once the first real error has been read.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DrainMode {
    /// Report the first error and leave the rest in the queue.
    FirstError,
    /// Keep reading until the queue is empty and report every error.
    #[default]
    Drain,
}

#[derive(Clone, Debug)]
pub struct ErrorCheckConfig {
    /// The query that pops one entry off the queue.
    pub query: String,
    /// Upper bound on queue reads per check. Values below 1 are treated as 1.
    pub max_reads: usize,
    pub drain_mode: DrainMode,
    pub vocabulary: NoErrorVocabulary,
}

impl Default for ErrorCheckConfig {
    fn default() -> Self {
        Self {
            query: DEFAULT_ERROR_QUERY.to_string(),
            max_reads: DEFAULT_MAX_READS,
            drain_mode: DrainMode::default(),
            vocabulary: NoErrorVocabulary::default(),
        }
    }
}

/// Result of feeding one queue response into [`ErrorQueueDrain`].
#[derive(Debug)]
pub enum Step {
    /// Send the query again and feed the next response.
    Query,
    /// The check is over.
    Done(Result<(), ScpiError>),
}

/// The error check as a state machine, independent of any I/O.
///
/// Every fed response is classified. The machine finishes on an empty queue, on a
/// malformed response, at the first error in [`DrainMode::FirstError`], or once
/// [`ErrorCheckConfig::max_reads`] responses have been fed.
#[derive(Debug)]
pub struct ErrorQueueDrain<'a> {
    config: &'a ErrorCheckConfig,
    reads: usize,
    errors: Vec<ErrorRecord>,
}

impl<'a> ErrorQueueDrain<'a> {
    pub fn new(config: &'a ErrorCheckConfig) -> ErrorQueueDrain<'a> {
        ErrorQueueDrain {
            config,
            reads: 0,
            errors: Vec::new(),
        }
    }

    /// Number of responses fed so far
    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn feed(&mut self, response: &str) -> Step {
        self.reads += 1;
        let record = match ErrorRecord::parse(response) {
            Ok(record) => record,
            Err(e) => return Step::Done(Err(e)),
        };

        if self.config.vocabulary.is_empty_queue(&record) {
            log::debug!("Error queue empty after {} reads", self.reads);
            return Step::Done(self.finish());
        }

        log::error!("Instrument error: {}", record);
        self.errors.push(record);

        if self.config.drain_mode == DrainMode::FirstError {
            return Step::Done(self.finish());
        }
        if self.reads >= self.config.max_reads.max(1) {
            return Step::Done(Err(ScpiError::Protocol(format!(
                "error queue did not report empty after {} reads ({} errors read)",
                self.reads,
                self.errors.len()
            ))));
        }
        Step::Query
    }

    fn finish(&mut self) -> Result<(), ScpiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ScpiError::Instrument(std::mem::take(&mut self.errors)))
        }
    }
}

/// Runs the error check over `channel`.
///
/// `terminator` ends both the query and each response line.
pub fn check_errors(
    channel: &mut impl ByteChannel,
    config: &ErrorCheckConfig,
    terminator: &[u8],
) -> Result<(), ScpiError> {
    let mut query = config.query.as_bytes().to_vec();
    query.extend_from_slice(terminator);

    let mut drain = ErrorQueueDrain::new(config);
    loop {
        channel.send(&query)?;
        let line = match receive_line_limited(channel, terminator, MAX_RESPONSE_LEN) {
            Ok(line) => line,
            Err(ScpiError::Framing(reason)) => return Err(ScpiError::Protocol(reason)),
            Err(e) => return Err(e),
        };
        let line = decode_text(&line);
        log::trace!("Error queue response: {}", line);
        if let Step::Done(result) = drain.feed(&line) {
            return result;
        }
    }
}
