use std::{
    error::Error,
    fmt::Display,
    io::{self, ErrorKind},
};

use crate::error_queue::ErrorRecord;

/// Errors that may occur while exchanging SCPI messages with an instrument.
///
/// Transport problems ([`ScpiError::IoError`], [`ScpiError::Timeout`]) are kept apart from
/// data problems ([`ScpiError::Framing`], [`ScpiError::Decoding`]) and from the
/// error queue outcome ([`ScpiError::Protocol`], [`ScpiError::Instrument`]).
#[derive(Debug)]
pub enum ScpiError {
    IoError(io::Error),
    /// The channel did not deliver the expected bytes within its timeout.
    Timeout(io::Error),
    /// The `#<N><digits>` header does not follow the definite-length block grammar, or a
    /// response never reached its terminator.
    Framing(String),
    /// The block body cannot be reinterpreted as the requested datatype.
    Decoding(String),
    /// The payload cannot be represented as a definite-length block.
    Encoding(String),
    /// The error check handshake itself broke down.
    Protocol(String),
    /// The instrument reported one or more errors.
    Instrument(Vec<ErrorRecord>),
    /// The caller passed a command that cannot be sent as requested.
    InvalidCommand(String),
}

impl ScpiError {
    /// Returns `true` for failures of the channel itself.
    ///
    /// After these, and after [`ScpiError::Framing`], the read position in the stream is
    /// unknown and the connection should be re-established before further exchanges.
    pub fn is_transport(&self) -> bool {
        matches!(self, ScpiError::IoError(_) | ScpiError::Timeout(_))
    }
}

/// Socket reads that hit their timeout report `WouldBlock` on Unix and `TimedOut` on Windows.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

impl From<io::Error> for ScpiError {
    fn from(value: io::Error) -> Self {
        if is_timeout(&value) {
            ScpiError::Timeout(value)
        } else {
            ScpiError::IoError(value)
        }
    }
}

impl Display for ScpiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScpiError::IoError(error) => write!(f, "{}", error),
            ScpiError::Timeout(error) => write!(f, "Timed out waiting for instrument: {}", error),
            ScpiError::Framing(reason) => write!(f, "Framing error: {}", reason),
            ScpiError::Decoding(reason) => write!(f, "Invalid block data: {}", reason),
            ScpiError::Encoding(reason) => write!(f, "Cannot encode block: {}", reason),
            ScpiError::Protocol(reason) => write!(f, "Error check failed: {}", reason),
            ScpiError::Instrument(records) => {
                write!(f, "Instrument reported ")?;
                if records.len() == 1 {
                    write!(f, "error ")?;
                } else {
                    write!(f, "{} errors: ", records.len())?;
                }
                for (i, record) in records.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", record)?;
                }
                Ok(())
            }
            ScpiError::InvalidCommand(cmd) => write!(f, "Invalid command: {}", cmd),
        }
    }
}

impl Error for ScpiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ScpiError::IoError(error) | ScpiError::Timeout(error) => Some(error),
            _ => None,
        }
    }
}

#[test]
fn timeouts_are_classified() {
    let err: ScpiError = io::Error::from(ErrorKind::WouldBlock).into();
    assert!(matches!(err, ScpiError::Timeout(_)));
    let err: ScpiError = io::Error::from(ErrorKind::TimedOut).into();
    assert!(matches!(err, ScpiError::Timeout(_)));
    let err: ScpiError = io::Error::from(ErrorKind::ConnectionReset).into();
    assert!(matches!(err, ScpiError::IoError(_)));
    assert!(err.is_transport());
}

#[test]
fn instrument_error_display() {
    let err = ScpiError::Instrument(vec![
        ErrorRecord::new(-113, "Undefined header"),
        ErrorRecord::new(-222, "Data out of range"),
    ]);
    assert_eq!(
        err.to_string(),
        "Instrument reported 2 errors: -113,\"Undefined header\"; -222,\"Data out of range\""
    );
}
