//! # Simulated Instrument
//!
//! A small in-memory instrument that understands the common IEEE 488.2 commands, keeps
//! an error queue, and stores named traces that can be loaded and read back as
//! definite-length blocks.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `*IDN?` | identification string |
//! | `*RST` | delete all traces |
//! | `*CLS` | clear the error queue |
//! | `*OPC?` | `1` |
//! | `SYSTem:ERRor[:NEXT]?` | pop the oldest error, or the "no error" response |
//! | `SYSTem:ERRor:VERBose 0\|1` | append the offending command to error messages |
//! | `TRACe[:DATA] <name>,<block>` | store a trace |
//! | `TRACe[:DATA]? <name>` | return a stored trace as a block |
//! | `TRACe:CATalog?` | comma-separated trace names |
//!
//! Anything else queues `-113,"Undefined header"`.
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Mutex, MutexGuard},
};

use scpi_protocol::ErrorRecord;

use crate::{Instrument, ProgramMessage, Response, header_matches};

/// Instruments keep a bounded error queue and replace the newest entry on overflow.
pub const ERROR_QUEUE_LEN: usize = 30;

#[derive(Debug, Default)]
struct State {
    errors: VecDeque<ErrorRecord>,
    traces: BTreeMap<String, Vec<u8>>,
    verbose: bool,
}

#[derive(Debug)]
pub struct SimInstrument {
    id: String,
    no_error: String,
    state: Mutex<State>,
}

impl Default for SimInstrument {
    fn default() -> Self {
        SimInstrument::new("SCPI-RS,Simulated Instrument,0,0.1.0")
    }
}

impl SimInstrument {
    pub fn new(id: impl Into<String>) -> SimInstrument {
        SimInstrument {
            id: id.into(),
            no_error: "+0,\"No error\"".to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Set the response for an empty error queue, to emulate another vendor's dialect.
    pub fn with_no_error_response(mut self, response: impl Into<String>) -> SimInstrument {
        self.no_error = response.into();
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // State stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an error as if the instrument had detected it.
    pub fn push_error(&self, record: ErrorRecord) {
        let mut state = self.state();
        if state.errors.len() >= ERROR_QUEUE_LEN {
            state.errors.pop_back();
            state.errors.push_back(ErrorRecord::new(-350, "Queue overflow"));
        } else {
            state.errors.push_back(record);
        }
    }

    pub fn pending_errors(&self) -> Vec<ErrorRecord> {
        self.state().errors.iter().cloned().collect()
    }

    /// A copy of a stored trace
    pub fn trace(&self, name: &str) -> Option<Vec<u8>> {
        self.state().traces.get(name).cloned()
    }

    pub fn set_trace(&self, name: &str, data: Vec<u8>) {
        self.state().traces.insert(name.to_string(), data);
    }

    fn command_error(&self, code: i32, message: &str, command: &ProgramMessage) {
        let verbose = self.state().verbose;
        let message = if verbose {
            format!("{};{}", message, command.text)
        } else {
            message.to_string()
        };
        log::debug!("Queueing error {},{}", code, message);
        self.push_error(ErrorRecord::new(code, message));
    }

    fn next_error(&self) -> String {
        match self.state().errors.pop_front() {
            Some(record) => format!("{:+},\"{}\"", record.code, record.message),
            None => self.no_error.clone(),
        }
    }

    fn store_trace(&self, message: &ProgramMessage) {
        let name = message.parameters().trim_end_matches(',').trim();
        match (&message.block, name.is_empty()) {
            (_, true) | (None, _) => self.command_error(-109, "Missing parameter", message),
            (Some(block), false) => self.set_trace(name, block.clone()),
        }
    }

    fn read_trace(&self, message: &ProgramMessage) -> Option<Response> {
        match self.trace(message.parameters()) {
            Some(data) => Some(Response::Block(data)),
            None => {
                self.command_error(-224, "Illegal parameter value", message);
                None
            }
        }
    }
}

impl Instrument for SimInstrument {
    fn handle(&self, message: &ProgramMessage) -> Option<Response> {
        let header = message.header();
        if header_matches(header, "*IDN?") {
            Some(Response::Text(self.id.clone()))
        } else if header_matches(header, "*RST") {
            self.state().traces.clear();
            None
        } else if header_matches(header, "*CLS") {
            self.state().errors.clear();
            None
        } else if header_matches(header, "*OPC?") {
            Some(Response::Text("1".to_string()))
        } else if header_matches(header, "SYSTem:ERRor?")
            || header_matches(header, "SYSTem:ERRor:NEXT?")
        {
            Some(Response::Text(self.next_error()))
        } else if header_matches(header, "SYSTem:ERRor:VERBose") {
            match message.parameters() {
                "1" | "ON" | "on" => self.state().verbose = true,
                "0" | "OFF" | "off" => self.state().verbose = false,
                _ => self.command_error(-224, "Illegal parameter value", message),
            }
            None
        } else if header_matches(header, "TRACe:CATalog?") {
            let names = self.state().traces.keys().cloned().collect::<Vec<_>>();
            Some(Response::Text(names.join(",")))
        } else if header_matches(header, "TRACe") || header_matches(header, "TRACe:DATA") {
            self.store_trace(message);
            None
        } else if header_matches(header, "TRACe?") || header_matches(header, "TRACe:DATA?") {
            self.read_trace(message)
        } else {
            self.command_error(-113, "Undefined header", message);
            None
        }
    }
}
