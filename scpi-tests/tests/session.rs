use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use scpi_protocol::{
    ByteOrder, DataType, DrainMode, ElementKind, ErrorRecord, ScpiError, TypedArray,
};
use scpi_sim::{Instrument, ProgramMessage, Response, header_matches, instrument::SimInstrument};
use scpi_tests::{client_builder, connect, spawn_simulator};

#[test]
fn identifies_on_connect() {
    let client = connect(SimInstrument::new("ACME,AWG1000,1234,1.0"), usize::MAX);
    assert_eq!(client.instrument_id(), Some("ACME,AWG1000,1234,1.0"));
    client.close().unwrap();
}

#[test]
fn text_queries() {
    let mut client = connect(SimInstrument::default(), 3);
    client.write("*RST").unwrap();
    assert_eq!(client.query("*OPC?").unwrap(), "1");
    assert!(matches!(client.query("*RST"), Err(ScpiError::InvalidCommand(_))));
}

#[test]
fn trace_round_trip_with_fragmented_responses() {
    let samples: Vec<i16> = (0..1000).map(|i| (i * 37 - 16000) as i16).collect();
    let data = TypedArray::I16(samples);
    for chunk in [1, 7, 1460, usize::MAX] {
        let mut client = connect(SimInstrument::default(), chunk);
        client
            .write_binary("TRAC:DATA wave1,", &data, ByteOrder::Big, true)
            .unwrap();
        let back = client
            .query_binary("TRAC:DATA? wave1", DataType::new(ElementKind::I16, ByteOrder::Big))
            .unwrap();
        assert_eq!(back, data, "chunk size {}", chunk);
        // Nothing of the block may be left over for the next exchange.
        assert_eq!(client.query("*OPC?").unwrap(), "1");
    }
}

#[test]
fn float_trace_is_read_in_requested_byte_order() {
    let sim = Arc::new(SimInstrument::default());
    sim.set_trace("fdata", [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect());
    let mut client = connect(sim, 5);
    let trace = client
        .query_binary("TRAC? fdata", ElementKind::F32)
        .unwrap();
    assert_eq!(trace, TypedArray::F32(vec![1.5, -2.0]));
}

#[test]
fn empty_block_round_trip() {
    let mut client = connect(SimInstrument::default(), usize::MAX);
    client
        .write_binary(
            "TRAC:DATA empty,",
            &TypedArray::empty(ElementKind::F64),
            ByteOrder::Little,
            true,
        )
        .unwrap();
    let back = client.query_binary("TRAC:DATA? empty", ElementKind::F64).unwrap();
    assert!(back.is_empty());
}

#[test]
fn undefined_header_is_reported() {
    let mut client = connect(SimInstrument::default(), usize::MAX);
    client.write("FREQ:BOGUS 10").unwrap();
    match client.err_check() {
        Err(ScpiError::Instrument(errors)) => {
            assert_eq!(errors, vec![ErrorRecord::new(-113, "Undefined header")])
        }
        other => panic!("expected instrument error, got {:?}", other),
    }
    client.err_check().unwrap();
}

#[test]
fn vendor_no_error_phrasings() {
    for response in [
        "+0,\"No error\"",
        "0,\"No Error.\"",
        "+0,\"No errors\"",
        "0,\"No events to report - queue empty\"",
        "0,No error",
    ] {
        let sim = SimInstrument::default().with_no_error_response(response);
        let mut client = connect(sim, usize::MAX);
        client.err_check().unwrap_or_else(|e| panic!("{}: {}", response, e));
    }
}

#[test]
fn drains_every_queued_error() {
    let sim = Arc::new(SimInstrument::default());
    sim.push_error(ErrorRecord::new(-222, "Data out of range"));
    sim.push_error(ErrorRecord::new(-350, "Queue overflow"));
    let mut client = connect(sim.clone(), usize::MAX);
    match client.err_check() {
        Err(ScpiError::Instrument(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("expected instrument error, got {:?}", other),
    }
    assert!(sim.pending_errors().is_empty());
}

#[test]
fn first_error_mode_leaves_the_rest_queued() {
    let sim = Arc::new(SimInstrument::default());
    sim.push_error(ErrorRecord::new(-222, "Data out of range"));
    sim.push_error(ErrorRecord::new(-350, "Queue overflow"));
    let addr = spawn_simulator(sim.clone(), usize::MAX);
    let mut client = client_builder()
        .drain_mode(DrainMode::FirstError)
        .connect(addr)
        .unwrap();
    match client.err_check() {
        Err(ScpiError::Instrument(errors)) => {
            assert_eq!(errors, vec![ErrorRecord::new(-222, "Data out of range")])
        }
        other => panic!("expected instrument error, got {:?}", other),
    }
    assert_eq!(sim.pending_errors().len(), 1);
}

/// Answers every error query with an error and never reports an empty queue.
#[derive(Default)]
struct StuckQueue {
    reads: AtomicUsize,
}

impl Instrument for StuckQueue {
    fn handle(&self, message: &ProgramMessage) -> Option<Response> {
        if header_matches(message.header(), "*IDN?") {
            Some(Response::Text("ACME,STUCK,0,0".to_string()))
        } else if header_matches(message.header(), "SYSTem:ERRor?") {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Some(Response::Text("-300,\"Device-specific error\"".to_string()))
        } else {
            None
        }
    }
}

#[test]
fn error_check_stops_at_the_read_cap() {
    let stuck = Arc::new(StuckQueue::default());
    let addr = spawn_simulator(stuck.clone(), usize::MAX);
    let mut client = client_builder().max_error_reads(5).connect(addr).unwrap();
    assert!(matches!(client.err_check(), Err(ScpiError::Protocol(_))));
    assert_eq!(stuck.reads.load(Ordering::SeqCst), 5);
}

#[test]
fn failed_query_times_out_and_error_is_queued() {
    let mut client = connect(SimInstrument::default(), usize::MAX);
    let result = client.query_binary("TRAC:DATA? missing", ElementKind::U8);
    assert!(matches!(result, Err(ScpiError::Timeout(_))), "{:?}", result);
    match client.err_check() {
        Err(ScpiError::Instrument(errors)) => {
            assert_eq!(errors, vec![ErrorRecord::new(-224, "Illegal parameter value")])
        }
        other => panic!("expected instrument error, got {:?}", other),
    }
}

#[test]
fn automatic_error_check() {
    let addr = spawn_simulator(SimInstrument::default(), usize::MAX);
    let mut client = client_builder().auto_error_check(true).connect(addr).unwrap();
    client.write("*CLS").unwrap();
    assert!(matches!(client.write("NOT:A:COMMAND"), Err(ScpiError::Instrument(_))));
    client.set_auto_error_check(false);
    client.write("NOT:A:COMMAND").unwrap();
}

#[test]
fn verbose_error_messages() {
    let addr = spawn_simulator(SimInstrument::default(), usize::MAX);
    let mut client = client_builder().verbose_error_check(true).connect(addr).unwrap();
    client.write("NOT:A:COMMAND").unwrap();
    match client.err_check() {
        Err(ScpiError::Instrument(errors)) => {
            assert_eq!(errors[0].message, "Undefined header;NOT:A:COMMAND")
        }
        other => panic!("expected instrument error, got {:?}", other),
    }
}
