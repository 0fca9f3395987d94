//! Shared fixtures for the integration tests.
use std::{
    net::{SocketAddr, TcpListener},
    thread,
    time::Duration,
};

use scpi_client::{Builder, ScpiClient};
use scpi_sim::{Instrument, server};

/// Serve `instrument` on an ephemeral local port from a background thread.
///
/// Responses are written in pieces of at most `max_chunk` bytes.
pub fn spawn_simulator<T>(instrument: T, max_chunk: usize) -> SocketAddr
where
    T: Instrument + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let sim = server::Builder::new()
        .max_chunk(max_chunk)
        .rw_timeout(Duration::from_secs(5))
        .build(instrument);
    thread::spawn(move || sim.serve(listener));
    addr
}

/// A client builder with a timeout short enough for tests that expect one.
pub fn client_builder() -> Builder {
    Builder::new().timeout(Duration::from_millis(300))
}

pub fn connect<T>(instrument: T, max_chunk: usize) -> ScpiClient
where
    T: Instrument + Send + 'static,
{
    let addr = spawn_simulator(instrument, max_chunk);
    client_builder().connect(addr).unwrap()
}
