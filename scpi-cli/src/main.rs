//! # SCPI Command Line Tool
//!
//! Sends commands to an instrument listening on a raw SCPI socket, transfers binary blocks
//! and reads the error queue. The `sim` subcommand serves a simulated instrument instead,
//! which is handy for trying out the other subcommands without hardware.
use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::{Parser, Subcommand};
use env_logger::Env;
use scpi_client::{Builder, DEFAULT_PORT, ScpiClient};
use scpi_protocol::{ByteOrder, DataType, ElementKind, TypedArray};
use scpi_sim::{instrument::SimInstrument, server};

#[derive(Subcommand, Eq, PartialEq, Clone)]
enum Command {
    /// Print the instrument identification
    Idn,
    /// Send a command without reading a response
    Write { cmd: String },
    /// Send a query and print the response
    Query { cmd: String },
    /// Send a query and print the definite-length block it returns
    QueryBinary {
        cmd: String,
        #[arg(
            short,
            long,
            help = "Element type, e.g. f64, i16 or a struct letter such as 'h'",
            default_value = "u8"
        )]
        datatype: ElementKind,
        #[arg(long)]
        big_endian: bool,
    },
    /// Send values as a definite-length block after a command prefix
    WriteBinary {
        prefix: String,
        #[arg(short, long, default_value = "u8")]
        datatype: ElementKind,
        #[arg(long)]
        big_endian: bool,
        #[arg(
            allow_hyphen_values = true,
            help = "Values to send, converted to the element type"
        )]
        values: Vec<String>,
    },
    /// Read the error queue until it is empty
    ErrCheck,
    /// Serve a simulated instrument
    Sim {
        #[arg(short, long, default_value = "127.0.0.1")]
        ip: IpAddr,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(
            short,
            long,
            help = "Write responses in pieces of at most this many bytes"
        )]
        chunk: Option<usize>,
    },
}

#[derive(Parser)]
#[command(about = "Control SCPI instruments over a raw TCP socket", long_about = None)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, help = "Socket timeout in milliseconds", default_value = "10000")]
    timeout_ms: u64,

    #[arg(long, help = "Check the error queue after every command")]
    auto_err_check: bool,

    #[clap(subcommand)]
    command: Command,
}

fn byte_order(big_endian: bool) -> ByteOrder {
    if big_endian {
        ByteOrder::Big
    } else {
        ByteOrder::Little
    }
}

fn run_simulator(ip: IpAddr, port: u16, chunk: Option<usize>) -> Result<(), Box<dyn Error>> {
    let addr = SocketAddr::new(ip, port);
    let mut builder = server::Builder::new();
    if let Some(chunk) = chunk {
        log::info!("Fragmenting responses into {} byte writes", chunk);
        builder = builder.max_chunk(chunk);
    }
    let sim = builder.build(SimInstrument::default());
    sim.listen(addr)
}

fn run_command(client: &mut ScpiClient, command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Idn => println!("{}", client.instrument_id().unwrap_or_default()),
        Command::Write { cmd } => client.write(&cmd)?,
        Command::Query { cmd } => println!("{}", client.query(&cmd)?),
        Command::QueryBinary {
            cmd,
            datatype,
            big_endian,
        } => {
            let data = client.query_binary(&cmd, DataType::new(datatype, byte_order(big_endian)))?;
            log::info!("Received {} values ({} bytes)", data.len(), data.byte_len());
            println!("{}", data);
        }
        Command::WriteBinary {
            prefix,
            datatype,
            big_endian,
            values,
        } => {
            let data = TypedArray::parse(datatype, values.as_slice())?;
            client.write_binary(&prefix, &data, byte_order(big_endian), true)?;
            log::info!("Sent {} values ({} bytes)", data.len(), data.byte_len());
        }
        Command::ErrCheck => {
            client.err_check()?;
            println!("No errors");
        }
        Command::Sim { .. } => return Err("the simulator does not need a connection".into()),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Command::Sim { ip, port, chunk } = args.command {
        log::info!("Starting simulated instrument");
        return run_simulator(ip, port, chunk);
    }

    let addr = format!("{}:{}", args.host, args.port);
    log::debug!(
        "Connecting to {} (timeout {} ms, auto error check {})",
        addr,
        args.timeout_ms,
        args.auto_err_check
    );
    let mut client = Builder::new()
        .timeout(Duration::from_millis(args.timeout_ms))
        .auto_error_check(args.auto_err_check)
        .connect(addr.as_str())?;
    log::info!("Connected to {}", client.instrument_id().unwrap_or("unknown instrument"));

    run_command(&mut client, args.command)?;
    client.close()?;
    Ok(())
}
