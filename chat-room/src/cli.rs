use std::{net::SocketAddr, sync::Arc};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    config::RoomConfig,
    connection::DEFAULT_QUEUE_CAPACITY,
    hub::DEFAULT_INTAKE_CAPACITY,
    trace::{self, LogTracer, Tracer, WriterTracer},
    transport::DEFAULT_MAX_MESSAGE_SIZE,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat room, serving WebSocket clients and optionally raw TCP clients.
    Serve(ServeArgs),
    /// Connect to a room's TCP listener and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address of the HTTP server. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Also accept newline-delimited TCP clients on this address.
    #[arg(long)]
    pub tcp: Option<SocketAddr>,

    /// Messages buffered per client before the client is evicted.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Pending joins, leaves and messages the room accepts before callers wait.
    #[arg(long, default_value_t = DEFAULT_INTAKE_CAPACITY)]
    pub intake_capacity: usize,

    /// Largest message accepted from a client, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Where room events (joins, leaves, deliveries) are traced.
    #[arg(long, value_enum, default_value_t = TraceMode::Log)]
    pub trace: TraceMode,
}

impl ServeArgs {
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            queue_capacity: self.queue_capacity,
            intake_capacity: self.intake_capacity,
            max_message_size: self.max_message_size,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// Discard room events.
    Off,
    /// Print one line per room event on stdout.
    Stdout,
    /// Emit room events through the log output.
    Log,
}

impl TraceMode {
    pub fn tracer(self) -> Arc<dyn Tracer> {
        match self {
            TraceMode::Off => trace::off(),
            TraceMode::Stdout => Arc::new(WriterTracer::stdout()),
            TraceMode::Log => Arc::new(LogTracer),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// TCP address of the room to connect to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,
}
