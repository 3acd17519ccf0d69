//! nutricycle-server: process wiring for a NutriCycle detection node
//!
//! Loads configuration, builds the shared application context, spawns the
//! stream producer, event broadcaster and announce loop, and serves the
//! command, health and preview endpoints over HTTP.

pub mod cli;
pub mod config;
pub mod context;
pub mod http;
pub mod startup;
pub mod transport;

pub use cli::Cli;
pub use config::{ConfigError, HttpConfig, NodeConfig};
pub use context::AppContext;
pub use http::{create_router, ApiState, ErrorResponse};
pub use startup::{connect_broker, start, start_with, RunningNode};
pub use transport::{Connection, ConnectionRegistry, ConnectionState, FrameHub, TransportError};
