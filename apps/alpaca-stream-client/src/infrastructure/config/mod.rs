//! Configuration Module
//!
//! Configuration loading for the stream client.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, DataFeed, DisconnectSettings, QueueSettings, ServerSettings,
    default_initial_symbols, parse_symbol_list,
};
