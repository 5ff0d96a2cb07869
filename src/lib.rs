//! # Funding Sniper
//!
//! A Rust service that monitors perpetual-futures funding rates on Bybit and
//! places timed orders around funding-rate settlement events.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Bybit v5 API client (REST + WebSocket) and paper exchange
//! - `schedule`: Funding settlement schedule and countdown arithmetic
//! - `engine`: Funding-window entry/exit state machine
//! - `scanner`: Funding-rate leaderboard across all linear perpetuals
//! - `persistence`: SQLite trade journal
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod engine;
pub mod exchange;
pub mod persistence;
pub mod scanner;
pub mod schedule;
pub mod utils;

pub use config::Config;
