//! dx-bridge - A Rust bridge streaming DX cluster spots to WebSocket subscribers.
//!
//! This crate provides:
//! - A telnet sanitizer and nom-based parser for DX cluster spot lines
//! - A supervised cluster session with login handshake and reconnect backoff
//! - A WebSocket fan-out that isolates slow subscribers from the feed
//!
//! # Example
//!
//! ```rust
//! use dx_bridge::parser::parse_spot;
//! use dx_bridge::telnet::sanitize;
//!
//! let raw = b"DX de W1AW: 14074.0 JA1ABC FT8 good signal\r\n";
//! let line = sanitize(raw);
//! let spot = parse_spot(line.trim()).expect("a spot announcement");
//!
//! assert_eq!(spot.freq_hz, 14_074_000);
//! assert_eq!(spot.band, "20m");
//! ```

pub mod backoff;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod parser;
pub mod server;
pub mod spot;
pub mod stats;
pub mod telnet;

pub use backoff::Backoff;
pub use broadcast::SubscriberRegistry;
pub use client::{ClusterClient, ClusterEvent, SessionEnd, SessionError};
pub use config::Config;
pub use parser::{looks_like_spot, parse_spot};
pub use spot::{Mode, Spot, band_for_freq};
pub use stats::{BridgeStats, StatsSummary};
