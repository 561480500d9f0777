//! Library crate for netsweep: LAN sweep and port-range scanning engines.
pub mod command;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod gauge;
pub mod lan;
pub mod logging;
pub mod netdetect;
pub mod port_scan;
pub mod ports;
pub mod probe;
pub mod resolve;
pub mod server;
pub mod service;
pub mod store;
pub mod types;
