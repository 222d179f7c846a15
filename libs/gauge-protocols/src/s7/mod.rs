//! Siemens S7 protocol support

pub mod client;

pub use client::S7Client;
