//! TC command generation.
//!
//! Typed builders producing `tc`, `ip` and `ethtool` argument vectors from
//! compiler descriptors.

pub mod builder;

pub use builder::{Program, TcCommand, TcCommandBuilder, TcObject, TcOperation, TcTarget};
