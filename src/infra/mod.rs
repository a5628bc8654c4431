//! Infrastructure layer
//!
//! Handles all I/O operations: network, external processes, and byte-level
//! (de)compression. This module is the only place where side effects occur.

pub mod compress;
pub mod decompress;
pub mod download;
pub mod runner;
