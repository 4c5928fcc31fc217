//! Firefox Profiler format converters for Linux `perf` traces.
//!
//! This crate turns CPU sampling traces into the profile document consumed
//! by the Firefox Profiler (see the [`gecko_profile`] crate for the document
//! model):
//!
//! - [`script`] - Convert `perf script` text output
//! - [`events`] - Convert structured, already-symbolized sample events
//!
//! # Example
//!
//! ```no_run
//! use perf_to_gecko::script::ScriptConverter;
//! use std::fs::File;
//! use std::io::{BufReader, BufWriter};
//!
//! let input = BufReader::new(File::open("perf.txt").unwrap());
//! let output = BufWriter::new(File::create("profile.json").unwrap());
//!
//! let mut converter = ScriptConverter::new("my-laptop");
//! converter.parse(input).unwrap();
//! converter.write_profile(output).unwrap();
//! ```

pub mod events;
pub mod script;

// Re-export gecko_profile for convenience
pub use gecko_profile;
