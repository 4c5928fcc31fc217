//! Convert structured sample events to the Firefox Profiler format.
//!
//! This module consumes already-parsed, already-symbolized sample events
//! (the shape a tracing tool's scripting interface hands over) and feeds
//! them into a profile session. Call chains arrive innermost frame first and
//! are reversed before interning so the outermost caller becomes the root of
//! the stack tree.

use gecko_profile::{Profile, ProfileBuilder, WriteResult};
use std::io::Write;

/// Placeholder used when a flat symbol or module name is missing.
const UNKNOWN: &str = "[unknown]";

/// One entry of a sampled call chain.
#[derive(Debug, Clone, Default)]
pub struct CallFrame {
    /// Resolved symbol name. Entries without one contribute no frame.
    pub symbol: Option<String>,
    /// Module or library the address resolved into.
    pub dso: String,
}

/// One sample event from a structured trace source.
#[derive(Debug, Clone, Default)]
pub struct SampleEvent {
    pub pid: u32,
    pub tid: u32,
    /// Thread name (comm).
    pub comm: String,
    /// Timestamp in the source's native nanosecond clock.
    pub time_ns: u64,
    /// Call chain, innermost frame first. Empty means unavailable.
    pub callchain: Vec<CallFrame>,
    /// Flat symbol of the sampled address, for the no-callchain fallback.
    pub symbol: Option<String>,
    /// Flat module of the sampled address, for the no-callchain fallback.
    pub dso: Option<String>,
}

/// Converter from structured sample events to a profile document.
pub struct EventConverter {
    session: ProfileBuilder,
}

impl EventConverter {
    /// Create a converter recording the given product string in the profile
    /// metadata.
    pub fn new(product: &str) -> Self {
        Self {
            session: ProfileBuilder::new(product),
        }
    }

    /// Feed one sample event into the session.
    ///
    /// The nanosecond timestamp is truncated to whole microseconds and
    /// expressed in milliseconds. The run start time is taken from the first
    /// event seen, whether or not that event yields a recorded sample.
    ///
    /// Call-chain entries without a resolved symbol are skipped; if nothing
    /// remains, the sample is dropped entirely. An event without a call
    /// chain falls back to a single synthetic frame built from its flat
    /// symbol/module fields.
    pub fn process_event(&mut self, event: &SampleEvent) {
        let time_ms = (event.time_ns / 1000) as f64 / 1000.0;
        self.session.set_start_time(time_ms);

        if event.callchain.is_empty() {
            let symbol = event.symbol.as_deref().unwrap_or(UNKNOWN);
            let dso = event.dso.as_deref().unwrap_or(UNKNOWN);
            let frames = vec![format!("{} (in {})", symbol, dso)];
            self.session
                .add_sample(event.pid, event.tid, &event.comm, &frames, time_ms);
            return;
        }

        let mut frames: Vec<String> = event
            .callchain
            .iter()
            .filter_map(|call| {
                call.symbol
                    .as_ref()
                    .map(|symbol| format!("{} (in {})", symbol, call.dso))
            })
            .collect();
        if frames.is_empty() {
            return;
        }
        frames.reverse();
        self.session
            .add_sample(event.pid, event.tid, &event.comm, &frames, time_ms);
    }

    /// Finalize the session into a profile document.
    pub fn into_profile(self) -> Profile {
        self.session.finish()
    }

    /// Finalize and serialize the document in one step.
    pub fn write_profile<W: Write>(self, writer: W) -> WriteResult<()> {
        self.into_profile().to_writer(writer)
    }
}
