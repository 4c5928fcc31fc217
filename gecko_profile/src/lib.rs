//! Firefox Profiler ("Gecko") profile format library.
//!
//! This library models the JSON document consumed by the Firefox Profiler
//! (format version 24) and provides the builders used to assemble one from
//! sampled stack traces: per-thread frame and stack interning, sample
//! accumulation, and final document assembly.
//!
//! The on-disk format is positional-columnar: each per-thread table carries a
//! fixed column-name → index `schema` object, and `data` is an array of
//! positional rows matching that column order. Rows are modeled as tuple
//! structs so they serialize as JSON arrays.
//!
//! # Example
//!
//! ```
//! use gecko_profile::ProfileBuilder;
//!
//! let mut builder = ProfileBuilder::new("my-product");
//! builder.set_start_time(1000.0);
//! builder.add_sample(1234, 1234, "main", &["main (in app)".to_string()], 1000.0);
//!
//! let profile = builder.finish();
//! assert_eq!(profile.threads.len(), 1);
//! assert_eq!(profile.meta.start_time, 1000.0);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use thiserror::Error;

/// Errors that can occur while writing a profile document.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for profile writing operations.
pub type WriteResult<T> = std::result::Result<T, WriteError>;

/// Errors that can occur while reading or validating a profile document.
#[derive(Error, Debug)]
pub enum ValidateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("thread {tid}: frame {frame} points at string {location} outside the string table")]
    InvalidStringReference { tid: u32, frame: u32, location: u32 },

    #[error("thread {tid}: frame {frame} has category {category} outside the category table")]
    InvalidCategory { tid: u32, frame: u32, category: u32 },

    #[error("thread {tid}: stack {stack} references non-existent frame {frame}")]
    InvalidFrameReference { tid: u32, stack: u32, frame: u32 },

    #[error("thread {tid}: stack {stack} has prefix {prefix} that does not precede it")]
    InvalidPrefixReference { tid: u32, stack: u32, prefix: u32 },

    #[error("thread {tid}: sample {sample} references non-existent stack {stack}")]
    InvalidStackReference { tid: u32, sample: usize, stack: u32 },

    #[error("thread {tid}: samples are not sorted by time (sample {sample})")]
    UnsortedSamples { tid: u32, sample: usize },
}

/// Result type for profile reading and validation operations.
pub type ValidateResult<T> = std::result::Result<T, ValidateError>;

// ============================================================================
// Categories
// ============================================================================

/// Index of the `User` entry in the category table.
pub const USER_CATEGORY_INDEX: u32 = 0;

/// Index of the `Kernel` entry in the category table.
pub const KERNEL_CATEGORY_INDEX: u32 = 1;

/// One entry of the `meta.categories` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub color: String,
    pub subcategories: Vec<String>,
}

/// The fixed two-entry category table referenced by frame rows.
pub fn categories() -> Vec<Category> {
    vec![
        Category {
            name: "User".to_string(),
            color: "yellow".to_string(),
            subcategories: vec!["Other".to_string()],
        },
        Category {
            name: "Kernel".to_string(),
            color: "orange".to_string(),
            subcategories: vec!["Other".to_string()],
        },
    ]
}

/// Classify a frame's textual form as User or Kernel.
///
/// Kernel frames are recognized by substring only: a kernel symbol table
/// marker, a kernel image path, or a kernel module suffix. No address
/// parsing is involved.
pub fn frame_category(text: &str) -> u32 {
    if text.contains("kallsyms") || text.contains("/vmlinux") || text.ends_with(".ko)") {
        KERNEL_CATEGORY_INDEX
    } else {
        USER_CATEGORY_INDEX
    }
}

// ============================================================================
// Table schemas
// ============================================================================

/// Column map for the samples table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSchema {
    pub stack: u32,
    pub time: u32,
    pub responsiveness: u32,
}

impl Default for SampleSchema {
    fn default() -> Self {
        Self {
            stack: 0,
            time: 1,
            responsiveness: 2,
        }
    }
}

/// Column map for the marker table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerSchema {
    pub name: u32,
    #[serde(rename = "startTime")]
    pub start_time: u32,
    #[serde(rename = "endTime")]
    pub end_time: u32,
    pub phase: u32,
    pub category: u32,
    pub data: u32,
}

impl Default for MarkerSchema {
    fn default() -> Self {
        Self {
            name: 0,
            start_time: 1,
            end_time: 2,
            phase: 3,
            category: 4,
            data: 5,
        }
    }
}

/// Column map for the frame table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSchema {
    pub location: u32,
    #[serde(rename = "relevantForJS")]
    pub relevant_for_js: u32,
    #[serde(rename = "innerWindowID")]
    pub inner_window_id: u32,
    pub implementation: u32,
    pub optimizations: u32,
    pub line: u32,
    pub column: u32,
    pub category: u32,
    pub subcategory: u32,
}

impl Default for FrameSchema {
    fn default() -> Self {
        Self {
            location: 0,
            relevant_for_js: 1,
            inner_window_id: 2,
            implementation: 3,
            optimizations: 4,
            line: 5,
            column: 6,
            category: 7,
            subcategory: 8,
        }
    }
}

/// Column map for the stack table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSchema {
    pub prefix: u32,
    pub frame: u32,
}

impl Default for StackSchema {
    fn default() -> Self {
        Self {
            prefix: 0,
            frame: 1,
        }
    }
}

// ============================================================================
// Table rows
// ============================================================================

/// One row of the samples table: `[stack, time, responsiveness]`.
///
/// `stack` is `None` when the sample carried no resolvable call chain.
/// `time` is milliseconds. `responsiveness` is a required but unused legacy
/// column, always 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow(pub Option<u32>, pub f64, pub u32);

impl SampleRow {
    pub fn stack(&self) -> Option<u32> {
        self.0
    }

    pub fn time(&self) -> f64 {
        self.1
    }
}

/// One row of the stack table: `[prefix, frame]`.
///
/// A stack is a node in a prefix tree; `prefix` is `None` for root-level
/// frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRow(pub Option<u32>, pub u32);

impl StackRow {
    pub fn prefix(&self) -> Option<u32> {
        self.0
    }

    pub fn frame(&self) -> u32 {
        self.1
    }
}

/// One row of the frame table.
///
/// Only `location` (column 0) and `category` (column 7) ever carry data in
/// this converter; the remaining columns are placeholders the consumer
/// requires to exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRow(
    pub u32,                       // location
    pub bool,                      // relevantForJS
    pub u32,                       // innerWindowID
    pub Option<String>,            // implementation
    pub Option<serde_json::Value>, // optimizations
    pub Option<u32>,               // line
    pub Option<u32>,               // column
    pub u32,                       // category
    pub Option<u32>,               // subcategory
);

impl FrameRow {
    pub fn new(location: u32, category: u32) -> Self {
        Self(location, false, 0, None, None, None, None, category, None)
    }

    pub fn location(&self) -> u32 {
        self.0
    }

    pub fn category(&self) -> u32 {
        self.7
    }
}

// ============================================================================
// Tables
// ============================================================================

/// The samples table of one thread.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleTable {
    pub schema: SampleSchema,
    pub data: Vec<SampleRow>,
}

/// The marker table of one thread. This converter never emits markers, but
/// the schema must be present for the consumer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkerTable {
    pub schema: MarkerSchema,
    pub data: Vec<serde_json::Value>,
}

/// The frame table of one thread.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameTable {
    pub schema: FrameSchema,
    pub data: Vec<FrameRow>,
}

/// The stack table of one thread.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StackTable {
    pub schema: StackSchema,
    pub data: Vec<StackRow>,
}

// ============================================================================
// Document types
// ============================================================================

/// One finalized thread of the profile document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub tid: u32,
    pub pid: u32,
    pub name: String,
    pub markers: MarkerTable,
    pub samples: SampleTable,
    pub frame_table: FrameTable,
    pub stack_table: StackTable,
    pub string_table: Vec<String>,
    pub register_time: u32,
    pub unregister_time: Option<f64>,
    pub process_type: String,
}

/// Run-level metadata of the profile document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub interval: u32,
    pub process_type: u32,
    pub product: String,
    pub stackwalk: u32,
    pub debug: u32,
    pub gcpoison: u32,
    pub asyncstack: u32,
    pub start_time: f64,
    pub shutdown_time: Option<f64>,
    pub version: u32,
    pub presymbolicated: bool,
    pub categories: Vec<Category>,
    pub marker_schema: Vec<serde_json::Value>,
}

impl Meta {
    /// Metadata block with the fixed fields of format version 24.
    pub fn new(product: String, start_time: f64) -> Self {
        Self {
            interval: 1,
            process_type: 0,
            product,
            stackwalk: 1,
            debug: 0,
            gcpoison: 0,
            asyncstack: 1,
            start_time,
            shutdown_time: None,
            version: 24,
            presymbolicated: true,
            categories: categories(),
            marker_schema: Vec::new(),
        }
    }
}

/// A complete profile document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub meta: Meta,
    pub libs: Vec<serde_json::Value>,
    pub threads: Vec<Thread>,
    pub processes: Vec<serde_json::Value>,
    pub paused_ranges: Vec<serde_json::Value>,
}

impl Profile {
    /// Serialize this profile as JSON to a writer.
    pub fn to_writer<W: Write>(&self, writer: W) -> WriteResult<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Serialize this profile as pretty-printed JSON to a writer.
    pub fn to_writer_pretty<W: Write>(&self, writer: W) -> WriteResult<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Parse a profile document from any `Read`-able source.
    pub fn from_reader<R: Read>(reader: R) -> ValidateResult<Self> {
        let profile = serde_json::from_reader(BufReader::new(reader))?;
        Ok(profile)
    }

    /// Check the internal consistency of every thread's tables.
    ///
    /// Verifies that frame rows point into the string and category tables,
    /// that stack rows point into the frame table with parents preceding
    /// children, that sample rows point into the stack table, and that each
    /// sample list is sorted non-decreasing by time.
    pub fn validate(&self) -> ValidateResult<()> {
        let category_count = self.meta.categories.len() as u32;

        for thread in &self.threads {
            let tid = thread.tid;
            let string_count = thread.string_table.len() as u32;
            let frame_count = thread.frame_table.data.len() as u32;
            let stack_count = thread.stack_table.data.len() as u32;

            for (index, frame) in thread.frame_table.data.iter().enumerate() {
                if frame.location() >= string_count {
                    return Err(ValidateError::InvalidStringReference {
                        tid,
                        frame: index as u32,
                        location: frame.location(),
                    });
                }
                if frame.category() >= category_count {
                    return Err(ValidateError::InvalidCategory {
                        tid,
                        frame: index as u32,
                        category: frame.category(),
                    });
                }
            }

            for (index, stack) in thread.stack_table.data.iter().enumerate() {
                if stack.frame() >= frame_count {
                    return Err(ValidateError::InvalidFrameReference {
                        tid,
                        stack: index as u32,
                        frame: stack.frame(),
                    });
                }
                if let Some(prefix) = stack.prefix() {
                    if prefix >= index as u32 {
                        return Err(ValidateError::InvalidPrefixReference {
                            tid,
                            stack: index as u32,
                            prefix,
                        });
                    }
                }
            }

            let mut previous = f64::NEG_INFINITY;
            for (index, sample) in thread.samples.data.iter().enumerate() {
                if let Some(stack) = sample.stack() {
                    if stack >= stack_count {
                        return Err(ValidateError::InvalidStackReference {
                            tid,
                            sample: index,
                            stack,
                        });
                    }
                }
                if sample.time() < previous {
                    return Err(ValidateError::UnsortedSamples { tid, sample: index });
                }
                previous = sample.time();
            }
        }

        Ok(())
    }
}

// ============================================================================
// Thread builder
// ============================================================================

/// Accumulates samples for a single (pid, tid) pair.
///
/// Owns the thread's frame interner, stack interner, string table, and
/// sample list. Frame, stack, and string indices are dense, zero-based, and
/// assigned in first-seen order; they are never reused or reassigned.
#[derive(Debug)]
pub struct ThreadBuilder {
    tid: u32,
    pid: u32,
    name: String,
    frame_map: HashMap<String, u32>,
    frame_table: Vec<FrameRow>,
    string_table: Vec<String>,
    stack_map: HashMap<(u32, Option<u32>), u32>,
    stack_table: Vec<StackRow>,
    samples: Vec<SampleRow>,
}

impl ThreadBuilder {
    /// Create an empty accumulator for one thread.
    pub fn new(name: &str, pid: u32, tid: u32) -> Self {
        Self {
            tid,
            pid,
            name: name.to_string(),
            frame_map: HashMap::new(),
            frame_table: Vec::new(),
            string_table: Vec::new(),
            stack_map: HashMap::new(),
            stack_table: Vec::new(),
            samples: Vec::new(),
        }
    }

    /// Intern a frame by its textual form, returning its table index.
    ///
    /// The first occurrence appends a frame row and the raw text to the
    /// string table; the frame's `location` column always equals that string
    /// index. The category is classified once, at creation.
    pub fn intern_frame(&mut self, text: &str) -> u32 {
        if let Some(&frame) = self.frame_map.get(text) {
            return frame;
        }
        let frame = self.frame_table.len() as u32;
        let location = self.string_table.len() as u32;
        self.string_table.push(text.to_string());
        self.frame_table
            .push(FrameRow::new(location, frame_category(text)));
        self.frame_map.insert(text.to_string(), frame);
        frame
    }

    /// Intern a stack node keyed by its (frame, prefix) pair.
    ///
    /// Idempotent: the same pair always yields the same index.
    pub fn intern_stack(&mut self, frame: u32, prefix: Option<u32>) -> u32 {
        if let Some(&stack) = self.stack_map.get(&(frame, prefix)) {
            return stack;
        }
        let stack = self.stack_table.len() as u32;
        self.stack_table.push(StackRow(prefix, frame));
        self.stack_map.insert((frame, prefix), stack);
        stack
    }

    /// Record one sample.
    ///
    /// `frames` is ordered outermost caller first; the full stack is built
    /// by folding the interners over it, each step passing the previous
    /// stack index as the prefix. An empty list records a sample with no
    /// stack; the sample is kept, not dropped. The display name is updated
    /// to the latest given. Samples are never rejected for being duplicates
    /// or out of order; ordering is corrected in [`finish`](Self::finish).
    pub fn add_sample(&mut self, thread_name: &str, frames: &[String], time_ms: f64) {
        if self.name != thread_name {
            self.name = thread_name.to_string();
        }
        let mut prefix = None;
        for text in frames {
            let frame = self.intern_frame(text);
            prefix = Some(self.intern_stack(frame, prefix));
        }
        self.samples.push(SampleRow(prefix, time_ms, 0));
    }

    /// Number of samples recorded so far.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Finalize into an output thread, consuming the builder.
    ///
    /// The sample list is stable-sorted ascending by time, so samples with
    /// equal timestamps keep their insertion order.
    pub fn finish(self) -> Thread {
        let mut samples = self.samples;
        samples.sort_by(|a, b| a.time().total_cmp(&b.time()));

        Thread {
            tid: self.tid,
            pid: self.pid,
            name: self.name,
            markers: MarkerTable::default(),
            samples: SampleTable {
                schema: SampleSchema::default(),
                data: samples,
            },
            frame_table: FrameTable {
                schema: FrameSchema::default(),
                data: self.frame_table,
            },
            stack_table: StackTable {
                schema: StackSchema::default(),
                data: self.stack_table,
            },
            string_table: self.string_table,
            register_time: 0,
            unregister_time: None,
            process_type: "default".to_string(),
        }
    }
}

// ============================================================================
// Profile builder
// ============================================================================

/// A single conversion session: the thread registry plus run metadata.
///
/// Thread accumulators are created lazily on the first sample for a
/// (pid, tid) pair and appear in the output in first-seen order. The session
/// is constructed once per conversion and consumed by
/// [`finish`](Self::finish).
#[derive(Debug)]
pub struct ProfileBuilder {
    product: String,
    start_time: Option<f64>,
    threads: Vec<ThreadBuilder>,
    registry: HashMap<(u32, u32), usize>,
}

impl ProfileBuilder {
    /// Create an empty session for the given product string.
    pub fn new(product: &str) -> Self {
        Self {
            product: product.to_string(),
            start_time: None,
            threads: Vec::new(),
            registry: HashMap::new(),
        }
    }

    /// Record the run start time. Only the first call has any effect; the
    /// ingestor decides what counts as the first timestamp.
    pub fn set_start_time(&mut self, time_ms: f64) {
        if self.start_time.is_none() {
            self.start_time = Some(time_ms);
        }
    }

    /// The run start time recorded so far, if any.
    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    /// Route one sample to its thread accumulator, creating the accumulator
    /// on first use.
    pub fn add_sample(
        &mut self,
        pid: u32,
        tid: u32,
        thread_name: &str,
        frames: &[String],
        time_ms: f64,
    ) {
        let key = (pid, tid);
        let index = match self.registry.get(&key) {
            Some(&index) => index,
            None => {
                let index = self.threads.len();
                self.threads.push(ThreadBuilder::new(thread_name, pid, tid));
                self.registry.insert(key, index);
                index
            }
        };
        self.threads[index].add_sample(thread_name, frames, time_ms);
    }

    /// Number of threads observed so far.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Finalize every thread accumulator and assemble the document.
    ///
    /// A session that never saw a sample reports a start time of 0.
    pub fn finish(self) -> Profile {
        let threads = self
            .threads
            .into_iter()
            .map(ThreadBuilder::finish)
            .collect();

        Profile {
            meta: Meta::new(self.product, self.start_time.unwrap_or(0.0)),
            libs: Vec::new(),
            threads,
            processes: Vec::new(),
            paused_ranges: Vec::new(),
        }
    }
}
