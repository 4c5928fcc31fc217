//! Convert `perf script` text output to the Firefox Profiler format.
//!
//! This module parses the line-oriented text emitted by `perf script` and
//! feeds each sample into a profile session. A sample is a header line
//! followed by its stack-frame lines, innermost frame first, terminated by a
//! blank line:
//!
//! ```text
//! myapp  1234/1234  12345.678901: 250000 cycles:
//!         55d2c3a00100 main+0x54 (/usr/bin/myapp)
//!         7f8e21029d90 __libc_start_main+0x80 (/lib/x86_64-linux-gnu/libc.so.6)
//!
//! ```
//!
//! Malformed lines are never fatal: unparseable header lines are logged and
//! skipped, unparseable frame lines are skipped silently, and a sample whose
//! frame list ends up empty is dropped. Only I/O failures abort a
//! conversion.
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

use gecko_profile::{Profile, ProfileBuilder};
use log::warn;
use std::io::{BufRead, BufReader, Read, Write};
use thiserror::Error;

/// Errors that can occur during a `perf script` conversion.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write profile: {0}")]
    Write(#[from] gecko_profile::WriteError),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Converter from `perf script` text output to a profile document.
pub struct ScriptConverter {
    session: ProfileBuilder,
}

impl ScriptConverter {
    /// Create a converter recording the given product string in the profile
    /// metadata.
    pub fn new(product: &str) -> Self {
        Self {
            session: ProfileBuilder::new(product),
        }
    }

    /// Parse `perf script` output from a reader.
    ///
    /// May be called more than once; all input accumulates into the same
    /// session.
    pub fn parse<R: Read>(&mut self, reader: R) -> Result<()> {
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next() {
            let line = line?;

            // perf script --header emits header lines beginning with '#'
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((prefix, seconds)) = Self::split_sample_header(&line) else {
                warn!("could not parse line as the start of a sample: {:?}", line);
                continue;
            };
            let Some((thread_name, pid, tid)) = Self::parse_thread_and_ids(prefix) else {
                warn!("could not parse thread and ids from sample header: {:?}", line);
                continue;
            };
            // The text format carries seconds with limited precision already;
            // no truncation, unlike the nanosecond event path.
            let time_ms = seconds * 1000.0;
            self.session.set_start_time(time_ms);

            // Stack-frame lines follow, innermost first, until a blank line
            // or end of input ends the sample.
            let mut frames: Vec<String> = Vec::new();
            for frame_line in lines.by_ref() {
                let frame_line = frame_line?;
                if frame_line.trim().is_empty() {
                    break;
                }
                if let Some(frame) = Self::parse_stack_frame(&frame_line) {
                    frames.push(frame);
                }
            }

            if !frames.is_empty() {
                frames.reverse();
                self.session
                    .add_sample(pid, tid, thread_name, &frames, time_ms);
            }
        }

        Ok(())
    }

    /// Finalize the session into a profile document.
    pub fn into_profile(self) -> Profile {
        self.session.finish()
    }

    /// Finalize and serialize the document in one step.
    pub fn write_profile<W: Write>(self, writer: W) -> Result<()> {
        self.into_profile().to_writer(writer)?;
        Ok(())
    }

    /// Split a sample header line into the part before the timestamp and the
    /// timestamp itself, in seconds.
    ///
    /// The timestamp is the rightmost whitespace-preceded run of digits and
    /// dots followed by a colon; anything after that colon (period, event
    /// name) is ignored.
    ///
    /// Examples:
    ///   `myapp  1234/1234  12345.678901: 250000 cycles:`
    ///   `myapp  1234  12345.678901:`
    fn split_sample_header(line: &str) -> Option<(&str, f64)> {
        for (colon, _) in line.rmatch_indices(':') {
            let before = &line[..colon];
            let rest = before.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
            let number = &before[rest.len()..];
            if number.is_empty() || !rest.ends_with(|c: char| c.is_whitespace()) {
                continue;
            }
            let Ok(seconds) = number.parse::<f64>() else {
                continue;
            };
            return Some((rest.trim_end(), seconds));
        }
        None
    }

    /// Extract `<threadName> <pid>/<tid>` or `<threadName> <tid>` from the
    /// part of a header line before the timestamp. The pid is optional and
    /// defaults to 0. Trailing fields after the ids (such as a `[cpu]`
    /// column) are tolerated.
    fn parse_thread_and_ids(prefix: &str) -> Option<(&str, u32, u32)> {
        let bytes = prefix.as_bytes();
        // Rightmost digit run preceded by whitespace; the thread name is
        // whatever comes before it.
        for start in (1..bytes.len()).rev() {
            if !bytes[start].is_ascii_digit() || !bytes[start - 1].is_ascii_whitespace() {
                continue;
            }
            if let Some((pid, tid)) = Self::parse_pid_tid(&prefix[start..]) {
                return Some((prefix[..start].trim(), pid, tid));
            }
        }
        None
    }

    /// Parse a leading `<pid>/<tid>` or `<tid>` out of `s`. The digit run
    /// must end at a word boundary; trailing non-word text is ignored.
    fn parse_pid_tid(s: &str) -> Option<(u32, u32)> {
        let first_end = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let first = &s[..first_end];
        let rest = &s[first_end..];

        if let Some(after_slash) = rest.strip_prefix('/') {
            let second_end = after_slash
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_slash.len());
            if second_end > 0 && Self::word_boundary(after_slash, second_end) {
                let pid = first.parse().ok()?;
                let tid = after_slash[..second_end].parse().ok()?;
                return Some((pid, tid));
            }
        }

        // No pid/tid pair; the run itself is the tid and pid defaults to 0.
        if Self::word_boundary(s, first_end) {
            let tid = first.parse().ok()?;
            return Some((0, tid));
        }

        None
    }

    fn word_boundary(s: &str, index: usize) -> bool {
        match s[index..].chars().next() {
            None => true,
            Some(c) => !(c.is_alphanumeric() || c == '_'),
        }
    }

    /// Parse a stack-frame line into the frame's textual form.
    ///
    /// Format: `<address> <function> (<module>)`, e.g.
    ///   `55d2c3a00100 main+0x54 (/usr/bin/myapp)`
    ///   `ffffffff810b1234 do_idle+0x8c ([kernel.kallsyms])`
    ///
    /// A trailing `+0x<hex>` offset is stripped from the function text. A
    /// function text that then starts with `(` is a process-name artifact
    /// and contributes no frame. When a module is present, the result is
    /// `"<function> (in <module>)"`.
    fn parse_stack_frame(line: &str) -> Option<String> {
        let rest = line.trim_start();
        let address_end = rest.find(|c: char| !(c.is_alphanumeric() || c == '_'))?;
        if address_end == 0 {
            return None;
        }
        let rest = rest[address_end..].trim_start();

        // The module is the last parenthesized group on the line.
        for (open, _) in rest.rmatch_indices(" (") {
            if open == 0 {
                continue;
            }
            let after = &rest[open + 2..];
            let Some(close) = after.find(')') else {
                continue;
            };
            let module = &after[..close];
            let function = Self::strip_offset(&rest[..open]);
            if function.starts_with('(') {
                return None;
            }
            if module.is_empty() {
                return Some(function.to_string());
            }
            return Some(format!("{} (in {})", function, module));
        }

        None
    }

    /// Strip a trailing `+0x<hex>` offset suffix, if present.
    fn strip_offset(function: &str) -> &str {
        if let Some(position) = function.rfind("+0x") {
            let hex = &function[position + 3..];
            if !hex.is_empty()
                && hex
                    .bytes()
                    .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
            {
                return &function[..position];
            }
        }
        function
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE_SCRIPT_OUTPUT: &str = "\
# ========
# captured on    : Thu Aug  7 10:21:34 2025
# ========
#
myapp  4821/4821   12345.601000: 250000 cycles:
\t55d2c3a01234 compute+0x1f4 (/usr/bin/myapp)
\t55d2c3a00100 main+0x54 (/usr/bin/myapp)
\t7f8e21029d90 __libc_start_main+0x80 (/lib/x86_64-linux-gnu/libc.so.6)

myapp  4821/4821   12345.611000: 250000 cycles:
\t55d2c3a00100 main+0x58 (/usr/bin/myapp)
\t7f8e21029d90 __libc_start_main+0x80 (/lib/x86_64-linux-gnu/libc.so.6)

kworker/2:1  310   12345.621000: 250000 cycles:
\tffffffff810b1234 process_one_work+0x1e0 ([kernel.kallsyms])
";

    fn convert(input: &str) -> Profile {
        let mut converter = ScriptConverter::new("test");
        converter.parse(Cursor::new(input)).unwrap();
        converter.into_profile()
    }

    #[test]
    fn split_sample_header_basic() {
        let (prefix, seconds) =
            ScriptConverter::split_sample_header("myapp  1234/1234   12345.678901: 250000 cycles:")
                .unwrap();

        assert_eq!(prefix, "myapp  1234/1234");
        assert!((seconds - 12345.678901).abs() < 1e-9);
    }

    #[test]
    fn split_sample_header_without_trailing_tokens() {
        let (prefix, seconds) =
            ScriptConverter::split_sample_header("thread1  1234/1234   1.000000:").unwrap();

        assert_eq!(prefix, "thread1  1234/1234");
        assert_eq!(seconds, 1.0);
    }

    #[test]
    fn split_sample_header_rejects_unmatched_lines() {
        assert!(ScriptConverter::split_sample_header("no timestamp here").is_none());
        // A timestamp must be preceded by whitespace.
        assert!(ScriptConverter::split_sample_header("1.000000:").is_none());
    }

    #[test]
    fn parse_thread_and_ids_with_pid_and_tid() {
        let (name, pid, tid) = ScriptConverter::parse_thread_and_ids("myapp  1234/5678").unwrap();

        assert_eq!(name, "myapp");
        assert_eq!(pid, 1234);
        assert_eq!(tid, 5678);
    }

    #[test]
    fn parse_thread_and_ids_pid_defaults_to_zero() {
        let (name, pid, tid) = ScriptConverter::parse_thread_and_ids("kworker/2:1  310").unwrap();

        assert_eq!(name, "kworker/2:1");
        assert_eq!(pid, 0);
        assert_eq!(tid, 310);
    }

    #[test]
    fn parse_thread_and_ids_tolerates_cpu_column() {
        let (name, pid, tid) =
            ScriptConverter::parse_thread_and_ids("myapp  1234/5678 [002]").unwrap();

        assert_eq!(name, "myapp");
        assert_eq!(pid, 1234);
        assert_eq!(tid, 5678);
    }

    #[test]
    fn parse_thread_and_ids_requires_a_name() {
        assert!(ScriptConverter::parse_thread_and_ids("1234/5678").is_none());
    }

    #[test]
    fn parse_stack_frame_strips_offset() {
        let frame =
            ScriptConverter::parse_stack_frame("\t55d2c3a00100 main+0x54 (/usr/bin/myapp)")
                .unwrap();

        assert_eq!(frame, "main (in /usr/bin/myapp)");
    }

    #[test]
    fn parse_stack_frame_without_offset() {
        let frame = ScriptConverter::parse_stack_frame("\tffffff func_b (mod_b)").unwrap();

        assert_eq!(frame, "func_b (in mod_b)");
    }

    #[test]
    fn parse_stack_frame_with_empty_module() {
        let frame = ScriptConverter::parse_stack_frame("\tffffff func ()").unwrap();

        assert_eq!(frame, "func");
    }

    #[test]
    fn parse_stack_frame_discards_process_name_artifact() {
        assert!(ScriptConverter::parse_stack_frame("\tffffff (swapper) (mod)").is_none());
    }

    #[test]
    fn parse_stack_frame_rejects_unmatched_lines() {
        assert!(ScriptConverter::parse_stack_frame("\tno module here").is_none());
        assert!(ScriptConverter::parse_stack_frame("").is_none());
    }

    #[test]
    fn parse_full_script_output() {
        let profile = convert(SAMPLE_SCRIPT_OUTPUT);

        assert_eq!(profile.threads.len(), 2);

        let myapp = &profile.threads[0];
        assert_eq!(myapp.name, "myapp");
        assert_eq!(myapp.pid, 4821);
        assert_eq!(myapp.tid, 4821);
        assert_eq!(myapp.samples.data.len(), 2);

        let kworker = &profile.threads[1];
        assert_eq!(kworker.name, "kworker/2:1");
        assert_eq!(kworker.pid, 0);
        assert_eq!(kworker.tid, 310);
        assert_eq!(kworker.samples.data.len(), 1);

        // The kernel frame is classified as Kernel (category 1).
        assert_eq!(kworker.frame_table.data[0].category(), 1);

        profile.validate().unwrap();
    }

    #[test]
    fn shared_prefixes_collapse_in_the_stack_table() {
        let profile = convert(SAMPLE_SCRIPT_OUTPUT);
        let myapp = &profile.threads[0];

        // Both samples run through __libc_start_main; the second sample's
        // main+0x58 strips to the same "main" frame as the first.
        assert_eq!(
            myapp.string_table,
            vec![
                "__libc_start_main (in /lib/x86_64-linux-gnu/libc.so.6)",
                "main (in /usr/bin/myapp)",
                "compute (in /usr/bin/myapp)",
            ]
        );
        // Stacks: libc root, main under it, compute as leaf of the first
        // sample only.
        assert_eq!(myapp.stack_table.data.len(), 3);
        assert_eq!(myapp.samples.data[0].stack(), Some(2));
        assert_eq!(myapp.samples.data[1].stack(), Some(1));
    }

    #[test]
    fn round_trip_single_sample() {
        let input = "\
thread1  1234/1234   1.000000:
            ffffff func_a+0x10 (mod_a)
            ffffff func_b (mod_b)

";
        let profile = convert(input);

        assert_eq!(profile.threads.len(), 1);
        let thread = &profile.threads[0];
        assert_eq!(thread.tid, 1234);
        assert_eq!(thread.pid, 1234);

        assert_eq!(thread.samples.data.len(), 1);
        assert_eq!(thread.samples.data[0].time(), 1000.0);

        // Frames arrive innermost first and are reversed: func_b becomes the
        // root, func_a its child.
        assert_eq!(
            thread.string_table,
            vec!["func_b (in mod_b)", "func_a (in mod_a)"]
        );
        assert_eq!(thread.stack_table.data.len(), 2);
        assert_eq!(thread.stack_table.data[0].prefix(), None);
        assert_eq!(thread.stack_table.data[0].frame(), 0);
        assert_eq!(thread.stack_table.data[1].prefix(), Some(0));
        assert_eq!(thread.stack_table.data[1].frame(), 1);
        assert_eq!(thread.samples.data[0].stack(), Some(1));

        assert_eq!(thread.frame_table.data[0].category(), 0);
        assert_eq!(thread.frame_table.data[1].category(), 0);
    }

    #[test]
    fn start_time_is_first_sample_in_ingestion_order() {
        let input = "\
thread1  10/10   5.000000:
            ffffff func_a (mod_a)

thread1  10/10   1.000000:
            ffffff func_a (mod_a)

";
        let profile = convert(input);

        // Not the minimum: the first successfully parsed sample wins.
        assert_eq!(profile.meta.start_time, 5000.0);

        // The samples themselves still come out sorted.
        let times: Vec<f64> = profile.threads[0]
            .samples
            .data
            .iter()
            .map(|s| s.time())
            .collect();
        assert_eq!(times, vec![1000.0, 5000.0]);
    }

    #[test]
    fn empty_stack_sample_is_dropped() {
        let input = "\
thread1  10/10   1.000000:

thread1  10/10   2.000000:
            ffffff func_a (mod_a)

";
        let profile = convert(input);

        assert_eq!(profile.threads.len(), 1);
        assert_eq!(profile.threads[0].samples.data.len(), 1);
        assert_eq!(profile.threads[0].samples.data[0].time(), 2000.0);
        // The dropped sample still defined the start time.
        assert_eq!(profile.meta.start_time, 1000.0);
    }

    #[test]
    fn sample_with_only_unparseable_frames_is_dropped() {
        let input = "\
thread1  10/10   1.000000:
            not a frame line

";
        let profile = convert(input);

        assert!(profile.threads.is_empty());
    }

    #[test]
    fn unparseable_header_is_skipped() {
        let input = "\
garbage line with no timestamp
thread1  10/10   1.000000:
            ffffff func_a (mod_a)

";
        let profile = convert(input);

        assert_eq!(profile.threads.len(), 1);
        assert_eq!(profile.threads[0].samples.data.len(), 1);
    }

    #[test]
    fn sample_at_end_of_input_is_kept() {
        let input = "\
thread1  10/10   1.000000:
            ffffff func_a (mod_a)";
        let profile = convert(input);

        assert_eq!(profile.threads.len(), 1);
        assert_eq!(profile.threads[0].samples.data.len(), 1);
    }

    #[test]
    fn threads_have_separate_tables() {
        let input = "\
one  10/10   1.000000:
            ffffff shared (mod)

two  20/20   2.000000:
            ffffff shared (mod)

";
        let profile = convert(input);

        assert_eq!(profile.threads.len(), 2);
        for thread in &profile.threads {
            assert_eq!(thread.string_table, vec!["shared (in mod)"]);
            assert_eq!(thread.frame_table.data.len(), 1);
            assert_eq!(thread.stack_table.data.len(), 1);
        }
    }

    #[test]
    fn empty_input_produces_empty_document() {
        let profile = convert("");

        assert!(profile.threads.is_empty());
        assert_eq!(profile.meta.start_time, 0.0);
        profile.validate().unwrap();
    }

    #[test]
    fn write_profile_emits_json() {
        let mut converter = ScriptConverter::new("test-product");
        converter.parse(Cursor::new(SAMPLE_SCRIPT_OUTPUT)).unwrap();

        let mut output = Vec::new();
        converter.write_profile(&mut output).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["meta"]["product"], "test-product");
        assert_eq!(value["meta"]["version"], 24);
        assert_eq!(value["threads"].as_array().unwrap().len(), 2);
    }
}
