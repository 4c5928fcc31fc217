//! Convert `perf script` output files to the Firefox Profiler format.
//!
//! This binary reads the text output of `perf script` and converts it to
//! the JSON document the Firefox Profiler loads.
//!
//! # Usage
//!
//! ```bash
//! perf record -a -g -F 99 sleep 1
//! perf script > perf.txt
//! perf_to_gecko perf.txt -o profile.json
//! perf_to_gecko perf.txt           # outputs to perf.json
//! ```

use clap::Parser;
use perf_to_gecko::script::ScriptConverter;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Command, ExitCode};

#[derive(Parser, Debug)]
#[command(name = "perf_to_gecko")]
#[command(about = "Convert perf script output to the Firefox Profiler format")]
#[command(version)]
struct Args {
    /// Input perf script text file
    input: PathBuf,

    /// Output profile JSON file (defaults to input filename with .json extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Product string recorded in the profile metadata (defaults to `uname -op`)
    #[arg(short, long)]
    product: Option<String>,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,
}

/// Product string in the style the profiler shows for local captures.
fn default_product() -> String {
    Command::new("uname")
        .arg("-op")
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "perf".to_string())
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    // Determine output path
    let output_path = args.output.unwrap_or_else(|| {
        let mut path = args.input.clone();
        path.set_extension("json");
        path
    });

    let product = args.product.unwrap_or_else(default_product);

    // Open input
    let input_file = File::open(&args.input).map_err(|e| {
        format!(
            "Failed to open input file '{}': {}",
            args.input.display(),
            e
        )
    })?;
    let reader = BufReader::new(input_file);

    // Parse
    let mut converter = ScriptConverter::new(&product);
    converter.parse(reader)?;

    // Create output
    let output_file = File::create(&output_path).map_err(|e| {
        format!(
            "Failed to create output file '{}': {}",
            output_path.display(),
            e
        )
    })?;
    let mut writer = BufWriter::new(output_file);

    // Write the profile document
    let profile = converter.into_profile();
    if args.pretty {
        profile.to_writer_pretty(&mut writer)?;
    } else {
        profile.to_writer(&mut writer)?;
    }
    writer.flush()?;

    eprintln!(
        "Converted '{}' -> '{}'",
        args.input.display(),
        output_path.display()
    );

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
