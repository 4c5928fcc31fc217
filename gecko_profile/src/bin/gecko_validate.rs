use gecko_profile::Profile;
use std::env;
use std::fs::File;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <profile.json>", args[0]);
        return ExitCode::from(2);
    }

    let path = &args[1];

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let profile = match Profile::from_reader(file) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Invalid profile '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    match profile.validate() {
        Ok(()) => {
            println!("Valid profile: {}", path);
            println!("  Format version: {}", profile.meta.version);
            println!("  Product: {}", profile.meta.product);
            println!("  Start time: {} ms", profile.meta.start_time);
            println!("  Threads: {}", profile.threads.len());
            for thread in &profile.threads {
                println!(
                    "    {} ({}/{}): {} samples, {} stacks, {} frames",
                    thread.name,
                    thread.pid,
                    thread.tid,
                    thread.samples.data.len(),
                    thread.stack_table.data.len(),
                    thread.frame_table.data.len()
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Inconsistent profile '{}': {}", path, e);
            ExitCode::FAILURE
        }
    }
}
