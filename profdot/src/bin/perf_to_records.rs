//! Convert Linux `perf script` output to call records.
//!
//! The records can be inspected, merged with other runs, or fed back to
//! `profdot -f records`.
//!
//! # Usage
//!
//! ```bash
//! perf record -g ./myapp
//! perf script > perf.txt
//! perf_to_records perf.txt -o perf.jsonl
//! perf_to_records perf.txt  # outputs to perf.jsonl
//! ```

use clap::Parser;
use log::info;
use profdot::perf::PerfConverter;
use profdot::records::RecordWriter;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "perf_to_records")]
#[command(about = "Convert perf script output to call records")]
#[command(version)]
struct Args {
    /// Input perf script output file
    input: PathBuf,

    /// Output records file (defaults to input filename with .jsonl extension)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Where to write, refusing any path that names the input itself.
fn output_path(input: &Path, output: Option<PathBuf>) -> Result<PathBuf, String> {
    let path = output.unwrap_or_else(|| input.with_extension("jsonl"));
    let same_file = path == input
        || matches!(
            (fs::canonicalize(&path), fs::canonicalize(input)),
            (Ok(a), Ok(b)) if a == b
        );
    if same_file {
        return Err(format!(
            "Output '{}' would overwrite the input; choose another path with -o",
            path.display()
        ));
    }
    Ok(path)
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = output_path(&args.input, args.output)?;

    let input_file = File::open(&args.input).map_err(|e| {
        format!(
            "Failed to open input file '{}': {}",
            args.input.display(),
            e
        )
    })?;

    let mut converter = PerfConverter::new();
    converter.parse(BufReader::new(input_file))?;
    let records = converter.records()?;

    let output_file = File::create(&output_path).map_err(|e| {
        format!(
            "Failed to create output file '{}': {}",
            output_path.display(),
            e
        )
    })?;
    let mut writer = RecordWriter::new(BufWriter::new(output_file));
    writer.write_all(&records)?;
    writer.into_inner()?;

    info!("wrote {} records", records.len());
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
