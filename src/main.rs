//! COW image inspector CLI
//!
//! Parse copy-on-write snapshot images and report their contents as JSON or CSV.

use clap::{Parser, ValueEnum};
use cow_image::{open_image, output, FormatLimits, ParseResult};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "cow-inspect")]
#[command(about = "Inspect copy-on-write snapshot images")]
#[command(version)]
struct Cli {
    /// Input image file(s)
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Output file path (for single input) or directory (for multiple inputs); stdout if omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Stop at this checkpoint; fail if the image never reaches it
    #[arg(short, long)]
    label: Option<u64>,

    /// Print the payload offset indexed for a logical block (repeatable)
    #[arg(long = "lookup", value_name = "BLOCK")]
    lookups: Vec<u64>,

    /// Include every operation in JSON output
    #[arg(long)]
    ops: bool,

    /// JSON file overriding the accepted format versions
    #[arg(long, value_name = "FILE")]
    limits: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(short, long)]
    pretty: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let limits = match load_limits(cli.limits.as_deref()) {
        Ok(limits) => limits,
        Err(e) => {
            eprintln!("Error loading limits: {}", e);
            std::process::exit(2);
        }
    };

    let mut success_count = 0;
    let mut error_count = 0;

    for input_path in &cli.input {
        log::info!("processing {}", input_path.display());

        match process_file(&cli, &limits, input_path) {
            Ok(destination) => {
                success_count += 1;
                if let Some(path) = destination {
                    log::info!("wrote {}", path.display());
                }
            }
            Err(e) => {
                error_count += 1;
                eprintln!("Error processing {}: {}", input_path.display(), e);
            }
        }
    }

    if cli.input.len() > 1 {
        eprintln!(
            "\nProcessed {} file(s): {} success, {} errors",
            cli.input.len(),
            success_count,
            error_count
        );
    }

    if error_count > 0 {
        std::process::exit(1);
    }
}

fn load_limits(path: Option<&Path>) -> Result<FormatLimits, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let file = File::open(path)?;
            Ok(serde_json::from_reader(io::BufReader::new(file))?)
        }
        None => Ok(FormatLimits::default()),
    }
}

fn process_file(
    cli: &Cli,
    limits: &FormatLimits,
    input_path: &Path,
) -> Result<Option<PathBuf>, Box<dyn std::error::Error>> {
    let result = open_image(input_path, limits, cli.label)?;

    if cli.verbose {
        print_summary(&result);
    }
    for &block in &cli.lookups {
        match result.lookup_data_offset(block) {
            Some(offset) => eprintln!("  block {}: payload at {}", block, offset),
            None => eprintln!("  block {}: not indexed", block),
        }
    }

    match get_output_path(cli, input_path) {
        Some(output_path) => {
            let file = File::create(&output_path)?;
            write_report(cli, &result, BufWriter::new(file))?;
            Ok(Some(output_path))
        }
        None => {
            let stdout = io::stdout();
            write_report(cli, &result, stdout.lock())?;
            Ok(None)
        }
    }
}

fn print_summary(result: &ParseResult) {
    let header = result.header();
    let stats = result.stats();
    eprintln!(
        "  Version: {}.{}",
        header.major_version, header.minor_version
    );
    eprintln!("  Block size: {}", header.block_size);
    eprintln!("  Operations: {}", stats.records);
    for (kind, count) in result.counts_by_kind() {
        eprintln!("    {}: {}", kind, count);
    }
    eprintln!("  Indexed XOR blocks: {}", result.index().len());
    match result.last_checkpoint() {
        Some(label) => eprintln!("  Last checkpoint: {}", label),
        None => eprintln!("  Last checkpoint: none"),
    }
    if stats.torn_tail {
        eprintln!("  Torn tail dropped after offset {}", stats.end_offset);
    }
}

fn write_report<W: Write>(
    cli: &Cli,
    result: &ParseResult,
    mut writer: W,
) -> Result<(), Box<dyn std::error::Error>> {
    match cli.format {
        OutputFormat::Json => {
            output::write_json(result, &mut writer, cli.ops, cli.pretty)?;
            writeln!(writer)?;
        }
        OutputFormat::Csv => {
            output::write_csv(result, &mut writer)?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn get_output_path(cli: &Cli, input_path: &Path) -> Option<PathBuf> {
    let extension = match cli.format {
        OutputFormat::Json => "json",
        OutputFormat::Csv => "csv",
    };

    let output = cli.output.as_ref()?;
    if cli.input.len() == 1 {
        // Single file: use output as-is if it has an extension, otherwise add one
        if output.extension().is_some() {
            Some(output.clone())
        } else {
            Some(output.with_extension(extension))
        }
    } else {
        // Multiple files: output is a directory
        let filename = input_path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy();
        Some(output.join(format!("{}.{}", filename, extension)))
    }
}
