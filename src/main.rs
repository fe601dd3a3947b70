//! Command-line interface for the Z80 Snapshot to Microdrive Converter
//!
//! Usage: z80-snapshot-to-mdr-converter [--force] <input.z80> [output.mdr]
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

use env_logger::Env;
use std::env;
use std::path::{Path, PathBuf};
use std::process;

use z80_snapshot_to_mdr_converter::config::{Config, VERSION, VOLUME_ENV};
use z80_snapshot_to_mdr_converter::convert_snapshot::ConvertSnapshot;

struct Args {
    input: PathBuf,
    output: PathBuf,
    force: bool,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let argv: Vec<String> = env::args().collect();
    let program = argv.first().map(String::as_str).unwrap_or("z80-snapshot-to-mdr-converter");

    if argv.iter().skip(1).any(|a| a == "-h" || a == "--help") {
        print_usage(program);
        process::exit(0);
    }

    let args = match parse_args(argv.get(1..).unwrap_or_default()) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            eprintln!();
            print_usage(program);
            process::exit(1);
        }
    };

    if !args.input.exists() {
        eprintln!("Error: Input file not found: {}", args.input.display());
        process::exit(2);
    }

    // Validate input file extension
    if !has_extension(&args.input, "z80") {
        eprintln!("Warning: Input file does not have .z80 extension");
        eprintln!();
    }

    println!("Z80 Snapshot to MDR Converter v{}", VERSION);
    println!();
    println!("Input:  {}", args.input.display());
    println!("Output: {}", args.output.display());
    println!();

    let mut config = Config::auto();
    config.overwrite = args.force;

    let converter = ConvertSnapshot::new(config);
    match converter.convert(&args.input, &args.output) {
        Ok(report) => {
            println!();
            println!("✓ Success!");
            println!(
                "  {} snapshot written to: {}",
                if report.extended { "128K" } else { "48K" },
                args.output.display()
            );
            println!("  {} sectors free", report.free_sectors);
            println!();
        }
        Err(e) => {
            eprintln!();
            eprintln!("✗ Conversion failed:");
            eprintln!("  {}", e);
            eprintln!();
            process::exit(e.exit_code());
        }
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut force = false;
    let mut paths = Vec::new();

    for arg in args {
        match arg.as_str() {
            "-f" | "--force" => force = true,
            s if s.starts_with('-') => return Err(format!("Unknown option: {}", s)),
            s => paths.push(PathBuf::from(s)),
        }
    }

    let (input, output) = match paths.len() {
        1 => {
            let output = paths[0].with_extension("mdr");
            (paths.swap_remove(0), output)
        }
        2 => {
            let output = paths.remove(1);
            (paths.remove(0), output)
        }
        0 => return Err("Missing input file".to_string()),
        _ => return Err("Too many arguments".to_string()),
    };

    if input == output {
        return Err("Input and output are the same file".to_string());
    }

    Ok(Args { input, output, force })
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn print_usage(program_name: &str) {
    let name = Path::new(program_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("z80-snapshot-to-mdr-converter");

    println!("Z80 Snapshot to MDR Converter v{}", VERSION);
    println!();
    println!("USAGE:");
    println!("  {} [OPTIONS] <input.z80> [output.mdr]", name);
    println!();
    println!("DESCRIPTION:");
    println!("  Converts ZX Spectrum 48K/128K .z80 snapshots to Microdrive cartridge");
    println!("  images (.mdr) that load and resume the program.");
    println!();
    println!("ARGUMENTS:");
    println!("  <input.z80>   Path to input snapshot");
    println!("  [output.mdr]  Path to output cartridge (default: input with .mdr)");
    println!();
    println!("OPTIONS:");
    println!("  -f, --force   Overwrite the output file if it exists");
    println!("  -h, --help    Show this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("  {}   Cartridge volume name (up to 10 characters)", VOLUME_ENV);
    println!("  RUST_LOG        Log level (default: info)");
    println!();
    println!("EXAMPLES:");
    println!("  {} game.z80", name);
    println!("  {} --force ./saves/game.z80 ./mdr/game.mdr", name);
    println!();
    println!("IMPORTANT:");
    println!("  - SamRAM and +3 special paging snapshots are not supported");
    println!("  - Sound chip registers are not restored");
    println!();
}
