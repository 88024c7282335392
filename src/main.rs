//! Main entry point for the attrzip CLI application.
//!
//! Maps the `add`, `unzip`, `list` and `delete` subcommands onto the
//! archive engine operations.

use anyhow::{Context, Result};
use clap::Parser;

use attrzip::cli::Command;
use attrzip::{ArchiveEngine, Cli, EntryListing};

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .format_timestamp(None)
        .init();

    let engine = ArchiveEngine::new(cli.engine_config());

    match &cli.command {
        Command::Add {
            zipfile,
            files,
            relative_to,
            recursive,
        } => {
            let entries = Command::append_entries(files, relative_to.as_ref(), *recursive);
            engine
                .append(zipfile, &entries)
                .with_context(|| format!("Failed to add to {}", zipfile.display()))?;
        }
        Command::Unzip {
            zipfile,
            files,
            directories,
            extract_dir,
            replace,
            restore_permissions,
        } => {
            let options = Command::extract_options(files, directories, *replace, *restore_permissions);
            let count = engine
                .extract(zipfile, extract_dir, &options)
                .with_context(|| format!("Failed to extract {}", zipfile.display()))?;
            eprintln!("Extracted {count} entries to {}", extract_dir.display());
        }
        Command::List { zipfile } => {
            let entries = engine
                .list(zipfile)
                .with_context(|| format!("Failed to list {}", zipfile.display()))?;
            print_listing(&entries);
        }
        Command::Delete { zipfile, names } => {
            engine
                .delete(zipfile, names)
                .with_context(|| format!("Failed to delete from {}", zipfile.display()))?;
        }
    }

    Ok(())
}

/// Print the archive contents as a table with a totals line.
fn print_listing(entries: &[EntryListing]) {
    println!(
        "{:>10}  {:>6}  {:>10}  {:>5}  {:>8}  {:>5}  {:>8}  Name",
        "Length", "Method", "Size", "Cmpr", "Date", "Time", "CRC-32"
    );
    println!("{}", "-".repeat(78));

    let mut total_length = 0u64;
    let mut total_size = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        println!(
            "{:>10}  {:>6}  {:>10}  {:>4}%  {}  {}  {}  {}",
            entry.length, entry.method, entry.size, entry.ratio, entry.date, entry.time, entry.crc32, entry.name
        );

        // Totals count files only
        if !entry.is_dir() {
            total_length += entry.length as u64;
            total_size += entry.size as u64;
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(78));
    let total_ratio = if total_length > 0 {
        total_size * 100 / total_length
    } else {
        0
    };
    println!(
        "{:>10}  {:>6}  {:>10}  {:>4}%  {:>26}  {} files",
        total_length, "", total_size, total_ratio, "", file_count
    );
}
