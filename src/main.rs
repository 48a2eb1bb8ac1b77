//! Main entry point for the ziputil CLI application.
//!
//! Dispatches each subcommand to the library: archive packing and
//! unpacking, archive listing, and HTTP download/upload.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ziputil::{
    ArchiveManager, Cli, Command, HttpTransfer, LocalFileReader, ZipArchiveManager, ZipExtractor,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Pack {
            src,
            dest,
            base_dir,
        } => ZipArchiveManager::new().pack(src, dest, *base_dir).await?,
        Command::Unpack { archive, dest } => ZipArchiveManager::new().unpack(archive, dest).await?,
        Command::List { archive, long } => list_files(archive, *long).await?,
        Command::Download { url, file, api_key } => {
            let written = HttpTransfer::new()?.download(file, url, api_key).await?;
            if !cli.is_quiet() {
                eprintln!("Total bytes transferred: {}", format_size(written));
            }
        }
        Command::Upload { file, url, api_key } => {
            HttpTransfer::new()?.upload(url, file, api_key).await?
        }
    }

    Ok(())
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format: just entry names, one per line
/// - Long format (`-l`): table with size, compression ratio, and timestamps
async fn list_files(archive: &Path, long: bool) -> Result<()> {
    let extractor = ZipExtractor::new(Arc::new(LocalFileReader::new(archive)?));
    let entries = extractor.list_files().await?;

    if long {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    // Totals for the summary line
    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        if !long {
            println!("{}", entry.file_name);
            continue;
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();

        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.file_name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if long {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>18}  {} files ({})",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count,
            format_size(total_uncompressed)
        );
    }

    Ok(())
}

/// Space saved by compression, as a right-aligned percentage.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    let saved = match uncompressed {
        0 => 0,
        n => 100 - (compressed.min(n) * 100 / n),
    };
    format!("{:>4}%", saved)
}

/// Format a byte size into a human-readable string.
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
