//! Prints the structure and, optionally, the values of a CFile.
//!
//! An example invocation:
//!
//! ```shell
//! cargo run --bin cfile-dump -- /path/to/column.cfile --values --start 100 --count 10
//! ```
//!
//! Set `RUST_LOG=debug` to log each block read.

use std::{path::PathBuf, process::ExitCode};

use cfile::{
    format::{BlockPointer, POSITIONAL_INDEX},
    CFileReader, Error, ReaderOptions,
};
use cfile_storage::PosixReader;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// CFile to read.
    path: PathBuf,

    /// Print values as well as the file structure.
    #[clap(long)]
    values: bool,

    /// First ordinal to print.
    #[clap(long, default_value = "0")]
    start: u32,

    /// Maximum number of values to print (all of them, by default).
    #[clap(long)]
    count: Option<usize>,

    /// Skip block checksum verification.
    #[clap(long)]
    no_verify_checksums: bool,
}

fn dump(args: &Args) -> Result<(), Error> {
    let file = PosixReader::open(&args.path)?;
    let options = ReaderOptions {
        verify_checksums: !args.no_verify_checksums,
        ..ReaderOptions::default()
    };
    let reader = CFileReader::open(options, file)?;

    let header = reader.header();
    let footer = reader.footer();
    println!("{}:", args.path.display());
    println!("  size: {} bytes", reader.file_size());
    println!(
        "  version: {}.{}",
        header.major_version, header.minor_version
    );
    println!("  rows: {}", footer.n_rows);
    println!("  type: {:?}, encoding: {:?}", footer.data_type, footer.encoding);
    for entry in header.metadata.iter().chain(&footer.metadata) {
        println!("  metadata: {} = {}", entry.key, entry.value);
    }
    for root in &footer.index_roots {
        println!("  index {:?}: root {}", root.identifier, root.root);
    }

    if footer.n_rows > 0 && footer.index_root(POSITIONAL_INDEX).is_some() {
        let (first, _) = reader.search_position(0)?;
        let (last, _) = reader.search_position(footer.n_rows - 1)?;
        print_block_range(first, last);
    }

    if args.values && args.start < footer.n_rows {
        let mut iter = reader.new_iterator_by_pos()?;
        iter.seek_to_ordinal(args.start)?;
        let count = args
            .count
            .unwrap_or((footer.n_rows - args.start) as usize);
        for (i, value) in iter.get_next_values(count)?.into_iter().enumerate() {
            println!("{}\t{value}", args.start as usize + i);
        }
    }
    Ok(())
}

fn print_block_range(first: BlockPointer, last: BlockPointer) {
    println!("  first data block: {first}");
    println!("  last data block: {last}");
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match dump(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}: {error}", args.path.display());
            ExitCode::FAILURE
        }
    }
}
