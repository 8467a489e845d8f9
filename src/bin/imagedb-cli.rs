//! ImageDB command line tool
//!
//! Every command opens the database, runs once and closes it:
//!
//! ```text
//! imagedb-cli insert lena.pgm 64 128 192
//! imagedb-cli search lena.pgm 128
//! imagedb-cli export lena.pgm 128 out.pgm --ascii
//! imagedb-cli compact
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use imagedb::config::{DEFAULT_INDEX_FILE, DEFAULT_RECORD_FILE};
use imagedb::index::PageState;
use imagedb::{DBConfig, ImageDB, ImageKey, PgmFormat, StorageError};
use log::LevelFilter;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imagedb-cli", version, about = "Thresholded PGM image store")]
struct Cli {
    /// Index file
    #[arg(long, global = true, default_value = DEFAULT_INDEX_FILE)]
    index: PathBuf,

    /// Record file
    #[arg(long, global = true, default_value = DEFAULT_RECORD_FILE)]
    records: PathBuf,

    /// Log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a PGM image and store one binary variant per threshold
    Insert {
        image: PathBuf,
        #[arg(required = true, num_args = 1..)]
        thresholds: Vec<i32>,
    },

    /// Look up a (name, threshold) key
    Search { name: String, threshold: i32 },

    /// Remove a (name, threshold) key
    Remove { name: String, threshold: i32 },

    /// List all keys in order
    List,

    /// Dump every page slot of the index file
    Pages,

    /// Write a stored variant as a PGM file
    Export {
        name: String,
        threshold: i32,
        output: PathBuf,
        /// Write P2 (ASCII) instead of P5
        #[arg(long)]
        ascii: bool,
    },

    /// Rebuild both files without dead pages and payloads
    Compact,

    /// Show index statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Check the index invariants
    Verify,
}

fn main() {
    if let Err(e) = run() {
        match e.downcast_ref::<StorageError>() {
            Some(err) if err.is_rejection() => eprintln!("Rejected: {}", err),
            _ => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = DBConfig::with_paths(&cli.index, &cli.records);
    let mut db = ImageDB::open_with_config(config)
        .with_context(|| format!("opening {}", cli.index.display()))?;

    match cli.command {
        Command::Insert { image, thresholds } => {
            let keys = db
                .import_pgm(&image, &thresholds)
                .with_context(|| format!("importing {}", image.display()))?;
            for key in keys {
                println!("inserted {}", key);
            }
        }
        Command::Search { name, threshold } => {
            match db.search(&ImageKey::new(name, threshold)?)? {
                Some(key) => println!("found {}", key),
                None => println!("not found"),
            }
        }
        Command::Remove { name, threshold } => {
            match db.remove(&ImageKey::new(name, threshold)?)? {
                Some(key) => println!("removed {}", key),
                None => println!("not found"),
            }
        }
        Command::List => {
            let keys = db.traverse()?;
            for key in &keys {
                println!("{}", key);
            }
            println!("{} keys", keys.len());
        }
        Command::Pages => {
            for page in db.pages()? {
                let state = match page.state() {
                    PageState::Live => "live",
                    PageState::Tombstoned => "tombstoned",
                };
                let kind = if page.is_leaf() { "leaf" } else { "internal" };
                println!("page {} [{} {}] keys={}", page.offset(), state, kind, page.num_keys());
                for key in page.keys() {
                    println!("    {}", key);
                }
                if !page.is_leaf() && !page.children().is_empty() {
                    println!("    children {:?}", page.children());
                }
            }
        }
        Command::Export { name, threshold, output, ascii } => {
            let format = if ascii { PgmFormat::Ascii } else { PgmFormat::Binary };
            db.export_image(&ImageKey::new(name, threshold)?, &output, format)?;
            println!("exported to {} ({})", output.display(), format.magic());
        }
        Command::Compact => {
            let stats = db.compact()?;
            println!(
                "compacted: {} records moved, pages {} -> {}, bytes {} -> {}",
                stats.records_moved, stats.pages_before, stats.pages_after, stats.bytes_before, stats.bytes_after
            );
        }
        Command::Stats { json } => {
            let stats = db.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("order:            {}", stats.order);
                println!("height:           {}", stats.height);
                println!("pages:            {}", stats.page_count);
                println!("root offset:      {}", stats.root_offset);
                println!("root keys:        {}", stats.root_keys);
                println!("root is leaf:     {}", stats.root_is_leaf);
                println!("next free offset: {}", stats.next_free_offset);
                println!("index bytes:      {}", stats.index_bytes);
                println!("record bytes:     {}", stats.record_bytes);
            }
        }
        Command::Verify => {
            let keys = db.verify()?;
            println!("ok: {} keys, height {}", keys, db.stats()?.height);
        }
    }

    db.close()?;
    Ok(())
}

fn init_logging(verbose: u8) -> Result<()> {
    use log4rs::append::console::{ConsoleAppender, Target};
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S%.3f)} [{l}] {t} - {m}{n}")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))?;

    if log4rs::init_config(config).is_err() {
        bail!("logger already initialised");
    }
    Ok(())
}
