use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fathom::schema::{FieldSpec, Schema};
use fathom::segment::{IndexReader, TermStorage, Toc};
use fathom::{FileStorage, Storage};
use tracing::info;

#[derive(Parser)]
#[command(name = "fathom")]
#[command(about = "Inspect a fathom index directory", long_about = None)]
struct Args {
    /// Index directory
    #[arg(long, env = "FATHOM_INDEX_DIR", default_value = "./index")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current TOC as JSON
    Toc {
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },
    /// List the terms of a field with their statistics
    Terms {
        field: String,
        /// Stop after this many terms per segment
        #[arg(long, default_value = "100")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let storage = FileStorage::new(&args.dir)
        .with_context(|| format!("opening {}", args.dir.display()))?;
    let toc = match Toc::read_latest(&storage)? {
        Some(toc) => toc,
        None => bail!("no index found in {}", args.dir.display()),
    };
    info!(generation = toc.generation, "Loaded TOC");

    match args.command {
        Command::Toc { pretty } => {
            let json = if pretty {
                serde_json::to_string_pretty(&toc)?
            } else {
                serde_json::to_string(&toc)?
            };
            println!("{}", json);
        }
        Command::Terms { field, limit } => {
            if !toc.fields.contains(&field) {
                bail!("field '{}' is not in the index", field);
            }
            // Term statistics only need the term index; declare every field
            // as a plain keyword
            let schema = toc
                .fields
                .iter()
                .fold(Schema::new(), |schema, name| {
                    schema.with_field(FieldSpec::keyword(name.as_str()))
                });
            let storage: Arc<dyn Storage> = Arc::new(storage);
            let reader = IndexReader::open(storage.as_ref(), &schema, Arc::new(toc))?;
            for segment in reader.segments() {
                println!("# {} ({} docs)", segment.id(), segment.doc_count_all());
                for (term, info) in segment.terms(&field)?.into_iter().take(limit) {
                    let storage = match info.storage {
                        TermStorage::Inline(_) => "inline".to_string(),
                        TermStorage::Extent { offset, length } => {
                            format!("{}+{}", offset, length)
                        }
                    };
                    println!(
                        "{}\tdocs={}\tweight={}\tlen={}..{}\tmax_weight={}\t{}",
                        String::from_utf8_lossy(&term),
                        info.doc_freq,
                        info.weight,
                        info.min_length,
                        info.max_length,
                        info.max_weight,
                        storage
                    );
                }
            }
        }
    }
    Ok(())
}
