//! Tether CLI
//!
//! Opens a file dialog through the picker plugin and prints the chosen paths.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tether::config::{CONFIG_FILE_NAME, TetherConfig};
use tether::filepicker::{
    ContextStore, FilePickerTask, LOAD_CONTEXT, LoadFilter, SAVE_CONTEXT, SaveFilter,
};
use tether::task::{Engine, TaskOutcome};

/// Tether file picker
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(
    about = "Open and save dialogs through an out-of-process picker plugin",
    long_about = None
)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Log filter, e.g. "debug" or "tether=trace"
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pick one or more existing files
    Load {
        /// File type filter
        #[arg(short, long, default_value = "all")]
        filter: LoadFilter,

        /// Context whose last folder is reused
        #[arg(long, default_value = LOAD_CONTEXT)]
        context: String,

        /// Folder to start in when the context is unknown
        #[arg(long, default_value = "")]
        default_path: String,

        /// Allow selecting several files
        #[arg(short, long)]
        multiple: bool,
    },

    /// Pick a file name to save to
    Save {
        /// Proposed file name; a stem ending in "?000" gets the next free number
        filename: String,

        /// File type filter
        #[arg(short, long, default_value = "all")]
        filter: SaveFilter,

        /// Context whose last folder is reused
        #[arg(long, default_value = SAVE_CONTEXT)]
        context: String,

        /// Folder to start in when the context is unknown
        #[arg(long, default_value = "")]
        default_path: String,
    },

    /// Print the remembered folder of every context
    Contexts,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(match &args.log_level {
            Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tether=info,plugin=info")),
        })
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Plugins are pumped cooperatively from a single thread.
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?
        .block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    let config = TetherConfig::load(&args.config)?;
    let contexts = Arc::new(ContextStore::new());
    let context_file = config.context_file();
    if let Some(path) = &context_file {
        contexts.load_file(path);
    }

    let mut picker = FilePickerTask::new(config.picker_config(), contexts.clone()).into_task();
    match args.command {
        Command::Contexts => {
            for (context, folder) in contexts.snapshot() {
                println!("{}\t{}", context, folder);
            }
            return Ok(());
        }
        Command::Load {
            filter,
            context,
            default_path,
            multiple,
        } => picker.open_load(filter, &default_path, &context, multiple),
        Command::Save {
            filename,
            filter,
            context,
            default_path,
        } => {
            picker.open_save(&filename, filter, &default_path, &context);
            info!("Proposing {} in {}", picker.default_filename(), picker.starting_folder());
        }
    }

    let outcome = Engine::default().run_to_completion(&mut picker).await;

    if let Some(path) = &context_file {
        if !contexts.is_empty() && !contexts.save_file(path) {
            warn!("Picker contexts were not saved");
        }
    }

    match outcome {
        TaskOutcome::Aborted => match picker.failure() {
            Some(failure) => bail!("file picker aborted: {}", failure),
            None => bail!("file picker aborted"),
        },
        TaskOutcome::Finished if picker.is_canceled() => {
            info!("Canceled");
            Ok(())
        }
        TaskOutcome::Finished => {
            for filename in picker.filenames() {
                println!("{}", filename);
            }
            Ok(())
        }
    }
}
