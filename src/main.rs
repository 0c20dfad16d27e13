use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use image_gallery::utils::human_bytes;
use image_gallery::{FetchError, GalleryConfig, GallerySession, ImageItem, Presenter};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gallery")]
#[command(about = "Reorderable gallery of remote images")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only report errors
    #[arg(short, long)]
    quiet: bool,

    /// Log cache and fetch decisions
    #[arg(short, long)]
    verbose: bool,

    /// Gallery document
    document: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every entry
    List,
    /// Insert an image url, appending by default
    Add {
        url: String,
        #[arg(long)]
        at: Option<usize>,
    },
    /// Remove the entry at a position
    Remove { position: usize },
    /// Move an entry to a new position
    Move { from: usize, to: usize },
    /// Resolve every entry through the cache and network
    Fetch {
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
}

struct Report {
    ready: usize,
    failed: usize,
}

impl Presenter for Report {
    fn on_image_ready(&mut self, position: usize, image: &ImageItem) {
        self.ready += 1;
        println!(
            "{:>4}  ready   {}x{} ({})  {}",
            position,
            image.width,
            image.height,
            human_bytes(image.bytes.len() as u64),
            image.key
        );
    }

    fn on_image_failed(&mut self, position: usize, reason: &FetchError) {
        self.failed += 1;
        println!("{:>4}  failed  {}", position, reason);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("image_gallery={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = GalleryConfig::load(cli.config.as_deref());
    let mut session = GallerySession::open(&cli.document, &config)
        .with_context(|| format!("failed to open {}", cli.document.display()))?;

    let timed_out = match cli.command {
        Command::List => {
            for (position, entry) in session.gallery().entries().iter().enumerate() {
                println!("{:>4}  {:>6.3}  {}", position, entry.aspect_ratio, entry.source);
            }
            None
        }
        Command::Add { url, at } => {
            let position = session.insert_url(&url, at)?;
            println!("added at {}", position);
            None
        }
        Command::Remove { position } => {
            let entry = session.remove(position)?;
            println!("removed {}", entry.source);
            None
        }
        Command::Move { from, to } => {
            session.move_entry(from, to)?;
            None
        }
        Command::Fetch { timeout } => {
            let mut report = Report { ready: 0, failed: 0 };
            let finished = session.load_all(&mut report, Duration::from_secs(timeout));
            println!("{} ready, {} failed", report.ready, report.failed);
            (!finished).then_some(timeout)
        }
    };

    session.close()?;
    if let Some(timeout) = timed_out {
        bail!("timed out after {}s with fetches still pending", timeout);
    }
    Ok(())
}
