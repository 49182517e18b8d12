use clap::{Parser, Subcommand};
use photoframe::config::{self, FrameConfig, Layout, RendererMode};
use photoframe::display::{CommandDisplay, Display, MirrorDisplay};
use photoframe::imaging::{CommandConverter, Converter, NoConverter, Normalizer};
use photoframe::ingest::Ingestor;
use photoframe::output;
use photoframe::render::{self, RenderJob};
use photoframe::rotation::RotationTracker;
use photoframe::store::ReadySet;
use photoframe::types::ImageId;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("PHOTOFRAME_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("PHOTOFRAME_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "photoframe")]
#[command(about = "Rotate uploaded photographs on a picture-frame display")]
#[command(long_about = "\
Rotate uploaded photographs on a picture-frame display

Uploads are normalized into panel-sized, dithered bitmaps and published to a
ready set. A scheduled `photoframe render` shows the current image and moves
to the next one only after the display reports success.

Directory layout (under paths.root):

  photos_src/                      # Intake: uploads being normalized
  photos_ready/<id>.bmp            # Ready set, shown in id order
  thumbs/<id>.jpg                  # One thumbnail per ready image
  state/rotation.json              # Current image
  state/render.lock                # Held while a render runs
  state/render-history.jsonl       # One line per render

Ids look like 20250118-093012-IMG_4411-3fa9c2d0: upload time, original
file name, content hash. Newer uploads join the end of the rotation.

Exit status of `render`: 0 shown, or nothing to do (empty rotation, another
render in progress; stdout and the history say which), 2 display failed,
1 internal error.

Run 'photoframe gen-config' to generate a documented photoframe.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Configuration file; missing means stock defaults
    #[arg(long, default_value = "photoframe.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize image files and add them to the rotation
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show the current image and advance on success
    Render,
    /// List ready images in rotation order
    List,
    /// Show the rotation pointer and the last render
    Status,
    /// Move the rotation to the next image without rendering
    Advance,
    /// Make an image the current one
    SetCurrent { id: ImageId },
    /// Remove images and their thumbnails from the ready set
    Delete {
        #[arg(required = true)]
        ids: Vec<ImageId>,
    },
    /// Remove files abandoned by interrupted uploads
    Sweep {
        /// Only remove files older than this many seconds
        #[arg(long, default_value_t = 3600)]
        grace_secs: u64,
    },
    /// Print a stock photoframe.toml with all options documented
    GenConfig,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(ExitCode::SUCCESS);
    }

    let frame_config = config::load_config(&cli.config)?;
    let layout = frame_config.layout(config_base(&cli.config));
    let store = ReadySet::open(&layout.ready, &layout.thumbs)?;

    match cli.command {
        Command::Ingest { files } => {
            init_thread_pool(&frame_config.processing);
            let ingestor = Ingestor::new(normalizer(&frame_config), store, &layout.source)?;
            let results = ingestor.ingest_paths(&files);
            output::print_ingest_results(&results);
            if results.iter().any(|(_, r)| r.is_err()) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Render => {
            let tracker = RotationTracker::new(store, &layout.state)?;
            let display = display(&frame_config, &layout);
            let mut job = RenderJob::new(&tracker, display.as_ref(), frame_config.frame_spec(), &layout.state);
            if frame_config.render.history {
                job = job.with_history(layout.history_path());
            }
            let outcome = job.run()?;
            output::print_outcome(&outcome);
            return Ok(ExitCode::from(outcome.exit_code()));
        }
        Command::List => {
            let tracker = RotationTracker::new(store, &layout.state)?;
            let status = tracker.status()?;
            let ids = tracker.store().ids()?;
            output::print_list(&ids, status.cursor.as_ref());
        }
        Command::Status => {
            let tracker = RotationTracker::new(store, &layout.state)?;
            let status = tracker.status()?;
            let last = render::last_record(&layout.history_path())?;
            output::print_status(&status, last.as_ref());
        }
        Command::Advance => {
            let tracker = RotationTracker::new(store, &layout.state)?;
            let next = tracker.advance()?;
            println!("{}", output::format_current(next.as_ref()));
        }
        Command::SetCurrent { id } => {
            let tracker = RotationTracker::new(store, &layout.state)?;
            tracker.set_current(&id)?;
            println!("{}", output::format_current(Some(&id)));
        }
        Command::Delete { ids } => {
            for id in &ids {
                store.delete(id)?;
                println!("{}", output::format_deleted(id));
            }
        }
        Command::Sweep { grace_secs } => {
            let grace = Duration::from_secs(grace_secs);
            let report = store.sweep(grace)?;
            let ingestor = Ingestor::new(normalizer(&frame_config), store, &layout.source)?;
            let intake = ingestor.sweep_intake(grace)?;
            output::print_sweep(&report, intake);
        }
        // Printed before the config is loaded.
        Command::GenConfig => {}
    }

    Ok(ExitCode::SUCCESS)
}

/// Log to stderr so stdout carries only command output. `RUST_LOG` overrides
/// the default `info` level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores. Users can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

/// Relative paths in the config resolve against the file's own directory.
fn config_base(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn normalizer(config: &FrameConfig) -> Normalizer<Box<dyn Converter>> {
    let converter: Box<dyn Converter> = if config.converter.enabled {
        Box::new(CommandConverter {
            program: config.converter.program.clone(),
            args: config.converter.args.clone(),
            timeout: config.converter.timeout(),
        })
    } else {
        Box::new(NoConverter)
    };
    Normalizer::new(
        config.frame_spec(),
        config.thumbnail_spec(),
        config.decode_limits(),
        converter,
    )
}

fn display(config: &FrameConfig, layout: &Layout) -> Box<dyn Display> {
    match config.renderer.mode {
        RendererMode::Command => Box::new(CommandDisplay {
            program: config.renderer.program.clone(),
            args: config.renderer.args.clone(),
            timeout: config.renderer.timeout(),
        }),
        RendererMode::Mirror => Box::new(MirrorDisplay {
            path: layout.mirror.clone(),
        }),
    }
}
