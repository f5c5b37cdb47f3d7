use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use autoreplay::automation::Automation;
use autoreplay::config::{self as cfg, Config};
use autoreplay::executor::{ExecutionProgress, ExecutionStatus};
use autoreplay::model::{ImageTemplate, Script, TemplateLibrary};
use autoreplay::vision::{Frame, TemplateMatcher};

/// autoreplay CLI
#[derive(Debug, Parser)]
#[command(
    name = autoreplay::PKG_NAME,
    version = autoreplay::PKG_VERSION,
    about = "Record desktop input, replay it, and drive replays with template matching"
)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short = 'c', long = "config", default_value = "config/default.json", global = true)]
    config: PathBuf,

    /// Set log level (e.g., trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(long = "log-level", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record keyboard and mouse input until Ctrl+C (or the duration elapses)
    Record {
        /// Where to write the recorded script
        #[arg(short, long)]
        output: PathBuf,

        /// Script name (defaults to the output file stem)
        #[arg(long)]
        name: Option<String>,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Replay a script; Ctrl+C cancels the run
    Play {
        script: PathBuf,

        /// Directory of template images referenced by the script
        #[arg(short, long)]
        templates: Option<PathBuf>,

        /// Log actions instead of injecting input
        #[arg(long = "dry-run")]
        dry_run: bool,

        /// Override the playback speed multiplier
        #[arg(long)]
        speed: Option<f64>,

        /// Override the script's repeat count
        #[arg(long)]
        repeat: Option<u32>,

        /// Keep going after failed actions
        #[arg(long = "continue-on-error")]
        continue_on_error: bool,
    },

    /// Match a template against a screenshot file and print the results as JSON
    Find {
        screenshot: PathBuf,
        template: PathBuf,

        /// Match threshold (defaults to recognition.default_threshold)
        #[arg(long)]
        threshold: Option<f64>,

        /// Report every non-overlapping match instead of the best one
        #[arg(long)]
        all: bool,
    },

    /// Report input and screen-capture permissions
    Probe,

    /// Print the JSON Schema for the configuration and exit
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // --log-level wins over RUST_LOG.
    match args.log_level.as_deref() {
        Some(level) => autoreplay::init_tracing_with_level(
            autoreplay::parse_level(level).unwrap_or(tracing::Level::INFO),
        ),
        None => autoreplay::init_tracing(),
    }

    if let Command::Schema = args.command {
        let mut stdout = std::io::stdout().lock();
        cfg::write_schema_to_writer(&mut stdout)?;
        println!();
        return Ok(());
    }

    let config = load_config(&args.config).await?;
    info!(
        version = autoreplay::PKG_VERSION,
        config = %args.config.display(),
        "Starting autoreplay"
    );

    match args.command {
        Command::Record {
            output,
            name,
            duration,
        } => record(config, &output, name, duration).await,
        Command::Play {
            script,
            templates,
            dry_run,
            speed,
            repeat,
            continue_on_error,
        } => {
            let mut config = config;
            config.playback.dry_run |= dry_run;
            config.playback.continue_on_error |= continue_on_error;
            if let Some(speed) = speed {
                config.playback.speed = speed;
            }
            cfg::validate_config(&config)?;
            play(config, &script, templates.as_deref(), repeat).await
        }
        Command::Find {
            screenshot,
            template,
            threshold,
            all,
        } => find(&config, &screenshot, &template, threshold, all),
        Command::Probe => probe(config),
        Command::Schema => Ok(()),
    }
}

/// Missing default config is not an error; an explicit broken one is.
async fn load_config(path: &Path) -> Result<Config> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let config = cfg::load_from_path_async(path).await?;
        debug!(target: "autoreplay", "Configuration loaded successfully");
        Ok(config)
    } else {
        warn!(config = %path.display(), "Config file not found; using defaults");
        Ok(Config::default())
    }
}

async fn record(config: Config, output: &Path, name: Option<String>, duration: Option<u64>) -> Result<()> {
    let max_depth = config.playback.max_depth;
    let automation = Automation::from_config(config)?;
    automation.start_capture()?;
    info!("Recording... press Ctrl+C to stop");

    match duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;
        }
    }

    let sequence = automation.stop_capture()?;
    let name = name.unwrap_or_else(|| {
        output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording".to_string())
    });
    let script = Script::new(name, sequence);
    script
        .validate(max_depth)
        .context("Recorded script is invalid")?;
    cfg::save_script_to_path(&script, output)?;
    info!(
        actions = script.actions.len(),
        duration_ms = script.actions.total_duration().as_millis() as u64,
        output = %output.display(),
        "Recording saved"
    );
    Ok(())
}

async fn play(config: Config, path: &Path, templates: Option<&Path>, repeat: Option<u32>) -> Result<()> {
    let mut script = cfg::load_script_from_path(path, config.playback.max_depth)?;
    if let Some(repeat) = repeat {
        script.repeat_count = repeat.max(1);
        script.loop_forever = false;
    }
    let library = match templates {
        Some(dir) => TemplateLibrary::load_dir(dir, config.recognition.default_threshold)?,
        None => TemplateLibrary::new(),
    };
    info!(templates = library.len(), "Templates loaded");

    let automation = Arc::new(Automation::from_config(config)?.with_templates(library));
    let mut ctx = automation.new_context().with_progress(|p: ExecutionProgress| {
        debug!(
            target: "autoreplay",
            current = p.current,
            total = p.total,
            iteration = p.iteration,
            status = ?p.status,
            "progress"
        );
    });

    let canceller = Arc::clone(&automation);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling");
            canceller.cancel();
        }
    });

    let result = automation.execute_script(&script, &mut ctx).await;
    ctrl_c.abort();

    println!("{}", serde_json::to_string_pretty(&result)?);
    match result.status {
        ExecutionStatus::Completed if result.has_failures() => {
            warn!(failed = result.actions_failed, "Completed with failures");
            Ok(())
        }
        ExecutionStatus::Completed | ExecutionStatus::Cancelled => Ok(()),
        status => bail!(
            "Execution ended with status {status:?}: {}",
            result.message.unwrap_or_default()
        ),
    }
}

fn find(config: &Config, screenshot: &Path, template: &Path, threshold: Option<f64>, all: bool) -> Result<()> {
    let threshold = threshold.unwrap_or(config.recognition.default_threshold);
    let screen = image::open(screenshot)
        .with_context(|| format!("Failed to open screenshot {}", screenshot.display()))?
        .to_rgba8();
    let template = ImageTemplate::from_file(template, threshold)?;
    let frame = Frame::new(screen);
    let matcher = TemplateMatcher::new(config.recognition.max_matches);

    let results = if all {
        matcher.find_all(&frame, &template)
    } else {
        vec![matcher.best_match(&frame, &template)]
    };
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn probe(config: Config) -> Result<()> {
    let automation = Automation::from_config(config)?;
    let report = serde_json::json!({
        "input": automation.check_input_permission(),
        "screen_capture": automation.check_screen_capture_permission(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
