// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{debug, info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::path::{Path, PathBuf};

use narravox::app_config::{self, Config};
use narravox::app_controller::{analyze_script, Controller, RunReport};
use narravox::file_utils::FileManager;
use narravox::markup::{render_segments, RenderOptions};
use narravox::synthesis::ArtifactStatus;
use narravox::voice::VoiceAssignments;

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize images and speech for a script or a folder of scripts
    Run(RunArgs),

    /// Print the segments of a script without calling any service
    Parse {
        /// Script file to parse
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,

        /// Print normalized markup instead of JSON
        #[arg(long)]
        markup: bool,

        /// Configuration file path
        #[arg(short, long, default_value = "conf.json")]
        config_path: String,
    },

    /// Generate shell completions for narravox
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Script file or directory of scripts to process
    #[arg(value_name = "INPUT_PATH")]
    input_path: PathBuf,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json")]
    config_path: String,

    /// Maximum number of requests in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Directory receiving one sub-directory per run
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,
}

/// narravox - illustrated audiobooks from annotated scripts
///
/// Reads a narration script with speaker, emotion and image tags, and
/// generates one image per scene and one speech clip per line.
#[derive(Parser, Debug)]
#[command(name = "narravox")]
#[command(version)]
#[command(about = "Illustrated audiobook synthesis from narration markup")]
#[command(long_about = "narravox turns a narration script into scene images and voiced lines.

EXAMPLES:
    narravox run chapter1.xml                   # Synthesize one script
    narravox run --concurrency 4 chapters/      # Process a folder, 4 requests at a time
    narravox run -o out/ chapter1.xml           # Write runs under out/
    narravox parse chapter1.xml                 # Print segments as JSON
    narravox parse --markup chapter1.xml        # Print normalized markup
    narravox completions bash > narravox.bash   # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically. API keys may be left empty and supplied through
    NARRAVOX_SPEECH_API_KEY, NARRAVOX_IMAGE_API_KEY and NARRAVOX_TRANSCRIPTION_API_KEY.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        // The logger itself lets everything through; max_level does the filtering
        let logger = Box::new(CustomLogger::new(LevelFilter::Trace));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Emoji and ANSI color for a log level
    fn decoration(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("❌ ", "1;31"),
            Level::Warn => ("🚧 ", "1;33"),
            Level::Info => (" ", "1;32"),
            Level::Debug => ("🔍 ", "1;36"),
            Level::Trace => ("📋 ", "1;35"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let (emoji, color) = Self::decoration(record.level());
            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "\x1B[{}m{} {} {}\x1B[0m", color, now, emoji, record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Info until the config tells otherwise
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "narravox", &mut std::io::stdout());
            Ok(())
        }
        Commands::Parse {
            script,
            markup,
            config_path,
        } => run_parse(&script, markup, &config_path),
        Commands::Run(args) => run_synthesis(args).await,
    }
}

/// Load the config file, apply CLI overrides and validate
fn load_config(options: &RunArgs) -> Result<Config> {
    let mut config = Config::load_or_create(&options.config_path)?;

    if let Some(concurrency) = options.concurrency {
        config.scheduler.max_concurrent_requests = concurrency;
    }
    if let Some(output_dir) = &options.output_dir {
        config.output_dir = output_dir.clone();
    }
    if let Some(log_level) = &options.log_level {
        config.log_level = log_level.clone().into();
    }

    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

async fn run_synthesis(options: RunArgs) -> Result<()> {
    // Apply the CLI log level before the config is even read
    if let Some(cmd_log_level) = &options.log_level {
        let level: app_config::LogLevel = cmd_log_level.clone().into();
        log::set_max_level(level.to_level_filter());
    }

    let config = load_config(&options)?;
    log::set_max_level(config.log_level.to_level_filter());

    let output_root = config.output_dir.clone();
    FileManager::ensure_dir(&output_root)?;

    let assignments_file = config.voices.assignments_file.clone();
    let mut controller = Controller::from_config(config).await?;
    if let Some(path) = assignments_file.as_ref().filter(|path| path.is_file()) {
        let assignments = VoiceAssignments::load(path)?;
        info!("Loaded {} speaker bindings from {}", assignments.len(), path.display());
        controller = controller.with_assignments(assignments);
    }

    if options.input_path.is_file() {
        let report = controller.run_file(&options.input_path, &output_root).await?;
        print_summary(&options.input_path, &report);
    } else if options.input_path.is_dir() {
        let reports = controller.run_folder(&options.input_path, &output_root).await?;
        for (script, report) in &reports {
            print_summary(script, report);
        }
    } else {
        return Err(anyhow!("Input path does not exist: {:?}", options.input_path));
    }

    if let Some(path) = &assignments_file {
        controller.assignments().save(path)?;
        debug!("Saved {} speaker bindings to {}", controller.assignments().len(), path.display());
    }

    Ok(())
}

fn print_summary(script: &Path, report: &RunReport) {
    let failed = report.manifest.len() - report.synthesized();
    match &report.run_dir {
        Some(dir) if failed == 0 => info!("Success: {} -> {}", script.display(), dir.display()),
        Some(dir) => warn!(
            "{}: {} of {} segments missing ({} unresolved, {} orphaned), see {}",
            script.display(),
            failed,
            report.manifest.len(),
            report.manifest.count(ArtifactStatus::Unresolved),
            report.manifest.count(ArtifactStatus::Orphaned),
            dir.display()
        ),
        None => info!("{}: nothing to synthesize", script.display()),
    }
}

fn run_parse(script_path: &Path, markup: bool, config_path: &str) -> Result<()> {
    let config = if Path::new(config_path).exists() {
        Config::load_or_create(config_path)?
    } else {
        Config::default()
    };
    log::set_max_level(LevelFilter::Warn);

    let script = FileManager::read_to_string(script_path)?;
    let analysis = analyze_script(&config.narration, &script, &config.narration.speakers)?;

    let output = if markup {
        render_segments(&analysis.segments, &RenderOptions::from_config(&config.narration))
    } else {
        serde_json::to_string_pretty(&analysis).context("Failed to serialize segments")?
    };
    println!("{}", output);
    Ok(())
}
