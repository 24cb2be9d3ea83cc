//! bioflux CLI - Command-line interface for biomarker-flux
//!
//! Commands:
//! - score: Score captured samples and print a risk report
//! - tasks: List the capture tasks
//! - baselines: Print the baseline profile of every task
//! - validate: Check captured samples against the task registry
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use biomarker_flux::pipeline::{parse_samples, score_samples};
use biomarker_flux::report::ReportFormatter;
use biomarker_flux::scoring::RiskScale;
use biomarker_flux::types::CapturedSample;
use biomarker_flux::{ScreeningConfig, ScreeningError, BIOFLUX_VERSION, PRODUCER_NAME};

/// bioflux - Voice, face and breath biomarker risk screening
#[derive(Parser)]
#[command(name = "bioflux")]
#[command(version = BIOFLUX_VERSION)]
#[command(about = "Score biomarker capture sessions", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score captured samples and print a risk report
    Score {
        /// Input file with a JSON array of samples (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Configuration file (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Risk scale, overriding the configured one
        #[arg(long)]
        scale: Option<ScaleChoice>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// List the capture tasks
    Tasks {
        /// Configuration file (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the baseline profile of every task
    Baselines {
        /// Configuration file (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Check captured samples against the task registry
    Validate {
        /// Input file with a JSON array of samples (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Configuration file (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Configuration file to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum ScaleChoice {
    /// Low / Moderate / High
    ThreeTier,
    /// Very Low / Low / Moderate / High / Very High
    FiveTier,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Plain-text report
    Text,
    /// Compact JSON result
    Json,
    /// Pretty-printed JSON result
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), BiofluxCliError> {
    match cli.command {
        Commands::Score {
            input,
            config,
            scale,
            format,
            output,
        } => cmd_score(&input, config.as_deref(), scale, format, &output),
        Commands::Tasks { config, json } => cmd_tasks(config.as_deref(), json),
        Commands::Baselines { config } => cmd_baselines(config.as_deref()),
        Commands::Validate {
            input,
            config,
            json,
        } => cmd_validate(&input, config.as_deref(), json),
        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<ScreeningConfig, BiofluxCliError> {
    match path {
        Some(path) => Ok(ScreeningConfig::load(path)?),
        None => {
            debug!("using built-in configuration");
            Ok(ScreeningConfig::default())
        }
    }
}

fn read_input(input: &Path) -> Result<String, BiofluxCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_score(
    input: &Path,
    config: Option<&Path>,
    scale: Option<ScaleChoice>,
    format: OutputFormat,
    output: &Path,
) -> Result<(), BiofluxCliError> {
    let mut config = load_config(config)?;
    match scale {
        Some(ScaleChoice::ThreeTier) => config.risk_scale = RiskScale::three_tier(),
        Some(ScaleChoice::FiveTier) => config.risk_scale = RiskScale::five_tier(),
        None => {}
    }

    let samples = parse_samples(&read_input(input)?)?;
    if samples.is_empty() {
        return Err(BiofluxCliError::NoSamples);
    }
    info!(samples = samples.len(), "scoring");

    let result = score_samples(&samples, &config)?;
    let formatter = ReportFormatter::new();
    let rendered = match format {
        OutputFormat::Text => formatter.render(&result),
        OutputFormat::Json => format!("{}\n", serde_json::to_string(&result)?),
        OutputFormat::JsonPretty => format!("{}\n", formatter.render_json(&result)?),
    };

    if output.to_string_lossy() == "-" {
        print!("{}", rendered);
    } else {
        fs::write(output, rendered)?;
    }

    Ok(())
}

fn cmd_tasks(config: Option<&Path>, json: bool) -> Result<(), BiofluxCliError> {
    let config = load_config(config)?;
    let registry = config.registry()?;

    if json {
        println!("{}", serde_json::to_string_pretty(registry.tasks())?);
        return Ok(());
    }

    println!("Capture Tasks");
    println!("=============");
    for (index, task) in registry.iter().enumerate() {
        println!(
            "{}. {} ({}, {}s, baseline '{}')",
            index + 1,
            task.name,
            task.modality,
            task.duration_seconds,
            task.baseline_key
        );
        println!("   {}", task.instructions);
    }
    println!("\nTotal duration: {}s", registry.total_duration_seconds());
    Ok(())
}

fn cmd_baselines(config: Option<&Path>) -> Result<(), BiofluxCliError> {
    let config = load_config(config)?;
    let table = config.baseline_table()?;
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

fn cmd_validate(input: &Path, config: Option<&Path>, json: bool) -> Result<(), BiofluxCliError> {
    let config = load_config(config)?;
    let registry = config.registry()?;
    let samples = parse_samples(&read_input(input)?)?;

    let errors: Vec<ValidationErrorDetail> = samples
        .iter()
        .enumerate()
        .filter_map(|(index, sample)| {
            check_sample(sample, &registry).map(|error| ValidationErrorDetail {
                index,
                task_name: sample.task_name.clone(),
                error,
            })
        })
        .collect();

    let report = ValidationReport {
        total_samples: samples.len(),
        valid_samples: samples.len() - errors.len(),
        invalid_samples: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total samples:   {}", report.total_samples);
        println!("Valid samples:   {}", report.valid_samples);
        println!("Invalid samples: {}", report.invalid_samples);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - {} (index {}): {}", err.task_name, err.index, err.error);
            }
        }
    }

    if report.invalid_samples > 0 {
        Err(BiofluxCliError::ValidationFailed(report.invalid_samples))
    } else {
        Ok(())
    }
}

fn check_sample(
    sample: &CapturedSample,
    registry: &biomarker_flux::TaskRegistry,
) -> Option<String> {
    let Some(task) = registry.get(sample.task_index) else {
        return Some(format!(
            "task index {} is outside the {} registered tasks",
            sample.task_index,
            registry.len()
        ));
    };
    if task.name != sample.task_name {
        return Some(format!(
            "task {} is '{}', sample names '{}'",
            sample.task_index, task.name, sample.task_name
        ));
    }
    if task.modality != sample.modality {
        return Some(format!(
            "task '{}' captures {}, sample is {}",
            task.name, task.modality, sample.modality
        ));
    }
    if !sample.has_data() {
        return Some("sample holds no measurements".to_string());
    }
    None
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), BiofluxCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "bioflux_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("biomarker-flux version {}", BIOFLUX_VERSION),
    });

    let loaded = match config {
        Some(path) if !path.exists() => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Config file {} does not exist", path.display()),
            });
            None
        }
        Some(path) => match ScreeningConfig::load(path) {
            Ok(config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Config file {} is valid", path.display()),
                });
                Some(config)
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid config: {}", e),
                });
                None
            }
        },
        None => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: "Using built-in configuration".to_string(),
            });
            Some(ScreeningConfig::default())
        }
    };

    if let Some(config) = &loaded {
        let tasks = config.tasks.len();
        let total: u64 = config
            .tasks
            .iter()
            .map(|t| u64::from(t.duration_seconds))
            .sum();
        checks.push(DoctorCheck {
            name: "tasks".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} tasks, {}s of capture", tasks, total),
        });

        let max_score: f64 = config
            .baseline_table()
            .map(|table| table.iter().map(|(_, p)| p.max_score()).sum())
            .unwrap_or(0.0);
        let top_band = config
            .risk_scale
            .bands()
            .last()
            .map(|b| b.min_score)
            .unwrap_or(0.0);
        checks.push(if top_band > max_score {
            DoctorCheck {
                name: "risk_scale".to_string(),
                status: CheckStatus::Warning,
                message: format!(
                    "Highest band starts at {} but sessions score at most {}",
                    top_band, max_score
                ),
            }
        } else {
            DoctorCheck {
                name: "risk_scale".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "{} bands, sessions score at most {}",
                    config.risk_scale.bands().len(),
                    max_score
                ),
            }
        });
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass samples with --input <file>)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: BIOFLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("bioflux Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(BiofluxCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum BiofluxCliError {
    Io(io::Error),
    Screening(ScreeningError),
    Json(serde_json::Error),
    NoSamples,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for BiofluxCliError {
    fn from(e: io::Error) -> Self {
        BiofluxCliError::Io(e)
    }
}

impl From<ScreeningError> for BiofluxCliError {
    fn from(e: ScreeningError) -> Self {
        BiofluxCliError::Screening(e)
    }
}

impl From<serde_json::Error> for BiofluxCliError {
    fn from(e: serde_json::Error) -> Self {
        BiofluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<BiofluxCliError> for CliError {
    fn from(e: BiofluxCliError) -> Self {
        match e {
            BiofluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            BiofluxCliError::Screening(e) => {
                let (code, hint) = match &e {
                    ScreeningError::InvalidConfig(_)
                    | ScreeningError::UnknownBaseline(_)
                    | ScreeningError::TomlError(_) => {
                        ("CONFIG_ERROR", "Run 'bioflux doctor --config <file>' for details")
                    }
                    ScreeningError::ParseError(_) | ScreeningError::JsonError(_) => {
                        ("PARSE_ERROR", "Input must be a JSON array of captured samples")
                    }
                    ScreeningError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
                    _ => ("SCREENING_ERROR", "Run with -v for more detail"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            BiofluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            BiofluxCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "No samples found in input".to_string(),
                hint: Some("Ensure the input array is not empty".to_string()),
            },
            BiofluxCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} samples failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            BiofluxCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_samples: usize,
    valid_samples: usize,
    invalid_samples: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    task_name: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
