use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vitalwatch::cli::{self, AskKind, OutputFormat};
use vitalwatch::config;
use vitalwatch::models::ReportType;

#[derive(Debug, Parser)]
#[command(name = "vitalwatch")]
#[command(about = "Vital-sign monitoring, medical reports and an AI health assistant")]
struct App {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sign in with email and password and store the session
    Login {
        #[arg(long)]
        email: String,
        /// Read from VITALWATCH_PASSWORD or prompted when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Remove the stored session
    Logout,
    /// Latest vitals for a device and the unread alert count
    Dashboard {
        /// Device id or name (default: newest device)
        #[arg(long)]
        device: Option<String>,
    },
    /// Manage monitoring devices
    Devices {
        #[command(subcommand)]
        action: DeviceAction,
    },
    /// Stream live telemetry for a device
    Watch {
        /// Device id or name (default: newest device)
        #[arg(long)]
        device: Option<String>,
        /// Stop after N seconds (default: run until interrupted)
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Upload, browse and analyze medical reports
    Reports {
        #[command(subcommand)]
        action: ReportAction,
    },
    /// Show or dismiss unread alerts
    Alerts {
        #[command(subcommand)]
        action: AlertAction,
    },
    /// Ask the AI assistant
    Ask {
        #[command(subcommand)]
        topic: AskTopic,
    },
    /// AI analysis of the latest vital signs
    Vitals {
        /// Device id or name (default: newest device)
        #[arg(long)]
        device: Option<String>,
    },
    /// Emergency phone numbers
    Emergency,
    /// Host the serverless analysis functions over HTTP
    Serve {
        /// Bind address (default: [functions] bind)
        #[arg(long)]
        bind: Option<String>,
        /// Worker threads (default: [functions] workers)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Function invocation statistics from the activity log
    Activity {
        /// Output format: table (default), json
        #[arg(long, default_value = "table")]
        format: String,
        /// Only include the last N days of data
        #[arg(long)]
        days: Option<u32>,
    },
    /// Check config, session, backend and gateway setup
    Health,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum DeviceAction {
    /// List registered devices
    List {
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Register a new device
    Add { name: String },
}

#[derive(Debug, Subcommand)]
enum ReportAction {
    /// List reports, optionally filtered by title or type
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Upload a report file (max 20 MB)
    Upload {
        file: PathBuf,
        #[arg(long)]
        title: String,
        /// blood_test, xray, ct_scan, mri, ultrasound or other
        #[arg(long = "type", value_parser = parse_report_type)]
        report_type: ReportType,
        /// Date of the report (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Download a report file
    Download {
        id: String,
        /// Destination file or directory (default: current directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete a report and its stored file
    Delete { id: String },
    /// Run AI analysis on a report
    Analyze { id: String },
}

#[derive(Debug, Subcommand)]
enum AlertAction {
    /// List unread alerts
    List {
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Mark an alert as read
    Dismiss { id: String },
}

#[derive(Debug, Subcommand)]
enum AskTopic {
    /// Describe symptoms for a preliminary assessment
    Symptoms {
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,
    },
    /// Look up a medicine
    Medicine {
        #[arg(trailing_var_arg = true, required = true)]
        name: Vec<String>,
    },
    /// Ask a question about your reports
    Reports {
        #[arg(trailing_var_arg = true, required = true)]
        question: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Write a default config file to ~/.vitalwatch/config.toml
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Set a value by dotted key, e.g. `backend.url`
    Set { key: String, value: String },
    /// Reset the global config to defaults
    Reset,
}

fn parse_report_type(s: &str) -> Result<ReportType, String> {
    ReportType::parse(s).ok_or_else(|| {
        let codes: Vec<&str> = ReportType::ALL.iter().map(|t| t.code()).collect();
        format!("unknown report type `{s}` (expected one of: {})", codes.join(", "))
    })
}

fn init_tracing() {
    let level = config::load().logging.level;
    let filter = EnvFilter::try_from_env("VITALWATCH_LOG")
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let app = App::parse();
    init_tracing();

    match app.command {
        Commands::Login { email, password } => cli::run_login(&email, password),
        Commands::Logout => cli::run_logout(),
        Commands::Dashboard { device } => cli::run_dashboard(device.as_deref()),
        Commands::Devices { action } => match action {
            DeviceAction::List { format } => {
                cli::run_devices_list(OutputFormat::from_str_opt(Some(&format)))
            }
            DeviceAction::Add { name } => cli::run_devices_add(&name),
        },
        Commands::Watch { device, seconds } => cli::run_watch(device.as_deref(), seconds),
        Commands::Reports { action } => match action {
            ReportAction::List { search, format } => cli::run_reports_list(
                search.as_deref(),
                OutputFormat::from_str_opt(Some(&format)),
            ),
            ReportAction::Upload {
                file,
                title,
                report_type,
                date,
                notes,
            } => cli::run_reports_upload(&file, &title, report_type, date, notes),
            ReportAction::Download { id, out } => cli::run_reports_download(&id, out.as_deref()),
            ReportAction::Delete { id } => cli::run_reports_delete(&id),
            ReportAction::Analyze { id } => cli::run_reports_analyze(&id),
        },
        Commands::Alerts { action } => match action {
            AlertAction::List { format } => {
                cli::run_alerts_list(OutputFormat::from_str_opt(Some(&format)))
            }
            AlertAction::Dismiss { id } => cli::run_alerts_dismiss(&id),
        },
        Commands::Ask { topic } => match topic {
            AskTopic::Symptoms { text } => cli::run_ask(AskKind::Symptoms, &text.join(" ")),
            AskTopic::Medicine { name } => cli::run_ask(AskKind::Medicine, &name.join(" ")),
            AskTopic::Reports { question } => {
                cli::run_ask(AskKind::Reports, &question.join(" "))
            }
        },
        Commands::Vitals { device } => cli::run_vitals(device.as_deref()),
        Commands::Emergency => cli::run_emergency(),
        Commands::Serve { bind, workers } => cli::run_serve(bind, workers),
        Commands::Activity { format, days } => {
            cli::run_activity(OutputFormat::from_str_opt(Some(&format)), days)
        }
        Commands::Health => cli::run_health(),
        Commands::Config { action } => match action {
            ConfigAction::Show => cli::run_config_show(),
            ConfigAction::Init { force } => cli::run_config_init(force),
            ConfigAction::Set { key, value } => cli::run_config_set(&key, &value),
            ConfigAction::Reset => cli::run_config_reset(),
        },
    }
}
