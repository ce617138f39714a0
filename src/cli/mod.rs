//! CLI command implementations.
//!
//! Provides subcommand handlers for:
//! - `vitalwatch login|logout`: session management
//! - `vitalwatch dashboard`: devices, latest vitals and unread alerts at a glance
//! - `vitalwatch devices list|add`: device registry
//! - `vitalwatch watch`: live telemetry for one device
//! - `vitalwatch reports …`: upload, list, search, download, delete, analyze
//! - `vitalwatch alerts list|dismiss`: unread alerts
//! - `vitalwatch ask …`, `vitalwatch vitals`, `vitalwatch emergency`: assistant
//! - `vitalwatch serve`: host the serverless functions
//! - `vitalwatch activity`: function invocation statistics
//! - `vitalwatch health`: check backend, gateway, config and session
//! - `vitalwatch config show|init|set|reset`: configuration management

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use colored::Colorize;

use crate::activity::ActivityLog;
use crate::activity::reporter::{self, ActivityStats};
use crate::alerts;
use crate::assistant::{Assistant, FunctionsClient, InvokeError, prompts};
use crate::backend::{self, Backend, Direction, Query, RestBackend};
use crate::config::{self, VitalwatchConfig};
use crate::devices;
use crate::functions::{FunctionRuntime, server};
use crate::models::{self, Device, Report, ReportType, TelemetrySample};
use crate::notify::ConsoleNotifier;
use crate::reports::{self, ReportStore, UploadRequest};
use crate::session::{self, Session};
use crate::telemetry::{FeedStatus, TelemetryFeed};

/// Output format for listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_str_opt(s: Option<&str>) -> Self {
        match s {
            Some("json") => Self::Json,
            _ => Self::Table,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared wiring
// ---------------------------------------------------------------------------

/// Resolved config plus the clients built from it.
pub struct Client {
    pub config: VitalwatchConfig,
    pub backend: RestBackend,
    access_token: Option<String>,
}

impl Client {
    pub fn connect() -> Self {
        let config = config::load();
        let stored = session::load();
        let access_token = session::resolve_access_token(&config.backend, stored.as_ref());
        let mut backend = RestBackend::from_config(&config.backend);
        if let Some(token) = &access_token {
            backend = backend.with_token(token.clone());
        }
        Self {
            config,
            backend,
            access_token,
        }
    }

    fn require_session(&self) -> Result<()> {
        if self.access_token.is_none() {
            bail!("not signed in; run `vitalwatch login` first");
        }
        Ok(())
    }

    fn functions(&self) -> FunctionsClient {
        FunctionsClient::new(
            &self.config.functions_endpoint(),
            &self.config.backend.anon_key,
            self.access_token.clone(),
            Duration::from_millis(self.config.gateway.timeout_ms),
        )
    }

    fn reports(&self) -> ReportStore<'_> {
        ReportStore::new(
            &self.backend,
            &self.config.backend.storage_bucket,
            self.config.reports.max_upload_bytes,
        )
    }

    fn select_device(&self, key: Option<&str>) -> Result<Option<Device>> {
        let all = devices::list(&self.backend).context("failed to load devices")?;
        match key {
            Some(key) => devices::find(&all, key)
                .cloned()
                .map(Some)
                .with_context(|| format!("no device matches `{key}`")),
            None => Ok(devices::default_selection(&all).cloned()),
        }
    }
}

// ---------------------------------------------------------------------------
// vitalwatch login | logout
// ---------------------------------------------------------------------------

/// Exchange email/password for a session and store it.
pub fn run_login(email: &str, password: Option<String>) -> Result<()> {
    let cfg = config::load();
    let password = match password.or_else(|| std::env::var("VITALWATCH_PASSWORD").ok()) {
        Some(p) => p,
        None => prompt_line("Password: ")?,
    };
    let tokens = RestBackend::from_config(&cfg.backend)
        .sign_in_with_password(email, &password)
        .context("sign-in failed")?;
    let session = Session::from_tokens(tokens);
    let path = session::session_path().context("no home directory for session file")?;
    session::save_to(&path, &session)?;
    println!(
        "{} Signed in as {}",
        "✓".green().bold(),
        session.email.as_deref().unwrap_or(&session.user_id).bold()
    );
    Ok(())
}

pub fn run_logout() -> Result<()> {
    let path = session::session_path().context("no home directory for session file")?;
    if session::remove_at(&path)? {
        println!("{} Signed out", "✓".green().bold());
    } else {
        println!("{}", "No stored session.".yellow());
    }
    Ok(())
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

// ---------------------------------------------------------------------------
// vitalwatch dashboard
// ---------------------------------------------------------------------------

/// Devices, the selected device's vitals and the unread alert badge.
pub fn run_dashboard(device: Option<&str>) -> Result<()> {
    let client = Client::connect();
    client.require_session()?;

    println!("{}", "vitalwatch Dashboard".bold().cyan());
    println!("{}", "=".repeat(50));

    match alerts::unread_count(&client.backend) {
        Ok(0) => println!("  {} none", "Unread alerts:".bold()),
        Ok(n) => println!("  {} {}", "Unread alerts:".bold(), n.to_string().red().bold()),
        Err(e) => println!("  {} {}", "Unread alerts:".bold(), e.to_string().dimmed()),
    }
    println!();

    let Some(selected) = client.select_device(device)? else {
        println!(
            "{}",
            "No devices yet. Add one with `vitalwatch devices add <name>`.".yellow()
        );
        return Ok(());
    };

    let notifier = ConsoleNotifier;
    let mut feed = TelemetryFeed::new(
        &client.backend,
        &notifier,
        client.config.telemetry.window_size,
    );
    feed.load(&selected.id);
    print_feed_summary(&selected, &feed);
    Ok(())
}

fn print_feed_summary(device: &Device, feed: &TelemetryFeed<'_>) {
    println!("{} {}", "Device:".bold(), device.name.bold().cyan());
    if feed.is_empty() {
        println!("  {}", "No data yet. Waiting for the first reading.".dimmed());
        return;
    }
    if let Some(latest) = feed.latest() {
        print_sample_card(latest);
    }
    let window = feed.window();
    if window.len() > 1 {
        let hr: Vec<f64> = window.iter().map(|s| s.hr).collect();
        println!(
            "  {} {} samples, HR {}",
            "History:".bold(),
            window.len(),
            sparkline(&hr).cyan()
        );
    }
}

fn print_sample_card(sample: &TelemetrySample) {
    println!(
        "  {} {:>5.0} bpm   {} {:>5.1} %   {} {:>5.1} °C",
        "HR".bold(),
        sample.hr,
        "SpO₂".bold(),
        sample.spo2,
        "Temp".bold(),
        sample.temp,
    );
    println!(
        "  {} {}",
        "Updated:".dimmed(),
        sample.ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
    );
}

// ---------------------------------------------------------------------------
// vitalwatch devices list | add
// ---------------------------------------------------------------------------

pub fn run_devices_list(format: OutputFormat) -> Result<()> {
    let client = Client::connect();
    client.require_session()?;
    let all = devices::list(&client.backend).context("failed to load devices")?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }
    if all.is_empty() {
        println!("{}", "No devices registered.".yellow());
        return Ok(());
    }
    println!("  {:<38} {:<24} Added", "Id", "Name");
    println!("  {}", "-".repeat(76));
    for device in &all {
        let added = device
            .created_at
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!(
            "  {:<38} {:<24} {}",
            device.id,
            truncate(&device.name, 24),
            added.dimmed()
        );
    }
    Ok(())
}

pub fn run_devices_add(name: &str) -> Result<()> {
    let client = Client::connect();
    client.require_session()?;
    let device = devices::create(&client.backend, name)?;
    println!(
        "{} Device {} registered ({})",
        "✓".green().bold(),
        device.name.bold(),
        device.id.dimmed()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// vitalwatch watch
// ---------------------------------------------------------------------------

/// Stream new samples for a device until `seconds` elapse (or forever).
pub fn run_watch(device: Option<&str>, seconds: Option<u64>) -> Result<()> {
    let client = Client::connect();
    client.require_session()?;
    let Some(selected) = client.select_device(device)? else {
        println!("{}", "No devices registered.".yellow());
        return Ok(());
    };

    let notifier = ConsoleNotifier;
    let mut feed = TelemetryFeed::new(
        &client.backend,
        &notifier,
        client.config.telemetry.window_size,
    );
    feed.select_device(&selected.id);
    print_feed_summary(&selected, &feed);
    println!();

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    while deadline.is_none_or(|d| Instant::now() < d) {
        if let Some(sample) = feed.wait_next(Duration::from_millis(500)) {
            println!(
                "  {} HR {:>5.0}  SpO₂ {:>5.1}  Temp {:>5.1}  {}",
                "▸".green(),
                sample.hr,
                sample.spo2,
                sample.temp,
                format!("({} in window)", feed.window().len()).dimmed()
            );
        }
        if let FeedStatus::Stalled(_) = feed.status() {
            break;
        }
    }
    feed.close();
    Ok(())
}

// ---------------------------------------------------------------------------
// vitalwatch reports …
// ---------------------------------------------------------------------------

pub fn run_reports_list(search: Option<&str>, format: OutputFormat) -> Result<()> {
    let client = Client::connect();
    client.require_session()?;
    let all = client.reports().list().context("failed to load reports")?;
    let matching = reports::search(&all, search.unwrap_or_default());

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&matching)?);
        return Ok(());
    }
    if matching.is_empty() {
        let message = if all.is_empty() {
            "No reports uploaded yet."
        } else {
            "No reports match your search."
        };
        println!("{}", message.yellow());
        return Ok(());
    }

    println!(
        "  {:<38} {:<24} {:<12} {:<10} Flag",
        "Id", "Title", "Type", "Uploaded"
    );
    println!("  {}", "-".repeat(92));
    for report in matching {
        print_report_row(report);
    }
    Ok(())
}

fn print_report_row(report: &Report) {
    let flag = if report.has_abnormal_findings {
        "abnormal".red().bold()
    } else if report.ai_analysis.is_some() {
        "analyzed".green()
    } else {
        "".normal()
    };
    println!(
        "  {:<38} {:<24} {:<12} {:<10} {}",
        report.id,
        truncate(&report.title, 24),
        report.report_type.label(),
        report.upload_date.with_timezone(&Local).format("%Y-%m-%d").to_string(),
        flag
    );
}

pub fn run_reports_upload(
    file: &Path,
    title: &str,
    report_type: ReportType,
    report_date: Option<NaiveDate>,
    notes: Option<String>,
) -> Result<()> {
    let client = Client::connect();
    client.require_session()?;
    let mut req = UploadRequest::from_file(
        file,
        title,
        Some(report_type),
        client.config.reports.max_upload_bytes,
    )?;
    req.report_date = report_date;
    req.notes = notes;

    let report = client.reports().upload(&req)?;
    println!(
        "{} Uploaded {} ({})",
        "✓".green().bold(),
        report.title.bold(),
        report.id.dimmed()
    );
    println!(
        "  {}",
        format!("Run `vitalwatch reports analyze {}` for AI analysis.", report.id).dimmed()
    );
    Ok(())
}

pub fn run_reports_download(id: &str, dest: Option<&Path>) -> Result<()> {
    let client = Client::connect();
    client.require_session()?;
    let store = client.reports();
    let report = find_report(&store, id)?;
    let target = store.download(&report, dest.unwrap_or_else(|| Path::new(".")))?;
    println!("{} Saved to {}", "✓".green().bold(), target.display());
    Ok(())
}

pub fn run_reports_delete(id: &str) -> Result<()> {
    let client = Client::connect();
    client.require_session()?;
    let store = client.reports();
    let report = find_report(&store, id)?;
    store
        .delete(&report)
        .with_context(|| format!("failed to delete report {id}"))?;
    println!("{} Deleted {}", "✓".green().bold(), report.title.bold());
    Ok(())
}

pub fn run_reports_analyze(id: &str) -> Result<()> {
    let client = Client::connect();
    client.require_session()?;
    let store = client.reports();
    let report = find_report(&store, id)?;
    let functions = client.functions();
    let assistant = Assistant::new(&functions);

    println!("{}", format!("Analyzing {}…", report.title).dimmed());
    let result = store
        .analyze(&report, &assistant, client.config.functions.max_input_chars)
        .map_err(surface)?;

    println!("{}", "AI Analysis".bold().cyan());
    println!("{}", "=".repeat(50));
    println!("{}", result.analysis);
    println!();
    if result.has_abnormal {
        println!(
            "{} {}",
            "!".red().bold(),
            "Abnormal findings detected. An alert has been created; consult your doctor.".red()
        );
    } else {
        println!("{} {}", "✓".green().bold(), "No abnormal findings flagged.".green());
    }
    Ok(())
}

fn find_report(store: &ReportStore<'_>, id: &str) -> Result<Report> {
    store
        .get(id)
        .context("failed to load report")?
        .with_context(|| format!("no report with id {id}"))
}

// ---------------------------------------------------------------------------
// vitalwatch alerts list | dismiss
// ---------------------------------------------------------------------------

pub fn run_alerts_list(format: OutputFormat) -> Result<()> {
    let client = Client::connect();
    client.require_session()?;
    let unread = alerts::unread(&client.backend, client.config.reports.alert_limit)
        .context("failed to load alerts")?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&unread)?);
        return Ok(());
    }
    if unread.is_empty() {
        println!("{}", "No unread alerts.".green());
        return Ok(());
    }
    for alert in &unread {
        println!(
            "  {} {} {}",
            "!".red().bold(),
            alert.message,
            alert
                .created_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
                .dimmed()
        );
        println!("    {}", format!("id {}", alert.id).dimmed());
    }
    Ok(())
}

pub fn run_alerts_dismiss(id: &str) -> Result<()> {
    let client = Client::connect();
    client.require_session()?;
    alerts::mark_read(&client.backend, id).context("failed to dismiss alert")?;
    println!("{} Alert dismissed", "✓".green().bold());
    Ok(())
}

// ---------------------------------------------------------------------------
// vitalwatch ask | vitals | emergency
// ---------------------------------------------------------------------------

/// Which assistant prompt to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskKind {
    Symptoms,
    Medicine,
    Reports,
}

pub fn run_ask(kind: AskKind, input: &str) -> Result<()> {
    let client = Client::connect();
    let functions = client.functions();
    let assistant = Assistant::new(&functions);
    let answer = match kind {
        AskKind::Symptoms => assistant.check_symptoms(input),
        AskKind::Medicine => assistant.medicine_info(input),
        AskKind::Reports => assistant.ask_about_reports(input),
    }
    .map_err(surface)?;
    println!("{answer}");
    if kind == AskKind::Symptoms {
        println!();
        println!(
            "  {}",
            "This is not a diagnosis. Seek medical care for severe or worsening symptoms.".dimmed()
        );
    }
    Ok(())
}

/// AI analysis of the selected device's latest sample.
pub fn run_vitals(device: Option<&str>) -> Result<()> {
    let client = Client::connect();
    client.require_session()?;
    let latest = match client.select_device(device)? {
        Some(selected) => {
            let query = Query::new()
                .eq("device_id", selected.id.as_str())
                .order("ts", Direction::Descending);
            backend::select_first::<TelemetrySample>(&client.backend, models::TELEMETRY, &query)
                .context("failed to load latest sample")?
        }
        None => None,
    };

    let functions = client.functions();
    let result = Assistant::new(&functions)
        .analyze_vitals(latest.as_ref())
        .map_err(surface)?;

    if let Some(sample) = &latest {
        print_sample_card(sample);
        println!();
    }
    for flag in &result.flags {
        println!("  {} {}", "!".yellow().bold(), flag.yellow());
    }
    if !result.flags.is_empty() {
        println!();
    }
    println!("{}", result.analysis);
    Ok(())
}

pub fn run_emergency() -> Result<()> {
    println!("{}", "Emergency Contacts".bold().red());
    println!("{}", "=".repeat(40));
    for contact in prompts::EMERGENCY_CONTACTS {
        println!(
            "  {:>4}  {:<20} {}",
            contact.number.bold(),
            contact.name,
            contact.description.dimmed()
        );
    }
    Ok(())
}

fn surface(e: InvokeError) -> anyhow::Error {
    anyhow::anyhow!(e.to_string())
}

// ---------------------------------------------------------------------------
// vitalwatch serve
// ---------------------------------------------------------------------------

pub fn run_serve(bind: Option<String>, workers: Option<usize>) -> Result<()> {
    let cfg = config::load();
    if cfg.gateway.api_key.is_empty() {
        tracing::warn!("no gateway API key configured; AI calls will fail with 500");
    }
    let addr = bind.unwrap_or_else(|| cfg.functions.bind.clone());
    let workers = workers.unwrap_or(cfg.functions.workers);
    let runtime = Arc::new(FunctionRuntime::from_config(&cfg));
    server::serve(&addr, runtime, workers)
}

// ---------------------------------------------------------------------------
// vitalwatch activity
// ---------------------------------------------------------------------------

/// Summarize the function activity log.
pub fn run_activity(format: OutputFormat, days: Option<u32>) -> Result<()> {
    let Some(log) = ActivityLog::default_location() else {
        bail!("no home directory for the activity log");
    };
    let stats = reporter::build_stats(&log.read_since_days(days));

    if stats.total_invocations == 0 {
        println!(
            "{}",
            "No activity yet. Functions served by `vitalwatch serve` are logged here.".yellow()
        );
        return Ok(());
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Table => print_activity_table(&stats),
    }
    Ok(())
}

fn print_activity_table(stats: &ActivityStats) {
    println!("{}", "Function Activity".bold().cyan());
    println!("{}", "=".repeat(60));
    println!();
    println!("  {} {}", "Invocations:  ".bold(), stats.total_invocations);
    println!("  {} {:.1}%", "Success rate: ".bold(), stats.success_pct());
    println!("  {} {:.0}ms", "Avg latency:  ".bold(), stats.avg_latency_ms);
    println!("  {} {}", "Abnormal:     ".bold(), stats.abnormal_reports);
    println!();

    println!("{}", "By Function".bold().cyan());
    println!(
        "  {:<18} {:>7} {:>9} {:>12} Top error",
        "Function", "Count", "Failures", "Avg latency"
    );
    println!("  {}", "-".repeat(58));
    for (i, f) in stats.functions.iter().enumerate() {
        let line = format!(
            "  {:<18} {:>7} {:>9} {:>10.0}ms {}",
            f.function,
            f.count,
            f.failures,
            f.avg_latency_ms,
            f.top_error_status.map(|s| s.to_string()).unwrap_or_default(),
        );
        if i % 2 == 0 {
            println!("{line}");
        } else {
            println!("{}", line.dimmed());
        }
    }

    if !stats.daily.is_empty() {
        println!();
        println!("{}", "Daily".bold().cyan());
        for day in &stats.daily {
            println!(
                "  {:<12} {:>6} {}",
                day.date,
                day.invocations,
                if day.failures > 0 {
                    format!("{} failed", day.failures).red().to_string()
                } else {
                    String::new()
                }
            );
        }
    }
}

// ---------------------------------------------------------------------------
// vitalwatch health
// ---------------------------------------------------------------------------

/// Check config files, session, backend reachability and gateway setup.
pub fn run_health() -> Result<()> {
    println!("{}", "vitalwatch Health Check".bold().cyan());
    println!("{}", "=".repeat(40));

    let global_exists = config::global_config_file()
        .map(|p| p.exists())
        .unwrap_or(false);
    let project_exists = config::project_config_file()
        .map(|p| p.exists())
        .unwrap_or(false);
    print_health_item(
        "Global config",
        global_exists,
        if global_exists {
            "~/.vitalwatch/config.toml found"
        } else {
            "not found (run `vitalwatch config init` to create)"
        },
    );
    print_health_item(
        "Project config",
        project_exists,
        if project_exists {
            ".vitalwatch.toml found"
        } else {
            "none (optional)"
        },
    );

    let client = Client::connect();
    let cfg = &client.config;
    print_health_item(
        "Anon key",
        !cfg.backend.anon_key.is_empty(),
        if cfg.backend.anon_key.is_empty() {
            "missing (set VITALWATCH_ANON_KEY)"
        } else {
            "configured"
        },
    );

    match session::load() {
        Some(s) if s.is_expired() => print_health_item("Session", false, "expired; run `vitalwatch login`"),
        Some(s) => print_health_item("Session", true, s.email.as_deref().unwrap_or(&s.user_id)),
        None if !cfg.backend.access_token.is_empty() => {
            print_health_item("Session", true, "access token from config")
        }
        None => print_health_item("Session", false, "not signed in"),
    }

    if client.access_token.is_some() {
        match client.backend.current_user() {
            Ok(user) => print_health_item(
                "Backend",
                true,
                &format!("reachable at {} as {}", cfg.backend.url, user.id),
            ),
            Err(e) => print_health_item("Backend", false, &e.to_string()),
        }
    } else {
        print_health_item("Backend", true, &format!("{} (not checked; sign in first)", cfg.backend.url));
    }

    print_health_item("Functions endpoint", true, &cfg.functions_endpoint());
    print_health_item(
        "Gateway key",
        !cfg.gateway.api_key.is_empty(),
        if cfg.gateway.api_key.is_empty() {
            "not set (only needed for `vitalwatch serve`)"
        } else {
            "configured"
        },
    );
    print_health_item("Model", true, &cfg.gateway.model);

    let log_entries = ActivityLog::default_location()
        .filter(|log| log.path().exists())
        .map(|log| log.read_all().len());
    print_health_item(
        "Activity log",
        log_entries.is_some(),
        &match log_entries {
            Some(n) => format!("{n} entries"),
            None => "no log file yet".to_string(),
        },
    );

    Ok(())
}

fn print_health_item(name: &str, ok: bool, detail: &str) {
    let status = if ok {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!("  {} {:<20} {}", status, name, detail.dimmed());
}

// ---------------------------------------------------------------------------
// vitalwatch config show | init | set | reset
// ---------------------------------------------------------------------------

/// Show the effective (merged) configuration as TOML.
pub fn run_config_show() -> Result<()> {
    let toml_str = config::show_effective_config()?;
    println!("{}", "Effective vitalwatch Configuration".bold().cyan());
    println!("{}", "=".repeat(50));
    println!();
    println!("{toml_str}");

    let global_exists = config::global_config_file()
        .map(|p| p.exists())
        .unwrap_or(false);
    let project_exists = config::project_config_file()
        .map(|p| p.exists())
        .unwrap_or(false);
    println!("{}", "Sources (highest priority last):".dimmed());
    println!("  {} built-in defaults", "·".dimmed());
    let mark = |exists: bool| if exists { "✓".green() } else { "·".dimmed() };
    println!(
        "  {} {}",
        mark(global_exists),
        "~/.vitalwatch/config.toml".dimmed()
    );
    println!("  {} {}", mark(project_exists), ".vitalwatch.toml".dimmed());
    println!(
        "  {} {}",
        "·".dimmed(),
        "VITALWATCH_* environment variables".dimmed()
    );
    Ok(())
}

/// Initialize a default config file at `~/.vitalwatch/config.toml`.
pub fn run_config_init(force: bool) -> Result<()> {
    let path = config::init_config(force)?;
    println!(
        "{} Config written to {}",
        "✓".green().bold(),
        path.display()
    );
    Ok(())
}

/// Set a single configuration value in the global config file.
pub fn run_config_set(key: &str, value: &str) -> Result<()> {
    config::set_config_value(key, value)?;
    println!("{} Set {} = {}", "✓".green().bold(), key.bold(), value);
    Ok(())
}

/// Reset configuration to defaults.
pub fn run_config_reset() -> Result<()> {
    let path = config::reset_config()?;
    println!(
        "{} Config reset to defaults at {}",
        "✓".green().bold(),
        path.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Truncate a string to `max_len` characters, appending "…" if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

/// Render values as a one-line bar chart scaled to their own range.
fn sparkline(values: &[f64]) -> String {
    const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    values
        .iter()
        .map(|v| {
            if span <= f64::EPSILON {
                BARS[3]
            } else {
                let idx = ((v - min) / span * (BARS.len() - 1) as f64).round() as usize;
                BARS[idx.min(BARS.len() - 1)]
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hell…");
        assert_eq!(truncate("ab", 2), "ab");
        assert_eq!(truncate("Ärztebrief", 4), "Ärz…");
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from_str_opt(None), OutputFormat::Table);
        assert_eq!(OutputFormat::from_str_opt(Some("json")), OutputFormat::Json);
        assert_eq!(
            OutputFormat::from_str_opt(Some("unknown")),
            OutputFormat::Table
        );
    }

    #[test]
    fn test_sparkline_scales_to_range() {
        assert_eq!(sparkline(&[60.0, 80.0, 100.0]), "▁▅█");
        assert_eq!(sparkline(&[72.0, 72.0]), "▄▄");
        assert_eq!(sparkline(&[]), "");
    }
}
