//! Resolved runtime settings and the `check-config` report.
//!
//! [`Settings::resolve`] turns the merged CLI/env/file values into typed
//! settings. SMTP fields stay optional here; the notifier validates them so
//! that commands which never send mail (`scrape`, `trim`) run without them.

use crate::cli::SettingsArgs;
use crate::error::NewsError;
use crate::notify::email::SmtpSettings;
use crate::scheduler::{BatchTime, DeliveryMode, ScheduleOptions, parse_check_interval};
use crate::scrapers::listing::{DEFAULT_LISTING_URL, SiteProfile};
use crate::storage::DEFAULT_DATA_FILE;
use crate::utils::mask_secret;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

#[derive(Debug, Clone)]
pub struct Settings {
    pub smtp: SmtpSettings,
    pub schedule: ScheduleOptions,
    pub listing_url: String,
    pub data_file: PathBuf,
}

impl Settings {
    /// Apply defaults and parse typed fields.
    ///
    /// An unknown push mode is an error; a malformed batch time falls back
    /// to 18:00 with a warning.
    pub fn resolve(args: SettingsArgs) -> Result<Self, NewsError> {
        let mode = match args.push_mode.as_deref() {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => DeliveryMode::default(),
        };
        let batch_time = args
            .batch_time
            .as_deref()
            .map(BatchTime::parse_or_default)
            .unwrap_or_default();

        Ok(Self {
            smtp: SmtpSettings {
                host: args.smtp_host,
                port: args.smtp_port,
                user: args.smtp_user,
                password: args.smtp_password,
                from: args.from_email,
                to: args.to_email,
            },
            schedule: ScheduleOptions {
                check_interval: args
                    .check_interval
                    .unwrap_or_else(|| ScheduleOptions::default().check_interval),
                mode,
                batch_time,
            },
            listing_url: args
                .listing_url
                .unwrap_or_else(|| DEFAULT_LISTING_URL.to_string()),
            data_file: PathBuf::from(
                args.data_file
                    .unwrap_or_else(|| DEFAULT_DATA_FILE.to_string()),
            ),
        })
    }
}

/// Read a YAML settings file.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub fn load_settings_file(path: impl AsRef<Path>) -> Result<SettingsArgs, NewsError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| NewsError::Config(format!("reading {}: {e}", path.display())))?;
    let parsed = serde_yaml::from_str(&text)
        .map_err(|e| NewsError::Config(format!("parsing {}: {e}", path.display())))?;
    info!("Loaded settings file");
    Ok(parsed)
}

/// Outcome of `check-config`: printable lines plus an overall verdict.
#[derive(Debug, Clone, Default)]
pub struct ConfigReport {
    pub lines: Vec<String>,
    pub ok: bool,
}

impl ConfigReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let _ = writeln!(out, "{line}");
        }
        out
    }
}

/// Inspect raw settings the way an operator would before first start.
pub fn check_config(args: &SettingsArgs) -> ConfigReport {
    let mut lines = Vec::new();
    let mut ok = true;

    lines.push("Required settings:".to_string());
    let port = args.smtp_port.map(|p| p.to_string());
    let masked = args.smtp_password.as_deref().map(mask_secret);
    let required: [(&str, Option<&str>); 5] = [
        ("SMTP_HOST", args.smtp_host.as_deref()),
        ("SMTP_PORT", port.as_deref()),
        ("SMTP_USER", args.smtp_user.as_deref()),
        ("SMTP_PASSWORD", masked.as_deref()),
        ("TO_EMAIL", args.to_email.as_deref()),
    ];
    for (key, value) in required {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(v) => lines.push(format!("  ok      {key}: {v}")),
            None => {
                lines.push(format!("  MISSING {key}"));
                ok = false;
            }
        }
    }

    lines.push("Optional settings:".to_string());
    let optional: [(&str, Option<&str>, &str); 5] = [
        ("FROM_EMAIL", args.from_email.as_deref(), "SMTP_USER"),
        ("CHECK_INTERVAL", args.check_interval.as_deref(), "15"),
        ("PUSH_MODE", args.push_mode.as_deref(), "real-time"),
        ("BATCH_TIME", args.batch_time.as_deref(), "18:00"),
        ("LISTING_URL", args.listing_url.as_deref(), DEFAULT_LISTING_URL),
    ];
    for (key, value, default) in optional {
        match value {
            Some(v) => lines.push(format!("  set     {key}: {v}")),
            None => lines.push(format!("  default {key}: {default}")),
        }
    }

    if !ok {
        lines.push("Configuration check failed: fill in the missing settings".to_string());
        return ConfigReport { lines, ok };
    }

    lines.push("Validation:".to_string());
    if args.smtp_port == Some(0) {
        lines.push("  ERROR   SMTP_PORT must be between 1 and 65535".to_string());
        ok = false;
    }

    for (key, value) in [
        ("SMTP_USER", args.smtp_user.as_deref()),
        ("TO_EMAIL", args.to_email.as_deref()),
        ("FROM_EMAIL", args.from_email.as_deref()),
    ] {
        if let Some(addr) = value {
            if !EMAIL_RE.is_match(addr) {
                lines.push(format!("  warn    {key} does not look like an address: {addr}"));
            }
        }
    }

    let mode_raw = args.push_mode.as_deref().unwrap_or("real-time");
    match mode_raw.parse::<DeliveryMode>() {
        Ok(mode) => {
            lines.push(format!("  ok      PUSH_MODE: {mode}"));
            if mode == DeliveryMode::Batch {
                let raw = args.batch_time.as_deref().unwrap_or("18:00");
                match raw.parse::<BatchTime>() {
                    Ok(t) => lines.push(format!("  ok      BATCH_TIME: {t}")),
                    Err(_) => {
                        lines.push(format!("  ERROR   BATCH_TIME must be HH:mm, got {raw}"));
                        ok = false;
                    }
                }
            }
        }
        Err(e) => {
            lines.push(format!("  ERROR   {e}"));
            ok = false;
        }
    }

    let interval = args.check_interval.as_deref().unwrap_or("15");
    lines.push(format!(
        "  ok      CHECK_INTERVAL {interval} runs on cron {}",
        parse_check_interval(interval)
    ));

    if let Some(url) = args.listing_url.as_deref() {
        if let Err(e) = SiteProfile::from_listing_url(url) {
            lines.push(format!("  ERROR   {e}"));
            ok = false;
        }
    }

    lines.push(if ok {
        "Configuration check passed".to_string()
    } else {
        "Configuration check failed: fix the errors above".to_string()
    });
    ConfigReport { lines, ok }
}
