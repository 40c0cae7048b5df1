//! Command-line interface definitions for the news watcher.
//!
//! Every setting can come from a flag, an environment variable (a `.env`
//! file is loaded first) or the optional YAML settings file, in that order
//! of precedence.

use crate::storage::DEFAULT_KEEP;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

/// Command-line arguments for the news watcher.
///
/// # Examples
///
/// ```sh
/// # Watch with settings from .env
/// gov_news_watch
///
/// # Daily digest at 07:30 instead of mails per item
/// gov_news_watch --push-mode batch --batch-time 07:30 run
///
/// # Validate settings without starting
/// gov_news_watch check-config
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML settings file
    #[arg(short, long, env = "NEWS_WATCH_CONFIG")]
    pub config: Option<String>,

    #[command(flatten)]
    pub settings: SettingsArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Watch the listing and send notifications (default)
    Run,
    /// Report on the configured settings and exit
    CheckConfig,
    /// Fetch the listing once and print what was extracted
    Scrape {
        /// How many items to print
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Run a single check against the store, then print the status
    CheckOnce {
        /// Print new items without notifying or committing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Keep only the most recent entries of the seen-item store
    Trim {
        #[arg(long, default_value_t = DEFAULT_KEEP)]
        keep: usize,
    },
}

/// Settings shared by the CLI and the YAML file.
#[derive(Args, Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SettingsArgs {
    /// SMTP server host
    #[arg(long, env = "SMTP_HOST")]
    pub smtp_host: Option<String>,

    /// SMTP server port (465 = implicit TLS, otherwise STARTTLS)
    #[arg(long, env = "SMTP_PORT")]
    pub smtp_port: Option<u16>,

    /// SMTP login
    #[arg(long, env = "SMTP_USER")]
    pub smtp_user: Option<String>,

    /// SMTP password
    #[arg(long, env = "SMTP_PASSWORD", hide_env_values = true)]
    pub smtp_password: Option<String>,

    /// Sender address (defaults to the SMTP login)
    #[arg(long, env = "FROM_EMAIL")]
    pub from_email: Option<String>,

    /// Recipient address
    #[arg(long, env = "TO_EMAIL")]
    pub to_email: Option<String>,

    /// Minutes between checks (1-59) or a cron expression
    #[arg(long, env = "CHECK_INTERVAL")]
    pub check_interval: Option<String>,

    /// Delivery mode: real-time or batch
    #[arg(long, env = "PUSH_MODE")]
    pub push_mode: Option<String>,

    /// Local time of the daily batch mail, HH:mm
    #[arg(long, env = "BATCH_TIME")]
    pub batch_time: Option<String>,

    /// Listing page to watch
    #[arg(long, env = "LISTING_URL")]
    pub listing_url: Option<String>,

    /// Path of the seen-item store
    #[arg(long, env = "DATA_FILE")]
    pub data_file: Option<String>,
}

impl SettingsArgs {
    /// Field-wise merge; values already set on `self` win.
    pub fn or(self, fallback: SettingsArgs) -> SettingsArgs {
        SettingsArgs {
            smtp_host: self.smtp_host.or(fallback.smtp_host),
            smtp_port: self.smtp_port.or(fallback.smtp_port),
            smtp_user: self.smtp_user.or(fallback.smtp_user),
            smtp_password: self.smtp_password.or(fallback.smtp_password),
            from_email: self.from_email.or(fallback.from_email),
            to_email: self.to_email.or(fallback.to_email),
            check_interval: self.check_interval.or(fallback.check_interval),
            push_mode: self.push_mode.or(fallback.push_mode),
            batch_time: self.batch_time.or(fallback.batch_time),
            listing_url: self.listing_url.or(fallback.listing_url),
            data_file: self.data_file.or(fallback.data_file),
        }
    }
}
