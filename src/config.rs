use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Serial publishing platform for authors and readers.
#[derive(Parser, Debug, Clone)]
#[command(name = "fablier")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "FABLIER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Username.
        username: String,
        /// Email address.
        #[arg(short, long)]
        email: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// User role (admin or user).
        #[arg(short, long, default_value = "user")]
        role: String,
    },

    /// Delete a user.
    Del {
        /// Username to delete.
        username: String,
    },

    /// List all users.
    List,

    /// Change user password.
    Passwd {
        /// Username.
        username: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Upload configuration.
    #[serde(default)]
    pub uploads: UploadConfig,

    /// Mail configuration.
    #[serde(default)]
    pub mail: MailConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Site name shown in responses and mails.
    #[serde(default = "default_site_name")]
    pub site_name: String,

    /// Public base URL, used to build links in recovery mails.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            site_name: default_site_name(),
            public_url: default_public_url(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

fn default_site_name() -> String {
    "Fablier".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/fablier.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registration mode: "open", "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,

    /// Session token duration in days.
    #[serde(default = "default_session_days")]
    pub session_days: u32,

    /// Password recovery link lifetime in minutes.
    #[serde(default = "default_recovery_minutes")]
    pub recovery_minutes: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
            session_days: default_session_days(),
            recovery_minutes: default_recovery_minutes(),
        }
    }
}

fn default_registration() -> String {
    "open".to_string()
}

fn default_session_days() -> u32 {
    30
}

fn default_recovery_minutes() -> u32 {
    15
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }
}

/// Upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory for uploaded covers and avatars.
    #[serde(default = "default_uploads_dir")]
    pub dir: PathBuf,

    /// Maximum upload size in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_uploads_dir(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("data/uploads")
}

fn default_max_bytes() -> usize {
    1024 * 1024
}

/// Mail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Sender address for recovery mails.
    #[serde(default = "default_mail_from")]
    pub from: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: default_mail_from(),
        }
    }
}

fn default_mail_from() -> String {
    "no-reply@localhost".to_string()
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("fablier.toml"),
            dirs::config_dir()
                .map(|p| p.join("fablier").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/fablier/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# fablier configuration

[server]
bind = "0.0.0.0:8080"
site_name = "Fablier"
# Public base URL, used in password recovery links
public_url = "http://localhost:8080"

[database]
# path = "/var/lib/fablier/fablier.db"

[auth]
# Registration mode: "open" or "disabled"
registration = "open"
# Session duration in days
session_days = 30
# Password recovery link lifetime in minutes
recovery_minutes = 15

[uploads]
# dir = "/var/lib/fablier/uploads"
# Maximum upload size in bytes
max_bytes = 1048576

[mail]
from = "no-reply@localhost"
"#
        .to_string()
    }
}

/// Book categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Long-form fiction.
    Novel,
    /// Short story.
    ShortStory,
    /// Poetry collection.
    Poetry,
}

impl Category {
    /// Stable string form, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Novel => "novel",
            Category::ShortStory => "short_story",
            Category::Poetry => "poetry",
        }
    }

    /// Parse from the stored string form.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "novel" => Some(Category::Novel),
            "short_story" => Some(Category::ShortStory),
            "poetry" => Some(Category::Poetry),
            _ => None,
        }
    }
}
