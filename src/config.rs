use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "campusmate", about = "University collaboration platform backend")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub mail: MailConfig,
    pub cors: CorsConfig,
    pub discussion: DiscussionConfig,
    pub admin: AdminConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for signing tokens. Generated per process when empty.
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub verification_hours: u64,
    pub sweep_interval_secs: u64,
    pub bcrypt_cost: u32,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MailTransport {
    /// Write outgoing mail to the log instead of sending it.
    #[default]
    Log,
    Smtp,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MailConfig {
    pub transport: MailTransport,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    /// Base URL of the frontend, used to build verification links.
    pub frontend_url: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DiscussionConfig {
    /// Record a vote per user and reject repeats instead of bumping counters blindly.
    pub one_vote_per_user: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AdminConfig {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_minutes: 24 * 60,
            refresh_token_days: 7,
            verification_hours: 24,
            sweep_interval_secs: 3600,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            transport: MailTransport::Log,
            smtp_host: None,
            smtp_port: 587,
            username: None,
            password: None,
            from: "CampusMate <no-reply@campusmate.local>".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
        }
    }
}

impl AdminConfig {
    /// Both halves of the bootstrap admin credentials, when configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let email = self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())?;
        let password = self.password.as_deref().filter(|p| !p.is_empty())?;
        Some((email, password))
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("campusmate.db"));
        }

        if config.auth.jwt_secret.is_empty() {
            tracing::warn!("auth.jwt_secret not set; generated an ephemeral secret, tokens will not survive a restart");
            config.auth.jwt_secret = generate_secret();
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".campusmate")
        })
    }

    pub fn db_path(&self) -> &Path {
        self.database
            .path
            .as_deref()
            .unwrap_or_else(|| Path::new("campusmate.db"))
    }
}

fn generate_secret() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}
