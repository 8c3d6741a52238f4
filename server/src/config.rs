use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Parley messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "parley-server", version, about = "Parley real-time messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PARLEY_PORT", default_value = "8000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "PARLEY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./parley.toml")]
    pub config: String,

    /// Enable structured JSON logging
    #[arg(long, env = "PARLEY_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long, env = "PARLEY_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Token and password settings (loaded from [auth] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub auth: AuthConfig,

    /// Message lifecycle settings (loaded from [messages] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub messages: MessagesConfig,

    /// Live channel keepalive (loaded from [live] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub live: LiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Access token lifetime in seconds (default: 3600)
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_secs: i64,

    /// Refresh token lifetime in days (default: 30)
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_days: i64,

    /// bcrypt work factor (default: 12)
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: default_access_token_ttl(),
            refresh_token_ttl_days: default_refresh_token_ttl(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

fn default_access_token_ttl() -> i64 {
    3600
}

fn default_refresh_token_ttl() -> i64 {
    30
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    /// Drop the extracted emoji along with the body on delete-for-everyone
    #[serde(default = "default_clear_emojis")]
    pub clear_emojis_on_delete: bool,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            clear_emojis_on_delete: default_clear_emojis(),
        }
    }
}

fn default_clear_emojis() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for the pong before dropping the connection (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            config: "./parley.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            auth: AuthConfig::default(),
            messages: MessagesConfig::default(),
            live: LiveConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PARLEY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("PARLEY_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Parley Server Configuration
# Place this file at ./parley.toml or specify with --config <path>
# All settings can be overridden via environment variables (PARLEY_PORT,
# PARLEY_AUTH__BCRYPT_COST, etc.) or CLI flags (--port, etc.)

# Server port (default: 8000)
# port = 8000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# ---- Authentication ----
# [auth]
# access_token_ttl_secs = 3600
# refresh_token_ttl_days = 30
# bcrypt_cost = 12

# ---- Messages ----
# [messages]

# When a message is deleted for everyone, also clear the emoji extracted
# from its text (default: true)
# clear_emojis_on_delete = true

# ---- Live channel ----
# [live]
# ping_interval_secs = 30
# pong_timeout_secs = 10
"#
    .to_string()
}
