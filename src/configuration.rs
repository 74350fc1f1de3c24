use chrono::Duration;

use crate::error::ConfigError;

const MIN_JWT_SECRET_LEN: usize = 32;
const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Deadline applied to every store call, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl ApplicationSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// Access/refresh token settings
#[derive(serde::Deserialize, Clone, Debug)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    #[serde(default = "default_access_token_expiry_minutes")]
    pub access_token_expiry_minutes: i64,
    #[serde(default = "default_refresh_token_expiry_days")]
    pub refresh_token_expiry_days: i64,
}

impl JwtSettings {
    pub fn access_token_lifetime(&self) -> Duration {
        Duration::minutes(self.access_token_expiry_minutes)
    }

    pub fn refresh_token_lifetime(&self) -> Duration {
        Duration::days(self.refresh_token_expiry_days)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct SecuritySettings {
    /// bcrypt work factor
    #[serde(default = "default_password_hash_cost")]
    pub password_hash_cost: u32,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            password_hash_cost: default_password_hash_cost(),
        }
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct TelemetrySettings {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_json_logs")]
    pub json: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: default_json_logs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_max_connections() -> u32 {
    5
}

fn default_access_token_expiry_minutes() -> i64 {
    60
}

fn default_refresh_token_expiry_days() -> i64 {
    7
}

fn default_password_hash_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_json_logs() -> bool {
    true
}

impl Settings {
    /// Rejects settings the service cannot run safely with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.secret must be at least {} bytes",
                MIN_JWT_SECRET_LEN
            )));
        }
        if self.jwt.issuer.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.issuer".to_string()));
        }
        if self.jwt.audience.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.audience".to_string()));
        }
        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "jwt.access_token_expiry_minutes must be positive".to_string(),
            ));
        }
        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(ConfigError::InvalidValue(
                "jwt.refresh_token_expiry_days must be positive".to_string(),
            ));
        }
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&self.security.password_hash_cost) {
            return Err(ConfigError::InvalidValue(format!(
                "security.password_hash_cost must be between {} and {}",
                MIN_BCRYPT_COST, MAX_BCRYPT_COST
            )));
        }
        if self.application.store_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "application.store_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads `configuration.yaml` (optional) and `APP_*` environment overrides,
/// e.g. `APP_JWT__SECRET` or `APP_APPLICATION__PORT`.
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}
