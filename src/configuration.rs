use std::time::Duration;

use config::ConfigError;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub verification: VerificationSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

#[derive(serde::Deserialize, Clone)]
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

    /// Server-level connection string, for creating throwaway databases
    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// Access credential signing settings
///
/// Fixed at process start; the secret is never reloaded.
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub secret: String,
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: i64, // seconds
    #[serde(default = "default_issuer")]
    pub issuer: String,
}

/// Refresh secret hashing settings
#[derive(serde::Deserialize, Clone)]
pub struct RefreshSettings {
    /// bcrypt work factor (4..=31)
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

/// Phone-number verification provider (Network as Code) settings
#[derive(serde::Deserialize, Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    #[serde(default)]
    pub rapidapi_host: Option<String>,
    #[serde(default)]
    pub rapidapi_key: Option<String>,
    /// When both id and secret are absent they are fetched from the provider
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl ProviderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct VerificationSettings {
    /// Age after which a pending verification may be swept to `expired`
    #[serde(default = "default_pending_ttl_seconds")]
    pub pending_ttl_seconds: i64,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            pending_ttl_seconds: default_pending_ttl_seconds(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_access_token_expiry() -> i64 {
    900
}

fn default_issuer() -> String {
    "phonegate".to_string()
}

fn default_bcrypt_cost() -> u32 {
    10
}

fn default_scope() -> String {
    "dpv:FraudPreventionAndDetection number-verification:verify".to_string()
}

fn default_credentials_path() -> String {
    "/oauth2/v1/auth/clientcredentials".to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_pending_ttl_seconds() -> i64 {
    900
}

/// Load settings from `configuration.{yaml,toml,json}` overlaid with
/// `APP_*` environment variables (`APP_JWT__SECRET`, `APP_PROVIDER__BASE_URL`, ...).
pub fn get_configuration() -> Result<Settings, ConfigError> {
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
