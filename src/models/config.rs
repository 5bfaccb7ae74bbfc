use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub storage: StorageConfig,
    pub ml: MlConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Defaults, then `loki.toml` / `loki.json` if present, then
    /// `LOKI__SECTION__KEY` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("loki").required(false))
            .add_source(
                config::Environment::with_prefix("LOKI")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("security.admin_emails"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://site.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    /// Lifetime of a regular session, in seconds.
    pub session_timeout: u64,
    /// Lifetime of a "remember me" session, in seconds.
    pub remember_timeout: u64,
    /// Mark the session cookie `Secure`; turn off only for plain-http development.
    pub secure_cookies: bool,
    /// E-mails of accounts promoted to admin at startup.
    pub admin_emails: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            // Must be overridden in production
            jwt_secret: "60808326457a6384f78964761aaa161c".to_string(),
            session_timeout: 3600,
            remember_timeout: 30 * 24 * 3600,
            secure_cookies: true,
            admin_emails: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Served under `/static`.
    pub static_dir: PathBuf,
    pub models_dir: String,
    pub tmp_dir: String,
    pub profile_pictures_dir: String,
    pub reports_dir: String,
    /// Bounding box for images shown on the classify / visualize pages.
    pub max_width: u32,
    pub max_height: u32,
}

impl StorageConfig {
    pub fn dir(&self, sub: &str) -> PathBuf {
        self.static_dir.join(sub)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("static"),
            models_dir: "models".to_string(),
            tmp_dir: "tmp".to_string(),
            profile_pictures_dir: "profile_pictures".to_string(),
            reports_dir: "reports".to_string(),
            max_width: 400,
            max_height: 400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MlConfig {
    /// Directory holding `<model>.safetensors` files.
    pub weights_dir: PathBuf,
    /// `cpu` or `cuda`.
    pub device: String,
    /// Perturbation budget of a non-robust attack run.
    pub epsilon: f64,
    pub imagenet_labels: PathBuf,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            weights_dir: PathBuf::from("data/weights"),
            device: "cpu".to_string(),
            epsilon: 0.03,
            imagenet_labels: PathBuf::from("data/datasets/imagenet/imagenet_labels.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: PathBuf::from("logs"),
        }
    }
}
