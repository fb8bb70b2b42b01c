use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct InviteConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub smtp: SmtpConfig,
    pub token: TokenConfig,
    pub invites: InvitePolicyConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvitePolicyConfig {
    pub frontend_base_url: String,
    pub invite_ttl_days: i64,
    pub cache_ttl_seconds: u64,
    pub allowed_domains: Vec<String>,
    pub spam_threshold: u32,
    pub spam_window_seconds: u64,
    pub tx_timeout_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub ip_limit: u32,
    pub ip_window_seconds: u64,
    pub email_limit: u32,
    pub email_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl InviteConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = InviteConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("invite-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", None, is_prod)?,
                port: get_env("SMTP_PORT", Some("587"), is_prod)?
                    .parse()
                    .unwrap_or(587),
                user: get_env("SMTP_USER", None, is_prod)?,
                password: get_env("SMTP_PASSWORD", None, is_prod)?,
                from_email: get_env("SMTP_FROM_EMAIL", None, is_prod)?,
            },
            token: TokenConfig {
                secret: get_env("INVITE_TOKEN_SECRET", None, true)?,
            },
            invites: InvitePolicyConfig {
                frontend_base_url: get_env(
                    "FRONTEND_BASE_URL",
                    Some("http://localhost:3000"),
                    is_prod,
                )?,
                invite_ttl_days: get_env("INVITE_TTL_DAYS", Some("7"), is_prod)?
                    .parse()
                    .unwrap_or(7),
                cache_ttl_seconds: get_env("INVITE_CACHE_TTL_SECONDS", Some("3600"), is_prod)?
                    .parse()
                    .unwrap_or(3600),
                allowed_domains: get_env("ALLOWED_INVITE_DOMAINS", Some("school.edu"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                spam_threshold: get_env("SPAM_THRESHOLD", Some("3"), is_prod)?
                    .parse()
                    .unwrap_or(3),
                spam_window_seconds: get_env("SPAM_WINDOW_SECONDS", Some("86400"), is_prod)?
                    .parse()
                    .unwrap_or(86400),
                tx_timeout_seconds: get_env("INVITE_TX_TIMEOUT_SECONDS", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
                cleanup_interval_seconds: get_env(
                    "INVITE_CLEANUP_INTERVAL_SECONDS",
                    Some("3600"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(3600),
            },
            rate_limit: RateLimitConfig {
                ip_limit: get_env("RATE_LIMIT_IP_LIMIT", Some("20"), is_prod)?
                    .parse()
                    .unwrap_or(20),
                ip_window_seconds: get_env("RATE_LIMIT_IP_WINDOW_SECONDS", Some("3600"), is_prod)?
                    .parse()
                    .unwrap_or(3600),
                email_limit: get_env("RATE_LIMIT_EMAIL_LIMIT", Some("5"), is_prod)?
                    .parse()
                    .unwrap_or(5),
                email_window_seconds: get_env(
                    "RATE_LIMIT_EMAIL_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(3600),
                global_ip_limit: get_env("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"), is_prod)?
                    .parse()
                    .unwrap_or(100),
                global_ip_window_seconds: get_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(60),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.invites.invite_ttl_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITE_TTL_DAYS must be positive"
            )));
        }

        if self.token.secret.len() < 32 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITE_TOKEN_SECRET must be at least 32 bytes"
            )));
        }

        if self.environment == Environment::Prod && self.invites.allowed_domains.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ALLOWED_INVITE_DOMAINS must not be empty in production"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
