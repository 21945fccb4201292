use std::time::Duration;
use thiserror::Error;

/// Errors when loading or validating confirmation configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfirmConfigError {
    /// Required environment variable was not provided.
    #[error("missing env var {0}")]
    MissingEnv(&'static str),

    /// Configuration failed validation checks.
    #[error("invalid email confirmation config: {0}")]
    Invalid(String),
}

/// Shortest token length accepted by [`ConfirmConfig::validate`].
pub const TOKEN_LENGTH_MIN: usize = 8;

/// Longest token length accepted; matches the token column width.
pub const TOKEN_LENGTH_MAX: usize = 32;

/// Longest confirmation window accepted (100 years).
pub const CONFIRM_EXPIRE_MAX: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Email confirmation configuration
#[derive(Debug, Clone)]
pub struct ConfirmConfig {
    /// Confirmation window, counted from the first send (default: 1 day)
    pub confirm_expire: Duration,

    /// Number of characters in a generated token (default: 16)
    pub token_length: usize,

    /// Absolute site root used to build confirmation links,
    /// e.g. "https://app.example.com". Must be provided.
    pub site_root_url: String,

    /// Path the confirmation routes are mounted under (default: "")
    pub path_prefix: String,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            confirm_expire: Duration::from_secs(24 * 60 * 60), // 1 day
            token_length: 16,
            site_root_url: String::new(), // Must be provided by user
            path_prefix: String::new(),
        }
    }
}

impl ConfirmConfig {
    /// Build confirmation config from environment variables.
    ///
    /// Required:
    /// - `EMAIL_CONFIRM_SITE_ROOT_URL`
    ///
    /// Optional variables fall back to `Default` values when not provided.
    pub fn from_env() -> Result<Self, ConfirmConfigError> {
        let mut cfg = Self::default();
        cfg.site_root_url = env_var_required("EMAIL_CONFIRM_SITE_ROOT_URL")?;
        cfg.confirm_expire = Duration::from_secs(env_var_parse_or_default(
            "EMAIL_CONFIRM_EXPIRE_SECS",
            cfg.confirm_expire.as_secs(),
            "u64",
        )?);
        cfg.token_length =
            env_var_parse_or_default("EMAIL_CONFIRM_TOKEN_LENGTH", cfg.token_length, "usize")?;
        if let Some(v) = env_var_optional("EMAIL_CONFIRM_PATH_PREFIX") {
            cfg.path_prefix = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfirmConfigError> {
        if self.confirm_expire.as_secs() == 0 {
            return Err(ConfirmConfigError::Invalid(
                "Confirmation expiry must be greater than 0".to_string(),
            ));
        }

        if self.confirm_expire > CONFIRM_EXPIRE_MAX {
            return Err(ConfirmConfigError::Invalid(format!(
                "Confirmation expiry must be at most {} seconds",
                CONFIRM_EXPIRE_MAX.as_secs()
            )));
        }

        if !(TOKEN_LENGTH_MIN..=TOKEN_LENGTH_MAX).contains(&self.token_length) {
            return Err(ConfirmConfigError::Invalid(format!(
                "Token length must be between {TOKEN_LENGTH_MIN} and {TOKEN_LENGTH_MAX}"
            )));
        }

        let root = self.site_root_url.trim();
        if root.is_empty() {
            return Err(ConfirmConfigError::Invalid(
                "Site root URL cannot be empty".to_string(),
            ));
        }

        if !(root.starts_with("http://") || root.starts_with("https://")) {
            return Err(ConfirmConfigError::Invalid(
                "Site root URL must start with http:// or https://".to_string(),
            ));
        }

        if !self.path_prefix.is_empty()
            && (!self.path_prefix.starts_with('/') || self.path_prefix.ends_with('/'))
        {
            return Err(ConfirmConfigError::Invalid(
                "Path prefix must start with '/' and must not end with '/'".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_var_required(key: &'static str) -> Result<String, ConfirmConfigError> {
    env_var_optional(key).ok_or(ConfirmConfigError::MissingEnv(key))
}

fn env_var_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_var_parse_or_default<T: std::str::FromStr>(
    key: &str,
    default: T,
    type_name: &str,
) -> Result<T, ConfirmConfigError> {
    match env_var_optional(key) {
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|_| ConfirmConfigError::Invalid(format!("{key} must be a valid {type_name}"))),
        _ => Ok(default),
    }
}
