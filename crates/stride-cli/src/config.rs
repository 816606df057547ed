//! Configuration file management for stride.
//!
//! Provides a TOML config file at `~/.config/stride/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use stride_core::adherence::AdherencePolicy;
use stride_core::auth::{SECRET_ENV, TokenConfig};
use stride_core::overrides::OverridePolicy;
use stride_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub overrides: OverridePolicy,
    #[serde(default)]
    pub adherence: AdherencePolicy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_secs: Option<u64>,
    /// How long an override or instance write waits on a row lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_timeout_ms: Option<u64>,
}

impl DatabaseSection {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: None,
            acquire_timeout_secs: None,
            lock_timeout_ms: None,
        }
    }

    /// Apply the pool tuning set in the file on top of `config`.
    fn tune(&self, mut config: DbConfig) -> DbConfig {
        if let Some(n) = self.max_connections {
            config = config.with_max_connections(n);
        }
        if let Some(secs) = self.acquire_timeout_secs {
            config = config.with_acquire_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = self.lock_timeout_ms {
            config = config.with_lock_timeout(Duration::from_millis(ms));
        }
        config
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthSection {
    /// Hex-encoded token secret (64 hex chars = 32 bytes).
    pub token_secret: String,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the stride config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/stride` or `~/.config/stride`,
/// also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("stride");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("stride")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

pub fn load_config_from(path: &std::path::Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Write `config` to `path`, creating parent dirs as needed. The file is
/// left readable by its owner only.
pub fn save_config_to(path: &std::path::Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Generate a random token secret: 32 random bytes, hex-encoded (64 chars).
pub fn generate_token_secret() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct StrideConfig {
    pub db_config: DbConfig,
    /// Absent when neither the env var nor the config file provides one.
    /// Only token issuing and `serve` need it.
    pub token_config: Option<TokenConfig>,
    pub override_policy: OverridePolicy,
    pub adherence_policy: AdherencePolicy,
}

impl StrideConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `STRIDE_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Token secret: `STRIDE_TOKEN_SECRET` > `auth.token_secret`
    /// - Policies: config file sections > built-in defaults
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let path = config_path();
        let file_config = if path.exists() {
            Some(load_config_from(&path)?)
        } else {
            None
        };
        Self::resolve_with(cli_db_url, file_config)
    }

    fn resolve_with(cli_db_url: Option<&str>, file_config: Option<ConfigFile>) -> Result<Self> {
        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::URL_ENV) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        let token_config = if let Ok(secret_hex) = std::env::var(SECRET_ENV) {
            Some(
                TokenConfig::from_hex(&secret_hex)
                    .with_context(|| format!("{SECRET_ENV} env var is not a usable secret"))?,
            )
        } else if let Some(ref cfg) = file_config {
            Some(
                TokenConfig::from_hex(&cfg.auth.token_secret)
                    .context("invalid token_secret in config file")?,
            )
        } else {
            None
        };

        let db_config = match &file_config {
            Some(cfg) => cfg.database.tune(DbConfig::new(db_url)),
            None => DbConfig::new(db_url),
        };

        let (override_policy, adherence_policy) = match file_config {
            Some(cfg) => (cfg.overrides, cfg.adherence),
            None => (OverridePolicy::default(), AdherencePolicy::default()),
        };
        override_policy
            .validate()
            .context("invalid [overrides] section")?;
        adherence_policy
            .validate()
            .context("invalid [adherence] section")?;

        Ok(Self {
            db_config,
            token_config,
            override_policy,
            adherence_policy,
        })
    }

    /// The token config, or an error explaining how to provide one.
    pub fn require_token(&self) -> Result<&TokenConfig> {
        match &self.token_config {
            Some(config) => Ok(config),
            None => bail!(
                "token secret not found; set {SECRET_ENV} or run `stride init` to create a config file"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55";

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn sample_file() -> ConfigFile {
        ConfigFile {
            database: DatabaseSection {
                max_connections: Some(12),
                lock_timeout_ms: Some(1500),
                ..DatabaseSection::new("postgresql://filehost:5432/filedb")
            },
            auth: AuthSection {
                token_secret: "bb".repeat(32),
            },
            overrides: OverridePolicy {
                max_auto_calorie_delta: 150.0,
                ..OverridePolicy::default()
            },
            adherence: AdherencePolicy::default(),
        }
    }

    #[test]
    fn generate_token_secret_is_64_hex_chars() {
        let secret = generate_token_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, generate_token_secret());
    }

    #[test]
    fn save_and_load_roundtrip_with_owner_only_permissions() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("stride").join("config.toml");

        save_config_to(&path, &sample_file()).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.database.url, "postgresql://filehost:5432/filedb");
        assert_eq!(loaded.overrides.max_auto_calorie_delta, 150.0);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = std::fs::metadata(&path).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn policy_sections_are_optional() {
        let parsed: ConfigFile = toml::from_str(
            r#"
            [database]
            url = "postgresql://localhost:5432/stride"

            [auth]
            token_secret = "00ff"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.overrides, OverridePolicy::default());
        assert_eq!(parsed.adherence, AdherencePolicy::default());
    }

    #[test]
    fn cli_flag_overrides_env_and_file() {
        let _lock = lock_env();
        unsafe { std::env::set_var(DbConfig::URL_ENV, "postgresql://env:5432/envdb") };

        let config =
            StrideConfig::resolve_with(Some("postgresql://cli:5432/clidb"), Some(sample_file()))
                .unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        unsafe { std::env::remove_var(DbConfig::URL_ENV) };
    }

    #[test]
    fn env_overrides_file() {
        let _lock = lock_env();
        unsafe { std::env::set_var(DbConfig::URL_ENV, "postgresql://env:5432/envdb") };
        unsafe { std::env::set_var(SECRET_ENV, SECRET) };

        let config = StrideConfig::resolve_with(None, Some(sample_file())).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");
        let from_env = TokenConfig::from_hex(SECRET).unwrap();
        let owner = uuid::Uuid::new_v4();
        let token = stride_core::auth::generate_owner_token(&from_env, owner).unwrap();
        assert!(
            stride_core::auth::validate_owner_token(config.require_token().unwrap(), &token)
                .is_ok()
        );

        unsafe { std::env::remove_var(DbConfig::URL_ENV) };
        unsafe { std::env::remove_var(SECRET_ENV) };
    }

    #[test]
    fn file_supplies_url_secret_and_policies() {
        let _lock = lock_env();
        unsafe { std::env::remove_var(DbConfig::URL_ENV) };
        unsafe { std::env::remove_var(SECRET_ENV) };

        let config = StrideConfig::resolve_with(None, Some(sample_file())).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://filehost:5432/filedb");
        assert!(config.token_config.is_some());
        assert_eq!(config.override_policy.max_auto_calorie_delta, 150.0);
    }

    #[test]
    fn file_pool_tuning_applies_even_when_url_comes_from_cli() {
        let _lock = lock_env();
        unsafe { std::env::remove_var(SECRET_ENV) };

        let config =
            StrideConfig::resolve_with(Some("postgresql://cli:5432/clidb"), Some(sample_file()))
                .unwrap();
        assert_eq!(config.db_config.max_connections, 12);
        assert_eq!(config.db_config.lock_timeout, Duration::from_millis(1500));
        assert_eq!(config.db_config.acquire_timeout, Duration::from_secs(10));
    }

    #[test]
    fn pool_tuning_is_optional_in_the_file() {
        let parsed: ConfigFile = toml::from_str(
            r#"
            [database]
            url = "postgresql://localhost:5432/stride"
            max_connections = 3

            [auth]
            token_secret = "00ff"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.database.max_connections, Some(3));
        assert!(parsed.database.lock_timeout_ms.is_none());
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let _lock = lock_env();
        unsafe { std::env::remove_var(DbConfig::URL_ENV) };
        unsafe { std::env::remove_var(SECRET_ENV) };

        let config = StrideConfig::resolve_with(None, None).unwrap();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        let err = config.require_token().unwrap_err();
        assert!(err.to_string().contains("token secret not found"), "{err}");
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let _lock = lock_env();
        unsafe { std::env::remove_var(SECRET_ENV) };
        let mut file = sample_file();
        file.adherence.similar_min_similarity = 0.95;
        assert!(StrideConfig::resolve_with(None, Some(file)).is_err());
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        assert!(config_path().ends_with("stride/config.toml"));
    }
}
