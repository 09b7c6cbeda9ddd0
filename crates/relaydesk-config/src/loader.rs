use config::{Config, Environment, File, FileFormat};
use relaydesk_core::{RelayError, Result};
use std::path::{Path, PathBuf};

use crate::AppConfig;

const CONFIG_FILE: &str = "relaydesk.toml";
const ENV_PREFIX: &str = "RELAYDESK";

/// 配置加载器
pub struct ConfigLoader {
    config_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// 覆盖环境变量前缀（默认 `RELAYDESK`）
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// 加载配置：文件（可选）+ 环境变量覆盖
    pub fn load(&self) -> Result<AppConfig> {
        let config_path = self.config_path();
        let mut builder = Config::builder();

        // 配置文件不存在时使用默认值
        if config_path.exists() {
            let path = config_path
                .to_str()
                .ok_or_else(|| RelayError::Config("Invalid config path".into()))?;
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| RelayError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| RelayError::Config(e.to_string()))
    }

    /// 加载并校验
    pub fn load_validated(&self) -> Result<AppConfig> {
        let config = self.load()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<()> {
        config.gateway.validate()?;

        let rate_limit = &config.rate_limit;
        if rate_limit.max_requests == 0 {
            return Err(RelayError::Config("rate_limit.max_requests must be greater than 0".into()));
        }
        if rate_limit.window_secs == 0 {
            return Err(RelayError::Config("rate_limit.window_secs must be greater than 0".into()));
        }
        if rate_limit.lockout_secs == 0 {
            return Err(RelayError::Config("rate_limit.lockout_secs must be greater than 0".into()));
        }
        if rate_limit.max_login_attempts == 0 {
            return Err(RelayError::Config(
                "rate_limit.max_login_attempts must be greater than 0".into(),
            ));
        }

        let session = &config.session;
        if session.inactivity_timeout_secs == 0 {
            return Err(RelayError::Config(
                "session.inactivity_timeout_secs must be greater than 0".into(),
            ));
        }
        if session.inactivity_check_interval_secs == 0 {
            return Err(RelayError::Config(
                "session.inactivity_check_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}
