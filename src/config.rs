//! Configuration for the execution coordinator
//!
//! Loads settings from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSettings {
    pub deployment: DeploymentConfig,
    pub chain: ChainSettings,
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    /// Blocks behind latest at which a transaction counts as confirmed
    pub required_confirmations: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainSettings {
    pub rpc_urls: Vec<String>,
    /// Ceiling for the EIP-1559 max-fee recommendation
    pub max_fee_gwei: Option<u64>,
    #[serde(default)]
    pub accounts: Vec<Address>,
    pub default_sender: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    pub path: PathBuf,
}

impl ExecutorSettings {
    /// Load settings from the file named by `KEYSTONE_CONFIG`, defaulting
    /// to `config/default.toml`
    pub fn load() -> Result<Self> {
        let config_path = env::var("KEYSTONE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from a TOML string, substituting `${VAR}` references
    pub fn parse(config_str: &str) -> Result<Self> {
        let config_str = substitute_env_vars(config_str);

        let settings: ExecutorSettings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("At least one RPC URL must be configured");
        }

        if self.deployment.required_confirmations == 0 {
            anyhow::bail!("required_confirmations must be at least 1");
        }

        if let Some(default_sender) = self.chain.default_sender {
            if !self.chain.accounts.is_empty() && !self.chain.accounts.contains(&default_sender)
            {
                anyhow::bail!(
                    "default_sender {:?} is not one of the configured accounts",
                    default_sender
                );
            }
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
