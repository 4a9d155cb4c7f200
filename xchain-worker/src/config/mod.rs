use std::collections::BTreeMap;

use anyhow::ensure;
use anyhow::Context;
use config::Environment;
use config::FileFormat;
use lazy_static_include::*;
use redact::Secret;
use serde_derive::Deserialize;
use tracing::debug;
use xchain_messages::ChainId;

lazy_static_include_str! {
    DEFAULT_CONFIG => "src/config/default.toml",
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub(crate) struct Config {
    #[serde(default)]
    pub(crate) rpc: RpcConfig,
    #[serde(default)]
    pub(crate) prometheus: PrometheusConfig,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub(crate) struct RpcConfig {
    /// Comma separated URLs keyed by chain id. URLs often embed API keys.
    #[serde(default)]
    pub(crate) overrides: BTreeMap<String, Secret<String>>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub(crate) struct PrometheusConfig {
    pub(crate) port: Option<u16>,
}

impl RpcConfig {
    /// The overrides as chain ids and URL lists.
    pub fn chain_urls(&self) -> anyhow::Result<Vec<(ChainId, Vec<String>)>> {
        self.overrides
            .iter()
            .map(|(chain, urls)| {
                let chain_id = chain
                    .trim()
                    .parse::<ChainId>()
                    .with_context(|| format!("RPC override key `{chain}` is not a chain id"))?;
                let urls = urls
                    .expose_secret()
                    .split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string)
                    .collect();
                Ok((chain_id, urls))
            })
            .collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (chain_id, urls) in self.chain_urls()? {
            ensure!(!urls.is_empty(), "RPC override for chain {chain_id} has no URL");
            for url in &urls {
                // The URL itself is not echoed since it may carry a key.
                url::Url::parse(url)
                    .with_context(|| format!("invalid RPC override URL for chain {chain_id}"))?;
            }
        }
        Ok(())
    }
}

impl Config {
    pub fn load(local_file: Option<String>) -> anyhow::Result<Config> {
        Self::load_with(local_file, Environment::default())
    }

    fn load_with(
        local_file: Option<String>,
        environment: Environment,
    ) -> anyhow::Result<Config> {
        let mut config_builder = config::Config::builder();
        config_builder = config_builder.add_source(config::File::from_str(
            &DEFAULT_CONFIG,
            FileFormat::Toml,
        ));

        if let Some(local_file) = local_file {
            debug!("Loading local configuration from {}", local_file);
            config_builder = config_builder.add_source(config::File::with_name(&local_file));
        }

        config_builder
            .add_source(environment.separator("__").ignore_empty(true))
            .build()
            .context("loading configuration")?
            .try_deserialize()
            .context("deserializing configuration")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.rpc.validate()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn with_env(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::load_with(None, Environment::default().source(Some(vars)))
    }

    #[test]
    fn defaults_have_no_overrides() {
        let config = with_env(&[]).unwrap();
        assert!(config.rpc.overrides.is_empty());
        assert_eq!(config.prometheus.port, None);
        config.validate().unwrap();
    }

    #[test]
    fn reads_overrides_from_environment() {
        let config = with_env(&[
            (
                "RPC__OVERRIDES__1",
                "https://a.example/v2/key, https://b.example",
            ),
            ("PROMETHEUS__PORT", "9090"),
        ])
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.prometheus.port, Some(9090));
        assert_eq!(
            config.rpc.chain_urls().unwrap(),
            vec![(
                1,
                vec![
                    "https://a.example/v2/key".to_string(),
                    "https://b.example".to_string()
                ]
            )]
        );
    }

    #[test]
    fn secrets_are_not_printed() {
        let config = with_env(&[("RPC__OVERRIDES__137", "https://polygon.example/secret-key")])
            .unwrap();
        assert!(!format!("{config:?}").contains("secret-key"));
    }

    #[test]
    fn rejects_bad_overrides() {
        let bad_key = with_env(&[("RPC__OVERRIDES__MAINNET", "https://a.example")]).unwrap();
        assert!(bad_key.validate().is_err());

        let empty = with_env(&[("RPC__OVERRIDES__1", " , ")]).unwrap();
        assert!(empty.validate().is_err());

        let bad_url = with_env(&[("RPC__OVERRIDES__1", "not a url")]).unwrap();
        assert!(bad_url.validate().is_err());
    }
}
