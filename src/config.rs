use std::str::FromStr;

use thiserror::Error;

use crate::store::Namespace;

pub const STORE_URL_ENV: &str = "STORE_URL";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0:?} is not a store url, expected <scheme>://...")]
    InvalidUrl(String),
    #[error("the {0:?} store scheme is not supported")]
    UnsupportedScheme(String),
    #[error("the increment must be positive, got {0}")]
    InvalidIncrement(i64),
}

/// Where the store lives. Only the in-memory store ships with this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreUrl {
    Memory,
}

impl FromStr for StoreUrl {
    type Err = ConfigError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let Some((scheme, _rest)) = url.split_once("://") else {
            return Err(ConfigError::InvalidUrl(url.to_string()));
        };

        match scheme {
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub namespace: Namespace,
    /// Upper bound on the number of records sampled at setup.
    pub sample_size: u64,
    /// Milliseconds added to `updateTime` by each update path.
    pub increment: i64,
    /// Fail setup when the collection has no records, instead of running a no-op scenario.
    pub abort_on_empty: bool,
    /// Seeds the sampler, a fresh seed is drawn when unset.
    pub seed: Option<u64>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            namespace: Namespace::new("testdb", "testcollection"),
            sample_size: 5,
            increment: 1,
            abort_on_empty: true,
            seed: None,
        }
    }
}

impl ScenarioConfig {
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.increment <= 0 {
            return Err(ConfigError::InvalidIncrement(self.increment));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_store_url() {
        assert_eq!("memory://".parse::<StoreUrl>(), Ok(StoreUrl::Memory));
        assert_eq!(
            "mongodb://localhost:27017".parse::<StoreUrl>(),
            Err(ConfigError::UnsupportedScheme("mongodb".to_string()))
        );
        assert_eq!(
            "localhost".parse::<StoreUrl>(),
            Err(ConfigError::InvalidUrl("localhost".to_string()))
        );
    }

    #[test]
    fn increment_must_be_positive() {
        let config = ScenarioConfig {
            increment: 0,
            ..ScenarioConfig::default()
        };

        assert_eq!(config.validate(), Err(ConfigError::InvalidIncrement(0)));
        assert_eq!(ScenarioConfig::default().validate(), Ok(()));
    }
}
