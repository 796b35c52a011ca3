//! Transport option configuration.
//!
//! [`Config`] collects the string options handed to a transport when a
//! worker is created. Values come from three layers, later layers winning:
//! built-in defaults, `UCX_`-prefixed environment variables (prefix
//! stripped), and options supplied by the caller.

use std::{collections::BTreeMap, str::FromStr};

/// Map of option names to values.
pub type ConfigMap = BTreeMap<String, String>;

/// Prefix identifying transport options in the environment.
pub const ENV_PREFIX: &str = "UCX_";

/// Option controlling the message size above which tagged sends use the
/// rendezvous protocol.
pub const RNDV_THRESH: &str = "RNDV_THRESH";

const DEFAULTS: &[(&str, &str)] = &[(RNDV_THRESH, "8192"), ("TLS", "all")];

/// Resolved transport options.
///
/// # Examples
///
/// ```
/// use ucxio::config::{Config, ConfigMap};
///
/// let mut user = ConfigMap::new();
/// user.insert("TLS".into(), "tcp".into());
/// let env = [("UCX_TLS".to_owned(), "shm".to_owned())];
///
/// let config = Config::from_vars(user, env);
/// assert_eq!(config.get_option("TLS"), Some("tcp"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    options: ConfigMap,
}

impl Config {
    /// Build a configuration from the process environment and
    /// `user_options`.
    #[must_use]
    pub fn new(user_options: ConfigMap) -> Self { Self::from_vars(user_options, std::env::vars()) }

    /// Build a configuration from an explicit set of environment variables.
    ///
    /// Variables without the [`ENV_PREFIX`] are ignored.
    #[must_use]
    pub fn from_vars<I>(user_options: ConfigMap, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut options: ConfigMap = DEFAULTS
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(ENV_PREFIX)
                && !name.is_empty()
            {
                options.insert(name.to_owned(), value);
            }
        }
        options.extend(user_options);
        Self { options }
    }

    /// Return every resolved option.
    #[must_use]
    pub fn get(&self) -> &ConfigMap { &self.options }

    /// Look up a single option.
    #[must_use]
    pub fn get_option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Look up and parse an option, ignoring values that fail to parse.
    #[must_use]
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get_option(key).and_then(|value| value.trim().parse().ok())
    }
}
