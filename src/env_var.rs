use std::sync::OnceLock;

use serde::Deserialize;

fn default_deadlock_timeout() -> f64 {
    600.0
}

fn default_dissemination_factor() -> usize {
    2
}

fn default_backend() -> String {
    "local".to_owned()
}

fn default_max_segments() -> usize {
    i16::MAX as usize
}

fn default_memory_order() -> OrderConfig {
    OrderConfig::Row
}

fn default_team_all_id() -> usize {
    0
}

/// Default linearization order for patterns that do not specify one.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OrderConfig {
    Row,
    Col,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    /// A general timeout in seconds after which collective spin loops report
    /// a potential deadlock, default: 600.0 seconds
    #[serde(default = "default_deadlock_timeout")]
    pub deadlock_timeout: f64,

    /// The dissemination factor for the n-way team barrier, default: 2
    #[serde(default = "default_dissemination_factor")]
    pub barrier_dissemination_factor: usize,

    /// The fabric backend to use
    /// local -- single unit execution (default)
    /// threaded -- multi unit single process execution, units are threads
    #[serde(default = "default_backend")]
    pub backend: String,

    /// The reserved id of the team containing every unit, default: 0
    #[serde(default = "default_team_all_id")]
    pub team_all_id: usize,

    /// Upper bound on the number of simultaneously attached segments
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,

    /// Default memory order for patterns ("row" or "col"), default: row
    #[serde(default = "default_memory_order")]
    pub memory_order: OrderConfig,

    /// Print verbose diagnostics from collective spin loops. Default: false
    pub collective_warnings: Option<bool>,
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match envy::prefixed("TESSERA_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}
