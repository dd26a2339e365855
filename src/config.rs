use anyhow::Result;
use clap_serde_derive::ClapSerde;
use serde::Deserialize;

#[derive(ClapSerde, Deserialize, Debug)]
pub struct Config {
    /// The address the listener binds to
    #[arg(short, long, env, default_value = "0.0.0.0")]
    pub(crate) address: String,

    /// The port the listener binds to
    #[arg(short, long, env, default_value = "25566")]
    pub(crate) port: u16,

    /// The id of the model repository on the Hugging Face hub
    #[arg(long, env, default_value = "mistralai/Mistral-7B-Instruct-v0.1")]
    pub(crate) repo_id: String,

    /// The revision of the model repository
    #[arg(long, env, default_value = "main")]
    pub(crate) repo_revision: String,

    /// Run the model on the CPU even when an accelerator is available
    #[arg(long, env, default_value = "false")]
    pub(crate) cpu: bool,

    /// Penalty applied to recently generated tokens, 1.0 (the default) disables it
    #[arg(long, env, default_value = "1.0")]
    #[default(1.0)]
    pub(crate) repeat_penalty: f32,

    /// Number of trailing tokens the repeat penalty is applied over
    #[arg(long, env, default_value = "64")]
    #[default(64)]
    pub(crate) repeat_context_size: usize,
}

impl Config {
    pub fn from_toml(path: &str) -> Result<Self> {
        let str = std::fs::read_to_string(path)?;
        let config = toml::from_str(&str)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_penalty_is_disabled_by_default() {
        // Out of the box only temperature and top-p shape the sampling; the
        // penalty stays opt-in configuration.
        let config = Config::default();
        assert_eq!(config.repeat_penalty, 1.0);
        assert_eq!(config.repeat_context_size, 64);
    }
}
