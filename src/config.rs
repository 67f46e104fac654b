use anyhow::Result;
use clap_serde_derive::ClapSerde;

#[derive(ClapSerde, Debug)]
pub struct Config {
    /// The address the listener binds to
    #[default("0.0.0.0".to_string())]
    #[arg(short, long, env)]
    pub(crate) address: String,

    /// The port the listener binds to
    #[default(8080)]
    #[arg(short, long, env)]
    pub(crate) port: u16,

    /// Path to the serialized regression model artifact
    #[default("models/bp_forest.json".to_string())]
    #[arg(short, long, env)]
    pub(crate) model_file: String,
}

impl Config {
    /// Reads a partial configuration; CLI and env overrides are merged on
    /// top by the caller.
    pub fn from_toml(path: &str) -> Result<<Config as ClapSerde>::Opt> {
        let str = std::fs::read_to_string(path)?;
        let opts = toml::from_str(&str)?;
        Ok(opts)
    }
}
