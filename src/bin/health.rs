use std::env;

use anyhow::{bail, Result};
use reqwest::Url;

fn main() -> Result<()> {
    let url = match env::args().nth(1) {
        Some(raw) => Url::parse(&raw)?,
        None => bail!("missing URL argument"),
    };

    let response = reqwest::blocking::get(url)?;
    if !response.status().is_success() {
        bail!("health check failed with status {}", response.status());
    }

    Ok(())
}
