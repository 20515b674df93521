pub mod daemon;
pub mod interests;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};

use luckyme_service::ServiceConfig;

pub(crate) fn home_and_config() -> Result<(PathBuf, ServiceConfig)> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    let config = ServiceConfig::load_at(&home).context("failed to load LuckyMe config")?;
    Ok((home, config))
}
