use anyhow::{anyhow, Result};
use env_logger::Env;

use knotgw::command;
use knotgw::constants::{defaults, envvars};
use knotgw::helpers::load_dotenv;

const CMD_RUN: &str = "run";
const CMD_DEVICES: &str = "devices";

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    env_logger::Builder::from_env(Env::default().filter_or(envvars::LOG_LEVEL, defaults::LOG_LEVEL))
        .init();

    let mut args = pico_args::Arguments::from_env();
    match args.subcommand()?.as_deref() {
        Some(CMD_RUN) => command::run().await,
        Some(CMD_DEVICES) => command::devices(),
        _ => Err(anyhow!("Subcommand must be one of 'run', 'devices'")),
    }
}
