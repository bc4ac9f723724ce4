use anyhow::Result;
use clap::Parser;
use sb3js_core::cli::Args;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    sb3js_core::run_cli(&args)
}
