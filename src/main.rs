//! Binary entry point.

use anyhow::Result;
use clap::Parser;

use kmertax::cli::{run, Cli};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    run(cli)
}
