mod cli;
mod processor;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    stepwise_observability::init();
    cli::Cli::parse().run()
}
