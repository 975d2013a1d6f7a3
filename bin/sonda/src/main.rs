//! The sonda crawler binary.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod cli;
use cli::Cli;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    Cli::parse().run()
}
