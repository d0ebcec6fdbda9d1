use anyhow::Result;
use clap::Parser;

mod bench;
mod cli;
mod clock;
mod crc;
mod exec;
mod frame;
mod link;
mod ping;
mod registry;
mod report;
mod scan;
mod sched;
mod session;
mod transport;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    match args.cmd {
        cli::Cmd::Ping(opts) => ping::run(opts),
        cli::Cmd::Scan(opts) => scan::run(opts),
        cli::Cmd::Run(opts) => bench::run(opts),
    }
}
