pub mod build_info;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod rpc;
pub mod supervisor;
pub mod table;

pub fn main() -> anyhow::Result<()> {
    cli::run()
}
