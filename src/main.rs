use anyhow::Result;
use logtriage::cli::process_cli;

fn main() -> Result<()> {
    process_cli()
}
