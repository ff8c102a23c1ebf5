use anyhow::{Context, Result};

use qontrol::session::log::read_json;
use qontrol::sim::from_log;

use crate::cli::GenOpts;

pub fn run(opts: GenOpts) -> Result<()> {
    let entries =
        read_json(&opts.log).with_context(|| format!("read log {}", opts.log.display()))?;
    let program = from_log(&entries, &opts.name);
    tracing::info!(
        "generated '{}': {} commands from {} log entries",
        program.name,
        program.commands().len(),
        entries.len()
    );

    match &opts.out {
        Some(path) => program
            .write_json_file(path)
            .with_context(|| format!("write program {}", path.display()))?,
        None => println!("{}", program.to_json().context("serialize program")?),
    }
    Ok(())
}
