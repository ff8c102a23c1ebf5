use anyhow::{Context, Result};

use qontrol::Session;
use qontrol::sim::{Handlers, Program, VirtualDevice};

use crate::cli::SimOpts;

pub fn run(opts: SimOpts) -> Result<()> {
    let program = match &opts.program {
        Some(path) => Program::from_json_file(path, &Handlers::new())
            .with_context(|| format!("load program {}", path.display()))?,
        None => Program::single_module(),
    };
    let device = VirtualDevice::new(program).context("start virtual device")?;

    let mut session = Session::new(device, opts.session.config());
    super::run_requests(&mut session, &opts.req)
}
