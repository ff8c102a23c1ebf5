use anyhow::{Context, Result};

use qontrol::Session;
use qontrol::port::SerialTransport;

use crate::cli::SendOpts;

pub fn run(opts: SendOpts) -> Result<()> {
    let settings = opts.ser.settings();
    let port = SerialTransport::open(&settings)
        .with_context(|| format!("open serial port {}", settings.dev))?;

    tracing::info!(
        "send: dev={} baud={} rtscts={} binary={}",
        port.name().unwrap_or_else(|| settings.dev.clone()),
        settings.baud,
        settings.rtscts,
        opts.req.binary
    );

    let mut session = Session::new(port, opts.session.config());
    super::run_requests(&mut session, &opts.req)
}
