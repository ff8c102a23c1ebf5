pub mod generate;
pub mod send;
pub mod sim;

use anyhow::{Context, Result};
use regex::Regex;
use std::time::Duration;

use qontrol::proto::{Encoding, parse_ascii};
use qontrol::session::generic_log_handler;
use qontrol::{SendOptions, Session, Transport};

use crate::cli::RequestOpts;

/// Issue every requested command on `session`, printing the responses.
pub fn run_requests<T: Transport>(session: &mut Session<T>, req: &RequestOpts) -> Result<()> {
    let mut opts = SendOptions::default().target(req.target.iter().copied());
    if let Some(n) = req.expect {
        opts = opts.expect_lines(n);
    }
    if let Some(p) = &req.pattern {
        opts = opts.pattern(Regex::new(p).with_context(|| format!("bad pattern '{}'", p))?);
    }
    if req.fatal {
        session.set_log_handler(generic_log_handler(None));
    }
    let encoding = if req.binary {
        Encoding::Binary
    } else {
        Encoding::Ascii
    };

    let result = issue_all(session, req, encoding, &opts);

    session.stats().log_summary();
    if let Some(n) = req.print_log {
        session.log().print_log(Some(n));
    }
    if let Some(path) = &req.log_out {
        session
            .log()
            .write_json(path)
            .with_context(|| format!("write log {}", path.display()))?;
        tracing::info!("log written to {}", path.display());
    }
    result
}

fn issue_all<T: Transport>(
    session: &mut Session<T>,
    req: &RequestOpts,
    encoding: Encoding,
    opts: &SendOptions,
) -> Result<()> {
    for text in &req.commands {
        let cmd = parse_ascii(text).with_context(|| format!("parse '{}'", text))?;
        let lines = session
            .send_with(&cmd, encoding, opts)
            .with_context(|| format!("send '{}'", text))?;
        for line in lines {
            if opts.pattern.is_some() {
                let groups: Vec<&str> = line
                    .groups
                    .iter()
                    .map(|g| g.as_deref().unwrap_or("-"))
                    .collect();
                println!("{}", groups.join("\t"));
            } else {
                println!("{}", line.text);
            }
        }
        if req.gap_ms > 0 {
            for err in session.wait(Duration::from_millis(req.gap_ms))? {
                tracing::warn!("device error while idle: {}", err);
            }
        }
    }
    Ok(())
}
