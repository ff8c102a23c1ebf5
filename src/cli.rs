use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use qontrol::SessionConfig;
use qontrol::port::SerialSettings;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "qontrol-link",
    about = "Qontrol module driver: send commands, simulate modules, build simulator programs"
)]
pub struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Send commands to a module on a serial port
    Send(SendOpts),
    /// Send commands to a virtual module driven by a program
    Sim(SimOpts),
    /// Turn an exported session log into a simulator program
    Gen(GenOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub dev: String,
    /// Baud rate
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,
    /// Enable RTS/CTS
    #[arg(long, default_value_t = false)]
    pub rtscts: bool,
}

impl SerialOpts {
    pub fn settings(&self) -> SerialSettings {
        SerialSettings {
            dev: self.dev.clone(),
            baud: self.baud,
            rtscts: self.rtscts,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SessionOpts {
    /// Minimum wait for a response, in ms
    #[arg(long, default_value_t = 100)]
    pub timeout_ms: u64,
    /// Quiet period that ends a response after the timeout, in ms
    #[arg(long, default_value_t = 50)]
    pub inter_ms: u64,
    /// Resends allowed after communication errors
    #[arg(long, default_value_t = 3)]
    pub retries: u32,
    /// Log entries kept in memory (0 = unbounded)
    #[arg(long, default_value_t = 4096)]
    pub log_cap: usize,
    /// Accept writes that get no answer
    #[arg(long, default_value_t = false)]
    pub no_ack: bool,
    /// Echo every log entry as it is recorded
    #[arg(long, default_value_t = false)]
    pub echo_log: bool,
}

impl SessionOpts {
    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            response_timeout: Duration::from_millis(self.timeout_ms),
            inter_message_timeout: Duration::from_millis(self.inter_ms),
            max_retries: self.retries,
            log_capacity: (self.log_cap > 0).then_some(self.log_cap),
            require_write_ack: !self.no_ack,
            log_to_stdout: self.echo_log,
            ..SessionConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RequestOpts {
    /// Commands in device syntax, e.g. "v3=1.5" "vall?" "id?"
    #[arg(required = true)]
    pub commands: Vec<String>,
    /// Send binary frames instead of ASCII lines
    #[arg(long, default_value_t = false)]
    pub binary: bool,
    /// Stop after this many response lines
    #[arg(long)]
    pub expect: Option<usize>,
    /// Device error codes that abort the run (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub target: Vec<u32>,
    /// Regex applied to response lines; capture groups are printed
    #[arg(long)]
    pub pattern: Option<String>,
    /// Abort on any device error
    #[arg(long, default_value_t = false)]
    pub fatal: bool,
    /// Watch the bus this long between commands, in ms
    #[arg(long, default_value_t = 0)]
    pub gap_ms: u64,
    /// Print the last N log entries when done
    #[arg(long)]
    pub print_log: Option<usize>,
    /// Write the session log as JSON
    #[arg(long)]
    pub log_out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SendOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub session: SessionOpts,
    #[command(flatten)]
    pub req: RequestOpts,
}

#[derive(Args, Debug, Clone)]
pub struct SimOpts {
    /// Program JSON; a single Q8iv module when omitted
    #[arg(long)]
    pub program: Option<PathBuf>,
    #[command(flatten)]
    pub session: SessionOpts,
    #[command(flatten)]
    pub req: RequestOpts,
}

#[derive(Args, Debug, Clone)]
pub struct GenOpts {
    /// Session log exported with --log-out
    #[arg(long)]
    pub log: PathBuf,
    /// Output program path (stdout when omitted)
    #[arg(long)]
    pub out: Option<PathBuf>,
    /// Program name
    #[arg(long, default_value = "Generated Program")]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_flags_map_to_config() {
        let cli = Cli::parse_from([
            "qontrol-link",
            "sim",
            "--timeout-ms",
            "20",
            "--log-cap",
            "0",
            "--no-ack",
            "--target",
            "10,12",
            "v3=1",
            "id?",
        ]);
        let Cmd::Sim(opts) = cli.cmd else {
            panic!("expected sim");
        };
        let cfg = opts.session.config();
        assert_eq!(cfg.response_timeout, Duration::from_millis(20));
        assert_eq!(cfg.log_capacity, None);
        assert!(!cfg.require_write_ack);
        assert_eq!(opts.req.target, vec![10, 12]);
        assert_eq!(opts.req.commands, vec!["v3=1", "id?"]);
    }

    #[test]
    fn serial_defaults() {
        let cli = Cli::parse_from(["qontrol-link", "send", "id?"]);
        let Cmd::Send(opts) = cli.cmd else {
            panic!("expected send");
        };
        let s = opts.ser.settings();
        assert_eq!(s.dev, "/dev/ttyUSB0");
        assert_eq!(s.baud, 115_200);
        assert_eq!(opts.session.config().max_retries, 3);
    }
}
