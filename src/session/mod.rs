//! Request/response sequencing over a [`Transport`].
//!
//! A [`Session`] owns its transport exclusively. `send` writes one command,
//! then polls the transport until the response is complete, the device
//! reports a fatal error, or the bus has been quiet long enough after the
//! response timeout. Communication errors trigger a bounded resend of the
//! identical bytes.

pub mod log;

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::proto::{
    Command, DeviceError, EncodeError, Encoding, Header, encode_binary, format_ascii,
};
use crate::stats::Stats;
use crate::transport::Transport;

pub use log::{LogEntry, LogKind, SessionLog};

/// Line a device sends when a write completed.
pub const RESPONSE_OK: &str = "OK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Transmitting,
    CollectingResponse,
    Completed,
    Retrying,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Minimum time to wait for a response.
    pub response_timeout: Duration,
    /// Quiet period after `response_timeout` that ends collection.
    pub inter_message_timeout: Duration,
    pub poll_interval: Duration,
    /// Resends allowed after communication errors.
    pub max_retries: u32,
    /// `None` keeps every log entry.
    pub log_capacity: Option<usize>,
    /// When false, a write that gets no answer is logged and returns no lines.
    pub require_write_ack: bool,
    pub log_to_stdout: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(100),
            inter_message_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_micros(500),
            max_retries: 3,
            log_capacity: Some(4096),
            require_write_ack: true,
            log_to_stdout: false,
        }
    }
}

/// Per-call knobs of [`Session::send_with`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Stop as soon as this many data lines arrived.
    pub expected_lines: Option<usize>,
    /// Device error codes that fail the call.
    pub target_errors: Vec<u32>,
    /// Applied to each returned line; capture groups land in
    /// [`ResponseLine::groups`].
    pub pattern: Option<Regex>,
    /// Replaces `response_timeout` for this call.
    pub timeout: Option<Duration>,
}

impl SendOptions {
    #[must_use]
    pub fn expect_lines(mut self, n: usize) -> Self {
        self.expected_lines = Some(n);
        self
    }

    #[must_use]
    pub fn target(mut self, codes: impl IntoIterator<Item = u32>) -> Self {
        self.target_errors.extend(codes);
        self
    }

    #[must_use]
    pub fn pattern(mut self, re: Regex) -> Self {
        self.pattern = Some(re);
        self
    }

    #[must_use]
    pub fn timeout(mut self, t: Duration) -> Self {
        self.timeout = Some(t);
        self
    }
}

/// A data line of a response, terminator stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseLine {
    pub text: String,
    /// Capture groups of the call's pattern; `[None]` when it did not match,
    /// `[Some(text)]` when no pattern was given.
    pub groups: Vec<Option<String>>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("transport: {0}")]
    Io(#[from] io::Error),
    #[error("timed out after {0:?} waiting for response")]
    Timeout(Duration),
    #[error("received target error {error}; last {} log entries:\n{}", .tail.len(), render_tail(.tail))]
    Target {
        error: DeviceError,
        tail: Vec<LogEntry>,
    },
    #[error("gave up after {attempts} attempts on communication errors")]
    RetriesExhausted { attempts: u32 },
    #[error("log handler aborted: {0}")]
    Aborted(String),
    #[error("unexpected non-ASCII bytes from device: {}", hex::encode(.0))]
    NonAscii(Vec<u8>),
}

fn render_tail(tail: &[LogEntry]) -> String {
    tail.iter()
        .map(LogEntry::render)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Called synchronously for every log entry; an `Err` aborts the current call.
pub type LogHandler = Box<dyn FnMut(&LogEntry) -> anyhow::Result<()> + Send>;

/// Handler that turns device errors into hard failures: every error when
/// `fatal` is `None`, otherwise only the listed codes.
pub fn generic_log_handler(fatal: Option<Vec<u32>>) -> LogHandler {
    Box::new(move |e: &LogEntry| {
        let Some(code) = e.error_code() else {
            return Ok(());
        };
        if fatal.as_ref().is_none_or(|f| f.contains(&code)) {
            anyhow::bail!(
                "caught device error {} \"{}\" at {:.1} ms",
                String::from_utf8_lossy(&e.raw).trim_end(),
                e.desc,
                e.proctime * 1e3
            );
        }
        Ok(())
    })
}

enum Collected {
    Lines(Vec<String>),
    CommError,
    Nothing,
}

/// One polling pass worth of classified input.
#[derive(Default)]
struct Received {
    lines: Vec<String>,
    errors: Vec<DeviceError>,
}

impl Received {
    fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.errors.is_empty()
    }
}

pub struct Session<T: Transport = Box<dyn Transport>> {
    transport: T,
    config: SessionConfig,
    log: SessionLog,
    stats: Stats,
    state: SessionState,
    handler: Option<LogHandler>,
    rx_buf: Vec<u8>,
    t0: Instant,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        info!(
            "session open: timeout {:?} + {:?} quiet, {} retries",
            config.response_timeout, config.inter_message_timeout, config.max_retries
        );
        Self {
            transport,
            log: SessionLog::new(config.log_capacity),
            config,
            stats: Stats::new(),
            state: SessionState::Idle,
            handler: None,
            rx_buf: Vec::new(),
            t0: Instant::now(),
        }
    }

    pub fn set_log_handler(&mut self, handler: LogHandler) {
        self.handler = Some(handler);
    }

    pub fn clear_log_handler(&mut self) {
        self.handler = None;
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send a command and return the data lines of the response.
    ///
    /// Binary commands must use a header mode their catalog entry declares.
    pub fn send(&mut self, cmd: &Command, encoding: Encoding) -> Result<Vec<String>, SessionError> {
        let lines = self.send_with(cmd, encoding, &SendOptions::default())?;
        Ok(lines.into_iter().map(|l| l.text).collect())
    }

    pub fn send_with(
        &mut self,
        cmd: &Command,
        encoding: Encoding,
        opts: &SendOptions,
    ) -> Result<Vec<ResponseLine>, SessionError> {
        let bytes = match encoding {
            // header modes constrain binary frames only; text goes out as typed
            Encoding::Binary if !cmd.validate() => {
                return Err(EncodeError::Unsupported {
                    name: cmd.index().name,
                    header: cmd.header().bits(),
                }
                .into());
            }
            Encoding::Binary => encode_binary(cmd)?,
            Encoding::Ascii => format_ascii(cmd).into_bytes(),
        };

        let mut meta = LogEntry::new(
            if cmd.is_read() {
                LogKind::Get
            } else {
                LogKind::Set
            },
            self.proctime(),
        );
        meta.id = cmd.index().name.to_string();
        meta.ch = cmd.channel_number().map(u32::from);
        meta.value = cmd.data().map(|d| d.to_string());
        meta.desc = format_ascii(cmd).trim_end().to_string();
        self.transact(&bytes, cmd.is_read(), Some(meta), opts)
    }

    /// Send pre-encoded bytes: an ASCII line or a binary frame.
    pub fn send_raw(
        &mut self,
        bytes: &[u8],
        opts: &SendOptions,
    ) -> Result<Vec<ResponseLine>, SessionError> {
        let is_read = match Encoding::detect(bytes) {
            Encoding::Binary => bytes[0] & Header::READ.bits() != 0,
            Encoding::Ascii => !bytes.contains(&b'='),
        };
        self.transact(bytes, is_read, None, opts)
    }

    /// Watch the bus for `dur`, logging whatever arrives. Returns the device
    /// errors seen.
    pub fn wait(&mut self, dur: Duration) -> Result<Vec<DeviceError>, SessionError> {
        let end = Instant::now() + dur;
        let mut errors = Vec::new();
        while Instant::now() < end {
            let got = self.receive(false)?;
            if got.is_empty() {
                thread::sleep(self.config.poll_interval);
            }
            errors.extend(got.errors);
        }
        Ok(errors)
    }

    fn transact(
        &mut self,
        bytes: &[u8],
        is_read: bool,
        meta: Option<LogEntry>,
        opts: &SendOptions,
    ) -> Result<Vec<ResponseLine>, SessionError> {
        self.drain_stale()?;
        if let Some(mut meta) = meta {
            meta.proctime = self.proctime();
            self.record(meta)?;
        }

        let mut attempt = 0u32;
        loop {
            self.transmit(bytes)?;
            match self.collect(opts)? {
                Collected::Lines(lines) => {
                    self.set_state(SessionState::Completed);
                    return Ok(extract(lines, opts.pattern.as_ref()));
                }
                Collected::CommError if attempt < self.config.max_retries => {
                    attempt += 1;
                    self.stats.inc_retries();
                    warn!(
                        "communication error, resending ({}/{})",
                        attempt, self.config.max_retries
                    );
                    self.set_state(SessionState::Retrying);
                }
                Collected::CommError => {
                    self.set_state(SessionState::Failed);
                    return Err(SessionError::RetriesExhausted {
                        attempts: attempt + 1,
                    });
                }
                Collected::Nothing => {
                    self.stats.inc_timeouts();
                    let waited = opts.timeout.unwrap_or(self.config.response_timeout);
                    if !is_read && !self.config.require_write_ack {
                        warn!("no acknowledgement within {:?}, continuing", waited);
                        self.set_state(SessionState::Completed);
                        return Ok(Vec::new());
                    }
                    self.set_state(SessionState::Failed);
                    return Err(SessionError::Timeout(waited));
                }
            }
        }
    }

    /// Log complete lines left over from before this request. A partial line
    /// stays buffered.
    fn drain_stale(&mut self) -> Result<(), SessionError> {
        let stale = self.receive(false)?;
        if !stale.is_empty() {
            debug!(
                "drained {} stale lines and {} errors before transmit",
                stale.lines.len(),
                stale.errors.len()
            );
        }
        Ok(())
    }

    fn transmit(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.set_state(SessionState::Transmitting);
        trace!("tx {}", hex::encode(bytes));
        self.transport.write_all(bytes)?;
        self.stats.add_sent(bytes.len());

        let mut e = LogEntry::new(LogKind::Transmit, self.proctime());
        e.desc = match Encoding::detect(bytes) {
            Encoding::Binary => hex::encode(bytes),
            Encoding::Ascii => String::from_utf8_lossy(bytes).into_owned(),
        };
        e.raw = bytes.to_vec();
        self.record(e)
    }

    fn collect(&mut self, opts: &SendOptions) -> Result<Collected, SessionError> {
        self.set_state(SessionState::CollectingResponse);
        let timeout = opts.timeout.unwrap_or(self.config.response_timeout);
        let start = Instant::now();
        let mut last_msg = start;
        let mut lines: Vec<String> = Vec::new();
        let mut errors: Vec<DeviceError> = Vec::new();

        loop {
            if lines.iter().any(|l| l == RESPONSE_OK) {
                break;
            }
            if opts.expected_lines.is_some_and(|n| lines.len() >= n) {
                break;
            }
            let now = Instant::now();
            let quiet = now - start > timeout && now - last_msg > self.config.inter_message_timeout;

            // once the bus is quiet, an unterminated tail is the last line
            let got = self.receive(quiet)?;
            let got_empty = got.is_empty();
            if !got_empty {
                last_msg = Instant::now();
                lines.extend(got.lines);
                errors.extend(got.errors);
                if self.screen(&errors, opts)? {
                    return Ok(Collected::CommError);
                }
            }
            if quiet {
                break;
            }
            if got_empty {
                thread::sleep(self.config.poll_interval);
            }
        }

        if lines.is_empty() && errors.is_empty() {
            Ok(Collected::Nothing)
        } else {
            Ok(Collected::Lines(lines))
        }
    }

    /// `Ok(true)` on a communication error. A target error fails the call.
    fn screen(&mut self, errors: &[DeviceError], opts: &SendOptions) -> Result<bool, SessionError> {
        if errors.iter().any(DeviceError::is_comm_error) {
            return Ok(true);
        }
        if let Some(e) = errors.iter().find(|e| opts.target_errors.contains(&e.code)) {
            self.set_state(SessionState::Failed);
            return Err(SessionError::Target {
                error: e.clone(),
                tail: self.log.tail(5),
            });
        }
        Ok(false)
    }

    /// Read what the transport has, split it into lines and log them. Entries
    /// of one pass share a timestamp. With `flush`, an unterminated tail is
    /// taken as a final line.
    fn receive(&mut self, flush: bool) -> Result<Received, SessionError> {
        let chunk = self.transport.read_available()?;
        if !chunk.is_empty() {
            trace!("rx {}", hex::encode(&chunk));
            self.stats.add_received(chunk.len());
            self.rx_buf.extend_from_slice(&chunk);
        }

        let mut raws: Vec<Vec<u8>> = Vec::new();
        while let Some(pos) = self.rx_buf.iter().position(|&b| b == b'\n') {
            raws.push(self.rx_buf.drain(..=pos).collect());
        }
        if flush && !self.rx_buf.is_empty() {
            raws.push(std::mem::take(&mut self.rx_buf));
        }

        let mut got = Received::default();
        if raws.is_empty() {
            return Ok(got);
        }

        let proctime = self.proctime();
        let mut pending = LogEntry::new(LogKind::Receive, proctime);
        let mut pending_lines: Vec<String> = Vec::new();

        for raw in raws {
            if !raw.is_ascii() {
                return Err(SessionError::NonAscii(raw));
            }
            let text = String::from_utf8_lossy(&raw)
                .trim_end_matches(['\r', '\n'])
                .to_string();

            match DeviceError::parse(&text) {
                None => {
                    pending.raw.extend_from_slice(&raw);
                    pending_lines.push(text.clone());
                    got.lines.push(text);
                }
                Some(err) => {
                    if !pending_lines.is_empty() {
                        pending.desc = pending_lines.join(", ");
                        pending_lines.clear();
                        let next = LogEntry::new(LogKind::Receive, proctime);
                        self.record(std::mem::replace(&mut pending, next))?;
                    }
                    self.stats.inc_errors();
                    let mut e = LogEntry::new(LogKind::Error, proctime);
                    e.id = err.code.to_string();
                    e.ch = Some(err.channel);
                    e.desc = err.description.clone();
                    e.raw = raw;
                    self.record(e)?;
                    got.errors.push(err);
                }
            }
        }
        if !pending_lines.is_empty() {
            pending.desc = pending_lines.join(", ");
            self.record(pending)?;
        }
        self.stats.inc_lines(got.lines.len());
        Ok(got)
    }

    fn record(&mut self, entry: LogEntry) -> Result<(), SessionError> {
        if self.config.log_to_stdout {
            info!("{}", entry.render());
        }
        let verdict = match self.handler.as_mut() {
            Some(h) => h(&entry),
            None => Ok(()),
        };
        self.log.push(entry);
        verdict.map_err(|e| {
            self.set_state(SessionState::Failed);
            SessionError::Aborted(format!("{:#}", e))
        })
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            trace!("session {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn proctime(&self) -> f64 {
        self.t0.elapsed().as_secs_f64()
    }
}

fn extract(lines: Vec<String>, pattern: Option<&Regex>) -> Vec<ResponseLine> {
    lines
        .into_iter()
        .map(|text| {
            let groups = match pattern {
                None => vec![Some(text.clone())],
                Some(re) => match re.captures(&text) {
                    Some(caps) if caps.get(0).is_some_and(|m| m.start() == 0) => caps
                        .iter()
                        .skip(1)
                        .map(|m| m.map(|m| m.as_str().to_string()))
                        .collect(),
                    _ => vec![None],
                },
            };
            ResponseLine { text, groups }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::cmd;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Answers each write with the next scripted reply.
    #[derive(Clone, Default)]
    struct Scripted {
        replies: Arc<Mutex<VecDeque<Vec<u8>>>>,
        inbox: Arc<Mutex<Vec<u8>>>,
        written: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl Scripted {
        fn with(replies: &[&str]) -> Self {
            let s = Self::default();
            s.replies
                .lock()
                .extend(replies.iter().map(|r| r.as_bytes().to_vec()));
            s
        }
    }

    impl Transport for Scripted {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.written.lock().push(bytes.to_vec());
            if let Some(r) = self.replies.lock().pop_front() {
                self.inbox.lock().extend_from_slice(&r);
            }
            Ok(())
        }

        fn read_available(&mut self) -> io::Result<Vec<u8>> {
            Ok(std::mem::take(&mut *self.inbox.lock()))
        }
    }

    fn fast() -> SessionConfig {
        SessionConfig {
            response_timeout: Duration::from_millis(20),
            inter_message_timeout: Duration::from_millis(10),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn returns_trimmed_lines() {
        let t = Scripted::with(&["Q8iv-0000\r\n"]);
        let mut s = Session::new(t.clone(), fast());
        let out = s.send(&Command::read(cmd::ID), Encoding::Ascii).unwrap();
        assert_eq!(out, vec!["Q8iv-0000"]);
        assert_eq!(t.written.lock()[0], b"id?\n");
        assert_eq!(s.state(), SessionState::Completed);

        let kinds: Vec<_> = s.log().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [LogKind::Get, LogKind::Transmit, LogKind::Receive]);
    }

    #[test]
    fn ok_line_ends_collection_early() {
        let t = Scripted::with(&["OK\n"]);
        let mut s = Session::new(
            t,
            SessionConfig {
                response_timeout: Duration::from_secs(5),
                ..fast()
            },
        );
        let started = Instant::now();
        let out = s
            .send(&Command::write(cmd::V, 100u16).channel(3), Encoding::Binary)
            .unwrap();
        assert_eq!(out, vec!["OK"]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn comm_error_resends_identical_bytes() {
        let t = Scripted::with(&["E15:0\n", "OK\n"]);
        let mut s = Session::new(t.clone(), fast());
        let c = Command::write(cmd::V, 7u16).channel(1);
        let out = s.send(&c, Encoding::Binary).unwrap();
        assert_eq!(out, vec!["OK"]);

        let written = t.written.lock();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], written[1]);
        assert_eq!(written[0], encode_binary(&c).unwrap());
        assert_eq!(s.stats().retries, 1);
    }

    #[test]
    fn retries_are_bounded() {
        let t = Scripted::with(&["E15:0\n"; 10]);
        let mut s = Session::new(
            t.clone(),
            SessionConfig {
                max_retries: 2,
                ..fast()
            },
        );
        let err = s.send(&Command::read(cmd::V).channel(0), Encoding::Ascii);
        assert!(matches!(
            err,
            Err(SessionError::RetriesExhausted { attempts: 3 })
        ));
        assert_eq!(t.written.lock().len(), 3);
        assert_eq!(s.state(), SessionState::Failed);
    }

    #[test]
    fn target_error_carries_log_tail() {
        let t = Scripted::with(&["E10:3\n"]);
        let mut s = Session::new(t, fast());
        let opts = SendOptions::default().target([10]);
        let err = s
            .send_with(&Command::write(cmd::V, 1u16).channel(3), Encoding::Ascii, &opts)
            .unwrap_err();
        match err {
            SessionError::Target { error, tail } => {
                assert_eq!(error.code, 10);
                assert_eq!(error.channel, 3);
                assert_eq!(tail.last().map(|e| e.kind), Some(LogKind::Error));
                assert!(tail.len() <= 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn non_target_error_is_returned_as_completion() {
        let t = Scripted::with(&["E10:3\n"]);
        let mut s = Session::new(t, fast());
        let out = s
            .send(&Command::write(cmd::V, 1u16).channel(3), Encoding::Ascii)
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(s.stats().errors, 1);
    }

    #[test]
    fn silent_read_times_out() {
        let mut s = Session::new(Scripted::default(), fast());
        let err = s.send(&Command::read(cmd::V).channel(0), Encoding::Ascii);
        assert!(matches!(err, Err(SessionError::Timeout(_))));
        assert_eq!(s.stats().timeouts, 1);
    }

    #[test]
    fn silent_write_can_be_tolerated() {
        let mut s = Session::new(
            Scripted::default(),
            SessionConfig {
                require_write_ack: false,
                ..fast()
            },
        );
        let out = s
            .send(&Command::write(cmd::V, 1u16).channel(0), Encoding::Ascii)
            .unwrap();
        assert!(out.is_empty());

        // reads still fail
        let err = s.send(&Command::read(cmd::V).channel(0), Encoding::Ascii);
        assert!(matches!(err, Err(SessionError::Timeout(_))));
    }

    #[test]
    fn pattern_extracts_groups() {
        let t = Scripted::with(&["Q8iv-0001: 4\nnoise\n"]);
        let mut s = Session::new(t, fast());
        let opts = SendOptions::default().pattern(Regex::new(r"(\w+)-([0-9A-F]+): (\d+)").unwrap());
        let out = s.send_raw(b"nupall?\n", &opts).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].groups,
            vec![Some("Q8iv".into()), Some("0001".into()), Some("4".into())]
        );
        assert_eq!(out[1].text, "noise");
        assert_eq!(out[1].groups, vec![None]);
    }

    #[test]
    fn unsupported_mode_never_reaches_transport() {
        let t = Scripted::default();
        let mut s = Session::new(t.clone(), fast());
        let err = s.send(&Command::read(cmd::NUP).all_channels(), Encoding::Binary);
        assert!(matches!(
            err,
            Err(SessionError::Encode(EncodeError::Unsupported { name: "NUP", .. }))
        ));
        assert!(t.written.lock().is_empty());
    }

    #[test]
    fn log_handler_can_abort() {
        let t = Scripted::with(&["E03:1\n"]);
        let mut s = Session::new(t, fast());
        s.set_log_handler(generic_log_handler(None));
        let err = s.send(&Command::write(cmd::V, 1u16).channel(1), Encoding::Ascii);
        match err {
            Err(SessionError::Aborted(msg)) => assert!(msg.contains("E03:1")),
            other => panic!("unexpected {:?}", other),
        }

        // a handler filtering other codes lets it through
        let t = Scripted::with(&["E03:1\n"]);
        let mut s = Session::new(t, fast());
        s.set_log_handler(generic_log_handler(Some(vec![10])));
        assert!(
            s.send(&Command::write(cmd::V, 1u16).channel(1), Encoding::Ascii)
                .is_ok()
        );
    }

    #[test]
    fn stale_input_is_logged_not_answered() {
        let t = Scripted::with(&["OK\n"]);
        t.inbox.lock().extend_from_slice(b"E15:0\n");
        let mut s = Session::new(t.clone(), fast());
        let out = s
            .send(&Command::write(cmd::V, 1u16).channel(1), Encoding::Ascii)
            .unwrap();
        assert_eq!(out, vec!["OK"]);
        assert_eq!(t.written.lock().len(), 1);
        // the stale error is logged ahead of the request
        let kinds: Vec<_> = s.log().iter().map(|e| e.kind).collect();
        assert_eq!(kinds[0], LogKind::Error);
        assert_eq!(kinds[1], LogKind::Set);
    }

    #[test]
    fn non_ascii_input_is_an_error() {
        let t = Scripted::default();
        t.replies.lock().push_back(vec![0xFF, b'\n']);
        let mut s = Session::new(t, fast());
        let err = s.send(&Command::read(cmd::ID), Encoding::Ascii);
        assert!(matches!(err, Err(SessionError::NonAscii(_))));
    }

    #[test]
    fn unterminated_comm_error_still_resends() {
        let t = Scripted::with(&["E15:0", "OK\n"]);
        let mut s = Session::new(t.clone(), fast());
        let out = s
            .send(&Command::write(cmd::V, 1u16).channel(0), Encoding::Ascii)
            .unwrap();
        assert_eq!(out, vec!["OK"]);
        assert_eq!(t.written.lock().len(), 2);
        assert_eq!(s.stats().retries, 1);
    }

    #[test]
    fn unterminated_target_error_fails_the_call() {
        let t = Scripted::with(&["E10:1"]);
        let mut s = Session::new(t, fast());
        let opts = SendOptions::default().target([10]);
        let err = s
            .send_with(&Command::write(cmd::V, 1u16).channel(1), Encoding::Ascii, &opts)
            .unwrap_err();
        assert!(matches!(err, SessionError::Target { ref error, .. } if error.code == 10));
        assert_eq!(s.state(), SessionState::Failed);
    }

    #[test]
    fn wait_reports_errors_seen_on_the_bus() {
        let t = Scripted::default();
        t.inbox.lock().extend_from_slice(b"E03:2\nQ8iv-0000\n");
        let mut s = Session::new(
            t,
            SessionConfig {
                log_to_stdout: true,
                ..fast()
            },
        );
        let errors = s.wait(Duration::from_millis(15)).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!((errors[0].code, errors[0].channel), (3, 2));

        let shown = s.log().render(Some(2));
        assert_eq!(shown.len(), 2);
        assert!(shown[0].ends_with(&format!("err : {}", errors[0].description)));
        assert!(shown[1].ends_with("rcv : Q8iv-0000"));
        s.log().print_log(Some(2));
    }

    #[test]
    fn request_entries_carry_the_command_text() {
        let t = Scripted::with(&["1\n2\n", "5\n"]);
        let mut s = Session::new(t, fast());
        s.send(&Command::read(cmd::V).all_channels(), Encoding::Ascii)
            .unwrap();
        s.send(&Command::read(cmd::V).channel(3), Encoding::Ascii)
            .unwrap();
        let requests: Vec<_> = s
            .log()
            .iter()
            .filter(|e| e.kind == LogKind::Get)
            .map(|e| e.desc.as_str())
            .collect();
        assert_eq!(requests, ["vall?", "v3?"]);
    }

    #[test]
    fn errors_and_lines_of_one_poll_share_proctime() {
        let t = Scripted::with(&["a\nE03:0\nb\n"]);
        let mut s = Session::new(t, fast());
        let out = s.send(&Command::read(cmd::ID), Encoding::Ascii).unwrap();
        assert_eq!(out, vec!["a", "b"]);
        let rx: Vec<_> = s
            .log()
            .iter()
            .filter(|e| matches!(e.kind, LogKind::Receive | LogKind::Error))
            .collect();
        assert_eq!(rx.len(), 3);
        assert_eq!(rx[0].raw, b"a\n");
        assert_eq!(rx[1].kind, LogKind::Error);
        assert_eq!(rx[2].raw, b"b\n");
        assert!(rx.iter().all(|e| e.proctime == rx[0].proctime));
    }
}
