use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// What a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
    #[serde(rename = "tx")]
    Transmit,
    #[serde(rename = "rcv")]
    Receive,
    #[serde(rename = "err")]
    Error,
    #[serde(rename = "set")]
    Set,
    #[serde(rename = "get")]
    Get,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Transmit => "tx",
            LogKind::Receive => "rcv",
            LogKind::Error => "err",
            LogKind::Set => "set",
            LogKind::Get => "get",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic event of a session.
///
/// `raw` holds the exact bytes on the wire: the transmitted frame or line,
/// every received data line of one poll (terminators included), or the
/// error line. It is stored as hex in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    /// Seconds since the session was opened.
    pub proctime: f64,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub id: String,
    pub ch: Option<u32>,
    pub value: Option<String>,
    pub desc: String,
    #[serde(with = "hex_bytes")]
    pub raw: Vec<u8>,
}

impl LogEntry {
    pub fn new(kind: LogKind, proctime: f64) -> Self {
        Self {
            timestamp: Local::now(),
            proctime,
            kind,
            id: String::new(),
            ch: None,
            value: None,
            desc: String::new(),
            raw: Vec::new(),
        }
    }

    /// Device error code of an `err` entry.
    pub fn error_code(&self) -> Option<u32> {
        match self.kind {
            LogKind::Error => self.id.parse().ok(),
            _ => None,
        }
    }

    /// `@ 12.3 ms, rcv : OK`
    pub fn render(&self) -> String {
        format!("@ {:.1} ms, {} : {}", self.proctime * 1e3, self.kind, self.desc)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Bounded FIFO of log entries, oldest evicted first.
#[derive(Debug, Clone)]
pub struct SessionLog {
    entries: VecDeque<LogEntry>,
    capacity: Option<usize>,
}

impl SessionLog {
    /// `None` keeps every entry.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
        if let Some(cap) = self.capacity {
            while self.entries.len() > cap {
                self.entries.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    /// Owned copy for consumers that outlive the next `send`.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// The last `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Human-readable lines for the last `n` entries (all when `None`).
    pub fn render(&self, n: Option<usize>) -> Vec<String> {
        let n = n.unwrap_or(self.entries.len());
        self.tail(n).iter().map(LogEntry::render).collect()
    }

    pub fn print_log(&self, n: Option<usize>) {
        for line in self.render(n) {
            println!("{}", line);
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.entries)
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_json()?)
    }
}

/// Load entries exported with [`SessionLog::write_json`].
pub fn read_json(path: &Path) -> io::Result<Vec<LogEntry>> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
