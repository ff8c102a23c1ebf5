use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::handlers::{CustomHandler, Handlers};
use crate::proto::{EncodeError, Encoding, decode_binary, parse_ascii};

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("program json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("program file: {0}")]
    Io(#[from] io::Error),
    #[error("unknown custom handler '{0}'")]
    UnknownHandler(String),
    #[error("RUN_CUSTOM entry for '{0}' has no 'func'")]
    MissingFunc(String),
    #[error("command '{cmd}': {source}")]
    BadCommand {
        cmd: String,
        #[source]
        source: EncodeError,
    },
    #[error("binary command '{0}' is not valid hex")]
    BadHex(String),
    #[error("{action} entry for '{cmd}' needs {expected}")]
    DataShape {
        cmd: String,
        action: &'static str,
        expected: &'static str,
    },
    #[error("segment frames of '{cmd}' add up to {got}, expected {items}")]
    FrameSum { cmd: String, got: usize, items: usize },
    #[error("'{cmd}' has {frames} segment frames but {delays} delays")]
    SegmentCount {
        cmd: String,
        frames: usize,
        delays: usize,
    },
    #[error("bad delay {0} ms")]
    BadDelay(f64),
    #[error("command '{0}' has no entries")]
    NoEntries(String),
}

/// Split of an `EmitMany` into timed frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    pub frames: Vec<usize>,
    /// Wait before each frame, counted from the previous frame.
    pub delays: Vec<Duration>,
}

/// What the device does for one matching write.
#[derive(Clone)]
pub enum ResponseEntry {
    EmitOne {
        text: String,
        delay: Duration,
    },
    EmitMany {
        items: Vec<String>,
        delay: Duration,
        segments: Option<Segmentation>,
    },
    RunCustom {
        name: String,
        handler: CustomHandler,
    },
    NoOp,
}

impl fmt::Debug for ResponseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseEntry::EmitOne { text, delay } => f
                .debug_struct("EmitOne")
                .field("text", text)
                .field("delay", delay)
                .finish(),
            ResponseEntry::EmitMany {
                items,
                delay,
                segments,
            } => f
                .debug_struct("EmitMany")
                .field("items", items)
                .field("delay", delay)
                .field("segments", segments)
                .finish(),
            ResponseEntry::RunCustom { name, .. } => {
                f.debug_struct("RunCustom").field("name", name).finish()
            }
            ResponseEntry::NoOp => f.write_str("NoOp"),
        }
    }
}

/// Responses scripted for one command text.
#[derive(Debug, Clone)]
pub struct ProgramCommand {
    pub cmd: String,
    pub encoding: Encoding,
    pub entries: Vec<ResponseEntry>,
}

/// Script driving a [`VirtualDevice`](super::VirtualDevice).
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    commands: Vec<ProgramCommand>,
    index: HashMap<String, usize>,
    pub default: ResponseEntry,
    pub initial_out: Vec<String>,
}

/// Lookup key for written bytes: hex for binary frames, the text without its
/// line terminator otherwise.
pub fn command_key(bytes: &[u8]) -> String {
    match Encoding::detect(bytes) {
        Encoding::Binary => hex::encode(bytes),
        Encoding::Ascii => String::from_utf8_lossy(bytes)
            .trim_end_matches(['\r', '\n'])
            .to_string(),
    }
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
            index: HashMap::new(),
            default: ResponseEntry::NoOp,
            initial_out: Vec::new(),
        }
    }

    /// Append a response for `cmd`; repeated commands cycle through their
    /// entries in order.
    pub fn push_entry(&mut self, cmd: &str, encoding: Encoding, entry: ResponseEntry) {
        let key = match encoding {
            Encoding::Binary => cmd.to_ascii_lowercase(),
            Encoding::Ascii => command_key(cmd.as_bytes()),
        };
        match self.index.get(&key) {
            Some(&i) => self.commands[i].entries.push(entry),
            None => {
                self.index.insert(key.clone(), self.commands.len());
                self.commands.push(ProgramCommand {
                    cmd: key,
                    encoding,
                    entries: vec![entry],
                });
            }
        }
    }

    pub fn commands(&self) -> &[ProgramCommand] {
        &self.commands
    }

    pub fn entries(&self, key: &str) -> Option<&[ResponseEntry]> {
        self.index
            .get(key)
            .map(|&i| self.commands[i].entries.as_slice())
    }

    /// Entry for the `count`-th write (1-based) of `key`.
    pub fn select(&self, key: &str, count: u64) -> &ResponseEntry {
        match self.entries(key) {
            Some(entries) if !entries.is_empty() => {
                let i = (count.saturating_sub(1) % entries.len() as u64) as usize;
                &entries[i]
            }
            _ => &self.default,
        }
    }

    /// A single Q8iv module that acknowledges the chain reset and reports
    /// itself at the head of the chain.
    pub fn single_module() -> Self {
        let mut p = Program::new("single module");
        p.push_entry(
            "nup=0",
            Encoding::Ascii,
            ResponseEntry::EmitOne {
                text: "OK\n".into(),
                delay: Duration::ZERO,
            },
        );
        p.push_entry(
            "nupall?",
            Encoding::Ascii,
            ResponseEntry::EmitOne {
                text: "Q8iv-0000: 0\n".into(),
                delay: Duration::ZERO,
            },
        );
        p.push_entry(
            "id?",
            Encoding::Ascii,
            ResponseEntry::EmitOne {
                text: "Q8iv-0000\n".into(),
                delay: Duration::ZERO,
            },
        );
        p.initial_out.push("OK\n".into());
        p
    }

    pub fn from_json(text: &str, handlers: &Handlers) -> Result<Self, ProgramError> {
        let file: ProgramFile = serde_json::from_str(text)?;
        file.into_program(handlers)
    }

    pub fn from_json_file(path: &Path, handlers: &Handlers) -> Result<Self, ProgramError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text, handlers)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&ProgramFile::from_program(self))
    }

    pub fn write_json_file(&self, path: &Path) -> Result<(), ProgramError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/* ---------- persisted form ---------- */

#[derive(Serialize, Deserialize)]
struct ProgramFile {
    name: String,
    data: Vec<CommandFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<EntryFile>,
    #[serde(default)]
    initial_out: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct CommandFile {
    cmd: String,
    #[serde(default)]
    encoding: Encoding,
    entries: Vec<EntryFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum Action {
    QueueOut,
    QueueOutMany,
    RunCustom,
    Nop,
}

impl Action {
    fn name(self) -> &'static str {
        match self {
            Action::QueueOut => "QUEUE_OUT",
            Action::QueueOutMany => "QUEUE_OUT_MANY",
            Action::RunCustom => "RUN_CUSTOM",
            Action::Nop => "NOP",
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum EntryData {
    One(String),
    Many(Vec<String>),
}

#[derive(Serialize, Deserialize)]
struct Divide {
    frames: Vec<usize>,
    delays: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct EntryFile {
    action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<EntryData>,
    #[serde(default)]
    delay: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    divide: Option<Divide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    func: Option<String>,
}

fn delay_from_ms(ms: f64) -> Result<Duration, ProgramError> {
    Duration::try_from_secs_f64(ms / 1e3).map_err(|_| ProgramError::BadDelay(ms))
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}

fn check_command(cmd: &str, encoding: Encoding) -> Result<String, ProgramError> {
    match encoding {
        Encoding::Ascii => {
            parse_ascii(cmd).map_err(|source| ProgramError::BadCommand {
                cmd: cmd.to_string(),
                source,
            })?;
            Ok(command_key(cmd.as_bytes()))
        }
        Encoding::Binary => {
            let frame = hex::decode(cmd.trim()).map_err(|_| ProgramError::BadHex(cmd.to_string()))?;
            decode_binary(&frame).map_err(|source| ProgramError::BadCommand {
                cmd: cmd.to_string(),
                source,
            })?;
            Ok(hex::encode(frame))
        }
    }
}

impl EntryFile {
    fn into_entry(self, cmd: &str, handlers: &Handlers) -> Result<ResponseEntry, ProgramError> {
        let shape = |expected| ProgramError::DataShape {
            cmd: cmd.to_string(),
            action: self.action.name(),
            expected,
        };
        let delay = delay_from_ms(self.delay)?;
        if self.divide.is_some() && self.action != Action::QueueOutMany {
            return Err(shape("no 'divide'"));
        }

        match self.action {
            Action::QueueOut => match self.data {
                Some(EntryData::One(text)) => Ok(ResponseEntry::EmitOne { text, delay }),
                _ => Err(shape("a string in 'data'")),
            },
            Action::QueueOutMany => {
                let items = match self.data {
                    Some(EntryData::Many(items)) => items,
                    _ => return Err(shape("a list in 'data'")),
                };
                let segments = match self.divide {
                    None => None,
                    Some(div) => {
                        if div.frames.len() != div.delays.len() {
                            return Err(ProgramError::SegmentCount {
                                cmd: cmd.to_string(),
                                frames: div.frames.len(),
                                delays: div.delays.len(),
                            });
                        }
                        let got: usize = div.frames.iter().sum();
                        if got != items.len() {
                            return Err(ProgramError::FrameSum {
                                cmd: cmd.to_string(),
                                got,
                                items: items.len(),
                            });
                        }
                        Some(Segmentation {
                            frames: div.frames,
                            delays: div
                                .delays
                                .into_iter()
                                .map(delay_from_ms)
                                .collect::<Result<_, _>>()?,
                        })
                    }
                };
                Ok(ResponseEntry::EmitMany {
                    items,
                    delay,
                    segments,
                })
            }
            Action::RunCustom => {
                let name = self
                    .func
                    .ok_or_else(|| ProgramError::MissingFunc(cmd.to_string()))?;
                let handler = handlers
                    .get(&name)
                    .ok_or_else(|| ProgramError::UnknownHandler(name.clone()))?;
                Ok(ResponseEntry::RunCustom { name, handler })
            }
            Action::Nop => Ok(ResponseEntry::NoOp),
        }
    }

    fn from_entry(entry: &ResponseEntry) -> Self {
        let mut file = EntryFile {
            action: Action::Nop,
            data: None,
            delay: 0.0,
            divide: None,
            func: None,
        };
        match entry {
            ResponseEntry::EmitOne { text, delay } => {
                file.action = Action::QueueOut;
                file.data = Some(EntryData::One(text.clone()));
                file.delay = ms(*delay);
            }
            ResponseEntry::EmitMany {
                items,
                delay,
                segments,
            } => {
                file.action = Action::QueueOutMany;
                file.data = Some(EntryData::Many(items.clone()));
                file.delay = ms(*delay);
                file.divide = segments.as_ref().map(|s| Divide {
                    frames: s.frames.clone(),
                    delays: s.delays.iter().copied().map(ms).collect(),
                });
            }
            ResponseEntry::RunCustom { name, .. } => {
                file.action = Action::RunCustom;
                file.func = Some(name.clone());
            }
            ResponseEntry::NoOp => {}
        }
        file
    }
}

impl ProgramFile {
    fn into_program(self, handlers: &Handlers) -> Result<Program, ProgramError> {
        let mut prog = Program::new(self.name);
        for c in self.data {
            let key = check_command(&c.cmd, c.encoding)?;
            if c.entries.is_empty() {
                return Err(ProgramError::NoEntries(c.cmd));
            }
            for e in c.entries {
                let entry = e.into_entry(&c.cmd, handlers)?;
                prog.push_entry(&key, c.encoding, entry);
            }
        }
        if let Some(d) = self.default {
            prog.default = d.into_entry("default", handlers)?;
        }
        prog.initial_out = self.initial_out;
        Ok(prog)
    }

    fn from_program(p: &Program) -> Self {
        ProgramFile {
            name: p.name.clone(),
            data: p
                .commands
                .iter()
                .map(|c| CommandFile {
                    cmd: match c.encoding {
                        Encoding::Ascii => format!("{}\n", c.cmd),
                        Encoding::Binary => c.cmd.clone(),
                    },
                    encoding: c.encoding,
                    entries: c.entries.iter().map(EntryFile::from_entry).collect(),
                })
                .collect(),
            default: match p.default {
                ResponseEntry::NoOp => None,
                ref d => Some(EntryFile::from_entry(d)),
            },
            initial_out: p.initial_out.clone(),
        }
    }
}
