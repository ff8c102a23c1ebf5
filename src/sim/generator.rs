//! Build a [`Program`] from a captured session log.
//!
//! Every transmit entry becomes one response entry for its command. The
//! receive and error entries that follow it are grouped by poll (equal
//! `proctime`); each group is one timed chunk of the response.

use std::time::Duration;

use super::program::{Program, ResponseEntry, Segmentation, command_key};
use crate::proto::Encoding;
use crate::session::{LogEntry, LogKind};

struct Chunk {
    at: f64,
    items: Vec<String>,
}

fn items_of(raw: &[u8]) -> impl Iterator<Item = String> + '_ {
    raw.split_inclusive(|&b| b == b'\n')
        .map(|l| String::from_utf8_lossy(l).into_owned())
}

fn gap(from: f64, to: f64) -> Duration {
    Duration::try_from_secs_f64(to - from).unwrap_or_default()
}

fn is_response(e: &LogEntry) -> bool {
    matches!(e.kind, LogKind::Receive | LogKind::Error)
}

fn entry_for(sent_at: f64, mut chunks: Vec<Chunk>) -> ResponseEntry {
    if chunks.len() > 1 {
        let mut prev = sent_at;
        let mut frames = Vec::with_capacity(chunks.len());
        let mut delays = Vec::with_capacity(chunks.len());
        let mut items = Vec::new();
        for c in chunks {
            frames.push(c.items.len());
            delays.push(gap(prev, c.at));
            prev = c.at;
            items.extend(c.items);
        }
        return ResponseEntry::EmitMany {
            items,
            delay: Duration::ZERO,
            segments: Some(Segmentation { frames, delays }),
        };
    }

    let Some(Chunk { at, mut items }) = chunks.pop() else {
        return ResponseEntry::NoOp;
    };
    let delay = gap(sent_at, at);
    if items.len() == 1 {
        ResponseEntry::EmitOne {
            text: items.remove(0),
            delay,
        }
    } else {
        ResponseEntry::EmitMany {
            items,
            delay,
            segments: None,
        }
    }
}

/// Turn a log into a Program that replays the same responses.
pub fn from_log(log: &[LogEntry], name: &str) -> Program {
    let mut prog = Program::new(name);
    let mut rest = log.iter().peekable();

    // output seen before the first command was waiting in the device
    while let Some(e) = rest.next_if(|e| e.kind != LogKind::Transmit) {
        if is_response(e) {
            prog.initial_out.extend(items_of(&e.raw));
        }
    }

    while let Some(tx) = rest.next() {
        let mut chunks: Vec<Chunk> = Vec::new();
        while let Some(e) = rest.next_if(|e| e.kind != LogKind::Transmit) {
            if !is_response(e) {
                continue;
            }
            match chunks.last_mut() {
                Some(c) if c.at == e.proctime => c.items.extend(items_of(&e.raw)),
                _ => chunks.push(Chunk {
                    at: e.proctime,
                    items: items_of(&e.raw).collect(),
                }),
            }
        }

        let encoding = Encoding::detect(&tx.raw);
        prog.push_entry(&command_key(&tx.raw), encoding, entry_for(tx.proctime, chunks));
    }
    prog
}
