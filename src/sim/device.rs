use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::program::{Program, ProgramError, ResponseEntry, command_key};
use crate::transport::Transport;

/// Below this a delay is finished by spinning instead of sleeping.
const SPIN_WINDOW: Duration = Duration::from_micros(200);

#[derive(Default)]
struct Shared {
    out: Mutex<VecDeque<Vec<u8>>>,
    counts: Mutex<HashMap<String, u64>>,
    total: AtomicU64,
    done: AtomicU64,
}

/// Cloneable view of a device's output queue and counters. Passed to
/// custom handlers.
#[derive(Clone, Default)]
pub struct DeviceHandle {
    shared: Arc<Shared>,
}

impl DeviceHandle {
    pub fn push_output(&self, item: impl Into<Vec<u8>>) {
        let item = item.into();
        trace!("sim out {:?}", String::from_utf8_lossy(&item));
        self.shared.out.lock().push_back(item);
    }

    pub fn pending(&self) -> usize {
        self.shared.out.lock().len()
    }

    /// Writes seen so far for `key` (see [`command_key`]).
    pub fn count(&self, key: &str) -> u64 {
        self.shared.counts.lock().get(key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.shared.total.load(Ordering::Acquire)
    }

    fn pop(&self) -> Option<Vec<u8>> {
        self.shared.out.lock().pop_front()
    }

    fn drain(&self) -> Vec<u8> {
        let mut q = self.shared.out.lock();
        let mut bytes = Vec::new();
        for item in q.drain(..) {
            bytes.extend_from_slice(&item);
        }
        bytes
    }
}

struct Job {
    text: String,
    count: u64,
    entry: ResponseEntry,
    at: Instant,
}

/// Program-driven stand-in for a module on the serial line.
///
/// `write` looks up the scripted response and hands it to a worker thread, so
/// response delays never block the writer.
pub struct VirtualDevice {
    handle: DeviceHandle,
    program: Arc<Program>,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl VirtualDevice {
    pub fn new(program: Program) -> Result<Self, ProgramError> {
        let handle = DeviceHandle::default();
        for item in &program.initial_out {
            handle.push_output(item.as_bytes().to_vec());
        }

        let (tx, rx) = unbounded();
        let worker_handle = handle.clone();
        let worker = thread::Builder::new()
            .name("qontrol-sim".into())
            .spawn(move || run_worker(rx, worker_handle))?;

        info!(
            "virtual device running program '{}' ({} commands)",
            program.name,
            program.commands().len()
        );
        Ok(Self {
            handle,
            program: Arc::new(program),
            jobs: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle.clone()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Accept one command; the response is produced asynchronously.
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let key = command_key(bytes);
        let count = {
            let mut counts = self.handle.shared.counts.lock();
            let c = counts.entry(key.clone()).or_insert(0);
            *c += 1;
            *c
        };
        self.handle.shared.total.fetch_add(1, Ordering::AcqRel);

        let entry = self.program.select(&key, count).clone();
        debug!("sim write '{}' #{} -> {:?}", key, count, entry);

        let job = Job {
            text: String::from_utf8_lossy(bytes).into_owned(),
            count,
            entry,
            at: Instant::now(),
        };
        self.jobs
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "device stopped"))?
            .send(job)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device worker gone"))
    }

    /// Oldest queued output item.
    pub fn read_line(&self) -> Option<Vec<u8>> {
        self.handle.pop()
    }

    pub fn pending(&self) -> usize {
        self.handle.pending()
    }

    pub fn count(&self, key: &str) -> u64 {
        self.handle.count(key)
    }

    pub fn total(&self) -> u64 {
        self.handle.total()
    }

    /// Block until every accepted write has been handled, or `timeout`.
    pub fn settle(&self, timeout: Duration) -> bool {
        let end = Instant::now() + timeout;
        let shared = &self.handle.shared;
        while shared.done.load(Ordering::Acquire) < shared.total.load(Ordering::Acquire) {
            if Instant::now() >= end {
                return false;
            }
            thread::sleep(Duration::from_micros(100));
        }
        true
    }
}

impl Transport for VirtualDevice {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write(bytes)
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.handle.drain())
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        // closing the channel ends the worker loop
        self.jobs.take();
        if let Some(w) = self.worker.take() {
            let _ = w.join();
        }
    }
}

fn run_worker(jobs: Receiver<Job>, dev: DeviceHandle) {
    for job in jobs.iter() {
        match job.entry {
            ResponseEntry::EmitOne { text, delay } => {
                sleep_until(job.at + delay);
                dev.push_output(text);
            }
            ResponseEntry::EmitMany {
                items,
                delay,
                segments: None,
            } => {
                sleep_until(job.at + delay);
                for item in items {
                    dev.push_output(item);
                }
            }
            ResponseEntry::EmitMany {
                items,
                delay,
                segments: Some(seg),
            } => {
                sleep_until(job.at + delay);
                let mut mark = Instant::now();
                let mut rest = items.into_iter();
                for (n, d) in seg.frames.iter().zip(&seg.delays) {
                    sleep_until(mark + *d);
                    for item in rest.by_ref().take(*n) {
                        dev.push_output(item);
                    }
                    mark = Instant::now();
                }
            }
            ResponseEntry::RunCustom { name, handler } => {
                trace!("sim custom '{}' for {:?}", name, job.text);
                handler(&job.text, job.count, &dev);
            }
            ResponseEntry::NoOp => {}
        }
        dev.shared.done.fetch_add(1, Ordering::AcqRel);
    }
}

/// Sleep most of the way, then spin for sub-scheduler precision.
fn sleep_until(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let left = deadline - now;
        if left > SPIN_WINDOW {
            thread::sleep(left - SPIN_WINDOW);
        } else {
            std::hint::spin_loop();
        }
    }
}
