//! Bounded single-producer/single-consumer streams connecting pipeline stages.
//!
//! A stream is a [crossbeam] bounded channel carrying chunks of elements. The writer
//! blocks while `capacity` chunks are in flight, so a slow consumer back-pressures its
//! producer and nothing is ever dropped. Dropping the writer ends the stream; the reader
//! observes this as end-of-stream once every buffered element has been consumed.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};

// How often a reader waiting on an idle stream checks the stop flag.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag shared by every stage of a run.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Create a stream holding at most `capacity` chunks in flight.
///
/// # Panics
/// If `capacity` is zero; a rendezvous stream would deadlock stages that write before
/// they read.
pub fn stream<T>(capacity: usize, stop: StopFlag) -> (StreamWriter<T>, StreamReader<T>) {
    assert!(capacity > 0, "stream capacity must be non-zero");
    let (tx, rx) = bounded(capacity);
    (
        StreamWriter {
            tx,
            stop: stop.clone(),
        },
        StreamReader {
            rx,
            pending: Vec::new(),
            pos: 0,
            eos: false,
            stop,
            run_stop: None,
        },
    )
}

/// Producing end of a stream.
pub struct StreamWriter<T> {
    tx: Sender<Vec<T>>,
    stop: StopFlag,
}

impl<T> StreamWriter<T> {
    /// Hand a chunk to the consumer, blocking while the stream is full.
    ///
    /// Returns `false` when the consumer has gone away or the run was stopped, in
    /// which case the producer should exit.
    pub fn send(&self, chunk: Vec<T>) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        self.tx.send(chunk).is_ok()
    }
}

impl<T: Clone> StreamWriter<T> {
    /// Copy `buf` into the stream. See [StreamWriter::send].
    pub fn write(&self, buf: &[T]) -> bool {
        if buf.is_empty() {
            return !self.stop.is_stopped();
        }
        self.send(buf.to_vec())
    }
}

/// Consuming end of a stream.
pub struct StreamReader<T> {
    rx: Receiver<Vec<T>>,
    pending: Vec<T>,
    pos: usize,
    eos: bool,
    stop: StopFlag,
    run_stop: Option<StopFlag>,
}

impl<T> StreamReader<T> {
    /// Also end the stream when `stop` is raised. Used when a reader created by the
    /// caller is handed to a run that owns its own stop flag.
    pub(crate) fn observe(&mut self, stop: StopFlag) {
        self.run_stop = Some(stop);
    }

    fn stopped(&self) -> bool {
        self.stop.is_stopped() || self.run_stop.as_ref().is_some_and(StopFlag::is_stopped)
    }

    /// True once the writer is gone (or the run stopped) and every element has been
    /// read. A short read with `is_eos() == false` does not happen.
    #[must_use]
    pub fn is_eos(&self) -> bool {
        self.eos && self.pos == self.pending.len()
    }

    /// Next chunk in the order the producer wrote it, or `None` at end of stream.
    pub fn recv(&mut self) -> Option<Vec<T>> {
        if self.pos == self.pending.len() && !self.fill() {
            return None;
        }
        let chunk = self.pending.split_off(self.pos);
        self.pending.clear();
        self.pos = 0;
        Some(chunk)
    }

    fn fill(&mut self) -> bool {
        if self.eos {
            return false;
        }
        loop {
            if self.stopped() {
                self.eos = true;
                return false;
            }
            match self.rx.recv_timeout(STOP_POLL) {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                    return true;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.eos = true;
                    return false;
                }
            }
        }
    }
}

impl<T: Copy> StreamReader<T> {
    /// Fill `buf`, blocking until it is full. Returns fewer than `buf.len()` elements
    /// only at end of stream.
    pub fn read(&mut self, buf: &mut [T]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            if self.pos == self.pending.len() && !self.fill() {
                break;
            }
            let take = (self.pending.len() - self.pos).min(buf.len() - n);
            buf[n..n + take].copy_from_slice(&self.pending[self.pos..self.pos + take]);
            self.pos += take;
            n += take;
        }
        n
    }
}

impl<T> Iterator for StreamReader<T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}
