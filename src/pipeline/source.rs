use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use num_complex::Complex32;
use tracing::{debug, info, span, warn, Level};

use super::{InputFormat, PipelineState};
use crate::stream::{StreamReader, StreamWriter};
use crate::{Error, Result};

/// Where a run's input comes from.
pub enum Source {
    /// A file of raw samples or soft symbols laid out per the profile's [InputFormat].
    File(PathBuf),
    /// Complex baseband samples from a live producer.
    Live(StreamReader<Complex32>),
    /// Soft symbols from a live producer.
    LiveSymbols(StreamReader<f32>),
}

const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

pub(crate) fn cf32(b: &[u8]) -> Complex32 {
    Complex32::new(
        f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        f32::from_le_bytes([b[4], b[5], b[6], b[7]]),
    )
}

pub(crate) fn ci8(b: &[u8]) -> Complex32 {
    Complex32::new(f32::from(b[0] as i8) / 127.0, f32::from(b[1] as i8) / 127.0)
}

pub(crate) fn i8_soft(b: &[u8]) -> f32 {
    f32::from(b[0] as i8) / 127.0
}

/// Open `path` for reading, recording its size as the run total.
pub(crate) fn open(path: &Path, state: &PipelineState) -> Result<BufReader<File>> {
    let file = File::open(path)?;
    state.set_total(file.metadata()?.len());
    info!(path = %path.display(), "reading input");
    Ok(BufReader::with_capacity(1024 * 1024, file))
}

// Fill `buf` as far as possible, short only at end of input.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match reader.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(k) => n += k,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(n)
}

/// Read `format` elements from `reader` on a named thread until end of input or stop.
///
/// A trailing partial element is dropped. A read error mid-run ends the input the same
/// way end of file does.
pub(crate) fn spawn_reader<R, T, F>(
    mut reader: R,
    format: InputFormat,
    convert: F,
    output: StreamWriter<T>,
    chunk: usize,
    state: Arc<PipelineState>,
) -> Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
    T: Send + 'static,
    F: Fn(&[u8]) -> T + Send + 'static,
{
    let name = "reader";
    let size = format.element_size();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let span = span!(Level::DEBUG, "stage", name);
            let _guard = span.enter();

            let mut buf = vec![0u8; chunk.max(1) * size];
            let mut last_report = Instant::now();
            loop {
                let n = match read_full(&mut reader, &mut buf) {
                    Ok(n) => n,
                    Err(err) => {
                        warn!(%err, "input read failed, ending input");
                        break;
                    }
                };
                state.add_bytes(n as u64);
                let elements: Vec<T> = buf[..n].chunks_exact(size).map(&convert).collect();
                if !elements.is_empty() && !output.send(elements) {
                    debug!("downstream closed");
                    break;
                }
                if last_report.elapsed() >= PROGRESS_INTERVAL {
                    if let Some(p) = state.progress() {
                        info!("progress {:.1}%", p * 100.0);
                    }
                    last_report = Instant::now();
                }
                if n < buf.len() {
                    break;
                }
            }
            debug!("end of input");
        })
        .map_err(|source| Error::Spawn {
            name: name.to_string(),
            source,
        })
}
