//! Processing stages and the thread that drives each of them.
use std::thread::{self, JoinHandle};

use tracing::{debug, span, Level};

use crate::stream::{StreamReader, StreamWriter};
use crate::{Error, Result};

/// A processing stage consuming one element type and producing another.
///
/// Stages own all of their state; the only thing they share with other stages are the
/// streams connecting them.
pub trait Block {
    type Input;
    type Output;

    /// Process a chunk of input, appending any produced output to `output`.
    fn work(&mut self, input: &[Self::Input], output: &mut Vec<Self::Output>);

    /// Called once at end of stream to emit anything still held back, e.g., bits
    /// waiting on traceback.
    fn flush(&mut self, _output: &mut Vec<Self::Output>) {}
}

/// Run `block` on its own named thread.
///
/// The thread reads `chunk` elements at a time, processes them and writes the output
/// downstream until the input ends, the downstream reader goes away, or the run is
/// stopped. Dropping the writer on exit ends the stream for the next stage.
///
/// # Errors
/// [Error::Spawn] if the thread could not be started.
pub fn spawn<B>(
    name: &str,
    mut block: B,
    mut input: StreamReader<B::Input>,
    output: StreamWriter<B::Output>,
    chunk: usize,
) -> Result<JoinHandle<()>>
where
    B: Block + Send + 'static,
    B::Input: Copy + Default + Send + 'static,
    B::Output: Send + 'static,
{
    let stage = name.to_string();
    thread::Builder::new()
        .name(stage.clone())
        .spawn(move || {
            let span = span!(Level::DEBUG, "stage", name = %stage);
            let _guard = span.enter();

            let mut buf = vec![B::Input::default(); chunk.max(1)];
            loop {
                let n = input.read(&mut buf);
                let mut out = Vec::new();
                block.work(&buf[..n], &mut out);
                let done = input.is_eos();
                if done {
                    block.flush(&mut out);
                }
                if !out.is_empty() && !output.send(out) {
                    debug!("downstream closed");
                    break;
                }
                if done {
                    break;
                }
            }
            debug!("stage exit");
        })
        .map_err(|source| Error::Spawn {
            name: name.to_string(),
            source,
        })
}
