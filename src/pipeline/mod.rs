//! Decode chain orchestration.
//!
//! A [Pipeline] wires the stages a [Profile] asks for into a chain of threads
//! connected by bounded streams:
//!
//! ```text
//! source → [carrier pll] → [viterbi | slicer] → deframer → packets → sink
//! ```
//!
//! Every stage runs on its own thread and only talks to its neighbours through the
//! streams between them. The run's [PipelineState] is the only other shared state.
mod config;
mod source;
mod state;

pub use config::*;
pub use source::Source;
pub use state::*;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Sender;
use num_complex::Complex32;
use tracing::{debug, info, span, Level};

use crate::block::{self, Block};
use crate::dsp::{CarrierPll, Slicer};
use crate::fec::ConvolutionalDecoder;
use crate::framing::{Deframer, Frame};
use crate::spacepacket::{DecodedPacket, PacketAssembler};
use crate::stream::{stream, StopFlag, StreamReader};
use crate::{Error, Result};

/// Receives the output of a run, in arrival order, on the run's final thread.
pub trait Sink: Send + 'static {
    /// Accept a packet. Returning `false` means the sink can take no more and the run
    /// is stopped.
    fn packet(&mut self, packet: DecodedPacket) -> bool;

    /// Called for every frame the deframer cuts, synced or not, before any packets
    /// it completes.
    fn frame(&mut self, _frame: &Frame) {}
}

impl Sink for Sender<DecodedPacket> {
    fn packet(&mut self, packet: DecodedPacket) -> bool {
        self.send(packet).is_ok()
    }
}

impl Sink for Vec<DecodedPacket> {
    fn packet(&mut self, packet: DecodedPacket) -> bool {
        self.push(packet);
        true
    }
}

/// Runs a block and reports on it after every call.
struct Tracked<B, F> {
    block: B,
    report: F,
}

impl<B, F> Block for Tracked<B, F>
where
    B: Block,
    F: FnMut(&B, &[B::Output]),
{
    type Input = B::Input;
    type Output = B::Output;

    fn work(&mut self, input: &[B::Input], output: &mut Vec<B::Output>) {
        let start = output.len();
        self.block.work(input, output);
        (self.report)(&self.block, &output[start..]);
    }

    fn flush(&mut self, output: &mut Vec<B::Output>) {
        let start = output.len();
        self.block.flush(output);
        (self.report)(&self.block, &output[start..]);
    }
}

/// In-phase component as the soft symbol, for complex input without carrier recovery.
struct InPhase;

impl Block for InPhase {
    type Input = Complex32;
    type Output = f32;

    fn work(&mut self, input: &[Complex32], output: &mut Vec<f32>) {
        output.extend(input.iter().map(|s| s.re));
    }
}

/// A run in progress.
pub struct RunHandle<S> {
    stop: StopFlag,
    state: Arc<PipelineState>,
    stages: Vec<(String, JoinHandle<()>)>,
    collector: JoinHandle<S>,
}

impl<S> RunHandle<S> {
    /// Ask every stage to finish. Stages exit at their next read or write and data
    /// still in flight between stages is discarded.
    pub fn stop(&self) {
        info!("stop requested");
        self.stop.stop();
    }

    /// Live statistics for the run.
    #[must_use]
    pub fn state(&self) -> Arc<PipelineState> {
        self.state.clone()
    }

    /// Wait for every stage to exit, returning the final counters and the sink.
    ///
    /// # Errors
    /// [Error::Stage] if a stage thread panicked.
    pub fn wait(self) -> Result<(Summary, S)> {
        let mut failed = None;
        for (name, handle) in self.stages {
            if handle.join().is_err() && failed.is_none() {
                failed = Some(name);
            }
        }
        let sink = self
            .collector
            .join()
            .map_err(|_| Error::Stage("packets".to_string()))?;
        if let Some(name) = failed {
            return Err(Error::Stage(name));
        }
        let summary = self.state.summary();
        info!(
            frames = summary.frames,
            synced = summary.synced_frames,
            packets = summary.packets,
            anomalies = summary.anomalies,
            missing = summary.missing_packets,
            locks = summary.locks,
            unlocks = summary.unlocks,
            "run complete"
        );
        Ok((summary, sink))
    }
}

/// Builds and runs the decode chain for a [Profile].
///
/// # Example
/// ```no_run
/// use downlink::pipeline::{Pipeline, Profile, Source};
/// use downlink::spacepacket::DecodedPacket;
///
/// let pipeline = Pipeline::new(Profile::default()).unwrap();
/// let (summary, packets) = pipeline
///     .run(Source::File("capture.cf32".into()), Vec::<DecodedPacket>::new())
///     .unwrap();
/// println!("{} packets, {} frames", packets.len(), summary.frames);
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    profile: Profile,
}

impl Pipeline {
    /// # Errors
    /// [Error::Config] if the profile is invalid.
    pub fn new(profile: Profile) -> Result<Self> {
        profile.validate()?;
        Ok(Pipeline { profile })
    }

    #[must_use]
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Run to completion: end of input in file mode, or until the live producer
    /// closes its stream.
    ///
    /// # Errors
    /// See [Pipeline::start] and [RunHandle::wait].
    pub fn run<S: Sink>(&self, source: Source, sink: S) -> Result<(Summary, S)> {
        self.start(source, sink)?.wait()
    }

    /// Start every stage and return immediately.
    ///
    /// # Errors
    /// Input that cannot be opened, a source that does not match the profile's input
    /// format, or a stage thread that cannot be spawned. Nothing is left running when
    /// an error is returned.
    pub fn start<S: Sink>(&self, source: Source, sink: S) -> Result<RunHandle<S>> {
        let stop = StopFlag::new();
        let state = Arc::new(PipelineState::new());
        let mut stages = Vec::new();

        match self.spawn_chain(source, sink, &stop, &state, &mut stages) {
            Ok(collector) => Ok(RunHandle {
                stop,
                state,
                stages,
                collector,
            }),
            Err(err) => {
                stop.stop();
                for (_, handle) in stages {
                    let _ = handle.join();
                }
                Err(err)
            }
        }
    }

    fn spawn_chain<S: Sink>(
        &self,
        source: Source,
        sink: S,
        stop: &StopFlag,
        state: &Arc<PipelineState>,
        stages: &mut Vec<(String, JoinHandle<()>)>,
    ) -> Result<JoinHandle<S>> {
        let profile = &self.profile;
        let capacity = profile.stream_capacity;
        let chunk = profile.chunk_size;

        let symbols = match source {
            Source::File(path) => {
                let reader = source::open(&path, state)?;
                match profile.input {
                    config::InputFormat::I8Soft => {
                        let (tx, rx) = stream(capacity, stop.clone());
                        let h = source::spawn_reader(
                            reader,
                            profile.input,
                            source::i8_soft,
                            tx,
                            chunk,
                            state.clone(),
                        )?;
                        stages.push(("reader".to_string(), h));
                        rx
                    }
                    format => {
                        let (tx, rx) = stream(capacity, stop.clone());
                        let convert = match format {
                            config::InputFormat::Ci8 => source::ci8,
                            _ => source::cf32,
                        };
                        let h = source::spawn_reader(
                            reader,
                            format,
                            convert,
                            tx,
                            chunk,
                            state.clone(),
                        )?;
                        stages.push(("reader".to_string(), h));
                        self.demodulate(rx, stop, state, stages)?
                    }
                }
            }
            Source::Live(mut samples) => {
                if !profile.input.is_complex() {
                    return Err(Error::Config(
                        "complex samples given for a soft symbol profile".to_string(),
                    ));
                }
                samples.observe(stop.clone());
                self.demodulate(samples, stop, state, stages)?
            }
            Source::LiveSymbols(mut symbols) => {
                if profile.pll.is_some() {
                    return Err(Error::Config(
                        "soft symbols given for a profile with carrier recovery".to_string(),
                    ));
                }
                symbols.observe(stop.clone());
                symbols
            }
        };

        let bits = {
            let (tx, rx) = stream(capacity, stop.clone());
            let h = match &profile.viterbi {
                Some(config) => {
                    let state = state.clone();
                    let decoder = Tracked {
                        block: ConvolutionalDecoder::new(config)?,
                        report: move |d: &ConvolutionalDecoder, out: &[u8]| {
                            state.add_bits(out.len() as u64);
                            state.record_viterbi(d.is_locked(), d.ber(), d.corrected());
                        },
                    };
                    block::spawn("viterbi", decoder, symbols, tx, chunk)?
                }
                None => {
                    let state = state.clone();
                    let slicer = Tracked {
                        block: Slicer,
                        report: move |_: &Slicer, out: &[u8]| state.add_bits(out.len() as u64),
                    };
                    block::spawn("slicer", slicer, symbols, tx, chunk)?
                }
            };
            stages.push(("decoder".to_string(), h));
            rx
        };

        let frames = {
            let (tx, rx) = stream(capacity, stop.clone());
            let state = state.clone();
            let deframer = Tracked {
                block: Deframer::new(&profile.deframer)?,
                report: move |d: &Deframer, _: &[Frame]| {
                    state.set_sync(d.state(), d.locks(), d.losses());
                },
            };
            let h = block::spawn("deframer", deframer, bits, tx, chunk)?;
            stages.push(("deframer".to_string(), h));
            rx
        };

        spawn_collector(
            PacketAssembler::new(profile.packets, profile.length_policy),
            frames,
            sink,
            stop.clone(),
            state.clone(),
        )
    }

    // Turn complex samples into soft symbols.
    fn demodulate(
        &self,
        samples: StreamReader<Complex32>,
        stop: &StopFlag,
        state: &Arc<PipelineState>,
        stages: &mut Vec<(String, JoinHandle<()>)>,
    ) -> Result<StreamReader<f32>> {
        let (tx, rx) = stream(self.profile.stream_capacity, stop.clone());
        let chunk = self.profile.chunk_size;
        let state = state.clone();
        let h = match self.profile.pll {
            Some(config) => {
                let pll = Tracked {
                    block: CarrierPll::new(config),
                    report: move |_: &CarrierPll, out: &[f32]| {
                        state.add_symbols(out.len() as u64);
                    },
                };
                block::spawn("pll", pll, samples, tx, chunk)?
            }
            None => {
                let re = Tracked {
                    block: InPhase,
                    report: move |_: &InPhase, out: &[f32]| {
                        state.add_symbols(out.len() as u64);
                    },
                };
                block::spawn("inphase", re, samples, tx, chunk)?
            }
        };
        stages.push(("demodulator".to_string(), h));
        Ok(rx)
    }
}

// Final stage: frames to packets to the sink. Returns the sink when the frame stream
// ends or the sink closes.
fn spawn_collector<S: Sink>(
    mut assembler: PacketAssembler,
    frames: StreamReader<Frame>,
    mut sink: S,
    stop: StopFlag,
    state: Arc<PipelineState>,
) -> Result<JoinHandle<S>> {
    thread::Builder::new()
        .name("packets".to_string())
        .spawn(move || {
            let span = span!(Level::DEBUG, "stage", name = "packets");
            let _guard = span.enter();

            'frames: for frame in frames.flatten() {
                state.record_frame(frame.score, frame.synced);
                sink.frame(&frame);
                for packet in assembler.push(&frame) {
                    state.add_packet();
                    if !sink.packet(packet) {
                        info!("sink closed, stopping run");
                        stop.stop();
                        break 'frames;
                    }
                }
                state.set_anomalies(assembler.anomalies());
                state.set_missing_packets(assembler.missing_packets());
            }
            debug!("stage exit");
            sink
        })
        .map_err(|source| Error::Spawn {
            name: "packets".to_string(),
            source,
        })
}
