use std::fs::File;
use std::io::{stderr, stdout, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use downlink::framing::{DeframerConfig, Frame};
use downlink::pipeline::{Pipeline, Profile, Sink, Source};
use downlink::spacepacket::DecodedPacket;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a recorded capture to space packets.
    ///
    /// Packets are written to the output back to back, primary header included.
    Decode {
        /// Mission profile JSON. Uses the default profile if not given.
        #[arg(short, long, value_name = "path")]
        profile: Option<PathBuf>,

        /// Also write each synced frame, preceded by its sync marker, to this file.
        #[arg(short, long, value_name = "path")]
        frames: Option<PathBuf>,

        /// Delete output files if they already exist
        #[arg(long, action)]
        clobber: bool,

        /// Input capture, laid out per the profile's input format.
        input: PathBuf,

        /// Output packet file path.
        output: PathBuf,
    },
    /// Print the default profile as JSON.
    Profile,
}

/// Writes packets, and optionally frames, to files.
///
/// The first write error is kept and reported when the run ends. It also closes the
/// sink, which stops the run.
struct FileSink {
    packets: BufWriter<File>,
    frames: Option<(Vec<u8>, BufWriter<File>)>,
    error: Option<std::io::Error>,
}

impl FileSink {
    fn write_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        if let Some((marker, w)) = &mut self.frames {
            w.write_all(marker)?;
            w.write_all(&frame.data)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        if let Some(err) = self.error.take() {
            return Err(err).context("writing output");
        }
        self.packets.flush().context("flushing packets")?;
        if let Some((_, mut w)) = self.frames {
            w.flush().context("flushing frames")?;
        }
        Ok(())
    }
}

impl Sink for FileSink {
    fn packet(&mut self, packet: DecodedPacket) -> bool {
        if self.error.is_none() {
            self.error = self.packets.write_all(&packet.packet.data).err();
        }
        self.error.is_none()
    }

    fn frame(&mut self, frame: &Frame) {
        if self.error.is_none() && frame.synced {
            self.error = self.write_frame(frame).err();
        }
    }
}

/// Sync marker bytes as they precede a frame on the wire.
fn marker_bytes(config: &DeframerConfig) -> Vec<u8> {
    let len = config.marker_bits.div_ceil(8) as usize;
    config.marker.to_be_bytes()[8 - len..].to_vec()
}

fn create(path: &Path, clobber: bool) -> Result<BufWriter<File>> {
    if !clobber && path.exists() {
        bail!("{path:?} exists; use --clobber");
    }
    let file = File::create(path).with_context(|| format!("failed to create output {path:?}"))?;
    Ok(BufWriter::new(file))
}

fn decode(
    profile: Option<&PathBuf>,
    frames: Option<&PathBuf>,
    clobber: bool,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let profile = match profile {
        Some(path) => Profile::from_json_file(path)
            .with_context(|| format!("failed to load profile {path:?}"))?,
        None => Profile::default(),
    };
    debug!("{profile:?}");

    let sink = FileSink {
        packets: create(output, clobber)?,
        frames: match frames {
            Some(path) => Some((marker_bytes(&profile.deframer), create(path, clobber)?)),
            None => None,
        },
        error: None,
    };

    info!("decoding {input:?} to {output:?}");
    let pipeline = Pipeline::new(profile).context("invalid profile")?;
    let (summary, sink) = pipeline
        .run(Source::File(input.to_path_buf()), sink)
        .with_context(|| format!("decoding {input:?}"))?;
    sink.finish()?;

    info!(
        "{} bytes, {} frames ({} synced), {} packets ({} missing), {} anomalies, {} corrected bits",
        summary.bytes_consumed,
        summary.frames,
        summary.synced_frames,
        summary.packets,
        summary.missing_packets,
        summary.anomalies,
        summary.corrected_bits
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("DOWNLINK_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Decode {
            profile,
            frames,
            clobber,
            input,
            output,
        } => decode(profile.as_ref(), frames.as_ref(), *clobber, input, output),
        Commands::Profile => {
            let mut out = stdout().lock();
            serde_json::to_writer_pretty(&mut out, &Profile::default())
                .context("writing profile")?;
            writeln!(out)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asm_marker_bytes() {
        assert_eq!(
            marker_bytes(&DeframerConfig::default()),
            downlink::framing::ASM.to_vec()
        );
    }

    #[test]
    fn short_marker_bytes() {
        let config = DeframerConfig::builder()
            .marker(0x0352)
            .marker_bits(10)
            .build();
        assert_eq!(marker_bytes(&config), vec![0x03, 0x52]);
    }
}
