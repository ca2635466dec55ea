//! BPM detection for video files by extracting and analysing their audio
//! track.
//!
//! Pipeline:
//! 1. Probe the MP4 container and locate the audio track (symphonia)
//! 2. Decode up to ~30 seconds of audio into mono f32 PCM
//! 3. Energy-based onset detection + autocorrelation over the [60, 200]
//!    BPM lag range
//!
//! Any failure surfaces as an error to the caller, which indexes the file
//! with BPM 0 ("unknown") rather than dropping it.

mod detect;

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

pub use detect::detect_bpm;

/// Upper bound on analysed audio; keeps the startup scan fast.
const MAX_SECONDS: usize = 30;

/// Errors raised while extracting PCM from a media file.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("failed to open {path}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("container probe failed")]
    Probe(#[source] SymphoniaError),
    #[error("no audio track found")]
    NoAudioTrack,
    #[error("unsupported audio codec")]
    UnsupportedCodec(#[source] SymphoniaError),
    #[error("no audio samples decoded")]
    NoAudio,
}

/// Detect the BPM of a video file's audio track.
///
/// Returns `Ok(0.0)` when the audio decodes but no periodicity is found.
///
/// # Errors
///
/// Returns an error when the file cannot be opened, probed, or decoded.
pub fn analyse_file(path: &Path) -> Result<f64, AnalysisError> {
    let (pcm, sample_rate) = extract_pcm(path)?;
    if pcm.is_empty() {
        return Err(AnalysisError::NoAudio);
    }
    Ok(detect_bpm(&pcm, sample_rate))
}

/// Decode up to [`MAX_SECONDS`] of audio into mono f32 PCM plus its sample
/// rate.
fn extract_pcm(path: &Path) -> Result<(Vec<f32>, u32), AnalysisError> {
    let file = File::open(path).map_err(|source| AnalysisError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(AnalysisError::Probe)?;
    let mut format = probed.format;

    // The audio sample description carries a sample rate; video tracks do
    // not. Picking by that avoids handing the video track to the decoder.
    let track = format
        .tracks()
        .iter()
        .find(|track| track.codec_params.sample_rate.is_some())
        .ok_or(AnalysisError::NoAudioTrack)?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(AnalysisError::UnsupportedCodec)?;

    let mut mono: Vec<f32> = Vec::new();
    let mut max_samples = sample_rate as usize * MAX_SECONDS;
    let mut skipped = 0usize;

    loop {
        if max_samples > 0 && mono.len() >= max_samples {
            break;
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(_) => break,
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if sample_rate == 0 {
                    sample_rate = spec.rate;
                    max_samples = sample_rate as usize * MAX_SECONDS;
                }
                let channels = spec.channels.count().max(1);
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                for frame in buffer.samples().chunks_exact(channels) {
                    let sum: f32 = frame.iter().sum();
                    mono.push(sum / channels as f32);
                }
            }
            // Corrupt packets are skipped; a run of them still yields
            // whatever decoded cleanly.
            Err(SymphoniaError::DecodeError(_)) | Err(SymphoniaError::IoError(_)) => {
                skipped += 1;
            }
            Err(_) => break,
        }
    }

    if skipped > 0 {
        debug!(skipped, "skipped undecodable audio packets");
    }
    if sample_rate == 0 {
        return Err(AnalysisError::NoAudio);
    }
    mono.truncate(max_samples);
    Ok((mono, sample_rate))
}
