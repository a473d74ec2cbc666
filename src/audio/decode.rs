use anyhow::{Context, Result};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Mono waveform plus its sample rate. Every DSP stage produces a fresh one;
/// no stage mutates a waveform it did not create.
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decode any supported audio file to a mono f32 waveform.
pub fn decode_mono(path: &Path) -> Result<Waveform> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Failed to probe audio format")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .context("No audio tracks found")?;

    let track_id = track.id;
    let channels = track.codec_params.channels.map_or(1, |c| c.count());
    let sample_rate = track.codec_params.sample_rate.context("Unknown sample rate")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create audio decoder")?;

    let mut samples: Vec<f32> = Vec::new();
    // Allocated on the first packet, then reused; most packets in a stream
    // share the same frame count.
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(e.into()),
        };

        let num_frames = decoded.frames();
        let buf = match sample_buf.take() {
            Some(buf) if buf.capacity() >= num_frames * channels => sample_buf.insert(buf),
            _ => sample_buf.insert(SampleBuffer::new(num_frames as u64, *decoded.spec())),
        };
        buf.copy_interleaved_ref(decoded);

        if channels == 1 {
            samples.extend_from_slice(buf.samples());
        } else {
            for frame in buf.samples().chunks(channels) {
                let mono: f32 = frame.iter().sum::<f32>() / channels as f32;
                samples.push(mono);
            }
        }
    }

    // A readable container with zero decodable samples is useless to every
    // stage downstream, so fail here where the file can still be named.
    anyhow::ensure!(
        !samples.is_empty(),
        "No audio samples decoded from {}",
        path.display()
    );

    let waveform = Waveform {
        samples,
        sample_rate,
    };
    log::info!(
        "Decoded {}: {} samples, {}Hz, {:.1}s",
        path.display(),
        waveform.samples.len(),
        sample_rate,
        waveform.duration_secs()
    );

    Ok(waveform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav;

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_audio.wav");
        std::fs::write(&path, b"definitely not a riff chunk").unwrap();
        assert!(decode_mono(&path).is_err());
    }

    #[test]
    fn zero_sample_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        wav::write_mono(&path, &[], 44100).unwrap();
        assert!(decode_mono(&path).is_err());
    }

    #[test]
    fn stereo_decodes_to_the_channel_average() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let left = vec![0.8f32; 1024];
        let right = vec![0.2f32; 1024];
        wav::write_stereo(&path, &left, &right, 44100).unwrap();

        let decoded = decode_mono(&path).unwrap();
        assert_eq!(decoded.sample_rate, 44100);
        assert_eq!(decoded.samples.len(), 1024);
        assert!(decoded.samples.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }
}
