//! PCM WAV format validation and chunked reading.

use std::fs::File;
use std::io::BufReader;
use std::iter::FusedIterator;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec};

use palaver_core::config::SUPPORTED_SAMPLE_RATES;

/// Why a transcoded stream cannot be fed to the recognizer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatViolation {
    #[error("audio must be mono, got {0} channels")]
    Channels(u16),
    #[error("audio must be 16-bit, got {0}-bit samples")]
    BitsPerSample(u16),
    #[error("audio must use integer PCM samples")]
    FloatSamples,
    #[error("unsupported sample rate {0} Hz")]
    SampleRate(u32),
    #[error("not a readable WAV stream: {0}")]
    Unreadable(String),
}

/// Check a stream header against what the recognizer accepts:
/// one channel, 16-bit integer samples, a supported sample rate.
pub fn validate_spec(spec: &WavSpec) -> Result<(), FormatViolation> {
    if spec.channels != 1 {
        return Err(FormatViolation::Channels(spec.channels));
    }
    if spec.bits_per_sample != 16 {
        return Err(FormatViolation::BitsPerSample(spec.bits_per_sample));
    }
    if spec.sample_format != SampleFormat::Int {
        return Err(FormatViolation::FloatSamples);
    }
    if !SUPPORTED_SAMPLE_RATES.contains(&spec.sample_rate) {
        return Err(FormatViolation::SampleRate(spec.sample_rate));
    }
    Ok(())
}

/// A validated mono 16-bit PCM stream.
pub struct PcmStream {
    reader: WavReader<BufReader<File>>,
    sample_rate: u32,
}

/// Open `path` and validate its header.
pub fn open_pcm(path: &Path) -> Result<PcmStream, FormatViolation> {
    let reader = WavReader::open(path).map_err(|e| FormatViolation::Unreadable(e.to_string()))?;
    let spec = reader.spec();
    validate_spec(&spec)?;
    Ok(PcmStream {
        reader,
        sample_rate: spec.sample_rate,
    })
}

impl PcmStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total frames in the stream.
    pub fn frames(&self) -> u32 {
        self.reader.duration()
    }

    /// Consume the stream as consecutive chunks of at most `frames_per_chunk` frames.
    pub fn chunks(self, frames_per_chunk: usize) -> PcmChunks {
        PcmChunks {
            reader: Some(self.reader),
            frames_per_chunk: frames_per_chunk.max(1),
        }
    }
}

/// Single-pass chunk iterator. After the end of the stream or a read error it
/// yields nothing further.
pub struct PcmChunks {
    reader: Option<WavReader<BufReader<File>>>,
    frames_per_chunk: usize,
}

impl Iterator for PcmChunks {
    type Item = Result<Vec<i16>, hound::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        let mut chunk = Vec::with_capacity(self.frames_per_chunk);
        let mut failure = None;
        for sample in reader.samples::<i16>().take(self.frames_per_chunk) {
            match sample {
                Ok(s) => chunk.push(s),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            self.reader = None;
            return Some(Err(e));
        }
        if chunk.is_empty() {
            self.reader = None;
            return None;
        }
        Some(Ok(chunk))
    }
}

impl FusedIterator for PcmChunks {}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavWriter;

    fn spec(channels: u16, sample_rate: u32, bits: u16, format: SampleFormat) -> WavSpec {
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: bits,
            sample_format: format,
        }
    }

    fn write_i16(path: &Path, spec: WavSpec, samples: usize) {
        let mut w = WavWriter::create(path, spec).unwrap();
        for i in 0..samples {
            w.write_sample((i % 100) as i16).unwrap();
        }
        w.finalize().unwrap();
    }

    #[test]
    fn test_accepts_mono_16bit_16k() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.wav");
        write_i16(&path, spec(1, 16000, 16, SampleFormat::Int), 16000);
        let stream = open_pcm(&path).unwrap();
        assert_eq!(stream.sample_rate(), 16000);
        assert_eq!(stream.frames(), 16000);
    }

    #[test]
    fn test_rejects_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_i16(&path, spec(2, 16000, 16, SampleFormat::Int), 200);
        assert_eq!(open_pcm(&path).err(), Some(FormatViolation::Channels(2)));
    }

    #[test]
    fn test_rejects_8bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("8bit.wav");
        let mut w = WavWriter::create(&path, spec(1, 16000, 8, SampleFormat::Int)).unwrap();
        for _ in 0..100 {
            w.write_sample(0i8).unwrap();
        }
        w.finalize().unwrap();
        assert_eq!(open_pcm(&path).err(), Some(FormatViolation::BitsPerSample(8)));
    }

    #[test]
    fn test_rejects_unsupported_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("11k.wav");
        write_i16(&path, spec(1, 11025, 16, SampleFormat::Int), 100);
        assert_eq!(open_pcm(&path).err(), Some(FormatViolation::SampleRate(11025)));
    }

    #[test]
    fn test_all_supported_rates_accepted() {
        for rate in SUPPORTED_SAMPLE_RATES {
            assert!(validate_spec(&spec(1, rate, 16, SampleFormat::Int)).is_ok());
        }
        assert_eq!(
            validate_spec(&spec(1, 16000, 32, SampleFormat::Float)),
            Err(FormatViolation::BitsPerSample(32))
        );
    }

    #[test]
    fn test_garbage_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"definitely not a wav file").unwrap();
        assert!(matches!(open_pcm(&path), Err(FormatViolation::Unreadable(_))));
    }

    #[test]
    fn test_chunks_cover_stream_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.wav");
        write_i16(&path, spec(1, 16000, 16, SampleFormat::Int), 9000);
        let mut chunks = open_pcm(&path).unwrap().chunks(4000);
        let sizes: Vec<usize> = chunks.by_ref().map(|c| c.unwrap().len()).collect();
        assert_eq!(sizes, vec![4000, 4000, 1000]);
        assert!(chunks.next().is_none());
    }
}
