use crate::error::{Error, Result};
use rodio::{Decoder, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// A fully decoded audio file: interleaved `f32` samples at the file's
/// native sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl Clip {
    /// Decode the whole file into memory.
    pub fn decode(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| Error::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let channels = source.channels();
        let sample_rate = source.sample_rate();
        if channels == 0 || sample_rate == 0 {
            return Err(Error::Decode {
                path: path.to_path_buf(),
                message: format!("unusable stream layout ({} ch @ {} Hz)", channels, sample_rate),
            });
        }
        let samples: Vec<f32> = source.convert_samples::<f32>().collect();

        Ok(Clip {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Multiply every sample by `factor`.
    pub fn scale(&mut self, factor: f32) {
        scale_samples(&mut self.samples, factor);
    }
}

/// Linear gain. No clipping guard beyond the caller keeping `factor` in [0, 1].
pub fn scale_samples(samples: &mut [f32], factor: f32) {
    for s in samples.iter_mut() {
        *s *= factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::write_test_wav;
    use std::fs;

    #[test]
    fn zero_volume_silences() {
        let mut samples = vec![0.3, -0.7, 1.0, -1.0];
        scale_samples(&mut samples, 0.0);
        assert!(samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn full_volume_is_identity() {
        let original = vec![0.3, -0.7, 1.0, -1.0];
        let mut samples = original.clone();
        scale_samples(&mut samples, 1.0);
        assert_eq!(samples, original);
    }

    #[test]
    fn half_volume_halves_amplitude() {
        let original = vec![0.3, -0.7, 1.0, -1.0, 0.0];
        let mut samples = original.clone();
        scale_samples(&mut samples, 0.5);
        for (scaled, orig) in samples.iter().zip(&original) {
            assert_eq!(*scaled, orig / 2.0);
        }
    }

    #[test]
    fn decode_wav_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 2, 8_000, &[0, i16::MAX, 0, i16::MIN, 0, 0]);

        let clip = Clip::decode(&path).unwrap();
        assert_eq!(clip.channels, 2);
        assert_eq!(clip.sample_rate, 8_000);
        assert_eq!(clip.samples.len(), 6);
        assert!((clip.samples[1] - 1.0).abs() < 1e-3);
        assert!((clip.samples[3] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn decode_missing_file_is_io_error() {
        let err = Clip::decode(Path::new("__nonexistent_audio__.wav")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn decode_garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.mp3");
        fs::write(&path, b"this is not audio at all").unwrap();
        let err = Clip::decode(&path).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }), "got {:?}", err);
    }
}
