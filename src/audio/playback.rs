//! Sound-effect clip playback
//!
//! A `PlaybackSlot` holds at most one active clip. Triggering a new
//! sound while one is playing pre-empts it: the old reader is dropped
//! (which closes its file exactly once) before the new clip becomes
//! active. There is no fade, no draining, and no polyphony.
//!
//! Clips are 16-bit PCM WAV files read sequentially via hound. Mono
//! clips are upmixed to the stream channel count by duplication; other
//! channel mismatches are rejected at open.

use super::AudioBuffer;
use crate::config::AudioConfig;
use crate::error::PlaybackError;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// A decodable sound-effect resource yielding sequential fixed-format
/// frame reads. Short and zero-length reads signal end of stream.
pub trait ClipSource: Send {
    /// Read up to `max_frames` frames of interleaved samples.
    /// An empty buffer means the clip is exhausted.
    fn read_frames(&mut self, max_frames: usize) -> Result<AudioBuffer, PlaybackError>;
}

/// WAV-backed clip reader
pub struct WavClip {
    reader: hound::WavReader<BufReader<File>>,
    file_channels: u16,
    out_channels: u16,
}

impl std::fmt::Debug for WavClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavClip")
            .field("file_channels", &self.file_channels)
            .field("out_channels", &self.out_channels)
            .finish_non_exhaustive()
    }
}

impl WavClip {
    /// Open a WAV file for sequential frame reads against the shared
    /// stream format. Sample-rate conversion is out of scope; a rate
    /// mismatch plays as-is and is logged once here.
    pub fn open(path: &Path, config: &AudioConfig) -> Result<Self, PlaybackError> {
        let reader = hound::WavReader::open(path).map_err(|e| match e {
            hound::Error::IoError(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                PlaybackError::FileNotFound(path.display().to_string())
            }
            other => PlaybackError::Format(format!("{}: {}", path.display(), other)),
        })?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(PlaybackError::Format(format!(
                "{}: {}-bit {:?}",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            )));
        }

        let out_channels = config.channels;
        if spec.channels != out_channels && spec.channels != 1 {
            return Err(PlaybackError::Format(format!(
                "{}: {} channels, stream has {}",
                path.display(),
                spec.channels,
                out_channels
            )));
        }

        if spec.sample_rate != config.sample_rate {
            tracing::warn!(
                "{}: sample rate {} differs from stream rate {}, clip will play pitched",
                path.display(),
                spec.sample_rate,
                config.sample_rate
            );
        }

        Ok(Self {
            file_channels: spec.channels,
            out_channels,
            reader,
        })
    }
}

impl ClipSource for WavClip {
    fn read_frames(&mut self, max_frames: usize) -> Result<AudioBuffer, PlaybackError> {
        let mut out = Vec::with_capacity(max_frames * self.out_channels as usize);
        let mut samples = self.reader.samples::<i16>();

        for _ in 0..max_frames {
            let Some(first) = samples.next() else { break };
            let first = first.map_err(|e| PlaybackError::Read(e.to_string()))?;

            if self.file_channels == 1 {
                // Mono clip: duplicate across the stream channels
                for _ in 0..self.out_channels {
                    out.push(first);
                }
            } else {
                let frame_start = out.len();
                out.push(first);
                for _ in 1..self.file_channels {
                    match samples.next() {
                        Some(s) => out.push(s.map_err(|e| PlaybackError::Read(e.to_string()))?),
                        // Truncated final frame, drop it
                        None => {
                            out.truncate(frame_start);
                            return Ok(out);
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}

/// Single-slot playback state machine: Idle -> Playing -> Idle
#[derive(Default)]
pub struct PlaybackSlot {
    active: Option<Box<dyn ClipSource>>,
}

impl PlaybackSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a clip is currently loaded
    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    /// Load a clip, pre-empting any active one. The previous reader is
    /// dropped before the new clip takes the slot.
    pub fn set(&mut self, clip: Box<dyn ClipSource>) {
        if let Some(old) = self.active.take() {
            drop(old);
            tracing::debug!("Playback pre-empted");
        }
        self.active = Some(clip);
    }

    /// Read up to `frames` frames from the active clip.
    ///
    /// Returns an empty buffer when Idle or when the clip is exhausted;
    /// exhaustion transitions the slot to Idle as a side effect. A read
    /// error also clears the slot so a broken clip cannot wedge the
    /// audio loop.
    pub fn read(&mut self, frames: usize) -> Result<AudioBuffer, PlaybackError> {
        let Some(clip) = self.active.as_mut() else {
            return Ok(Vec::new());
        };

        match clip.read_frames(frames) {
            Ok(buf) => {
                if buf.is_empty() {
                    self.active = None;
                }
                Ok(buf)
            }
            Err(e) => {
                self.active = None;
                Err(e)
            }
        }
    }

    /// Force Idle, discarding any active reader
    pub fn clear(&mut self) {
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Yields a fixed number of frames of a constant sample, then EOF.
    /// Counts drops so tests can assert the reader is closed exactly once.
    struct FakeClip {
        frames_left: usize,
        channels: usize,
        value: i16,
        drops: Arc<AtomicUsize>,
    }

    impl FakeClip {
        fn new(frames: usize, value: i16, drops: Arc<AtomicUsize>) -> Self {
            Self {
                frames_left: frames,
                channels: 2,
                value,
                drops,
            }
        }
    }

    impl ClipSource for FakeClip {
        fn read_frames(&mut self, max_frames: usize) -> Result<AudioBuffer, PlaybackError> {
            let n = max_frames.min(self.frames_left);
            self.frames_left -= n;
            Ok(vec![self.value; n * self.channels])
        }
    }

    impl Drop for FakeClip {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_idle_read_is_empty() {
        let mut slot = PlaybackSlot::new();
        assert!(!slot.is_playing());
        assert!(slot.read(512).unwrap().is_empty());
    }

    #[test]
    fn test_exhaustion_transitions_to_idle() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut slot = PlaybackSlot::new();
        slot.set(Box::new(FakeClip::new(300, 5, drops.clone())));

        // 300 frames remain of a 512-frame request
        let buf = slot.read(512).unwrap();
        assert_eq!(buf.len(), 300 * 2);
        assert!(slot.is_playing());

        // Zero-frame read signals exhaustion and clears the slot
        let buf = slot.read(512).unwrap();
        assert!(buf.is_empty());
        assert!(!slot.is_playing());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_preemption_closes_old_clip_once() {
        let drops_x = Arc::new(AtomicUsize::new(0));
        let drops_y = Arc::new(AtomicUsize::new(0));
        let mut slot = PlaybackSlot::new();

        slot.set(Box::new(FakeClip::new(1000, 1, drops_x.clone())));
        let _ = slot.read(10).unwrap();

        // Trigger Y before X finishes
        slot.set(Box::new(FakeClip::new(1000, 2, drops_y.clone())));
        assert_eq!(drops_x.load(Ordering::SeqCst), 1);

        // Only Y's frames are read afterward
        let buf = slot.read(10).unwrap();
        assert!(buf.iter().all(|&s| s == 2));

        slot.clear();
        assert_eq!(drops_x.load(Ordering::SeqCst), 1);
        assert_eq!(drops_y.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_forces_idle() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut slot = PlaybackSlot::new();
        slot.set(Box::new(FakeClip::new(100, 1, drops.clone())));
        slot.clear();
        assert!(!slot.is_playing());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    struct BrokenClip;

    impl ClipSource for BrokenClip {
        fn read_frames(&mut self, _: usize) -> Result<AudioBuffer, PlaybackError> {
            Err(PlaybackError::Read("corrupt data".to_string()))
        }
    }

    #[test]
    fn test_read_error_clears_slot() {
        let mut slot = PlaybackSlot::new();
        slot.set(Box::new(BrokenClip));
        assert!(slot.read(512).is_err());
        assert!(!slot.is_playing());
        // Subsequent reads are clean mic-only ticks
        assert!(slot.read(512).unwrap().is_empty());
    }

    #[test]
    fn test_wav_clip_missing_file() {
        let config = AudioConfig::default();
        let err = WavClip::open(Path::new("/nonexistent/clip.wav"), &config).unwrap_err();
        assert!(matches!(err, PlaybackError::FileNotFound(_)));
    }

    #[test]
    fn test_wav_clip_reads_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..300i16 {
            writer.write_sample(i).unwrap();
            writer.write_sample(-i).unwrap();
        }
        writer.finalize().unwrap();

        let config = AudioConfig::default();
        let mut clip = WavClip::open(&path, &config).unwrap();

        let buf = clip.read_frames(512).unwrap();
        assert_eq!(buf.len(), 300 * 2);
        assert_eq!(buf[0], 0);
        assert_eq!(buf[2], 1);
        assert_eq!(buf[3], -1);

        assert!(clip.read_frames(512).unwrap().is_empty());
    }

    #[test]
    fn test_wav_clip_mono_upmix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..4i16 {
            writer.write_sample(i * 10).unwrap();
        }
        writer.finalize().unwrap();

        let config = AudioConfig::default();
        let mut clip = WavClip::open(&path, &config).unwrap();
        let buf = clip.read_frames(10).unwrap();
        assert_eq!(buf, vec![0, 0, 10, 10, 20, 20, 30, 30]);
    }

    #[test]
    fn test_wav_clip_rejects_wrong_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f32.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.finalize().unwrap();

        let config = AudioConfig::default();
        let err = WavClip::open(&path, &config).unwrap_err();
        assert!(matches!(err, PlaybackError::Format(_)));
    }
}
