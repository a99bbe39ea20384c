//! Audio pipeline module
//!
//! Device enumeration and stream I/O use cpal, which works with
//! PipeWire, PulseAudio, and ALSA backends. Clips are WAV files read
//! via hound. Everything downstream of the device callbacks operates on
//! interleaved 16-bit signed PCM.

pub mod device;
pub mod mixer;
pub mod playback;
pub mod stream;

use crate::error::DeviceError;

/// A block of interleaved 16-bit signed PCM samples
/// (length = frames * channels)
pub type AudioBuffer = Vec<i16>;

/// Seam for anything frames can be written to: the real output streams
/// in production, collecting sinks in tests.
pub trait FrameSink: Send {
    /// Blocking write of the given interleaved samples
    fn write(&mut self, frames: &[i16]) -> Result<(), DeviceError>;
}

/// Write a buffer to the primary sink, and to the echo sink iff the
/// echo flag is set at this instant.
pub fn fan_out(
    primary: &mut dyn FrameSink,
    echo: Option<&mut dyn FrameSink>,
    frames: &[i16],
) -> Result<(), DeviceError> {
    primary.write(frames)?;
    if let Some(echo) = echo {
        echo.write(frames)?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_sink::VecSink;
    use super::*;

    #[test]
    fn test_fan_out_echo_enabled() {
        let mut out = VecSink::default();
        let mut echo = VecSink::default();
        fan_out(&mut out, Some(&mut echo), &[1, 2, 3]).unwrap();
        assert_eq!(out.writes, vec![vec![1, 2, 3]]);
        assert_eq!(echo.writes, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_fan_out_echo_disabled() {
        let mut out = VecSink::default();
        let mut echo = VecSink::default();
        for _ in 0..5 {
            fan_out(&mut out, None, &[7]).unwrap();
        }
        assert_eq!(out.writes.len(), 5);
        assert!(echo.writes.is_empty());
    }
}
