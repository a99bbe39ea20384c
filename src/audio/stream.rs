//! Blocking stream I/O over cpal
//!
//! cpal streams are callback-driven and not Send, so each stream lives
//! on a dedicated thread and exchanges fixed blocks of interleaved i16
//! samples with its owner over bounded channels. That gives the audio
//! loop the blocking read/write semantics it is built around:
//!
//! - `InputStream::read` blocks until exactly CHUNK frames are
//!   available. When the loop falls behind, the device callback's
//!   try_send fails and the overflowed block is dropped silently.
//! - `OutputStream::write` blocks while the queue toward the device is
//!   full; the callback zero-fills on underrun.
//!
//! Closing a stream stops its thread and releases the OS resource, which
//! is the only interrupt point (device hot-swap and shutdown).

use super::{AudioBuffer, FrameSink};
use crate::audio::device::{self, DeviceDescriptor};
use crate::config::AudioConfig;
use crate::error::DeviceError;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use std::collections::VecDeque;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Blocks the device callback may queue before overflow drops begin
const QUEUE_BLOCKS: usize = 32;

fn open_failed(direction: &'static str, name: &str, reason: impl ToString) -> DeviceError {
    DeviceError::OpenFailed {
        direction,
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn stream_config(config: &AudioConfig) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.chunk_frames as u32),
    }
}

/// Microphone stream with blocking CHUNK-sized reads
pub struct InputStream {
    block_rx: mpsc::Receiver<Vec<i16>>,
    /// Samples received but not yet consumed by `read`
    pending: VecDeque<i16>,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
    channels: usize,
}

impl InputStream {
    /// Open the device with the shared fixed format. Fails fast when the
    /// device rejects the format or has disappeared since enumeration.
    pub fn open(descriptor: &DeviceDescriptor, config: &AudioConfig) -> Result<Self, DeviceError> {
        let (block_tx, block_rx) = mpsc::sync_channel::<Vec<i16>>(QUEUE_BLOCKS);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), DeviceError>>();

        let descriptor = descriptor.clone();
        let cfg = stream_config(config);

        let thread = thread::spawn(move || {
            let device = match device::find_cpal_device(&descriptor, "input") {
                Ok(d) => d,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let sample_format = match device.default_input_config() {
                Ok(c) => c.sample_format(),
                Err(e) => {
                    let _ = ready_tx.send(Err(open_failed("input", &descriptor.name, e)));
                    return;
                }
            };

            let err_fn = |err| tracing::error!("Input stream error: {}", err);

            let stream_result = match sample_format {
                cpal::SampleFormat::F32 => {
                    build_input_stream::<f32>(&device, &cfg, block_tx, err_fn)
                }
                cpal::SampleFormat::I16 => {
                    build_input_stream::<i16>(&device, &cfg, block_tx, err_fn)
                }
                cpal::SampleFormat::U16 => {
                    build_input_stream::<u16>(&device, &cfg, block_tx, err_fn)
                }
                format => Err(open_failed(
                    "input",
                    &descriptor.name,
                    format!("unsupported sample format {:?}", format),
                )),
            };

            let stream = match stream_result {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(open_failed("input", &descriptor.name, e)));
                return;
            }

            let _ = ready_tx.send(Ok(()));
            tracing::debug!("Input stream thread started ({})", descriptor.name);

            // Park until close; dropping the stream releases the device
            let _ = stop_rx.recv();
            drop(stream);
            tracing::debug!("Input stream thread stopped ({})", descriptor.name);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                block_rx,
                pending: VecDeque::new(),
                stop_tx: Some(stop_tx),
                thread: Some(thread),
                channels: config.channels as usize,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DeviceError::StreamClosed)
            }
        }
    }

    /// Blocking read of exactly `frames` frames.
    ///
    /// Never errors on input overflow; overflowed blocks were already
    /// dropped on the callback side. Errors only once the stream is
    /// closed.
    pub fn read(&mut self, frames: usize) -> Result<AudioBuffer, DeviceError> {
        let wanted = frames * self.channels;

        while self.pending.len() < wanted {
            let block = self
                .block_rx
                .recv()
                .map_err(|_| DeviceError::StreamClosed)?;
            self.pending.extend(block);
        }

        Ok(self.pending.drain(..wanted).collect())
    }

    /// Stop the stream thread and release the device. Idempotent.
    pub fn close(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: mpsc::SyncSender<Vec<i16>>,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let block: Vec<i16> = data
                    .iter()
                    .map(|&s| <i16 as FromSample<T>>::from_sample_(s))
                    .collect();
                // Overflow policy: a full queue drops the block silently
                let _ = tx.try_send(block);
            },
            err_fn,
            None,
        )
        .map_err(|e| open_failed("input", &name, e))
}

/// Playback stream with blocking writes
pub struct OutputStream {
    block_tx: Option<mpsc::SyncSender<Vec<i16>>>,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl OutputStream {
    /// Open the device with the shared fixed format.
    ///
    /// `direction` distinguishes the primary output from the echo
    /// monitor in error messages; both use identical parameters.
    pub fn open(
        descriptor: &DeviceDescriptor,
        config: &AudioConfig,
        direction: &'static str,
    ) -> Result<Self, DeviceError> {
        let (block_tx, block_rx) = mpsc::sync_channel::<Vec<i16>>(QUEUE_BLOCKS);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), DeviceError>>();

        let descriptor = descriptor.clone();
        let cfg = stream_config(config);

        let thread = thread::spawn(move || {
            let device = match device::find_cpal_device(&descriptor, direction) {
                Ok(d) => d,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let sample_format = match device.default_output_config() {
                Ok(c) => c.sample_format(),
                Err(e) => {
                    let _ = ready_tx.send(Err(open_failed(direction, &descriptor.name, e)));
                    return;
                }
            };

            let err_fn = move |err| tracing::error!("{} stream error: {}", direction, err);

            let stream_result = match sample_format {
                cpal::SampleFormat::F32 => {
                    build_output_stream::<f32>(&device, &cfg, direction, block_rx, err_fn)
                }
                cpal::SampleFormat::I16 => {
                    build_output_stream::<i16>(&device, &cfg, direction, block_rx, err_fn)
                }
                cpal::SampleFormat::U16 => {
                    build_output_stream::<u16>(&device, &cfg, direction, block_rx, err_fn)
                }
                format => Err(open_failed(
                    direction,
                    &descriptor.name,
                    format!("unsupported sample format {:?}", format),
                )),
            };

            let stream = match stream_result {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(open_failed(direction, &descriptor.name, e)));
                return;
            }

            let _ = ready_tx.send(Ok(()));
            tracing::debug!("{} stream thread started ({})", direction, descriptor.name);

            let _ = stop_rx.recv();
            drop(stream);
            tracing::debug!("{} stream thread stopped ({})", direction, descriptor.name);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                block_tx: Some(block_tx),
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DeviceError::StreamClosed)
            }
        }
    }

    /// Block until the device callback has consumed every block written
    /// so far, then wait out the short tail buffered inside the
    /// callback. Callers that close immediately after their last write
    /// would otherwise cut off up to QUEUE_BLOCKS of queued audio.
    pub fn drain(&mut self, config: &AudioConfig) -> Result<(), DeviceError> {
        flush_with_silence(self, config.samples_per_chunk(), QUEUE_BLOCKS)?;
        let tail = Duration::from_secs_f64(
            (2 * config.chunk_frames) as f64 / config.sample_rate as f64,
        );
        thread::sleep(tail);
        Ok(())
    }

    /// Stop the stream thread and release the device. Idempotent.
    pub fn close(&mut self) {
        // Dropping the sender unblocks the callback's queue
        self.block_tx.take();
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl FrameSink for OutputStream {
    /// Blocking write: waits while the device-side queue is full.
    fn write(&mut self, frames: &[i16]) -> Result<(), DeviceError> {
        let tx = self.block_tx.as_ref().ok_or(DeviceError::StreamClosed)?;
        tx.send(frames.to_vec())
            .map_err(|_| DeviceError::StreamClosed)
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Push `blocks` blocks of silence through a blocking sink. Because
/// every write blocks while the queue is full, returning means at least
/// that many earlier blocks have been dequeued on the device side.
fn flush_with_silence(
    sink: &mut dyn FrameSink,
    samples_per_block: usize,
    blocks: usize,
) -> Result<(), DeviceError> {
    let silence = vec![0i16; samples_per_block];
    for _ in 0..blocks {
        sink.write(&silence)?;
    }
    Ok(())
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    direction: &'static str,
    rx: mpsc::Receiver<Vec<i16>>,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample + FromSample<i16> + Send + 'static,
{
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let mut pending: VecDeque<i16> = VecDeque::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // Refill from the writer without blocking the realtime
                // callback; underruns are filled with silence below
                while pending.len() < data.len() {
                    match rx.try_recv() {
                        Ok(block) => pending.extend(block),
                        Err(_) => break,
                    }
                }
                for slot in data.iter_mut() {
                    let sample = pending.pop_front().unwrap_or(0);
                    *slot = T::from_sample_(sample);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| open_failed(direction, &name, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_sink::VecSink;

    #[test]
    fn test_flush_pushes_full_queue_of_silence() {
        let mut sink = VecSink::default();
        flush_with_silence(&mut sink, 1024, QUEUE_BLOCKS).unwrap();

        // One silence block per queue slot, so every block written
        // before the flush must have been dequeued by the time it
        // returns
        assert_eq!(sink.writes.len(), QUEUE_BLOCKS);
        assert!(sink
            .writes
            .iter()
            .all(|b| b.len() == 1024 && b.iter().all(|&s| s == 0)));
    }
}
