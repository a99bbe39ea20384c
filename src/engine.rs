//! Audio engine - the fixed-tick read/mix/write loop
//!
//! The engine owns the three streams, the playback slot, and the
//! hotkey matcher. It runs on a single blocking thread at a fixed tick
//! period; each tick is strictly sequential: drain control and key
//! channels, read one CHUNK from the mic, pull playback frames if a
//! clip is active, mix, and write to the primary output (plus the echo
//! monitor iff enabled at that instant). Nothing inside a tick
//! suspends except the blocking device reads/writes themselves, so a
//! slow read delays the whole tick including pending hotkey effects.
//!
//! External collaborators (CLI, a future UI) talk to a running engine
//! through `EngineHandle`; key edges arrive over the listener channel.

use crate::audio::device::{self, DeviceDescriptor};
use crate::audio::mixer::{apply_gain, mix};
use crate::audio::playback::{PlaybackSlot, WavClip};
use crate::audio::stream::{InputStream, OutputStream};
use crate::audio::{fan_out, AudioBuffer, FrameSink};
use crate::config::AudioConfig;
use crate::error::{DeviceError, EngineError, MixError, MixboardError, Result};
use crate::hotkey::{self, HotkeyMatcher, KeyEdge};
use crate::profile::{Profile, SoundSpec};
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Which of the three streams a command targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Input,
    Output,
    Echo,
}

impl StreamRole {
    fn direction(self) -> &'static str {
        match self {
            StreamRole::Input => "input",
            StreamRole::Output => "output",
            StreamRole::Echo => "echo",
        }
    }
}

/// Control messages consumed by the engine loop between ticks
pub enum EngineCommand {
    /// Gate the echo monitor writes
    SetEcho(bool),
    /// Trigger a sound as if its combo had fired
    Trigger(SoundSpec),
    /// Force the playback slot to Idle
    StopPlayback,
    /// Hot-swap one stream to a different device. The old stream is
    /// closed before the new one opens; the brief gap is expected.
    SwapDevice {
        role: StreamRole,
        name: String,
        reply: oneshot::Sender<std::result::Result<(), DeviceError>>,
    },
    /// Close all streams, release any clip, and stop the loop
    Shutdown { reply: oneshot::Sender<()> },
}

/// Cloneable control surface for a running engine.
///
/// Every method fails fast with `EngineError::Terminated` once the
/// engine has shut down.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn set_echo(&self, enabled: bool) -> std::result::Result<(), EngineError> {
        self.cmd_tx
            .send(EngineCommand::SetEcho(enabled))
            .await
            .map_err(|_| EngineError::Terminated)
    }

    pub async fn trigger(&self, spec: SoundSpec) -> std::result::Result<(), EngineError> {
        self.cmd_tx
            .send(EngineCommand::Trigger(spec))
            .await
            .map_err(|_| EngineError::Terminated)
    }

    pub async fn stop_playback(&self) -> std::result::Result<(), EngineError> {
        self.cmd_tx
            .send(EngineCommand::StopPlayback)
            .await
            .map_err(|_| EngineError::Terminated)
    }

    /// Swap one stream to the named device. The inner result surfaces
    /// open failures to the caller; they are not retried here.
    pub async fn swap_device(&self, role: StreamRole, name: String) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::SwapDevice {
                role,
                name,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::Terminated)?;
        reply_rx
            .await
            .map_err(|_| EngineError::NoReply)?
            .map_err(MixboardError::from)
    }

    /// Shut the engine down. Idempotent: calling this on an already
    /// terminated engine is an Ok no-op.
    pub async fn shutdown(&self) -> std::result::Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(EngineCommand::Shutdown { reply: reply_tx })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = reply_rx.await;
        Ok(())
    }
}

/// The audio engine: streams, slot, matcher, and the tick loop state
pub struct AudioEngine {
    audio: AudioConfig,
    devices: Vec<DeviceDescriptor>,
    input_desc: DeviceDescriptor,
    output_desc: DeviceDescriptor,
    echo_desc: DeviceDescriptor,
    input: InputStream,
    output: OutputStream,
    echo: OutputStream,
    echo_enabled: bool,
    slot: PlaybackSlot,
    /// Gain of the clip currently in the slot
    slot_gain: f32,
    matcher: HotkeyMatcher,
    /// Sounds with usable bindings, indexed by matcher combo id
    sounds: Vec<SoundSpec>,
    terminated: bool,
}

impl AudioEngine {
    /// Enumerate devices, resolve the profile's device names (with
    /// first-device fallback), and open all three streams. Any open
    /// failure here is fatal.
    pub fn new(audio: AudioConfig, profile: &Profile) -> Result<Self> {
        let devices = device::enumerate_devices()?;
        let inputs = device::input_devices(&devices);
        let outputs = device::output_devices(&devices);

        let input_desc = device::resolve_by_name(&profile.input_device, &inputs, "input")?.clone();
        let output_desc =
            device::resolve_by_name(&profile.output_device, &outputs, "output")?.clone();
        let echo_desc = device::resolve_by_name(&profile.echo_device, &outputs, "echo")?.clone();

        tracing::info!("Input device: {}", input_desc.name);
        tracing::info!("Output device: {}", output_desc.name);
        tracing::info!("Echo device: {} (enabled: {})", echo_desc.name, profile.echo);

        let input = InputStream::open(&input_desc, &audio)?;
        let output = OutputStream::open(&output_desc, &audio, "output")?;
        let echo = OutputStream::open(&echo_desc, &audio, "echo")?;

        let mut matcher = HotkeyMatcher::new();
        let mut sounds = Vec::new();
        for spec in &profile.sounds {
            match hotkey::parse_combo(&spec.keys) {
                Ok(combo) => {
                    if combo.is_empty() {
                        tracing::debug!("Sound '{}' has no binding", spec.name);
                    }
                    matcher.register(sounds.len(), combo);
                    sounds.push(spec.clone());
                }
                Err(e) => {
                    tracing::warn!("Sound '{}' binding unusable: {}", spec.name, e);
                }
            }
        }
        tracing::info!("Armed {} sound(s)", sounds.len());

        Ok(Self {
            audio,
            devices,
            input_desc,
            output_desc,
            echo_desc,
            input,
            output,
            echo,
            echo_enabled: profile.echo,
            slot: PlaybackSlot::new(),
            slot_gain: 1.0,
            matcher,
            sounds,
            terminated: false,
        })
    }

    /// The resolved device names (input, output, echo), for writing
    /// back to the profile so the next session selects the same devices
    pub fn device_names(&self) -> (String, String, String) {
        (
            self.input_desc.name.clone(),
            self.output_desc.name.clone(),
            self.echo_desc.name.clone(),
        )
    }

    /// Run the tick loop until shutdown. Blocking; callers put this on
    /// a dedicated thread (`tokio::task::spawn_blocking`).
    pub fn run(
        mut self,
        mut key_rx: mpsc::Receiver<KeyEdge>,
        mut cmd_rx: mpsc::Receiver<EngineCommand>,
    ) -> Result<()> {
        let tick = Duration::from_millis(self.audio.tick_ms);
        tracing::info!(
            "Audio loop running: {} frames/chunk, {} Hz, {} ms tick",
            self.audio.chunk_frames,
            self.audio.sample_rate,
            self.audio.tick_ms
        );

        loop {
            // Control first, so a shutdown or swap never waits behind
            // a blocking read
            while let Ok(cmd) = cmd_rx.try_recv() {
                if self.handle_command(cmd) {
                    return Ok(());
                }
            }

            // Key edges drive triggers; the matcher is owned here so
            // evaluation never races the tick
            while let Ok(edge) = key_rx.try_recv() {
                for id in self.matcher.on_edge(edge) {
                    self.trigger_by_id(id);
                }
            }

            self.tick()?;

            std::thread::sleep(tick);
        }
    }

    /// Returns true when the engine should stop
    fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::SetEcho(enabled) => {
                tracing::info!("Echo {}", if enabled { "enabled" } else { "disabled" });
                self.echo_enabled = enabled;
            }
            EngineCommand::Trigger(spec) => {
                self.trigger_spec(&spec);
            }
            EngineCommand::StopPlayback => {
                self.slot.clear();
            }
            EngineCommand::SwapDevice { role, name, reply } => {
                let _ = reply.send(self.swap_device(role, &name));
            }
            EngineCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    /// One strictly sequential tick: read, pull playback, mix, write.
    fn tick(&mut self) -> Result<()> {
        let input = self.input.read(self.audio.chunk_frames)?;

        // A broken clip must never abort the loop; the slot clears
        // itself on error and the tick degrades to mic passthrough
        let mut playback = match self.slot.read(self.audio.chunk_frames) {
            Ok(buf) => buf,
            Err(e) => {
                tracing::warn!("Playback read failed: {}", e);
                Vec::new()
            }
        };
        apply_gain(&mut playback, self.slot_gain);

        for buf in render_writes(&input, &playback)? {
            self.write_out(&buf)?;
        }

        Ok(())
    }

    fn write_out(&mut self, frames: &[i16]) -> std::result::Result<(), DeviceError> {
        let echo = if self.echo_enabled {
            Some(&mut self.echo as &mut dyn FrameSink)
        } else {
            None
        };
        fan_out(&mut self.output, echo, frames)
    }

    /// Live hotkey path: a clip that fails to open is logged and
    /// skipped, leaving the slot untouched.
    fn trigger_by_id(&mut self, id: usize) {
        let Some(spec) = self.sounds.get(id).cloned() else {
            return;
        };
        tracing::debug!("Triggered '{}'", spec.name);
        self.trigger_spec(&spec);
    }

    fn trigger_spec(&mut self, spec: &SoundSpec) {
        match WavClip::open(Path::new(&spec.path), &self.audio) {
            Ok(clip) => {
                self.slot.set(Box::new(clip));
                self.slot_gain = spec.volume;
            }
            Err(e) => {
                tracing::warn!("Cannot play '{}': {}", spec.name, e);
            }
        }
    }

    /// Close the old stream, then open the new device. On failure the
    /// error is surfaced (not retried) and the previous device is
    /// reopened so the loop can keep running.
    fn swap_device(
        &mut self,
        role: StreamRole,
        name: &str,
    ) -> std::result::Result<(), DeviceError> {
        let candidates = match role {
            StreamRole::Input => device::input_devices(&self.devices),
            StreamRole::Output | StreamRole::Echo => device::output_devices(&self.devices),
        };
        let new_desc = device::resolve_by_name(name, &candidates, role.direction())?.clone();
        tracing::info!("Swapping {} stream to '{}'", role.direction(), new_desc.name);

        match role {
            StreamRole::Input => {
                self.input.close();
                let (stream, outcome) = swap_stream(&mut self.input_desc, new_desc, |d| {
                    InputStream::open(d, &self.audio)
                })?;
                self.input = stream;
                outcome
            }
            StreamRole::Output => {
                self.output.close();
                let (stream, outcome) = swap_stream(&mut self.output_desc, new_desc, |d| {
                    OutputStream::open(d, &self.audio, "output")
                })?;
                self.output = stream;
                outcome
            }
            StreamRole::Echo => {
                self.echo.close();
                let (stream, outcome) = swap_stream(&mut self.echo_desc, new_desc, |d| {
                    OutputStream::open(d, &self.audio, "echo")
                })?;
                self.echo = stream;
                outcome
            }
        }
    }

    /// Close all three streams, release any active clip, and mark the
    /// engine terminated. Safe to reach at most once per engine.
    fn shutdown(&mut self) {
        if self.terminated {
            return;
        }
        tracing::info!("Audio engine shutting down");
        self.input.close();
        self.output.close();
        self.echo.close();
        self.slot.clear();
        self.terminated = true;
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Open a stream on `new_desc`, restoring the previous descriptor on
/// failure. The caller closes the old stream first.
///
/// Returns the stream to install - the new one on success, a reopened
/// old one on failure - paired with the outcome surfaced to the
/// caller. An outer `Err` means even the old device could not be
/// reopened; the surviving descriptor is the old one.
fn swap_stream<S>(
    desc: &mut DeviceDescriptor,
    new_desc: DeviceDescriptor,
    open: impl Fn(&DeviceDescriptor) -> std::result::Result<S, DeviceError>,
) -> std::result::Result<(S, std::result::Result<(), DeviceError>), DeviceError> {
    let old_desc = std::mem::replace(desc, new_desc);
    match open(desc) {
        Ok(stream) => Ok((stream, Ok(()))),
        Err(e) => {
            *desc = old_desc;
            let restored = open(desc)?;
            Ok((restored, Err(e)))
        }
    }
}

/// Create the command channel for a running engine
pub fn command_channel() -> (EngineHandle, mpsc::Receiver<EngineCommand>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    (EngineHandle { cmd_tx }, cmd_rx)
}

/// Split one tick's buffers into the writes it produces: the mixed
/// overlap of mic and playback first, then any unmixed mic remainder.
/// With no playback frames, the mic buffer passes through unmodified.
fn render_writes(input: &[i16], playback: &[i16]) -> std::result::Result<Vec<AudioBuffer>, MixError> {
    if playback.is_empty() {
        return Ok(vec![input.to_vec()]);
    }

    let overlap = input.len().min(playback.len());
    let mut writes = vec![mix(&input[..overlap], &playback[..overlap])?];
    if input.len() > overlap {
        writes.push(input[overlap..].to_vec());
    }
    Ok(writes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_sink::VecSink;
    use crate::error::PlaybackError;
    use crate::audio::playback::ClipSource;

    #[test]
    fn test_render_mic_only_passthrough() {
        let input = vec![5i16; 1024];
        let writes = render_writes(&input, &[]).unwrap();
        assert_eq!(writes, vec![input]);
    }

    #[test]
    fn test_render_full_overlap() {
        let input = vec![100i16; 8];
        let playback = vec![200i16; 8];
        let writes = render_writes(&input, &playback).unwrap();
        assert_eq!(writes, vec![vec![150i16; 8]]);
    }

    #[test]
    fn test_render_short_clip_tail_splits_writes() {
        // CHUNK=512 stereo mic, 300 frames of clip remaining
        let channels = 2;
        let input = vec![100i16; 512 * channels];
        let playback = vec![300i16; 300 * channels];

        let writes = render_writes(&input, &playback).unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], vec![200i16; 300 * channels]);
        assert_eq!(writes[1], vec![100i16; 212 * channels]);
    }

    /// Clip yielding a fixed number of frames
    struct ShortClip {
        frames_left: usize,
        channels: usize,
    }

    impl ClipSource for ShortClip {
        fn read_frames(&mut self, max_frames: usize) -> std::result::Result<AudioBuffer, PlaybackError> {
            let n = max_frames.min(self.frames_left);
            self.frames_left -= n;
            Ok(vec![300i16; n * self.channels])
        }
    }

    #[test]
    fn test_slot_exhaustion_resumes_passthrough_same_tick() {
        let mut slot = PlaybackSlot::new();
        slot.set(Box::new(ShortClip {
            frames_left: 300,
            channels: 2,
        }));

        let input = vec![100i16; 512 * 2];

        // Tick 1: partial mix, then unmixed mic for the remainder
        let playback = slot.read(512).unwrap();
        let writes = render_writes(&input, &playback).unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].len(), 300 * 2);
        assert_eq!(writes[1].len(), 212 * 2);

        // Tick 2: the zero-frame read idles the slot, pure passthrough
        let playback = slot.read(512).unwrap();
        assert!(playback.is_empty());
        assert!(!slot.is_playing());
        let writes = render_writes(&input, &playback).unwrap();
        assert_eq!(writes, vec![input.clone()]);
    }

    #[test]
    fn test_echo_gating_counts_writes() {
        let mut out = VecSink::default();
        let mut echo = VecSink::default();
        let frames = vec![1i16; 16];

        // N ticks with echo off: echo gets zero writes
        for _ in 0..4 {
            fan_out(&mut out, None, &frames).unwrap();
        }
        assert_eq!(out.writes.len(), 4);
        assert_eq!(echo.writes.len(), 0);

        // Flag flips mid-session: echo starts receiving that instant
        fan_out(&mut out, Some(&mut echo), &frames).unwrap();
        assert_eq!(out.writes.len(), 5);
        assert_eq!(echo.writes.len(), 1);
        assert_eq!(echo.writes[0], frames);
    }

    fn descriptor(index: usize, name: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            index,
            name: name.to_string(),
            max_input_channels: 0,
            max_output_channels: 2,
        }
    }

    fn open_by_name(d: &DeviceDescriptor) -> std::result::Result<String, DeviceError> {
        if d.name == "broken" {
            Err(DeviceError::OpenFailed {
                direction: "output",
                name: d.name.clone(),
                reason: "device busy".to_string(),
            })
        } else {
            Ok(d.name.clone())
        }
    }

    #[test]
    fn test_swap_stream_installs_new_device() {
        let mut desc = descriptor(0, "speakers");
        let (stream, outcome) =
            swap_stream(&mut desc, descriptor(1, "cable"), open_by_name).unwrap();
        assert_eq!(stream, "cable");
        assert!(outcome.is_ok());
        assert_eq!(desc.name, "cable");
    }

    #[test]
    fn test_swap_stream_restores_old_device_on_open_failure() {
        let mut desc = descriptor(0, "speakers");
        let (stream, outcome) =
            swap_stream(&mut desc, descriptor(1, "broken"), open_by_name).unwrap();

        // The open error reaches the caller, but the previous device is
        // reopened so the loop keeps running on it
        assert!(outcome.is_err());
        assert_eq!(stream, "speakers");
        assert_eq!(desc.name, "speakers");
    }

    #[test]
    fn test_swap_stream_surfaces_restore_failure() {
        let mut desc = descriptor(0, "speakers");
        let result = swap_stream(&mut desc, descriptor(1, "cable"), |_| {
            Err::<String, _>(DeviceError::StreamClosed)
        });
        assert!(result.is_err());
        // The descriptor still names the old device
        assert_eq!(desc.name, "speakers");
    }

    #[tokio::test]
    async fn test_handle_fails_fast_after_termination() {
        let (handle, cmd_rx) = command_channel();
        drop(cmd_rx); // engine gone

        assert!(matches!(
            handle.set_echo(true).await,
            Err(EngineError::Terminated)
        ));
        // Shutdown stays idempotent
        assert!(handle.shutdown().await.is_ok());
    }
}
