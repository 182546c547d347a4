use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{AudioError, Result};
use cantina_core::config::AudioConfig;

/// Raw interleaved block at device rate, straight off the callback thread.
pub type RawBlock = Vec<i16>;

/// Negotiated device format, reported once the stream is live.
#[derive(Debug, Clone, Copy)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

/// Handle to a running capture session.
///
/// The cpal stream lives on its own OS thread (streams are not `Send` on
/// every backend); the realtime callback never touches shared state, it
/// only `try_send`s blocks into the bounded channel handed to
/// [`start_capture`]. Overflow drops are counted, never blocked on.
pub struct CaptureHandle {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
    pub format: DeviceFormat,
    dropped: Arc<AtomicU64>,
}

impl CaptureHandle {
    /// Blocks dropped because the hand-off channel was full.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the stream and join the capture thread.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Open the configured input device and start streaming raw blocks into
/// `block_tx`. Returns once the stream is confirmed live or setup failed.
pub fn start_capture(
    config: &AudioConfig,
    block_tx: mpsc::Sender<RawBlock>,
) -> Result<CaptureHandle> {
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<DeviceFormat>>();
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_for_thread = Arc::clone(&dropped);
    let device_index = config.device_index;

    let thread = std::thread::Builder::new()
        .name("mic-capture".to_string())
        .spawn(move || {
            run_capture_thread(device_index, block_tx, stop_rx, ready_tx, dropped_for_thread);
        })
        .map_err(|e| AudioError::StreamError(format!("failed to spawn capture thread: {e}")))?;

    match ready_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(Ok(format)) => {
            info!(
                sample_rate = format.sample_rate,
                channels = format.channels,
                "audio capture started"
            );
            Ok(CaptureHandle {
                stop_tx,
                thread: Some(thread),
                format,
                dropped,
            })
        }
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = stop_tx.send(());
            let _ = thread.join();
            Err(AudioError::StreamError(
                "timed out waiting for capture stream".to_string(),
            ))
        }
    }
}

fn run_capture_thread(
    device_index: Option<usize>,
    block_tx: mpsc::Sender<RawBlock>,
    stop_rx: std_mpsc::Receiver<()>,
    ready_tx: std_mpsc::Sender<Result<DeviceFormat>>,
    dropped: Arc<AtomicU64>,
) {
    let setup = (|| -> Result<(cpal::Stream, DeviceFormat)> {
        let host = cpal::default_host();
        let device = match device_index {
            Some(index) => host
                .input_devices()?
                .nth(index)
                .ok_or(AudioError::NoInputDevice)?,
            None => host.default_input_device().ok_or(AudioError::NoInputDevice)?,
        };
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let supported = device.default_input_config()?;
        let format = DeviceFormat {
            sample_rate: supported.sample_rate().0,
            channels: supported.channels() as usize,
        };
        debug!(device = %device_name, ?format, "opening input stream");

        let stream = build_stream(&device, &supported, block_tx, dropped)?;
        stream.play()?;
        Ok((stream, format))
    })();

    match setup {
        Ok((stream, format)) => {
            let _ = ready_tx.send(Ok(format));
            // Keep the stream alive until stop is requested or the handle
            // side goes away entirely.
            let _ = stop_rx.recv();
            drop(stream);
            debug!("capture thread exiting");
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    supported: &cpal::SupportedStreamConfig,
    block_tx: mpsc::Sender<RawBlock>,
    dropped: Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    let config: cpal::StreamConfig = supported.config();
    let err_fn = |err| error!("audio stream error: {err}");

    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => {
            let send = sender(block_tx, dropped);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| send(data.to_vec()),
                err_fn,
                None,
            )?
        }
        cpal::SampleFormat::U16 => {
            let send = sender(block_tx, dropped);
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    send(data.iter().map(|&s| (s as i32 - 32_768) as i16).collect())
                },
                err_fn,
                None,
            )?
        }
        cpal::SampleFormat::F32 => {
            let send = sender(block_tx, dropped);
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    send(
                        data.iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect(),
                    )
                },
                err_fn,
                None,
            )?
        }
        format => {
            return Err(AudioError::UnsupportedFormat(format!("{format:?}")));
        }
    };
    Ok(stream)
}

fn sender(block_tx: mpsc::Sender<RawBlock>, dropped: Arc<AtomicU64>) -> impl Fn(RawBlock) {
    move |block| {
        if block_tx.try_send(block).is_err() {
            dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
