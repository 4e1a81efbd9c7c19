//! Sound card output through cpal
//!
//! [`CpalOutputLine`] gives a cpal output stream the buffered-line
//! behaviour the live streamer expects: a bounded byte queue the writer
//! fills, drained by the device callback once the line is started.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::line::{AudioFormat, OutputLine};
use crate::error::AudioError;
use crate::protocol::AudioDeviceInfo;

/// Sample rates reported by [`list_output_devices`]
const CANDIDATE_RATES: [u32; 5] = [8000, 16000, 22050, 44100, 48000];

/// List the output devices of the default host
pub fn list_output_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let Ok(devices) = host.output_devices() else {
        return Vec::new();
    };

    devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let (sample_rates, channels) = output_capabilities(&device);
            Some(AudioDeviceInfo {
                is_default: default_name.as_ref() == Some(&name),
                name,
                sample_rates,
                channels,
            })
        })
        .collect()
}

fn output_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate in CANDIDATE_RATES {
                let sample_rate = cpal::SampleRate(rate);
                if sample_rate >= config.min_sample_rate()
                    && sample_rate <= config.max_sample_rate()
                    && !sample_rates.contains(&rate)
                {
                    sample_rates.push(rate);
                }
            }
            if !channels.contains(&config.channels()) {
                channels.push(config.channels());
            }
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Output device by name, or the default one
pub fn find_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::CpalError(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
    }
}

/// Output line backed by a cpal stream.
///
/// Not `Send`: cpal streams must stay on the thread that built them.
pub struct CpalOutputLine {
    device_name: Option<String>,
    buffer_bytes: usize,
    queue: Arc<ArrayQueue<u8>>,
    playing: Arc<AtomicBool>,
    stream: Option<cpal::Stream>,
    stream_errors: Option<Receiver<AudioError>>,
}

impl CpalOutputLine {
    /// Line on `device_name` (default device when `None`) with an internal
    /// buffer of `buffer_bytes`. The device is looked up now so a bad name
    /// fails early; it is not opened until [`OutputLine::open`].
    pub fn new(device_name: Option<&str>, buffer_bytes: usize) -> Result<Self, AudioError> {
        if buffer_bytes == 0 {
            return Err(AudioError::UnsupportedFormat("device buffer must be > 0 bytes".into()));
        }
        find_output_device(device_name)?;
        Ok(Self {
            device_name: device_name.map(str::to_string),
            buffer_bytes,
            queue: Arc::new(ArrayQueue::new(buffer_bytes)),
            playing: Arc::new(AtomicBool::new(false)),
            stream: None,
            stream_errors: None,
        })
    }

    fn build_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        format: &AudioFormat,
        errors: Sender<AudioError>,
    ) -> Result<cpal::Stream, AudioError>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        let encoding = format.encoding;
        let queue = self.queue.clone();
        let playing = self.playing.clone();
        let frame_channels = usize::from(config.channels.max(1));
        // Source samples consumed per device frame
        let step = f64::from(format.sample_rate) / f64::from(config.sample_rate.0);
        let mut phase = 1.0f64;
        let mut current = 0.0f32;

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if !playing.load(Ordering::Relaxed) {
                        data.fill(T::EQUILIBRIUM);
                        return;
                    }
                    for frame in data.chunks_mut(frame_channels) {
                        while phase >= 1.0 {
                            phase -= 1.0;
                            current = queue.pop().map(|b| encoding.to_f32(b)).unwrap_or(0.0);
                        }
                        phase += step;
                        frame.fill(T::from_sample(current));
                    }
                },
                move |err| {
                    tracing::error!("Output stream error: {}", err);
                    let _ = errors.try_send(AudioError::StreamError(err.to_string()));
                },
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))
    }
}

impl OutputLine for CpalOutputLine {
    fn open(&mut self, format: &AudioFormat) -> Result<(), AudioError> {
        self.close();

        let device = find_output_device(self.device_name.as_deref())?;
        let default_config = device
            .default_output_config()
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
        let config = default_config.config();

        tracing::info!(
            "Opening output device {}: {:?}, {} Hz, {} ch",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            default_config.sample_format(),
            config.sample_rate.0,
            config.channels
        );

        let (error_tx, error_rx) = bounded(4);
        let stream = match default_config.sample_format() {
            SampleFormat::F32 => self.build_stream::<f32>(&device, &config, format, error_tx)?,
            SampleFormat::I16 => self.build_stream::<i16>(&device, &config, format, error_tx)?,
            SampleFormat::U16 => self.build_stream::<u16>(&device, &config, format, error_tx)?,
            other => {
                return Err(AudioError::UnsupportedFormat(format!("{:?}", other)));
            }
        };

        // The callback plays silence until start()
        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.stream = Some(stream);
        self.stream_errors = Some(error_rx);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        if self.stream.is_none() {
            return Err(AudioError::LineClosed);
        }
        if let Some(err) = self.stream_errors.as_ref().and_then(|rx| rx.try_recv().ok()) {
            return Err(err);
        }

        let mut written = 0;
        for &byte in data {
            if self.queue.push(byte).is_err() {
                break;
            }
            written += 1;
        }
        Ok(written)
    }

    fn available(&self) -> usize {
        self.buffer_bytes - self.queue.len()
    }

    fn buffer_size(&self) -> usize {
        self.buffer_bytes
    }

    fn start(&mut self) -> Result<(), AudioError> {
        if self.stream.is_none() {
            return Err(AudioError::LineClosed);
        }
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.playing.store(false, Ordering::SeqCst);
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("Output stream closed");
        }
        self.stream_errors = None;
        while self.queue.pop().is_some() {}
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalOutputLine {
    fn drop(&mut self) {
        self.close();
    }
}
