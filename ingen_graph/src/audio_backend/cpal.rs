//! CPAL backend, spec.md §6 "AudioHostDriver".
//!
//! The default backend on every major desktop platform. Like the teacher's
//! `knaster_graph::audio_backend::cpal`, CPAL here is output-only: it
//! doesn't support duplex streams, so `inputs` is always empty in the
//! [`crate::audio_backend::ProcessCallback`] this backend drives.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio_backend::{AudioBackend, AudioBackendError, ProcessCallback};

pub struct CpalBackendOptions {
    pub device: String,
    pub verbose: bool,
}
impl Default for CpalBackendOptions {
    fn default() -> Self {
        Self {
            device: "default".into(),
            verbose: false,
        }
    }
}

/// CPAL-backed [`AudioBackend`]. Output-only; `native_input_channels`
/// always reports zero (spec.md §6 doesn't require duplex support, and
/// CPAL itself can't provide it).
pub struct CpalBackend {
    stream: Option<cpal::Stream>,
    sample_rate: u32,
    config: cpal::SupportedStreamConfig,
    device: cpal::Device,
}

// SAFETY: CPAL streams aren't `Send`/`Sync` for reasons specific to some
// mobile backends calling restricted functions inside the audio callback;
// this backend never touches the stream except through its own methods, so
// the restriction doesn't apply here.
unsafe impl Send for CpalBackend {}
unsafe impl Sync for CpalBackend {}

impl CpalBackend {
    pub fn new(options: CpalBackendOptions) -> Result<Self, AudioBackendError> {
        let host = cpal::default_host();
        let device = if options.device == "default" {
            host.default_output_device()
        } else {
            host.output_devices()?.find(|d| d.name().map(|n| n == options.device).unwrap_or(false))
        }
        .ok_or(AudioBackendError::NoCpalOutputDevice)?;
        if options.verbose {
            if let Ok(name) = device.name() {
                log::info!("ingen: cpal output device {name}");
            }
        }
        let config = device.default_output_config()?;
        if options.verbose {
            log::info!("ingen: cpal default stream config {config:?}");
        }
        Ok(Self {
            stream: None,
            sample_rate: config.sample_rate().0,
            config,
            device,
        })
    }

    pub fn num_outputs(&self) -> usize {
        self.config.channels() as usize
    }
}

impl AudioBackend for CpalBackend {
    fn start_processing(&mut self, callback: ProcessCallback) -> Result<(), AudioBackendError> {
        if self.stream.is_some() {
            return Err(AudioBackendError::BackendAlreadyRunning);
        }
        let config = self.config.clone();
        let stream = match self.config.sample_format() {
            cpal::SampleFormat::I16 => run::<i16>(&self.device, &config.into(), callback),
            cpal::SampleFormat::U16 => run::<u16>(&self.device, &config.into(), callback),
            cpal::SampleFormat::I32 => run::<i32>(&self.device, &config.into(), callback),
            cpal::SampleFormat::U32 => run::<u32>(&self.device, &config.into(), callback),
            cpal::SampleFormat::F32 => run::<f32>(&self.device, &config.into(), callback),
            cpal::SampleFormat::F64 => run::<f64>(&self.device, &config.into(), callback),
            other => {
                log::error!("ingen: unsupported cpal sample format {other:?}, falling back to f32");
                run::<f32>(&self.device, &config.into(), callback)
            }
        }?;
        stream.play()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioBackendError> {
        if self.stream.take().is_none() {
            return Err(AudioBackendError::BackendNotRunning);
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    fn block_size(&self) -> Option<usize> {
        None
    }
    fn native_output_channels(&self) -> Option<usize> {
        Some(self.num_outputs())
    }
    fn native_input_channels(&self) -> Option<usize> {
        Some(0)
    }
}

fn run<T>(device: &cpal::Device, config: &cpal::StreamConfig, mut callback: ProcessCallback) -> Result<cpal::Stream, AudioBackendError>
where
    T: cpal::Sample + cpal::FromSample<f32> + cpal::SizedSample,
{
    let channels = config.channels as usize;
    let err_fn = |err| log::error!("ingen: cpal stream error: {err}");
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        config,
        move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
            let nframes = (output.len() / channels) as u32;
            scratch.clear();
            scratch.resize(output.len(), 0.0);
            callback(&[], &mut scratch, nframes);
            for (dst, src) in output.iter_mut().zip(scratch.iter()) {
                *dst = T::from_sample(*src);
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
