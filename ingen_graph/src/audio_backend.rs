//! Audio host drivers, spec.md §6 "Collaborator: AudioHostDriver": "provides
//! sample_rate/block_length, creates host-visible ports, invokes a process
//! callback each cycle, advances the frame counter".
//!
//! Grounded directly on `knaster_graph::audio_backend`'s `AudioBackend`
//! trait and its `cpal`/`jack` submodules, which do exactly this job for
//! the teacher's single flat graph. The teacher hands its backend a
//! `processor::AudioProcessor<F>`, a concrete struct wrapping one root
//! `Node`; here, since the root object a cycle drives is a whole
//! [`crate::Pipeline`] plus the root [`crate::GraphBody`]'s compiled
//! schedule rather than one generic-over-`Float` node, the backend takes a
//! plain boxed [`ProcessCallback`] closure instead of a generic processor
//! type. Everything else — the trait shape, the per-backend modules, the
//! error enum wrapping each backend's native error type behind its feature
//! flag — follows the teacher as closely as the swap allows.

#[cfg(feature = "cpal")]
pub mod cpal;
#[cfg(feature = "jack")]
pub mod jack;

/// One audio cycle: `inputs` and `outputs` are interleaved by channel,
/// `nframes` frames per channel. The callback is expected to call
/// [`crate::Pipeline::run_execute_cycle`] and then walk the root graph's
/// current compiled schedule, copying `inputs` into the root graph's audio
/// input ports and the root graph's audio output ports into `outputs`
/// (spec.md §6: "advances the frame counter").
///
/// # RT-safety
/// Whatever is boxed here runs on the backend's own audio thread every
/// cycle; it must uphold the same no-allocate/no-lock/no-syscall discipline
/// as `Execution::execute` (spec.md §4.1).
pub type ProcessCallback = Box<dyn FnMut(&[f32], &mut [f32], u32) + Send>;

/// Errors a backend can report starting, stopping, or running.
#[derive(Debug, thiserror::Error)]
pub enum AudioBackendError {
    #[error("backend is already processing audio")]
    BackendAlreadyRunning,
    #[error("backend is not currently processing audio")]
    BackendNotRunning,
    #[cfg(feature = "cpal")]
    #[error("cpal device error: {0}")]
    CpalDevices(#[from] ::cpal::DevicesError),
    #[cfg(feature = "cpal")]
    #[error("cpal default stream config error: {0}")]
    CpalDefaultStreamConfig(#[from] ::cpal::DefaultStreamConfigError),
    #[cfg(feature = "cpal")]
    #[error("cpal build stream error: {0}")]
    CpalBuildStream(#[from] ::cpal::BuildStreamError),
    #[cfg(feature = "cpal")]
    #[error("cpal play stream error: {0}")]
    CpalPlayStream(#[from] ::cpal::PlayStreamError),
    #[cfg(feature = "cpal")]
    #[error("cpal pause stream error: {0}")]
    CpalPauseStream(#[from] ::cpal::PauseStreamError),
    #[cfg(feature = "cpal")]
    #[error("no cpal output device available")]
    NoCpalOutputDevice,
    #[cfg(feature = "jack")]
    #[error("jack error: {0}")]
    Jack(#[from] ::jack::Error),
}

/// An audio host driver (spec.md §6 "AudioHostDriver"): owns the physical
/// device or server connection, reports its fixed sample rate/block size,
/// and starts/stops a [`ProcessCallback`] running against it.
pub trait AudioBackend {
    /// Begins processing, calling `callback` once per device cycle until
    /// [`Self::stop`] is called. Errors if already running.
    fn start_processing(&mut self, callback: ProcessCallback) -> Result<(), AudioBackendError>;
    /// Stops processing. Errors if not currently running.
    fn stop(&mut self) -> Result<(), AudioBackendError>;
    fn sample_rate(&self) -> u32;
    /// `None` if the backend's block size varies cycle to cycle (spec.md
    /// §4.1: "nframes ... is not assumed constant across cycles").
    fn block_size(&self) -> Option<usize>;
    fn native_output_channels(&self) -> Option<usize>;
    fn native_input_channels(&self) -> Option<usize>;
}
