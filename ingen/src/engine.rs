//! The `Engine` handle, spec.md §9 "Global world singleton" (resolved here
//! as an explicit owned handle rather than a process-wide global, per
//! `DESIGN.md`).
//!
//! Grounded on `knaster_graph::runner::Runner`: a `Runner` owns a root
//! `Node`/`Graph` pair and a `RunnerOptions`; an `Engine` owns a root
//! [`ingen_graph::Block`] behind a [`ingen_graph::Store`], the event
//! [`ingen_graph::Pipeline`] built on top of it, a [`ingen_graph::Broadcaster`],
//! and a [`ingen_graph::ControlBindings`] map, closing over all four in the
//! closure it hands to an [`ingen_graph::audio_backend::AudioBackend`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ingen_core::PluginHost;
use ingen_graph::audio_backend::{AudioBackend, AudioBackendError, ProcessCallback};
use ingen_graph::{
    Block, Broadcaster, BufferFactory, ClientId, ControlBindings, Event, EventReply, GraphBody, Pipeline, Port, PortDirection, PortType, ProcessContext, Store,
    MIDI_EVENT,
};
use ingen_primitives::{Path, Symbol, Uri};
use parking_lot::Mutex;

use crate::options::EngineOptions;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("audio backend error: {0}")]
    Backend(#[from] AudioBackendError),
}

/// Owns the whole running engine: the addressable object tree, the event
/// pipeline that mutates it off the audio thread, and the per-cycle driver
/// an [`AudioBackend`] runs.
pub struct Engine {
    store: Arc<Store>,
    factory: Arc<BufferFactory>,
    plugin_host: Arc<dyn PluginHost>,
    broadcaster: Arc<Broadcaster>,
    control_bindings: Arc<Mutex<ControlBindings>>,
    pipeline: Arc<Pipeline>,
    options: EngineOptions,
    frame_clock: Arc<AtomicU64>,
    num_audio_inputs: usize,
    num_audio_outputs: usize,
}

impl Engine {
    /// Builds a root graph with `num_audio_inputs`/`num_audio_outputs`
    /// audio ports (indices following the two control ports every graph
    /// starts with, spec.md §4.4 "every Graph has `control_in`/
    /// `control_out` at poly 1") plus the pipeline threads, ready to be
    /// driven by [`Self::audio_callback`].
    pub fn new(
        options: EngineOptions,
        plugin_host: Arc<dyn PluginHost>,
        num_audio_inputs: usize,
        num_audio_outputs: usize,
        reply_sink: Arc<dyn Fn(ClientId, EventReply) + Send + Sync>,
    ) -> Self {
        let factory = Arc::new(BufferFactory::new());
        let ports = root_ports(&factory, options.root_poly, num_audio_inputs, num_audio_outputs);
        let body = GraphBody::new(options.root_poly, schedule_mode(options.worker_count));
        let root = Block::new_graph(Path::root(), Symbol::new("root").expect("\"root\" is a valid symbol"), body, ports, options.root_poly);
        let store = Arc::new(Store::new(root));
        let broadcaster = Arc::new(Broadcaster::new());

        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            factory.clone(),
            plugin_host.clone(),
            broadcaster.clone(),
            options.sample_rate,
            options.block_size,
            reply_sink,
        ));

        Self {
            store,
            factory,
            plugin_host,
            broadcaster,
            control_bindings: Arc::new(Mutex::new(ControlBindings::new())),
            pipeline,
            options,
            frame_clock: Arc::new(AtomicU64::new(0)),
            num_audio_inputs,
            num_audio_outputs,
        }
    }

    pub fn submit(&self, event: Event, client: ClientId) {
        self.pipeline.submit(event, client);
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn control_bindings(&self) -> &Arc<Mutex<ControlBindings>> {
        &self.control_bindings
    }

    pub fn factory(&self) -> &Arc<BufferFactory> {
        &self.factory
    }

    pub fn plugin_host(&self) -> &Arc<dyn PluginHost> {
        &self.plugin_host
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn sample_rate(&self) -> f64 {
        self.options.sample_rate
    }

    /// The current wall-clock frame count (spec.md §6 "advances the frame
    /// counter").
    pub fn frame(&self) -> u64 {
        self.frame_clock.load(Ordering::Acquire)
    }

    /// Runs `self` against `backend` until [`AudioBackend::stop`] is called
    /// elsewhere, or an error starting the stream occurs.
    ///
    /// # RT-safety
    /// The root is reached through [`Store::try_write`] rather than the
    /// blocking [`Store::write`] (spec.md §4.1 "the audio thread never
    /// consults the Store", §5's no-blocking rule): on contention with a
    /// preprocessor holding the writer lock, the cycle is skipped and
    /// silence is output instead of parking the audio thread. See
    /// `DESIGN.md` for why this is a narrower, simpler trade than a full
    /// `AtomicPtr`-snapshotted root.
    pub fn run(&self, backend: &mut dyn AudioBackend) -> Result<(), EngineError> {
        let store = self.store.clone();
        let pipeline = self.pipeline.clone();
        let sample_rate = self.options.sample_rate;
        let frame_clock = self.frame_clock.clone();
        let num_inputs = self.num_audio_inputs;
        let num_outputs = self.num_audio_outputs;
        let broadcaster = self.broadcaster.clone();
        let control_bindings = self.control_bindings.clone();

        let callback: ProcessCallback = Box::new(move |inputs: &[f32], outputs: &mut [f32], nframes: u32| {
            pipeline.run_execute_cycle();

            let Some(mut root) = store.try_write() else {
                outputs.fill(0.0);
                frame_clock.fetch_add(nframes as u64, Ordering::Relaxed);
                return;
            };
            write_audio_inputs(&mut root, inputs, num_inputs, nframes as usize);
            apply_incoming_midi(&mut root, &control_bindings);

            let start = frame_clock.load(Ordering::Relaxed);
            let ctx = ProcessContext::new(ingen_primitives::Cycle::new(start, nframes), sample_rate);
            ingen_graph::run_graph_cycle(&mut root, ctx, &broadcaster);

            emit_feedback_midi(&mut root, &control_bindings);
            read_audio_outputs(&root, outputs, num_inputs, num_outputs, nframes as usize);
            drop(root);

            frame_clock.fetch_add(nframes as u64, Ordering::Relaxed);
        });

        backend.start_processing(callback)?;
        Ok(())
    }
}

/// Consumes raw MIDI events queued on the root `control_in` port, applying
/// every matching binding's write straight to its target port (spec.md
/// §4.8: "for each matching CC, writes the mapped port's value").
fn apply_incoming_midi(root: &mut Block, control_bindings: &Mutex<ControlBindings>) {
    let midi: Vec<(u8, u8, u8)> = root.ports[0]
        .voice(0)
        .inner_events()
        .iter()
        .filter(|e| e.ty == MIDI_EVENT && e.body.len() == 3)
        .map(|e| (e.body[0], e.body[1], e.body[2]))
        .collect();
    if midi.is_empty() {
        return;
    }
    let writes = control_bindings.lock().process_incoming(midi);
    for write in writes {
        let Some(target) = Store::resolve_mut(root, &write.port_path) else { continue };
        let Some(port) = target.ports.get_mut(write.port_index as usize) else { continue };
        port.stored_value = write.value;
        port.voice_mut(0).set_control_value(write.value);
    }
}

/// Reads every feedback-flagged binding's port and queues the resulting CC
/// bytes on the root `control_out` port (spec.md §4.8: "post_process ...
/// reads port values flagged feedback and emits CC events").
fn emit_feedback_midi(root: &mut Block, control_bindings: &Mutex<ControlBindings>) {
    let feedback = control_bindings.lock().process_feedback(|path, index| {
        let target = Store::resolve(root, path)?;
        let port = target.ports.get(index as usize)?;
        Some(port.voice(0).control_value())
    });
    if feedback.is_empty() {
        return;
    }
    let control_out = root.ports[1].voice_mut(0);
    for cc in feedback {
        let status = 0xB0 | (cc.channel & 0x0F);
        control_out.append_event(0, MIDI_EVENT, &[status, cc.controller, cc.value]);
    }
}

fn schedule_mode(worker_count: usize) -> ingen_graph::ScheduleMode {
    if worker_count == 0 {
        ingen_graph::ScheduleMode::Serial
    } else {
        ingen_graph::ScheduleMode::Parallel { worker_count }
    }
}

/// The root graph's own ports: the two sequence control ports every graph
/// carries, plus one audio port per host channel, mirroring the device
/// (spec.md §6 "creates host audio/event ports mirroring root graph
/// ports").
fn root_ports(factory: &BufferFactory, poly: usize, num_inputs: usize, num_outputs: usize) -> Vec<Port> {
    let mut index = 0;
    let mut ports = vec![
        Port::new(PortType::Sequence, PortDirection::Input, index, Symbol::new("control_in").unwrap(), poly, factory, ingen_graph::defaults::SEQUENCE_BUFFER_BYTES),
    ];
    index += 1;
    ports.push(Port::new(PortType::Sequence, PortDirection::Output, index, Symbol::new("control_out").unwrap(), poly, factory, ingen_graph::defaults::SEQUENCE_BUFFER_BYTES));
    index += 1;
    for i in 0..num_inputs {
        ports.push(Port::new(
            PortType::Audio,
            PortDirection::Input,
            index,
            Symbol::new(format!("audio_in_{i}")).unwrap(),
            poly,
            factory,
            ingen_graph::defaults::MAX_BLOCK_SIZE,
        ));
        index += 1;
    }
    for i in 0..num_outputs {
        ports.push(Port::new(
            PortType::Audio,
            PortDirection::Output,
            index,
            Symbol::new(format!("audio_out_{i}")).unwrap(),
            poly,
            factory,
            ingen_graph::defaults::MAX_BLOCK_SIZE,
        ));
        index += 1;
    }
    ports
}

fn write_audio_inputs(root: &mut Block, inputs: &[f32], num_inputs: usize, nframes: usize) {
    if inputs.is_empty() || num_inputs == 0 {
        return;
    }
    for (i, port) in root.ports.iter_mut().skip(2).take(num_inputs).enumerate() {
        let voice = port.voice_mut(0);
        let samples = voice.audio_samples_mut();
        for frame in 0..nframes.min(inputs.len() / num_inputs.max(1)).min(samples.len()) {
            samples[frame] = inputs[frame * num_inputs + i];
        }
    }
}

fn read_audio_outputs(root: &Block, outputs: &mut [f32], num_inputs: usize, num_outputs: usize, nframes: usize) {
    outputs.fill(0.0);
    if num_outputs == 0 {
        return;
    }
    for (i, port) in root.ports.iter().skip(2 + num_inputs).take(num_outputs).enumerate() {
        let samples = port.voice(0).audio_samples();
        for frame in 0..nframes.min(outputs.len() / num_outputs.max(1)).min(samples.len()) {
            outputs[frame * num_outputs + i] = samples[frame];
        }
    }
}

/// Validates a plugin lookup exists before the pipeline's own preprocessor
/// gets a chance to report `Status::PrototypeNotFound` asynchronously;
/// used by demos that want an immediate, synchronous check.
pub fn plugin_exists(plugin_host: &dyn PluginHost, uri: &Uri) -> bool {
    plugin_host.lookup_plugin(uri).is_some()
}
