//! Plugin descriptors and the `BlockImpl` contract, spec.md §3 "Plugin" and
//! §6 "PluginHost".
//!
//! Grounded on `knaster_core::Gen`: the teacher's audio-thread trait is a
//! `process(ctx)` call against buffers already wired up before the cycle
//! starts. Here wiring (`connect_port`) and execution (`run`) are split into
//! two calls, matching the LV2-descriptor shape the original C++ engine
//! hosts (`original_source/`'s `LV2Info`/plugin instantiation): a plugin
//! connects its ports once per graph compilation, then just runs each
//! cycle without touching the graph again.

use ingen_primitives::{PortBuffer, Uri};

use crate::Status;

/// Where a block's implementation comes from (spec.md §3 "Plugin").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PluginType {
    /// Hosted through [`crate::PluginHost`] (e.g. an LV2 bundle on disk).
    External,
    /// One of the built-ins in [`crate::internal_plugins`].
    Internal,
    /// A saved subgraph instantiated as a block (spec.md §3 "Graph" doubles
    /// as "Plugin").
    Graph,
}

/// A loadable unit of DSP behavior: the prototype a `Block` is created
/// from (spec.md §3 "Plugin": `{uri, type, symbol}`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plugin {
    pub uri: Uri,
    pub ty: PluginType,
    /// A short, host-facing identifier distinct from `uri` (e.g.
    /// `"trigger"` for `internal:Trigger`).
    pub symbol: ingen_primitives::Symbol,
}
impl Plugin {
    pub fn new(uri: Uri, ty: PluginType, symbol: ingen_primitives::Symbol) -> Self {
        Self { uri, ty, symbol }
    }
}

/// Static port-shape info a `PluginHost` exposes per port index, used to
/// size buffers before `connect_port` is called.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortKind {
    Audio,
    Control,
    Cv,
    Sequence,
}

/// One running instance of a [`Plugin`], driven entirely from the audio
/// thread once activated.
///
/// # RT-safety
/// `run` must not allocate, lock, or block. `activate`/`deactivate`/
/// `connect_port` run off the audio thread, during `pre_process`, and may do
/// whatever they need to (spec.md §4.1 "pre_process").
pub trait BlockImpl: Send {
    /// Called once, off the audio thread, before the first `run`.
    fn activate(&mut self, sample_rate: f64, max_block_size: u32) -> Result<(), Status>;

    /// Called when the block is removed from the running graph, or before
    /// re-activation with different parameters.
    fn deactivate(&mut self) {}

    /// Binds port `index` to a location the implementation reads or writes
    /// every subsequent `run`, replacing any previous binding for that
    /// index.
    ///
    /// # Safety
    /// `buffer` must stay valid and exclusively owned by this call site
    /// until either `run` returns for the last time it's used, or
    /// `connect_port` rebinds the same index.
    unsafe fn connect_port(&mut self, index: u32, buffer: PortBuffer);

    /// Processes `nframes` frames using the buffers from the most recent
    /// `connect_port` call on each index.
    fn run(&mut self, nframes: u32);
}

/// Which way data flows through a port a host declares for a plugin, ahead
/// of any block existing to hold it (spec.md §6 PluginHost: the host knows
/// a plugin's port shape before `instantiate` is ever called).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// One port a plugin declares, in connect_port index order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortLayout {
    pub kind: PortKind,
    pub direction: Direction,
    pub symbol: &'static str,
}

/// The host-facing lookup/instantiation surface (spec.md §6 "Collaborator:
/// PluginHost"): "provides `lookup_plugin(uri) → Plugin`,
/// `instantiate(plugin, sample_rate, features) → BlockImpl`".
///
/// `features` in the spec text (the URID map and log sink) are threaded
/// through as plain constructor arguments here rather than a generic bag,
/// since this workspace has exactly two features any host needs: a sample
/// rate/block-size pair for `activate`, passed directly to `instantiate`.
pub trait PluginHost: Send + Sync {
    fn lookup_plugin(&self, uri: &Uri) -> Option<Plugin>;
    /// The port shape `instantiate` will wire up, in `connect_port` index
    /// order. `CreateBlock` uses this to build the block's `Port`s before
    /// the implementation exists to connect them to.
    fn port_layout(&self, plugin: &Plugin) -> Option<Vec<PortLayout>>;
    fn instantiate(&self, plugin: &Plugin, sample_rate: f64, max_block_size: u32) -> Result<Box<dyn BlockImpl>, Status>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingen_primitives::Symbol;

    #[test]
    fn plugin_carries_its_identity() {
        let p = Plugin::new(
            Uri::new("internal:Trigger"),
            PluginType::Internal,
            Symbol::new("trigger").unwrap(),
        );
        assert_eq!(p.ty, PluginType::Internal);
        assert_eq!(p.symbol.as_str(), "trigger");
    }
}
