//! The five built-in plugins every engine instance can instantiate without
//! an external `PluginHost` (spec.md §3 "Plugin": "internal: block-delay,
//! controller, note, time, trigger").
//!
//! Grounded on `InternalPlugin::instantiate` (`original_source/src/server/
//! InternalPlugin.cpp`), which dispatches on URI to one of exactly these
//! five node types. Each one here is a small [`crate::BlockImpl`] with no
//! dependency on an external host, in the teacher's style of a Gen with a
//! fixed, small amount of per-instance state (`knaster_core_dsp` node
//! shapes, minus the DSP bodies this workspace doesn't carry).

mod block_delay;
mod controller;
mod note;
mod time;
mod trigger;

pub use block_delay::BlockDelay;
pub use controller::Controller;
pub use note::Note;
pub use time::Time;
pub use trigger::Trigger;

use ingen_primitives::{Symbol, Uri};

use crate::{BlockImpl, Direction, Plugin, PluginHost, PluginType, PortKind, PortLayout, Status};

/// The base URI internal plugin identifiers are minted under, matching the
/// original `NS_INTERNALS` namespace.
pub const NS_INTERNALS: &str = "http://drobilla.net/ns/ingen-internals#";

fn plugin(name: &str) -> Plugin {
    Plugin::new(
        Uri::new(format!("{NS_INTERNALS}{name}")),
        PluginType::Internal,
        Symbol::new(name.to_ascii_lowercase()).expect("internal plugin names are valid symbols"),
    )
}

/// Descriptors for all five built-ins, in the order `InternalPlugin`
/// dispatches them.
pub fn descriptors() -> [Plugin; 5] {
    [
        plugin("BlockDelay"),
        plugin("Controller"),
        plugin("Note"),
        plugin("Time"),
        plugin("Trigger"),
    ]
}

fn short_name(uri: &Uri) -> Option<&str> {
    uri.as_str().strip_prefix(NS_INTERNALS)
}

/// The [`PluginHost`] every engine instance carries regardless of whether an
/// external host is attached, dispatching the five URIs [`descriptors`]
/// names (spec.md §3: "internal: block-delay, controller, note, time,
/// trigger"). Grounded directly on `InternalPlugin::instantiate`
/// (`original_source/src/server/InternalPlugin.cpp`)'s URI-string dispatch.
#[derive(Default)]
pub struct InternalPluginHost;

impl PluginHost for InternalPluginHost {
    fn lookup_plugin(&self, uri: &Uri) -> Option<Plugin> {
        descriptors().into_iter().find(|p| &p.uri == uri)
    }

    fn port_layout(&self, plugin: &Plugin) -> Option<Vec<PortLayout>> {
        use Direction::{Input, Output};
        use PortKind::{Audio, Control, Sequence};
        match short_name(&plugin.uri)? {
            "BlockDelay" => Some(vec![
                PortLayout { kind: Audio, direction: Input, symbol: "in" },
                PortLayout { kind: Audio, direction: Output, symbol: "out" },
            ]),
            "Controller" => Some(vec![
                PortLayout { kind: Sequence, direction: Input, symbol: "midi_in" },
                PortLayout { kind: Control, direction: Output, symbol: "value" },
            ]),
            "Note" => Some(vec![
                PortLayout { kind: Sequence, direction: Input, symbol: "midi_in" },
                PortLayout { kind: Control, direction: Output, symbol: "freq" },
                PortLayout { kind: Control, direction: Output, symbol: "gate" },
                PortLayout { kind: Control, direction: Output, symbol: "velocity" },
            ]),
            "Time" => Some(vec![PortLayout { kind: Control, direction: Output, symbol: "elapsed" }]),
            "Trigger" => Some(vec![
                PortLayout { kind: Sequence, direction: Input, symbol: "midi_in" },
                PortLayout { kind: Audio, direction: Output, symbol: "out" },
            ]),
            _ => None,
        }
    }

    fn instantiate(&self, plugin: &Plugin, sample_rate: f64, max_block_size: u32) -> Result<Box<dyn BlockImpl>, Status> {
        let mut impl_: Box<dyn BlockImpl> = match short_name(&plugin.uri).ok_or(Status::PrototypeNotFound)? {
            "BlockDelay" => Box::new(BlockDelay::default()),
            "Controller" => Box::new(Controller::new(7)),
            "Note" => Box::new(Note::default()),
            "Time" => Box::new(Time::default()),
            "Trigger" => Box::new(Trigger::default()),
            _ => return Err(Status::PrototypeNotFound),
        };
        impl_.activate(sample_rate, max_block_size)?;
        Ok(impl_)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_host_instantiates_every_descriptor() {
        let host = InternalPluginHost;
        for d in descriptors() {
            let layout = host.port_layout(&d).expect("every internal plugin declares its ports");
            assert!(!layout.is_empty());
            assert!(host.instantiate(&d, 48_000.0, 64).is_ok());
        }
    }

    #[test]
    fn descriptors_are_distinct_and_internal() {
        let ds = descriptors();
        for d in &ds {
            assert_eq!(d.ty, PluginType::Internal);
        }
        let mut uris: Vec<_> = ds.iter().map(|d| d.uri.as_str()).collect();
        uris.sort_unstable();
        uris.dedup();
        assert_eq!(uris.len(), 5);
    }
}
