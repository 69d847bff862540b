//! Builds a trigger → block-delay chain and runs it against the default
//! CPAL output device for a few seconds, to hear that a cycle actually
//! moves data end to end. Mirrors `knaster`'s own `simple_sine` example.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ingen::{Engine, EngineOptions};
use ingen_core::internal_plugins::InternalPluginHost;
use ingen_graph::audio_backend::cpal::{CpalBackend, CpalBackendOptions};
use ingen_graph::audio_backend::AudioBackend;
use ingen_graph::{ClientId, Event, EventReply};
use ingen_primitives::{Path, Uri};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut backend = CpalBackend::new(CpalBackendOptions::default())?;
    let num_outputs = backend.num_outputs();

    let engine = Engine::new(
        EngineOptions::default(),
        Arc::new(InternalPluginHost),
        0,
        num_outputs,
        Arc::new(|_client: ClientId, reply: EventReply| log::debug!("reply: {reply:?}")),
    );

    engine.submit(
        Event::CreateBlock {
            path: Path::parse("/trig").unwrap(),
            plugin_uri: Uri::new("http://drobilla.net/ns/ingen-internals#Trigger"),
            poly: 1,
        },
        0,
    );
    engine.submit(
        Event::CreateBlock {
            path: Path::parse("/delay").unwrap(),
            plugin_uri: Uri::new("http://drobilla.net/ns/ingen-internals#BlockDelay"),
            poly: 1,
        },
        0,
    );
    engine.submit(
        Event::Connect {
            tail: Path::parse("/trig").unwrap(),
            tail_port: ingen_primitives::Symbol::new("out").unwrap(),
            head: Path::parse("/delay").unwrap(),
            head_port: ingen_primitives::Symbol::new("in").unwrap(),
        },
        0,
    );

    // Let the preprocessor thread catch up before the audio thread starts.
    thread::sleep(Duration::from_millis(50));

    engine.run(&mut backend)?;
    thread::sleep(Duration::from_secs(2));
    backend.stop()?;
    Ok(())
}
