pub mod asr;
pub mod audio;
pub mod confidence;
pub mod config;
pub mod confirmation;
pub mod desktop;
pub mod dispatcher;
pub mod error;
pub mod feedback;
pub mod input_sim;
pub mod matcher;
pub mod registry;
pub mod session;
pub mod speech;
pub mod vad;

use audio::MicrophoneSource;
use config::{load_commands, load_settings, SourceKind};
use feedback::ConsoleFeedback;
use registry::Registry;
use session::Session;
use speech::ConsoleSource;
use std::sync::Arc;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let dir = config::config_dir();
    log::info!("config directory: {}", dir.display());
    let settings = load_settings(&dir)?;
    let document = load_commands(&dir)?;

    let handlers = desktop::default_handlers(&settings);
    let registry = Arc::new(Registry::load(&document, |id| handlers.contains(id))?);
    log::info!("{} commands registered", registry.lookup_all().len());

    match settings.speech.source {
        SourceKind::Console => {
            println!("Type a command (e.g. \"open chrome\"), or \"exit\" to quit.");
            let source = ConsoleSource::new();
            Session::new(&settings, registry, handlers, source, ConsoleFeedback).run();
        }
        SourceKind::Microphone => {
            let source = MicrophoneSource::open(&settings.speech, &settings.vad)?;
            Session::new(&settings, registry, handlers, source, ConsoleFeedback).run();
        }
    }
    Ok(())
}
