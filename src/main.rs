fn main() {
    if let Err(e) = voice_nav_lib::run() {
        log::error!("{e}");
        eprintln!("voice-nav: {e}");
        std::process::exit(1);
    }
}
