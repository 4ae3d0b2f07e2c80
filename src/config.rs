use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Minimum recognition-engine confidence
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Minimum match score for a candidate to be accepted
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    /// Required lead of the best candidate over the runner-up
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f64,
    #[serde(default = "default_literal_weight")]
    pub literal_weight: f64,
    #[serde(default = "default_slot_weight")]
    pub slot_weight: f64,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_seconds: f64,
    #[serde(default)]
    pub wake_word_enabled: bool,
    #[serde(default = "default_wake_word")]
    pub wake_word: String,
    #[serde(default = "default_exit_phrases")]
    pub exit_phrases: Vec<String>,
    #[serde(default = "default_cancel_phrases")]
    pub cancel_phrases: Vec<String>,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub input: InputConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Typed utterances on stdin
    Console,
    /// Microphone + HTTP ASR service
    Microphone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "default_source")]
    pub source: SourceKind,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub asr_config_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// RMS energy threshold
    #[serde(default = "default_speech_threshold")]
    pub speech_threshold: f32,
    /// Silence that ends an utterance (ms)
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_ms: u64,
    /// Shorter segments are dropped (ms)
    #[serde(default = "default_min_speech_duration")]
    pub min_speech_duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    /// Paste through the clipboard instead of synthesizing keystrokes
    #[serde(default)]
    pub use_clipboard: bool,
}

fn default_confidence_threshold() -> f64 {
    0.5
}
fn default_match_threshold() -> f64 {
    0.5
}
fn default_ambiguity_margin() -> f64 {
    0.1
}
fn default_literal_weight() -> f64 {
    0.7
}
fn default_slot_weight() -> f64 {
    0.3
}
fn default_confirmation_timeout() -> f64 {
    15.0
}
fn default_wake_word() -> String {
    "hey computer".to_string()
}
fn default_exit_phrases() -> Vec<String> {
    ["stop listening", "exit", "quit", "goodbye"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_cancel_phrases() -> Vec<String> {
    vec!["cancel".to_string(), "never mind".to_string()]
}
fn default_source() -> SourceKind {
    SourceKind::Console
}
fn default_server_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_speech_threshold() -> f32 {
    0.03
}
fn default_silence_timeout() -> u64 {
    800
}
fn default_min_speech_duration() -> u64 {
    300
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            match_threshold: default_match_threshold(),
            ambiguity_margin: default_ambiguity_margin(),
            literal_weight: default_literal_weight(),
            slot_weight: default_slot_weight(),
            confirmation_timeout_seconds: default_confirmation_timeout(),
            wake_word_enabled: false,
            wake_word: default_wake_word(),
            exit_phrases: default_exit_phrases(),
            cancel_phrases: default_cancel_phrases(),
            speech: SpeechConfig::default(),
            vad: VadConfig::default(),
            input: InputConfig::default(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            server_url: default_server_url(),
            asr_config_id: String::new(),
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: default_speech_threshold(),
            silence_timeout_ms: default_silence_timeout(),
            min_speech_duration_ms: default_min_speech_duration(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = [
            ("confidence_threshold", self.confidence_threshold),
            ("match_threshold", self.match_threshold),
            ("ambiguity_margin", self.ambiguity_margin),
            ("literal_weight", self.literal_weight),
            ("slot_weight", self.slot_weight),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidSetting(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.literal_weight + self.slot_weight > 1.0 + 1e-9 {
            return Err(ConfigError::InvalidSetting(
                "literal_weight + slot_weight must not exceed 1".to_string(),
            ));
        }
        let timeout = self.confirmation_timeout_seconds;
        if !(timeout.is_finite() && timeout > 0.0) {
            return Err(ConfigError::InvalidSetting(format!(
                "confirmation_timeout_seconds must be positive, got {}",
                self.confirmation_timeout_seconds
            )));
        }
        if self.wake_word_enabled && self.wake_word.trim().is_empty() {
            return Err(ConfigError::InvalidSetting(
                "wake_word must not be empty when wake_word_enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.confirmation_timeout_seconds)
    }
}

/// Command-template document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsDocument {
    /// Vocabulary name → spoken word → resolved value
    #[serde(default)]
    pub vocabularies: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub commands: Vec<CommandEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEntry {
    pub id: String,
    pub patterns: Vec<String>,
    #[serde(default)]
    pub destructive: bool,
    pub handler: String,
    /// Static parameters handed to the handler with every invocation
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl CommandsDocument {
    /// Expands `{username}` and a leading `~` in vocabulary values.
    pub fn expand_vocabularies(&mut self) {
        let username = std::env::var("USERNAME")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "User".to_string());
        let home = dirs::home_dir();
        for words in self.vocabularies.values_mut() {
            for value in words.values_mut() {
                let mut expanded = value.replace("{username}", &username);
                if let Some(home) = &home {
                    if expanded == "~" {
                        expanded = home.display().to_string();
                    } else if let Some(rest) = expanded.strip_prefix("~/") {
                        expanded = home.join(rest).display().to_string();
                    }
                }
                *value = expanded;
            }
        }
    }
}

/// Configuration directory: `$VOICE_NAV_CONFIG_DIR` or the platform config dir
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("VOICE_NAV_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voice-nav")
}

/// Prefers `<stem>.json` when present, otherwise `<stem>.toml`.
fn document_path(dir: &Path, stem: &str) -> PathBuf {
    let json = dir.join(format!("{stem}.json"));
    if json.exists() {
        json
    } else {
        dir.join(format!("{stem}.toml"))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = if is_json(path) {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    } else {
        toml::from_str(&content).map_err(|e| e.to_string())
    };
    parsed.map_err(|detail| ConfigError::Parse {
        path: path.to_path_buf(),
        detail,
    })
}

pub fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let content = if is_json(path) {
        serde_json::to_string_pretty(document).map_err(|e| e.to_string())
    } else {
        toml::to_string_pretty(document).map_err(|e| e.to_string())
    }
    .map_err(|detail| ConfigError::Parse {
        path: path.to_path_buf(),
        detail,
    })?;
    fs::write(path, content).map_err(io_err)
}

/// Loads and validates settings, writing defaults on first run.
pub fn load_settings(dir: &Path) -> Result<Settings, ConfigError> {
    let path = document_path(dir, "settings");
    let settings = if path.exists() {
        read_document(&path)?
    } else {
        let settings = Settings::default();
        write_document(&path, &settings)?;
        log::info!("wrote default settings to {}", path.display());
        settings
    };
    settings.validate()?;
    Ok(settings)
}

/// Loads the command document, writing the default command set on first run.
pub fn load_commands(dir: &Path) -> Result<CommandsDocument, ConfigError> {
    let path = document_path(dir, "commands");
    let mut document = if path.exists() {
        read_document(&path)?
    } else {
        let document = default_commands();
        write_document(&path, &document)?;
        log::info!("wrote default commands to {}", path.display());
        document
    };
    document.expand_vocabularies();
    Ok(document)
}

fn entry(id: &str, patterns: &[&str], handler: &str) -> CommandEntry {
    CommandEntry {
        id: id.to_string(),
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        destructive: false,
        handler: handler.to_string(),
        params: BTreeMap::new(),
    }
}

fn program(id: &str, patterns: &[&str], cmd: &str, args: &[&str]) -> CommandEntry {
    let mut e = entry(id, patterns, "run_program");
    e.params.insert("program".to_string(), json!(cmd));
    e.params.insert("args".to_string(), json!(args));
    e
}

fn shortcut(id: &str, patterns: &[&str], keys: &str) -> CommandEntry {
    let mut e = entry(id, patterns, "shortcut");
    e.params.insert("keys".to_string(), json!(keys));
    e
}

fn destructive(mut e: CommandEntry) -> CommandEntry {
    e.destructive = true;
    e
}

fn words(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Default command set
pub fn default_commands() -> CommandsDocument {
    let mut vocabularies = BTreeMap::new();
    vocabularies.insert(
        "applications".to_string(),
        words(&[
            ("chrome", "google-chrome"),
            ("firefox", "firefox"),
            ("visual studio code", "code"),
            ("terminal", "x-terminal-emulator"),
            ("calculator", "gnome-calculator"),
            ("text editor", "gedit"),
            ("files", "nautilus"),
        ]),
    );
    vocabularies.insert(
        "folders".to_string(),
        words(&[
            ("downloads", "~/Downloads"),
            ("documents", "~/Documents"),
            ("desktop", "~/Desktop"),
            ("pictures", "~/Pictures"),
            ("music", "~/Music"),
            ("videos", "~/Videos"),
            ("home", "~"),
        ]),
    );

    let commands = vec![
        entry(
            "open_app",
            &[
                "open {app:applications}",
                "launch {app:applications}",
                "start {app:applications}",
            ],
            "open_app",
        ),
        program("close_app", &["close {app:applications}"], "pkill", &["-f", "{app}"]),
        entry(
            "open_folder",
            &["open {folder:folders}", "open {folder:folders} folder"],
            "open_folder",
        ),
        entry(
            "create_folder",
            &[
                "create folder {name}",
                "make folder {name}",
                "new folder {name}",
                "create a folder called {name}",
                "create a folder named {name}",
            ],
            "create_folder",
        ),
        destructive(entry(
            "delete_folder",
            &["delete folder {name}", "remove folder {name}"],
            "delete_folder",
        )),
        entry("type_text", &["type {text}", "dictate {text}"], "type_text"),
        entry(
            "web_search",
            &["search for {query}", "search {query}", "google {query}", "look up {query}"],
            "web_search",
        ),
        entry(
            "open_url",
            &["go to {site}", "open website {site}", "navigate to {site}"],
            "open_url",
        ),
        program(
            "volume_up",
            &["volume up", "turn up the volume", "increase volume", "louder"],
            "pactl",
            &["set-sink-volume", "@DEFAULT_SINK@", "+10%"],
        ),
        program(
            "volume_down",
            &["volume down", "turn down the volume", "decrease volume", "quieter"],
            "pactl",
            &["set-sink-volume", "@DEFAULT_SINK@", "-10%"],
        ),
        program(
            "mute",
            &["mute", "unmute", "mute volume"],
            "pactl",
            &["set-sink-mute", "@DEFAULT_SINK@", "toggle"],
        ),
        program(
            "screenshot",
            &["take screenshot", "take a screenshot", "screenshot"],
            "gnome-screenshot",
            &[],
        ),
        program(
            "lock",
            &["lock computer", "lock the computer", "lock screen"],
            "loginctl",
            &["lock-session"],
        ),
        destructive(program(
            "shutdown",
            &["shut down", "shutdown", "power off"],
            "systemctl",
            &["poweroff"],
        )),
        destructive(program(
            "restart",
            &["restart", "restart computer", "reboot"],
            "systemctl",
            &["reboot"],
        )),
        shortcut(
            "show_desktop",
            &["show desktop", "minimize all", "minimize everything"],
            "META+D",
        ),
        shortcut("task_view", &["task view", "show all windows"], "META+TAB"),
        shortcut(
            "switch_window",
            &["switch window", "next window", "alt tab"],
            "ALT+TAB",
        ),
    ];

    CommandsDocument {
        vocabularies,
        commands,
    }
}
