use crate::error::SpeechError;
use reqwest::multipart;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AsrResponse {
    data: Option<AsrData>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsrData {
    text: String,
    /// Not every backend scores its transcripts
    #[serde(default)]
    confidence: Option<f64>,
}

/// Transcript of one recorded utterance
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub confidence: f64,
}

/// Sends a WAV recording to the recognition server.
pub async fn recognize(
    server_url: &str,
    asr_config_id: &str,
    wav_bytes: Vec<u8>,
) -> Result<Transcript, SpeechError> {
    let url = format!("{}/api/tasks/asr-recognize/sync", server_url.trim_end_matches('/'));

    let file_part = multipart::Part::bytes(wav_bytes)
        .file_name("recording.wav")
        .mime_str("audio/wav")
        .map_err(|e| SpeechError::Recognition(format!("build multipart: {e}")))?;

    let form = multipart::Form::new()
        .part("file", file_part)
        .text("asrConfigId", asr_config_id.to_string());

    let client = reqwest::Client::new();
    let resp = client
        .post(&url)
        .multipart(form)
        .send()
        .await
        .map_err(|e| SpeechError::Recognition(format!("request failed: {e}")))?;

    if !resp.status().is_success() {
        return Err(SpeechError::Recognition(format!(
            "server returned {}",
            resp.status()
        )));
    }

    let body: AsrResponse = resp
        .json()
        .await
        .map_err(|e| SpeechError::Recognition(format!("bad response: {e}")))?;

    transcript(body)
}

fn transcript(body: AsrResponse) -> Result<Transcript, SpeechError> {
    if let Some(err) = body.error {
        return Err(SpeechError::Recognition(err));
    }
    body.data
        .map(|d| Transcript {
            text: d.text,
            confidence: d.confidence.unwrap_or(1.0),
        })
        .ok_or_else(|| SpeechError::Recognition("response has no data".to_string()))
}
