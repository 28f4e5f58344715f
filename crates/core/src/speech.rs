//! Speech Synthesis
//!
//! Turns reply text into audio through one of three providers. The provider is
//! chosen explicitly by configuration; each has its own default voice, and
//! ElevenLabs voices carry per-voice tuning looked up from [`VOICE_TUNINGS`].

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const ELEVEN_LABS_DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech/";
pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const GOOGLE_DEFAULT_BASE_URL: &str = "https://texttospeech.googleapis.com/v1beta1";

const ELEVEN_LABS_MODEL: &str = "eleven_multilingual_v2";
const OPENAI_TTS_MODEL: &str = "gpt-4o-mini-tts";

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("Speech request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Speech provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Speech provider returned no audio content")]
    MissingAudio,
    #[error("Speech provider returned invalid audio encoding: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Defines the supported speech synthesis providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeechProvider {
    ElevenLabs,
    OpenAI,
    Google,
}

impl SpeechProvider {
    /// The voice used when a request names none.
    pub fn default_voice(&self) -> &'static str {
        match self {
            SpeechProvider::ElevenLabs => "EGQM7bHbTHTb7VUEcOHG",
            SpeechProvider::OpenAI => "alloy",
            SpeechProvider::Google => "en-IN-Chirp3-HD-Aoede",
        }
    }
}

/// Converts text into encoded audio (MP3).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// `voice` falls back to the synthesizer's default voice when `None`.
    async fn synthesize(
        &self,
        text: &str,
        speed: f32,
        voice: Option<&str>,
    ) -> Result<Vec<u8>, SpeechError>;
}

/// ElevenLabs voice settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceTuning {
    pub stability: f32,
    pub similarity_boost: f32,
}

pub const DEFAULT_VOICE_TUNING: VoiceTuning = VoiceTuning {
    stability: 0.36,
    similarity_boost: 0.47,
};

/// Tuned settings for the ElevenLabs voices the tutor ships with.
pub const VOICE_TUNINGS: &[(&str, VoiceTuning)] = &[
    // shakuntala
    ("EGQM7bHbTHTb7VUEcOHG", VoiceTuning { stability: 0.36, similarity_boost: 0.41 }),
    // alisha
    ("ftDdhfYtmfGP0tFlBYA1", VoiceTuning { stability: 0.5, similarity_boost: 0.6 }),
    // kavya
    ("SpknCRN08oLyKbJFn5e5", VoiceTuning { stability: 0.4, similarity_boost: 0.34 }),
    // ruhan
    ("siw1N9V8LmYeEWKyWBxv", VoiceTuning { stability: 0.54, similarity_boost: 0.4 }),
    // mitali
    ("TM6EiVdUQXAy4w6qOvOq", VoiceTuning { stability: 0.45, similarity_boost: 0.6 }),
    // indya
    ("8Bn4GxPHXGtRW9zlnmDb", VoiceTuning { stability: 0.4, similarity_boost: 0.3 }),
    // natasha
    ("DJDkcaY4POaxra3iaZ5b", VoiceTuning { stability: 0.44, similarity_boost: 0.31 }),
];

pub fn voice_tuning(voice: &str) -> VoiceTuning {
    VOICE_TUNINGS
        .iter()
        .find(|(id, _)| *id == voice)
        .map(|(_, tuning)| *tuning)
        .unwrap_or(DEFAULT_VOICE_TUNING)
}

#[derive(Serialize)]
struct ElevenLabsVoiceSettings {
    stability: f32,
    similarity_boost: f32,
    speed: f32,
}

#[derive(Serialize)]
struct ElevenLabsRequest<'a> {
    model_id: &'static str,
    text: &'a str,
    voice_settings: ElevenLabsVoiceSettings,
}

pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_voice: String,
}

impl ElevenLabsSynthesizer {
    /// `base_url` is joined directly with the voice id, so it should end in `/`.
    pub fn new(api_key: String, base_url: String, default_voice: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            default_voice,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        speed: f32,
        voice: Option<&str>,
    ) -> Result<Vec<u8>, SpeechError> {
        let voice = voice.unwrap_or(self.default_voice.as_str());
        let tuning = voice_tuning(voice);
        let body = ElevenLabsRequest {
            model_id: ELEVEN_LABS_MODEL,
            text,
            voice_settings: ElevenLabsVoiceSettings {
                stability: tuning.stability,
                similarity_boost: tuning.similarity_boost,
                speed,
            },
        };

        debug!(%voice, chars = text.len(), "Requesting ElevenLabs speech");
        let response = self
            .client
            .post(format!("{}{}", self.base_url, voice))
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        read_audio(response).await
    }
}

#[derive(Serialize)]
struct OpenAISpeechRequest<'a> {
    model: &'static str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'static str,
}

pub struct OpenAISpeechSynthesizer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAISpeechSynthesizer {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAISpeechSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        speed: f32,
        voice: Option<&str>,
    ) -> Result<Vec<u8>, SpeechError> {
        let voice = voice.unwrap_or(SpeechProvider::OpenAI.default_voice());
        let body = OpenAISpeechRequest {
            model: OPENAI_TTS_MODEL,
            input: text,
            voice,
            speed,
            response_format: "mp3",
        };

        debug!(%voice, chars = text.len(), "Requesting OpenAI speech");
        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        read_audio(response).await
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleSpeechRequest<'a> {
    input: GoogleInput<'a>,
    voice: GoogleVoice<'a>,
    audio_config: GoogleAudioConfig,
}

#[derive(Serialize)]
struct GoogleInput<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleVoice<'a> {
    language_code: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleAudioConfig {
    audio_encoding: &'static str,
    effects_profile_id: Vec<&'static str>,
    pitch: f32,
    speaking_rate: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleSpeechResponse {
    audio_content: Option<String>,
}

pub struct GoogleSpeechSynthesizer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleSpeechSynthesizer {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

/// `en-IN-Chirp3-HD-Aoede` speaks `en-IN`; names without an English locale
/// prefix default to Indian English.
fn google_language_code(voice: &str) -> &str {
    match voice.get(..5) {
        Some(code) if voice.starts_with("en-") => code,
        _ => "en-IN",
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleSpeechSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        speed: f32,
        voice: Option<&str>,
    ) -> Result<Vec<u8>, SpeechError> {
        let voice = voice.unwrap_or(SpeechProvider::Google.default_voice());
        let body = GoogleSpeechRequest {
            input: GoogleInput { text },
            voice: GoogleVoice {
                language_code: google_language_code(voice),
                name: voice,
            },
            audio_config: GoogleAudioConfig {
                audio_encoding: "MP3",
                effects_profile_id: vec!["handset-class-device"],
                pitch: 0.0,
                speaking_rate: speed,
            },
        };

        debug!(%voice, chars = text.len(), "Requesting Google speech");
        let response = self
            .client
            .post(format!("{}/text:synthesize", self.base_url.trim_end_matches('/')))
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let payload: GoogleSpeechResponse = response.json().await?;
        let encoded = payload.audio_content.ok_or(SpeechError::MissingAudio)?;
        Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SpeechError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SpeechError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_audio(response: reqwest::Response) -> Result<Vec<u8>, SpeechError> {
    let bytes = check_status(response).await?.bytes().await?;
    if bytes.is_empty() {
        return Err(SpeechError::MissingAudio);
    }
    Ok(bytes.to_vec())
}

/// Prepares reply text for a speech engine: drops math delimiters and markdown
/// markers and collapses whitespace.
pub fn spoken_text(text: &str) -> String {
    let mut cleaned = text.to_string();
    for marker in ["\\(", "\\)", "\\[", "\\]", "$$", "**", "__", "```", "`"] {
        cleaned = cleaned.replace(marker, " ");
    }
    cleaned
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches('#')
                .trim_start_matches("- ")
                .trim()
        })
        .filter(|line| !line.is_empty())
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
