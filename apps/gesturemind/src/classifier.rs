use std::{
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use futures_util::future::BoxFuture;
use gesturemind_core::action::{QUOTA_EXCEEDED_MARKER, SIGNAL_ERROR_MARKER};
use gesturemind_core::{Action, ClassificationResult, Hand};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::settings::Settings;
use crate::trace::Span;

const KEYRING_SERVICE: &str = "gesturemind";
const KEYRING_USER: &str = "classifier_api_key";
const API_KEY_ENV: &str = "GESTUREMIND_API_KEY";
const BASE_URL_ENV: &str = "GESTUREMIND_LLM_BASE_URL";
const MODEL_ENV: &str = "GESTUREMIND_LLM_MODEL";

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_ERROR_BODY_CHARS: usize = 400;

pub const E_API_KEY_MISSING: &str = "E_CLASSIFIER_API_KEY_MISSING";
pub const E_QUOTA: &str = "E_CLASSIFIER_QUOTA";
pub const E_HTTP: &str = "E_CLASSIFIER_HTTP";
pub const E_PARSE: &str = "E_CLASSIFIER_PARSE";
pub const E_EMPTY: &str = "E_CLASSIFIER_EMPTY";

pub const SYSTEM_PROMPT: &str = r#"
You are a high-speed Neural Gesture Decoder for a device controller.
You will receive 21 hand landmarks (indices 0-20) with X and Y coordinates.
Coordinate system: Top-left is (0,0), Bottom-right is (1,1). Lower Y value means HIGHER in the air.

STRICT GESTURE MAPPING RULES (PRIORITY):
1. OPEN_YOUTUBE (Open Palm): All five fingers (Thumb 4, Index 8, Middle 12, Ring 16, Pinky 20) are EXTENDED. Their tips are much higher (lower Y) than their respective MCP joints (5, 9, 13, 17) and spread apart. This is a full open hand.
2. OPEN_GMAIL (Small Finger/Pinky): ONLY the Pinky (landmark 20) is extended high (lowest Y). The index (8), middle (12), and ring (16) fingers are curled down.
3. PLAY_SONG (Middle Finger): ONLY the Middle finger (landmark 12) is extended high. The index (8), ring (16), and pinky (20) are curled. This is the signal for YouTube Music.
4. PAUSE_SONG (O-Sign/Pinch): Thumb tip (4) and Index tip (8) are touching or very close (distance < 0.05). This is the pause signal.
5. VOLUME_UP (Thumbs Up): Thumb (4) is pointing straight up (lowest Y) and away from the palm.
6. VOLUME_DOWN (Thumbs Down): Thumb (4) is pointing down (highest Y), while other fingers are curled.
7. LOCK_SYSTEM (Fist): All fingers tightly curled toward the palm.

Return a JSON response with 'action' and 'reasoning'.
Actions: ['PLAY_SONG', 'PAUSE_SONG', 'VOLUME_UP', 'VOLUME_DOWN', 'OPEN_YOUTUBE', 'OPEN_GMAIL', 'LOCK_SYSTEM', 'NONE']
"#;

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyStatus {
    pub configured: bool,
    pub source: String, // env|memory|keyring
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierError {
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ClassifierError {}

fn err(code: &str, message: impl Into<String>) -> ClassifierError {
    ClassifierError {
        code: code.to_string(),
        message: message.into(),
    }
}

impl ClassifierError {
    pub fn is_quota(&self) -> bool {
        self.code == E_QUOTA
    }

    /// The verdict the control loop sees instead of an error.
    pub fn fallback_result(&self) -> ClassificationResult {
        if self.is_quota() {
            ClassificationResult::link_error(QUOTA_EXCEEDED_MARKER)
        } else {
            ClassificationResult::link_error(SIGNAL_ERROR_MARKER)
        }
    }
}

/// Seam between the control loop and the hosted model.
pub trait GestureClassifier: Send + Sync {
    fn classify<'a>(
        &'a self,
        hand: &'a Hand,
    ) -> BoxFuture<'a, Result<ClassificationResult, ClassifierError>>;
}

// ---- API key --------------------------------------------------------------

fn api_key_cache() -> &'static Mutex<Option<String>> {
    static CACHE: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(None))
}

fn set_api_key_memory(key: Option<&str>) {
    let mut g = api_key_cache().lock().unwrap_or_else(|e| e.into_inner());
    *g = key.map(str::to_string).filter(|s| !s.trim().is_empty());
}

fn keyring_entry() -> Result<keyring::Entry> {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .map_err(|e| anyhow!("keyring entry init failed: {e:?}"))
}

/// Walks env, then the in-process cache, then the OS keyring.
fn resolve_api_key() -> (&'static str, Result<String>) {
    if let Ok(k) = std::env::var(API_KEY_ENV) {
        if !k.trim().is_empty() {
            return ("env", Ok(k));
        }
    }
    let cached = api_key_cache()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .filter(|s| !s.trim().is_empty());
    if let Some(k) = cached {
        return ("memory", Ok(k));
    }
    let from_keyring = keyring_entry().and_then(|entry| {
        let k = entry
            .get_password()
            .map_err(|e| anyhow!("keyring get failed: {e:?}"))?;
        if k.trim().is_empty() {
            return Err(anyhow!("empty"));
        }
        Ok(k)
    });
    ("keyring", from_keyring)
}

pub fn load_api_key() -> Result<String, ClassifierError> {
    resolve_api_key()
        .1
        .map_err(|e| err(E_API_KEY_MISSING, format!("{e:#}")))
}

pub fn set_api_key(key: &str) -> Result<()> {
    // The session keeps working even when the keyring cannot persist.
    set_api_key_memory(Some(key));
    keyring_entry()?
        .set_password(key)
        .map_err(|e| anyhow!("keyring set failed: {e:?}"))
}

pub fn clear_api_key() -> Result<()> {
    set_api_key_memory(None);
    // keyring v3 has no portable delete; empty means "not configured".
    let _ = keyring_entry()?.set_password("");
    Ok(())
}

pub fn api_key_status() -> ApiKeyStatus {
    let (source, key) = resolve_api_key();
    ApiKeyStatus {
        configured: key.is_ok(),
        source: source.to_string(),
        reason: key.err().map(|e| format!("{e:#}")),
    }
}

// ---- Config ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierConfig {
    pub base_url: String,
    pub model: String,
}

fn normalize_base_url(s: &str) -> String {
    let t = s.trim().trim_end_matches('/');
    if t.is_empty() {
        return DEFAULT_BASE_URL.to_string();
    }
    // A pasted full endpoint (".../models/<m>:generateContent") still works.
    let t = match t.find("/models/") {
        Some(i) => &t[..i],
        None => t,
    };
    t.trim_end_matches('/').to_string()
}

pub fn load_config(settings: &Settings) -> ClassifierConfig {
    let base_url = settings
        .llm_base_url
        .clone()
        .or_else(|| std::env::var(BASE_URL_ENV).ok())
        .unwrap_or_default();
    let model = settings
        .llm_model
        .clone()
        .or_else(|| std::env::var(MODEL_ENV).ok())
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    ClassifierConfig {
        base_url: normalize_base_url(&base_url),
        model: model.trim().to_string(),
    }
}

// ---- Wire format ----------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateReq<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}

#[derive(Debug, Deserialize)]
struct RespPart {
    text: Option<String>,
}

fn response_schema() -> Value {
    let labels: Vec<&str> = Action::ALL.iter().map(|a| a.as_str()).collect();
    json!({
        "type": "OBJECT",
        "properties": {
            "action": {"type": "STRING", "enum": labels},
            "reasoning": {"type": "STRING"},
        },
        "required": ["action", "reasoning"],
    })
}

pub fn user_prompt(hand: &Hand) -> String {
    // Serializing plain numbers cannot fail.
    let points = serde_json::to_string(&hand.indexed_points()).unwrap_or_default();
    format!("Hand Landmarks: {points}. Decipher the gesture.")
}

fn request_body(prompt: &str) -> GenerateReq<'_> {
    GenerateReq {
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: SYSTEM_PROMPT,
            }],
        },
        contents: vec![Content {
            role: Some("user"),
            parts: vec![Part { text: prompt }],
        }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
            response_schema: response_schema(),
        },
    }
}

fn strip_code_fence(s: &str) -> &str {
    let t = s.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_response(resp: GenerateResp) -> Result<ClassificationResult, ClassifierError> {
    let text: String = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    let body = strip_code_fence(&text);
    if body.is_empty() {
        return Err(err(E_EMPTY, "classifier returned no text"));
    }
    serde_json::from_str::<ClassificationResult>(body)
        .map_err(|e| err(E_PARSE, format!("verdict parse failed: {e}")))
}

fn status_error(status: StatusCode, body: &str) -> ClassifierError {
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return err(E_QUOTA, format!("http {status}: {body}"));
    }
    err(E_HTTP, format!("http {status}: {body}"))
}

// ---- Client ---------------------------------------------------------------

pub struct GeminiClassifier {
    client: Client,
    cfg: ClassifierConfig,
    data_dir: PathBuf,
    session_id: String,
}

impl GeminiClassifier {
    pub fn new(data_dir: &Path, session_id: &str, cfg: ClassifierConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build http client failed")?;
        Ok(Self {
            client,
            cfg,
            data_dir: data_dir.to_path_buf(),
            session_id: session_id.to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.cfg.base_url, self.cfg.model
        )
    }

    async fn classify_inner(&self, hand: &Hand) -> Result<ClassificationResult, ClassifierError> {
        let key = load_api_key()?;
        let prompt = user_prompt(hand);
        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", key)
            .json(&request_body(&prompt))
            .send()
            .await
            .map_err(|e| err(E_HTTP, format!("classifier request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        let r: GenerateResp = resp
            .json()
            .await
            .map_err(|e| err(E_PARSE, format!("classifier response parse failed: {e}")))?;
        parse_response(r)
    }
}

impl GestureClassifier for GeminiClassifier {
    fn classify<'a>(
        &'a self,
        hand: &'a Hand,
    ) -> BoxFuture<'a, Result<ClassificationResult, ClassifierError>> {
        Box::pin(async move {
            let span = Span::start(
                &self.data_dir,
                Some(&self.session_id),
                "Classify",
                "CLASSIFY.generate_content",
                Some(json!({"model": self.cfg.model, "base_url": self.cfg.base_url})),
            );
            let out = self.classify_inner(hand).await;
            match &out {
                Ok(r) => span.ok(Some(json!({
                    "action": r.action.as_str(),
                    "reasoning_chars": r.reasoning.len(),
                }))),
                Err(e) => span.err("http", &e.code, &e.message, None),
            }
            out
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gesturemind_core::{Landmark, HAND_LANDMARK_COUNT};

    fn hand() -> Hand {
        let pts = (0..HAND_LANDMARK_COUNT)
            .map(|i| Landmark::new(0.5, 0.01 * i as f64 + 0.00049))
            .collect();
        Hand::new(pts).unwrap()
    }

    fn resp(text: &str) -> GenerateResp {
        serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]
        }))
        .unwrap()
    }

    #[test]
    fn normalize_base_url_handles_empty_and_full_endpoint() {
        assert_eq!(normalize_base_url(""), DEFAULT_BASE_URL);
        assert_eq!(
            normalize_base_url(" https://example.test/v1beta/ "),
            "https://example.test/v1beta"
        );
        assert_eq!(
            normalize_base_url(
                "https://example.test/v1beta/models/gemini-x:generateContent"
            ),
            "https://example.test/v1beta"
        );
    }

    #[test]
    fn settings_take_precedence_for_model() {
        let s = Settings {
            llm_model: Some(" custom-model ".to_string()),
            ..Settings::default()
        };
        assert_eq!(load_config(&s).model, "custom-model");
    }

    #[test]
    fn user_prompt_embeds_rounded_indexed_points() {
        let p = user_prompt(&hand());
        assert!(p.starts_with("Hand Landmarks: [{\"i\":0,\"x\":0.5,\"y\":0.0}"));
        assert!(p.contains("{\"i\":20,\"x\":0.5,\"y\":0.2}"));
        assert!(p.ends_with(". Decipher the gesture."));
    }

    #[test]
    fn request_body_carries_prompt_and_schema() {
        let v = serde_json::to_value(request_body("hello")).unwrap();
        assert_eq!(v["contents"][0]["role"], "user");
        assert_eq!(v["contents"][0]["parts"][0]["text"], "hello");
        assert!(v["systemInstruction"].get("role").is_none());
        assert!(v["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("LOCK_SYSTEM (Fist)"));
        assert_eq!(
            v["generationConfig"]["responseMimeType"],
            "application/json"
        );
        let labels = v["generationConfig"]["responseSchema"]["properties"]["action"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(labels.len(), 8);
        assert!(labels.contains(&json!("NONE")));
    }

    #[test]
    fn parses_verdict_text() {
        let r = parse_response(resp(r#"{"action":"VOLUME_UP","reasoning":"thumb up"}"#)).unwrap();
        assert_eq!(r, ClassificationResult::new(Action::VolumeUp, "thumb up"));
    }

    #[test]
    fn parses_fenced_verdict_text() {
        let r = parse_response(resp(
            "```json\n{\"action\":\"LOCK_SYSTEM\",\"reasoning\":\"fist\"}\n```",
        ))
        .unwrap();
        assert_eq!(r.action, Action::LockSystem);
    }

    #[test]
    fn empty_or_garbage_text_is_an_error() {
        let e = parse_response(GenerateResp { candidates: vec![] }).unwrap_err();
        assert_eq!(e.code, E_EMPTY);
        let e = parse_response(resp("not json")).unwrap_err();
        assert_eq!(e.code, E_PARSE);
        assert_eq!(
            e.fallback_result().reasoning,
            "Neural Link Error: SIGNAL_ERROR"
        );
    }

    #[test]
    fn too_many_requests_maps_to_quota_marker() {
        let e = status_error(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(e.is_quota());
        let r = e.fallback_result();
        assert_eq!(r.action, Action::None);
        assert!(r.is_quota_exceeded());

        let e = status_error(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert_eq!(e.code, E_HTTP);
        assert!(!e.fallback_result().is_quota_exceeded());
    }

    #[test]
    fn endpoint_joins_base_and_model() {
        let td = tempfile::tempdir().unwrap();
        let c = GeminiClassifier::new(
            td.path(),
            "s",
            ClassifierConfig {
                base_url: "https://example.test/v1beta".to_string(),
                model: "m".to_string(),
            },
        )
        .unwrap();
        assert_eq!(
            c.endpoint(),
            "https://example.test/v1beta/models/m:generateContent"
        );
    }

    #[test]
    fn api_key_status_prefers_env_when_set() {
        std::env::set_var(API_KEY_ENV, "test-key");
        let st = api_key_status();
        assert!(st.configured);
        assert_eq!(st.source, "env");
        assert_eq!(load_api_key().unwrap(), "test-key");
        std::env::remove_var(API_KEY_ENV);
    }
}
