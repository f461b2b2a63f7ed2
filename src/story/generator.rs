//! Generation backend: the proxy worker client and the trait it sits behind.
//!
//! The proxy exposes a single `POST /generate` endpoint authenticated with an
//! `X-Auth-Token` header. The request body is `{"content": [...]}` where each
//! element is a plain string or an inline base64 image. The reply is either
//! `{"response": "..."}` or `{"error": "..."}`.

use crate::config::GeneratorConfig;
use crate::error::Result;
use crate::{ContentPart, GenerationOutcome};
use anyhow::Context as _;
use base64::Engine as _;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Something that can turn assembled content into a story.
///
/// The outcome is total: every failure mode maps to a `note`, so callers
/// never deal with transport errors directly.
pub trait Generator: Send + Sync {
    fn generate(
        &self,
        parts: &[ContentPart],
    ) -> impl Future<Output = GenerationOutcome> + Send;
}

impl<G: Generator> Generator for Arc<G> {
    fn generate(
        &self,
        parts: &[ContentPart],
    ) -> impl Future<Output = GenerationOutcome> + Send {
        (**self).generate(parts)
    }
}

/// One element of the `content` array on the wire.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WirePart {
    Text(String),
    Image { mime_type: String, data_base64: String },
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    content: Vec<WirePart>,
}

fn to_wire(parts: &[ContentPart]) -> Vec<WirePart> {
    parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(text) => WirePart::Text(text.clone()),
            ContentPart::Image { mime_type, data } => WirePart::Image {
                mime_type: mime_type.clone(),
                data_base64: base64::engine::general_purpose::STANDARD.encode(data),
            },
        })
        .collect()
}

/// Map a proxy reply onto a narrative or a diagnostic note.
fn classify_reply(status: u16, body: &str) -> GenerationOutcome {
    let json: Option<serde_json::Value> = serde_json::from_str(body).ok();

    if (200..300).contains(&status) {
        match json {
            Some(value) => {
                if let Some(text) = value.get("response").and_then(|v| v.as_str()) {
                    let text = text.trim();
                    if text.is_empty() {
                        GenerationOutcome::note(
                            "The generation service returned an empty result.",
                        )
                    } else {
                        GenerationOutcome::narrative(text)
                    }
                } else if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
                    GenerationOutcome::note(format!(
                        "The generation service reported an error: {message}"
                    ))
                } else {
                    GenerationOutcome::note("The generation service returned a malformed reply.")
                }
            }
            None => GenerationOutcome::note("The generation service returned a malformed reply."),
        }
    } else {
        // Error statuses often still carry a JSON error body.
        let detail = json
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|v| v.as_str());
        match detail {
            Some(message) => GenerationOutcome::note(format!(
                "The generation service reported an error: {message}"
            )),
            None => {
                let snippet: String = body.trim().chars().take(120).collect();
                if snippet.is_empty() {
                    GenerationOutcome::note(format!(
                        "The generation service returned status {status}."
                    ))
                } else {
                    GenerationOutcome::note(format!(
                        "The generation service returned status {status}: {snippet}"
                    ))
                }
            }
        }
    }
}

/// HTTP client for the proxy worker.
pub struct ProxyClient {
    http: reqwest::Client,
    generate_url: String,
    auth_token: String,
}

impl ProxyClient {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .with_context(|| "failed to build HTTP client for the generation proxy")?;

        Ok(Self {
            http,
            generate_url: format!("{}/generate", config.worker_url),
            auth_token: config.auth_token.clone(),
        })
    }
}

/// Narrative used when there is no content worth sending to the proxy.
pub const QUIET_DAY_NARRATIVE: &str =
    "Nothing of note happened today. The chat kept its silence, and so does the chronicle.";

impl Generator for ProxyClient {
    async fn generate(&self, parts: &[ContentPart]) -> GenerationOutcome {
        if parts.is_empty() {
            tracing::debug!("no content to generate from, using the quiet day narrative");
            return GenerationOutcome::narrative(QUIET_DAY_NARRATIVE);
        }

        let request = GenerateRequest {
            content: to_wire(parts),
        };
        tracing::info!(
            parts = request.content.len(),
            url = %self.generate_url,
            "requesting story generation"
        );

        let response = self
            .http
            .post(&self.generate_url)
            .header("X-Auth-Token", &self.auth_token)
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(%error, "generation request failed");
                return GenerationOutcome::note(format!(
                    "Could not reach the generation service: {error}"
                ));
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                tracing::error!(%error, status, "failed to read generation reply");
                return GenerationOutcome::note(
                    "The generation service reply could not be read.",
                );
            }
        };

        let outcome = classify_reply(status, &body);
        match &outcome.narrative {
            Some(text) => tracing::info!(status, chars = text.len(), "story generated"),
            None => tracing::warn!(
                status,
                note = outcome.note.as_deref().unwrap_or(""),
                "generation produced no narrative"
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_payload_shapes_match_the_proxy_contract() {
        let parts = vec![
            ContentPart::Text("hello".into()),
            ContentPart::Image {
                mime_type: "image/jpeg".into(),
                data: vec![255, 216, 255],
            },
        ];

        let json = serde_json::to_value(GenerateRequest {
            content: to_wire(&parts),
        })
        .unwrap();

        assert_eq!(json["content"][0], "hello");
        assert_eq!(json["content"][1]["mime_type"], "image/jpeg");
        assert_eq!(json["content"][1]["data_base64"], "/9j/");
    }

    #[test]
    fn successful_reply_becomes_a_narrative() {
        let outcome = classify_reply(200, r#"{"response": "  Once upon a time.  "}"#);
        assert_eq!(outcome.narrative.as_deref(), Some("Once upon a time."));
        assert!(outcome.note.is_none());
    }

    #[test]
    fn empty_successful_reply_becomes_a_note() {
        let outcome = classify_reply(200, r#"{"response": "   "}"#);
        assert!(outcome.narrative.is_none());
        assert!(outcome.note.unwrap().contains("empty result"));
    }

    #[test]
    fn explicit_error_reply_becomes_a_note() {
        let outcome = classify_reply(200, r#"{"error": "quota exceeded"}"#);
        assert!(outcome.narrative.is_none());
        assert!(outcome.note.unwrap().contains("quota exceeded"));
    }

    #[test]
    fn error_status_with_json_detail_keeps_the_detail() {
        let outcome = classify_reply(401, r#"{"error": "bad token"}"#);
        assert!(outcome.note.unwrap().contains("bad token"));
    }

    #[test]
    fn error_status_without_json_reports_status_and_body_snippet() {
        let outcome = classify_reply(502, "<html>bad gateway</html>");
        let note = outcome.note.unwrap();
        assert!(note.contains("502"));
        assert!(note.contains("bad gateway"));
    }

    #[test]
    fn error_body_snippet_is_truncated() {
        let body = "x".repeat(500);
        let note = classify_reply(500, &body).note.unwrap();
        assert!(note.len() < 200);
    }

    #[test]
    fn error_status_with_empty_body_reports_status_alone() {
        let note = classify_reply(503, "  ").note.unwrap();
        assert!(note.ends_with("returned status 503."));
    }

    #[test]
    fn malformed_success_body_becomes_a_note() {
        let outcome = classify_reply(200, "not json");
        assert!(outcome.narrative.is_none());
        assert!(outcome.note.unwrap().contains("malformed"));
    }

    #[tokio::test]
    async fn absent_content_yields_the_quiet_day_narrative() {
        let client = ProxyClient::new(&GeneratorConfig {
            worker_url: "http://localhost:0".into(),
            auth_token: "token".into(),
            timeout_secs: 1,
        })
        .unwrap();

        let outcome = client.generate(&[]).await;
        assert_eq!(outcome.narrative.as_deref(), Some(QUIET_DAY_NARRATIVE));
        assert!(outcome.note.is_none());
    }

    #[test]
    fn classification_never_yields_neither() {
        for (status, body) in [
            (200u16, r#"{"response": "ok"}"#),
            (200, r#"{"response": ""}"#),
            (200, r#"{"unexpected": true}"#),
            (500, ""),
        ] {
            let outcome = classify_reply(status, body);
            assert!(outcome.narrative.is_some() || outcome.note.is_some());
        }
    }
}
