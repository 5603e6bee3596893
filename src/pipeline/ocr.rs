//! One OCR request against an OpenAI-compatible vision endpoint.
//!
//! The request is a single user turn holding the OCR prompt and the page
//! image as a data URL; the page Markdown comes back as
//! `choices[0].message.content`. Errors are classified so the journal shows
//! something actionable once retries run out: HTTP status with a trimmed
//! body, timeout, transport failure, or a body that does not parse.

use crate::config::ServiceConfig;
use crate::error::AttemptError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Longest service error body kept in an error message.
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_request<'a>(
    config: &'a ServiceConfig,
    prompt: &'a str,
    data_url: String,
) -> ChatRequest<'a> {
    ChatRequest {
        model: &config.model,
        messages: vec![ChatMessage {
            role: "user",
            content: vec![
                ContentPart::Text { text: prompt },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ],
        }],
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    }
}

/// Send one page image to the service and return the raw Markdown.
pub async fn request_page(
    client: &reqwest::Client,
    config: &ServiceConfig,
    prompt: &str,
    data_url: String,
) -> Result<String, AttemptError> {
    let url = format!("{}/chat/completions", config.endpoint);
    let body = build_request(config, prompt, data_url);

    let response = client
        .post(&url)
        .bearer_auth(&config.api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| classify_transport(e, config.request_timeout_secs))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| classify_transport(e, config.request_timeout_secs))?;

    if !status.is_success() {
        return Err(AttemptError::Status {
            status: status.as_u16(),
            body: truncate(&text, MAX_ERROR_BODY),
        });
    }

    debug!("OCR service answered {} bytes", text.len());
    parse_response(&text)
}

fn classify_transport(e: reqwest::Error, timeout_secs: u64) -> AttemptError {
    if e.is_timeout() {
        AttemptError::Timeout { secs: timeout_secs }
    } else {
        AttemptError::Transport(e.to_string())
    }
}

fn parse_response(text: &str) -> Result<String, AttemptError> {
    let parsed: ChatResponse = serde_json::from_str(text)
        .map_err(|e| AttemptError::MalformedResponse(format!("not JSON: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AttemptError::MalformedResponse("no choices[0].message.content".into()))
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServiceConfig {
        ServiceConfig::builder()
            .endpoint("https://ocr.example/v1")
            .api_key("k")
            .model("typhoon-ocr")
            .build()
            .unwrap()
    }

    #[test]
    fn request_shape_matches_chat_completions() {
        let cfg = config();
        let req = build_request(&cfg, "Extract text", "data:image/png;base64,AAAA".into());
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "typhoon-ocr");
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["messages"][0]["content"][0]["type"], "text");
        assert_eq!(v["messages"][0]["content"][0]["text"], "Extract text");
        assert_eq!(v["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            v["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn parse_extracts_first_choice() {
        let body = r##"{"choices":[{"message":{"role":"assistant","content":"# Title"}}]}"##;
        assert_eq!(parse_response(body).unwrap(), "# Title");
    }

    #[test]
    fn parse_rejects_empty_choices_and_garbage() {
        assert!(matches!(
            parse_response(r#"{"choices":[]}"#),
            Err(AttemptError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_response("<html>bad gateway</html>"),
            Err(AttemptError::MalformedResponse(_))
        ));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("  short ", 10), "short");
        assert_eq!(truncate("ข้อความยาว", 3), "ข้อ…");
    }
}
