use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::domain::ProviderConfig;

use super::{RequestError, prompt::SYSTEM_INSTRUCTION, send_json};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
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
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

pub(super) fn endpoint(base: &Url, model: &str) -> Result<Url, RequestError> {
    let base = base.as_str().trim_end_matches('/');
    Ok(Url::parse(&format!(
        "{base}/v1beta/models/{model}:generateContent"
    ))?)
}

/// Single-turn `generateContent` call; no conversation state is kept between requests.
pub(super) async fn generate(
    client: &Client,
    base: &Url,
    config: &ProviderConfig,
    user_message: &str,
) -> Result<String, RequestError> {
    let body = GenerateContentRequest {
        system_instruction: Content {
            role: None,
            parts: [TextPart {
                text: SYSTEM_INSTRUCTION,
            }],
        },
        contents: [Content {
            role: Some("user"),
            parts: [TextPart { text: user_message }],
        }],
    };

    let request = client
        .post(endpoint(base, &config.model)?)
        .header("x-goog-api-key", config.credential.expose())
        .json(&body);
    let response: GenerateContentResponse = send_json(request).await?;

    response_text(response).ok_or(RequestError::EmptyResponse)
}

fn response_text(response: GenerateContentResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect();
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let base = Url::parse("https://generativelanguage.googleapis.com/").expect("url");
        let url = endpoint(&base, "gemini-2.5-flash").expect("endpoint");
        assert_eq!(
            url.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn concatenates_candidate_parts() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"<article>"},{"text":"</article>"}]}}]}"#,
        )
        .expect("json");
        assert_eq!(response_text(response).as_deref(), Some("<article></article>"));
    }

    #[test]
    fn missing_candidates_yield_nothing() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).expect("json");
        assert!(response_text(response).is_none());
    }

    #[test]
    fn request_uses_camel_case_system_instruction() {
        let body = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: [TextPart { text: "sys" }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [TextPart { text: "hi" }],
            }],
        };
        let json = serde_json::to_value(&body).expect("json");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
    }
}
