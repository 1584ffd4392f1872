use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::domain::ProviderConfig;

use super::{GatewayOptions, RequestError, prompt::SYSTEM_INSTRUCTION, send_json};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub(super) fn endpoint(base: &Url) -> Result<Url, RequestError> {
    let base = base.as_str().trim_end_matches('/');
    Ok(Url::parse(&format!("{base}/chat/completions"))?)
}

pub(super) async fn generate(
    client: &Client,
    options: &GatewayOptions,
    config: &ProviderConfig,
    user_message: &str,
) -> Result<String, RequestError> {
    let body = ChatCompletionRequest {
        model: &config.model,
        messages: [
            ChatMessage {
                role: "system",
                content: SYSTEM_INSTRUCTION,
            },
            ChatMessage {
                role: "user",
                content: user_message,
            },
        ],
        temperature: options.temperature,
        max_tokens: options.max_tokens,
    };

    let request = client
        .post(endpoint(&options.openrouter_base_url)?)
        .bearer_auth(config.credential.expose())
        .json(&body);
    let response: ChatCompletionResponse = send_json(request).await?;

    Ok(first_message(response))
}

/// Content of the first choice, empty when the provider sent none.
fn first_message(response: ChatCompletionResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_chat_completions() {
        let base = Url::parse("https://openrouter.ai/api/v1").expect("url");
        assert_eq!(
            endpoint(&base).expect("endpoint").as_str(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }

    #[test]
    fn reads_first_choice() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"<article/>"}},{"message":{"content":"other"}}]}"#,
        )
        .expect("json");
        assert_eq!(first_message(response), "<article/>");
    }

    #[test]
    fn absent_content_is_empty() {
        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant"}}]}"#).expect("json");
        assert_eq!(first_message(response), "");
        let empty: ChatCompletionResponse = serde_json::from_str("{}").expect("json");
        assert_eq!(first_message(empty), "");
    }
}
