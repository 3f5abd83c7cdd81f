use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::gateway::{GatewayError, GenerationGateway, GenerationRequest};
use crate::models::SourceImage;

pub const DEMO_KEY: &str = "DEMO_KEY";
const TEXT_MODEL: &str = "gemini-2.5-flash";

const CAPTION_INSTRUCTION: &str = "You are an expert YouTube content strategist. Your task is to generate all the necessary text metadata for a YouTube video based on a prompt for its thumbnail. The output must be comprehensive, SEO-friendly, and follow this format:

🎬 Title

<one catchy title>

📝 Description (SEO-Ready)

<a hook paragraph, a short bullet list of what the video covers, a closing call to subscribe, then 5-8 hashtags>

🏷️ Tags

<comma separated search tags>

Now, generate the complete YouTube video metadata for the given thumbnail prompt. Strictly adhere to the format above.";

const ANALYZE_INSTRUCTION: &str = "Analyze this image and generate a descriptive prompt for creating a similar but improved YouTube thumbnail. Focus on the subject, style, colors, and any text elements. The prompt should be concise and actionable for an image generation AI.";

// Shortens long base64 payloads in a JSON value for logging.
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" || key == "bytesBase64Encoded" {
                    if let Value::String(s) = val {
                        if s.len() > 100 {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(truncate_base64_in_json),
        _ => {}
    }
}

pub(crate) fn preview(data: &str) -> String {
    match data.char_indices().nth(50) {
        Some((cut, _)) => format!("{}...[{} chars total]", &data[..cut], data.chars().count()),
        None => data.to_string(),
    }
}

/// Gemini / Imagen REST client. One call per method, no retries of its own.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self { client: Client::new(), api_key, base_url }
    }

    fn is_demo(&self) -> bool {
        self.api_key == DEMO_KEY
    }

    async fn post(&self, model: &str, method: &str, body: &Value) -> Result<Value, GatewayError> {
        let url = format!("{}/models/{}:{}?key={}", self.base_url, model, method, self.api_key);
        info!("🔗 Making request to: {}", url.replace(&self.api_key, "***"));

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| GatewayError::Http(e.to_string()))?;
        info!("📥 Response status: {}", status);

        if !status.is_success() {
            error!("❌ API Error response: {}", text);
            return Err(GatewayError::Status { status: status.as_u16(), body: text });
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Other(format!("parse error: {}", e)))?;
        let mut logged = parsed.clone();
        truncate_base64_in_json(&mut logged);
        info!("📥 Raw Gemini API response: {}", logged);
        Ok(parsed)
    }

    async fn edit_image(&self, request: &GenerationRequest, image: &SourceImage) -> Result<String, GatewayError> {
        let body = json!({
            "contents": [{
                "parts": [
                    {"inlineData": {"mimeType": image.mime_type, "data": image.data}},
                    {"text": request.prompt}
                ]
            }],
            "generationConfig": {"responseModalities": ["IMAGE", "TEXT"]}
        });
        let value = self.post(&request.model, "generateContent", &body).await?;
        let parsed: GenerateContentResponse =
            serde_json::from_value(value).map_err(|e| GatewayError::Other(e.to_string()))?;
        extract_first_image(&parsed).ok_or(GatewayError::MissingContent("image"))
    }

    async fn imagen(&self, request: &GenerationRequest) -> Result<String, GatewayError> {
        let body = json!({
            "instances": [{"prompt": request.prompt}],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": "16:9",
                "outputOptions": {"mimeType": "image/jpeg"}
            }
        });
        let value = self.post(&request.model, "predict", &body).await?;
        let parsed: PredictResponse =
            serde_json::from_value(value).map_err(|e| GatewayError::Other(e.to_string()))?;
        parsed
            .predictions
            .into_iter()
            .find_map(|p| {
                p.bytes_base64_encoded.map(|data| SourceImage {
                    mime_type: p.mime_type.unwrap_or_else(|| "image/jpeg".to_string()),
                    data,
                })
            })
            .map(|image| image.to_data_url())
            .ok_or(GatewayError::MissingContent("image"))
    }

    async fn generate_content(&self, model: &str, body: Value) -> Result<GenerateContentResponse, GatewayError> {
        let value = self.post(model, "generateContent", &body).await?;
        serde_json::from_value(value).map_err(|e| GatewayError::Other(e.to_string()))
    }

    fn placeholder_image(prompt: &str) -> String {
        let colors = ["#3B82F6", "#EF4444", "#10B981", "#F59E0B", "#8B5CF6"];
        let color = colors[prompt.len() % colors.len()];
        let title: String = prompt.lines().last().unwrap_or_default().chars().take(40).collect();
        let title = title.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");
        let svg = format!(
            r#"<svg width="1280" height="720" xmlns="http://www.w3.org/2000/svg">
            <defs>
                <linearGradient id="grad" x1="0%" y1="0%" x2="100%" y2="100%">
                    <stop offset="0%" style="stop-color:{color};stop-opacity:1" />
                    <stop offset="100%" style="stop-color:{color};stop-opacity:0.6" />
                </linearGradient>
            </defs>
            <rect width="1280" height="720" fill="url(#grad)" />
            <text x="640" y="360" font-family="Arial, sans-serif" font-size="56" font-weight="bold"
                  text-anchor="middle" fill="white">{title}</text>
            <text x="640" y="440" font-family="Arial, sans-serif" font-size="24"
                  text-anchor="middle" fill="white" opacity="0.8">Demo thumbnail</text>
        </svg>"#
        );
        format!(
            "data:image/svg+xml;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(svg.as_bytes())
        )
    }
}

#[async_trait]
impl GenerationGateway for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GatewayError> {
        if self.is_demo() {
            info!("Using demo mode - no real images generated");
            return Ok(Self::placeholder_image(&request.prompt));
        }

        info!("Generating image with {}...", request.model);
        let result = match &request.image {
            Some(image) => self.edit_image(request, image).await,
            None if request.model.starts_with("imagen") => self.imagen(request).await,
            None => {
                let body = json!({
                    "contents": [{"parts": [{"text": request.prompt}]}],
                    "generationConfig": {"responseModalities": ["IMAGE", "TEXT"]}
                });
                let parsed = self.generate_content(&request.model, body).await?;
                extract_first_image(&parsed)
                    .or_else(|| extract_text(&parsed))
                    .ok_or(GatewayError::MissingContent("image"))
            }
        };
        if let Ok(data) = &result {
            info!("✅ Successfully generated image: {}", preview(data));
        }
        result
    }

    async fn caption(&self, prompt: &str) -> Result<String, GatewayError> {
        if self.is_demo() {
            return Ok(format!("🎬 Title\n\n{prompt}\n\n📝 Description (SEO-Ready)\n\nDemo caption.\n\n🏷️ Tags\n\ndemo"));
        }
        let body = json!({
            "systemInstruction": {"parts": [{"text": CAPTION_INSTRUCTION}]},
            "contents": [{"parts": [{"text": prompt}]}]
        });
        let parsed = self.generate_content(TEXT_MODEL, body).await?;
        extract_text(&parsed).ok_or(GatewayError::MissingContent("caption text"))
    }

    async fn describe_image(&self, image: &SourceImage) -> Result<String, GatewayError> {
        if self.is_demo() {
            return Ok("Demo description: a person in front of a plain background. Text: \"MY NEW VIDEO\"".to_string());
        }
        let body = json!({
            "contents": [{
                "parts": [
                    {"inlineData": {"mimeType": image.mime_type, "data": image.data}},
                    {"text": ANALYZE_INSTRUCTION}
                ]
            }]
        });
        let parsed = self.generate_content(TEXT_MODEL, body).await?;
        extract_text(&parsed).ok_or(GatewayError::MissingContent("description"))
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
    #[allow(dead_code)]
    Other(Value),
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(rename = "bytesBase64Encoded")]
    bytes_base64_encoded: Option<String>,
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

fn extract_first_image(resp: &GenerateContentResponse) -> Option<String> {
    resp.candidates.iter().flat_map(|c| &c.content.parts).find_map(|p| match p {
        Part::Inline { inline_data } => {
            info!("🎯 Found image data with mime type: {}", inline_data.mime_type);
            let image = SourceImage { mime_type: inline_data.mime_type.clone(), data: inline_data.data.clone() };
            Some(image.to_data_url())
        }
        _ => None,
    })
}

fn extract_text(resp: &GenerateContentResponse) -> Option<String> {
    let text: String = resp
        .candidates
        .first()?
        .content
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(value: Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn extracts_inline_image_as_data_url() {
        let resp = parse(json!({
            "candidates": [{"content": {"parts": [
                {"text": "Here is your thumbnail"},
                {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
            ]}}]
        }));
        assert_eq!(extract_first_image(&resp).as_deref(), Some("data:image/png;base64,iVBORw0KGgo="));
        assert_eq!(extract_text(&resp).as_deref(), Some("Here is your thumbnail"));
    }

    #[test]
    fn missing_parts_yield_nothing() {
        let resp = parse(json!({"candidates": [{"content": {"parts": [{"thought": true}]}}]}));
        assert_eq!(extract_first_image(&resp), None);
        assert_eq!(extract_text(&resp), None);
        assert_eq!(extract_first_image(&parse(json!({}))), None);
    }

    #[test]
    fn truncates_long_payloads_for_logs() {
        let long = "A".repeat(200);
        let mut value = json!({"predictions": [{"bytesBase64Encoded": long, "mimeType": "image/jpeg"}]});
        truncate_base64_in_json(&mut value);
        let logged = value["predictions"][0]["bytesBase64Encoded"].as_str().unwrap();
        assert!(logged.ends_with("[truncated 150 chars]"));
        assert_eq!(value["predictions"][0]["mimeType"], "image/jpeg");
    }

    #[tokio::test]
    async fn demo_mode_answers_without_network() {
        let client = GeminiClient::new(DEMO_KEY.into(), "http://127.0.0.1:9".into());
        let request = GenerationRequest {
            model: "imagen-4.0-generate-001".into(),
            prompt: "SYS\n\nA <red> car".into(),
            image: None,
        };
        let data = client.generate(&request).await.unwrap();
        let image = SourceImage::from_data_url(&data).unwrap();
        assert_eq!(image.mime_type, "image/svg+xml");
        let svg = base64::engine::general_purpose::STANDARD.decode(image.data).unwrap();
        assert!(String::from_utf8(svg).unwrap().contains("A &lt;red&gt; car"));
        assert!(client.caption("A red car").await.unwrap().contains("A red car"));
    }
}
