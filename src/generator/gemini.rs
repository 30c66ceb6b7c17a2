use super::types::{ContentGenerator, Fragment, FragmentStream, GenerationError, ReferenceImage};
use crate::codec;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt, stream};
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

impl GeminiGenerator {
    pub fn new(api_key: Option<&str>, base_url: Option<&str>, model: Option<&str>) -> Self {
        let base_url = base_url.unwrap_or(GEMINI_BASE_URL).trim_end_matches('/');
        let model = model.unwrap_or(GEMINI_DEFAULT_MODEL);
        info!("Gemini generator initialized (model: {})", model);
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.map(str::to_string),
            base_url: base_url.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ContentGenerator for GeminiGenerator {
    async fn stream(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImage>,
    ) -> Result<FragmentStream, GenerationError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(GenerationError::MissingApiKey);
        };
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );

        let mut parts = vec![serde_json::json!({ "text": prompt })];
        if let Some(image) = reference {
            parts.push(serde_json::json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": codec::encode_one(&image.data),
                }
            }));
        }
        let body = serde_json::json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] }
        });

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Provider { status, body });
        }

        let bytes = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(GenerationError::from))
            .boxed();
        Ok(decode_sse(bytes))
    }
}

struct SseState<S> {
    body: S,
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    pending: VecDeque<Fragment>,
    failure: Option<GenerationError>,
    finished: bool,
}

/// Turns an SSE byte stream into fragments. `data:` lines may be split across chunks.
fn decode_sse<S>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<Vec<u8>, GenerationError>> + Send + Unpin + 'static,
{
    let state = SseState {
        body,
        buffer: Vec::new(),
        scanned: 0,
        pending: VecDeque::new(),
        failure: None,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                return Some((Ok(fragment), st));
            }
            if let Some(e) = st.failure.take() {
                st.finished = true;
                return Some((Err(e), st));
            }
            if st.finished {
                return None;
            }

            let step = match st.body.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(&chunk);
                    st.drain_lines(false)
                }
                Some(Err(e)) => Err(e),
                None => {
                    st.finished = true;
                    st.drain_lines(true)
                }
            };
            if let Err(e) = step {
                st.failure = Some(e);
            }
        }
    })
    .boxed()
}

impl<S> SseState<S> {
    fn drain_lines(&mut self, at_eof: bool) -> Result<(), GenerationError> {
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let pos = self.scanned + offset;
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.scanned = 0;
            self.handle_line(&line[..pos])?;
        }
        self.scanned = self.buffer.len();

        if at_eof && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.scanned = 0;
            self.handle_line(&line)?;
        }
        Ok(())
    }

    fn handle_line(&mut self, raw: &[u8]) -> Result<(), GenerationError> {
        let line = std::str::from_utf8(raw)
            .map_err(|e| GenerationError::MalformedStream(e.to_string()))?
            .trim_end_matches('\r');

        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim_start();
        if data.is_empty() || data == "[DONE]" {
            return Ok(());
        }

        let fragments = parse_chunk(data)?;
        debug!("SSE chunk carried {} fragments", fragments.len());
        self.pending.extend(fragments);
        Ok(())
    }
}

fn parse_chunk(data: &str) -> Result<Vec<Fragment>, GenerationError> {
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| GenerationError::MalformedStream(e.to_string()))?;

    if let Some(err) = chunk.error {
        return Err(GenerationError::Provider {
            status: err.code.unwrap_or_default(),
            body: err.message,
        });
    }

    let Some(content) = chunk.candidates.into_iter().next().and_then(|c| c.content) else {
        return Ok(Vec::new());
    };

    Ok(content.parts.into_iter().filter_map(into_fragment).collect())
}

/// Empty or undecodable parts yield `None`; the rest of the stream still counts.
fn into_fragment(part: ResponsePart) -> Option<Fragment> {
    if let Some(inline) = part.inline_data
        && !inline.data.is_empty()
    {
        return match codec::decode_one(&inline.data) {
            Ok(data) => Some(Fragment::InlineBinary {
                mime_type: inline.mime_type,
                data,
            }),
            Err(e) => {
                warn!("Skipping undecodable inline {} part: {}", inline.mime_type, e);
                None
            }
        };
    }

    part.text.filter(|t| !t.is_empty()).map(Fragment::Text)
}
