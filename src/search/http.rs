//! HTTP client for the grounded search and speech services
//!
//! Both live behind one base URL:
//!
//! - `POST {base}/search` with `{"query", "system_instruction"}` answers
//!   `{"text", "sources": [{"uri", "title"}]}`
//! - `POST {base}/speech` with `{"text", "voice"}` answers raw 16-bit PCM at
//!   the playback rate; an empty body means no audio

use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;

use super::{GroundedSearch, SearchAnswer, SpeechSynthesis};

#[derive(Debug, Clone)]
pub struct HttpSearchService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSearchService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{path} service error {status}: {body}");
        }
        Ok(response)
    }

    async fn search_request(&self, query: &str, system_instruction: &str) -> anyhow::Result<SearchAnswer> {
        #[derive(Serialize)]
        struct SearchRequest<'a> {
            query: &'a str,
            system_instruction: &'a str,
        }

        let response = self
            .post("search", &SearchRequest {
                query,
                system_instruction,
            })
            .await?;
        Ok(response.json::<SearchAnswer>().await?)
    }

    async fn speech_request(&self, text: &str, voice: &str) -> anyhow::Result<Option<Bytes>> {
        #[derive(Serialize)]
        struct SpeechRequest<'a> {
            text: &'a str,
            voice: &'a str,
        }

        let audio = self.post("speech", &SpeechRequest { text, voice }).await?.bytes().await?;
        Ok((!audio.is_empty()).then_some(audio))
    }
}

impl GroundedSearch for HttpSearchService {
    fn search<'a>(&'a self, query: &'a str, system_instruction: &'a str)
        -> BoxFuture<'a, anyhow::Result<SearchAnswer>> {
        self.search_request(query, system_instruction).boxed()
    }
}

impl SpeechSynthesis for HttpSearchService {
    fn synthesize<'a>(&'a self, text: &'a str, voice: &'a str) -> BoxFuture<'a, anyhow::Result<Option<Bytes>>> {
        self.speech_request(text, voice).boxed()
    }
}
