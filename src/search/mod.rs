//! Ask a question, get a search-grounded answer, hear it spoken
//!
//! The search and speech services are remote collaborators behind
//! [`GroundedSearch`] and [`SpeechSynthesis`]. Service failures never reach
//! the caller: they turn into a spoken fallback answer or a silent one.
//! The spoken answer goes to an [`AnswerPlayer`], normally the live session's
//! playback timeline.

pub mod http;

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::audio::graph::OutputGraph;
use crate::audio::playback::PlaybackScheduler;
use crate::profile::Profile;

pub use http::HttpSearchService;

/// Answer text when the search service fails
pub const SEARCH_UNAVAILABLE: &str = "I'm having trouble accessing my search tools right now.";

/// Answer text when the search comes back empty
pub const NO_ANSWER: &str = "I couldn't find an answer to that.";

const INSTRUCTION_SUFFIX: &str = " If you use Search, summarize the findings clearly.";

/// Sources shown alongside an answer
const DISPLAYED_SOURCES: usize = 3;

/// A web page the answer was grounded on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSource {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchAnswer {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<SearchSource>,
}

impl SearchAnswer {
    fn fallback(text: &str) -> Self {
        Self {
            text: text.to_string(),
            sources: Vec::new(),
        }
    }

    /// The sources worth showing
    pub fn display_sources(&self) -> &[SearchSource] {
        &self.sources[..self.sources.len().min(DISPLAYED_SOURCES)]
    }
}

/// Text query answered with web-search grounding
pub trait GroundedSearch: Send + Sync {
    fn search<'a>(&'a self, query: &'a str, system_instruction: &'a str)
        -> BoxFuture<'a, anyhow::Result<SearchAnswer>>;
}

/// Text to speech. Returns 16-bit PCM at the playback rate, or `None` if the
/// service produced no audio.
pub trait SpeechSynthesis: Send + Sync {
    fn synthesize<'a>(&'a self, text: &'a str, voice: &'a str) -> BoxFuture<'a, anyhow::Result<Option<Bytes>>>;
}

/// Where a spoken answer is queued. Resolves to the timeline instant it
/// starts at, or `None` if it was not scheduled.
pub trait AnswerPlayer: Send {
    fn play(&mut self, pcm: Bytes) -> BoxFuture<'_, Option<f64>>;
}

impl<G: OutputGraph + Send> AnswerPlayer for PlaybackScheduler<G> {
    fn play(&mut self, pcm: Bytes) -> BoxFuture<'_, Option<f64>> {
        future::ready(self.accept_chunk(&pcm)).boxed()
    }
}

/// Result of one [`SearchFlow::ask`]
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub answer: SearchAnswer,
    /// Timeline instant the spoken answer starts at, if it was scheduled
    pub start_time: Option<f64>,
}

pub struct SearchFlow {
    search: Arc<dyn GroundedSearch>,
    speech: Arc<dyn SpeechSynthesis>,
}

impl SearchFlow {
    pub fn new(search: Arc<dyn GroundedSearch>, speech: Arc<dyn SpeechSynthesis>) -> Self {
        Self { search, speech }
    }

    /// Answer `query` in the host's manner, without speaking
    pub async fn answer(&self, query: &str, profile: &Profile) -> SearchAnswer {
        let instruction = format!("{}{}", profile.system_instruction, INSTRUCTION_SUFFIX);

        match self.search.search(query, &instruction).await {
            Ok(answer) if answer.text.trim().is_empty() => SearchAnswer {
                text: NO_ANSWER.to_string(),
                ..answer
            },
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, profile = %profile.id, "search failed");
                SearchAnswer::fallback(SEARCH_UNAVAILABLE)
            }
        }
    }

    /// Answer `query` and queue the spoken answer on `player`.
    ///
    /// Blank queries are ignored and return `None`.
    pub async fn ask<P: AnswerPlayer + ?Sized>(
        &self,
        query: &str,
        profile: &Profile,
        player: &mut P,
    ) -> Option<SearchOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        let answer = self.answer(query, profile).await;
        let start_time = match self.speech.synthesize(&answer.text, &profile.voice).await {
            Ok(Some(pcm)) => player.play(pcm).await,
            Ok(None) => {
                tracing::warn!(profile = %profile.id, "speech service returned no audio");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, profile = %profile.id, "speech synthesis failed");
                None
            }
        };

        tracing::debug!(
            profile = %profile.id,
            sources = answer.sources.len(),
            spoken = start_time.is_some(),
            "answered search query"
        );
        Some(SearchOutcome { answer, start_time })
    }
}
