use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::ResolvedConfig;
use crate::wikidata::{is_retryable_error, is_retryable_status};

/// Quality score for an item revision. Obtained from the LiftWing
/// `wikidatawiki-itemquality` model.
pub trait ScoringApi {
    /// Ordinal score (1-5) of the predicted quality class, or `None` when
    /// the model has no prediction for the revision.
    fn item_quality(&mut self, revision_id: i64) -> Result<Option<u8>>;
    fn request_count(&self) -> usize;
}

/// Ordinal score for an item-quality class, per the grading scheme on
/// Wikidata:Item_quality: A (best) down to E (worst).
pub fn score_for_class(class: &str) -> Option<u8> {
    match class {
        "A" => Some(5),
        "B" => Some(4),
        "C" => Some(3),
        "D" => Some(2),
        "E" => Some(1),
        _ => None,
    }
}

pub struct LiftWingClient {
    client: Client,
    base_url: String,
    user_agent: String,
    rate_limit_ms: u64,
    max_retries: usize,
    retry_delay_ms: u64,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl LiftWingClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build LiftWing HTTP client")?;

        Ok(Self {
            client,
            base_url: config.liftwing_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            rate_limit_ms: config.rate_limit_ms,
            max_retries: config.retries,
            retry_delay_ms: config.retry_delay_ms,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn request_score(&mut self, revision_id: i64) -> Result<Option<ScoreResponse>> {
        let url = format!("{}/v1/models/wikidatawiki-itemquality:predict", self.base_url);
        let payload = json!({ "rev_id": revision_id });

        for attempt in 0..=self.max_retries {
            self.apply_rate_limit();
            let response = self
                .client
                .post(&url)
                .header("User-Agent", self.user_agent.clone())
                .json(&payload)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        // LiftWing reports unscorable revisions (deleted,
                        // suppressed, never existed) as client errors.
                        if matches!(status, StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND) {
                            return Ok(None);
                        }
                        bail!("LiftWing request failed with HTTP {status}");
                    }
                    let parsed: ScoreResponse = response
                        .json()
                        .context("failed to decode LiftWing JSON response")?;
                    return Ok(Some(parsed));
                }
                Err(error) => {
                    if attempt < self.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call LiftWing");
                }
            }
        }

        bail!("LiftWing request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self.retry_delay_ms.saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl ScoringApi for LiftWingClient {
    fn item_quality(&mut self, revision_id: i64) -> Result<Option<u8>> {
        let Some(response) = self.request_score(revision_id)? else {
            return Ok(None);
        };
        Ok(extract_prediction(&response, revision_id))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn extract_prediction(response: &ScoreResponse, revision_id: i64) -> Option<u8> {
    response
        .wikidatawiki
        .scores
        .get(&revision_id.to_string())
        .and_then(|revision| revision.itemquality.as_ref())
        .and_then(|model| model.score.as_ref())
        .and_then(|score| score.prediction.as_deref())
        .and_then(score_for_class)
}

#[derive(Debug, Default, Deserialize)]
struct ScoreResponse {
    #[serde(default)]
    wikidatawiki: WikiScores,
}

#[derive(Debug, Default, Deserialize)]
struct WikiScores {
    /// Keyed by revision id rendered as a string.
    #[serde(default)]
    scores: BTreeMap<String, RevisionScores>,
}

#[derive(Debug, Default, Deserialize)]
struct RevisionScores {
    itemquality: Option<ModelScore>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelScore {
    score: Option<ScorePayload>,
}

#[derive(Debug, Default, Deserialize)]
struct ScorePayload {
    prediction: Option<String>,
}
