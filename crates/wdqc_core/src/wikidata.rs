use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::config::ResolvedConfig;
use crate::constraints::{ItemConstraintCheck, ViolationCounts, tally_item};
use crate::items::{ItemId, join_ids};

/// Latest revision and statement count for one existing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemPage {
    pub revision_id: i64,
    pub statements: u64,
}

/// Sitelink tallies for one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SitelinkCounts {
    pub total: u64,
    pub wikipedia: u64,
}

/// The read-only Wikidata operations the checker consumes. Items absent from
/// a returned map were not resolvable (nonexistent, redirect, or no data);
/// callers decide whether that skips the item or the whole batch.
pub trait WikidataApi {
    /// Statement counts and latest revision ids, keyed by item.
    fn item_pages(&mut self, items: &[ItemId]) -> Result<BTreeMap<ItemId, ItemPage>>;
    /// Total and Wikipedia-only sitelink counts, keyed by item.
    fn sitelink_counts(&mut self, items: &[ItemId]) -> Result<BTreeMap<ItemId, SitelinkCounts>>;
    /// Constraint violation tallies, keyed by item.
    fn constraint_counts(
        &mut self,
        items: &[ItemId],
    ) -> Result<BTreeMap<ItemId, ViolationCounts>>;
    fn request_count(&self) -> usize;
}

pub struct WikidataClient {
    client: Client,
    api_url: String,
    user_agent: String,
    rate_limit_ms: u64,
    max_retries: usize,
    retry_delay_ms: u64,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl WikidataClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build Wikidata HTTP client")?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            user_agent: config.user_agent.clone(),
            rate_limit_ms: config.rate_limit_ms,
            max_retries: config.retries,
            retry_delay_ms: config.retry_delay_ms,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn request_json(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.api_url)
            .with_context(|| format!("invalid Wikidata API URL: {}", self.api_url))?;

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=self.max_retries {
            self.apply_rate_limit();
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("Wikidata API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode Wikidata API JSON response")?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let info = error
                            .get("info")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info");
                        bail!("Wikidata API error [{code}]: {info}");
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < self.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call Wikidata API");
                }
            }
        }

        bail!("Wikidata API request exhausted retry budget")
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

impl WikidataApi for WikidataClient {
    fn item_pages(&mut self, items: &[ItemId]) -> Result<BTreeMap<ItemId, ItemPage>> {
        let response = self.request_json(&[
            ("action", "query".to_string()),
            ("prop", "pageprops|revisions".to_string()),
            ("ppprop", "wb-claims".to_string()),
            ("rvprop", "ids".to_string()),
            ("titles", join_ids(items)),
        ])?;
        parse_item_pages(response)
    }

    fn sitelink_counts(&mut self, items: &[ItemId]) -> Result<BTreeMap<ItemId, SitelinkCounts>> {
        let response = self.request_json(&[
            ("action", "wbgetentities".to_string()),
            ("props", "sitelinks".to_string()),
            ("ids", join_ids(items)),
        ])?;
        parse_sitelink_counts(response)
    }

    fn constraint_counts(
        &mut self,
        items: &[ItemId],
    ) -> Result<BTreeMap<ItemId, ViolationCounts>> {
        let response = self.request_json(&[
            ("action", "wbcheckconstraints".to_string()),
            ("id", join_ids(items)),
        ])?;
        parse_constraint_counts(response)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn parse_item_pages(payload: Value) -> Result<BTreeMap<ItemId, ItemPage>> {
    let parsed: PageQueryResponse =
        serde_json::from_value(payload).context("failed to decode statement count response")?;

    let mut pages = BTreeMap::new();
    for page in parsed.query.pages {
        if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
            continue;
        }
        let Ok(item) = ItemId::parse(&page.title) else {
            continue;
        };
        // Entity pages without wb-claims are redirects or non-items.
        let Some(statements) = page
            .pageprops
            .as_ref()
            .and_then(|props| props.wb_claims.as_ref())
            .and_then(ClaimCount::as_u64)
        else {
            continue;
        };
        let Some(revision) = page.revisions.first() else {
            continue;
        };
        pages.insert(
            item,
            ItemPage {
                revision_id: revision.revid,
                statements,
            },
        );
    }
    Ok(pages)
}

fn parse_sitelink_counts(payload: Value) -> Result<BTreeMap<ItemId, SitelinkCounts>> {
    let parsed: EntityQueryResponse =
        serde_json::from_value(payload).context("failed to decode sitelink response")?;

    let mut counts = BTreeMap::new();
    for (id, entity) in parsed.entities {
        if entity.missing.is_some() {
            continue;
        }
        let Ok(item) = ItemId::parse(&id) else {
            continue;
        };
        counts.insert(item, count_sitelinks(&entity.sitelinks));
    }
    Ok(counts)
}

fn parse_constraint_counts(payload: Value) -> Result<BTreeMap<ItemId, ViolationCounts>> {
    let parsed: ConstraintQueryResponse =
        serde_json::from_value(payload).context("failed to decode constraint check response")?;

    let mut counts = BTreeMap::new();
    for (id, check) in &parsed.wbcheckconstraints {
        let Ok(item) = ItemId::parse(id) else {
            continue;
        };
        counts.insert(item, tally_item(check));
    }
    Ok(counts)
}

fn count_sitelinks(sitelinks: &BTreeMap<String, SitelinkEntry>) -> SitelinkCounts {
    let wikipedia = sitelinks
        .keys()
        .filter(|site| is_wikipedia_site(site))
        .count();
    SitelinkCounts {
        total: sitelinks.len() as u64,
        wikipedia: wikipedia as u64,
    }
}

/// Wikipedia site ids end in `wiki`; Commons and Wikispecies share the
/// suffix but are not Wikipedias.
fn is_wikipedia_site(site: &str) -> bool {
    site.ends_with("wiki") && site != "commonswiki" && site != "specieswiki"
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

pub(crate) fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize)]
struct PageQueryResponse {
    query: PageQueryPayload,
}

#[derive(Debug, Deserialize)]
struct PageQueryPayload {
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    pageprops: Option<PagePropsPayload>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PagePropsPayload {
    #[serde(rename = "wb-claims")]
    wb_claims: Option<ClaimCount>,
}

/// `wb-claims` arrives as a string page prop; tolerate a bare number too.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ClaimCount {
    Text(String),
    Number(u64),
}

impl ClaimCount {
    fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Text(value) => value.trim().parse().ok(),
            Self::Number(value) => Some(*value),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: i64,
}

#[derive(Debug, Deserialize)]
struct EntityQueryResponse {
    entities: BTreeMap<String, EntityPayload>,
}

#[derive(Debug, Deserialize)]
struct EntityPayload {
    /// Present (any value) when the entity does not exist.
    missing: Option<Value>,
    #[serde(default)]
    sitelinks: BTreeMap<String, SitelinkEntry>,
}

#[derive(Debug, Deserialize)]
struct SitelinkEntry {}

#[derive(Debug, Deserialize)]
struct ConstraintQueryResponse {
    wbcheckconstraints: BTreeMap<String, ItemConstraintCheck>,
}
