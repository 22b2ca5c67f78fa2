use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::config::ResolvedConfig;
use crate::constraints::ViolationCounts;
use crate::items::{self, ItemId, join_ids};
use crate::report::{ReportWriter, SummaryRecord, default_output_path};
use crate::scores::{LiftWingClient, ScoringApi};
use crate::wikidata::{WikidataApi, WikidataClient};

/// Where the item ids of a run come from.
#[derive(Debug, Clone)]
pub enum ItemSource {
    /// First column of this file.
    File(PathBuf),
    /// This many randomly drawn ids.
    Random(usize),
}

#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub source: ItemSource,
    /// Report destination; `None` applies the default naming rules.
    pub output: Option<PathBuf>,
    pub batch_size: usize,
}

impl CheckOptions {
    pub fn resolved_output(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => default_output_path(match &self.source {
                ItemSource::File(path) => Some(path.as_path()),
                ItemSource::Random(_) => None,
            }),
        }
    }
}

/// What a run accomplished. `requested` counts usable input ids; every one
/// of them ends up either `written` or `skipped`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub output: PathBuf,
    pub requested: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed_batches: usize,
    pub wikidata_requests: usize,
    pub scoring_requests: usize,
}

/// Append-only error log mirrored to stderr. The file is created on the
/// first recorded warning, never up front; an unwritable log degrades to
/// stderr-only and does not abort the run.
pub struct RunLog {
    path: PathBuf,
    file: Option<File>,
    stderr_only: bool,
}

impl RunLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
            stderr_only: false,
        }
    }

    pub fn record(&mut self, message: &str) {
        eprintln!("warning: {message}");
        if self.stderr_only {
            return;
        }
        if self.file.is_none() {
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(file) => self.file = Some(file),
                Err(_) => {
                    self.stderr_only = true;
                    eprintln!(
                        "warning: cannot open error log {}; logging to stderr only",
                        self.path.display()
                    );
                    return;
                }
            }
        }
        if let Some(file) = self.file.as_mut()
            && writeln!(file, "{message}").is_err()
        {
            self.file = None;
            self.stderr_only = true;
            eprintln!(
                "warning: error log {} is no longer writable; logging to stderr only",
                self.path.display()
            );
        }
    }
}

pub fn run_check(options: &CheckOptions, config: &ResolvedConfig) -> Result<RunSummary> {
    let mut wikidata = WikidataClient::new(config)?;
    let mut scoring = LiftWingClient::new(config)?;
    run_check_with_api(options, config, &mut wikidata, &mut scoring)
}

fn run_check_with_api<W: WikidataApi, S: ScoringApi>(
    options: &CheckOptions,
    config: &ResolvedConfig,
    wikidata: &mut W,
    scoring: &mut S,
) -> Result<RunSummary> {
    if options.batch_size == 0 {
        bail!("batch size must be at least 1");
    }

    let mut log = RunLog::new(&config.error_log);
    let items = resolve_items(&options.source, config, &mut log)?;
    if items.is_empty() {
        bail!("no usable item ids in the input");
    }

    let mut writer = ReportWriter::create(&options.resolved_output())?;
    let mut summary = RunSummary {
        output: writer.path().to_path_buf(),
        requested: items.len(),
        ..RunSummary::default()
    };

    let total_batches = items.len().div_ceil(options.batch_size);
    for (index, batch) in items::batches(&items, options.batch_size).enumerate() {
        match process_batch(batch, wikidata, scoring, &mut log) {
            Ok(records) => {
                summary.skipped += batch.len() - records.len();
                writer.append(&records)?;
                println!(
                    "batch {}/{}: wrote {} of {} items",
                    index + 1,
                    total_batches,
                    records.len(),
                    batch.len()
                );
            }
            Err(error) => {
                summary.failed_batches += 1;
                summary.skipped += batch.len();
                log.record(&format!(
                    "failed to fetch batch {}/{} ({}): {error:#}",
                    index + 1,
                    total_batches,
                    join_ids(batch)
                ));
            }
        }
    }

    summary.written = writer.written();
    summary.wikidata_requests = wikidata.request_count();
    summary.scoring_requests = scoring.request_count();
    Ok(summary)
}

fn resolve_items(
    source: &ItemSource,
    config: &ResolvedConfig,
    log: &mut RunLog,
) -> Result<Vec<ItemId>> {
    match source {
        ItemSource::File(path) => {
            let report = items::read_items_from_file(path)?;
            for token in &report.dropped {
                log.record(&format!("dropped input token {token:?}: not an item id"));
            }
            for item in &report.duplicates {
                log.record(&format!("dropped duplicate input id {item}"));
            }
            Ok(report.items)
        }
        ItemSource::Random(count) => items::generate_random_items(*count, config.max_random_id),
    }
}

/// One batch, three bulk reads plus one score call per surviving item.
/// Returns `Err` only when a bulk statement or sitelink call fails; every
/// other problem downgrades to an item-level skip or an empty score.
fn process_batch<W: WikidataApi, S: ScoringApi>(
    batch: &[ItemId],
    wikidata: &mut W,
    scoring: &mut S,
    log: &mut RunLog,
) -> Result<Vec<SummaryRecord>> {
    let pages = wikidata.item_pages(batch)?;
    let mut resolved = Vec::with_capacity(batch.len());
    for item in batch {
        if pages.contains_key(item) {
            resolved.push(item.clone());
        } else {
            log.record(&format!(
                "item {item} does not exist or is a redirect; skipping it"
            ));
        }
    }
    if resolved.is_empty() {
        return Ok(Vec::new());
    }

    let sitelinks = wikidata.sitelink_counts(&resolved)?;
    let violations = constraint_counts_with_fallback(&resolved, wikidata, log);

    let mut records = Vec::with_capacity(resolved.len());
    for item in &resolved {
        let Some(page) = pages.get(item) else {
            continue;
        };
        let Some(counts) = violations.get(item) else {
            // skip already logged by the constraint fallback
            continue;
        };
        let score = match scoring.item_quality(page.revision_id) {
            Ok(score) => score,
            Err(error) => {
                log.record(&format!(
                    "failed to fetch quality score for {item}: {error:#}"
                ));
                None
            }
        };
        records.push(SummaryRecord {
            item: item.clone(),
            statements: page.statements,
            violations: *counts,
            sitelinks: sitelinks.get(item).copied().unwrap_or_default(),
            ores_score: score,
        });
    }
    Ok(records)
}

/// Bulk constraint check with per-item degradation: when the bulk call
/// fails, or leaves an item out, each affected item gets one solo attempt
/// before being skipped.
fn constraint_counts_with_fallback<W: WikidataApi>(
    items: &[ItemId],
    wikidata: &mut W,
    log: &mut RunLog,
) -> BTreeMap<ItemId, ViolationCounts> {
    let mut counts = match wikidata.constraint_counts(items) {
        Ok(counts) => counts,
        Err(error) => {
            log.record(&format!(
                "failed to check quality constraints on items {}: {error:#}; now checking them one-by-one",
                join_ids(items)
            ));
            BTreeMap::new()
        }
    };

    let unresolved: Vec<ItemId> = items
        .iter()
        .filter(|item| !counts.contains_key(item))
        .cloned()
        .collect();
    for item in &unresolved {
        match wikidata.constraint_counts(std::slice::from_ref(item)) {
            Ok(single) => match single.get(item) {
                Some(value) => {
                    counts.insert(item.clone(), *value);
                }
                None => {
                    log.record(&format!("no constraint report for item {item}; skipping it"));
                }
            },
            Err(error) => {
                log.record(&format!(
                    "failed to check quality constraints on item {item}: {error:#}; skipping it"
                ));
            }
        }
    }
    counts
}
