use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, bail};
use rand::Rng;

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// A Wikidata item identifier: `Q` followed by a positive decimal number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(u64);

impl ItemId {
    pub fn new(numeric: u64) -> Result<Self> {
        if numeric == 0 {
            bail!("item ids start at Q1");
        }
        Ok(Self(numeric))
    }

    /// Parse a `Q<number>` token. Leading zeros are rejected because they
    /// would silently rewrite the id (`Q007` is not `Q7` as a page title).
    pub fn parse(token: &str) -> Result<Self> {
        let trimmed = token.trim();
        let Some(digits) = trimmed.strip_prefix('Q') else {
            bail!("invalid item id {trimmed:?}: expected Q<number>");
        };
        if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            bail!("invalid item id {trimmed:?}: expected Q<number>");
        }
        if digits.len() > 1 && digits.starts_with('0') {
            bail!("invalid item id {trimmed:?}: leading zeros are not allowed");
        }
        let numeric: u64 = digits
            .parse()
            .with_context(|| format!("invalid item id {trimmed:?}"))?;
        Self::new(numeric)
    }

    pub fn numeric(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

/// Render ids in the `A|B|C` form the MediaWiki API expects for multi-value
/// parameters.
pub fn join_ids(items: &[ItemId]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

/// What `read_items_from_file` found, beyond the usable ids themselves.
#[derive(Debug, Clone, Default)]
pub struct ItemListReport {
    /// Usable ids, input order, first occurrence wins.
    pub items: Vec<ItemId>,
    /// True when the first row's first column was not an id (header row).
    pub skipped_header: bool,
    /// Non-header tokens that did not parse as ids.
    pub dropped: Vec<String>,
    /// Ids seen more than once; every repeat lands here.
    pub duplicates: Vec<ItemId>,
}

/// Read item ids from the first column of a comma-separated file. Extra
/// columns are ignored, so a plain one-id-per-line file works too.
pub fn read_items_from_file(path: &Path) -> Result<ItemListReport> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open input file {}", path.display()))?;

    let mut report = ItemListReport::default();
    let mut seen = HashSet::new();
    for (index, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("failed to read input file {}", path.display()))?;
        let Some(field) = record.get(0) else {
            continue;
        };
        let token = field.trim();
        if token.is_empty() {
            continue;
        }
        match ItemId::parse(token) {
            Ok(item) => {
                if seen.insert(item.clone()) {
                    report.items.push(item);
                } else {
                    report.duplicates.push(item);
                }
            }
            Err(_) if index == 0 => report.skipped_header = true,
            Err(_) => report.dropped.push(token.to_string()),
        }
    }
    Ok(report)
}

/// Draw `count` distinct ids uniformly from `Q1..=Q<max_id>`.
pub fn generate_random_items(count: usize, max_id: u64) -> Result<Vec<ItemId>> {
    if count == 0 {
        bail!("random item count must be at least 1");
    }
    if count as u64 > max_id {
        bail!("cannot draw {count} distinct item ids from Q1..Q{max_id}");
    }

    let mut rng = rand::thread_rng();
    let mut seen = HashSet::with_capacity(count);
    let mut items = Vec::with_capacity(count);
    while items.len() < count {
        let numeric = rng.gen_range(1..=max_id);
        if seen.insert(numeric) {
            items.push(ItemId(numeric));
        }
    }
    Ok(items)
}

/// Split into fixed-size chunks; only the last one may be short.
pub fn batches(items: &[ItemId], batch_size: usize) -> std::slice::Chunks<'_, ItemId> {
    items.chunks(batch_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn id(numeric: u64) -> ItemId {
        ItemId::new(numeric).expect("valid id")
    }

    #[test]
    fn parse_accepts_canonical_ids() {
        assert_eq!(ItemId::parse("Q1").expect("parse"), id(1));
        assert_eq!(ItemId::parse("Q60").expect("parse"), id(60));
        assert_eq!(ItemId::parse(" Q42 ").expect("parse"), id(42));
        assert_eq!(ItemId::parse("Q100000000").expect("parse"), id(100_000_000));
    }

    #[test]
    fn parse_rejects_malformed_tokens() {
        for token in ["", "Q", "60", "q60", "P31", "Q-5", "Q6.5", "Q60x", "QID"] {
            assert!(ItemId::parse(token).is_err(), "accepted {token:?}");
        }
    }

    #[test]
    fn parse_rejects_zero_and_leading_zeros() {
        assert!(ItemId::parse("Q0").is_err());
        assert!(ItemId::parse("Q007").is_err());
    }

    #[test]
    fn display_round_trips() {
        let item = ItemId::parse("Q12345").expect("parse");
        assert_eq!(item.to_string(), "Q12345");
        assert_eq!(item.numeric(), 12345);
    }

    #[test]
    fn join_ids_uses_pipe_separator() {
        assert_eq!(join_ids(&[id(1), id(2), id(3)]), "Q1|Q2|Q3");
        assert_eq!(join_ids(&[]), "");
    }

    #[test]
    fn read_items_skips_header_and_reports_drops() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("items.csv");
        fs::write(
            &path,
            "QID,label\nQ60,New York City\nQ64,Berlin\nbogus,junk\nQ60,repeat\nQ42,Douglas Adams\n",
        )
        .expect("write input");

        let report = read_items_from_file(&path).expect("read items");
        assert_eq!(report.items, vec![id(60), id(64), id(42)]);
        assert!(report.skipped_header);
        assert_eq!(report.dropped, vec!["bogus".to_string()]);
        assert_eq!(report.duplicates, vec![id(60)]);
    }

    #[test]
    fn read_items_accepts_headerless_single_column() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("items.txt");
        fs::write(&path, "Q1\nQ2\nQ3\n").expect("write input");

        let report = read_items_from_file(&path).expect("read items");
        assert_eq!(report.items, vec![id(1), id(2), id(3)]);
        assert!(!report.skipped_header);
        assert!(report.dropped.is_empty());
    }

    #[test]
    fn read_items_fails_for_missing_file() {
        let error = read_items_from_file(Path::new("/nonexistent/items.csv"))
            .expect_err("must fail");
        assert!(error.to_string().contains("failed to open input file"));
    }

    #[test]
    fn random_items_are_distinct_and_in_range() {
        let items = generate_random_items(50, 60).expect("generate");
        assert_eq!(items.len(), 50);
        let distinct: HashSet<_> = items.iter().cloned().collect();
        assert_eq!(distinct.len(), 50);
        assert!(items.iter().all(|item| (1..=60).contains(&item.numeric())));
    }

    #[test]
    fn random_items_require_enough_headroom() {
        assert!(generate_random_items(10, 5).is_err());
        assert!(generate_random_items(0, 100).is_err());
    }

    #[test]
    fn batches_cover_input_in_order() {
        let items: Vec<ItemId> = (1..=7).map(id).collect();
        let chunks: Vec<&[ItemId]> = batches(&items, 3).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[1].len(), 3);
        assert_eq!(chunks[2].len(), 1);
        let rejoined: Vec<ItemId> = chunks.concat();
        assert_eq!(rejoined, items);
    }

    #[test]
    fn oversized_batch_yields_single_chunk() {
        let items: Vec<ItemId> = (1..=4).map(id).collect();
        let chunks: Vec<&[ItemId]> = batches(&items, 100).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], items.as_slice());
    }
}
