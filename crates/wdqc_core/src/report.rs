use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

use crate::constraints::ViolationCounts;
use crate::items::ItemId;
use crate::wikidata::SitelinkCounts;

pub const OUTPUT_DELIMITER: u8 = b';';
pub const OUTPUT_COLUMNS: [&str; 9] = [
    "QID",
    "statements",
    "violations_mandatory_level",
    "violations_normal_level",
    "violations_suggestion_level",
    "violated_statements",
    "total_sitelinks",
    "wikipedia_sitelinks",
    "ores_score",
];

/// Everything the checker learned about one item; one output row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRecord {
    pub item: ItemId,
    pub statements: u64,
    pub violations: ViolationCounts,
    pub sitelinks: SitelinkCounts,
    /// `None` renders as an empty field.
    pub ores_score: Option<u8>,
}

/// Semicolon-delimited report, header first, appended batch by batch so a
/// partial run still leaves a usable file behind.
#[derive(Debug)]
pub struct ReportWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
    written: usize,
}

impl ReportWriter {
    /// Create (or truncate) the report and write the header immediately, so
    /// an unwritable destination fails before any network work starts.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create output file {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(OUTPUT_DELIMITER)
            .from_writer(file);
        writer
            .write_record(OUTPUT_COLUMNS)
            .with_context(|| format!("failed to write header to {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("failed to write header to {}", path.display()))?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            written: 0,
        })
    }

    pub fn append(&mut self, records: &[SummaryRecord]) -> Result<()> {
        for record in records {
            let score = record
                .ores_score
                .map(|value| value.to_string())
                .unwrap_or_default();
            self.writer
                .write_record([
                    record.item.to_string(),
                    record.statements.to_string(),
                    record.violations.mandatory.to_string(),
                    record.violations.normal.to_string(),
                    record.violations.suggestion.to_string(),
                    record.violations.violated_statements.to_string(),
                    record.sitelinks.total.to_string(),
                    record.sitelinks.wikipedia.to_string(),
                    score,
                ])
                .with_context(|| format!("failed to write {}", self.path.display()))?;
            self.written += 1;
        }
        self.writer
            .flush()
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

/// Default report destination: `<stem>.out<ext>` next to the input file, or
/// a timestamped name in the working directory for random runs.
pub fn default_output_path(input: Option<&Path>) -> PathBuf {
    match input {
        Some(input) => match input.extension().and_then(OsStr::to_str) {
            Some(extension) => input.with_extension(format!("out.{extension}")),
            None => input.with_extension("out"),
        },
        None => PathBuf::from(format!(
            "random-{}.out.csv",
            Local::now().format("%Y-%m-%d_%H:%M:%S")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn record(numeric: u64, score: Option<u8>) -> SummaryRecord {
        SummaryRecord {
            item: ItemId::new(numeric).expect("valid id"),
            statements: 312,
            violations: ViolationCounts {
                mandatory: 2,
                normal: 5,
                suggestion: 1,
                violated_statements: 6,
            },
            sitelinks: SitelinkCounts {
                total: 93,
                wikipedia: 62,
            },
            ores_score: score,
        }
    }

    #[test]
    fn create_writes_header_immediately() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("report.csv");
        let writer = ReportWriter::create(&path).expect("create report");
        assert_eq!(writer.written(), 0);

        let content = fs::read_to_string(&path).expect("read report");
        let expected = format!("{}\n", OUTPUT_COLUMNS.join(";"));
        assert_eq!(content, expected);
        assert!(content.starts_with("QID;statements;"));
        assert!(content.trim_end().ends_with(";ores_score"));
    }

    #[test]
    fn append_renders_semicolon_rows() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("report.csv");
        let mut writer = ReportWriter::create(&path).expect("create report");
        writer
            .append(&[record(60, Some(4)), record(64, None)])
            .expect("append records");
        assert_eq!(writer.written(), 2);

        let content = fs::read_to_string(&path).expect("read report");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "Q60;312;2;5;1;6;93;62;4");
        assert_eq!(lines[2], "Q64;312;2;5;1;6;93;62;");
    }

    #[test]
    fn create_fails_for_unwritable_destination() {
        let error = ReportWriter::create(Path::new("/nonexistent/dir/report.csv"))
            .expect_err("must fail");
        assert!(error.to_string().contains("failed to create output file"));
    }

    #[test]
    fn default_output_name_derives_from_input_file() {
        assert_eq!(
            default_output_path(Some(Path::new("items.csv"))),
            PathBuf::from("items.out.csv")
        );
        assert_eq!(
            default_output_path(Some(Path::new("data/list.csv"))),
            PathBuf::from("data/list.out.csv")
        );
        assert_eq!(
            default_output_path(Some(Path::new("idlist"))),
            PathBuf::from("idlist.out")
        );
        assert_eq!(
            default_output_path(Some(Path::new("archive.tar.gz"))),
            PathBuf::from("archive.tar.out.gz")
        );
    }

    #[test]
    fn default_output_name_for_random_runs_is_timestamped() {
        let path = default_output_path(None);
        let name = path.to_string_lossy();
        assert!(name.starts_with("random-"));
        assert!(name.ends_with(".out.csv"));
    }
}
