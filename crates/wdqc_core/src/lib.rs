//! Data-quality checks for Wikidata items: statement counts, constraint
//! violations, sitelinks, and the LiftWing item-quality score, collected in
//! batches and written to a semicolon-delimited report.

pub mod check;
pub mod config;
pub mod constraints;
pub mod items;
pub mod report;
pub mod scores;
pub mod wikidata;
