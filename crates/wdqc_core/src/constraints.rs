use std::collections::BTreeMap;

use serde::Deserialize;

/// Aggregated constraint-check tallies for one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViolationCounts {
    /// `violation` results (mandatory constraint level).
    pub mandatory: u64,
    /// `warning` results (normal constraint level).
    pub normal: u64,
    /// `suggestion` results.
    pub suggestion: u64,
    /// Statements with at least one result at any of the levels above.
    pub violated_statements: u64,
}

/// One item's slice of a `wbcheckconstraints` response.
#[derive(Debug, Deserialize)]
pub struct ItemConstraintCheck {
    #[serde(default)]
    pub claims: ClaimsPayload,
}

/// `claims` is keyed by property id, except the API serializes an item with
/// no statements as an empty JSON array instead of an empty object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ClaimsPayload {
    ByProperty(BTreeMap<String, Vec<CheckedStatement>>),
    Empty(Vec<serde_json::Value>),
}

impl Default for ClaimsPayload {
    fn default() -> Self {
        Self::Empty(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckedStatement {
    #[serde(default)]
    pub mainsnak: CheckedSnak,
    #[serde(default)]
    pub qualifiers: BTreeMap<String, Vec<CheckedSnak>>,
    #[serde(default)]
    pub references: Vec<CheckedReference>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckedSnak {
    #[serde(default)]
    pub results: Vec<CheckResult>,
}

#[derive(Debug, Deserialize)]
pub struct CheckedReference {
    #[serde(default)]
    pub snaks: BTreeMap<String, Vec<CheckedSnak>>,
}

#[derive(Debug, Deserialize)]
pub struct CheckResult {
    #[serde(default)]
    pub status: String,
}

/// Count constraint results across a statement's main snak, qualifiers, and
/// reference snaks. A statement is violated when it carries at least one
/// result at a counted level; `compliance`, `not-in-scope`, `deprecated`,
/// and `bad-parameters` results never mark it.
pub fn tally_item(check: &ItemConstraintCheck) -> ViolationCounts {
    let mut counts = ViolationCounts::default();
    let ClaimsPayload::ByProperty(by_property) = &check.claims else {
        return counts;
    };

    for statements in by_property.values() {
        for statement in statements {
            let mut violated = false;
            count_results(&statement.mainsnak.results, &mut counts, &mut violated);
            for snaks in statement.qualifiers.values() {
                for snak in snaks {
                    count_results(&snak.results, &mut counts, &mut violated);
                }
            }
            for reference in &statement.references {
                for snaks in reference.snaks.values() {
                    for snak in snaks {
                        count_results(&snak.results, &mut counts, &mut violated);
                    }
                }
            }
            if violated {
                counts.violated_statements += 1;
            }
        }
    }
    counts
}

fn count_results(results: &[CheckResult], counts: &mut ViolationCounts, violated: &mut bool) {
    for result in results {
        match result.status.as_str() {
            "violation" => counts.mandatory += 1,
            "warning" => counts.normal += 1,
            "suggestion" => counts.suggestion += 1,
            _ => continue,
        }
        *violated = true;
    }
}
