//! Aggregates over a persisted ledger for the dashboard

use crate::error::ReportError;
use crate::ledger::LedgerService;
use crate::loader::{Table, read_csv};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const SKILL: &str = "Skill";
pub const AGREE: &str = "Agree";
pub const NAME: &str = "Name";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub agreed: usize,
    pub disagreed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillAgreement {
    pub skill: String,
    pub yes: usize,
    pub no: usize,
}

/// Everything the dashboard renders, ready for JSON
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub summary: Summary,
    pub by_skill: Vec<SkillAgreement>,
    pub reviewers: Vec<String>,
    pub selected_reviewer: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn require_columns(table: &Table) -> Result<(), ReportError> {
    for column in [SKILL, AGREE] {
        if !table.has_column(column) {
            return Err(ReportError::MissingColumn(column.to_string()));
        }
    }
    Ok(())
}

fn agree_value(table: &Table, row: usize) -> String {
    table.get(row, AGREE).trim().to_lowercase()
}

pub fn summarize(table: &Table) -> Result<Summary, ReportError> {
    require_columns(table)?;
    let mut summary = Summary {
        total: table.len(),
        ..Default::default()
    };
    for row in 0..table.len() {
        match agree_value(table, row).as_str() {
            "yes" => summary.agreed += 1,
            "no" => summary.disagreed += 1,
            _ => {}
        }
    }
    Ok(summary)
}

/// Yes/No counts per skill, ordered by skill name
pub fn agreement_by_skill(table: &Table) -> Result<Vec<SkillAgreement>, ReportError> {
    require_columns(table)?;
    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for row in 0..table.len() {
        let entry = counts.entry(table.get(row, SKILL)).or_default();
        match agree_value(table, row).as_str() {
            "yes" => entry.0 += 1,
            "no" => entry.1 += 1,
            _ => {}
        }
    }
    Ok(counts
        .into_iter()
        .map(|(skill, (yes, no))| SkillAgreement {
            skill: skill.to_string(),
            yes,
            no,
        })
        .collect())
}

/// Distinct non-empty reviewer names, sorted
pub fn reviewers(table: &Table) -> Vec<String> {
    (0..table.len())
        .map(|row| table.get(row, NAME).trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn filter_by_reviewer(table: &Table, reviewer: &str) -> Table {
    let rows = (0..table.len())
        .filter(|&row| table.get(row, NAME).trim() == reviewer)
        .map(|row| table.rows[row].clone())
        .collect();
    Table {
        columns: table.columns.clone(),
        rows,
    }
}

/// Build the dashboard view, optionally narrowing the detail rows to one reviewer
///
/// Counters and the chart always cover the whole ledger.
pub fn dashboard_view(table: &Table, reviewer: Option<&str>) -> Result<DashboardView, ReportError> {
    let summary = summarize(table)?;
    let by_skill = agreement_by_skill(table)?;
    let reviewers = reviewers(table);

    let selected = reviewer
        .map(str::trim)
        .filter(|r| !r.is_empty() && *r != "All")
        .map(str::to_string);
    let detail = match &selected {
        Some(name) => filter_by_reviewer(table, name),
        None => table.clone(),
    };

    Ok(DashboardView {
        summary,
        by_skill,
        reviewers,
        selected_reviewer: selected,
        columns: detail.columns,
        rows: detail.rows,
    })
}

/// Read the local artifact; `None` when no feedback has been written yet
pub fn load_local(path: &Path) -> Result<Option<Table>, ReportError> {
    if !path.exists() {
        return Ok(None);
    }
    read_csv(path)
        .map(Some)
        .map_err(|source| ReportError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Read a ledger tab; `None` when the tab does not exist or is empty
pub async fn load_ledger(
    ledger: &dyn LedgerService,
    tab: &str,
) -> Result<Option<Table>, ReportError> {
    let Some(handle) = ledger.find(tab).await? else {
        return Ok(None);
    };
    let records = ledger.read_all(&handle).await?;
    if records.is_empty() {
        return Ok(None);
    }
    Ok(Some(Table::from_records(records)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryLedger, append_batch};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn ledger_table() -> Table {
        Table::from_records(vec![
            strings(&["Skill", "Agree", "Name"]),
            strings(&["Forecasting", "Yes", "Jane"]),
            strings(&["Forecasting", "no", "Omar"]),
            strings(&["Audit", "YES", ""]),
            strings(&["Audit", "No", "Jane"]),
            strings(&["Audit", "maybe", "Jane"]),
        ])
    }

    #[test]
    fn counts_case_insensitively() {
        let summary = summarize(&ledger_table()).unwrap();
        assert_eq!(
            summary,
            Summary {
                total: 5,
                agreed: 2,
                disagreed: 2
            }
        );
    }

    #[test]
    fn groups_by_skill() {
        let groups = agreement_by_skill(&ledger_table()).unwrap();
        assert_eq!(
            groups,
            vec![
                SkillAgreement {
                    skill: "Audit".to_string(),
                    yes: 1,
                    no: 1
                },
                SkillAgreement {
                    skill: "Forecasting".to_string(),
                    yes: 1,
                    no: 1
                },
            ]
        );
    }

    #[test]
    fn lists_and_filters_reviewers() {
        let table = ledger_table();
        assert_eq!(reviewers(&table), vec!["Jane", "Omar"]);
        assert_eq!(filter_by_reviewer(&table, "Jane").len(), 3);

        let view = dashboard_view(&table, Some("Omar")).unwrap();
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.summary.total, 5);

        let all = dashboard_view(&table, Some("All")).unwrap();
        assert_eq!(all.rows.len(), 5);
        assert!(all.selected_reviewer.is_none());
    }

    #[test]
    fn tolerates_missing_optional_columns() {
        let table = Table::from_records(vec![strings(&["Skill", "Agree"]), strings(&["A", "Yes"])]);
        assert!(reviewers(&table).is_empty());
        assert_eq!(summarize(&table).unwrap().agreed, 1);
    }

    #[test]
    fn requires_skill_and_agree() {
        let table = Table::from_records(vec![strings(&["Skill"]), strings(&["A"])]);
        assert!(matches!(
            summarize(&table),
            Err(ReportError::MissingColumn(c)) if c == "Agree"
        ));
    }

    #[test]
    fn missing_local_file_means_no_feedback_yet() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_local(&dir.path().join("absent.csv")).unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_master_tab() {
        let ledger = MemoryLedger::new();
        assert!(load_ledger(&ledger, "Master").await.unwrap().is_none());

        append_batch(
            &ledger,
            "Master",
            &strings(&["Skill", "Agree"]),
            &[strings(&["Audit", "No"])],
        )
        .await
        .unwrap();
        let table = load_ledger(&ledger, "Master").await.unwrap().unwrap();
        assert_eq!(summarize(&table).unwrap().disagreed, 1);
    }
}
