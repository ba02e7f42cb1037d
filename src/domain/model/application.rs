use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A job application submitted by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub id: String,
    #[serde(default)]
    pub job_title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
}

/// Counts over the most recently fetched applications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApplicationSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

impl ApplicationSummary {
    pub fn from_records(records: &[ApplicationRecord]) -> Self {
        let mut by_status = BTreeMap::new();
        for record in records {
            let key = if record.status.is_empty() {
                "unknown".to_string()
            } else {
                record.status.to_lowercase()
            };
            *by_status.entry(key).or_insert(0) += 1;
        }
        Self {
            total: records.len(),
            by_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: &str) -> ApplicationRecord {
        ApplicationRecord {
            id: id.into(),
            job_title: "Engineer".into(),
            company: "Acme".into(),
            status: status.into(),
            applied_at: None,
        }
    }

    #[test]
    fn test_summary_groups_by_status() {
        let records = vec![
            record("1", "Applied"),
            record("2", "applied"),
            record("3", "Failed"),
            record("4", ""),
        ];
        let summary = ApplicationSummary::from_records(&records);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.by_status.get("applied"), Some(&2));
        assert_eq!(summary.by_status.get("failed"), Some(&1));
        assert_eq!(summary.by_status.get("unknown"), Some(&1));
    }
}
