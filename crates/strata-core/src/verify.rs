use crate::lineage::SnapshotRecord;
use crate::snapshotter::Kind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strata_store::StoreLayout;

#[derive(Debug, Default, Serialize)]
pub struct LineageReport {
    pub checked: usize,
    pub passed: usize,
    pub violations: Vec<LineageViolation>,
}

impl LineageReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineageViolation {
    pub key: String,
    pub reason: String,
}

/// Record counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageStats {
    pub total: usize,
    pub active: usize,
    pub committed: usize,
    pub views: usize,
}

pub fn lineage_stats(records: &[SnapshotRecord]) -> LineageStats {
    let mut stats = LineageStats {
        total: records.len(),
        ..LineageStats::default()
    };
    for rec in records {
        match rec.kind {
            Kind::Active if rec.readonly => {
                stats.active += 1;
                stats.views += 1;
            }
            Kind::Active => stats.active += 1,
            Kind::Committed => stats.committed += 1,
        }
    }
    stats
}

/// Check a namespace's records against the lineage invariants: every
/// parent exists and is committed, every child count matches the records
/// that name it as parent, and every record's storage directory exists.
pub fn verify_lineage(records: &[SnapshotRecord], layout: &StoreLayout) -> LineageReport {
    let by_key: BTreeMap<&str, &SnapshotRecord> =
        records.iter().map(|r| (r.key.as_str(), r)).collect();

    let mut referenced: BTreeMap<&str, u32> = BTreeMap::new();
    for rec in records {
        if let Some(parent) = &rec.parent {
            *referenced.entry(parent.as_str()).or_default() += 1;
        }
    }

    let mut report = LineageReport {
        checked: records.len(),
        ..LineageReport::default()
    };

    for rec in records {
        let mut reasons = Vec::new();

        if let Some(parent) = &rec.parent {
            match by_key.get(parent.as_str()) {
                None => reasons.push(format!("parent '{parent}' does not exist")),
                Some(p) if p.kind != Kind::Committed => {
                    reasons.push(format!("parent '{parent}' is not committed"));
                }
                Some(_) => {}
            }
        }

        let actual = referenced.get(rec.key.as_str()).copied().unwrap_or(0);
        if rec.children != actual {
            reasons.push(format!(
                "child count is {} but {actual} records reference it",
                rec.children
            ));
        }

        if !layout.snapshot_fs(&rec.id).is_dir() {
            reasons.push(format!("storage directory for id {} is missing", rec.id));
        }

        if reasons.is_empty() {
            report.passed += 1;
        } else {
            for reason in reasons {
                report.violations.push(LineageViolation {
                    key: rec.key.to_string(),
                    reason,
                });
            }
        }
    }

    report
}
