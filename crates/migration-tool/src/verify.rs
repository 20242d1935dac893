use anyhow::{bail, Result};
use panel_db::{TargetStore, TargetUserRef};
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub rows: usize,
    pub min_id: Option<i64>,
    pub max_id: Option<i64>,
    /// Invite references pointing at no existing row
    pub dangling_invites: usize,
}

impl VerifyReport {
    /// Ids are exactly 1..N
    pub fn is_dense(&self) -> bool {
        match (self.min_id, self.max_id) {
            (Some(min), Some(max)) => min == 1 && max == self.rows as i64,
            _ => self.rows == 0,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.is_dense() && self.dangling_invites == 0
    }
}

pub fn check(rows: &[TargetUserRef]) -> VerifyReport {
    let ids: HashSet<i64> = rows.iter().map(|r| r.id).collect();
    VerifyReport {
        // ids are a primary key, duplicates would already count against density
        rows: rows.len(),
        min_id: ids.iter().min().copied(),
        max_id: ids.iter().max().copied(),
        dangling_invites: rows
            .iter()
            .filter_map(|r| r.invite_user_id)
            .filter(|i| !ids.contains(i))
            .count(),
    }
}

/// Read `v2_user` and report id density and dangling invite references
pub async fn run<T: TargetStore>(target: &T) -> Result<VerifyReport> {
    let report = check(&target.list_users().await?);
    info!(
        "v2_user: {} rows, ids {}..{}, {} dangling invites",
        report.rows,
        report.min_id.unwrap_or(0),
        report.max_id.unwrap_or(0),
        report.dangling_invites
    );
    if !report.is_dense() {
        warn!("v2_user ids are not a dense 1..N sequence");
    }
    if report.dangling_invites > 0 {
        warn!("v2_user has invite references to missing users");
    }
    Ok(report)
}

/// [run], failing unless ids are dense and every invite resolves
pub async fn ensure<T: TargetStore>(target: &T) -> Result<VerifyReport> {
    let report = run(target).await?;
    if !report.is_consistent() {
        bail!("v2_user failed verification: {:?}", report);
    }
    Ok(report)
}
