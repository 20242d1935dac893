//! Dense renumbering of `v2_user` ids.
//!
//! Rows are staged with their new ids in a scratch table, the live table is
//! emptied and refilled from scratch in id order. All row changes share one
//! transaction. The scratch table itself is DDL and lives outside of it, it is
//! dropped on every exit path and swept on startup if a run was killed.

use crate::{abort, finish};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use panel_db::{RenumberedRow, TargetStore, TargetTx, TargetUserRef};
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Prefix of scratch tables, used to find leaked ones
pub const SCRATCH_PREFIX: &str = "v2_user_renumber_";

pub fn scratch_table_name(now: DateTime<Utc>) -> String {
    format!("{}{}", SCRATCH_PREFIX, now.timestamp())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenumberReport {
    /// Rows rewritten
    pub rows: usize,
    /// Invite references dropped because they pointed at no existing row
    pub nulled_invites: usize,
}

/// Assign ids 1..N in ascending old id order and remap invite references
///
/// An invite reference to an id which is not present is set to null.
pub fn plan_renumbering(rows: &[TargetUserRef]) -> Vec<RenumberedRow> {
    let mut old_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    old_ids.sort_unstable();
    let id_map: HashMap<i64, i64> = old_ids
        .iter()
        .enumerate()
        .map(|(i, old)| (*old, i as i64 + 1))
        .collect();

    let mut plan: Vec<RenumberedRow> = rows
        .iter()
        .map(|r| RenumberedRow {
            old_id: r.id,
            new_id: id_map[&r.id],
            invite_user_id: r.invite_user_id.and_then(|i| id_map.get(&i).copied()),
        })
        .collect();
    plan.sort_by_key(|r| r.old_id);
    plan
}

async fn renumber_rows<T: TargetTx>(tx: &mut T, scratch: &str) -> Result<RenumberReport> {
    let rows = tx.list_users().await.context("Failed to load v2_user")?;
    if rows.is_empty() {
        info!("v2_user is empty, nothing to renumber");
        return Ok(RenumberReport::default());
    }
    info!("Renumbering {} users", rows.len());

    let invites: HashMap<i64, Option<i64>> =
        rows.iter().map(|r| (r.id, r.invite_user_id)).collect();
    let plan = plan_renumbering(&rows);

    let mut report = RenumberReport {
        rows: plan.len(),
        nulled_invites: 0,
    };
    for row in &plan {
        if let Some(Some(old_invite)) = invites.get(&row.old_id) {
            if row.invite_user_id.is_none() {
                warn!(
                    "User {} invite_user_id {} does not exist, setting null",
                    row.old_id, old_invite
                );
                report.nulled_invites += 1;
            }
        }
        tx.stage_row(scratch, row)
            .await
            .with_context(|| format!("Failed to stage user {}", row.old_id))?;
        info!(
            "ID {} -> {}, invite_user_id: {}",
            row.old_id,
            row.new_id,
            row.invite_user_id
                .map(|i| i.to_string())
                .unwrap_or_else(|| "null".to_string())
        );
    }

    tx.delete_all_users().await?;
    let restored = tx.restore_from(scratch).await?;
    info!("Restored {} users from {}", restored, scratch);
    Ok(report)
}

/// Renumber `v2_user` ids to 1..N in their current order
pub async fn run<T: TargetStore>(target: &T, dry_run: bool) -> Result<RenumberReport> {
    let scratch = scratch_table_name(Utc::now());
    info!("Starting id renumbering using {}", scratch);
    target
        .create_scratch_table(&scratch)
        .await
        .with_context(|| format!("Failed to create {}", scratch))?;

    let result = renumber_in_tx(target, &scratch, dry_run).await;

    if let Err(e) = target.drop_table(&scratch).await {
        error!("Failed to drop {}, remove it manually: {}", scratch, e);
    }
    let report = result?;

    if report.rows > 0 && !dry_run {
        target.reset_identity().await?;
        target.optimize().await?;
    }
    info!(
        "Id renumbering done: {} rows, {} invites nulled",
        report.rows, report.nulled_invites
    );
    Ok(report)
}

async fn renumber_in_tx<T: TargetStore>(
    target: &T,
    scratch: &str,
    dry_run: bool,
) -> Result<RenumberReport> {
    let mut tx = target.begin().await?;
    let report = match renumber_rows(&mut tx, scratch).await {
        Ok(r) => r,
        Err(e) => {
            abort(tx, &e).await;
            return Err(e);
        }
    };
    finish(tx, dry_run).await?;
    Ok(report)
}
