use anyhow::Result;
use panel_db::TargetTx;
use tracing::{error, info};

pub mod backfill;
pub mod confirm;
pub mod migrate;
pub mod renumber;
pub mod settings;
pub mod sweep;
pub mod transform;
pub mod verify;

#[cfg(test)]
mod memory;

/// Commit [tx], or roll it back when this is a dry run
pub(crate) async fn finish<T: TargetTx>(tx: T, dry_run: bool) -> Result<()> {
    if dry_run {
        info!("Dry run, rolling back");
        tx.rollback().await
    } else {
        tx.commit().await?;
        info!("Transaction committed");
        Ok(())
    }
}

/// Roll back [tx] after [err], a failing rollback is only logged
pub(crate) async fn abort<T: TargetTx>(tx: T, err: &anyhow::Error) {
    error!("{:#}, rolling back", err);
    if let Err(e) = tx.rollback().await {
        error!("Rollback failed: {}", e);
    }
}
