use crate::renumber::SCRATCH_PREFIX;
use anyhow::{Context, Result};
use panel_db::TargetStore;
use tracing::{info, warn};

/// Drop scratch tables left behind by an interrupted renumbering
///
/// Renumbering only touches `v2_user` inside its transaction, so a leaked scratch
/// table never holds the only copy of a row. A dry run only reports them.
pub async fn run<T: TargetStore>(target: &T, dry_run: bool) -> Result<Vec<String>> {
    let leaked = target
        .list_tables(SCRATCH_PREFIX)
        .await
        .context("Failed to list scratch tables")?;
    if dry_run {
        for name in &leaked {
            warn!("Dry run, leaving leftover scratch table {}", name);
        }
        return Ok(leaked);
    }
    for name in &leaked {
        warn!("Dropping leftover scratch table {}", name);
        target.drop_table(name).await?;
    }
    if leaked.is_empty() {
        info!("No leftover scratch tables");
    }
    Ok(leaked)
}
