use crate::transform::{normalize_email, ShopPlanMap};
use crate::{abort, finish};
use anyhow::{Context, Result};
use panel_db::{Purchase, SourceStore, TargetStore, TargetTx, TargetUserRef};
use std::collections::HashMap;
use tracing::{info, warn};

/// Most recent purchase of a sspanel user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestPurchase {
    pub purchase_id: i64,
    pub shop_id: i64,
    pub datetime: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Users whose plan was written
    pub updated: usize,
    /// Users which already had the mapped plan
    pub unchanged: usize,
    /// Users without a source account, without purchases, or which failed
    pub skipped: usize,
}

/// Keep the purchase with the highest id for every user
pub fn latest_purchases(purchases: &[Purchase]) -> HashMap<i64, LatestPurchase> {
    let mut latest: HashMap<i64, LatestPurchase> = HashMap::new();
    for p in purchases {
        let newer = latest
            .get(&p.user_id)
            .map_or(true, |l| p.id > l.purchase_id);
        if newer {
            latest.insert(
                p.user_id,
                LatestPurchase {
                    purchase_id: p.id,
                    shop_id: p.shop_id,
                    datetime: p.datetime.clone(),
                },
            );
        }
    }
    latest
}

/// Source user id per normalized email, the lowest id wins on duplicates
pub fn email_index(users: &[(i64, String)]) -> HashMap<String, i64> {
    let mut index: HashMap<String, i64> = HashMap::new();
    for (id, email) in users {
        index
            .entry(normalize_email(email))
            .and_modify(|e| *e = (*e).min(*id))
            .or_insert(*id);
    }
    index
}

enum Outcome {
    Updated,
    Unchanged,
    Skipped,
}

async fn backfill_user<T: TargetTx>(
    tx: &mut T,
    user: &TargetUserRef,
    emails: &HashMap<String, i64>,
    latest: &HashMap<i64, LatestPurchase>,
    plans: &ShopPlanMap,
) -> Result<Outcome> {
    let Some(source_id) = emails.get(&normalize_email(&user.email)) else {
        info!(
            "Skipping user {} <{}>: not found in sspanel",
            user.id, user.email
        );
        return Ok(Outcome::Skipped);
    };
    let Some(purchase) = latest.get(source_id) else {
        info!("Skipping user {} <{}>: no purchases", user.id, user.email);
        return Ok(Outcome::Skipped);
    };

    let plan_id = plans.plan_for(purchase.shop_id);
    if user.plan_id == Some(plan_id) {
        return Ok(Outcome::Unchanged);
    }
    tx.update_plan_id(user.id, plan_id).await?;
    info!(
        "Updated user {} <{}>: shop {} -> plan {}, bought {} at {}",
        user.id,
        user.email,
        purchase.shop_id,
        plan_id,
        purchase.purchase_id,
        purchase.datetime.as_deref().unwrap_or("unknown")
    );
    Ok(Outcome::Updated)
}

/// Write the plan of every v2board user from their latest sspanel purchase
pub async fn backfill_plans<S: SourceStore, T: TargetTx>(
    source: &S,
    tx: &mut T,
    plans: &ShopPlanMap,
) -> Result<BackfillReport> {
    let purchases = source
        .list_purchases()
        .await
        .context("Failed to load purchases")?;
    info!("Found {} purchases", purchases.len());

    let latest = latest_purchases(&purchases);
    info!("Found latest purchase for {} users", latest.len());

    let emails = email_index(
        &source
            .list_user_emails()
            .await
            .context("Failed to load sspanel emails")?,
    );
    info!("Indexed {} sspanel emails", emails.len());

    let users = tx.list_users().await.context("Failed to load v2_user")?;
    info!("Found {} v2board users", users.len());

    let mut report = BackfillReport::default();
    for user in &users {
        match backfill_user(tx, user, &emails, &latest, plans).await {
            Ok(Outcome::Updated) => report.updated += 1,
            Ok(Outcome::Unchanged) => report.unchanged += 1,
            Ok(Outcome::Skipped) => report.skipped += 1,
            Err(e) => {
                warn!("Failed to update user {} <{}>: {}", user.id, user.email, e);
                report.skipped += 1;
            }
        }
    }

    info!(
        "Plan backfill done: {} updated, {} unchanged, {} skipped",
        report.updated, report.unchanged, report.skipped
    );
    Ok(report)
}

/// Run [backfill_plans] in one transaction on the target
pub async fn run<S: SourceStore, T: TargetStore>(
    source: &S,
    target: &T,
    plans: &ShopPlanMap,
    dry_run: bool,
) -> Result<BackfillReport> {
    info!("Starting plan backfill");
    let mut tx = target.begin().await?;
    let report = match backfill_plans(source, &mut tx, plans).await {
        Ok(r) => r,
        Err(e) => {
            abort(tx, &e).await;
            return Err(e);
        }
    };
    finish(tx, dry_run).await?;
    Ok(report)
}
