//! Field derivations from sspanel columns to v2board columns.
//!
//! Everything here is pure apart from [generate_token].

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Bytes in one GiB
pub const GIB: i64 = 1024 * 1024 * 1024;

const DATE_TIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShopPlan {
    pub shop_id: i64,
    pub plan_id: i64,
}

/// Lookup from sspanel shop id to v2board plan id
#[derive(Debug, Clone, Default)]
pub struct ShopPlanMap {
    plans: HashMap<i64, i64>,
}

impl ShopPlanMap {
    pub fn new(entries: &[ShopPlan]) -> Self {
        Self {
            plans: entries.iter().map(|e| (e.shop_id, e.plan_id)).collect(),
        }
    }

    /// Shops without an entry keep their own id as plan id
    pub fn plan_for(&self, shop_id: i64) -> i64 {
        self.plans.get(&shop_id).copied().unwrap_or(shop_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PlanRules {
    /// Plan for an active tier with a periodic quota
    pub with_quota: i64,
    /// Plan for an active tier without a periodic quota
    pub without_quota: i64,
}

impl Default for PlanRules {
    fn default() -> Self {
        Self {
            with_quota: 1,
            without_quota: 2,
        }
    }
}

/// Traffic columns of a migrated user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Traffic {
    pub transfer_enable: i64,
    pub u: i64,
    pub d: i64,
}

fn has_tier(class: Option<i64>) -> bool {
    matches!(class, Some(c) if c != 0)
}

pub fn group_id(class: Option<i64>) -> Option<i64> {
    class.filter(|c| *c != 0)
}

/// Pick the plan for a tier, only an unexpired tier gets one
pub fn plan_id(
    class: Option<i64>,
    class_expire: Option<&str>,
    quota_gib: f64,
    rules: &PlanRules,
    tz: FixedOffset,
    now: DateTime<Utc>,
) -> Option<i64> {
    if !has_tier(class) {
        return None;
    }
    let expires = parse_timestamp(class_expire, tz)?;
    if expires <= now.timestamp() {
        return None;
    }
    if quota_gib == 0.0 {
        Some(rules.without_quota)
    } else {
        Some(rules.with_quota)
    }
}

pub fn gib_to_bytes(gib: f64) -> i64 {
    if gib <= 0.0 {
        return 0;
    }
    (gib * GIB as f64) as i64
}

/// Carry the legacy usage over to the new allowance
///
/// The legacy allowance left unused is subtracted from the new allowance and
/// the result is split between upload and download in the legacy ratio.
pub fn traffic(quota_gib: f64, transfer_enable: i64, u: i64, d: i64) -> Traffic {
    let (u, d) = (u.max(0), d.max(0));
    let target_enable = if quota_gib > 0.0 {
        gib_to_bytes(quota_gib)
    } else {
        transfer_enable
    };

    let unused = (transfer_enable - u - d).max(0);
    let remaining = (target_enable - unused).max(0);

    let total = u as i128 + d as i128;
    let (u_out, d_out) = if total > 0 {
        (
            (remaining as i128 * u as i128 / total) as i64,
            (remaining as i128 * d as i128 / total) as i64,
        )
    } else {
        (0, 0)
    };

    Traffic {
        transfer_enable: target_enable,
        u: u_out,
        d: d_out,
    }
}

/// Parse a sspanel date string into unix seconds
///
/// Naive values are read in [tz]. Empty and unparseable values (including the
/// MySQL zero date) give `None`.
pub fn parse_timestamp(value: Option<&str>, tz: FixedOffset) -> Option<i64> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }
    let naive = DATE_TIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(value, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    tz.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp())
}

/// `ref_by` shifted by [offset], 0 means no inviter
pub fn invite_user_id(ref_by: Option<i64>, offset: i64) -> Option<i64> {
    ref_by.filter(|r| *r != 0).map(|r| r + offset)
}

/// Random 32 char hex subscription token
pub fn generate_token() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Join key for matching accounts across both databases
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
