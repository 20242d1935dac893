use sqlx::FromRow;

/// A row of the sspanel `bought` table joined with the buyer's email
#[derive(Debug, Clone, Default, FromRow)]
pub struct Purchase {
    /// Monotonic purchase id
    pub id: i64,
    /// Source user who made the purchase
    pub user_id: i64,
    /// Product id from the sspanel shop
    pub shop_id: i64,
    /// Purchase time as stored by sspanel, only used for logging
    pub datetime: Option<String>,
    /// Email of the buyer
    pub email: String,
}

/// A row of the sspanel `user` table
#[derive(Debug, Clone, Default, FromRow)]
pub struct SourceUser {
    pub id: i64,
    pub email: String,
    /// Login password hash
    pub pass: String,
    /// Proxy password, becomes the v2board uuid
    pub passwd: String,
    /// Last traffic report (unix seconds)
    pub t: i64,
    /// Subscription tier, 0 or null means none
    pub class: Option<i64>,
    /// Tier expiry as a date string
    pub class_expire: Option<String>,
    /// Periodic quota in GiB as a decimal string
    pub auto_reset_bandwidth: Option<String>,
    /// Total allowance in bytes
    pub transfer_enable: i64,
    /// Upload bytes
    pub u: i64,
    /// Download bytes
    pub d: i64,
    /// Inviting user id
    pub ref_by: Option<i64>,
    pub telegram_id: Option<i64>,
    /// Account balance as a decimal string
    pub money: Option<String>,
    /// Registration date string
    pub reg_date: Option<String>,
}

impl SourceUser {
    /// Quota in GiB, unparseable or missing values count as 0
    pub fn quota_gib(&self) -> f64 {
        parse_decimal(self.auto_reset_bandwidth.as_deref())
    }

    /// Balance rounded to a whole unit, the way MySQL stores a decimal into an int column
    pub fn balance(&self) -> i64 {
        parse_decimal(self.money.as_deref()).round() as i64
    }
}

fn parse_decimal(v: Option<&str>) -> f64 {
    v.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|f| f.is_finite())
        .unwrap_or(0.0)
}

/// The subset of `v2_user` columns the migration passes read back
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TargetUserRef {
    pub id: i64,
    pub email: String,
    pub plan_id: Option<i64>,
    pub invite_user_id: Option<i64>,
}

/// A complete `v2_user` row as written by the user migration
///
/// Nullable columns which are never populated (`password_algo`, `password_salt`,
/// `device_limit`, `last_login_at`, `last_login_ip`, `speed_limit`, `remarks`)
/// are left out and written as null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTargetUser {
    pub id: i64,
    pub invite_user_id: Option<i64>,
    pub telegram_id: Option<i64>,
    pub email: String,
    pub password: String,
    pub balance: i64,
    pub t: i64,
    pub u: i64,
    pub d: i64,
    pub transfer_enable: i64,
    pub banned: bool,
    pub is_admin: bool,
    pub is_staff: bool,
    pub uuid: String,
    pub group_id: Option<i64>,
    pub plan_id: Option<i64>,
    pub auto_renewal: bool,
    pub remind_expire: bool,
    pub remind_traffic: bool,
    pub token: String,
    pub expired_at: Option<i64>,
    pub created_at: Option<i64>,
    pub updated_at: i64,
}

/// One row of a renumbering plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenumberedRow {
    pub old_id: i64,
    pub new_id: i64,
    /// Remapped invite reference, already nulled when it could not be mapped
    pub invite_user_id: Option<i64>,
}
