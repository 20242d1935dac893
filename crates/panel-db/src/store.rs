use crate::{NewTargetUser, Purchase, RenumberedRow, SourceUser, TargetUserRef};
use anyhow::Result;
use async_trait::async_trait;

/// Read-only access to the sspanel schema
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// All purchases joined with the buyer's email, ordered by purchase id ascending
    async fn list_purchases(&self) -> Result<Vec<Purchase>>;

    /// All users ordered by id
    async fn list_users(&self) -> Result<Vec<SourceUser>>;

    /// Subscription token from the `link` table
    async fn find_link_token(&self, user_id: i64) -> Result<Option<String>>;

    /// `(id, email)` of every user ordered by id, emails as stored
    async fn list_user_emails(&self) -> Result<Vec<(i64, String)>>;
}

/// Access to the v2board schema outside of any transaction
///
/// DDL lives here because MySQL commits implicitly on DDL, it must never run
/// on a connection which holds an open [TargetTx].
#[async_trait]
pub trait TargetStore: Send + Sync {
    type Tx: TargetTx;

    /// Start a transaction on a dedicated connection
    async fn begin(&self) -> Result<Self::Tx>;

    /// All `v2_user` rows ordered by id
    async fn list_users(&self) -> Result<Vec<TargetUserRef>>;

    /// Create an empty table with the same schema as `v2_user`
    async fn create_scratch_table(&self, name: &str) -> Result<()>;

    async fn drop_table(&self, name: &str) -> Result<()>;

    /// Names of tables in the current schema starting with [prefix]
    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>>;

    /// Reset the `v2_user` identity counter to the lowest free value
    async fn reset_identity(&self) -> Result<()>;

    /// Ask the engine to rebuild `v2_user` storage in primary key order
    async fn optimize(&self) -> Result<()>;
}

/// Writes against `v2_user` grouped in one transaction
///
/// Dropping a transaction without calling [TargetTx::commit] rolls it back.
#[async_trait]
pub trait TargetTx: Send {
    async fn list_users(&mut self) -> Result<Vec<TargetUserRef>>;

    async fn max_user_id(&mut self) -> Result<Option<i64>>;

    async fn insert_user(&mut self, user: &NewTargetUser) -> Result<()>;

    /// Set the plan of a user, returns the number of rows changed
    async fn update_plan_id(&mut self, id: i64, plan_id: i64) -> Result<u64>;

    /// Copy the live row [RenumberedRow::old_id] into [scratch] with its new ids applied
    async fn stage_row(&mut self, scratch: &str, row: &RenumberedRow) -> Result<()>;

    async fn delete_all_users(&mut self) -> Result<()>;

    /// Copy every row of [scratch] back into `v2_user` in id order
    async fn restore_from(&mut self, scratch: &str) -> Result<u64>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
