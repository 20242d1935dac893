use crate::{NewTargetUser, RenumberedRow, TargetStore, TargetTx, TargetUserRef};
use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::{MySql, MySqlPool, Transaction};
use tracing::debug;

const SELECT_USER_REFS: &str = "select cast(id as signed) as id, email,
        cast(plan_id as signed) as plan_id,
        cast(invite_user_id as signed) as invite_user_id
     from v2_user
     order by id asc";

/// Quote a table name for use in DDL, only plain identifiers are accepted
fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        bail!("Invalid table name: {:?}", name);
    }
    Ok(format!("`{}`", name))
}

/// v2board database holding the `v2_user` table
#[derive(Clone)]
pub struct V2boardDb {
    db: MySqlPool,
}

impl V2boardDb {
    pub async fn connect(options: MySqlConnectOptions) -> Result<Self> {
        // one connection for the open transaction, one for DDL
        let db = MySqlPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Ok(V2boardDb { db })
    }

    pub async fn close(&self) {
        self.db.close().await;
    }

    async fn exec_ddl(&self, sql: &str) -> Result<()> {
        debug!("{}", sql);
        sqlx::raw_sql(sql).execute(&self.db).await?;
        Ok(())
    }
}

#[async_trait]
impl TargetStore for V2boardDb {
    type Tx = V2boardTx;

    async fn begin(&self) -> Result<V2boardTx> {
        Ok(V2boardTx {
            tx: self.db.begin().await?,
        })
    }

    async fn list_users(&self) -> Result<Vec<TargetUserRef>> {
        Ok(sqlx::query_as(SELECT_USER_REFS)
            .fetch_all(&self.db)
            .await?)
    }

    async fn create_scratch_table(&self, name: &str) -> Result<()> {
        self.exec_ddl(&format!("create table {} like v2_user", quote_ident(name)?))
            .await
    }

    async fn drop_table(&self, name: &str) -> Result<()> {
        self.exec_ddl(&format!("drop table if exists {}", quote_ident(name)?))
            .await
    }

    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}%", prefix.replace('_', "\\_"));
        let names: Vec<String> = sqlx::query_scalar(
            "select cast(table_name as char) from information_schema.tables
             where table_schema = database() and table_name like ?
             order by table_name",
        )
        .bind(pattern)
        .fetch_all(&self.db)
        .await?;
        Ok(names
            .into_iter()
            .filter(|n| n.starts_with(prefix))
            .collect())
    }

    async fn reset_identity(&self) -> Result<()> {
        // InnoDB clamps this to max(id) + 1
        self.exec_ddl("alter table v2_user auto_increment = 1").await
    }

    async fn optimize(&self) -> Result<()> {
        self.exec_ddl("optimize table v2_user").await
    }
}

/// Open transaction on the v2board database
pub struct V2boardTx {
    tx: Transaction<'static, MySql>,
}

#[async_trait]
impl TargetTx for V2boardTx {
    async fn list_users(&mut self) -> Result<Vec<TargetUserRef>> {
        Ok(sqlx::query_as(SELECT_USER_REFS)
            .fetch_all(&mut *self.tx)
            .await?)
    }

    async fn max_user_id(&mut self) -> Result<Option<i64>> {
        Ok(
            sqlx::query_scalar("select cast(max(id) as signed) from v2_user")
                .fetch_one(&mut *self.tx)
                .await?,
        )
    }

    async fn insert_user(&mut self, user: &NewTargetUser) -> Result<()> {
        sqlx::query(
            "insert into v2_user (
                id, invite_user_id, telegram_id, email, password, password_algo, password_salt,
                balance, t, u, d, transfer_enable, device_limit, banned, is_admin,
                last_login_at, is_staff, last_login_ip, uuid, group_id, plan_id,
                speed_limit, auto_renewal, remind_expire, remind_traffic, token,
                expired_at, remarks, created_at, updated_at
            ) values (
                ?, ?, ?, ?, ?, null, null,
                ?, ?, ?, ?, ?, null, ?, ?,
                null, ?, null, ?, ?, ?,
                null, ?, ?, ?, ?,
                ?, null, ?, ?
            )",
        )
        .bind(user.id)
        .bind(user.invite_user_id)
        .bind(user.telegram_id)
        .bind(&user.email)
        .bind(&user.password)
        .bind(user.balance)
        .bind(user.t)
        .bind(user.u)
        .bind(user.d)
        .bind(user.transfer_enable)
        .bind(user.banned)
        .bind(user.is_admin)
        .bind(user.is_staff)
        .bind(&user.uuid)
        .bind(user.group_id)
        .bind(user.plan_id)
        .bind(user.auto_renewal)
        .bind(user.remind_expire)
        .bind(user.remind_traffic)
        .bind(&user.token)
        .bind(user.expired_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_plan_id(&mut self, id: i64, plan_id: i64) -> Result<u64> {
        let res = sqlx::query("update v2_user set plan_id = ? where id = ?")
            .bind(plan_id)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected())
    }

    async fn stage_row(&mut self, scratch: &str, row: &RenumberedRow) -> Result<()> {
        let scratch = quote_ident(scratch)?;
        // Rows are staged in ascending old id order and old ids are >= their new id,
        // so the copied row never collides with an id already assigned in scratch.
        sqlx::query(&format!(
            "insert into {} select * from v2_user where id = ?",
            scratch
        ))
        .bind(row.old_id)
        .execute(&mut *self.tx)
        .await?;
        sqlx::query(&format!(
            "update {} set id = ?, invite_user_id = ? where id = ?",
            scratch
        ))
        .bind(row.new_id)
        .bind(row.invite_user_id)
        .bind(row.old_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_all_users(&mut self) -> Result<()> {
        sqlx::query("delete from v2_user")
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn restore_from(&mut self, scratch: &str) -> Result<u64> {
        let res = sqlx::query(&format!(
            "insert into v2_user select * from {} order by id asc",
            quote_ident(scratch)?
        ))
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
