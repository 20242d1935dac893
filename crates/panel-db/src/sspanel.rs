use crate::{Purchase, SourceStore, SourceUser};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::MySqlPool;

/// Legacy sspanel database, only ever read from
#[derive(Clone)]
pub struct SspanelDb {
    db: MySqlPool,
}

impl SspanelDb {
    pub async fn connect(options: MySqlConnectOptions) -> Result<Self> {
        let db = MySqlPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Ok(SspanelDb { db })
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[async_trait]
impl SourceStore for SspanelDb {
    async fn list_purchases(&self) -> Result<Vec<Purchase>> {
        let purchases = sqlx::query_as::<_, Purchase>(
            "select cast(b.id as signed) as id, cast(b.userid as signed) as user_id,
                    cast(b.shopid as signed) as shop_id, cast(b.datetime as char) as datetime,
                    u.email
             from bought b
             inner join `user` u on b.userid = u.id
             order by b.id asc",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(purchases)
    }

    async fn list_users(&self) -> Result<Vec<SourceUser>> {
        // decimals and dates are read as text, the migration owns their parsing
        let users = sqlx::query_as::<_, SourceUser>(
            "select cast(id as signed) as id, email, pass, passwd,
                    cast(coalesce(t, 0) as signed) as t,
                    cast(class as signed) as class,
                    cast(class_expire as char) as class_expire,
                    cast(auto_reset_bandwidth as char) as auto_reset_bandwidth,
                    cast(coalesce(transfer_enable, 0) as signed) as transfer_enable,
                    cast(coalesce(u, 0) as signed) as u,
                    cast(coalesce(d, 0) as signed) as d,
                    cast(ref_by as signed) as ref_by,
                    cast(telegram_id as signed) as telegram_id,
                    cast(money as char) as money,
                    cast(reg_date as char) as reg_date
             from `user`
             order by id",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn find_link_token(&self, user_id: i64) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar("select token from link where userid = ? limit 1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?,
        )
    }

    async fn list_user_emails(&self) -> Result<Vec<(i64, String)>> {
        Ok(
            sqlx::query_as("select cast(id as signed), email from `user` order by id")
                .fetch_all(&self.db)
                .await?,
        )
    }
}
