use crate::transform::{PlanRules, ShopPlan, ShopPlanMap};
use anyhow::Result;
use chrono::FixedOffset;
use config::Config;
use panel_db::MySqlConnectOptions;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Legacy sspanel database
    pub source: DatabaseSettings,

    /// v2board database receiving the users
    pub target: DatabaseSettings,

    /// Deployment specific translation tables
    #[serde(default)]
    pub mapping: MappingSettings,
}

impl Settings {
    /// Load settings from [path] layered with `APP__` prefixed environment variables
    pub fn load(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_port() -> u16 {
    3306
}

impl DatabaseSettings {
    pub fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.password)
            .charset("utf8mb4")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MappingSettings {
    /// sspanel shop id to v2board plan id, unlisted shops keep their id
    pub shop_plan_map: Vec<ShopPlan>,

    /// Plans assigned to users with an active tier
    pub plan_rules: PlanRules,

    /// Added to `ref_by`, accounts for rows already present in `v2_user`
    pub invite_offset: i64,

    /// Seconds east of UTC used for sspanel dates without a zone
    pub source_utc_offset: i32,
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            shop_plan_map: [
                (1, 1),
                (2, 1),
                (3, 3),
                (4, 3),
                (5, 4),
                (6, 4),
                (7, 5),
                (12, 2),
                (13, 2),
            ]
            .into_iter()
            .map(|(shop_id, plan_id)| ShopPlan { shop_id, plan_id })
            .collect(),
            plan_rules: PlanRules::default(),
            invite_offset: 1,
            source_utc_offset: 0,
        }
    }
}

impl MappingSettings {
    pub fn shop_plans(&self) -> ShopPlanMap {
        ShopPlanMap::new(&self.shop_plan_map)
    }

    pub fn source_timezone(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.source_utc_offset).ok_or_else(|| {
            anyhow::anyhow!("source-utc-offset out of range: {}", self.source_utc_offset)
        })
    }
}
