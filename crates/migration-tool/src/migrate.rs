use crate::renumber::{self, RenumberReport};
use crate::settings::MappingSettings;
use crate::transform::{self, PlanRules};
use crate::{abort, finish};
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use panel_db::{NewTargetUser, SourceStore, SourceUser, TargetStore, TargetTx};
use tracing::{debug, info, warn};

/// Inputs of the per user derivations which are fixed for a whole run
#[derive(Debug, Clone)]
pub struct MigrationContext {
    pub plan_rules: PlanRules,
    pub invite_offset: i64,
    pub source_tz: FixedOffset,
    /// Time of the migration, decides tier expiry and `updated_at`
    pub now: DateTime<Utc>,
}

impl MigrationContext {
    pub fn new(mapping: &MappingSettings, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            plan_rules: mapping.plan_rules,
            invite_offset: mapping.invite_offset,
            source_tz: mapping.source_timezone()?,
            now,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: usize,
    pub failed: usize,
    /// First and last id handed out
    pub first_id: Option<i64>,
    pub last_id: Option<i64>,
    /// Result of the renumbering which follows a committed migration
    pub renumber: Option<RenumberReport>,
}

/// Derive the v2board row for a sspanel user
pub fn build_target_user(
    id: i64,
    user: &SourceUser,
    token: String,
    ctx: &MigrationContext,
) -> NewTargetUser {
    let quota = user.quota_gib();
    let traffic = transform::traffic(quota, user.transfer_enable, user.u, user.d);
    NewTargetUser {
        id,
        invite_user_id: transform::invite_user_id(user.ref_by, ctx.invite_offset),
        telegram_id: user.telegram_id,
        email: user.email.clone(),
        password: user.pass.clone(),
        balance: user.balance(),
        t: user.t,
        u: traffic.u,
        d: traffic.d,
        transfer_enable: traffic.transfer_enable,
        banned: false,
        is_admin: false,
        is_staff: false,
        uuid: user.passwd.clone(),
        group_id: transform::group_id(user.class),
        plan_id: transform::plan_id(
            user.class,
            user.class_expire.as_deref(),
            quota,
            &ctx.plan_rules,
            ctx.source_tz,
            ctx.now,
        ),
        auto_renewal: false,
        remind_expire: true,
        remind_traffic: true,
        token,
        expired_at: transform::parse_timestamp(user.class_expire.as_deref(), ctx.source_tz),
        created_at: transform::parse_timestamp(user.reg_date.as_deref(), ctx.source_tz),
        updated_at: ctx.now.timestamp(),
    }
}

async fn migrate_user<S: SourceStore, T: TargetTx>(
    source: &S,
    tx: &mut T,
    user: &SourceUser,
    id: i64,
    ctx: &MigrationContext,
) -> Result<NewTargetUser> {
    let token = match source.find_link_token(user.id).await? {
        Some(t) if !t.is_empty() => t,
        _ => transform::generate_token(),
    };
    let row = build_target_user(id, user, token, ctx);
    tx.insert_user(&row).await?;
    Ok(row)
}

/// Insert every sspanel user into `v2_user` after the highest existing id
pub async fn migrate_users<S: SourceStore, T: TargetTx>(
    source: &S,
    tx: &mut T,
    ctx: &MigrationContext,
) -> Result<MigrationReport> {
    let users = source
        .list_users()
        .await
        .context("Failed to load sspanel users")?;
    info!("Found {} users to migrate", users.len());

    let max_id = tx.max_user_id().await?;
    let mut next_id = max_id.unwrap_or(0) + 1;
    info!(
        "Current max v2_user id: {}, next id: {}",
        max_id.unwrap_or(0),
        next_id
    );

    let mut report = MigrationReport::default();
    for user in &users {
        match migrate_user(source, tx, user, next_id, ctx).await {
            Ok(row) => {
                info!(
                    "Migrated user {} -> {} <{}>, class: {}, group: {:?}, plan: {:?}",
                    user.id,
                    row.id,
                    row.email,
                    user.class.unwrap_or(0),
                    row.group_id,
                    row.plan_id
                );
                debug!(
                    "  quota: {} GiB, transfer_enable: {}, u: {}, d: {}, t: {}",
                    user.quota_gib(),
                    row.transfer_enable,
                    row.u,
                    row.d,
                    row.t
                );
                report.first_id.get_or_insert(row.id);
                report.last_id = Some(row.id);
                report.migrated += 1;
                next_id += 1;
            }
            Err(e) => {
                warn!("Failed to migrate user {} <{}>: {}", user.id, user.email, e);
                report.failed += 1;
            }
        }
    }

    info!(
        "User migration done: {} migrated, {} failed",
        report.migrated, report.failed
    );
    Ok(report)
}

/// Run [migrate_users] in one transaction, then renumber `v2_user` in a second one
pub async fn run<S: SourceStore, T: TargetStore>(
    source: &S,
    target: &T,
    ctx: &MigrationContext,
    dry_run: bool,
) -> Result<MigrationReport> {
    info!("Starting user migration");
    let mut tx = target.begin().await?;
    let mut report = match migrate_users(source, &mut tx, ctx).await {
        Ok(r) => r,
        Err(e) => {
            abort(tx, &e).await;
            return Err(e);
        }
    };
    finish(tx, dry_run).await?;

    if dry_run {
        info!("Dry run, skipping id renumbering");
        return Ok(report);
    }
    report.renumber = Some(renumber::run(target, false).await?);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{target_user, MemorySource, MemoryTarget};
    use crate::verify;
    use chrono::TimeZone;

    fn ctx() -> MigrationContext {
        MigrationContext::new(
            &MappingSettings::default(),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn source_user(id: i64, email: &str) -> SourceUser {
        SourceUser {
            id,
            email: email.to_string(),
            pass: format!("hash{}", id),
            passwd: format!("uuid{}", id),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_target_user() {
        let user = SourceUser {
            t: 1700000000,
            class: Some(3),
            class_expire: Some("2099-01-01".into()),
            auto_reset_bandwidth: Some("0.00".into()),
            transfer_enable: 100,
            u: 10,
            d: 10,
            ref_by: Some(4),
            telegram_id: Some(123456),
            money: Some("12.00".into()),
            reg_date: Some("2023-11-14 22:13:20".into()),
            ..source_user(7, "a@x.com")
        };
        let row = build_target_user(2, &user, "abc".into(), &ctx());
        assert_eq!(
            row,
            NewTargetUser {
                id: 2,
                invite_user_id: Some(5),
                telegram_id: Some(123456),
                email: "a@x.com".into(),
                password: "hash7".into(),
                balance: 12,
                t: 1700000000,
                u: 10,
                d: 10,
                transfer_enable: 100,
                banned: false,
                is_admin: false,
                is_staff: false,
                uuid: "uuid7".into(),
                group_id: Some(3),
                plan_id: Some(2),
                auto_renewal: false,
                remind_expire: true,
                remind_traffic: true,
                token: "abc".into(),
                expired_at: Some(4070908800),
                created_at: Some(1700000000),
                updated_at: 1735689600,
            }
        );
    }

    #[test]
    fn test_build_target_user_expired_tier() {
        let user = SourceUser {
            class: Some(5),
            class_expire: Some("2020-01-01 00:00:00".into()),
            auto_reset_bandwidth: Some("50".into()),
            ..source_user(1, "b@x.com")
        };
        let row = build_target_user(9, &user, "t".into(), &ctx());
        assert_eq!(row.group_id, Some(5));
        assert_eq!(row.plan_id, None);
        assert_eq!(row.transfer_enable, 50 * transform::GIB);
        assert_eq!(row.invite_user_id, None);
        assert_eq!(row.expired_at, Some(1577836800));
        assert_eq!(row.created_at, None);
    }

    #[tokio::test]
    async fn test_migrate_end_to_end() {
        let source = MemorySource {
            users: vec![SourceUser {
                class: Some(3),
                class_expire: Some("2099-01-01".into()),
                auto_reset_bandwidth: Some("0".into()),
                transfer_enable: 100,
                u: 10,
                d: 10,
                ..source_user(7, "a@x.com")
            }],
            ..Default::default()
        };
        let target = MemoryTarget::with_users(vec![target_user(1, "admin@x.com")]);

        let report = run(&source, &target, &ctx(), false).await.unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.first_id, Some(2));
        assert_eq!(report.last_id, Some(2));
        assert_eq!(report.renumber.unwrap().rows, 2);

        let users = target.users();
        assert_eq!(users.len(), 2);
        let row = &users[1];
        assert_eq!(row.id, 2);
        assert_eq!(row.email, "a@x.com");
        assert_eq!(row.group_id, Some(3));
        assert_eq!(row.plan_id, Some(2));
        assert_eq!(row.transfer_enable, 100);
        assert_eq!((row.u, row.d), (10, 10));
        assert_eq!(row.token.len(), 32);
        assert!(row.token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_migrate_invites_and_failures() {
        let source = MemorySource {
            users: vec![
                source_user(1, "one@x.com"),
                SourceUser {
                    ref_by: Some(1),
                    ..source_user(2, "two@x.com")
                },
                SourceUser {
                    ref_by: Some(2),
                    ..source_user(3, "broken@x.com")
                },
                SourceUser {
                    ref_by: Some(50),
                    ..source_user(5, "five@x.com")
                },
                source_user(6, "six@x.com"),
            ],
            links: [(1, "linktoken".to_string())].into_iter().collect(),
            broken_links: [6].into_iter().collect(),
            ..Default::default()
        };
        let target = MemoryTarget::with_users(vec![target_user(1, "admin@x.com")]);
        target
            .state
            .lock()
            .unwrap()
            .reject_emails
            .insert("broken@x.com".into());

        let report = run(&source, &target, &ctx(), false).await.unwrap();
        assert_eq!(report.migrated, 3);
        assert_eq!(report.failed, 2);
        assert_eq!((report.first_id, report.last_id), (Some(2), Some(4)));
        // the reference to sspanel user 50 points past the table and is dropped
        assert_eq!(report.renumber.unwrap().nulled_invites, 1);

        let users = target.users();
        let summary: Vec<_> = users
            .iter()
            .map(|u| (u.id, u.email.as_str(), u.invite_user_id))
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, "admin@x.com", None),
                (2, "one@x.com", None),
                (3, "two@x.com", Some(2)),
                (4, "five@x.com", None),
            ]
        );
        assert_eq!(users[1].token, "linktoken");
        assert!(verify::check(&target.list_users().await.unwrap()).is_consistent());
    }

    #[tokio::test]
    async fn test_migrate_after_gap() {
        let source = MemorySource {
            users: vec![source_user(1, "one@x.com"), source_user(2, "two@x.com")],
            ..Default::default()
        };
        let target = MemoryTarget::with_users(vec![
            target_user(1, "admin@x.com"),
            target_user(10, "old@x.com"),
        ]);
        let report = run(&source, &target, &ctx(), false).await.unwrap();
        assert_eq!((report.first_id, report.last_id), (Some(11), Some(12)));

        let ids: Vec<_> = target.users().iter().map(|u| (u.id, u.email.clone())).collect();
        assert_eq!(
            ids,
            vec![
                (1, "admin@x.com".to_string()),
                (2, "old@x.com".to_string()),
                (3, "one@x.com".to_string()),
                (4, "two@x.com".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_migrate_dry_run() {
        let source = MemorySource {
            users: vec![source_user(1, "one@x.com")],
            ..Default::default()
        };
        let target = MemoryTarget::with_users(vec![target_user(1, "admin@x.com")]);
        let report = run(&source, &target, &ctx(), true).await.unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.renumber, None);
        assert_eq!(target.users().len(), 1);
    }
}
