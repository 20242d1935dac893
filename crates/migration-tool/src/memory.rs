//! In-memory stores with transaction semantics for driving the passes in tests.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use panel_db::{
    NewTargetUser, Purchase, RenumberedRow, SourceStore, SourceUser, TargetStore, TargetTx,
    TargetUserRef,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct MemorySource {
    pub users: Vec<SourceUser>,
    pub purchases: Vec<Purchase>,
    pub links: HashMap<i64, String>,
    /// Token lookups for these user ids fail
    pub broken_links: HashSet<i64>,
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn list_purchases(&self) -> Result<Vec<Purchase>> {
        let mut purchases = self.purchases.clone();
        purchases.sort_by_key(|p| p.id);
        Ok(purchases)
    }

    async fn list_users(&self) -> Result<Vec<SourceUser>> {
        let mut users = self.users.clone();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn find_link_token(&self, user_id: i64) -> Result<Option<String>> {
        if self.broken_links.contains(&user_id) {
            bail!("link lookup failed for {}", user_id);
        }
        Ok(self.links.get(&user_id).cloned())
    }

    async fn list_user_emails(&self) -> Result<Vec<(i64, String)>> {
        let mut emails: Vec<_> = self.users.iter().map(|u| (u.id, u.email.clone())).collect();
        emails.sort_by_key(|(id, _)| *id);
        Ok(emails)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TargetState {
    pub users: BTreeMap<i64, NewTargetUser>,
    pub tables: BTreeMap<String, BTreeMap<i64, NewTargetUser>>,
    pub auto_increment: i64,
    pub optimized: usize,
    /// Inserts of these emails fail
    pub reject_emails: HashSet<String>,
    /// Plan updates of these ids fail
    pub reject_updates: HashSet<i64>,
    /// Restoring from scratch fails
    pub fail_restore: bool,
    /// Number of plan updates which changed a row
    pub plan_writes: usize,
}

/// Shared target database, transactions work on a snapshot and swap it in on commit
#[derive(Clone, Default)]
pub struct MemoryTarget {
    pub state: Arc<Mutex<TargetState>>,
}

impl MemoryTarget {
    pub fn with_users(users: Vec<NewTargetUser>) -> Self {
        let target = MemoryTarget::default();
        {
            let mut state = target.state.lock().unwrap();
            for u in users {
                state.users.insert(u.id, u);
            }
            state.auto_increment = state.users.keys().max().map(|m| m + 1).unwrap_or(1);
        }
        target
    }

    pub fn snapshot(&self) -> TargetState {
        self.state.lock().unwrap().clone()
    }

    pub fn users(&self) -> Vec<NewTargetUser> {
        self.snapshot().users.into_values().collect()
    }
}

/// Seed row with just enough columns set for the passes
pub fn target_user(id: i64, email: &str) -> NewTargetUser {
    NewTargetUser {
        id,
        email: email.to_string(),
        token: format!("token{}", id),
        ..Default::default()
    }
}

fn refs(users: &BTreeMap<i64, NewTargetUser>) -> Vec<TargetUserRef> {
    users
        .values()
        .map(|u| TargetUserRef {
            id: u.id,
            email: u.email.clone(),
            plan_id: u.plan_id,
            invite_user_id: u.invite_user_id,
        })
        .collect()
}

#[async_trait]
impl TargetStore for MemoryTarget {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        Ok(MemoryTx {
            store: self.state.clone(),
            working: self.snapshot(),
        })
    }

    async fn list_users(&self) -> Result<Vec<TargetUserRef>> {
        Ok(refs(&self.state.lock().unwrap().users))
    }

    async fn create_scratch_table(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.tables.contains_key(name) {
            bail!("table {} already exists", name);
        }
        state.tables.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn drop_table(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().tables.remove(name);
        Ok(())
    }

    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tables
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn reset_identity(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.auto_increment = state.users.keys().max().map(|m| m + 1).unwrap_or(1);
        Ok(())
    }

    async fn optimize(&self) -> Result<()> {
        self.state.lock().unwrap().optimized += 1;
        Ok(())
    }
}

pub struct MemoryTx {
    store: Arc<Mutex<TargetState>>,
    working: TargetState,
}

#[async_trait]
impl TargetTx for MemoryTx {
    async fn list_users(&mut self) -> Result<Vec<TargetUserRef>> {
        Ok(refs(&self.working.users))
    }

    async fn max_user_id(&mut self) -> Result<Option<i64>> {
        Ok(self.working.users.keys().max().copied())
    }

    async fn insert_user(&mut self, user: &NewTargetUser) -> Result<()> {
        if self.working.reject_emails.contains(&user.email) {
            bail!("insert rejected for {}", user.email);
        }
        if self.working.users.contains_key(&user.id) {
            bail!("duplicate id {}", user.id);
        }
        if self.working.users.values().any(|u| u.email == user.email) {
            bail!("duplicate email {}", user.email);
        }
        self.working.users.insert(user.id, user.clone());
        self.working.auto_increment = self.working.auto_increment.max(user.id + 1);
        Ok(())
    }

    async fn update_plan_id(&mut self, id: i64, plan_id: i64) -> Result<u64> {
        if self.working.reject_updates.contains(&id) {
            bail!("update rejected for {}", id);
        }
        match self.working.users.get_mut(&id) {
            Some(u) if u.plan_id != Some(plan_id) => {
                u.plan_id = Some(plan_id);
                self.working.plan_writes += 1;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn stage_row(&mut self, scratch: &str, row: &RenumberedRow) -> Result<()> {
        let mut user = self
            .working
            .users
            .get(&row.old_id)
            .cloned()
            .ok_or_else(|| anyhow!("no row {}", row.old_id))?;
        let table = self
            .working
            .tables
            .get_mut(scratch)
            .ok_or_else(|| anyhow!("no table {}", scratch))?;
        user.id = row.new_id;
        user.invite_user_id = row.invite_user_id;
        if table.insert(row.new_id, user).is_some() {
            bail!("duplicate id {} in {}", row.new_id, scratch);
        }
        Ok(())
    }

    async fn delete_all_users(&mut self) -> Result<()> {
        self.working.users.clear();
        Ok(())
    }

    async fn restore_from(&mut self, scratch: &str) -> Result<u64> {
        if self.working.fail_restore {
            bail!("restore from {} failed", scratch);
        }
        let table = self
            .working
            .tables
            .get(scratch)
            .ok_or_else(|| anyhow!("no table {}", scratch))?;
        for (id, user) in table {
            if self.working.users.insert(*id, user.clone()).is_some() {
                bail!("duplicate id {}", id);
            }
        }
        Ok(table.len() as u64)
    }

    async fn commit(self) -> Result<()> {
        *self.store.lock().unwrap() = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
