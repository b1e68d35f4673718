//! Reconciliation engine
//!
//! Drives one request from text to a committed kernel change:
//! classify → derive set name → resolve set → idempotency check → stage →
//! commit. Each call opens its own connection and transaction; nothing is
//! shared between calls except the read-only [`EngineConfig`].

use crate::core::address::{Address, Family, classify};
use crate::core::backend::{Connection, Connector};
use crate::core::error::{Error, Failure, Result};
use crate::core::membership;
use crate::core::resolver::{self, EngineConfig};
use crate::core::ruleset::Set;
use crate::core::transaction::Transaction;
use tracing::debug;

/// Requested change to a set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Task {
    Add,
    Delete,
    Flush,
}

/// Advisory outcome of a successful reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum Outcome {
    #[strum(serialize = "added")]
    Added,
    /// Address was already in the set; nothing staged
    #[strum(serialize = "already")]
    Already,
    #[strum(serialize = "deleted")]
    Deleted,
    /// Address was not in the set; nothing staged
    #[strum(serialize = "not present")]
    NotPresent,
    /// Flush committed
    #[strum(serialize = "requested")]
    Requested,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    Add,
    Delete,
}

pub struct Engine<C: Connector> {
    connector: C,
    config: EngineConfig,
}

impl<C: Connector> Engine<C> {
    pub fn new(connector: C, config: EngineConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Entry point for the HTTP layer: `task` is free text.
    ///
    /// An unknown task fails before anything else happens, including
    /// address classification.
    pub async fn handle(
        &self,
        task: &str,
        set_prefix: &str,
        address: &str,
    ) -> std::result::Result<Outcome, Failure> {
        let task: Task = task
            .parse()
            .map_err(|_| Failure::bare(Error::UnknownTask(task.to_string())))?;
        self.reconcile(task, set_prefix, address).await
    }

    /// Runs `task` for `address` against the set derived from `set_prefix`.
    ///
    /// For `add`/`delete` the set is `set_prefix` plus the address family
    /// suffix. For `flush` the address is ignored and `set_prefix` names the
    /// set verbatim; see [`Engine::flush_families`] for flushing both
    /// per-family sets at once.
    pub async fn reconcile(
        &self,
        task: Task,
        set_prefix: &str,
        address: &str,
    ) -> std::result::Result<Outcome, Failure> {
        match task {
            Task::Add | Task::Delete => {
                let addr = classify(address).map_err(|e| Failure::new(Some(task), None, e))?;
                let set_name = addr.family.set_name(set_prefix);
                let mutation = if task == Task::Add {
                    Mutation::Add
                } else {
                    Mutation::Delete
                };

                self.update(mutation, &set_name, &addr)
                    .await
                    .map_err(|e| Failure::new(Some(task), Some(set_name), e))
            }
            Task::Flush => {
                let targets = [(set_prefix.to_string(), Family::from_set_name(set_prefix))];
                self.flush(&targets)
                    .await
                    .map_err(|e| Failure::new(Some(task), Some(set_prefix.to_string()), e))
            }
        }
    }

    /// Flushes `<prefix>4` and `<prefix>6` in a single transaction.
    pub async fn flush_families(&self, prefix: &str) -> std::result::Result<Outcome, Failure> {
        let targets = [Family::Ipv4, Family::Ipv6].map(|f| (f.set_name(prefix), Some(f)));
        self.flush(&targets)
            .await
            .map_err(|e| Failure::new(Some(Task::Flush), Some(prefix.to_string()), e))
    }

    async fn update(&self, mutation: Mutation, set_name: &str, addr: &Address) -> Result<Outcome> {
        let mut conn = self.connect()?;
        let mut tx = Transaction::new();

        let resolved =
            resolver::resolve(&mut conn, &mut tx, &self.config, set_name, Some(addr.family))
                .await?;
        let present = membership::contains(&mut conn, &resolved.set, &addr.key).await?;

        let staged = match mutation {
            Mutation::Add if present => Ok(Outcome::Already),
            Mutation::Add => tx
                .stage_add_element(&resolved.set, &addr.key)
                .map(|()| Outcome::Added),
            Mutation::Delete if !present => Ok(Outcome::NotPresent),
            Mutation::Delete => tx
                .stage_delete_element(&resolved.set, &addr.key)
                .map(|()| Outcome::Deleted),
        };
        let outcome = staged.map_err(|e| Error::StageFailed {
            set: set_name.to_string(),
            reason: e.to_string(),
        })?;

        debug!(set = set_name, address = %addr.ip, outcome = %outcome, created = resolved.created, "staged");

        let created: Vec<Set> = resolved.created.then_some(resolved.set).into_iter().collect();
        self.commit(&mut conn, tx, &created).await?;
        Ok(outcome)
    }

    async fn flush(&self, targets: &[(String, Option<Family>)]) -> Result<Outcome> {
        let mut conn = self.connect()?;
        let mut tx = Transaction::new();

        let names: Vec<&str> = targets.iter().map(|(name, _)| name.as_str()).collect();
        let table = resolver::find_table(&mut conn, &self.config, &names.join(", ")).await?;
        let mut created = Vec::new();

        for (name, family) in targets {
            let resolved = resolver::resolve_in(&mut conn, &mut tx, &table, name, *family).await?;
            tx.stage_flush_set(&resolved.set);
            debug!(set = %name, created = resolved.created, "staged flush");
            if resolved.created {
                created.push(resolved.set);
            }
        }

        self.commit(&mut conn, tx, &created).await?;
        Ok(Outcome::Requested)
    }

    fn connect(&self) -> Result<C::Conn> {
        self.connector
            .connect()
            .map_err(|source| Error::ConnectFailed { source })
    }

    /// Commits a non-empty transaction, then confirms that sets it created exist.
    async fn commit(&self, conn: &mut C::Conn, tx: Transaction, created: &[Set]) -> Result<()> {
        if tx.is_empty() {
            return Ok(());
        }

        conn.commit(tx)
            .await
            .map_err(|source| Error::CommitFailed { source })?;

        for set in created {
            resolver::verify_created(conn, set).await?;
        }
        Ok(())
    }
}
