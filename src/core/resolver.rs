//! Set resolution: find the configured table, then the named set in it,
//! staging the set's creation when it does not exist yet.

use crate::core::address::Family;
use crate::core::backend::Connection;
use crate::core::error::{Error, Result};
use crate::core::ruleset::{Set, Table, TableFamily};
use crate::core::transaction::Transaction;
use tracing::debug;

/// Read-only engine configuration, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Name of the pre-existing table holding the sets
    pub table: String,
    /// When set, the table must also have this family
    pub table_family: Option<TableFamily>,
}

impl EngineConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            table_family: None,
        }
    }

    pub fn with_family(mut self, family: TableFamily) -> Self {
        self.table_family = Some(family);
        self
    }

    fn matches(&self, table: &Table) -> bool {
        table.name == self.table && self.table_family.is_none_or(|f| f == table.family)
    }
}

/// A resolved set and whether this transaction is creating it.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub set: Set,
    pub created: bool,
}

/// Finds the configured table in the kernel's current table list.
///
/// `set` names what the table is being looked up for and only appears in
/// errors.
pub async fn find_table<C: Connection>(
    conn: &mut C,
    config: &EngineConfig,
    set: &str,
) -> Result<Table> {
    let tables = conn
        .list_tables()
        .await
        .map_err(|source| Error::SetLookupFailed {
            set: set.to_string(),
            table: config.table.clone(),
            source,
        })?;

    tables
        .into_iter()
        .find(|t| config.matches(t))
        .ok_or_else(|| Error::TableNotFound {
            table: config.table.clone(),
        })
}

/// Resolves `name` under `table`, staging its creation if absent.
///
/// A created set is returned as a staged handle (no kernel identifier yet);
/// the caller confirms it with [`verify_created`] once the transaction is
/// committed. `family` decides the element type of a created set; without
/// one an absent set cannot be created.
pub async fn resolve_in<C: Connection>(
    conn: &mut C,
    tx: &mut Transaction,
    table: &Table,
    name: &str,
    family: Option<Family>,
) -> Result<Resolved> {
    let found = conn
        .get_set(table, name)
        .await
        .map_err(|source| Error::SetLookupFailed {
            set: name.to_string(),
            table: table.name.clone(),
            source,
        })?;

    if let Some(set) = found {
        debug!(set = name, "set exists");
        return Ok(Resolved {
            set,
            created: false,
        });
    }

    let family = family.ok_or_else(|| Error::UnknownFamily(name.to_string()))?;

    debug!(set = name, %family, "set not found, staging creation");
    let set = Set::staged(table.clone(), name, family.key_type());
    tx.stage_add_set(&set);

    Ok(Resolved { set, created: true })
}

/// Resolves the configured table, then `name` within it.
pub async fn resolve<C: Connection>(
    conn: &mut C,
    tx: &mut Transaction,
    config: &EngineConfig,
    name: &str,
    family: Option<Family>,
) -> Result<Resolved> {
    let table = find_table(conn, config, name).await?;
    resolve_in(conn, tx, &table, name, family).await
}

/// Confirms after commit that a created set is now observable.
pub async fn verify_created<C: Connection>(conn: &mut C, staged: &Set) -> Result<Set> {
    match conn.get_set(&staged.table, &staged.name).await {
        Ok(Some(set)) => {
            debug!(set = %set.name, handle = ?set.handle, "created set");
            Ok(set)
        }
        Ok(None) => Err(Error::SetCreateFailed {
            set: staged.name.clone(),
            reason: "created set, but cannot find it".to_string(),
        }),
        Err(e) => Err(Error::SetCreateFailed {
            set: staged.name.clone(),
            reason: e.to_string(),
        }),
    }
}
