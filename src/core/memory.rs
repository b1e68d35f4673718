//! In-process model of the nf_tables set state.
//!
//! Behaves like the kernel for everything the engine relies on: reads see
//! committed state only, a commit applies all operations or none, adding an
//! existing element is a no-op and deleting a missing one fails. Every call
//! is recorded so callers can check exactly which kernel interactions
//! happened.

use crate::core::backend::{Connection, Connector, KernelResult};
use crate::core::error::KernelError;
use crate::core::ruleset::{Element, Set, Table, TableFamily};
use crate::core::transaction::{Op, Transaction};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Kernel interactions, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelCall {
    Connect,
    ListTables,
    GetSet(String),
    GetSetElements(String),
    Commit(usize),
}

#[derive(Debug, Clone)]
struct StoredSet {
    set: Set,
    elements: Vec<Element>,
}

#[derive(Debug, Clone, Default)]
struct State {
    tables: Vec<Table>,
    /// Keyed by (table family, table name, set name)
    sets: BTreeMap<(String, String, String), StoredSet>,
    next_handle: u64,
}

impl State {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn apply(&mut self, op: &Op) -> KernelResult<()> {
        let key = set_key(op.set());
        match op {
            Op::AddSet(set) => {
                if !self.tables.iter().any(|t| same_table(t, &set.table)) {
                    return Err(missing(&format!("table {}", set.table.name)));
                }
                if !self.sets.contains_key(&key) {
                    let mut stored = set.clone();
                    stored.handle = Some(self.handle());
                    self.sets.insert(
                        key,
                        StoredSet {
                            set: stored,
                            elements: Vec::new(),
                        },
                    );
                }
            }
            Op::AddElement { set, key: elem } => {
                let stored = self
                    .sets
                    .get_mut(&key)
                    .ok_or_else(|| missing(&format!("set {}", set.name)))?;
                if !stored.elements.iter().any(|e| &e.key == elem) {
                    stored.elements.push(Element::new(elem.clone()));
                }
            }
            Op::DeleteElement { set, key: elem } => {
                let stored = self
                    .sets
                    .get_mut(&key)
                    .ok_or_else(|| missing(&format!("set {}", set.name)))?;
                let before = stored.elements.len();
                stored.elements.retain(|e| &e.key != elem);
                if stored.elements.len() == before {
                    return Err(missing(&format!("element in set {}", set.name)));
                }
            }
            Op::FlushSet(set) => {
                self.sets
                    .get_mut(&key)
                    .ok_or_else(|| missing(&format!("set {}", set.name)))?
                    .elements
                    .clear();
            }
        }
        Ok(())
    }
}

fn set_key(set: &Set) -> (String, String, String) {
    (
        set.table.family.to_string(),
        set.table.name.clone(),
        set.name.clone(),
    )
}

fn same_table(a: &Table, b: &Table) -> bool {
    a.family == b.family && a.name == b.name
}

fn missing(what: &str) -> KernelError {
    KernelError::Rejected(format!(
        "Could not process rule: No such file or directory ({what})"
    ))
}

#[derive(Debug, Default)]
struct Faults {
    commit: Option<String>,
    list_elements: Option<String>,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    calls: Mutex<Vec<KernelCall>>,
    faults: Mutex<Faults>,
}

/// Shared in-memory kernel. Clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryKernel {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // State is replaced wholesale on commit, so a poisoned guard is still consistent
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl MemoryKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table, as an operator would with `nft add table`.
    pub fn add_table(&self, family: TableFamily, name: &str) -> Table {
        let mut state = lock(&self.inner.state);
        let handle = state.handle();
        let table = Table {
            family,
            name: name.to_string(),
            handle: Some(handle),
        };
        state.tables.push(table.clone());
        table
    }

    /// Creates a set with the given elements outside of any transaction.
    pub fn add_set(&self, set: Set, elements: Vec<Element>) -> Set {
        let mut state = lock(&self.inner.state);
        let mut set = set;
        set.handle = Some(state.handle());
        state.sets.insert(
            set_key(&set),
            StoredSet {
                set: set.clone(),
                elements,
            },
        );
        set
    }

    pub fn set(&self, table: &Table, name: &str) -> Option<Set> {
        lock(&self.inner.state)
            .sets
            .get(&(table.family.to_string(), table.name.clone(), name.to_string()))
            .map(|s| s.set.clone())
    }

    pub fn elements(&self, table: &Table, name: &str) -> Option<Vec<Element>> {
        lock(&self.inner.state)
            .sets
            .get(&(table.family.to_string(), table.name.clone(), name.to_string()))
            .map(|s| s.elements.clone())
    }

    pub fn calls(&self) -> Vec<KernelCall> {
        lock(&self.inner.calls).clone()
    }

    pub fn commit_count(&self) -> usize {
        lock(&self.inner.calls)
            .iter()
            .filter(|c| matches!(c, KernelCall::Commit(_)))
            .count()
    }

    /// Makes the next commit fail with `message` without applying anything.
    pub fn fail_next_commit(&self, message: &str) {
        lock(&self.inner.faults).commit = Some(message.to_string());
    }

    /// Makes element listing fail with `message` until cleared.
    pub fn fail_list_elements(&self, message: Option<&str>) {
        lock(&self.inner.faults).list_elements = message.map(String::from);
    }

    /// Delays every table listing by `latency`, like a slow or contended kernel.
    pub fn set_latency(&self, latency: Option<Duration>) {
        lock(&self.inner.faults).latency = latency;
    }

    fn record(&self, call: KernelCall) {
        lock(&self.inner.calls).push(call);
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    kernel: MemoryKernel,
}

impl MemoryConnector {
    pub fn new(kernel: MemoryKernel) -> Self {
        Self { kernel }
    }

    pub fn kernel(&self) -> &MemoryKernel {
        &self.kernel
    }
}

impl Connector for MemoryConnector {
    type Conn = MemoryConnection;

    fn connect(&self) -> KernelResult<MemoryConnection> {
        self.kernel.record(KernelCall::Connect);
        Ok(MemoryConnection {
            kernel: self.kernel.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    kernel: MemoryKernel,
}

impl Connection for MemoryConnection {
    async fn list_tables(&mut self) -> KernelResult<Vec<Table>> {
        self.kernel.record(KernelCall::ListTables);
        let latency = lock(&self.kernel.inner.faults).latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(lock(&self.kernel.inner.state).tables.clone())
    }

    async fn get_set(&mut self, table: &Table, name: &str) -> KernelResult<Option<Set>> {
        self.kernel.record(KernelCall::GetSet(name.to_string()));
        Ok(self.kernel.set(table, name))
    }

    async fn get_set_elements(&mut self, set: &Set) -> KernelResult<Vec<Element>> {
        self.kernel
            .record(KernelCall::GetSetElements(set.name.clone()));
        if let Some(message) = lock(&self.kernel.inner.faults).list_elements.clone() {
            return Err(KernelError::Rejected(message));
        }
        self.kernel
            .elements(&set.table, &set.name)
            .ok_or_else(|| missing(&format!("set {}", set.name)))
    }

    async fn commit(&mut self, tx: Transaction) -> KernelResult<()> {
        self.kernel.record(KernelCall::Commit(tx.ops().len()));
        if let Some(message) = lock(&self.kernel.inner.faults).commit.take() {
            return Err(KernelError::Rejected(message));
        }

        let mut state = lock(&self.kernel.inner.state);
        let mut next = state.clone();
        for op in tx.ops() {
            next.apply(op)?;
        }
        *state = next;
        debug!(ops = tx.ops().len(), "memory kernel committed batch");
        Ok(())
    }
}
