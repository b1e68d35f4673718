//! Kernel connection seam.
//!
//! The engine opens one [`Connection`] per request through a [`Connector`].
//! Reads see committed kernel state only; writes go through a
//! [`Transaction`] handed to [`Connection::commit`].

use crate::core::error::KernelError;
use crate::core::ruleset::{Element, Set, Table};
use crate::core::transaction::Transaction;
use std::future::Future;

pub type KernelResult<T> = std::result::Result<T, KernelError>;

pub trait Connection: Send {
    fn list_tables(&mut self) -> impl Future<Output = KernelResult<Vec<Table>>> + Send;

    /// Looks up a set by name; `Ok(None)` when the table has no such set.
    fn get_set(
        &mut self,
        table: &Table,
        name: &str,
    ) -> impl Future<Output = KernelResult<Option<Set>>> + Send;

    /// Committed elements of `set`, in kernel order.
    fn get_set_elements(
        &mut self,
        set: &Set,
    ) -> impl Future<Output = KernelResult<Vec<Element>>> + Send;

    /// Applies every staged operation atomically, or none of them.
    fn commit(&mut self, tx: Transaction) -> impl Future<Output = KernelResult<()>> + Send;
}

pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    fn connect(&self) -> KernelResult<Self::Conn>;
}
