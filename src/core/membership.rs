//! Membership checks against a set's committed elements.

use crate::core::backend::Connection;
use crate::core::error::{Error, Result};
use crate::core::ruleset::Set;

/// Whether `key` is among the committed elements of `set`.
///
/// Reads live kernel state, never the pending transaction. A set that is
/// only staged has no committed elements, so it is not queried at all.
pub async fn contains<C: Connection>(conn: &mut C, set: &Set, key: &[u8]) -> Result<bool> {
    if set.is_staged() {
        return Ok(false);
    }

    let elements = conn
        .get_set_elements(set)
        .await
        .map_err(|source| Error::ElementListFailed {
            set: set.name.clone(),
            source,
        })?;

    Ok(elements.iter().any(|e| e.key == key))
}
