//! Shared test utilities for core module tests
//!
//! This module is only compiled in test mode.

use crate::core::engine::Engine;
use crate::core::memory::{MemoryConnector, MemoryKernel};
use crate::core::resolver::EngineConfig;
use crate::core::ruleset::{Table, TableFamily};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tempfile::TempDir;

/// The table every helper kernel starts with.
pub fn filter_table() -> Table {
    Table::new(TableFamily::Inet, "filter")
}

/// A memory kernel holding only the `inet filter` table.
pub fn kernel_with_table() -> MemoryKernel {
    let kernel = MemoryKernel::new();
    kernel.add_table(TableFamily::Inet, "filter");
    kernel
}

/// An engine over [`kernel_with_table`], configured for the `filter` table.
pub fn engine_with_table() -> Engine<MemoryConnector> {
    Engine::new(
        MemoryConnector::new(kernel_with_table()),
        EngineConfig::new("filter"),
    )
}

/// A throwaway `nft` stand-in living in its own temp directory.
///
/// Each test gets its own script, so no environment variables are involved
/// and tests can run in parallel.
pub struct MockNft {
    dir: TempDir,
}

impl MockNft {
    pub fn program(&self) -> String {
        self.script().to_string_lossy().into_owned()
    }

    /// The batch the last `-f -` invocation received on stdin.
    pub fn committed(&self) -> Option<String> {
        std::fs::read_to_string(self.dir.path().join("committed.json")).ok()
    }

    fn script(&self) -> PathBuf {
        self.dir.path().join("nft")
    }
}

/// Writes a mock nft script.
///
/// - `--json list tables` prints `tables_json`
/// - `--json list set ...` prints `set_json`, or fails like nft does for a
///   missing set when it is `None`
/// - `--json -f -` saves stdin to `committed.json` and exits with
///   `commit_exit_code`
pub fn write_mock_nft(tables_json: &str, set_json: Option<&str>, commit_exit_code: i32) -> MockNft {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("tables.json"), tables_json).unwrap();
    if let Some(set_json) = set_json {
        std::fs::write(dir.path().join("set.json"), set_json).unwrap();
    }

    let script = format!(
        r#"#!/bin/sh
dir="$(dirname "$0")"
case "$2 $3" in
    "list tables")
        cat "$dir/tables.json"
        ;;
    "list set")
        if [ -f "$dir/set.json" ]; then
            cat "$dir/set.json"
        else
            echo "Error: Could not process rule: No such file or directory" >&2
            exit 1
        fi
        ;;
    "-f -")
        cat > "$dir/committed.json"
        if [ {code} -ne 0 ]; then
            echo "Error: Could not process rule: Operation not permitted" >&2
            exit {code}
        fi
        ;;
    *)
        echo "Error: unsupported mock invocation: $*" >&2
        exit 1
        ;;
esac
"#,
        code = commit_exit_code
    );

    let mock = MockNft { dir };
    let path = mock.script();
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    mock
}
