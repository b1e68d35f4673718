//! Kernel backend that drives the `nft` binary through its JSON interface.

use crate::core::backend::{Connection, Connector, KernelResult};
use crate::core::error::KernelError;
use crate::core::ruleset::{Element, KeyType, Set, Table, TableFamily};
use crate::core::transaction::Transaction;
use crate::elevation::{ElevationMethod, create_nft_command};
use ipnetwork::IpNetwork;
use serde_json::Value;
use std::net::IpAddr;
use tracing::{debug, trace, warn};

/// Opens connections that drive the kernel through `nft --json`.
///
/// Each `nft` invocation talks to nf_tables over netlink; `nft -f -` applies
/// a whole batch as one kernel transaction.
#[derive(Debug, Clone)]
pub struct NftConnector {
    program: String,
    elevation: Option<ElevationMethod>,
}

impl NftConnector {
    pub fn new(program: impl Into<String>, elevation: Option<ElevationMethod>) -> Self {
        Self {
            program: program.into(),
            elevation,
        }
    }
}

impl Connector for NftConnector {
    type Conn = NftConnection;

    fn connect(&self) -> KernelResult<NftConnection> {
        Ok(NftConnection {
            program: self.program.clone(),
            elevation: self.elevation,
        })
    }
}

#[derive(Debug)]
pub struct NftConnection {
    program: String,
    elevation: Option<ElevationMethod>,
}

impl NftConnection {
    /// Runs nft with `args`, optionally feeding `input` on stdin, and returns stdout.
    async fn run(&self, args: &[&str], input: Option<String>) -> KernelResult<Vec<u8>> {
        trace!(program = %self.program, ?args, "running nft");

        let mut cmd = create_nft_command(&self.program, self.elevation, args)?;
        cmd.stdin(if input.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        })
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| KernelError::Nftables {
            message: format!("Failed to spawn nft: {e}"),
            stderr: None,
            exit_code: None,
        })?;

        if let (Some(mut stdin), Some(input)) = (child.stdin.take(), input) {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let errors = parse_nft_errors(&stderr);
            let message = if errors.is_empty() {
                format!("nft exited with {}", output.status)
            } else {
                errors.join("; ")
            };
            Err(KernelError::Nftables {
                message,
                stderr: Some(stderr),
                exit_code: output.status.code(),
            })
        }
    }

    async fn list_set(&self, table: &Table, name: &str) -> KernelResult<Value> {
        let family = table.family.to_string();
        let stdout = self
            .run(
                &["--json", "list", "set", &family, &table.name, name],
                None,
            )
            .await?;
        Ok(serde_json::from_slice(&stdout)?)
    }
}

impl Connection for NftConnection {
    async fn list_tables(&mut self) -> KernelResult<Vec<Table>> {
        let stdout = self.run(&["--json", "list", "tables"], None).await?;
        let listing: Value = serde_json::from_slice(&stdout)?;
        Ok(parse_tables(&listing))
    }

    async fn get_set(&mut self, table: &Table, name: &str) -> KernelResult<Option<Set>> {
        match self.list_set(table, name).await {
            Ok(listing) => Ok(parse_set(&listing, table)),
            Err(KernelError::Nftables {
                stderr: Some(stderr),
                ..
            }) if is_missing_object(&stderr) => {
                debug!(set = name, table = %table.name, "set not present in kernel");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_set_elements(&mut self, set: &Set) -> KernelResult<Vec<Element>> {
        let listing = self.list_set(&set.table, &set.name).await?;
        Ok(parse_elements(&listing))
    }

    async fn commit(&mut self, tx: Transaction) -> KernelResult<()> {
        if tx.is_empty() {
            return Ok(());
        }

        let batch = serde_json::to_string(&tx.to_nftables_json())?;
        debug!(ops = tx.ops().len(), "committing nft batch");
        self.run(&["--json", "-f", "-"], Some(batch)).await?;
        Ok(())
    }
}

fn is_missing_object(stderr: &str) -> bool {
    stderr.contains("No such file or directory")
}

/// Objects of kind `kind` in an `nft --json list ...` response.
fn objects<'a>(listing: &'a Value, kind: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    listing
        .get("nftables")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(move |item| item.get(kind))
}

/// Parses `nft --json list tables` output.
pub fn parse_tables(listing: &Value) -> Vec<Table> {
    objects(listing, "table")
        .filter_map(|t| {
            let family = t.get("family")?.as_str()?.parse::<TableFamily>().ok()?;
            let name = t.get("name")?.as_str()?;
            Some(Table {
                family,
                name: name.to_string(),
                handle: t.get("handle").and_then(Value::as_u64),
            })
        })
        .collect()
}

/// Parses the set object from `nft --json list set ...` output.
pub fn parse_set(listing: &Value, table: &Table) -> Option<Set> {
    let s = objects(listing, "set").next()?;
    let name = s.get("name")?.as_str()?;

    let key_type = match s.get("type") {
        Some(Value::String(t)) => KeyType::parse(t),
        // Concatenated types come back as an array
        Some(Value::Array(parts)) => KeyType::Other(
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" . "),
        ),
        _ => KeyType::Other(String::new()),
    };

    let flags = s
        .get("flags")
        .and_then(Value::as_array)
        .map(|f| {
            f.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Some(Set {
        table: table.clone(),
        name: name.to_string(),
        key_type,
        flags,
        handle: s.get("handle").and_then(Value::as_u64),
    })
}

/// Parses the element list of `nft --json list set ...` output.
///
/// A set with no elements has no `elem` member at all.
pub fn parse_elements(listing: &Value) -> Vec<Element> {
    let Some(set) = objects(listing, "set").next() else {
        return Vec::new();
    };

    let Some(elems) = set.get("elem").and_then(Value::as_array) else {
        return Vec::new();
    };

    elems
        .iter()
        .filter_map(|v| {
            let decoded = decode_elem(v);
            if decoded.is_none() {
                warn!(element = %v, "skipping non-address set element");
            }
            decoded
        })
        .collect()
}

/// Decodes one element value to its key.
///
/// Interval elements are keyed by their lower bound, matching how the kernel
/// stores interval starts.
fn decode_elem(value: &Value) -> Option<Element> {
    match value {
        Value::String(s) => s.parse::<IpAddr>().ok().map(Element::from_ip),
        Value::Object(obj) => {
            // { "elem": { "val": ..., "timeout": ..., "counter": ... } }
            if let Some(inner) = obj.get("elem") {
                return decode_elem(inner.get("val")?);
            }
            if let Some(prefix) = obj.get("prefix") {
                let addr = prefix.get("addr")?.as_str()?.parse::<IpAddr>().ok()?;
                let len = u8::try_from(prefix.get("len")?.as_u64()?).ok()?;
                let net = IpNetwork::new(addr, len).ok()?;
                return Some(Element::from_ip(net.network()));
            }
            if let Some(range) = obj.get("range").and_then(Value::as_array) {
                return decode_elem(range.first()?);
            }
            None
        }
        _ => None,
    }
}

/// Parses nft error output into messages
///
/// Attempts to extract meaningful error information from nft's
/// stderr output, falling back to raw output if parsing fails.
fn parse_nft_errors(stderr: &str) -> Vec<String> {
    // Try to parse JSON error format first
    if let Ok(json_err) = serde_json::from_str::<Value>(stderr)
        && let Some(errors) = json_err.get("errors").and_then(|e| e.as_array())
    {
        return errors
            .iter()
            .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
            .map(String::from)
            .collect();
    }

    // Fall back to line-by-line parsing; nft echoes the offending command
    // followed by a caret marker line, which carries no information
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.chars().all(|c| c == '^' || c == ' '))
        .map(|line| {
            line.trim_start_matches("Error: ")
                .trim_start_matches("nft: ")
                .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::write_mock_nft;
    use serde_json::json;

    fn filter_table() -> Table {
        Table {
            family: TableFamily::Inet,
            name: "filter".into(),
            handle: Some(1),
        }
    }

    #[test]
    fn test_parse_tables() {
        let listing = json!({ "nftables": [
            { "metainfo": { "version": "1.0.9", "json_schema_version": 1 } },
            { "table": { "family": "inet", "name": "filter", "handle": 1 } },
            { "table": { "family": "ip6", "name": "nat", "handle": 7 } },
            { "table": { "family": "bogus", "name": "skipped", "handle": 9 } }
        ] });

        let tables = parse_tables(&listing);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "filter");
        assert_eq!(tables[1].family, TableFamily::Ip6);
        assert_eq!(tables[1].handle, Some(7));
    }

    #[test]
    fn test_parse_set_and_elements() {
        let listing = json!({ "nftables": [
            { "metainfo": { "json_schema_version": 1 } },
            { "set": {
                "family": "inet", "name": "blocked4", "table": "filter",
                "type": "ipv4_addr", "handle": 4, "flags": ["interval"],
                "elem": [
                    "192.0.2.1",
                    { "elem": { "val": "192.0.2.2", "timeout": 3600 } },
                    { "prefix": { "addr": "10.0.0.0", "len": 8 } },
                    { "range": ["172.16.0.1", "172.16.0.9"] },
                    42
                ]
            } }
        ] });

        let set = parse_set(&listing, &filter_table()).unwrap();
        assert_eq!(set.name, "blocked4");
        assert_eq!(set.key_type, KeyType::Ipv4Addr);
        assert_eq!(set.handle, Some(4));
        assert_eq!(set.flags, vec!["interval".to_string()]);
        assert!(!set.is_staged());

        let keys: Vec<Vec<u8>> = parse_elements(&listing).into_iter().map(|e| e.key).collect();
        assert_eq!(
            keys,
            vec![
                vec![192, 0, 2, 1],
                vec![192, 0, 2, 2],
                vec![10, 0, 0, 0],
                vec![172, 16, 0, 1],
            ]
        );
    }

    #[test]
    fn test_parse_empty_set_has_no_elements() {
        let listing = json!({ "nftables": [
            { "set": { "family": "inet", "name": "blocked6", "table": "filter",
                       "type": "ipv6_addr", "handle": 5 } }
        ] });
        assert!(parse_elements(&listing).is_empty());
        assert_eq!(
            parse_set(&listing, &filter_table()).unwrap().key_type,
            KeyType::Ipv6Addr
        );
    }

    #[test]
    fn test_parse_concatenated_type() {
        let listing = json!({ "nftables": [
            { "set": { "family": "inet", "name": "pairs", "table": "filter",
                       "type": ["ipv4_addr", "inet_service"], "handle": 6 } }
        ] });
        let set = parse_set(&listing, &filter_table()).unwrap();
        assert_eq!(set.key_type.as_str(), "ipv4_addr . inet_service");
        assert_eq!(set.key_type.key_len(), None);
    }

    #[test]
    fn test_parse_nft_errors_plain_text() {
        let stderr = "Error: Could not process rule: No such file or directory\n\
                      list set inet filter nope\n\
                      ^^^^^^^^^^^^^^^^^^^^^^^^^^\n";
        let errors = parse_nft_errors(stderr);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], "Could not process rule: No such file or directory");
    }

    #[test]
    fn test_parse_nft_errors_empty() {
        assert!(parse_nft_errors("").is_empty());
    }

    #[tokio::test]
    async fn test_mock_nft_roundtrip() {
        let mock = write_mock_nft(
            r#"{"nftables":[{"table":{"family":"inet","name":"filter","handle":1}}]}"#,
            Some(
                r#"{"nftables":[{"set":{"family":"inet","name":"blocked4","table":"filter","type":"ipv4_addr","handle":3,"elem":["198.51.100.4"]}}]}"#,
            ),
            0,
        );
        let connector = NftConnector::new(mock.program(), None);
        let mut conn = connector.connect().unwrap();

        let tables = conn.list_tables().await.unwrap();
        assert_eq!(tables, vec![filter_table()]);

        let set = conn.get_set(&tables[0], "blocked4").await.unwrap().unwrap();
        let elements = conn.get_set_elements(&set).await.unwrap();
        assert_eq!(elements, vec![Element::new([198, 51, 100, 4])]);

        let mut tx = Transaction::new();
        tx.stage_delete_element(&set, &[198, 51, 100, 4]).unwrap();
        conn.commit(tx).await.unwrap();

        let batch: Value = serde_json::from_str(&mock.committed().unwrap()).unwrap();
        assert_eq!(batch["nftables"][1]["delete"]["element"]["elem"][0], "198.51.100.4");
    }

    #[tokio::test]
    async fn test_missing_set_is_none() {
        let mock = write_mock_nft(
            r#"{"nftables":[{"table":{"family":"inet","name":"filter","handle":1}}]}"#,
            None,
            0,
        );
        let mut conn = NftConnector::new(mock.program(), None).connect().unwrap();
        let set = conn.get_set(&filter_table(), "absent4").await.unwrap();
        assert!(set.is_none());
    }

    #[tokio::test]
    async fn test_commit_failure_carries_stderr() {
        let mock = write_mock_nft(r#"{"nftables":[]}"#, None, 1);
        let mut conn = NftConnector::new(mock.program(), None).connect().unwrap();

        let set = Set::staged(filter_table(), "blocked4", KeyType::Ipv4Addr);
        let mut tx = Transaction::new();
        tx.stage_flush_set(&set);

        match conn.commit(tx).await {
            Err(KernelError::Nftables {
                message, exit_code, ..
            }) => {
                assert_eq!(exit_code, Some(1));
                assert!(message.contains("Operation not permitted"));
            }
            other => panic!("expected nftables error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_commit_skips_nft() {
        let connector = NftConnector::new("nftset_nonexistent_binary_xyz", None);
        let mut conn = connector.connect().unwrap();
        assert!(conn.commit(Transaction::new()).await.is_ok());
    }
}
