use chrono::Utc;
use keyshift_store::{KeyType, Store};
use std::path::Path;
use tracing::{debug, info};

use crate::{error::Result, jsonl::write_jsonl, record::DumpRecord};

/// Store-native snapshots of `keys`. Keys that vanish between listing and
/// dumping are skipped.
pub async fn dump_keys(store: &Store, keys: &[String]) -> Result<Vec<DumpRecord>> {
    let mut records = Vec::with_capacity(keys.len());

    for key in keys {
        let key_type = store.key_type(key).await?;
        if key_type == KeyType::None {
            debug!(key, "key vanished before dump");
            continue;
        }

        let (Some(ttl), Some(payload)) = (store.pttl(key).await?, store.dump(key).await?) else {
            debug!(key, "key vanished before dump");
            continue;
        };

        records.push(DumpRecord {
            key: key.to_owned(),
            key_type,
            ttl,
            db: store.db(),
            payload,
            exported_at: Utc::now(),
        });
    }

    Ok(records)
}

/// Dumps every key matching `pattern` into `out`, returning the number of
/// records written.
pub async fn dump_pattern(
    store: &Store,
    pattern: &str,
    scan_count: usize,
    out: &Path,
) -> Result<usize> {
    let keys = store.scan_all_with(pattern, scan_count).await?;
    let records = dump_keys(store, &keys).await?;

    write_jsonl(out, &records).await?;
    info!(pattern, records = records.len(), path = %out.display(), "dump written");

    Ok(records.len())
}
