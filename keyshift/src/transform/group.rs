use std::collections::BTreeMap;

use crate::{record::DumpRecord, schema::KeyPattern};

/// Dump records partitioned by V1 identity.
#[derive(Debug, Default)]
pub struct Grouping {
    pub groups: BTreeMap<String, Vec<DumpRecord>>,
    pub non_entity: Vec<DumpRecord>,
}

/// Groups records whose key matches `pattern` by identity segment.
///
/// Everything else lands in `non_entity`. Input order is kept inside each
/// group.
pub fn group(pattern: &KeyPattern, records: Vec<DumpRecord>) -> Grouping {
    let mut grouping = Grouping::default();

    for record in records {
        let identity = pattern.parse(&record.key).map(|(identity, _)| identity.to_owned());

        match identity {
            Some(identity) => grouping.groups.entry(identity).or_default().push(record),
            None => grouping.non_entity.push(record),
        }
    }

    grouping
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keyshift_store::{KeyType, Ttl};

    fn record(key: &str) -> DumpRecord {
        DumpRecord {
            key: key.to_owned(),
            key_type: KeyType::Hash,
            ttl: Ttl::Persistent,
            db: 0,
            payload: vec![],
            exported_at: Utc::now(),
        }
    }

    #[test]
    fn groups_by_identity() {
        let grouping = group(
            &KeyPattern::new("customer"),
            vec![
                record("customer:a@b.com:object"),
                record("customer:a@b.com:metadata"),
                record("customer:c@d.com:object"),
                record("customer:values"),
                record("onetime:stats"),
            ],
        );

        assert_eq!(grouping.groups.len(), 2);
        assert_eq!(grouping.groups["a@b.com"].len(), 2);
        assert_eq!(grouping.groups["a@b.com"][0].key, "customer:a@b.com:object");
        assert_eq!(grouping.non_entity.len(), 2);
    }
}
