use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    record::{IndexCommand, TransformedRecord},
    schema::{EntitySpec, IndexSpec},
};

/// Two records claimed the same lookup entry; the later one won.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupConflict {
    pub key: String,
    pub field: String,
    pub previous: String,
    pub winner: String,
}

#[derive(Debug, Default)]
pub struct IndexBuild {
    pub commands: Vec<IndexCommand>,
    pub conflicts: Vec<LookupConflict>,
}

/// Value of `name` on a transformed record, as an index key segment or member.
fn value_of(record: &TransformedRecord, name: &str) -> Option<String> {
    match name {
        "objid" => Some(record.objid.clone()),
        "extid" => record.extid.clone(),
        _ => match record.attributes.get(name)? {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        },
    }
}

/// Fills `{placeholders}` of a key template; `None` when one has no value.
pub fn render_key(template: &str, record: &TransformedRecord) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let len = rest[start..].find('}')?;
        out.push_str(&rest[..start]);
        out.push_str(&value_of(record, &rest[start + 1..start + len])?);
        rest = &rest[start + len + 1..];
    }

    out.push_str(rest);

    Some(out)
}

#[derive(Default)]
struct Builder {
    commands: Vec<IndexCommand>,
    sorted: HashMap<(String, String), usize>,
    lookups: HashMap<(String, String), usize>,
    counters: BTreeMap<String, (i64, u8)>,
    counted: HashSet<(String, String)>,
    conflicts: Vec<LookupConflict>,
}

impl Builder {
    fn zadd(&mut self, key: String, score: f64, member: String, db: u8) {
        let cmd = IndexCommand::zadd(key.clone(), score, member.clone()).on_db(db);

        match self.sorted.get(&(key.clone(), member.clone())) {
            Some(pos) => self.commands[*pos] = cmd,
            None => {
                self.sorted.insert((key, member), self.commands.len());
                self.commands.push(cmd);
            }
        }
    }

    fn hset(&mut self, key: String, field: String, objid: &str, db: u8) {
        let value = Value::String(objid.to_owned()).to_string();
        let cmd = IndexCommand::hset(key.clone(), field.clone(), value).on_db(db);

        match self.lookups.get(&(key.clone(), field.clone())) {
            Some(pos) => {
                let previous = self.commands[*pos].args[1].clone();
                if previous != cmd.args[1] {
                    tracing::warn!(key, field, previous, winner = objid, "lookup conflict, last record wins");
                    self.conflicts.push(LookupConflict {
                        key,
                        field,
                        previous,
                        winner: cmd.args[1].clone(),
                    });
                }
                self.commands[*pos] = cmd;
            }
            None => {
                self.lookups.insert((key, field), self.commands.len());
                self.commands.push(cmd);
            }
        }
    }

    fn incrby(&mut self, key: String, by: i64, objid: &str, db: u8) {
        if !self.counted.insert((key.clone(), objid.to_owned())) {
            return;
        }

        let counter = self.counters.entry(key).or_insert((0, db));
        counter.0 += by;
    }

    fn finish(mut self) -> IndexBuild {
        for (key, (by, db)) in self.counters {
            self.commands.push(IndexCommand::incrby(key, by).on_db(db));
        }

        IndexBuild {
            commands: self.commands,
            conflicts: self.conflicts,
        }
    }
}

/// Derives every index command a model's transformed objects imply.
///
/// Pure: the same records always give the same commands, with duplicates
/// collapsed and counters summed per key.
pub fn build_indexes(spec: &EntitySpec, records: &[TransformedRecord]) -> IndexBuild {
    let mut builder = Builder::default();

    for record in records.iter().filter(|r| r.is_object()) {
        let db = record.db;

        for index in &spec.indexes {
            match index {
                IndexSpec::Instance { key, score } => {
                    let score = record.attribute_f64(score).unwrap_or(0.0);
                    builder.zadd(key.to_string(), score, record.objid.clone(), db);
                }
                IndexSpec::Lookup { key, field } => {
                    if let Some(value) = value_of(record, field) {
                        builder.hset(key.to_string(), value, &record.objid, db);
                    }
                }
                IndexSpec::Participation { key, member, score } => {
                    let (Some(key), Some(member)) =
                        (render_key(key, record), value_of(record, member))
                    else {
                        continue;
                    };
                    let score = record.attribute_f64(score).unwrap_or(0.0);
                    builder.zadd(key, score, member, db);
                }
                IndexSpec::Counter { key, by } => {
                    if let Some(key) = render_key(key, record) {
                        builder.incrby(key, *by, &record.objid, db);
                    }
                }
            }
        }
    }

    builder.finish()
}
