//! Declarative migration rules, one [`EntitySpec`] per model.
//!
//! Field tables are closed: a V1 field missing from the table of a dumped
//! model fails its group instead of being coerced by guesswork.

mod models;

use parse_display::Display;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::{
    error::{MigrateError, Result},
    record::OBJECT_SUFFIX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Timestamp,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Opaque bytes carried over untouched.
    Copy,
    Typed(FieldType),
    Renamed(&'static str, FieldType),
    /// V1 identifier of another model, remapped to its new identifier.
    ForeignKey {
        model: &'static str,
        rename: Option<&'static str>,
    },
    Drop,
}

/// `{prefix}:{identity}:{suffix}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPattern {
    pub prefix: &'static str,
}

impl KeyPattern {
    pub const fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }

    /// Splits a key into its identity and suffix segments.
    pub fn parse<'k>(&self, key: &'k str) -> Option<(&'k str, &'k str)> {
        let rest = key.strip_prefix(self.prefix)?.strip_prefix(':')?;
        let (identity, suffix) = rest.rsplit_once(':')?;

        if identity.is_empty() || suffix.is_empty() {
            return None;
        }

        Some((identity, suffix))
    }

    pub fn key(&self, identity: &str, suffix: &str) -> String {
        format!("{}:{identity}:{suffix}", self.prefix)
    }

    pub fn object_key(&self, identity: &str) -> String {
        self.key(identity, OBJECT_SUFFIX)
    }

    pub fn glob(&self) -> String {
        format!("{}:*", self.prefix)
    }
}

/// Where the V1 input of a model comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Dump,
    /// Synthesized from the V1 objects of another model.
    DerivedFrom(&'static str),
}

/// Field filled from another model's identifier, looked up through a V1
/// field of this record. No shadow field is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedField {
    pub target: &'static str,
    pub source: &'static str,
    pub model: &'static str,
}

/// Secondary index rebuilt from transformed records.
///
/// Key templates may reference `{objid}`, `{extid}` or any attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndexSpec {
    Instance {
        key: &'static str,
        score: &'static str,
    },
    Lookup {
        key: &'static str,
        field: &'static str,
    },
    Participation {
        key: &'static str,
        member: &'static str,
        score: &'static str,
    },
    Counter {
        key: &'static str,
        by: i64,
    },
}

#[derive(Debug, Clone)]
pub struct EntitySpec {
    pub model: &'static str,
    pub v1: KeyPattern,
    pub v2: KeyPattern,
    pub origin: Origin,
    pub identifier_field: &'static str,
    pub created_field: &'static str,
    pub fields: Vec<(&'static str, FieldRule)>,
    pub derived: Vec<DerivedField>,
    pub constants: Vec<(&'static str, Value)>,
    /// Substructure suffix renames, `(v1 suffix, v2 suffix)`.
    pub renames: Vec<(&'static str, &'static str)>,
    pub depends_on: Vec<&'static str>,
    /// Snapshot non-UTF-8 values as tagged base64 instead of lossy text.
    pub binary_safe: bool,
    pub extid_prefix: &'static str,
    pub indexes: Vec<IndexSpec>,
}

impl EntitySpec {
    pub fn rule(&self, field: &str) -> Option<FieldRule> {
        self.fields
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, rule)| *rule)
    }

    /// Dumped models reject undeclared fields; derived models only pick the
    /// fields they list.
    pub fn is_strict(&self) -> bool {
        self.origin == Origin::Dump
    }

    /// Model whose dump file feeds this one.
    pub fn source_model(&self) -> &'static str {
        match self.origin {
            Origin::Dump => self.model,
            Origin::DerivedFrom(model) => model,
        }
    }

    pub fn rename_suffix<'s>(&self, suffix: &'s str) -> &'s str {
        self.renames
            .iter()
            .find(|(from, _)| *from == suffix)
            .map(|(_, to)| *to)
            .unwrap_or(suffix)
    }

    /// Models whose identifiers this model references.
    pub fn referenced_models(&self) -> BTreeSet<&'static str> {
        let mut models = self
            .fields
            .iter()
            .filter_map(|(_, rule)| match rule {
                FieldRule::ForeignKey { model, .. } => Some(*model),
                _ => None,
            })
            .collect::<BTreeSet<_>>();

        models.extend(self.derived.iter().map(|d| d.model));

        models
    }

    /// Fields index derivation reads, surfaced on transformed records.
    pub fn attribute_fields(&self) -> BTreeSet<&'static str> {
        let mut fields = BTreeSet::from([self.created_field]);

        for index in &self.indexes {
            let (key, extra) = match index {
                IndexSpec::Instance { key, score } => (*key, vec![*score]),
                IndexSpec::Lookup { key, field } => (*key, vec![*field]),
                IndexSpec::Participation { key, member, score } => (*key, vec![*member, *score]),
                IndexSpec::Counter { key, .. } => (*key, vec![]),
            };

            fields.extend(extra);
            fields.extend(template_fields(key));
        }

        fields.remove("objid");
        fields.remove("extid");

        fields
    }
}

/// Names of the `{placeholders}` of a key template.
pub fn template_fields(template: &'static str) -> Vec<&'static str> {
    let mut fields = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };

        fields.push(&rest[start + 1..start + len]);
        rest = &rest[start + len + 1..];
    }

    fields
}

/// Closed set of entity specs, selected once at startup.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    specs: Vec<EntitySpec>,
}

impl EntityRegistry {
    pub fn new(specs: Vec<EntitySpec>) -> Self {
        Self { specs }
    }

    pub fn get(&self, model: &str) -> Result<&EntitySpec> {
        self.specs
            .iter()
            .find(|spec| spec.model == model)
            .ok_or_else(|| MigrateError::UnknownModel(model.to_owned()))
    }

    pub fn models(&self) -> Vec<&'static str> {
        self.specs.iter().map(|spec| spec.model).collect()
    }

    /// Selected specs in dependency order, parents first.
    ///
    /// Dependencies outside the selection only influence ordering; they are
    /// assumed to be loaded already.
    pub fn plan(&self, selected: &[&str]) -> Result<Vec<&EntitySpec>> {
        for model in selected {
            self.get(model)?;
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'r>(
            registry: &'r EntityRegistry,
            spec: &'r EntitySpec,
            marks: &mut HashMap<&'static str, Mark>,
            order: &mut Vec<&'r EntitySpec>,
        ) -> Result<()> {
            match marks.get(spec.model) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(MigrateError::DependencyCycle(spec.model.to_owned()))
                }
                None => {}
            }

            marks.insert(spec.model, Mark::Visiting);

            for parent in &spec.depends_on {
                visit(registry, registry.get(parent)?, marks, order)?;
            }

            marks.insert(spec.model, Mark::Done);
            order.push(spec);

            Ok(())
        }

        let mut marks = HashMap::new();
        let mut order = Vec::new();

        for spec in &self.specs {
            visit(self, spec, &mut marks, &mut order)?;
        }

        Ok(order
            .into_iter()
            .filter(|spec| selected.contains(&spec.model))
            .collect())
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::default_v2()
    }
}
