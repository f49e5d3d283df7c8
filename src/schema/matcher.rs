use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::core::record::{meta_fields, Field, Record};
use crate::core::types::Value;
use crate::index::secondary::FieldSnapshot;
use crate::query::predicate::Predicate;

/// Accessor table for one record type.
///
/// Lookups try the alias first, then the declared name. Immutable once built.
pub struct FieldMatcher<R> {
    fields: Vec<Field<R>>,
    by_alias: HashMap<&'static str, usize>,
    by_name: HashMap<&'static str, usize>,
}

impl<R: Record> FieldMatcher<R> {
    pub fn build() -> Self {
        let mut fields = R::fields();
        for meta in meta_fields::<R>() {
            let taken = fields
                .iter()
                .any(|f| f.name == meta.name || f.index_name() == meta.index_name());
            if !taken {
                fields.push(meta);
            }
        }

        let mut by_alias = HashMap::new();
        let mut by_name = HashMap::new();
        for (i, field) in fields.iter().enumerate() {
            if let Some(alias) = field.alias {
                by_alias.entry(alias).or_insert(i);
            }
            by_name.entry(field.name).or_insert(i);
        }

        FieldMatcher {
            fields,
            by_alias,
            by_name,
        }
    }

    pub fn fields(&self) -> &[Field<R>] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field<R>> {
        self.by_alias
            .get(name)
            .or_else(|| self.by_name.get(name))
            .map(|&i| &self.fields[i])
    }

    /// Name the index files `name` under (alias preferred)
    pub fn canonical_name(&self, name: &str) -> Option<&'static str> {
        self.field(name).map(Field::index_name)
    }

    pub fn get_field_value(&self, record: &R, name: &str) -> Option<Value> {
        self.field(name).map(|f| f.get(record))
    }

    /// Every equality in `predicate` must name a known field holding an
    /// equal value
    pub fn matches(&self, record: &R, predicate: &Predicate) -> bool {
        predicate.equalities().into_iter().all(|(name, expected)| {
            match self.get_field_value(record, name) {
                Some(actual) => actual == *expected,
                None => false,
            }
        })
    }

    /// Hashable field values of `record`, keyed by index name
    pub fn indexable_values(&self, record: &R) -> FieldSnapshot {
        self.fields
            .iter()
            .filter_map(|f| {
                let value = f.get(record);
                value.is_hashable().then(|| (f.index_name().to_string(), value))
            })
            .collect()
    }
}

/// Built matchers, one per record type
#[derive(Default)]
pub struct MatcherCache {
    matchers: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl MatcherCache {
    pub fn new() -> Self {
        MatcherCache::default()
    }

    pub fn get<R: Record>(&self) -> Arc<FieldMatcher<R>> {
        let id = TypeId::of::<R>();
        if let Some(found) = self.lookup::<R>(id) {
            return found;
        }

        let mut matchers = self.matchers.write();
        let entry = matchers
            .entry(id)
            .or_insert_with(|| Arc::new(FieldMatcher::<R>::build()) as Arc<dyn Any + Send + Sync>)
            .clone();
        drop(matchers);

        match entry.downcast::<FieldMatcher<R>>() {
            Ok(matcher) => matcher,
            // unreachable, entries are keyed by TypeId
            Err(_) => Arc::new(FieldMatcher::build()),
        }
    }

    fn lookup<R: Record>(&self, id: TypeId) -> Option<Arc<FieldMatcher<R>>> {
        let entry = self.matchers.read().get(&id)?.clone();
        entry.downcast::<FieldMatcher<R>>().ok()
    }

    pub fn len(&self) -> usize {
        self.matchers.read().len()
    }
}
