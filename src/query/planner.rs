use std::collections::HashSet;
use std::fmt;
use tracing::debug;
use crate::core::record::Record;
use crate::core::types::Value;
use crate::index::secondary::SecondaryIndex;
use crate::query::predicate::Predicate;
use crate::schema::matcher::FieldMatcher;

/// How a query will be answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Fetch exactly these keys; every criterion resolved through the index
    IndexLookup { keys: Vec<String> },
    /// Decode and filter the whole bucket
    Scan,
    /// A criterion names a field the record type does not have
    Empty,
}

impl Plan {
    pub fn is_index_hit(&self) -> bool {
        matches!(self, Plan::IndexLookup { .. })
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Plan::IndexLookup { keys } => write!(f, "index lookup ({} candidates)", keys.len()),
            Plan::Scan => write!(f, "parallel scan"),
            Plan::Empty => write!(f, "empty (unknown field)"),
        }
    }
}

/// Decides between index point lookups and a full scan.
///
/// All criteria resolve through the index or none do: any miss sends the
/// whole query to the scan engine.
pub struct QueryPlanner<'a> {
    index: &'a SecondaryIndex,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(index: &'a SecondaryIndex) -> Self {
        QueryPlanner { index }
    }

    pub fn plan<R: Record>(&self, bucket: &str, matcher: &FieldMatcher<R>, predicate: &Predicate) -> Plan {
        let criteria = predicate.equalities();
        if criteria.is_empty() {
            return Plan::Scan;
        }

        let mut resolved: Vec<(&'static str, &Value)> = Vec::with_capacity(criteria.len());
        for (name, value) in criteria {
            match matcher.canonical_name(name) {
                Some(field) => resolved.push((field, value)),
                None => {
                    debug!(bucket, field = name, "criterion names unknown field");
                    return Plan::Empty;
                }
            }
        }

        if !self.index.has_index(bucket) {
            return Plan::Scan;
        }

        let mut sets = Vec::with_capacity(resolved.len());
        for (field, value) in resolved {
            if !value.is_hashable() {
                return Plan::Scan;
            }
            match self.index.get_indexed_keys(bucket, field, value) {
                Some(keys) => sets.push(keys),
                None => {
                    debug!(bucket, field, "index miss, falling back to scan");
                    return Plan::Scan;
                }
            }
        }

        Plan::IndexLookup {
            keys: intersect(sets),
        }
    }
}

/// Intersect key lists smallest-first, keeping the smallest list's order
fn intersect(mut sets: Vec<Vec<String>>) -> Vec<String> {
    sets.sort_by_key(Vec::len);
    let mut iter = sets.into_iter();
    let Some(mut result) = iter.next() else {
        return Vec::new();
    };

    for other in iter {
        if result.is_empty() {
            break;
        }
        let members: HashSet<&str> = other.iter().map(String::as_str).collect();
        result.retain(|k| members.contains(k.as_str()));
    }
    result
}
