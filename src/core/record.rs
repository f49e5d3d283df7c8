use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use crate::core::types::Value;

/// A typed record stored in a bucket.
///
/// The associated constants replace struct-tag discovery: `BUCKET` names the
/// bucket, `DATABASE` names the target store (`None` = the manager's default).
/// `fields` declares the queryable fields; the matcher adds the `RecordMeta`
/// fields on its own.
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    const BUCKET: &'static str;
    const DATABASE: Option<&'static str> = None;

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    fn fields() -> Vec<Field<Self>>
    where
        Self: Sized;

    fn key(&self) -> &str {
        &self.meta().id
    }
}

/// Identity and lifecycle timestamps embedded in every record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RecordMeta {
    pub fn new(id: impl Into<String>) -> Self {
        RecordMeta {
            id: id.into(),
            ..RecordMeta::default()
        }
    }

    /// Stamp a save: first save sets `created_at`, every save sets `updated_at`
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Queryable field: declared name, optional serialization alias, accessor
pub struct Field<R> {
    pub name: &'static str,
    pub alias: Option<&'static str>,
    accessor: fn(&R) -> Value,
}

impl<R> Field<R> {
    pub fn new(name: &'static str, accessor: fn(&R) -> Value) -> Self {
        Field {
            name,
            alias: None,
            accessor,
        }
    }

    pub fn alias(mut self, alias: &'static str) -> Self {
        if !alias.is_empty() && alias != "-" {
            self.alias = Some(alias);
        }
        self
    }

    /// Name the secondary index files this field under
    pub fn index_name(&self) -> &'static str {
        self.alias.unwrap_or(self.name)
    }

    pub fn get(&self, record: &R) -> Value {
        (self.accessor)(record)
    }
}

impl<R> Clone for Field<R> {
    fn clone(&self) -> Self {
        Field {
            name: self.name,
            alias: self.alias,
            accessor: self.accessor,
        }
    }
}

impl<R> std::fmt::Debug for Field<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .finish()
    }
}

/// Fields every record carries through `RecordMeta`
pub(crate) fn meta_fields<R: Record>() -> Vec<Field<R>> {
    vec![
        Field::new("ID", |r: &R| Value::from(r.meta().id.clone())).alias("id"),
        Field::new("CreatedAt", |r: &R| Value::from(r.meta().created_at)).alias("created_at"),
        Field::new("UpdatedAt", |r: &R| Value::from(r.meta().updated_at)).alias("updated_at"),
        Field::new("DeletedAt", |r: &R| Value::from(r.meta().deleted_at)).alias("deleted_at"),
    ]
}
