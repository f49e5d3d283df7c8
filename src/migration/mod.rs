pub mod migrate;

pub use migrate::{migrate_between, migrate_bucket, migrate_bucket_with_transform, MigrationReport, Transform};
