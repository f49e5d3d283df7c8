pub mod matcher;

pub use matcher::{FieldMatcher, MatcherCache};
