pub mod secondary;

pub use secondary::{FieldSnapshot, IndexStats, IndexUndo, SecondaryIndex};
