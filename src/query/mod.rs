pub mod predicate;
pub mod planner;

pub use planner::{Plan, QueryPlanner};
pub use predicate::Predicate;
