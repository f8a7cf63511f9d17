pub mod evaluator;
pub mod executor;
pub mod resolver;
pub mod value;
