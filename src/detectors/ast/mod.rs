pub mod ast;
pub mod targets;
