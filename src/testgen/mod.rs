pub mod coverage;
pub mod file;
pub mod fix;
pub mod format;
pub mod generator;
pub mod merge;
pub mod resolve;
pub mod runner;
pub mod scan;
pub mod typecheck;
pub mod validate;
