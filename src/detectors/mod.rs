pub mod ast;
pub mod diff_analyzer;
pub mod framework;
pub mod language;
