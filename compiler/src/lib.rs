// mroc — MRO compiler core
//
// Library root. `driver` runs the passes over a loaded program; `emit`
// renders the result.

pub mod ast;
pub mod bindings;
pub mod config;
pub mod diag;
pub mod disabled;
pub mod driver;
pub mod emit;
pub mod graph;
pub mod include;
pub mod lexer;
pub mod map_call;
pub mod params;
pub mod parser;
pub mod pass;
pub mod registry;
pub mod resolve;
pub mod structs;
pub mod types;
pub mod validate;
