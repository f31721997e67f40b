#![allow(unknown_lints)]

#[macro_use]
pub mod types;
pub mod ast;
pub mod builtins;
mod error;
pub mod expansion;
pub mod parser;
mod position;
pub mod shell;
mod value;

pub use crate::{
    error::{Error, Result},
    position::{LineCol, Position},
    shell::{Shell, ShellBuilder},
    value::{
        ChainAction, ClosePolicy, Command, FdRedirection, NodeWithAction, PathDirection,
        Pipeline, Redirection, Value, ValueKind, Variable,
    },
};

pub fn version() -> &'static str { env!("CARGO_PKG_VERSION") }
