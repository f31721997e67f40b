//! The two front ends: the native recursive-descent grammar and the
//! token-driven POSIX grammar. Both produce the same AST.

pub mod native;
pub mod posix;

pub use self::{native::NativeParser, posix::PosixParser};

use crate::ast::Node;

/// Parses `source` with the grammar selected by `posix`.
pub fn parse(source: &str, posix: bool) -> Node {
    if posix {
        PosixParser::new(source).parse()
    } else {
        NativeParser::new(source).parse()
    }
}
