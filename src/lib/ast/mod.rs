//! The abstract syntax tree shared by both grammars. Nodes are strict
//! trees; alias expansion and chain queuing clone rather than share.

mod eval;
mod format;
mod inspect;

pub use self::{
    eval::{EntryCallback, Iterate},
    inspect::{HighlightMetadata, HighlightSpan, HighlightStyle, HitTestResult},
};

use crate::{position::Position, types::Str, value::Value};
use std::{cell::RefCell, fmt, rc::Rc};

/// An identifier together with where it was written.
#[derive(Clone, Debug, PartialEq)]
pub struct NameWithPosition {
    pub name:     Str,
    pub position: Position,
}

/// How a string literal was enclosed in the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enclosure {
    None,
    SingleQuotes,
    DoubleQuotes,
}

/// List-expanding juxtaposition produces the Cartesian concatenation of
/// its sides; string-expanding glues the adjacent edge entries instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JuxtapositionMode {
    ListExpand,
    StringExpand,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContinuationKind {
    Break,
    Continue,
}

/// The shared record behind the four path-redirection variants.
#[derive(Clone, Debug)]
pub struct PathRedirection {
    pub fd:   i32,
    pub path: Box<Node>,
}

/// Heredoc contents are late-bound: the parser fills the shared cell when
/// it reaches the line that terminates the body.
#[derive(Clone, Debug)]
pub struct HeredocNode {
    pub end: Str,
    pub allows_interpolation: bool,
    pub deindent: bool,
    /// In command position the heredoc feeds this descriptor through a
    /// pipe; in expression position it evaluates to its text instead.
    pub target_fd: i32,
    pub evaluates_to_string: bool,
    pub contents: Rc<RefCell<Option<Node>>>,
}

#[derive(Clone, Debug)]
pub struct VariableDeclaration {
    pub name:  Box<Node>,
    pub value: Box<Node>,
}

/// The rule list of one match entry: either glob patterns (with capture
/// spans bound in order) or ECMA262-style regexes.
#[derive(Clone, Debug)]
pub enum MatchPatterns {
    Glob(Vec<Node>),
    Regex(Vec<Str>),
}

#[derive(Clone, Debug)]
pub struct MatchEntry {
    pub patterns:    MatchPatterns,
    pub match_names: Vec<NameWithPosition>,
    pub body:        Option<Box<Node>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum HistoryEventKind {
    IndexFromStart(usize),
    IndexFromEnd(usize),
    Containing(Str),
    Starting(Str),
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistorySelector {
    pub event:      HistoryEventKind,
    /// Word sub-range of the selected entry; `None` selects all words.
    pub word_range: Option<(usize, Option<usize>)>,
}

#[derive(Clone, Debug)]
pub struct SyntaxErrorInfo {
    pub message:     Str,
    /// A continuable error means more input may fix the parse (used by the
    /// interactive loop to keep reading).
    pub continuable: bool,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    // Logical / pipeline
    And { left: Box<Node>, right: Box<Node> },
    Or { left: Box<Node>, right: Box<Node> },
    Pipe { left: Box<Node>, right: Box<Node> },
    Sequence { entries: Vec<Node> },
    Background { command: Box<Node> },
    Join { left: Box<Node>, right: Box<Node> },

    // Commands & redirections
    Execute { command: Box<Node>, capture_stdout: bool },
    CastToCommand { inner: Box<Node> },
    CastToList { inner: Option<Box<Node>> },
    ReadRedirection(PathRedirection),
    WriteRedirection(PathRedirection),
    WriteAppendRedirection(PathRedirection),
    ReadWriteRedirection(PathRedirection),
    Fd2FdRedirection { old_fd: i32, new_fd: i32 },
    CloseFdRedirection { fd: i32 },
    CommandLiteral { command: crate::value::Command },

    // Strings & literals
    StringLiteral { text: Str, enclosure: Enclosure },
    DoubleQuotedString { inner: Option<Box<Node>> },
    BarewordLiteral { text: Str },
    Glob { text: Str },
    Tilde { username: Str },
    Heredoc(HeredocNode),
    StringPartCompose { left: Box<Node>, right: Box<Node> },
    Juxtaposition { left: Box<Node>, right: Box<Node>, mode: JuxtapositionMode },

    // Variables
    SimpleVariable { name: Str, slice: Option<Box<Node>> },
    SpecialVariable { name: char, slice: Option<Box<Node>> },
    Slice { inner: Box<Node> },

    // Structured
    ListConcatenate { entries: Vec<Node> },
    BraceExpansion { entries: Vec<Node> },
    Range { start: Box<Node>, end: Box<Node> },

    // Control flow
    IfCond {
        condition: Box<Node>,
        true_branch: Option<Box<Node>>,
        false_branch: Option<Box<Node>>,
        else_position: Option<Position>,
    },
    ForLoop {
        variable: Option<NameWithPosition>,
        index_variable: Option<NameWithPosition>,
        iterated_expression: Option<Box<Node>>,
        block: Option<Box<Node>>,
    },
    Subshell { block: Option<Box<Node>> },
    MatchExpr { subject: Box<Node>, subject_name: Option<Str>, entries: Vec<MatchEntry> },
    ContinuationControl { kind: ContinuationKind },
    FunctionDeclaration {
        name: NameWithPosition,
        arguments: Vec<NameWithPosition>,
        block: Option<Box<Node>>,
    },

    // Meta
    DynamicEvaluate { inner: Box<Node> },
    ImmediateExpression { name: NameWithPosition, arguments: Vec<Node> },
    HistoryEvent { selector: HistorySelector },
    VariableDeclarations { variables: Vec<VariableDeclaration> },
    Comment { text: Str },
    SyntaxError(SyntaxErrorInfo),
    SyntheticValue { value: Value },
}

/// One AST node: a variant, where it came from, and (when the subtree is
/// malformed) the syntax error it inherited.
#[derive(Clone, Debug)]
pub struct Node {
    kind:         NodeKind,
    position:     Position,
    syntax_error: Option<Box<Node>>,
}

impl Node {
    /// Builds a node, inheriting the first syntax error found among its
    /// immediate children.
    pub fn new(kind: NodeKind, position: Position) -> Self {
        let mut node = Node { kind, position, syntax_error: None };
        if let Some(error) = node.first_child_syntax_error() {
            node.syntax_error = Some(Box::new(error));
        }
        node
    }

    pub fn syntax_error(message: impl Into<Str>, position: Position) -> Self {
        Node {
            kind: NodeKind::SyntaxError(SyntaxErrorInfo {
                message:     message.into(),
                continuable: false,
            }),
            position,
            syntax_error: None,
        }
    }

    pub fn continuable_syntax_error(message: impl Into<Str>, position: Position) -> Self {
        Node {
            kind: NodeKind::SyntaxError(SyntaxErrorInfo {
                message:     message.into(),
                continuable: true,
            }),
            position,
            syntax_error: None,
        }
    }

    pub fn kind(&self) -> &NodeKind { &self.kind }

    pub fn kind_mut(&mut self) -> &mut NodeKind { &mut self.kind }

    pub fn position(&self) -> Position { self.position }

    pub fn is_syntax_error(&self) -> bool {
        matches!(self.kind, NodeKind::SyntaxError(_)) || self.syntax_error.is_some()
    }

    /// The designated error node, when this subtree is malformed.
    pub fn syntax_error_node(&self) -> Option<&Node> {
        if matches!(self.kind, NodeKind::SyntaxError(_)) {
            Some(self)
        } else {
            self.syntax_error.as_deref()
        }
    }

    pub fn set_syntax_error(&mut self, error: Node) { self.syntax_error = Some(Box::new(error)); }

    pub fn clear_syntax_error(&mut self) { self.syntax_error = None; }

    /// Whether this error can be continued by supplying more input.
    pub fn is_continuable_error(&self) -> bool {
        match self.syntax_error_node().map(Node::kind) {
            Some(NodeKind::SyntaxError(info)) => info.continuable,
            _ => false,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self.syntax_error_node().map(Node::kind) {
            Some(NodeKind::SyntaxError(info)) => Some(&info.message),
            _ => None,
        }
    }

    fn first_child_syntax_error(&self) -> Option<Node> {
        self.children()
            .into_iter()
            .find_map(|child| child.syntax_error_node().cloned())
    }

    /// The immediate children of this node, in source order. Heredoc
    /// contents are late-bound and not included.
    pub fn children(&self) -> Vec<&Node> {
        use NodeKind::*;
        match &self.kind {
            And { left, right }
            | Or { left, right }
            | Pipe { left, right }
            | Join { left, right }
            | StringPartCompose { left, right }
            | Juxtaposition { left, right, .. }
            | Range { start: left, end: right } => vec![left, right],
            Sequence { entries } | ListConcatenate { entries } | BraceExpansion { entries } => {
                entries.iter().collect()
            }
            Background { command } => vec![command],
            Execute { command, .. } => vec![command],
            CastToCommand { inner }
            | DynamicEvaluate { inner }
            | Slice { inner } => vec![inner],
            CastToList { inner } | DoubleQuotedString { inner } | Subshell { block: inner } => {
                inner.iter().map(|node| &**node).collect()
            }
            ReadRedirection(redir)
            | WriteRedirection(redir)
            | WriteAppendRedirection(redir)
            | ReadWriteRedirection(redir) => vec![&redir.path],
            SimpleVariable { slice, .. } | SpecialVariable { slice, .. } => {
                slice.iter().map(|node| &**node).collect()
            }
            IfCond { condition, true_branch, false_branch, .. } => {
                let mut children = vec![&**condition];
                children.extend(true_branch.iter().map(|node| &**node));
                children.extend(false_branch.iter().map(|node| &**node));
                children
            }
            ForLoop { iterated_expression, block, .. } => iterated_expression
                .iter()
                .chain(block.iter())
                .map(|node| &**node)
                .collect(),
            MatchExpr { subject, entries, .. } => {
                let mut children = vec![&**subject];
                for entry in entries {
                    if let MatchPatterns::Glob(patterns) = &entry.patterns {
                        children.extend(patterns.iter());
                    }
                    children.extend(entry.body.iter().map(|node| &**node));
                }
                children
            }
            FunctionDeclaration { block, .. } => block.iter().map(|node| &**node).collect(),
            ImmediateExpression { arguments, .. } => arguments.iter().collect(),
            VariableDeclarations { variables } => variables
                .iter()
                .flat_map(|decl| vec![&*decl.name, &*decl.value])
                .collect(),
            Fd2FdRedirection { .. }
            | CloseFdRedirection { .. }
            | CommandLiteral { .. }
            | StringLiteral { .. }
            | BarewordLiteral { .. }
            | Glob { .. }
            | Tilde { .. }
            | Heredoc(_)
            | ContinuationControl { .. }
            | HistoryEvent { .. }
            | Comment { .. }
            | SyntaxError(_)
            | SyntheticValue { .. } => Vec::new(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.format_into(f)
    }
}
