//! Non-evaluating views of the tree: hit testing for the editor,
//! highlight span collection, completion, and the runner hints.

use super::{Enclosure, Node, NodeKind};
use crate::{shell::Shell, types::Str};

/// Styles the editor understands; the editor itself maps them to colors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HighlightStyle {
    Keyword,
    Command,
    String,
    Glob,
    Variable,
    Comment,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HighlightSpan {
    pub start: usize,
    pub end:   usize,
    pub style: HighlightStyle,
}

/// Carried down the tree while highlighting.
#[derive(Clone, Copy, Debug, Default)]
pub struct HighlightMetadata {
    pub is_first_in_list: bool,
}

/// The nodes relevant to the cursor offset: the exact hit, the closest
/// node with semantic meaning, and the closest enclosing command.
#[derive(Clone, Copy, Debug, Default)]
pub struct HitTestResult<'a> {
    pub matching_node: Option<&'a Node>,
    pub closest_node_with_semantic_meaning: Option<&'a Node>,
    pub closest_command_node: Option<&'a Node>,
}

impl Node {
    /// True when running this node spawns or dispatches commands itself.
    pub fn would_execute(&self) -> bool {
        matches!(
            self.kind(),
            NodeKind::Execute { .. }
                | NodeKind::ForLoop { .. }
                | NodeKind::MatchExpr { .. }
                | NodeKind::FunctionDeclaration { .. }
        )
    }

    /// True when the node must run in the shell's own process (control
    /// flow and state mutation would be lost in a child).
    pub fn should_override_execution_in_current_process(&self) -> bool {
        matches!(
            self.kind(),
            NodeKind::ForLoop { .. }
                | NodeKind::MatchExpr { .. }
                | NodeKind::FunctionDeclaration { .. }
                | NodeKind::IfCond { .. }
                | NodeKind::Sequence { .. }
                | NodeKind::Subshell { .. }
                | NodeKind::VariableDeclarations { .. }
                | NodeKind::ContinuationControl { .. }
        )
    }

    fn is_semantic(&self) -> bool {
        matches!(
            self.kind(),
            NodeKind::SimpleVariable { .. }
                | NodeKind::SpecialVariable { .. }
                | NodeKind::Tilde { .. }
                | NodeKind::Glob { .. }
                | NodeKind::BarewordLiteral { .. }
                | NodeKind::StringLiteral { .. }
        )
    }

    /// Finds the node under `offset` along with its closest semantic and
    /// command ancestors.
    pub fn hit_test_position(&self, offset: usize) -> HitTestResult<'_> {
        let mut result = HitTestResult::default();

        for child in self.children() {
            let hit = child.hit_test_position(offset);
            if hit.matching_node.is_some() {
                result = hit;
                break;
            }
        }

        if result.matching_node.is_none() && self.position().contains(offset) && self.children().is_empty() {
            result.matching_node = Some(self);
        }

        if result.matching_node.is_some() {
            if result.closest_node_with_semantic_meaning.is_none() && self.is_semantic() {
                result.closest_node_with_semantic_meaning = Some(self);
            }
            match self.kind() {
                NodeKind::Execute { command, .. } => {
                    if result.closest_node_with_semantic_meaning.is_none() {
                        result.closest_node_with_semantic_meaning = Some(self);
                    }
                    if result.closest_command_node.is_none() {
                        result.closest_command_node = Some(command);
                    }
                }
                NodeKind::And { right, .. }
                | NodeKind::Or { right, .. }
                | NodeKind::Pipe { right, .. } => {
                    if result.closest_command_node.is_none() {
                        result.closest_command_node = Some(right);
                    }
                }
                NodeKind::CastToCommand { .. } | NodeKind::CommandLiteral { .. } => {
                    if result.closest_command_node.is_none() {
                        result.closest_command_node = Some(self);
                    }
                }
                _ => {}
            }
        }

        result
    }

    /// Recovers a program name when the node is (or begins with) a plain
    /// literal; used by completion and argument parsing.
    pub fn leftmost_trivial_literal(&self) -> Option<&Node> {
        match self.kind() {
            NodeKind::BarewordLiteral { .. } | NodeKind::StringLiteral { .. } => Some(self),
            NodeKind::Sequence { entries } | NodeKind::ListConcatenate { entries } => {
                entries.iter().find_map(Node::leftmost_trivial_literal)
            }
            NodeKind::Execute { command, .. } => command.leftmost_trivial_literal(),
            NodeKind::CastToCommand { inner } => inner.leftmost_trivial_literal(),
            NodeKind::Join { left, right } => left
                .leftmost_trivial_literal()
                .or_else(|| right.leftmost_trivial_literal()),
            NodeKind::Juxtaposition { left, .. } => left.leftmost_trivial_literal(),
            _ => None,
        }
    }

    /// The literal text of this node, when it has one.
    pub fn literal_text(&self) -> Option<&str> {
        match self.kind() {
            NodeKind::BarewordLiteral { text }
            | NodeKind::StringLiteral { text, .. }
            | NodeKind::Glob { text }
            | NodeKind::Comment { text } => Some(text),
            _ => None,
        }
    }

    /// Collects highlight spans for display; the editor applies them.
    pub fn highlight_in_editor(&self, spans: &mut Vec<HighlightSpan>, metadata: HighlightMetadata) {
        let position = self.position();
        let keyword = |len: usize| HighlightSpan {
            start: position.start_offset,
            end:   position.start_offset + len,
            style: HighlightStyle::Keyword,
        };
        match self.kind() {
            NodeKind::StringLiteral { enclosure, .. } => {
                if *enclosure != Enclosure::None {
                    spans.push(HighlightSpan {
                        start: position.start_offset,
                        end:   position.end_offset,
                        style: HighlightStyle::String,
                    });
                } else if metadata.is_first_in_list {
                    spans.push(HighlightSpan {
                        start: position.start_offset,
                        end:   position.end_offset,
                        style: HighlightStyle::Command,
                    });
                }
            }
            NodeKind::DoubleQuotedString { inner } => {
                spans.push(HighlightSpan {
                    start: position.start_offset,
                    end:   position.end_offset,
                    style: HighlightStyle::String,
                });
                if let Some(inner) = inner {
                    inner.highlight_in_editor(spans, HighlightMetadata::default());
                }
            }
            NodeKind::Heredoc(_) => spans.push(HighlightSpan {
                start: position.start_offset,
                end:   position.end_offset,
                style: HighlightStyle::String,
            }),
            NodeKind::BarewordLiteral { .. } => {
                if metadata.is_first_in_list {
                    spans.push(HighlightSpan {
                        start: position.start_offset,
                        end:   position.end_offset,
                        style: HighlightStyle::Command,
                    });
                }
            }
            NodeKind::Glob { .. } => spans.push(HighlightSpan {
                start: position.start_offset,
                end:   position.end_offset,
                style: HighlightStyle::Glob,
            }),
            NodeKind::SimpleVariable { .. }
            | NodeKind::SpecialVariable { .. }
            | NodeKind::Tilde { .. } => spans.push(HighlightSpan {
                start: position.start_offset,
                end:   position.end_offset,
                style: HighlightStyle::Variable,
            }),
            NodeKind::Comment { .. } => spans.push(HighlightSpan {
                start: position.start_offset,
                end:   position.end_offset,
                style: HighlightStyle::Comment,
            }),
            NodeKind::SyntaxError(_) => spans.push(HighlightSpan {
                start: position.start_offset,
                end:   position.end_offset,
                style: HighlightStyle::Error,
            }),
            NodeKind::ForLoop { iterated_expression, .. } => {
                spans.push(keyword(if iterated_expression.is_some() { 3 } else { 4 }));
                self.highlight_children(spans, HighlightMetadata { is_first_in_list: false });
            }
            NodeKind::IfCond { .. } => {
                spans.push(keyword(2));
                self.highlight_children(spans, HighlightMetadata { is_first_in_list: true });
            }
            NodeKind::MatchExpr { .. } => {
                spans.push(keyword(5));
                self.highlight_children(spans, HighlightMetadata { is_first_in_list: false });
            }
            NodeKind::ContinuationControl { .. } => spans.push(HighlightSpan {
                start: position.start_offset,
                end:   position.end_offset,
                style: HighlightStyle::Keyword,
            }),
            NodeKind::FunctionDeclaration { name, .. } => {
                spans.push(HighlightSpan {
                    start: name.position.start_offset,
                    end:   name.position.end_offset,
                    style: HighlightStyle::Command,
                });
                self.highlight_children(spans, HighlightMetadata::default());
            }
            NodeKind::Execute { command, .. } => {
                command
                    .highlight_in_editor(spans, HighlightMetadata { is_first_in_list: true });
            }
            NodeKind::And { left, right }
            | NodeKind::Or { left, right }
            | NodeKind::Pipe { left, right } => {
                left.highlight_in_editor(spans, HighlightMetadata { is_first_in_list: true });
                right.highlight_in_editor(spans, HighlightMetadata { is_first_in_list: true });
            }
            NodeKind::Juxtaposition { left, right, .. } => {
                left.highlight_in_editor(spans, metadata);
                right.highlight_in_editor(spans, HighlightMetadata { is_first_in_list: false });
            }
            _ => self.highlight_children(spans, metadata),
        }
    }

    fn highlight_children(&self, spans: &mut Vec<HighlightSpan>, metadata: HighlightMetadata) {
        for child in self.children() {
            child.highlight_in_editor(spans, metadata);
        }
    }

    /// Produces completion candidates for the cursor offset. Program names
    /// complete in command position, paths elsewhere.
    pub fn complete_for_editor(&self, shell: &Shell, offset: usize) -> Vec<Str> {
        let hit = self.hit_test_position(offset);
        let node = match hit.matching_node {
            Some(node) => node,
            None => return Vec::new(),
        };
        let text = match node.literal_text() {
            Some(text) => text,
            None => return Vec::new(),
        };
        let consumed = offset.saturating_sub(node.position().start_offset).min(text.len());
        let prefix = &text[..consumed];

        let in_command_position = hit
            .closest_command_node
            .and_then(Node::leftmost_trivial_literal)
            .map(|literal| std::ptr::eq(literal, node))
            .unwrap_or(true);

        if in_command_position && !prefix.contains('/') {
            shell.complete_program(prefix)
        } else {
            shell.complete_path(prefix)
        }
    }
}
