//! Canonical source formatting. Printing a tree and reparsing it yields
//! an equivalent tree for every construct this formatter can spell.

use super::{Enclosure, HistoryEventKind, MatchPatterns, Node, NodeKind};
use itertools::Itertools;
use std::fmt::{self, Write};

impl Node {
    pub(super) fn format_into(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            NodeKind::And { left, right } => write!(f, "{} && {}", left, right),
            NodeKind::Or { left, right } => write!(f, "{} || {}", left, right),
            NodeKind::Pipe { left, right } => write!(f, "{} | {}", left, right),
            NodeKind::Sequence { entries } => {
                write!(f, "{}", entries.iter().format("; "))
            }
            NodeKind::Background { command } => write!(f, "{} &", command),
            NodeKind::Join { left, right } => write!(f, "{} {}", left, right),

            NodeKind::Execute { command, capture_stdout } => {
                if *capture_stdout {
                    write!(f, "$({})", command)
                } else {
                    write!(f, "{}", command)
                }
            }
            NodeKind::CastToCommand { inner } => write!(f, "{}", inner),
            NodeKind::CastToList { inner } => match inner {
                Some(inner) => write!(f, "({})", inner),
                None => f.write_str("()"),
            },
            NodeKind::ReadRedirection(redir) => {
                if redir.fd == 0 {
                    write!(f, "<{}", redir.path)
                } else {
                    write!(f, "{}<{}", redir.fd, redir.path)
                }
            }
            NodeKind::WriteRedirection(redir) => {
                if redir.fd == 1 {
                    write!(f, ">{}", redir.path)
                } else {
                    write!(f, "{}>{}", redir.fd, redir.path)
                }
            }
            NodeKind::WriteAppendRedirection(redir) => {
                if redir.fd == 1 {
                    write!(f, ">>{}", redir.path)
                } else {
                    write!(f, "{}>>{}", redir.fd, redir.path)
                }
            }
            NodeKind::ReadWriteRedirection(redir) => {
                if redir.fd == 0 {
                    write!(f, "<>{}", redir.path)
                } else {
                    write!(f, "{}<>{}", redir.fd, redir.path)
                }
            }
            NodeKind::Fd2FdRedirection { old_fd, new_fd } => {
                write!(f, "{}>&{}", new_fd, old_fd)
            }
            NodeKind::CloseFdRedirection { fd } => write!(f, "{}>&-", fd),
            NodeKind::CommandLiteral { command } => {
                write!(f, "{}", command.argv.iter().format(" "))
            }

            NodeKind::StringLiteral { text, enclosure } => match enclosure {
                Enclosure::None => f.write_str(text),
                Enclosure::SingleQuotes => write!(f, "'{}'", text),
                Enclosure::DoubleQuotes => write!(f, "\"{}\"", text),
            },
            NodeKind::DoubleQuotedString { inner } => match inner {
                Some(inner) => write!(f, "\"{}\"", inner),
                None => f.write_str("\"\""),
            },
            NodeKind::BarewordLiteral { text } => f.write_str(text),
            NodeKind::Glob { text } => f.write_str(text),
            NodeKind::Tilde { username } => write!(f, "~{}", username),
            NodeKind::Heredoc(heredoc) => {
                f.write_str("<<")?;
                if heredoc.deindent {
                    f.write_char('~')?;
                }
                if heredoc.allows_interpolation {
                    f.write_str(&heredoc.end)
                } else {
                    write!(f, "'{}'", heredoc.end)
                }
            }
            NodeKind::StringPartCompose { left, right } => write!(f, "{}{}", left, right),
            NodeKind::Juxtaposition { left, right, .. } => write!(f, "{}{}", left, right),

            NodeKind::SimpleVariable { name, slice } => {
                write!(f, "${}", name)?;
                if let Some(slice) = slice {
                    write!(f, "{}", slice)?;
                }
                Ok(())
            }
            NodeKind::SpecialVariable { name, slice } => {
                write!(f, "${}", name)?;
                if let Some(slice) = slice {
                    write!(f, "{}", slice)?;
                }
                Ok(())
            }
            NodeKind::Slice { inner } => write!(f, "[{}]", inner),

            NodeKind::ListConcatenate { entries } => {
                write!(f, "{}", entries.iter().format(" "))
            }
            NodeKind::BraceExpansion { entries } => {
                write!(f, "{{{}}}", entries.iter().format(","))
            }
            NodeKind::Range { start, end } => write!(f, "{}..{}", start, end),

            NodeKind::IfCond { condition, true_branch, false_branch, .. } => {
                write!(f, "if {} {{", condition)?;
                if let Some(branch) = true_branch {
                    write!(f, " {} ", branch)?;
                }
                f.write_char('}')?;
                if let Some(branch) = false_branch {
                    write!(f, " else {{ {} }}", branch)?;
                }
                Ok(())
            }
            NodeKind::ForLoop { variable, index_variable, iterated_expression, block } => {
                match iterated_expression {
                    Some(iterated) => {
                        f.write_str("for ")?;
                        if let Some(index) = index_variable {
                            write!(f, "index {} ", index.name)?;
                        }
                        if let Some(variable) = variable {
                            write!(f, "{} ", variable.name)?;
                        }
                        write!(f, "in {} {{", iterated)?;
                    }
                    None => f.write_str("loop {")?,
                }
                if let Some(block) = block {
                    write!(f, " {} ", block)?;
                }
                f.write_char('}')
            }
            NodeKind::Subshell { block } => match block {
                Some(block) => write!(f, "{{ {} }}", block),
                None => f.write_str("{ }"),
            },
            NodeKind::MatchExpr { subject, subject_name, entries } => {
                write!(f, "match {}", subject)?;
                if let Some(name) = subject_name {
                    write!(f, " as {}", name)?;
                }
                f.write_str(" {")?;
                for entry in entries {
                    match &entry.patterns {
                        MatchPatterns::Glob(options) => {
                            write!(f, " {}", options.iter().format(" | "))?;
                        }
                        MatchPatterns::Regex(sources) => {
                            for source in sources {
                                write!(f, " (?:{})", source)?;
                            }
                        }
                    }
                    if !entry.match_names.is_empty() {
                        write!(
                            f,
                            " as ({})",
                            entry.match_names.iter().map(|name| &name.name).format(" ")
                        )?;
                    }
                    match &entry.body {
                        Some(body) => write!(f, " {{ {} }}", body)?,
                        None => f.write_str(" { }")?,
                    }
                }
                f.write_str(" }")
            }
            NodeKind::ContinuationControl { kind } => match kind {
                super::ContinuationKind::Break => f.write_str("break"),
                super::ContinuationKind::Continue => f.write_str("continue"),
            },
            NodeKind::FunctionDeclaration { name, arguments, block } => {
                write!(
                    f,
                    "{}({})",
                    name.name,
                    arguments.iter().map(|argument| &argument.name).format(" ")
                )?;
                match block {
                    Some(block) => write!(f, " {{ {} }}", block),
                    None => f.write_str(" { }"),
                }
            }

            NodeKind::DynamicEvaluate { inner } => write!(f, "${}", inner),
            NodeKind::ImmediateExpression { name, arguments } => {
                write!(f, "${{{}", name.name)?;
                for argument in arguments {
                    write!(f, " {}", argument)?;
                }
                f.write_char('}')
            }
            NodeKind::HistoryEvent { selector } => {
                f.write_char('!')?;
                match &selector.event {
                    HistoryEventKind::IndexFromStart(index) => write!(f, "{}", index)?,
                    HistoryEventKind::IndexFromEnd(index) => write!(f, "-{}", index)?,
                    HistoryEventKind::Containing(text) => write!(f, "?{}", text)?,
                    HistoryEventKind::Starting(text) => f.write_str(text)?,
                }
                Ok(())
            }
            NodeKind::VariableDeclarations { variables } => {
                let mut first = true;
                for declaration in variables {
                    if !first {
                        f.write_char(' ')?;
                    }
                    first = false;
                    write!(f, "{}={}", declaration.name, declaration.value)?;
                }
                Ok(())
            }
            NodeKind::Comment { text } => write!(f, "#{}", text),
            NodeKind::SyntaxError(_) | NodeKind::SyntheticValue { .. } => Ok(()),
        }
    }
}
