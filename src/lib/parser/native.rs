//! The recursive-descent parser for the native grammar. It walks the
//! character stream directly, tracking byte offsets and line/column pairs
//! for every node it builds.

use crate::{
    ast::{
        ContinuationKind, Enclosure, HeredocNode, HistoryEventKind, HistorySelector,
        JuxtapositionMode, MatchEntry, MatchPatterns, NameWithPosition, Node, NodeKind,
        PathRedirection, VariableDeclaration,
    },
    position::{LineCol, Position},
    types::Str,
};
use std::{cell::RefCell, rc::Rc};

/// Nesting deeper than this yields a syntax error instead of a stack
/// overflow.
const MAX_DEPTH: usize = 512;

#[derive(Clone, Copy)]
struct Mark {
    offset: usize,
    line:   usize,
    col:    usize,
}

struct PendingHeredoc {
    key:         Str,
    interpolate: bool,
    deindent:    bool,
    strip_tabs:  bool,
    contents:    Rc<RefCell<Option<Node>>>,
}

pub struct NativeParser<'a> {
    src:    &'a str,
    bytes:  &'a [u8],
    offset: usize,
    line:   usize,
    col:    usize,
    depth:  usize,
    pending_heredocs: Vec<PendingHeredoc>,
}

impl<'a> NativeParser<'a> {
    pub fn new(src: &'a str) -> Self {
        NativeParser {
            src,
            bytes: src.as_bytes(),
            offset: 0,
            line: 0,
            col: 0,
            depth: 0,
            pending_heredocs: Vec::new(),
        }
    }

    pub fn parse(mut self) -> Node {
        let mark = self.mark();
        let entries = self.parse_sequence_until(None);
        let position = self.span_from(mark);
        let sequence = Node::new(NodeKind::Sequence { entries }, position);
        let mut toplevel = Node::new(
            NodeKind::Execute { command: Box::new(sequence), capture_stdout: false },
            position,
        );
        if !self.pending_heredocs.is_empty() {
            let key = self.pending_heredocs[0].key.clone();
            toplevel.set_syntax_error(Node::continuable_syntax_error(
                format!("here-document '{}' has no terminator", key),
                position,
            ));
        }
        toplevel
    }

    // ---- cursor -----------------------------------------------------------

    fn mark(&self) -> Mark { Mark { offset: self.offset, line: self.line, col: self.col } }

    fn restore(&mut self, mark: Mark) {
        self.offset = mark.offset;
        self.line = mark.line;
        self.col = mark.col;
    }

    fn span_from(&self, mark: Mark) -> Position {
        Position {
            start_offset: mark.offset,
            end_offset:   self.offset,
            start_line:   LineCol { line: mark.line, col: mark.col },
            end_line:     LineCol { line: self.line, col: self.col },
        }
    }

    fn at_end(&self) -> bool { self.offset >= self.bytes.len() }

    fn peek(&self) -> Option<u8> { self.bytes.get(self.offset).copied() }

    fn peek_at(&self, ahead: usize) -> Option<u8> { self.bytes.get(self.offset + ahead).copied() }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.offset += 1;
        if byte == b'\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(byte)
    }

    /// Advances over one full character, however many bytes it takes.
    fn advance_char(&mut self) -> char {
        let ch = self.src[self.offset..].chars().next().unwrap_or('\0');
        for _ in 0..ch.len_utf8().max(1) {
            self.advance();
        }
        ch
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, text: &str) -> bool {
        if self.src[self.offset..].starts_with(text) {
            for _ in 0..text.len() {
                self.advance();
            }
            true
        } else {
            false
        }
    }

    fn skip_blanks(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.advance();
        }
    }

    /// Consumes blanks, separators and newlines; each newline resolves any
    /// registered here-documents before parsing continues.
    fn skip_separators(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b';') => {
                    self.advance();
                }
                Some(b'\n') => {
                    self.advance();
                    self.parse_heredoc_entries();
                }
                _ => break,
            }
        }
    }

    fn keyword_ahead(&self, keyword: &str) -> bool {
        let rest = &self.src[self.offset..];
        rest.starts_with(keyword)
            && rest[keyword.len()..]
                .bytes()
                .next()
                .map(|byte| !is_word_byte(byte))
                .unwrap_or(true)
    }

    // ---- sequences --------------------------------------------------------

    fn parse_sequence_until(&mut self, closer: Option<u8>) -> Vec<Node> {
        let mut entries = Vec::new();
        loop {
            self.skip_separators();
            if self.at_end() {
                break;
            }
            if let Some(closer) = closer {
                if self.peek() == Some(closer) {
                    break;
                }
            }
            if closer.is_none() && self.peek() == Some(b'}') {
                // A stray block end; report it rather than spinning.
                let mark = self.mark();
                self.advance();
                entries.push(Node::syntax_error("unexpected '}'", self.span_from(mark)));
                continue;
            }

            let before = self.offset;
            self.parse_sequence_entry(&mut entries, closer);
            if self.offset == before {
                // No progress; consume one byte as an error and move on.
                let mark = self.mark();
                self.advance();
                entries.push(Node::syntax_error("unexpected character", self.span_from(mark)));
            }
        }
        entries
    }

    fn parse_sequence_entry(&mut self, entries: &mut Vec<Node>, closer: Option<u8>) {
        if let Some(declarations) = self.parse_variable_decls() {
            entries.push(declarations);
            self.skip_blanks();
            if self.at_end()
                || matches!(self.peek(), Some(b';') | Some(b'\n'))
                || self.peek() == closer
            {
                return;
            }
        }

        if let Some(function) = self.parse_function_declaration() {
            entries.push(function);
            return;
        }

        let mark = self.mark();
        let node = self.parse_or_logical();
        let mut node = match node {
            Some(node) => node,
            None => return,
        };

        self.skip_blanks();
        if self.eat(b'&') {
            // Trailing '&!' also disowns; the job spec keeps the node shape
            // identical either way.
            self.eat(b'!');
            node = Node::new(
                NodeKind::Background { command: Box::new(node) },
                self.span_from(mark),
            );
        }
        entries.push(node);
    }

    fn parse_variable_decls(&mut self) -> Option<Node> {
        let mark = self.mark();
        let mut variables = Vec::new();
        loop {
            let save = self.mark();
            self.skip_blanks();
            let name_mark = self.mark();
            let name = self.parse_identifier();
            if name.is_empty() || !self.eat(b'=') {
                self.restore(save);
                break;
            }
            // `NAME==` or `NAME=(`... are not declarations in this grammar.
            if matches!(self.peek(), Some(b'=')) {
                self.restore(save);
                break;
            }
            let name_node = Node::new(
                NodeKind::BarewordLiteral { text: name },
                self.span_from(name_mark),
            );
            let value = match self.parse_expression() {
                Some(value) => value,
                None => {
                    let position = self.span_from(name_mark);
                    Node::new(
                        NodeKind::StringLiteral { text: Str::new(), enclosure: Enclosure::None },
                        position,
                    )
                }
            };
            variables.push(VariableDeclaration {
                name:  Box::new(name_node),
                value: Box::new(value),
            });
            if !matches!(self.peek(), Some(b' ') | Some(b'\t')) {
                break;
            }
        }
        if variables.is_empty() {
            self.restore(mark);
            return None;
        }
        Some(Node::new(NodeKind::VariableDeclarations { variables }, self.span_from(mark)))
    }

    fn parse_function_declaration(&mut self) -> Option<Node> {
        let mark = self.mark();
        let name_mark = self.mark();
        let name = self.parse_identifier();
        if name.is_empty() || !self.eat(b'(') {
            self.restore(mark);
            return None;
        }
        let name = NameWithPosition { name, position: self.span_from(name_mark) };

        let mut arguments = Vec::new();
        loop {
            self.skip_blanks();
            if self.eat(b')') {
                break;
            }
            let argument_mark = self.mark();
            let argument = self.parse_identifier();
            if argument.is_empty() {
                self.restore(mark);
                return None;
            }
            arguments.push(NameWithPosition {
                name:     argument,
                position: self.span_from(argument_mark),
            });
        }

        self.skip_blanks();
        if !self.eat(b'{') {
            self.restore(mark);
            return None;
        }
        let block = self.parse_block_body();
        if !self.eat(b'}') {
            let mut node = Node::new(
                NodeKind::FunctionDeclaration { name, arguments, block: Some(Box::new(block)) },
                self.span_from(mark),
            );
            node.set_syntax_error(Node::continuable_syntax_error(
                "expected '}' to close the function body",
                self.span_from(mark),
            ));
            return Some(node);
        }
        Some(Node::new(
            NodeKind::FunctionDeclaration { name, arguments, block: Some(Box::new(block)) },
            self.span_from(mark),
        ))
    }

    /// Parses `{ ... }` contents into an executable sequence.
    fn parse_block_body(&mut self) -> Node {
        let mark = self.mark();
        let entries = self.parse_sequence_until(Some(b'}'));
        let position = self.span_from(mark);
        let sequence = Node::new(NodeKind::Sequence { entries }, position);
        Node::new(
            NodeKind::Execute { command: Box::new(sequence), capture_stdout: false },
            position,
        )
    }

    // ---- logical chains and pipelines -------------------------------------

    fn parse_or_logical(&mut self) -> Option<Node> {
        let mark = self.mark();
        let mut left = self.parse_and_logical()?;
        loop {
            self.skip_blanks();
            if self.src[self.offset..].starts_with("||") {
                self.advance();
                self.advance();
                self.skip_separators_for_continuation();
                let right = match self.parse_and_logical() {
                    Some(right) => right,
                    None => Node::continuable_syntax_error(
                        "expected an expression after '||'",
                        self.span_from(mark),
                    ),
                };
                left = Node::new(
                    NodeKind::Or { left: Box::new(left), right: Box::new(right) },
                    self.span_from(mark),
                );
            } else {
                break;
            }
        }
        Some(left)
    }

    fn parse_and_logical(&mut self) -> Option<Node> {
        let mark = self.mark();
        let mut left = self.parse_pipeline()?;
        loop {
            self.skip_blanks();
            if self.src[self.offset..].starts_with("&&") {
                self.advance();
                self.advance();
                self.skip_separators_for_continuation();
                let right = match self.parse_pipeline() {
                    Some(right) => right,
                    None => Node::continuable_syntax_error(
                        "expected an expression after '&&'",
                        self.span_from(mark),
                    ),
                };
                left = Node::new(
                    NodeKind::And { left: Box::new(left), right: Box::new(right) },
                    self.span_from(mark),
                );
            } else {
                break;
            }
        }
        Some(left)
    }

    /// After a logical operator a newline continues the expression.
    fn skip_separators_for_continuation(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') => {
                    self.advance();
                }
                Some(b'\n') => {
                    self.advance();
                    self.parse_heredoc_entries();
                }
                _ => break,
            }
        }
    }

    fn parse_pipeline(&mut self) -> Option<Node> {
        if self.depth >= MAX_DEPTH {
            let mark = self.mark();
            return Some(Node::syntax_error("expression nests too deeply", self.span_from(mark)));
        }
        self.depth += 1;
        let result = self.parse_pipeline_inner();
        self.depth -= 1;
        result
    }

    fn parse_pipeline_inner(&mut self) -> Option<Node> {
        self.skip_blanks();
        if let Some(control) = self.parse_control_structure() {
            return Some(control);
        }

        let mark = self.mark();
        let mut left = self.parse_command()?;
        self.skip_blanks();
        if self.peek() == Some(b'|') && self.peek_at(1) != Some(b'|') {
            self.advance();
            if self.eat(b'&') {
                // `a |& b` folds stderr into the pipe.
                let redirection = Node::new(
                    NodeKind::Fd2FdRedirection { old_fd: 1, new_fd: 2 },
                    self.span_from(mark),
                );
                left = Node::new(
                    NodeKind::Join { left: Box::new(left), right: Box::new(redirection) },
                    self.span_from(mark),
                );
            }
            self.skip_separators_for_continuation();
            let right = match self.parse_pipeline() {
                Some(right) => right,
                None => Node::continuable_syntax_error(
                    "expected a command after '|'",
                    self.span_from(mark),
                ),
            };
            return Some(Node::new(
                NodeKind::Pipe { left: Box::new(left), right: Box::new(right) },
                self.span_from(mark),
            ));
        }
        Some(left)
    }

    fn parse_control_structure(&mut self) -> Option<Node> {
        if self.keyword_ahead("if") {
            return Some(self.parse_if_expr());
        }
        if self.keyword_ahead("for") {
            return Some(self.parse_for_loop());
        }
        if self.keyword_ahead("loop") {
            return Some(self.parse_infinite_loop());
        }
        if self.keyword_ahead("match") {
            return Some(self.parse_match_expr());
        }
        if self.keyword_ahead("break") {
            let mark = self.mark();
            self.eat_str("break");
            return Some(Node::new(
                NodeKind::ContinuationControl { kind: ContinuationKind::Break },
                self.span_from(mark),
            ));
        }
        if self.keyword_ahead("continue") {
            let mark = self.mark();
            self.eat_str("continue");
            return Some(Node::new(
                NodeKind::ContinuationControl { kind: ContinuationKind::Continue },
                self.span_from(mark),
            ));
        }
        if self.peek() == Some(b'{') {
            let mark = self.mark();
            self.advance();
            let block = self.parse_block_body();
            if !self.eat(b'}') {
                let mut node = Node::new(
                    NodeKind::Subshell { block: Some(Box::new(block)) },
                    self.span_from(mark),
                );
                node.set_syntax_error(Node::continuable_syntax_error(
                    "expected '}' to close the block",
                    self.span_from(mark),
                ));
                return Some(node);
            }
            return Some(Node::new(
                NodeKind::Subshell { block: Some(Box::new(block)) },
                self.span_from(mark),
            ));
        }
        None
    }

    fn parse_if_expr(&mut self) -> Node {
        let mark = self.mark();
        self.eat_str("if");
        self.skip_blanks();

        let condition = match self.parse_or_logical() {
            Some(condition) => condition,
            None => Node::continuable_syntax_error(
                "expected a condition after 'if'",
                self.span_from(mark),
            ),
        };
        // The condition always runs through its own Execute so the branch
        // decision reads the fresh return code.
        let condition = Node::new(
            NodeKind::Execute { command: Box::new(condition), capture_stdout: false },
            self.span_from(mark),
        );

        self.skip_blanks();
        let true_branch = if self.eat(b'{') {
            let block = self.parse_block_body();
            if !self.eat(b'}') {
                return Node::continuable_syntax_error(
                    "expected '}' to close the 'if' body",
                    self.span_from(mark),
                );
            }
            Some(Box::new(block))
        } else {
            None
        };

        let mut node = Node::new(
            NodeKind::IfCond {
                condition: Box::new(condition),
                true_branch,
                false_branch: None,
                else_position: None,
            },
            self.span_from(mark),
        );

        let save = self.mark();
        self.skip_separators_for_continuation();
        let else_mark = self.mark();
        if self.keyword_ahead("else") {
            self.eat_str("else");
            let else_position = self.span_from(else_mark);
            self.skip_blanks();
            let false_branch = if self.keyword_ahead("if") {
                Some(Box::new(self.parse_if_expr()))
            } else if self.eat(b'{') {
                let block = self.parse_block_body();
                if !self.eat(b'}') {
                    return Node::continuable_syntax_error(
                        "expected '}' to close the 'else' body",
                        self.span_from(mark),
                    );
                }
                Some(Box::new(block))
            } else {
                None
            };
            // The false branch lands on the already-built node; this is the
            // one mutation IfCond permits after construction.
            if let NodeKind::IfCond { false_branch: slot, else_position: else_slot, .. } =
                node.kind_mut()
            {
                *slot = false_branch;
                *else_slot = Some(else_position);
            }
        } else {
            self.restore(save);
        }
        node
    }

    fn parse_for_loop(&mut self) -> Node {
        let mark = self.mark();
        self.eat_str("for");
        self.skip_blanks();

        let mut index_variable = None;
        let mut variable = None;

        if self.keyword_ahead("index") {
            let save = self.mark();
            self.eat_str("index");
            self.skip_blanks();
            let name_mark = self.mark();
            let name = self.parse_identifier();
            if name.is_empty() {
                self.restore(save);
            } else {
                index_variable =
                    Some(NameWithPosition { name, position: self.span_from(name_mark) });
                self.skip_blanks();
            }
        }

        if !self.keyword_ahead("in") {
            let name_mark = self.mark();
            let name = self.parse_identifier();
            if !name.is_empty() {
                variable = Some(NameWithPosition { name, position: self.span_from(name_mark) });
            }
            self.skip_blanks();
        }

        if !self.eat_str("in") {
            return Node::syntax_error("expected 'in' in 'for' loop", self.span_from(mark));
        }
        self.skip_blanks();

        let iterated = match self.parse_expression() {
            Some(iterated) => iterated,
            None => {
                return Node::continuable_syntax_error(
                    "expected an iterable expression in 'for' loop",
                    self.span_from(mark),
                )
            }
        };

        self.skip_separators_for_continuation();
        if !self.eat(b'{') {
            return Node::continuable_syntax_error(
                "expected '{' to start the 'for' body",
                self.span_from(mark),
            );
        }
        let block = self.parse_block_body();
        if !self.eat(b'}') {
            return Node::continuable_syntax_error(
                "expected '}' to close the 'for' body",
                self.span_from(mark),
            );
        }

        Node::new(
            NodeKind::ForLoop {
                variable,
                index_variable,
                iterated_expression: Some(Box::new(iterated)),
                block: Some(Box::new(block)),
            },
            self.span_from(mark),
        )
    }

    fn parse_infinite_loop(&mut self) -> Node {
        let mark = self.mark();
        self.eat_str("loop");
        self.skip_blanks();
        if !self.eat(b'{') {
            return Node::continuable_syntax_error(
                "expected '{' to start the 'loop' body",
                self.span_from(mark),
            );
        }
        let block = self.parse_block_body();
        if !self.eat(b'}') {
            return Node::continuable_syntax_error(
                "expected '}' to close the 'loop' body",
                self.span_from(mark),
            );
        }
        Node::new(
            NodeKind::ForLoop {
                variable: None,
                index_variable: None,
                iterated_expression: None,
                block: Some(Box::new(block)),
            },
            self.span_from(mark),
        )
    }

    fn parse_match_expr(&mut self) -> Node {
        let mark = self.mark();
        self.eat_str("match");
        self.skip_blanks();

        let subject = match self.parse_expression() {
            Some(subject) => subject,
            None => {
                return Node::continuable_syntax_error(
                    "expected a subject expression after 'match'",
                    self.span_from(mark),
                )
            }
        };

        self.skip_blanks();
        let mut subject_name = None;
        if self.keyword_ahead("as") {
            self.eat_str("as");
            self.skip_blanks();
            let name = self.parse_identifier();
            if !name.is_empty() {
                subject_name = Some(name);
            }
        }

        self.skip_separators_for_continuation();
        if !self.eat(b'{') {
            return Node::continuable_syntax_error(
                "expected '{' to start the 'match' body",
                self.span_from(mark),
            );
        }

        let mut entries = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(b'}') {
                break;
            }
            if self.at_end() {
                return Node::continuable_syntax_error(
                    "expected '}' to close the 'match' body",
                    self.span_from(mark),
                );
            }
            match self.parse_match_entry() {
                Some(entry) => entries.push(entry),
                None => {
                    return Node::syntax_error(
                        "expected a pattern in 'match' body",
                        self.span_from(mark),
                    )
                }
            }
        }

        Node::new(
            NodeKind::MatchExpr { subject: Box::new(subject), subject_name, entries },
            self.span_from(mark),
        )
    }

    fn parse_match_entry(&mut self) -> Option<MatchEntry> {
        let mut globs = Vec::new();
        let mut regexes = Vec::new();
        loop {
            self.skip_blanks();
            let pattern = self.parse_expression()?;
            // A pattern spelled as a non-capturing group is a regex rule.
            match pattern.literal_text() {
                Some(text) if text.starts_with("(?:") => regexes.push(Str::from(text)),
                _ => globs.push(pattern),
            }
            self.skip_blanks();
            if self.peek() == Some(b'|') && self.peek_at(1) != Some(b'|') {
                self.advance();
            } else {
                break;
            }
        }

        let mut match_names = Vec::new();
        if self.keyword_ahead("as") {
            self.eat_str("as");
            self.skip_blanks();
            if self.eat(b'(') {
                loop {
                    self.skip_blanks();
                    if self.eat(b')') {
                        break;
                    }
                    let name_mark = self.mark();
                    let name = self.parse_identifier();
                    if name.is_empty() {
                        return None;
                    }
                    match_names
                        .push(NameWithPosition { name, position: self.span_from(name_mark) });
                }
            }
        }

        self.skip_blanks();
        let body = if self.eat(b'{') {
            let block = self.parse_block_body();
            if !self.eat(b'}') {
                return None;
            }
            Some(Box::new(block))
        } else {
            None
        };

        let patterns = if globs.is_empty() && !regexes.is_empty() {
            MatchPatterns::Regex(regexes)
        } else {
            MatchPatterns::Glob(globs)
        };
        Some(MatchEntry { patterns, match_names, body })
    }

    // ---- commands ---------------------------------------------------------

    fn parse_command(&mut self) -> Option<Node> {
        let mark = self.mark();
        let mut items = Vec::new();
        loop {
            self.skip_blanks();
            if let Some(redirection) = self.parse_redirection() {
                items.push(redirection);
                continue;
            }
            match self.parse_list_expression() {
                Some(list) => {
                    let position = list.position();
                    items.push(Node::new(
                        NodeKind::CastToCommand { inner: Box::new(list) },
                        position,
                    ));
                }
                None => break,
            }
        }
        if items.is_empty() {
            return None;
        }

        let mut node = items.pop().unwrap();
        while let Some(left) = items.pop() {
            node = Node::new(
                NodeKind::Join { left: Box::new(left), right: Box::new(node) },
                self.span_from(mark),
            );
        }
        Some(node)
    }

    fn parse_list_expression(&mut self) -> Option<Node> {
        let mark = self.mark();
        let mut entries = Vec::new();
        loop {
            match self.parse_expression() {
                Some(entry) => entries.push(entry),
                None => break,
            }
            if !matches!(self.peek(), Some(b' ') | Some(b'\t')) {
                break;
            }
            self.skip_blanks();
            // The next word may open a redirection; leave it for the
            // command parser.
            if self.peek_redirection_ahead() {
                break;
            }
        }
        match entries.len() {
            0 => None,
            1 => Some(entries.pop().unwrap()),
            _ => Some(Node::new(NodeKind::ListConcatenate { entries }, self.span_from(mark))),
        }
    }

    fn peek_redirection_ahead(&self) -> bool {
        let mut ahead = 0;
        while matches!(self.peek_at(ahead), Some(byte) if byte.is_ascii_digit()) {
            ahead += 1;
        }
        matches!(self.peek_at(ahead), Some(b'<') | Some(b'>'))
    }

    fn parse_redirection(&mut self) -> Option<Node> {
        let mark = self.mark();

        let mut fd_digits = Str::new();
        while matches!(self.peek(), Some(byte) if byte.is_ascii_digit()) {
            fd_digits.push(self.advance().unwrap() as char);
        }
        let explicit_fd = if fd_digits.is_empty() { None } else { fd_digits.parse::<i32>().ok() };

        match self.peek() {
            Some(b'>') => {
                self.advance();
                if self.eat(b'>') {
                    let fd = explicit_fd.unwrap_or(1);
                    let path = self.parse_redirection_path(mark)?;
                    return Some(Node::new(
                        NodeKind::WriteAppendRedirection(PathRedirection {
                            fd,
                            path: Box::new(path),
                        }),
                        self.span_from(mark),
                    ));
                }
                if self.eat(b'&') {
                    let fd = explicit_fd.unwrap_or(1);
                    if self.eat(b'-') {
                        return Some(Node::new(
                            NodeKind::CloseFdRedirection { fd },
                            self.span_from(mark),
                        ));
                    }
                    let mut target = Str::new();
                    while matches!(self.peek(), Some(byte) if byte.is_ascii_digit()) {
                        target.push(self.advance().unwrap() as char);
                    }
                    return match target.parse::<i32>() {
                        Ok(old_fd) => Some(Node::new(
                            NodeKind::Fd2FdRedirection { old_fd, new_fd: fd },
                            self.span_from(mark),
                        )),
                        Err(_) => Some(Node::syntax_error(
                            "expected a file descriptor after '>&'",
                            self.span_from(mark),
                        )),
                    };
                }
                let fd = explicit_fd.unwrap_or(1);
                let path = self.parse_redirection_path(mark)?;
                Some(Node::new(
                    NodeKind::WriteRedirection(PathRedirection { fd, path: Box::new(path) }),
                    self.span_from(mark),
                ))
            }
            Some(b'<') => {
                self.advance();
                if self.peek() == Some(b'<') {
                    self.advance();
                    return Some(self.parse_heredoc_initiation(mark, explicit_fd.unwrap_or(0)));
                }
                if self.eat(b'>') {
                    let fd = explicit_fd.unwrap_or(0);
                    let path = self.parse_redirection_path(mark)?;
                    return Some(Node::new(
                        NodeKind::ReadWriteRedirection(PathRedirection {
                            fd,
                            path: Box::new(path),
                        }),
                        self.span_from(mark),
                    ));
                }
                let fd = explicit_fd.unwrap_or(0);
                let path = self.parse_redirection_path(mark)?;
                Some(Node::new(
                    NodeKind::ReadRedirection(PathRedirection { fd, path: Box::new(path) }),
                    self.span_from(mark),
                ))
            }
            _ => {
                self.restore(mark);
                None
            }
        }
    }

    fn parse_redirection_path(&mut self, mark: Mark) -> Option<Node> {
        self.skip_blanks();
        match self.parse_expression() {
            Some(path) => Some(path),
            None => Some(Node::continuable_syntax_error(
                "expected a path after the redirection",
                self.span_from(mark),
            )),
        }
    }

    // ---- heredocs ---------------------------------------------------------

    fn parse_heredoc_initiation(&mut self, mark: Mark, target_fd: i32) -> Node {
        let mut deindent = false;
        let mut strip_tabs = false;
        if self.eat(b'~') {
            deindent = true;
        } else if self.eat(b'-') {
            strip_tabs = true;
        }

        let mut interpolate = true;
        let mut key = Str::new();
        if self.eat(b'\'') {
            interpolate = false;
            while let Some(byte) = self.peek() {
                if byte == b'\'' {
                    self.advance();
                    break;
                }
                key.push(self.advance().unwrap() as char);
            }
        } else {
            while matches!(self.peek(), Some(byte) if is_word_byte(byte)) {
                key.push(self.advance().unwrap() as char);
            }
        }

        if key.is_empty() {
            return Node::syntax_error("expected a key for the here-document", self.span_from(mark));
        }

        let contents = Rc::new(RefCell::new(None));
        self.pending_heredocs.push(PendingHeredoc {
            key: key.clone(),
            interpolate,
            deindent,
            strip_tabs,
            contents: contents.clone(),
        });
        Node::new(
            NodeKind::Heredoc(HeredocNode {
                end: key,
                allows_interpolation: interpolate,
                deindent,
                target_fd,
                evaluates_to_string: false,
                contents,
            }),
            self.span_from(mark),
        )
    }

    /// Runs at every newline that terminates a sequence: collects the body
    /// of each registered here-document, in registration order.
    fn parse_heredoc_entries(&mut self) {
        let pending: Vec<PendingHeredoc> = self.pending_heredocs.drain(..).collect();
        for heredoc in pending {
            let mut lines: Vec<Str> = Vec::new();
            let mut terminated = false;
            while !self.at_end() {
                let start = self.offset;
                while !matches!(self.peek(), Some(b'\n') | None) {
                    self.advance_char();
                }
                let line = Str::from(&self.src[start..self.offset]);
                self.eat(b'\n');

                let terminator_view = if heredoc.strip_tabs {
                    line.trim_start_matches('\t')
                } else if heredoc.deindent {
                    line.trim_start()
                } else {
                    line.as_str()
                };
                if terminator_view == heredoc.key {
                    terminated = true;
                    break;
                }
                lines.push(line);
            }

            if !terminated {
                // Leave the cell unresolved; parse() attaches the error.
                self.pending_heredocs.push(heredoc);
                continue;
            }

            let body = assemble_heredoc_body(&lines, heredoc.strip_tabs, heredoc.deindent);
            let position = self.span_from(self.mark());
            let node = if heredoc.interpolate {
                let mut inner_parser = NativeParser::new(&body);
                let inner = inner_parser.parse_double_quoted_inner(None);
                let inner = inner.map(Box::new);
                Node::new(NodeKind::DoubleQuotedString { inner }, position)
            } else {
                Node::new(
                    NodeKind::StringLiteral { text: body, enclosure: Enclosure::None },
                    position,
                )
            };
            *heredoc.contents.borrow_mut() = Some(node);
        }
    }

    // ---- expressions ------------------------------------------------------

    fn parse_expression(&mut self) -> Option<Node> {
        if self.depth >= MAX_DEPTH {
            let mark = self.mark();
            return Some(Node::syntax_error("expression nests too deeply", self.span_from(mark)));
        }
        self.depth += 1;
        let result = self.parse_expression_inner();
        self.depth -= 1;
        result
    }

    fn parse_expression_inner(&mut self) -> Option<Node> {
        let mark = self.mark();
        match self.peek()? {
            b'#' => {
                self.advance();
                let start = self.offset;
                while !matches!(self.peek(), Some(b'\n') | None) {
                    self.advance();
                }
                let text = Str::from(&self.src[start..self.offset]);
                Some(Node::new(NodeKind::Comment { text }, self.span_from(mark)))
            }
            b'(' => {
                self.advance();
                self.skip_blanks();
                let inner = self.parse_list_expression();
                self.skip_blanks();
                if !self.eat(b')') {
                    return Some(Node::continuable_syntax_error(
                        "expected ')' to close the list",
                        self.span_from(mark),
                    ));
                }
                Some(Node::new(
                    NodeKind::CastToList { inner: inner.map(Box::new) },
                    self.span_from(mark),
                ))
            }
            b'!' => self.parse_history_event(),
            _ => self.parse_string_composite(),
        }
    }

    fn parse_history_event(&mut self) -> Option<Node> {
        let mark = self.mark();
        self.advance();
        let event = match self.peek() {
            Some(b'?') => {
                self.advance();
                let start = self.offset;
                while matches!(self.peek(), Some(byte) if is_word_byte(byte)) {
                    self.advance();
                }
                HistoryEventKind::Containing(Str::from(&self.src[start..self.offset]))
            }
            Some(b'-') => {
                self.advance();
                let start = self.offset;
                while matches!(self.peek(), Some(byte) if byte.is_ascii_digit()) {
                    self.advance();
                }
                match self.src[start..self.offset].parse() {
                    Ok(index) => HistoryEventKind::IndexFromEnd(index),
                    Err(_) => {
                        self.restore(mark);
                        return self.parse_string_composite();
                    }
                }
            }
            Some(byte) if byte.is_ascii_digit() => {
                let start = self.offset;
                while matches!(self.peek(), Some(byte) if byte.is_ascii_digit()) {
                    self.advance();
                }
                HistoryEventKind::IndexFromStart(self.src[start..self.offset].parse().ok()?)
            }
            Some(byte) if is_word_byte(byte) => {
                let start = self.offset;
                while matches!(self.peek(), Some(byte) if is_word_byte(byte)) {
                    self.advance();
                }
                HistoryEventKind::Starting(Str::from(&self.src[start..self.offset]))
            }
            _ => {
                self.restore(mark);
                return self.parse_string_composite();
            }
        };
        Some(Node::new(
            NodeKind::HistoryEvent {
                selector: HistorySelector { event, word_range: None },
            },
            self.span_from(mark),
        ))
    }

    /// One or more adjacent parts glued together by juxtaposition.
    fn parse_string_composite(&mut self) -> Option<Node> {
        let mark = self.mark();
        let mut parts = Vec::new();
        loop {
            let part = match self.peek() {
                Some(b'\'') => Some(self.parse_single_quoted()),
                Some(b'"') => Some(self.parse_double_quoted()),
                Some(b'$') => Some(self.parse_dollar_expression()),
                Some(b'{') => Some(self.parse_brace_expansion()),
                Some(b'~') if parts.is_empty() => Some(self.parse_tilde()),
                Some(byte) if is_bareword_start(byte) => self.parse_bareword(),
                _ => None,
            };
            match part {
                Some(part) => parts.push(part),
                None => break,
            }
        }
        if parts.is_empty() {
            return None;
        }

        let mut node = parts.pop().unwrap();
        while let Some(left) = parts.pop() {
            node = Node::new(
                NodeKind::Juxtaposition {
                    left:  Box::new(left),
                    right: Box::new(node),
                    mode:  JuxtapositionMode::ListExpand,
                },
                self.span_from(mark),
            );
        }
        Some(node)
    }

    fn parse_tilde(&mut self) -> Node {
        let mark = self.mark();
        self.advance();
        let start = self.offset;
        while matches!(self.peek(), Some(byte) if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-')
        {
            self.advance();
        }
        Node::new(
            NodeKind::Tilde { username: Str::from(&self.src[start..self.offset]) },
            self.span_from(mark),
        )
    }

    fn parse_single_quoted(&mut self) -> Node {
        let mark = self.mark();
        self.advance();
        let start = self.offset;
        let mut closed = false;
        while let Some(byte) = self.peek() {
            if byte == b'\'' {
                closed = true;
                break;
            }
            self.advance_char();
        }
        let text = Str::from(&self.src[start..self.offset]);
        if closed {
            self.advance();
        }
        let mut node = Node::new(
            NodeKind::StringLiteral { text, enclosure: Enclosure::SingleQuotes },
            self.span_from(mark),
        );
        if !closed {
            node.set_syntax_error(Node::continuable_syntax_error(
                "expected a terminating single quote",
                self.span_from(mark),
            ));
        }
        node
    }

    fn parse_double_quoted(&mut self) -> Node {
        let mark = self.mark();
        self.advance();
        let inner = self.parse_double_quoted_inner(Some(b'"'));
        if !self.eat(b'"') {
            let mut node = Node::new(
                NodeKind::DoubleQuotedString { inner: inner.map(Box::new) },
                self.span_from(mark),
            );
            node.set_syntax_error(Node::continuable_syntax_error(
                "expected a terminating double quote",
                self.span_from(mark),
            ));
            return node;
        }
        Node::new(
            NodeKind::DoubleQuotedString { inner: inner.map(Box::new) },
            self.span_from(mark),
        )
    }

    /// The body of a double-quoted string: literal runs interleaved with
    /// variables, immediate expressions, and command substitutions.
    fn parse_double_quoted_inner(&mut self, terminator: Option<u8>) -> Option<Node> {
        let mark = self.mark();
        let mut parts: Vec<Node> = Vec::new();
        let mut literal = Str::new();
        let mut literal_mark = self.mark();

        macro_rules! flush_literal {
            () => {
                if !literal.is_empty() {
                    parts.push(Node::new(
                        NodeKind::StringLiteral {
                            text:      std::mem::take(&mut literal),
                            enclosure: Enclosure::None,
                        },
                        self.span_from(literal_mark),
                    ));
                }
            };
        }

        loop {
            match self.peek() {
                None => break,
                Some(byte) if Some(byte) == terminator => break,
                Some(b'\\') => {
                    self.advance();
                    self.parse_double_quote_escape(&mut literal);
                }
                Some(b'$') => {
                    flush_literal!();
                    parts.push(self.parse_dollar_expression());
                    literal_mark = self.mark();
                }
                Some(_) => literal.push(self.advance_char()),
            }
        }
        flush_literal!();

        match parts.len() {
            0 => None,
            1 => Some(parts.pop().unwrap()),
            _ => {
                let mut node = parts.pop().unwrap();
                while let Some(left) = parts.pop() {
                    node = Node::new(
                        NodeKind::StringPartCompose {
                            left:  Box::new(left),
                            right: Box::new(node),
                        },
                        self.span_from(mark),
                    );
                }
                Some(node)
            }
        }
    }

    fn parse_double_quote_escape(&mut self, literal: &mut Str) {
        match self.advance() {
            Some(b'\\') => literal.push('\\'),
            Some(b'"') => literal.push('"'),
            Some(b'a') => literal.push('\x07'),
            Some(b'b') => literal.push('\x08'),
            Some(b'e') => literal.push('\x1b'),
            Some(b'f') => literal.push('\x0c'),
            Some(b'n') => literal.push('\n'),
            Some(b'r') => literal.push('\r'),
            Some(b't') => literal.push('\t'),
            Some(b'x') => {
                let mut value = 0u32;
                for _ in 0..2 {
                    match self.peek().and_then(|byte| (byte as char).to_digit(16)) {
                        Some(digit) => {
                            value = value * 16 + digit;
                            self.advance();
                        }
                        None => break,
                    }
                }
                if let Some(ch) = char::from_u32(value) {
                    literal.push(ch);
                }
            }
            Some(b'u') => {
                let mut value = 0u32;
                for _ in 0..8 {
                    match self.peek().and_then(|byte| (byte as char).to_digit(16)) {
                        Some(digit) => {
                            value = value * 16 + digit;
                            self.advance();
                        }
                        None => break,
                    }
                }
                if let Some(ch) = char::from_u32(value) {
                    literal.push(ch);
                }
            }
            Some(b'0') => {
                let mut value = 0u32;
                for _ in 0..3 {
                    match self.peek().and_then(|byte| (byte as char).to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            self.advance();
                        }
                        None => break,
                    }
                }
                if let Some(ch) = char::from_u32(value) {
                    literal.push(ch);
                }
            }
            Some(other) => {
                literal.push('\\');
                literal.push(other as char);
            }
            None => literal.push('\\'),
        }
    }

    fn parse_dollar_expression(&mut self) -> Node {
        let mark = self.mark();
        self.advance();
        match self.peek() {
            Some(b'{') => {
                self.advance();
                self.parse_immediate_expression(mark)
            }
            Some(b'(') => {
                self.advance();
                let entries = self.parse_sequence_until(Some(b')'));
                let position = self.span_from(mark);
                let sequence = Node::new(NodeKind::Sequence { entries }, position);
                if !self.eat(b')') {
                    return Node::continuable_syntax_error(
                        "expected ')' to close the command substitution",
                        self.span_from(mark),
                    );
                }
                Node::new(
                    NodeKind::Execute { command: Box::new(sequence), capture_stdout: true },
                    self.span_from(mark),
                )
            }
            Some(byte) if is_special_variable(byte) => {
                self.advance();
                let slice = self.parse_slice();
                Node::new(
                    NodeKind::SpecialVariable { name: byte as char, slice },
                    self.span_from(mark),
                )
            }
            Some(byte) if byte.is_ascii_alphabetic() || byte == b'_' => {
                let name = self.parse_identifier();
                let slice = self.parse_slice();
                Node::new(NodeKind::SimpleVariable { name, slice }, self.span_from(mark))
            }
            Some(b'\'') | Some(b'"') => {
                // `$"..."` dynamically evaluates the resolved text.
                let inner = match self.peek() {
                    Some(b'\'') => self.parse_single_quoted(),
                    _ => self.parse_double_quoted(),
                };
                Node::new(
                    NodeKind::DynamicEvaluate { inner: Box::new(inner) },
                    self.span_from(mark),
                )
            }
            _ => Node::new(
                NodeKind::BarewordLiteral { text: "$".into() },
                self.span_from(mark),
            ),
        }
    }

    fn parse_immediate_expression(&mut self, mark: Mark) -> Node {
        self.skip_blanks();
        let name_mark = self.mark();
        let name = self.parse_identifier();
        if name.is_empty() {
            return Node::syntax_error(
                "expected an immediate function name after '${'",
                self.span_from(mark),
            );
        }
        let name = NameWithPosition { name, position: self.span_from(name_mark) };

        let mut arguments = Vec::new();
        loop {
            self.skip_blanks();
            if self.eat(b'}') {
                return Node::new(
                    NodeKind::ImmediateExpression { name, arguments },
                    self.span_from(mark),
                );
            }
            if self.at_end() {
                return Node::continuable_syntax_error(
                    "expected '}' to close the immediate expression",
                    self.span_from(mark),
                );
            }
            match self.parse_expression() {
                Some(argument) => arguments.push(argument),
                None => {
                    return Node::syntax_error(
                        "expected an argument to the immediate function",
                        self.span_from(mark),
                    )
                }
            }
        }
    }

    fn parse_slice(&mut self) -> Option<Box<Node>> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mark = self.mark();
        self.advance();
        self.skip_blanks();
        let inner = self.parse_list_expression();
        self.skip_blanks();
        if !self.eat(b']') {
            return Some(Box::new(Node::syntax_error(
                "expected ']' to close the slice",
                self.span_from(mark),
            )));
        }
        let inner = inner.unwrap_or_else(|| {
            Node::new(NodeKind::CastToList { inner: None }, self.span_from(mark))
        });
        Some(Box::new(Node::new(
            NodeKind::Slice { inner: Box::new(inner) },
            self.span_from(mark),
        )))
    }

    fn parse_brace_expansion(&mut self) -> Node {
        let mark = self.mark();
        self.advance();
        let mut entries = Vec::new();
        loop {
            self.skip_blanks();
            if self.eat(b'}') {
                break;
            }
            if self.at_end() {
                return Node::continuable_syntax_error(
                    "expected '}' to close the brace expansion",
                    self.span_from(mark),
                );
            }
            if let Some(entry) = self.parse_brace_entry() {
                entries.push(entry);
            }
            self.skip_blanks();
            self.eat(b',');
        }
        Node::new(NodeKind::BraceExpansion { entries }, self.span_from(mark))
    }

    fn parse_brace_entry(&mut self) -> Option<Node> {
        let mark = self.mark();
        let first = self.parse_brace_word()?;
        if self.src[self.offset..].starts_with("..") {
            self.advance();
            self.advance();
            let second = match self.parse_brace_word() {
                Some(second) => second,
                None => Node::new(
                    NodeKind::StringLiteral { text: Str::new(), enclosure: Enclosure::None },
                    self.span_from(mark),
                ),
            };
            return Some(Node::new(
                NodeKind::Range { start: Box::new(first), end: Box::new(second) },
                self.span_from(mark),
            ));
        }
        Some(first)
    }

    /// A single word inside a brace expansion; commas and dots terminate.
    fn parse_brace_word(&mut self) -> Option<Node> {
        let mark = self.mark();
        match self.peek() {
            Some(b'\'') => return Some(self.parse_single_quoted()),
            Some(b'"') => return Some(self.parse_double_quoted()),
            Some(b'$') => return Some(self.parse_dollar_expression()),
            _ => {}
        }
        let start = self.offset;
        let mut has_glob = false;
        while let Some(byte) = self.peek() {
            if byte == b','
                || byte == b'}'
                || byte == b'{'
                || is_blank_or_separator(byte)
                || self.src[self.offset..].starts_with("..")
            {
                break;
            }
            if byte == b'*' || byte == b'?' {
                has_glob = true;
            }
            self.advance();
        }
        if self.offset == start {
            return None;
        }
        let text = Str::from(&self.src[start..self.offset]);
        let kind = if has_glob {
            NodeKind::Glob { text }
        } else {
            NodeKind::BarewordLiteral { text }
        };
        Some(Node::new(kind, self.span_from(mark)))
    }

    fn parse_bareword(&mut self) -> Option<Node> {
        let mark = self.mark();
        let mut text = Str::new();
        let mut has_glob = false;
        while let Some(byte) = self.peek() {
            if is_bareword_terminator(byte) {
                break;
            }
            if byte == b'\\' {
                self.advance();
                match self.advance() {
                    Some(escaped) => text.push(escaped as char),
                    None => break,
                }
                continue;
            }
            if byte == b'*' || byte == b'?' {
                has_glob = true;
            }
            text.push(self.advance_char());
        }
        if text.is_empty() {
            return None;
        }
        let kind = if has_glob {
            NodeKind::Glob { text }
        } else {
            NodeKind::BarewordLiteral { text }
        };
        Some(Node::new(kind, self.span_from(mark)))
    }

    fn parse_identifier(&mut self) -> Str {
        let start = self.offset;
        if matches!(self.peek(), Some(byte) if byte.is_ascii_alphabetic() || byte == b'_') {
            self.advance();
            while matches!(self.peek(), Some(byte) if is_word_byte(byte)) {
                self.advance();
            }
        }
        Str::from(&self.src[start..self.offset])
    }
}

fn leading_blank_len(line: &str) -> usize {
    line.bytes().take_while(|byte| *byte == b' ' || *byte == b'\t').count()
}

fn assemble_heredoc_body(lines: &[Str], strip_tabs: bool, deindent: bool) -> Str {
    let mut body = Str::new();
    if deindent {
        // Strip the shortest leading blank run shared by all non-empty
        // lines, uniformly.
        let indent = lines
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| leading_blank_len(line))
            .min()
            .unwrap_or(0);
        for line in lines {
            body.push_str(&line[indent.min(leading_blank_len(line))..]);
            body.push('\n');
        }
    } else if strip_tabs {
        for line in lines {
            body.push_str(line.trim_start_matches('\t'));
            body.push('\n');
        }
    } else {
        for line in lines {
            body.push_str(line);
            body.push('\n');
        }
    }
    body
}

fn is_word_byte(byte: u8) -> bool { byte.is_ascii_alphanumeric() || byte == b'_' }

fn is_special_variable(byte: u8) -> bool {
    matches!(byte, b'?' | b'$' | b'*' | b'#' | b'!' | b'0'..=b'9')
}

fn is_blank_or_separator(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b';' | b'|' | b'&' | b'<' | b'>' | b')')
}

fn is_bareword_start(byte: u8) -> bool { !is_bareword_terminator(byte) && byte != b'#' }

fn is_bareword_terminator(byte: u8) -> bool {
    matches!(
        byte,
        b' ' | b'\t'
            | b'\n'
            | b';'
            | b'|'
            | b'&'
            | b'<'
            | b'>'
            | b'('
            | b')'
            | b'{'
            | b'}'
            | b'\''
            | b'"'
            | b'$'
            | b']'
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Node, NodeKind};

    fn parse(source: &str) -> Node { NativeParser::new(source).parse() }

    fn toplevel_entries(node: &Node) -> &[Node] {
        match node.kind() {
            NodeKind::Execute { command, .. } => match command.kind() {
                NodeKind::Sequence { entries } => entries,
                other => panic!("expected a sequence, found {:?}", other),
            },
            other => panic!("expected the toplevel execute, found {:?}", other),
        }
    }

    #[test]
    fn single_command_is_a_cast() {
        let tree = parse("echo hello world");
        let entries = toplevel_entries(&tree);
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].kind(), NodeKind::CastToCommand { .. }));
        assert!(!tree.is_syntax_error());
    }

    #[test]
    fn pipes_nest_to_the_right() {
        let tree = parse("a | b | c");
        let entries = toplevel_entries(&tree);
        match entries[0].kind() {
            NodeKind::Pipe { right, .. } => {
                assert!(matches!(right.kind(), NodeKind::Pipe { .. }));
            }
            other => panic!("expected a pipe, found {:?}", other),
        }
    }

    #[test]
    fn logical_chain_binds_tighter_than_or() {
        let tree = parse("a && b || c");
        let entries = toplevel_entries(&tree);
        match entries[0].kind() {
            NodeKind::Or { left, .. } => {
                assert!(matches!(left.kind(), NodeKind::And { .. }));
            }
            other => panic!("expected an or, found {:?}", other),
        }
    }

    #[test]
    fn background_wraps_the_entry() {
        let tree = parse("sleep 10 &");
        let entries = toplevel_entries(&tree);
        assert!(matches!(entries[0].kind(), NodeKind::Background { .. }));
    }

    #[test]
    fn if_with_else_fills_the_false_branch() {
        let tree = parse("if (test 1) { echo a } else { echo b }");
        let entries = toplevel_entries(&tree);
        match entries[0].kind() {
            NodeKind::IfCond { condition, true_branch, false_branch, .. } => {
                assert!(matches!(condition.kind(), NodeKind::Execute { .. }));
                assert!(true_branch.is_some());
                assert!(false_branch.is_some());
            }
            other => panic!("expected an if, found {:?}", other),
        }
    }

    #[test]
    fn for_loop_carries_its_variable() {
        let tree = parse("for x in 1 2 3 { echo $x }");
        let entries = toplevel_entries(&tree);
        match entries[0].kind() {
            NodeKind::ForLoop { variable, iterated_expression, block, .. } => {
                assert_eq!(variable.as_ref().unwrap().name, "x");
                assert!(iterated_expression.is_some());
                assert!(block.is_some());
            }
            other => panic!("expected a for loop, found {:?}", other),
        }
    }

    #[test]
    fn loop_is_an_infinite_for() {
        let tree = parse("loop { echo y }");
        let entries = toplevel_entries(&tree);
        match entries[0].kind() {
            NodeKind::ForLoop { iterated_expression, .. } => {
                assert!(iterated_expression.is_none());
            }
            other => panic!("expected a loop, found {:?}", other),
        }
    }

    #[test]
    fn variables_take_slices() {
        let tree = parse("echo $x[1]");
        let printed = tree.to_string();
        assert!(printed.contains("$x[1]"), "printed: {}", printed);
    }

    #[test]
    fn brace_expansion_with_range() {
        let tree = parse("echo {1..5}");
        let printed = tree.to_string();
        assert!(printed.contains("{1..5}"), "printed: {}", printed);
    }

    #[test]
    fn unterminated_string_is_continuable() {
        let tree = parse("echo 'oops");
        assert!(tree.is_syntax_error());
        assert!(tree.is_continuable_error());
    }

    #[test]
    fn unterminated_heredoc_marks_the_tree() {
        let tree = parse("cat <<END\nno terminator here");
        assert!(tree.is_syntax_error());
        assert!(tree.is_continuable_error());
    }

    #[test]
    fn heredoc_contents_resolve_after_newline() {
        let tree = parse("cat <<END\nhello\nEND\n");
        assert!(!tree.is_syntax_error());
    }

    #[test]
    fn comments_do_not_consume_the_next_line ()
    {
        let tree = parse("# a comment\necho ok");
        let entries = toplevel_entries(&tree);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn depth_guard_reports_instead_of_overflowing() {
        let mut source = Str::new();
        for _ in 0..2000 {
            source.push_str("$(");
        }
        source.push_str("echo x");
        for _ in 0..2000 {
            source.push(')');
        }
        let tree = parse(&source);
        assert!(tree.is_syntax_error());
    }

    #[test]
    fn roundtrip_preserves_simple_commands() {
        for source in &["echo a b c", "a | b", "a && b || c", "echo $x[1]", "echo {a,b,c}"] {
            let first = parse(source);
            let printed = first.to_string();
            let second = parse(&printed);
            assert_eq!(printed, second.to_string(), "source: {}", source);
        }
    }
}
