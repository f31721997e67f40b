//! The token-driven POSIX parser. It follows the 1003.1 grammar and
//! desugars every POSIX-only construct onto the shared AST: loops become
//! infinite for-loops with a branching head, parameter operators become
//! immediate-function calls, and command substitutions become
//! capture-stdout executions.

pub mod lexer;

use self::lexer::{
    Operator, PosixLexer, Reserved, ResolvedExpansion, Token, TokenKind,
};
use crate::{
    ast::{
        ContinuationKind, Enclosure, HeredocNode, JuxtapositionMode, MatchEntry, MatchPatterns,
        NameWithPosition, Node, NodeKind, PathRedirection, VariableDeclaration,
    },
    position::Position,
    types::Str,
};
use std::{cell::RefCell, rc::Rc};

struct PendingHeredoc {
    interpolate: bool,
    contents:    Rc<RefCell<Option<Node>>>,
}

pub struct PosixParser {
    tokens: Vec<Token>,
    index:  usize,
    pending_heredocs: Vec<PendingHeredoc>,
    saw_unterminated_heredoc: bool,
}

impl PosixParser {
    pub fn new(src: &str) -> Self {
        PosixParser {
            tokens: PosixLexer::lex(src, true),
            index: 0,
            pending_heredocs: Vec::new(),
            saw_unterminated_heredoc: false,
        }
    }

    pub fn parse(mut self) -> Node {
        let start = self.here();
        let mut entries = Vec::new();
        loop {
            self.skip_linebreaks();
            if self.at_eof() {
                break;
            }
            let before = self.index;
            match self.parse_list_entry() {
                Some(entry) => entries.push(entry),
                None => {
                    if self.index == before {
                        let position = self.here();
                        self.index += 1;
                        entries.push(Node::syntax_error("unexpected token", position));
                    }
                }
            }
        }
        let position = start.with_end(&self.here());
        let sequence = Node::new(NodeKind::Sequence { entries }, position);
        let mut toplevel = Node::new(
            NodeKind::Execute { command: Box::new(sequence), capture_stdout: false },
            position,
        );
        if !self.pending_heredocs.is_empty() || self.saw_unterminated_heredoc {
            toplevel.set_syntax_error(Node::continuable_syntax_error(
                "here-document has no terminator",
                position,
            ));
        }
        toplevel
    }

    // ---- token cursor -----------------------------------------------------

    fn peek(&self) -> &Token { &self.tokens[self.index.min(self.tokens.len() - 1)] }

    fn here(&self) -> Position { self.peek().position }

    fn at_eof(&self) -> bool { self.peek().kind == TokenKind::Eof }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.index.min(self.tokens.len() - 1)].clone();
        if self.index < self.tokens.len() {
            self.index += 1;
        }
        token
    }

    fn eat_operator(&mut self, operator: Operator) -> bool {
        if self.peek().is_operator(operator) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_reserved(&mut self, reserved: Reserved) -> bool {
        if self.peek().is_reserved(reserved) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Skips newline tokens; heredoc bodies surface here and resolve the
    /// oldest pending entry.
    fn skip_linebreaks(&mut self) {
        loop {
            match self.peek().kind {
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::HeredocContents => {
                    let token = self.advance();
                    self.fill_heredoc(token);
                }
                _ => break,
            }
        }
    }

    fn fill_heredoc(&mut self, token: Token) {
        if self.pending_heredocs.is_empty() {
            return;
        }
        let pending = self.pending_heredocs.remove(0);
        let mut body = token.value;
        let unterminated = body.starts_with('\0');
        if unterminated {
            body.remove(0);
            self.saw_unterminated_heredoc = true;
        }
        let node = if unterminated {
            Node::syntax_error("here-document has no terminator", token.position)
        } else if pending.interpolate {
            let inner = compose_word(&body, token.position, WordContext::HeredocBody);
            Node::new(
                NodeKind::DoubleQuotedString { inner: Some(Box::new(inner)) },
                token.position,
            )
        } else {
            Node::new(
                NodeKind::StringLiteral { text: body, enclosure: Enclosure::None },
                token.position,
            )
        };
        *pending.contents.borrow_mut() = Some(node);
    }

    // ---- grammar ----------------------------------------------------------

    fn parse_list_entry(&mut self) -> Option<Node> {
        let start = self.here();
        let node = self.parse_and_or()?;
        // A trailing '&' sends the whole and-or chain to the background.
        if self.eat_operator(Operator::Amp) {
            let position = start.with_end(&self.here());
            return Some(Node::new(
                NodeKind::Background { command: Box::new(node) },
                position,
            ));
        }
        self.eat_operator(Operator::Semi);
        Some(node)
    }

    fn parse_and_or(&mut self) -> Option<Node> {
        let start = self.here();
        let mut left = self.parse_pipeline()?;
        loop {
            let and = self.peek().is_operator(Operator::AndIf);
            let or = self.peek().is_operator(Operator::OrIf);
            if !and && !or {
                break;
            }
            self.advance();
            self.skip_linebreaks();
            let right = match self.parse_pipeline() {
                Some(right) => right,
                None => Node::continuable_syntax_error(
                    "expected a pipeline after the logical operator",
                    self.here(),
                ),
            };
            let position = start.with_end(&self.here());
            let kind = if and {
                NodeKind::And { left: Box::new(left), right: Box::new(right) }
            } else {
                NodeKind::Or { left: Box::new(left), right: Box::new(right) }
            };
            left = Node::new(kind, position);
        }
        Some(left)
    }

    fn parse_pipeline(&mut self) -> Option<Node> {
        let start = self.here();
        let negated = self.eat_reserved(Reserved::Bang);

        let mut commands = vec![self.parse_command()?];
        while self.eat_operator(Operator::Pipe) {
            self.skip_linebreaks();
            match self.parse_command() {
                Some(command) => commands.push(command),
                None => {
                    commands.push(Node::continuable_syntax_error(
                        "expected a command after '|'",
                        self.here(),
                    ));
                    break;
                }
            }
        }

        let mut node = commands.pop().unwrap();
        while let Some(left) = commands.pop() {
            let position = start.with_end(&self.here());
            node = Node::new(
                NodeKind::Pipe { left: Box::new(left), right: Box::new(node) },
                position,
            );
        }

        if negated {
            node = self.negate(node, start);
        }
        Some(node)
    }

    /// `! P` branches on P's exit code and flips it.
    fn negate(&mut self, node: Node, start: Position) -> Node {
        let position = start.with_end(&self.here());
        let condition = Node::new(
            NodeKind::Execute { command: Box::new(node), capture_stdout: false },
            position,
        );
        let command_of = |name: &str| {
            let word = Node::new(
                NodeKind::BarewordLiteral { text: name.into() },
                position,
            );
            let cast = Node::new(NodeKind::CastToCommand { inner: Box::new(word) }, position);
            Node::new(NodeKind::Execute { command: Box::new(cast), capture_stdout: false }, position)
        };
        Node::new(
            NodeKind::IfCond {
                condition: Box::new(condition),
                true_branch: Some(Box::new(command_of("false"))),
                false_branch: Some(Box::new(command_of("true"))),
                else_position: None,
            },
            position,
        )
    }

    fn parse_command(&mut self) -> Option<Node> {
        match self.peek().kind.clone() {
            TokenKind::Reserved(Reserved::If) => Some(self.parse_if_clause()),
            TokenKind::Reserved(Reserved::While) => Some(self.parse_while_clause(false)),
            TokenKind::Reserved(Reserved::Until) => Some(self.parse_while_clause(true)),
            TokenKind::Reserved(Reserved::For) => Some(self.parse_for_clause()),
            TokenKind::Reserved(Reserved::Case) => Some(self.parse_case_clause()),
            TokenKind::Reserved(Reserved::Lbrace) => Some(self.parse_brace_group()),
            TokenKind::Operator(Operator::Lparen) => Some(self.parse_subshell()),
            TokenKind::VariableName => self.parse_function_definition(),
            TokenKind::Word
            | TokenKind::AssignmentWord
            | TokenKind::ListAssignmentWord
            | TokenKind::IoNumber
            | TokenKind::Operator(Operator::Less)
            | TokenKind::Operator(Operator::Great)
            | TokenKind::Operator(Operator::DGreat)
            | TokenKind::Operator(Operator::DLess)
            | TokenKind::Operator(Operator::DLessDash)
            | TokenKind::Operator(Operator::LessAnd)
            | TokenKind::Operator(Operator::GreatAnd)
            | TokenKind::Operator(Operator::LessGreat)
            | TokenKind::Operator(Operator::AndGreat) => self.parse_simple_command(),
            _ => None,
        }
    }

    /// A compound command may be followed by redirections applying to the
    /// whole construct.
    fn attach_redirections(&mut self, node: Node, start: Position) -> Node {
        let mut redirections = Vec::new();
        while let Some(redirection) = self.parse_io_redirect() {
            redirections.push(redirection);
        }
        if redirections.is_empty() {
            return node;
        }
        let mut joined = node;
        for redirection in redirections.into_iter().rev() {
            let position = start.with_end(&self.here());
            joined = Node::new(
                NodeKind::Join { left: Box::new(redirection), right: Box::new(joined) },
                position,
            );
        }
        joined
    }

    /// Terms up to (not including) any of the given closing reserved
    /// words, wrapped for execution.
    fn parse_compound_list(&mut self, closers: &[Reserved]) -> Node {
        let start = self.here();
        let mut entries = Vec::new();
        loop {
            self.skip_linebreaks();
            if self.at_eof() || closers.iter().any(|closer| self.peek().is_reserved(*closer)) {
                break;
            }
            if self.peek().is_operator(Operator::Rparen)
                || self.peek().is_operator(Operator::DSemi)
            {
                break;
            }
            let before = self.index;
            match self.parse_list_entry() {
                Some(entry) => entries.push(entry),
                None => {
                    if self.index == before {
                        break;
                    }
                }
            }
        }
        let position = start.with_end(&self.here());
        let sequence = Node::new(NodeKind::Sequence { entries }, position);
        Node::new(
            NodeKind::Execute { command: Box::new(sequence), capture_stdout: false },
            position,
        )
    }

    fn parse_if_clause(&mut self) -> Node {
        let start = self.here();
        self.advance();
        let condition = self.parse_compound_list(&[Reserved::Then]);
        if !self.eat_reserved(Reserved::Then) {
            return Node::continuable_syntax_error("expected 'then'", start.with_end(&self.here()));
        }
        let true_branch = self.parse_compound_list(&[Reserved::Elif, Reserved::Else, Reserved::Fi]);

        let false_branch = if self.peek().is_reserved(Reserved::Elif) {
            // `elif` restarts the whole clause; the parse consumes `fi`.
            let nested = self.parse_elif_chain();
            Some(Box::new(nested))
        } else if self.eat_reserved(Reserved::Else) {
            let branch = self.parse_compound_list(&[Reserved::Fi]);
            if !self.eat_reserved(Reserved::Fi) {
                return Node::continuable_syntax_error(
                    "expected 'fi'",
                    start.with_end(&self.here()),
                );
            }
            Some(Box::new(branch))
        } else {
            if !self.eat_reserved(Reserved::Fi) {
                return Node::continuable_syntax_error(
                    "expected 'fi'",
                    start.with_end(&self.here()),
                );
            }
            None
        };

        let position = start.with_end(&self.here());
        Node::new(
            NodeKind::IfCond {
                condition: Box::new(condition),
                true_branch: Some(Box::new(true_branch)),
                false_branch,
                else_position: None,
            },
            position,
        )
    }

    fn parse_elif_chain(&mut self) -> Node {
        let start = self.here();
        self.advance();
        let condition = self.parse_compound_list(&[Reserved::Then]);
        if !self.eat_reserved(Reserved::Then) {
            return Node::continuable_syntax_error("expected 'then'", start.with_end(&self.here()));
        }
        let true_branch = self.parse_compound_list(&[Reserved::Elif, Reserved::Else, Reserved::Fi]);

        let false_branch = if self.peek().is_reserved(Reserved::Elif) {
            Some(Box::new(self.parse_elif_chain()))
        } else if self.eat_reserved(Reserved::Else) {
            let branch = self.parse_compound_list(&[Reserved::Fi]);
            self.eat_reserved(Reserved::Fi);
            Some(Box::new(branch))
        } else {
            self.eat_reserved(Reserved::Fi);
            None
        };

        let position = start.with_end(&self.here());
        Node::new(
            NodeKind::IfCond {
                condition: Box::new(condition),
                true_branch: Some(Box::new(true_branch)),
                false_branch,
                else_position: None,
            },
            position,
        )
    }

    /// `while`/`until` desugar onto the infinite loop with a branching
    /// head: `while C; B` is `loop { if C { B } else { break } }`.
    fn parse_while_clause(&mut self, inverted: bool) -> Node {
        let start = self.here();
        self.advance();
        let condition = self.parse_compound_list(&[Reserved::Do]);
        if !self.eat_reserved(Reserved::Do) {
            return Node::continuable_syntax_error("expected 'do'", start.with_end(&self.here()));
        }
        let body = self.parse_compound_list(&[Reserved::Done]);
        if !self.eat_reserved(Reserved::Done) {
            return Node::continuable_syntax_error("expected 'done'", start.with_end(&self.here()));
        }
        let position = start.with_end(&self.here());

        let break_block = {
            let control = Node::new(
                NodeKind::ContinuationControl { kind: ContinuationKind::Break },
                position,
            );
            let sequence = Node::new(NodeKind::Sequence { entries: vec![control] }, position);
            Node::new(
                NodeKind::Execute { command: Box::new(sequence), capture_stdout: false },
                position,
            )
        };

        let (true_branch, false_branch) = if inverted {
            (break_block, body)
        } else {
            (body, break_block)
        };

        let head = Node::new(
            NodeKind::IfCond {
                condition: Box::new(condition),
                true_branch: Some(Box::new(true_branch)),
                false_branch: Some(Box::new(false_branch)),
                else_position: None,
            },
            position,
        );
        let block = Node::new(
            NodeKind::Execute {
                command: Box::new(Node::new(
                    NodeKind::Sequence { entries: vec![head] },
                    position,
                )),
                capture_stdout: false,
            },
            position,
        );
        Node::new(
            NodeKind::ForLoop {
                variable: None,
                index_variable: None,
                iterated_expression: None,
                block: Some(Box::new(block)),
            },
            position,
        )
    }

    fn parse_for_clause(&mut self) -> Node {
        let start = self.here();
        self.advance();
        let name_token = self.advance();
        if !matches!(name_token.kind, TokenKind::VariableName | TokenKind::Word) {
            return Node::syntax_error(
                "expected a variable name after 'for'",
                start.with_end(&self.here()),
            );
        }
        let variable = NameWithPosition {
            name:     name_token.value.clone(),
            position: name_token.position,
        };

        self.skip_linebreaks();
        let iterated = if self.eat_reserved(Reserved::In) {
            let words_start = self.here();
            let mut words = Vec::new();
            while matches!(self.peek().kind, TokenKind::Word) {
                let token = self.advance();
                words.push(word_to_node(&token));
            }
            self.eat_operator(Operator::Semi);
            let position = words_start.with_end(&self.here());
            let list = Node::new(NodeKind::ListConcatenate { entries: words }, position);
            // The word list re-expands so that globs and embedded lists
            // spread before iteration.
            Node::new(
                NodeKind::ImmediateExpression {
                    name:      NameWithPosition { name: "reexpand".into(), position },
                    arguments: vec![list],
                },
                position,
            )
        } else {
            // `for NAME do ...` iterates the positional parameters.
            self.eat_operator(Operator::Semi);
            Node::new(
                NodeKind::SpecialVariable { name: '*', slice: None },
                start,
            )
        };

        self.skip_linebreaks();
        if !self.eat_reserved(Reserved::Do) {
            return Node::continuable_syntax_error("expected 'do'", start.with_end(&self.here()));
        }
        let body = self.parse_compound_list(&[Reserved::Done]);
        if !self.eat_reserved(Reserved::Done) {
            return Node::continuable_syntax_error("expected 'done'", start.with_end(&self.here()));
        }

        let position = start.with_end(&self.here());
        Node::new(
            NodeKind::ForLoop {
                variable: Some(variable),
                index_variable: None,
                iterated_expression: Some(Box::new(iterated)),
                block: Some(Box::new(body)),
            },
            position,
        )
    }

    fn parse_case_clause(&mut self) -> Node {
        let start = self.here();
        self.advance();
        let subject_token = self.advance();
        if subject_token.kind != TokenKind::Word {
            return Node::syntax_error(
                "expected a word after 'case'",
                start.with_end(&self.here()),
            );
        }
        let subject = word_to_node(&subject_token);

        self.skip_linebreaks();
        if !self.eat_reserved(Reserved::In) {
            return Node::continuable_syntax_error(
                "expected 'in' after the 'case' subject",
                start.with_end(&self.here()),
            );
        }

        let mut entries = Vec::new();
        loop {
            self.skip_linebreaks();
            if self.eat_reserved(Reserved::Esac) || self.at_eof() {
                break;
            }
            self.eat_operator(Operator::Lparen);

            let mut patterns = Vec::new();
            loop {
                let token = self.advance();
                if token.kind != TokenKind::Word && !matches!(token.kind, TokenKind::Reserved(_)) {
                    return Node::syntax_error(
                        "expected a pattern in 'case'",
                        start.with_end(&self.here()),
                    );
                }
                patterns.push(pattern_to_node(&token));
                if !self.eat_operator(Operator::Pipe) {
                    break;
                }
            }
            if !self.eat_operator(Operator::Rparen) {
                return Node::continuable_syntax_error(
                    "expected ')' after the 'case' pattern",
                    start.with_end(&self.here()),
                );
            }

            let body =
                self.parse_compound_list(&[Reserved::Esac]);
            entries.push(MatchEntry {
                patterns:    MatchPatterns::Glob(patterns),
                match_names: Vec::new(),
                body:        Some(Box::new(body)),
            });

            if !self.eat_operator(Operator::DSemi) {
                self.skip_linebreaks();
                if self.eat_reserved(Reserved::Esac) {
                    break;
                }
                return Node::continuable_syntax_error(
                    "expected ';;' after the 'case' body",
                    start.with_end(&self.here()),
                );
            }
        }

        let position = start.with_end(&self.here());
        Node::new(
            NodeKind::MatchExpr { subject: Box::new(subject), subject_name: None, entries },
            position,
        )
    }

    fn parse_brace_group(&mut self) -> Node {
        let start = self.here();
        self.advance();
        let body = self.parse_compound_list(&[Reserved::Rbrace]);
        if !self.eat_reserved(Reserved::Rbrace) {
            return Node::continuable_syntax_error("expected '}'", start.with_end(&self.here()));
        }
        self.attach_redirections(body, start)
    }

    fn parse_subshell(&mut self) -> Node {
        let start = self.here();
        self.advance();
        let body = self.parse_compound_list(&[]);
        if !self.eat_operator(Operator::Rparen) {
            return Node::continuable_syntax_error("expected ')'", start.with_end(&self.here()));
        }
        let position = start.with_end(&self.here());
        let node = Node::new(NodeKind::Subshell { block: Some(Box::new(body)) }, position);
        self.attach_redirections(node, start)
    }

    fn parse_function_definition(&mut self) -> Option<Node> {
        let start = self.here();
        let name_token = self.advance();
        if !self.eat_operator(Operator::Lparen) || !self.eat_operator(Operator::Rparen) {
            return Some(Node::syntax_error(
                "expected '()' in the function definition",
                start.with_end(&self.here()),
            ));
        }
        self.skip_linebreaks();
        let body = match self.parse_command() {
            Some(body) => body,
            None => {
                return Some(Node::continuable_syntax_error(
                    "expected a function body",
                    start.with_end(&self.here()),
                ))
            }
        };
        let position = start.with_end(&self.here());
        Some(Node::new(
            NodeKind::FunctionDeclaration {
                name:      NameWithPosition {
                    name:     name_token.value.clone(),
                    position: name_token.position,
                },
                arguments: Vec::new(),
                block:     Some(Box::new(body)),
            },
            position,
        ))
    }

    // ---- simple commands --------------------------------------------------

    fn parse_simple_command(&mut self) -> Option<Node> {
        let start = self.here();
        let mut assignments: Vec<(Token, bool)> = Vec::new();
        let mut words: Vec<Node> = Vec::new();
        let mut redirections: Vec<Node> = Vec::new();
        let mut list_values: Vec<(Token, Vec<Token>)> = Vec::new();

        loop {
            match self.peek().kind.clone() {
                TokenKind::AssignmentWord if words.is_empty() => {
                    let token = self.advance();
                    assignments.push((token, false));
                }
                TokenKind::ListAssignmentWord if words.is_empty() => {
                    let token = self.advance();
                    self.eat_operator(Operator::Lparen);
                    let mut entries = Vec::new();
                    while matches!(self.peek().kind, TokenKind::Word) {
                        entries.push(self.advance());
                    }
                    self.eat_operator(Operator::Rparen);
                    list_values.push((token, entries));
                }
                TokenKind::Word | TokenKind::AssignmentWord | TokenKind::VariableName => {
                    let token = self.advance();
                    words.push(word_to_node(&token));
                }
                TokenKind::IoNumber
                | TokenKind::Operator(Operator::Less)
                | TokenKind::Operator(Operator::Great)
                | TokenKind::Operator(Operator::DGreat)
                | TokenKind::Operator(Operator::DLess)
                | TokenKind::Operator(Operator::DLessDash)
                | TokenKind::Operator(Operator::LessAnd)
                | TokenKind::Operator(Operator::GreatAnd)
                | TokenKind::Operator(Operator::LessGreat)
                | TokenKind::Operator(Operator::AndGreat) => match self.parse_io_redirect() {
                    Some(redirection) => redirections.push(redirection),
                    None => break,
                },
                _ => break,
            }
        }

        if words.is_empty() && assignments.is_empty() && list_values.is_empty()
            && redirections.is_empty()
        {
            return None;
        }

        let position = start.with_end(&self.here());

        // Assignments with no command word declare variables; with a
        // command word they travel through `run_with_env`.
        if words.is_empty() {
            let mut variables = Vec::new();
            for (token, _) in &assignments {
                let (name, value) = split_assignment(token);
                variables.push(VariableDeclaration {
                    name:  Box::new(name),
                    value: Box::new(value),
                });
            }
            for (token, entries) in &list_values {
                let eq = token.value.find('=').unwrap_or(token.value.len() - 1);
                let name = Node::new(
                    NodeKind::BarewordLiteral { text: Str::from(&token.value[..eq]) },
                    token.position,
                );
                let list = Node::new(
                    NodeKind::ListConcatenate {
                        entries: entries.iter().map(word_to_node).collect(),
                    },
                    token.position,
                );
                let cast = Node::new(
                    NodeKind::CastToList { inner: Some(Box::new(list)) },
                    token.position,
                );
                variables.push(VariableDeclaration { name: Box::new(name), value: Box::new(cast) });
            }
            let node = if variables.is_empty() {
                // Redirections only.
                let mut node = Node::new(
                    NodeKind::Sequence { entries: Vec::new() },
                    position,
                );
                node = Node::new(
                    NodeKind::CastToCommand { inner: Box::new(node) },
                    position,
                );
                node
            } else {
                Node::new(NodeKind::VariableDeclarations { variables }, position)
            };
            let mut node = node;
            for redirection in redirections.into_iter().rev() {
                node = Node::new(
                    NodeKind::Join { left: Box::new(redirection), right: Box::new(node) },
                    position,
                );
            }
            return Some(node);
        }

        let mut argv_entries = Vec::new();
        if !assignments.is_empty() {
            argv_entries.push(Node::new(
                NodeKind::BarewordLiteral { text: "run_with_env".into() },
                position,
            ));
            for (token, _) in &assignments {
                let (_, value) = split_assignment(token);
                let eq = token.value.find('=').unwrap();
                let prefix = Node::new(
                    NodeKind::BarewordLiteral {
                        text: format!("-e{}=", &token.value[..eq]),
                    },
                    token.position,
                );
                argv_entries.push(Node::new(
                    NodeKind::Juxtaposition {
                        left:  Box::new(prefix),
                        right: Box::new(value),
                        mode:  JuxtapositionMode::StringExpand,
                    },
                    token.position,
                ));
            }
            argv_entries.push(Node::new(
                NodeKind::BarewordLiteral { text: "--".into() },
                position,
            ));
        }
        argv_entries.extend(words);

        let list = Node::new(NodeKind::ListConcatenate { entries: argv_entries }, position);
        let mut node = Node::new(NodeKind::CastToCommand { inner: Box::new(list) }, position);
        for redirection in redirections.into_iter().rev() {
            node = Node::new(
                NodeKind::Join { left: Box::new(redirection), right: Box::new(node) },
                position,
            );
        }
        Some(node)
    }

    fn parse_io_redirect(&mut self) -> Option<Node> {
        let start = self.here();
        let io_number = if self.peek().kind == TokenKind::IoNumber {
            self.advance().value.parse::<i32>().ok()
        } else {
            None
        };

        let operator = match self.peek().kind {
            TokenKind::Operator(operator) => operator,
            _ => return None,
        };
        match operator {
            Operator::Less
            | Operator::Great
            | Operator::DGreat
            | Operator::LessGreat
            | Operator::LessAnd
            | Operator::GreatAnd
            | Operator::AndGreat
            | Operator::DLess
            | Operator::DLessDash => {}
            _ => return None,
        }
        self.advance();

        let target = self.advance();
        let position = start.with_end(&self.here());
        if target.kind != TokenKind::Word {
            return Some(Node::syntax_error(
                "expected a redirection target",
                position,
            ));
        }

        let node = match operator {
            Operator::Less => Node::new(
                NodeKind::ReadRedirection(PathRedirection {
                    fd:   io_number.unwrap_or(0),
                    path: Box::new(word_to_node(&target)),
                }),
                position,
            ),
            Operator::Great => Node::new(
                NodeKind::WriteRedirection(PathRedirection {
                    fd:   io_number.unwrap_or(1),
                    path: Box::new(word_to_node(&target)),
                }),
                position,
            ),
            Operator::DGreat => Node::new(
                NodeKind::WriteAppendRedirection(PathRedirection {
                    fd:   io_number.unwrap_or(1),
                    path: Box::new(word_to_node(&target)),
                }),
                position,
            ),
            Operator::LessGreat => Node::new(
                NodeKind::ReadWriteRedirection(PathRedirection {
                    fd:   io_number.unwrap_or(0),
                    path: Box::new(word_to_node(&target)),
                }),
                position,
            ),
            Operator::LessAnd | Operator::GreatAnd => {
                let new_fd = io_number.unwrap_or(if operator == Operator::LessAnd { 0 } else { 1 });
                if target.value == "-" {
                    Node::new(NodeKind::CloseFdRedirection { fd: new_fd }, position)
                } else if let Ok(old_fd) = target.value.parse::<i32>() {
                    Node::new(NodeKind::Fd2FdRedirection { old_fd, new_fd }, position)
                } else if operator == Operator::GreatAnd {
                    Node::new(
                        NodeKind::WriteRedirection(PathRedirection {
                            fd:   new_fd,
                            path: Box::new(word_to_node(&target)),
                        }),
                        position,
                    )
                } else {
                    Node::syntax_error("expected a file descriptor after '<&'", position)
                }
            }
            Operator::AndGreat => {
                // `&> file` sends both stdout and stderr to the file.
                let write = Node::new(
                    NodeKind::WriteRedirection(PathRedirection {
                        fd:   1,
                        path: Box::new(word_to_node(&target)),
                    }),
                    position,
                );
                let dup = Node::new(
                    NodeKind::Fd2FdRedirection { old_fd: 1, new_fd: 2 },
                    position,
                );
                Node::new(
                    NodeKind::Join { left: Box::new(write), right: Box::new(dup) },
                    position,
                )
            }
            Operator::DLess | Operator::DLessDash => {
                let raw = target.value.as_str();
                let interpolate = !(raw.contains('\'') || raw.contains('"'));
                let key = raw.trim_matches(|ch| ch == '\'' || ch == '"');
                let contents = Rc::new(RefCell::new(None));
                self.pending_heredocs.push(PendingHeredoc {
                    interpolate,
                    contents: contents.clone(),
                });
                Node::new(
                    NodeKind::Heredoc(HeredocNode {
                        end: key.into(),
                        allows_interpolation: interpolate,
                        deindent: false,
                        target_fd: io_number.unwrap_or(0),
                        evaluates_to_string: false,
                        contents,
                    }),
                    position,
                )
            }
            _ => unreachable!("filtered above"),
        };
        Some(node)
    }
}

// ---- word construction ----------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum WordContext {
    /// A regular word: quotes structure it, globs expand.
    Word,
    /// A heredoc body: quotes are literal, expansions still apply.
    HeredocBody,
}

fn split_assignment(token: &Token) -> (Node, Node) {
    let eq = token.value.find('=').unwrap_or(token.value.len());
    let name = Node::new(
        NodeKind::BarewordLiteral { text: Str::from(&token.value[..eq]) },
        token.position,
    );
    let value_text = &token.value[eq + 1..];
    let value = word_text_to_node(value_text, token.position);
    (name, value)
}

/// Builds the AST for a word token using its resolved expansions.
pub fn word_to_node(token: &Token) -> Node {
    compose_word_with(
        &token.value,
        token.position,
        WordContext::Word,
        token.resolved_expansions.clone(),
    )
}

fn pattern_to_node(token: &Token) -> Node {
    // Case patterns are matched, not expanded: keep the raw text as a glob.
    let text = token.value.trim_matches(|ch| ch == '\'' || ch == '"');
    Node::new(NodeKind::Glob { text: text.into() }, token.position)
}

fn word_text_to_node(text: &str, position: Position) -> Node {
    compose_word(text, position, WordContext::Word)
}

fn compose_word(text: &str, position: Position, context: WordContext) -> Node {
    let resolved = lexer::resolve_annotations(lexer::annotate(text), true);
    compose_word_with(text, position, context, resolved)
}

fn compose_word_with(
    text: &str,
    position: Position,
    context: WordContext,
    resolved: Vec<ResolvedExpansion>,
) -> Node {
    let bytes = text.as_bytes();
    let mut parts: Vec<Node> = Vec::new();
    let mut double_parts: Vec<Node> = Vec::new();
    let mut literal = Str::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0usize;

    let flush_literal =
        |literal: &mut Str, parts: &mut Vec<Node>, in_double: bool, quoted_empty_ok: bool| {
            if literal.is_empty() && !quoted_empty_ok {
                return;
            }
            let text = std::mem::take(literal);
            let node = if !in_double && (text.contains('*') || text.contains('?')) {
                Node::new(NodeKind::Glob { text }, position)
            } else {
                Node::new(
                    NodeKind::StringLiteral {
                        text,
                        enclosure: if in_double {
                            Enclosure::DoubleQuotes
                        } else {
                            Enclosure::None
                        },
                    },
                    position,
                )
            };
            parts.push(node);
        };

    while i < bytes.len() {
        let byte = bytes[i];
        if in_single {
            if byte == b'\'' {
                in_single = false;
                // A quoted segment exists even when empty.
                flush_literal(&mut literal, &mut parts, false, true);
            } else {
                push_char(text, &mut i, &mut literal);
                continue;
            }
            i += 1;
            continue;
        }

        if let Some(expansion) = resolved.iter().find(|candidate| candidate.range().0 == i) {
            let node = expansion_to_node(expansion, position);
            if in_double {
                flush_literal(&mut literal, &mut double_parts, true, false);
                double_parts.push(node);
            } else {
                flush_literal(&mut literal, &mut parts, false, false);
                parts.push(node);
            }
            i = expansion.range().1;
            continue;
        }

        match byte {
            b'\'' if !in_double && context == WordContext::Word => {
                flush_literal(&mut literal, &mut parts, false, false);
                in_single = true;
                i += 1;
            }
            b'"' if context == WordContext::Word => {
                if in_double {
                    flush_literal(&mut literal, &mut double_parts, true, false);
                    let inner = compose_parts(std::mem::take(&mut double_parts), position, true);
                    parts.push(Node::new(
                        NodeKind::DoubleQuotedString { inner: inner.map(Box::new) },
                        position,
                    ));
                    in_double = false;
                } else {
                    flush_literal(&mut literal, &mut parts, false, false);
                    in_double = true;
                }
                i += 1;
            }
            b'\\' => {
                i += 1;
                if i < bytes.len() {
                    push_char(text, &mut i, &mut literal);
                }
            }
            _ => push_char(text, &mut i, &mut literal),
        }
    }
    if in_double {
        flush_literal(&mut literal, &mut double_parts, true, false);
        let inner = compose_parts(std::mem::take(&mut double_parts), position, true);
        parts.push(Node::new(
            NodeKind::DoubleQuotedString { inner: inner.map(Box::new) },
            position,
        ));
    } else {
        flush_literal(&mut literal, &mut parts, false, false);
    }

    compose_parts(parts, position, context == WordContext::HeredocBody)
        .unwrap_or_else(|| {
            Node::new(
                NodeKind::StringLiteral { text: Str::new(), enclosure: Enclosure::None },
                position,
            )
        })
}

fn push_char(text: &str, i: &mut usize, literal: &mut Str) {
    let ch = text[*i..].chars().next().unwrap_or('\0');
    literal.push(ch);
    *i += ch.len_utf8().max(1);
}

/// Glues adjacent parts: string composition inside quotes, word-joining
/// juxtaposition outside.
fn compose_parts(mut parts: Vec<Node>, position: Position, stringy: bool) -> Option<Node> {
    match parts.len() {
        0 => None,
        1 => Some(parts.pop().unwrap()),
        _ => {
            let mut node = parts.pop().unwrap();
            while let Some(left) = parts.pop() {
                let kind = if stringy {
                    NodeKind::StringPartCompose { left: Box::new(left), right: Box::new(node) }
                } else {
                    NodeKind::Juxtaposition {
                        left:  Box::new(left),
                        right: Box::new(node),
                        mode:  JuxtapositionMode::StringExpand,
                    }
                };
                node = Node::new(kind, position);
            }
            Some(node)
        }
    }
}

fn expansion_to_node(expansion: &ResolvedExpansion, position: Position) -> Node {
    match expansion {
        ResolvedExpansion::Parameter { name, immediate: None, .. } => {
            parameter_reference(name, position)
        }
        ResolvedExpansion::Parameter { name, immediate: Some(immediate), word, .. } => {
            let mut arguments = vec![Node::new(
                NodeKind::BarewordLiteral { text: name.clone() },
                position,
            )];
            match *immediate {
                "length_of_variable" => {}
                "remove_prefix" | "remove_suffix" => {
                    // Pattern first, then the value being stripped.
                    arguments.clear();
                    arguments.push(word_text_to_node(word, position));
                    arguments.push(parameter_reference(name, position));
                }
                _ => arguments.push(word_text_to_node(word, position)),
            }
            Node::new(
                NodeKind::ImmediateExpression {
                    name: NameWithPosition { name: (*immediate).into(), position },
                    arguments,
                },
                position,
            )
        }
        ResolvedExpansion::CommandSub { ast, .. } => {
            let command = match ast.kind() {
                NodeKind::Execute { command, .. } => command.clone(),
                _ => Box::new(ast.clone()),
            };
            Node::new(NodeKind::Execute { command, capture_stdout: true }, position)
        }
        ResolvedExpansion::Arithmetic { source, .. } => Node::new(
            NodeKind::ImmediateExpression {
                name:      NameWithPosition { name: "math".into(), position },
                arguments: vec![Node::new(
                    NodeKind::StringLiteral {
                        text:      source.clone(),
                        enclosure: Enclosure::DoubleQuotes,
                    },
                    position,
                )],
            },
            position,
        ),
    }
}

/// `$name` and the special parameters. `$*` joins the positional list
/// with the first IFS byte; `$@` keeps the entries separate.
fn parameter_reference(name: &str, position: Position) -> Node {
    let mut chars = name.chars();
    let (first, rest) = (chars.next().unwrap_or('\0'), chars.next());
    if rest.is_none() {
        match first {
            '@' => {
                return Node::new(NodeKind::SpecialVariable { name: '*', slice: None }, position)
            }
            '*' => {
                let ifs_default = Node::new(
                    NodeKind::ImmediateExpression {
                        name:      NameWithPosition {
                            name: "defined_value_or_default".into(),
                            position,
                        },
                        arguments: vec![
                            Node::new(
                                NodeKind::BarewordLiteral { text: "IFS".into() },
                                position,
                            ),
                            Node::new(
                                NodeKind::StringLiteral {
                                    text:      " ".into(),
                                    enclosure: Enclosure::SingleQuotes,
                                },
                                position,
                            ),
                        ],
                    },
                    position,
                );
                let delim = Node::new(
                    NodeKind::DoubleQuotedString { inner: Some(Box::new(ifs_default)) },
                    position,
                );
                let list =
                    Node::new(NodeKind::SpecialVariable { name: '*', slice: None }, position);
                return Node::new(
                    NodeKind::ImmediateExpression {
                        name:      NameWithPosition { name: "join".into(), position },
                        arguments: vec![delim, list],
                    },
                    position,
                );
            }
            '?' | '$' | '#' | '!' | '0'..='9' => {
                return Node::new(
                    NodeKind::SpecialVariable { name: first, slice: None },
                    position,
                )
            }
            _ => {}
        }
    }
    Node::new(NodeKind::SimpleVariable { name: name.into(), slice: None }, position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Node, NodeKind};

    fn parse(source: &str) -> Node { PosixParser::new(source).parse() }

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
    fn simple_command_parses() {
        let tree = parse("echo hello world");
        let entries = toplevel_entries(&tree);
        assert_eq!(entries.len(), 1);
        assert!(!tree.is_syntax_error());
    }

    #[test]
    fn while_desugars_to_infinite_loop() {
        let tree = parse("while true; do echo x; done");
        let entries = toplevel_entries(&tree);
        match entries[0].kind() {
            NodeKind::ForLoop { iterated_expression, block, .. } => {
                assert!(iterated_expression.is_none());
                assert!(block.is_some());
            }
            other => panic!("expected the desugared loop, found {:?}", other),
        }
    }

    #[test]
    fn until_inverts_the_branches() {
        let tree = parse("until false; do echo x; done");
        let entries = toplevel_entries(&tree);
        let block = match entries[0].kind() {
            NodeKind::ForLoop { block: Some(block), .. } => block,
            other => panic!("expected the desugared loop, found {:?}", other),
        };
        // The head `if` breaks on success for `until`.
        let head_entries = match block.kind() {
            NodeKind::Execute { command, .. } => match command.kind() {
                NodeKind::Sequence { entries } => entries,
                other => panic!("unexpected block shape: {:?}", other),
            },
            other => panic!("unexpected block shape: {:?}", other),
        };
        match head_entries[0].kind() {
            NodeKind::IfCond { true_branch, .. } => {
                let branch = true_branch.as_ref().unwrap();
                let printed = branch.to_string();
                assert!(printed.contains("break"), "printed: {}", printed);
            }
            other => panic!("expected the branching head, found {:?}", other),
        }
    }

    #[test]
    fn for_without_in_iterates_positionals() {
        let tree = parse("for x do echo $x; done");
        let entries = toplevel_entries(&tree);
        match entries[0].kind() {
            NodeKind::ForLoop { iterated_expression: Some(iterated), .. } => {
                assert!(matches!(
                    iterated.kind(),
                    NodeKind::SpecialVariable { name: '*', .. }
                ));
            }
            other => panic!("expected a for loop, found {:?}", other),
        }
    }

    #[test]
    fn assignment_only_becomes_declarations() {
        let tree = parse("FOO=bar");
        let entries = toplevel_entries(&tree);
        assert!(matches!(entries[0].kind(), NodeKind::VariableDeclarations { .. }));
    }

    #[test]
    fn env_prefixed_command_goes_through_run_with_env() {
        let tree = parse("FOO=bar echo x");
        let printed = tree.to_string();
        assert!(printed.contains("run_with_env"), "printed: {}", printed);
        assert!(printed.contains("-eFOO="), "printed: {}", printed);
    }

    #[test]
    fn parameter_default_becomes_an_immediate() {
        let tree = parse("echo ${FOO:-default}");
        let printed = tree.to_string();
        assert!(printed.contains("value_or_default"), "printed: {}", printed);
    }

    #[test]
    fn arithmetic_becomes_math() {
        let tree = parse("echo $((2*3+4))");
        let printed = tree.to_string();
        assert!(printed.contains("math"), "printed: {}", printed);
    }

    #[test]
    fn case_becomes_match() {
        let tree = parse("case $x in a) echo a;; *) echo other;; esac");
        let entries = toplevel_entries(&tree);
        match entries[0].kind() {
            NodeKind::MatchExpr { entries, .. } => assert_eq!(entries.len(), 2),
            other => panic!("expected a match, found {:?}", other),
        }
    }

    #[test]
    fn negation_branches_on_the_exit_code() {
        let tree = parse("! true");
        let entries = toplevel_entries(&tree);
        assert!(matches!(entries[0].kind(), NodeKind::IfCond { .. }));
    }

    #[test]
    fn command_substitution_captures() {
        let tree = parse("echo $(ls)");
        let printed = tree.to_string();
        assert!(printed.contains("$("), "printed: {}", printed);
    }

    #[test]
    fn heredoc_body_fills_in() {
        let tree = parse("cat <<EOF\nhello\nEOF\n");
        assert!(!tree.is_syntax_error());
    }

    #[test]
    fn if_elif_else_chain() {
        let tree = parse("if a; then echo 1; elif b; then echo 2; else echo 3; fi");
        let entries = toplevel_entries(&tree);
        match entries[0].kind() {
            NodeKind::IfCond { false_branch: Some(false_branch), .. } => {
                assert!(matches!(false_branch.kind(), NodeKind::IfCond { .. }));
            }
            other => panic!("expected an if chain, found {:?}", other),
        }
    }

    #[test]
    fn function_definition_declares() {
        let tree = parse("greet() { echo hi; }");
        let entries = toplevel_entries(&tree);
        assert!(matches!(entries[0].kind(), NodeKind::FunctionDeclaration { .. }));
    }

    #[test]
    fn pipeline_members_share_structure() {
        let tree = parse("a | b | c");
        let entries = toplevel_entries(&tree);
        assert!(matches!(entries[0].kind(), NodeKind::Pipe { .. }));
    }
}
