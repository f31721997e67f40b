//! The POSIX lexer: an operator/word tokenizer that annotates words with
//! the expansions they contain, then refines the raw stream with a fixed
//! series of post-passes (reserved words, io numbers, assignment words,
//! expansion resolution, name classification).

use crate::{
    ast::Node,
    position::{LineCol, Position},
    types::Str,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Less,
    Great,
    DGreat,
    DLess,
    DLessDash,
    LessAnd,
    GreatAnd,
    LessGreat,
    AndGreat,
    Pipe,
    OrIf,
    AndIf,
    Amp,
    Semi,
    DSemi,
    Lparen,
    Rparen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reserved {
    If,
    Then,
    Else,
    Elif,
    Fi,
    Do,
    Done,
    Case,
    Esac,
    While,
    Until,
    For,
    In,
    Lbrace,
    Rbrace,
    Bang,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Word,
    AssignmentWord,
    ListAssignmentWord,
    IoNumber,
    VariableName,
    Reserved(Reserved),
    Operator(Operator),
    Newline,
    HeredocContents,
    Eof,
}

/// The `${...}` operator family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterOperator {
    DefaultValue,
    AssignDefault,
    ErrorIfEmpty,
    AlternativeValue,
    DefaultValueUnset,
    AssignDefaultUnset,
    ErrorIfUnset,
    AlternativeValueUnset,
    RemoveSmallestSuffix,
    RemoveLargestSuffix,
    RemoveSmallestPrefix,
    RemoveLargestPrefix,
    Length,
}

/// An expansion recognized while scanning a word, recorded by its byte
/// range within the word's text.
#[derive(Clone, Debug, PartialEq)]
pub enum Expansion {
    Parameter {
        range:    (usize, usize),
        name:     Str,
        operator: Option<ParameterOperator>,
        word:     Str,
        quoted:   bool,
    },
    CommandSub {
        range:  (usize, usize),
        source: Str,
        quoted: bool,
    },
    Arithmetic {
        range:  (usize, usize),
        source: Str,
        quoted: bool,
    },
}

impl Expansion {
    pub fn range(&self) -> (usize, usize) {
        match self {
            Expansion::Parameter { range, .. }
            | Expansion::CommandSub { range, .. }
            | Expansion::Arithmetic { range, .. } => *range,
        }
    }
}

/// An expansion after classification: parameter operators map to their
/// immediate-function names, command substitutions carry their parsed
/// subtree, arithmetic keeps its source text.
#[derive(Clone, Debug)]
pub enum ResolvedExpansion {
    Parameter { range: (usize, usize), name: Str, immediate: Option<&'static str>, word: Str, quoted: bool },
    CommandSub { range: (usize, usize), ast: Node, quoted: bool },
    Arithmetic { range: (usize, usize), source: Str, quoted: bool },
}

impl ResolvedExpansion {
    pub fn range(&self) -> (usize, usize) {
        match self {
            ResolvedExpansion::Parameter { range, .. }
            | ResolvedExpansion::CommandSub { range, .. }
            | ResolvedExpansion::Arithmetic { range, .. } => *range,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub value: Str,
    pub position: Position,
    pub expansions: Vec<Expansion>,
    pub resolved_expansions: Vec<ResolvedExpansion>,
    pub could_be_start_of_a_simple_command: bool,
}

impl Token {
    fn new(kind: TokenKind, value: impl Into<Str>, position: Position) -> Self {
        Token {
            kind,
            value: value.into(),
            position,
            expansions: Vec::new(),
            resolved_expansions: Vec::new(),
            could_be_start_of_a_simple_command: false,
        }
    }

    pub fn is_operator(&self, operator: Operator) -> bool {
        self.kind == TokenKind::Operator(operator)
    }

    pub fn is_reserved(&self, reserved: Reserved) -> bool {
        self.kind == TokenKind::Reserved(reserved)
    }
}

/// The lexer's current reduction: what kind of batch `batch_next` will
/// produce.
#[derive(Clone, Debug, PartialEq)]
pub enum Reduction {
    /// Operators, words, newlines
    Default,
    /// The body lines of a registered here-document
    HeredocContents { key: Str, strip_tabs: bool },
    /// Nothing left
    End,
}

pub struct PosixLexer<'a> {
    src:    &'a str,
    bytes:  &'a [u8],
    offset: usize,
    line:   usize,
    col:    usize,
    reduction: Reduction,
    /// Keys of here-documents whose bodies are still owed, in order.
    owed_heredocs: Vec<(Str, bool)>,
    /// Set when the previous token was `<<`/`<<-`; the next word is a key.
    expecting_heredoc_key: Option<bool>,
    /// A newline ended the last default batch, so owed here-document
    /// bodies may now be read.
    pending_newline_seen: bool,
}

impl<'a> PosixLexer<'a> {
    pub fn new(src: &'a str) -> Self {
        PosixLexer {
            src,
            bytes: src.as_bytes(),
            offset: 0,
            line: 0,
            col: 0,
            reduction: Reduction::Default,
            owed_heredocs: Vec::new(),
            expecting_heredoc_key: None,
            pending_newline_seen: false,
        }
    }

    /// Tokenizes the whole input and applies the post-passes.
    pub fn lex(src: &str, posix_mode: bool) -> Vec<Token> {
        let mut lexer = PosixLexer::new(src);
        let mut tokens = Vec::new();
        loop {
            let batch = lexer.batch_next(None);
            let done = batch.iter().any(|token| token.kind == TokenKind::Eof);
            tokens.extend(batch);
            if done {
                break;
            }
        }
        post_process(&mut tokens, posix_mode);
        tokens
    }

    /// Produces the next batch of tokens under the current (or supplied)
    /// reduction, then advances the reduction.
    pub fn batch_next(&mut self, starting_reduction: Option<Reduction>) -> Vec<Token> {
        if let Some(reduction) = starting_reduction {
            self.reduction = reduction;
        }
        match std::mem::replace(&mut self.reduction, Reduction::Default) {
            Reduction::End => vec![self.eof_token()],
            Reduction::HeredocContents { key, strip_tabs } => {
                let token = self.lex_heredoc_contents(&key, strip_tabs);
                self.reduction = self.next_reduction();
                vec![token]
            }
            Reduction::Default => {
                let batch = self.lex_default_batch();
                self.reduction = self.next_reduction();
                batch
            }
        }
    }

    fn next_reduction(&mut self) -> Reduction {
        if self.offset >= self.bytes.len() && self.owed_heredocs.is_empty() {
            Reduction::End
        } else if let Some((key, strip_tabs)) = self.take_owed_heredoc() {
            Reduction::HeredocContents { key, strip_tabs }
        } else {
            Reduction::Default
        }
    }

    fn take_owed_heredoc(&mut self) -> Option<(Str, bool)> {
        if self.pending_newline_seen {
            if !self.owed_heredocs.is_empty() {
                return Some(self.owed_heredocs.remove(0));
            }
            self.pending_newline_seen = false;
        }
        None
    }

    fn eof_token(&self) -> Token {
        Token::new(TokenKind::Eof, "", self.here_position())
    }

    fn here_position(&self) -> Position {
        Position {
            start_offset: self.offset,
            end_offset:   self.offset,
            start_line:   LineCol { line: self.line, col: self.col },
            end_line:     LineCol { line: self.line, col: self.col },
        }
    }

    // One batch under the default reduction: tokens up to and including
    // the next newline (or EOF).
    fn lex_default_batch(&mut self) -> Vec<Token> {
        let mut batch = Vec::new();
        loop {
            self.skip_blanks_and_line_continuations();
            if self.offset >= self.bytes.len() {
                if batch.is_empty() {
                    batch.push(self.eof_token());
                }
                break;
            }
            let byte = self.bytes[self.offset];
            if byte == b'\n' {
                let mark = self.mark();
                self.advance();
                batch.push(Token::new(TokenKind::Newline, "\n", self.span_from(mark)));
                self.pending_newline_seen = true;
                break;
            }
            if byte == b'#' {
                while !matches!(self.peek(), Some(b'\n') | None) {
                    self.advance();
                }
                continue;
            }
            if let Some(token) = self.lex_operator() {
                batch.push(token);
                continue;
            }
            let token = self.lex_word();
            batch.push(token);
        }
        batch
    }

    fn mark(&self) -> (usize, usize, usize) { (self.offset, self.line, self.col) }

    fn span_from(&self, mark: (usize, usize, usize)) -> Position {
        Position {
            start_offset: mark.0,
            end_offset:   self.offset,
            start_line:   LineCol { line: mark.1, col: mark.2 },
            end_line:     LineCol { line: self.line, col: self.col },
        }
    }

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

    fn skip_blanks_and_line_continuations(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') => {
                    self.advance();
                }
                Some(b'\\') if self.peek_at(1) == Some(b'\n') => {
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn lex_operator(&mut self) -> Option<Token> {
        let mark = self.mark();
        let (operator, len) = match (self.peek()?, self.peek_at(1)) {
            (b'<', Some(b'<')) if self.peek_at(2) == Some(b'-') => (Operator::DLessDash, 3),
            (b'<', Some(b'<')) => (Operator::DLess, 2),
            (b'>', Some(b'>')) => (Operator::DGreat, 2),
            (b'<', Some(b'&')) => (Operator::LessAnd, 2),
            (b'>', Some(b'&')) => (Operator::GreatAnd, 2),
            (b'<', Some(b'>')) => (Operator::LessGreat, 2),
            (b'&', Some(b'>')) => (Operator::AndGreat, 2),
            (b'|', Some(b'|')) => (Operator::OrIf, 2),
            (b'&', Some(b'&')) => (Operator::AndIf, 2),
            (b';', Some(b';')) => (Operator::DSemi, 2),
            (b'<', _) => (Operator::Less, 1),
            (b'>', _) => (Operator::Great, 1),
            (b'|', _) => (Operator::Pipe, 1),
            (b'&', _) => (Operator::Amp, 1),
            (b';', _) => (Operator::Semi, 1),
            (b'(', _) => (Operator::Lparen, 1),
            (b')', _) => (Operator::Rparen, 1),
            _ => return None,
        };
        for _ in 0..len {
            self.advance();
        }
        if matches!(operator, Operator::DLess) {
            self.expecting_heredoc_key = Some(false);
        }
        if matches!(operator, Operator::DLessDash) {
            self.expecting_heredoc_key = Some(true);
        }
        let value = &self.src[mark.0..self.offset];
        Some(Token::new(TokenKind::Operator(operator), value, self.span_from(mark)))
    }

    fn lex_word(&mut self) -> Token {
        let mark = self.mark();
        let word_start = self.offset;
        let mut expansions = Vec::new();
        let mut in_single = false;
        let mut in_double = false;

        while let Some(byte) = self.peek() {
            if in_single {
                self.advance();
                if byte == b'\'' {
                    in_single = false;
                }
                continue;
            }
            match byte {
                b'\\' => {
                    self.advance();
                    self.advance();
                }
                b'\'' if !in_double => {
                    in_single = true;
                    self.advance();
                }
                b'"' => {
                    in_double = !in_double;
                    self.advance();
                }
                b'$' => {
                    let expansion = self.lex_dollar_expansion(word_start, in_double);
                    if let Some(expansion) = expansion {
                        expansions.push(expansion);
                    }
                }
                b'`' => {
                    let expansion = self.lex_backquoted(word_start, in_double);
                    if let Some(expansion) = expansion {
                        expansions.push(expansion);
                    }
                }
                b'\n' if !in_double => break,
                _ if !in_double && is_word_delimiter(byte) => break,
                _ => {
                    self.advance();
                }
            }
        }

        let value = Str::from(&self.src[word_start..self.offset]);
        let mut token = Token::new(TokenKind::Word, value, self.span_from(mark));
        token.expansions = expansions;

        if let Some(strip_tabs) = self.expecting_heredoc_key.take() {
            let key = unquote_key(&token.value);
            self.owed_heredocs.push((key, strip_tabs));
        }
        token
    }

    fn lex_dollar_expansion(&mut self, word_start: usize, quoted: bool) -> Option<Expansion> {
        let start = self.offset - word_start;
        self.advance();
        match self.peek() {
            Some(b'(') if self.peek_at(1) == Some(b'(') => {
                self.advance();
                self.advance();
                let source_start = self.offset;
                let mut depth = 0usize;
                while let Some(byte) = self.peek() {
                    if byte == b'(' {
                        depth += 1;
                    } else if byte == b')' {
                        if depth == 0 && self.peek_at(1) == Some(b')') {
                            break;
                        }
                        depth = depth.saturating_sub(1);
                    }
                    self.advance();
                }
                let source = Str::from(&self.src[source_start..self.offset]);
                self.advance();
                self.advance();
                Some(Expansion::Arithmetic {
                    range: (start, self.offset - word_start),
                    source,
                    quoted,
                })
            }
            Some(b'(') => {
                self.advance();
                let source_start = self.offset;
                let mut depth = 0usize;
                while let Some(byte) = self.peek() {
                    if byte == b'(' {
                        depth += 1;
                    } else if byte == b')' {
                        if depth == 0 {
                            break;
                        }
                        depth -= 1;
                    }
                    self.advance();
                }
                let source = Str::from(&self.src[source_start..self.offset]);
                self.advance();
                Some(Expansion::CommandSub {
                    range: (start, self.offset - word_start),
                    source,
                    quoted,
                })
            }
            Some(b'{') => {
                self.advance();
                self.lex_braced_parameter(word_start, start, quoted)
            }
            Some(byte) if is_name_start(byte) => {
                let name_start = self.offset;
                while matches!(self.peek(), Some(byte) if is_name_byte(byte)) {
                    self.advance();
                }
                Some(Expansion::Parameter {
                    range:    (start, self.offset - word_start),
                    name:     Str::from(&self.src[name_start..self.offset]),
                    operator: None,
                    word:     Str::new(),
                    quoted,
                })
            }
            Some(byte) if is_special_parameter(byte) => {
                self.advance();
                Some(Expansion::Parameter {
                    range:    (start, self.offset - word_start),
                    name:     (byte as char).to_string(),
                    operator: None,
                    word:     Str::new(),
                    quoted,
                })
            }
            _ => None,
        }
    }

    fn lex_braced_parameter(
        &mut self,
        word_start: usize,
        start: usize,
        quoted: bool,
    ) -> Option<Expansion> {
        let mut length_of = false;
        if self.peek() == Some(b'#')
            && matches!(self.peek_at(1), Some(byte) if is_name_byte(byte) || is_special_parameter(byte))
        {
            length_of = true;
            self.advance();
        }

        let name_start = self.offset;
        if matches!(self.peek(), Some(byte) if is_special_parameter(byte)) {
            self.advance();
        } else {
            while matches!(self.peek(), Some(byte) if is_name_byte(byte)) {
                self.advance();
            }
        }
        let name = Str::from(&self.src[name_start..self.offset]);

        let operator = if length_of {
            Some(ParameterOperator::Length)
        } else {
            self.lex_parameter_operator()
        };

        let word_text_start = self.offset;
        let mut depth = 0usize;
        while let Some(byte) = self.peek() {
            if byte == b'{' {
                depth += 1;
            } else if byte == b'}' {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            self.advance();
        }
        let word = Str::from(&self.src[word_text_start..self.offset]);
        self.advance();

        Some(Expansion::Parameter {
            range: (start, self.offset - word_start),
            name,
            operator,
            word,
            quoted,
        })
    }

    fn lex_parameter_operator(&mut self) -> Option<ParameterOperator> {
        let rest = &self.src[self.offset..];
        let (operator, len) = if rest.starts_with(":-") {
            (ParameterOperator::DefaultValue, 2)
        } else if rest.starts_with(":=") {
            (ParameterOperator::AssignDefault, 2)
        } else if rest.starts_with(":?") {
            (ParameterOperator::ErrorIfEmpty, 2)
        } else if rest.starts_with(":+") {
            (ParameterOperator::AlternativeValue, 2)
        } else if rest.starts_with("%%") {
            (ParameterOperator::RemoveLargestSuffix, 2)
        } else if rest.starts_with("##") {
            (ParameterOperator::RemoveLargestPrefix, 2)
        } else if rest.starts_with('-') {
            (ParameterOperator::DefaultValueUnset, 1)
        } else if rest.starts_with('=') {
            (ParameterOperator::AssignDefaultUnset, 1)
        } else if rest.starts_with('?') {
            (ParameterOperator::ErrorIfUnset, 1)
        } else if rest.starts_with('+') {
            (ParameterOperator::AlternativeValueUnset, 1)
        } else if rest.starts_with('%') {
            (ParameterOperator::RemoveSmallestSuffix, 1)
        } else if rest.starts_with('#') {
            (ParameterOperator::RemoveSmallestPrefix, 1)
        } else {
            return None;
        };
        for _ in 0..len {
            self.advance();
        }
        Some(operator)
    }

    fn lex_backquoted(&mut self, word_start: usize, quoted: bool) -> Option<Expansion> {
        let start = self.offset - word_start;
        self.advance();
        let source_start = self.offset;
        while let Some(byte) = self.peek() {
            if byte == b'`' {
                break;
            }
            if byte == b'\\' {
                self.advance();
            }
            self.advance();
        }
        let source = Str::from(&self.src[source_start..self.offset]);
        self.advance();
        Some(Expansion::CommandSub {
            range: (start, self.offset - word_start),
            source: source.replace("\\`", "`"),
            quoted,
        })
    }

    fn lex_heredoc_contents(&mut self, key: &str, strip_tabs: bool) -> Token {
        let mark = self.mark();
        let mut body = Str::new();
        let mut terminated = false;
        while self.offset < self.bytes.len() {
            let line_start = self.offset;
            while !matches!(self.peek(), Some(b'\n') | None) {
                self.advance();
            }
            let line = &self.src[line_start..self.offset];
            self.advance();
            let candidate = if strip_tabs { line.trim_start_matches('\t') } else { line };
            if candidate == key {
                terminated = true;
                break;
            }
            body.push_str(if strip_tabs { candidate } else { line });
            body.push('\n');
        }
        let mut token =
            Token::new(TokenKind::HeredocContents, body, self.span_from(mark));
        if !terminated {
            // The parser turns an unterminated body into a syntax error.
            token.value.insert(0, '\0');
        }
        token
    }
}

/// Scans a bare snippet for expansions, treating the entire text as one
/// word. Used for `${...}` operator words and heredoc bodies, where the
/// usual word delimiters do not apply.
pub(crate) fn annotate(text: &str) -> Vec<Expansion> {
    let mut lexer = PosixLexer::new(text);
    let mut expansions = Vec::new();
    while let Some(byte) = lexer.peek() {
        match byte {
            b'$' => {
                if let Some(expansion) = lexer.lex_dollar_expansion(0, false) {
                    expansions.push(expansion);
                }
            }
            b'`' => {
                if let Some(expansion) = lexer.lex_backquoted(0, false) {
                    expansions.push(expansion);
                }
            }
            b'\\' => {
                lexer.advance();
                lexer.advance();
            }
            _ => {
                lexer.advance();
            }
        }
    }
    expansions
}

/// Resolves freshly scanned annotations the same way the lexer's pass
/// does, for text outside any token.
pub(crate) fn resolve_annotations(
    expansions: Vec<Expansion>,
    posix_mode: bool,
) -> Vec<ResolvedExpansion> {
    expansions
        .into_iter()
        .map(|expansion| match expansion {
            Expansion::Parameter { range, name, operator, word, quoted } => {
                ResolvedExpansion::Parameter {
                    range,
                    name,
                    immediate: operator.map(immediate_for_operator),
                    word,
                    quoted,
                }
            }
            Expansion::CommandSub { range, source, quoted } => ResolvedExpansion::CommandSub {
                range,
                ast: crate::parser::parse(&source, posix_mode),
                quoted,
            },
            Expansion::Arithmetic { range, source, quoted } => {
                ResolvedExpansion::Arithmetic { range, source, quoted }
            }
        })
        .collect()
}

fn unquote_key(raw: &str) -> Str {
    let trimmed = raw.trim_matches(|ch| ch == '\'' || ch == '"');
    Str::from(trimmed)
}

fn is_word_delimiter(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'<' | b'>' | b'|' | b'&' | b';' | b'(' | b')')
}

fn is_name_start(byte: u8) -> bool { byte.is_ascii_alphabetic() || byte == b'_' }

fn is_name_byte(byte: u8) -> bool { byte.is_ascii_alphanumeric() || byte == b'_' }

fn is_special_parameter(byte: u8) -> bool {
    matches!(byte, b'?' | b'$' | b'*' | b'@' | b'#' | b'!' | b'0'..=b'9')
}

fn is_valid_name(text: &str) -> bool {
    let mut bytes = text.bytes();
    match bytes.next() {
        Some(byte) if is_name_start(byte) => bytes.all(is_name_byte),
        _ => false,
    }
}

/// The eight ordered post-passes over the raw token stream.
pub fn post_process(tokens: &mut Vec<Token>, posix_mode: bool) {
    merge_consecutive_newlines(tokens);
    detect_reserved_words(tokens);
    classify_io_numbers(tokens);
    mark_command_starts(tokens);
    detect_assignment_words(tokens);
    resolve_expansions(tokens, posix_mode);
    classify_for_variables(tokens);
    classify_function_names(tokens);
}

fn merge_consecutive_newlines(tokens: &mut Vec<Token>) {
    tokens.dedup_by(|second, first| {
        first.kind == TokenKind::Newline && second.kind == TokenKind::Newline
    });
}

fn reserved_for(text: &str) -> Option<Reserved> {
    Some(match text {
        "if" => Reserved::If,
        "then" => Reserved::Then,
        "else" => Reserved::Else,
        "elif" => Reserved::Elif,
        "fi" => Reserved::Fi,
        "do" => Reserved::Do,
        "done" => Reserved::Done,
        "case" => Reserved::Case,
        "esac" => Reserved::Esac,
        "while" => Reserved::While,
        "until" => Reserved::Until,
        "for" => Reserved::For,
        "in" => Reserved::In,
        "{" => Reserved::Lbrace,
        "}" => Reserved::Rbrace,
        "!" => Reserved::Bang,
        _ => return None,
    })
}

fn detect_reserved_words(tokens: &mut [Token]) {
    for index in 0..tokens.len() {
        if tokens[index].kind != TokenKind::Word || !tokens[index].expansions.is_empty() {
            continue;
        }
        let reserved = match reserved_for(&tokens[index].value) {
            Some(reserved) => reserved,
            None => continue,
        };

        let at_command_start = index == 0
            || matches!(
                tokens[index - 1].kind,
                TokenKind::Newline
                    | TokenKind::Operator(Operator::Semi)
                    | TokenKind::Operator(Operator::DSemi)
                    | TokenKind::Operator(Operator::Amp)
                    | TokenKind::Operator(Operator::AndIf)
                    | TokenKind::Operator(Operator::OrIf)
                    | TokenKind::Operator(Operator::Pipe)
                    | TokenKind::Operator(Operator::Lparen)
                    | TokenKind::Operator(Operator::Rparen)
                    | TokenKind::Reserved(_)
            );

        // `in` (and `do`, for the `for NAME do ...` form) are reserved in
        // the third position of `for`/`case`.
        let third_word_of_iteration = index >= 2
            && matches!(
                tokens[index - 2].kind,
                TokenKind::Reserved(Reserved::For) | TokenKind::Reserved(Reserved::Case)
            );

        match reserved {
            Reserved::In => {
                if third_word_of_iteration {
                    tokens[index].kind = TokenKind::Reserved(reserved);
                }
            }
            Reserved::Do if third_word_of_iteration && !at_command_start => {
                tokens[index].kind = TokenKind::Reserved(reserved);
            }
            _ if at_command_start => {
                tokens[index].kind = TokenKind::Reserved(reserved);
            }
            _ => {}
        }
    }
}

fn classify_io_numbers(tokens: &mut [Token]) {
    for index in 0..tokens.len().saturating_sub(1) {
        let is_digits = tokens[index].kind == TokenKind::Word
            && !tokens[index].value.is_empty()
            && tokens[index].value.bytes().all(|byte| byte.is_ascii_digit());
        if !is_digits {
            continue;
        }
        let next_redirects = matches!(
            tokens[index + 1].kind,
            TokenKind::Operator(Operator::Less)
                | TokenKind::Operator(Operator::Great)
                | TokenKind::Operator(Operator::DGreat)
                | TokenKind::Operator(Operator::DLess)
                | TokenKind::Operator(Operator::DLessDash)
                | TokenKind::Operator(Operator::LessAnd)
                | TokenKind::Operator(Operator::GreatAnd)
                | TokenKind::Operator(Operator::LessGreat)
        );
        // Only adjacency counts: `echo 2> err` redirects, `echo 2 > err`
        // does not.
        let adjacent =
            tokens[index].position.end_offset == tokens[index + 1].position.start_offset;
        if next_redirects && adjacent {
            tokens[index].kind = TokenKind::IoNumber;
        }
    }
}

fn mark_command_starts(tokens: &mut [Token]) {
    for index in 0..tokens.len() {
        let starts = index == 0
            || matches!(
                tokens[index - 1].kind,
                TokenKind::Newline
                    | TokenKind::Operator(Operator::Semi)
                    | TokenKind::Operator(Operator::DSemi)
                    | TokenKind::Operator(Operator::Amp)
                    | TokenKind::Operator(Operator::AndIf)
                    | TokenKind::Operator(Operator::OrIf)
                    | TokenKind::Operator(Operator::Pipe)
                    | TokenKind::Operator(Operator::Lparen)
                    | TokenKind::Operator(Operator::Rparen)
                    | TokenKind::Reserved(_)
            );
        tokens[index].could_be_start_of_a_simple_command = starts;
    }
}

fn detect_assignment_words(tokens: &mut Vec<Token>) {
    let mut in_prefix = true;
    let mut index = 0;
    while index < tokens.len() {
        if tokens[index].could_be_start_of_a_simple_command {
            in_prefix = true;
        }
        match tokens[index].kind {
            TokenKind::Word => {
                let text = tokens[index].value.clone();
                if in_prefix {
                    if let Some(eq) = text.find('=') {
                        if is_valid_name(&text[..eq]) {
                            tokens[index].kind = TokenKind::AssignmentWord;
                            // `NAME=(` with no trivia between is a list
                            // assignment.
                            let opens_list = text.ends_with('=')
                                && index + 1 < tokens.len()
                                && tokens[index + 1].is_operator(Operator::Lparen)
                                && tokens[index].position.end_offset
                                    == tokens[index + 1].position.start_offset;
                            if opens_list {
                                tokens[index].kind = TokenKind::ListAssignmentWord;
                            }
                            index += 1;
                            continue;
                        }
                    }
                    in_prefix = false;
                }
            }
            TokenKind::Operator(_) | TokenKind::Newline => {}
            _ => {}
        }
        index += 1;
    }
}

fn resolve_expansions(tokens: &mut [Token], posix_mode: bool) {
    for token in tokens.iter_mut() {
        token.resolved_expansions = resolve_annotations(token.expansions.clone(), posix_mode);
    }
}

pub fn immediate_for_operator(operator: ParameterOperator) -> &'static str {
    match operator {
        ParameterOperator::DefaultValue => "value_or_default",
        ParameterOperator::AssignDefault => "assign_default",
        ParameterOperator::ErrorIfEmpty => "error_if_empty",
        ParameterOperator::AlternativeValue => "null_or_alternative",
        ParameterOperator::DefaultValueUnset => "defined_value_or_default",
        ParameterOperator::AssignDefaultUnset => "assign_defined_default",
        ParameterOperator::ErrorIfUnset => "error_if_unset",
        ParameterOperator::AlternativeValueUnset => "null_if_unset_or_alternative",
        ParameterOperator::RemoveSmallestSuffix | ParameterOperator::RemoveLargestSuffix => {
            "remove_suffix"
        }
        ParameterOperator::RemoveSmallestPrefix | ParameterOperator::RemoveLargestPrefix => {
            "remove_prefix"
        }
        ParameterOperator::Length => "length_of_variable",
    }
}

fn classify_for_variables(tokens: &mut [Token]) {
    for index in 1..tokens.len() {
        if tokens[index].kind == TokenKind::Word
            && tokens[index - 1].kind == TokenKind::Reserved(Reserved::For)
            && is_valid_name(&tokens[index].value)
        {
            tokens[index].kind = TokenKind::VariableName;
        }
    }
}

fn classify_function_names(tokens: &mut [Token]) {
    for index in 0..tokens.len() {
        if tokens[index].kind != TokenKind::Word
            || !tokens[index].could_be_start_of_a_simple_command
            || !is_valid_name(&tokens[index].value)
        {
            continue;
        }
        let open = index + 1 < tokens.len() && tokens[index + 1].is_operator(Operator::Lparen);
        let close = index + 2 < tokens.len() && tokens[index + 2].is_operator(Operator::Rparen);
        if open && close {
            tokens[index].kind = TokenKind::VariableName;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        PosixLexer::lex(source, true).into_iter().map(|token| token.kind).collect()
    }

    #[test]
    fn operators_and_words() {
        let kinds = kinds("a | b && c");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Word,
                TokenKind::Operator(Operator::Pipe),
                TokenKind::Word,
                TokenKind::Operator(Operator::AndIf),
                TokenKind::Word,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn io_number_requires_adjacency() {
        let with = PosixLexer::lex("echo 2> err", true);
        assert_eq!(with[1].kind, TokenKind::IoNumber);
        let without = PosixLexer::lex("echo 2 > err", true);
        assert_eq!(without[1].kind, TokenKind::Word);
    }

    #[test]
    fn reserved_words_only_at_command_start() {
        let tokens = PosixLexer::lex("if true; then echo if; fi", true);
        assert_eq!(tokens[0].kind, TokenKind::Reserved(Reserved::If));
        // the 'if' after echo stays a word
        let word_if = tokens
            .iter()
            .filter(|token| token.value == "if" && token.kind == TokenKind::Word)
            .count();
        assert_eq!(word_if, 1);
    }

    #[test]
    fn assignment_words_in_prefix_position() {
        let tokens = PosixLexer::lex("FOO=bar echo x", true);
        assert_eq!(tokens[0].kind, TokenKind::AssignmentWord);
        assert_eq!(tokens[1].kind, TokenKind::Word);
    }

    #[test]
    fn assignment_requires_a_valid_name() {
        let tokens = PosixLexer::lex("1x=bar echo", true);
        assert_eq!(tokens[0].kind, TokenKind::Word);
    }

    #[test]
    fn parameter_expansions_are_annotated() {
        let tokens = PosixLexer::lex("echo ${FOO:-default}", true);
        let word = &tokens[1];
        assert_eq!(word.expansions.len(), 1);
        match &word.expansions[0] {
            Expansion::Parameter { name, operator, word, .. } => {
                assert_eq!(name, "FOO");
                assert_eq!(*operator, Some(ParameterOperator::DefaultValue));
                assert_eq!(word, "default");
            }
            other => panic!("expected a parameter expansion, found {:?}", other),
        }
    }

    #[test]
    fn length_form_is_recognized() {
        let tokens = PosixLexer::lex("echo ${#FOO}", true);
        match &tokens[1].expansions[0] {
            Expansion::Parameter { name, operator, .. } => {
                assert_eq!(name, "FOO");
                assert_eq!(*operator, Some(ParameterOperator::Length));
            }
            other => panic!("expected a parameter expansion, found {:?}", other),
        }
    }

    #[test]
    fn command_substitution_resolves_to_a_tree() {
        let tokens = PosixLexer::lex("echo $(ls -l)", true);
        assert!(matches!(
            tokens[1].resolved_expansions[0],
            ResolvedExpansion::CommandSub { .. }
        ));
    }

    #[test]
    fn arithmetic_expansion_keeps_its_source() {
        let tokens = PosixLexer::lex("echo $((1 + 2))", true);
        match &tokens[1].expansions[0] {
            Expansion::Arithmetic { source, .. } => assert_eq!(source, "1 + 2"),
            other => panic!("expected an arithmetic expansion, found {:?}", other),
        }
    }

    #[test]
    fn newlines_merge() {
        let tokens = PosixLexer::lex("a\n\n\nb", true);
        let newlines =
            tokens.iter().filter(|token| token.kind == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn function_name_classification() {
        let tokens = PosixLexer::lex("greet() { echo hi; }", true);
        assert_eq!(tokens[0].kind, TokenKind::VariableName);
    }

    #[test]
    fn for_variable_classification() {
        let tokens = PosixLexer::lex("for x in a b; do echo $x; done", true);
        assert_eq!(tokens[1].kind, TokenKind::VariableName);
    }

    #[test]
    fn heredoc_body_is_collected() {
        let tokens = PosixLexer::lex("cat <<END\nhello\nEND\n", true);
        let contents: Vec<_> = tokens
            .iter()
            .filter(|token| token.kind == TokenKind::HeredocContents)
            .collect();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].value, "hello\n");
    }
}
