use super::{AssignOp, BinaryOp, Expr, Stmt, UnaryOp};
use crate::Value;

/// A parse failure, positioned relative to the start of the parsed snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScriptError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

type ParseResult<T> = Result<T, ScriptError>;

/// The control statement opening a partial block.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Header {
    For { var: String, iterable: Expr },
    If(Expr),
    Elif(Expr),
    Else,
    While(Expr),
}

/// Deepest nesting of expressions and blocks a script may use.
const MAX_DEPTH: usize = 128;

const KEYWORDS: &[&str] = &[
    "let", "if", "elif", "else", "for", "in", "while", "break", "continue", "and", "or", "not",
    "true", "false", "none",
];

#[derive(Clone, Copy)]
struct Checkpoint {
    pos: usize,
    line: usize,
    line_start_pos: usize,
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
    /// Open `(` and `[` count. Newlines are plain whitespace while positive.
    nesting: usize,
    /// Depth of the syntax tree being built, bounded by [`MAX_DEPTH`].
    depth: usize,
}

impl<'a> Parser<'a> {
    const fn new(input: &'a str) -> Self {
        Parser {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            nesting: 0,
            depth: 0,
        }
    }

    #[inline]
    const fn current_column(&self) -> usize {
        self.pos - self.line_start_pos + 1
    }

    #[inline]
    fn make_error<M: Into<String>>(&self, message: M) -> ScriptError {
        ScriptError {
            line: self.line,
            column: self.current_column(),
            message: message.into(),
        }
    }

    /// Goes one level deeper into the syntax tree. The caller restores the
    /// previous depth once the enclosing construct is parsed.
    fn descend(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(self.make_error("expression nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    const fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            line: self.line,
            line_start_pos: self.line_start_pos,
        }
    }

    const fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.line = checkpoint.line;
        self.line_start_pos = checkpoint.line_start_pos;
    }

    fn rest(&self) -> &'a str {
        self.input.get(self.pos..).unwrap_or_default()
    }

    fn current_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Advances the parser position past `current_char`, updating the line
    /// number if it is a newline.
    #[inline]
    fn advance_by_char(&mut self, current_char: char) {
        let char_len = current_char.len_utf8();
        if current_char == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos + char_len;
        }
        self.pos += char_len;
    }

    /// Advances by `len` bytes of text that contains no newline.
    #[inline]
    const fn advance_bytes_no_newline(&mut self, len: usize) {
        self.pos += len;
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn consume(&mut self, s: &str) -> bool {
        if self.peek(s) {
            self.advance_bytes_no_newline(s.len());
            true
        } else {
            false
        }
    }

    fn expect(&mut self, s: &str) -> ParseResult<()> {
        if self.consume(s) {
            Ok(())
        } else {
            Err(self.make_error(format!("expected '{}', found {}", s, self.describe_next())))
        }
    }

    fn describe_next(&self) -> String {
        match self.current_char() {
            None => "end of input".to_owned(),
            Some('\n') => "end of line".to_owned(),
            Some(_) => {
                let snippet: String = self.rest().chars().take(10).collect();
                format!("'{}'", snippet.lines().next().unwrap_or_default())
            }
        }
    }

    /// Skips spaces, tabs and `#` comments. Newlines are skipped too inside
    /// brackets.
    fn skip_space(&mut self) {
        while let Some(c) = self.current_char() {
            if c == '#' {
                while let Some(c) = self.current_char() {
                    if c == '\n' {
                        break;
                    }
                    self.advance_by_char(c);
                }
            } else if c == ' ' || c == '\t' || c == '\r' || (c == '\n' && self.nesting > 0) {
                self.advance_by_char(c);
            } else {
                break;
            }
        }
    }

    /// Skips all whitespace, comments and statement separators.
    fn skip_separators(&mut self) {
        loop {
            self.skip_space();
            match self.current_char() {
                Some(c @ ('\n' | ';')) => self.advance_by_char(c),
                Some(_) | None => break,
            }
        }
    }

    /// Skips whitespace including newlines, but not `;`.
    fn skip_whitespace(&mut self) {
        loop {
            self.skip_space();
            match self.current_char() {
                Some('\n') => self.advance_by_char('\n'),
                Some(_) | None => break,
            }
        }
    }

    fn is_ident_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_'
    }

    /// Reads the word at the current position without consuming it.
    fn peek_word(&self) -> &'a str {
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|&(i, c)| !(Self::is_ident_char(c) && !(i == 0 && c.is_ascii_digit())))
            .map_or(rest.len(), |(i, _)| i);
        rest.get(..end).unwrap_or_default()
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek_word() == keyword
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.advance_bytes_no_newline(keyword.len());
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> ParseResult<()> {
        self.skip_space();
        if self.consume_keyword(keyword) {
            Ok(())
        } else {
            Err(self.make_error(format!(
                "expected '{}', found {}",
                keyword,
                self.describe_next()
            )))
        }
    }

    /// Consume and return a name that is not a keyword.
    fn consume_identifier(&mut self) -> ParseResult<&'a str> {
        self.skip_space();
        let word = self.peek_word();
        if word.is_empty() {
            return Err(self.make_error(format!(
                "expected identifier, found {}",
                self.describe_next()
            )));
        }
        if KEYWORDS.contains(&word) {
            return Err(self.make_error(format!("expected identifier, found keyword '{word}'")));
        }
        self.advance_bytes_no_newline(word.len());
        Ok(word)
    }

    // --- Statements ---

    /// Parses statements until the end of input, or until a `}` when
    /// `in_block` is set. The `}` itself is left for the caller.
    fn parse_statements(&mut self, in_block: bool) -> ParseResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            if self.eof() {
                if in_block {
                    return Err(self.make_error("expected '}', found end of input"));
                }
                break;
            }
            if in_block && self.peek("}") {
                break;
            }

            stmts.push(self.parse_statement()?);

            self.skip_space();
            let terminated = self.eof()
                || self.peek("\n")
                || self.peek(";")
                || (in_block && self.peek("}"));
            if !terminated {
                return Err(self.make_error(format!(
                    "expected end of statement, found {}",
                    self.describe_next()
                )));
            }
        }
        Ok(stmts)
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.skip_space();
        self.expect("{")?;
        // A block resets bracket nesting: statements inside are newline separated.
        let (nesting, depth) = (std::mem::take(&mut self.nesting), self.depth);
        let body = self
            .descend()
            .and_then(|()| self.parse_statements(true));
        (self.nesting, self.depth) = (nesting, depth);
        let body = body?;
        self.expect("}")?;
        Ok(body)
    }

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        self.skip_space();
        match self.peek_word() {
            "let" => {
                self.consume_keyword("let");
                let name = self.consume_identifier()?.to_owned();
                self.skip_space();
                self.expect("=")?;
                let value = self.parse_expression()?;
                Ok(Stmt::Let { name, value })
            }
            "if" => {
                self.consume_keyword("if");
                self.parse_if()
            }
            "for" => {
                self.consume_keyword("for");
                let (var, iterable) = self.parse_for_head()?;
                let body = self.parse_block()?;
                Ok(Stmt::For {
                    var,
                    iterable,
                    body,
                })
            }
            "while" => {
                self.consume_keyword("while");
                let cond = self.parse_expression()?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body })
            }
            "break" => {
                self.consume_keyword("break");
                Ok(Stmt::Break)
            }
            "continue" => {
                self.consume_keyword("continue");
                Ok(Stmt::Continue)
            }
            _ => {
                if let Some(stmt) = self.try_parse_assignment()? {
                    return Ok(stmt);
                }
                Ok(Stmt::Expr(self.parse_expression()?))
            }
        }
    }

    /// `name = expr`, `name += expr` or `name -= expr`; restores the position
    /// and returns `None` for anything else.
    fn try_parse_assignment(&mut self) -> ParseResult<Option<Stmt>> {
        let checkpoint = self.checkpoint();
        let Ok(name) = self.consume_identifier() else {
            self.restore(checkpoint);
            return Ok(None);
        };
        self.skip_space();
        let op = if self.consume("+=") {
            AssignOp::Add
        } else if self.consume("-=") {
            AssignOp::Sub
        } else if self.peek("=") && !self.peek("==") {
            self.advance_bytes_no_newline(1);
            AssignOp::Set
        } else {
            self.restore(checkpoint);
            return Ok(None);
        };
        let value = self.parse_expression()?;
        Ok(Some(Stmt::Assign {
            name: name.to_owned(),
            op,
            value,
        }))
    }

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let cond = self.parse_expression()?;
        let body = self.parse_block()?;
        let mut branches = vec![(cond, body)];
        let mut otherwise = None;

        loop {
            let checkpoint = self.checkpoint();
            self.skip_whitespace();
            if self.consume_keyword("elif") {
                let cond = self.parse_expression()?;
                branches.push((cond, self.parse_block()?));
            } else if self.consume_keyword("else") {
                self.skip_space();
                if self.consume_keyword("if") {
                    let cond = self.parse_expression()?;
                    branches.push((cond, self.parse_block()?));
                } else {
                    otherwise = Some(self.parse_block()?);
                    break;
                }
            } else {
                self.restore(checkpoint);
                break;
            }
        }

        Ok(Stmt::If {
            branches,
            otherwise,
        })
    }

    fn parse_for_head(&mut self) -> ParseResult<(String, Expr)> {
        let var = self.consume_identifier()?.to_owned();
        self.expect_keyword("in")?;
        let iterable = self.parse_expression()?;
        Ok((var, iterable))
    }

    // --- Expressions ---
    // Precedence: pipe -> OR -> AND -> NOT -> comparison -> additive ->
    // multiplicative -> unary -> postfix -> primary

    fn parse_expression(&mut self) -> ParseResult<Expr> {
        let depth = self.depth;
        let expr = self
            .descend()
            .and_then(|()| self.parse_pipe_expression());
        self.depth = depth;
        expr
    }

    // Handles filters: `value | name` and `value | name(args)`
    fn parse_pipe_expression(&mut self) -> ParseResult<Expr> {
        let mut value = self.parse_or_expression()?;
        loop {
            self.skip_space();
            if self.peek("|") && !self.peek("||") {
                self.advance_bytes_no_newline(1);
                self.descend()?;
                let function = self.consume_identifier()?.to_owned();
                let mut args = vec![value];
                if self.peek("(") {
                    args.extend(self.parse_arguments()?);
                }
                value = Expr::Call { function, args };
            } else {
                break;
            }
        }
        Ok(value)
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    // Handles OR (`or`, `||`)
    fn parse_or_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and_expression()?;
        loop {
            self.skip_space();
            if self.consume("||") || self.consume_keyword("or") {
                self.descend()?;
                let right = self.parse_and_expression()?;
                left = Self::binary(BinaryOp::Or, left, right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    // Handles AND (`and`, `&&`)
    fn parse_and_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_not_expression()?;
        loop {
            self.skip_space();
            if self.consume("&&") || self.consume_keyword("and") {
                self.descend()?;
                let right = self.parse_not_expression()?;
                left = Self::binary(BinaryOp::And, left, right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    // Handles NOT (`not`, `!`)
    fn parse_not_expression(&mut self) -> ParseResult<Expr> {
        self.skip_space();
        let negated = if self.peek("!") && !self.peek("!=") {
            self.advance_bytes_no_newline(1);
            true
        } else {
            self.consume_keyword("not")
        };
        if negated {
            self.descend()?;
            let operand = self.parse_not_expression()?;
            Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            })
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let left = self.parse_additive()?;
        self.skip_space();

        // `not in` negates a membership test.
        let checkpoint = self.checkpoint();
        if self.consume_keyword("not") {
            self.skip_space();
            if self.consume_keyword("in") {
                let right = self.parse_additive()?;
                return Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(Self::binary(BinaryOp::In, left, right)),
                });
            }
            self.restore(checkpoint);
        }

        let op = if self.consume("==") {
            BinaryOp::Eq
        } else if self.consume("!=") {
            BinaryOp::Ne
        } else if self.consume("<=") {
            BinaryOp::Le
        } else if self.consume(">=") {
            BinaryOp::Ge
        } else if self.consume("<") {
            BinaryOp::Lt
        } else if self.consume(">") {
            BinaryOp::Gt
        } else if self.consume_keyword("in") {
            BinaryOp::In
        } else {
            return Ok(left);
        };
        let right = self.parse_additive()?;
        Ok(Self::binary(op, left, right))
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_space();
            if self.peek("+=") || self.peek("-=") {
                break;
            }
            let op = if self.consume("+") {
                BinaryOp::Add
            } else if self.consume("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            self.descend()?;
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_space();
            let op = if self.consume("*") {
                BinaryOp::Mul
            } else if self.consume("/") {
                BinaryOp::Div
            } else if self.consume("%") {
                BinaryOp::Rem
            } else {
                break;
            };
            self.descend()?;
            let right = self.parse_unary()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        self.skip_space();
        if self.consume("-") {
            self.descend()?;
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.peek("(") || self.peek("[") || self.peek(".") {
                self.descend()?;
            }
            if self.peek("(") {
                let Expr::Var(function) = expr else {
                    return Err(self.make_error("only named functions can be called"));
                };
                let args = self.parse_arguments()?;
                expr = Expr::Call { function, args };
            } else if self.consume("[") {
                self.nesting += 1;
                let index = self.parse_expression();
                self.nesting -= 1;
                let index = index?;
                self.skip_space();
                self.expect("]")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.peek(".") {
                self.advance_bytes_no_newline(1);
                if self.current_char().is_some_and(|c| c.is_ascii_digit()) {
                    // `list.0` indexes by position.
                    let index = self.parse_number()?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                    continue;
                }
                let name = self.consume_identifier()?.to_owned();
                if self.peek("(") {
                    let mut args = vec![expr];
                    args.extend(self.parse_arguments()?);
                    expr = Expr::Call {
                        function: name,
                        args,
                    };
                } else {
                    expr = Expr::Attr {
                        target: Box::new(expr),
                        name,
                    };
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Parses `(a, b, ...)`, allowing a trailing comma.
    fn parse_arguments(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect("(")?;
        self.parse_sequence(")")
    }

    /// Parses comma separated expressions up to and including `close`.
    fn parse_sequence(&mut self, close: &str) -> ParseResult<Vec<Expr>> {
        self.nesting += 1;
        let items = self.parse_sequence_items(close);
        self.nesting -= 1;
        let items = items?;
        self.expect(close)?;
        Ok(items)
    }

    fn parse_sequence_items(&mut self, close: &str) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            self.skip_space();
            if self.peek(close) {
                break;
            }
            items.push(self.parse_expression()?);
            self.skip_space();
            if !self.consume(",") {
                break;
            }
        }
        self.skip_space();
        Ok(items)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        self.skip_space();
        let Some(c) = self.current_char() else {
            return Err(self.make_error("expected expression, found end of input"));
        };

        if c.is_ascii_digit() {
            return self.parse_number();
        }
        if c == '"' || c == '\'' {
            return Ok(Expr::Literal(Value::String(self.parse_string(c)?)));
        }
        if c == '[' {
            self.advance_by_char(c);
            return Ok(Expr::List(self.parse_sequence("]")?));
        }
        if c == '(' {
            self.advance_by_char(c);
            self.nesting += 1;
            let inner = self.parse_expression();
            self.nesting -= 1;
            let inner = inner?;
            self.skip_space();
            self.expect(")")?;
            return Ok(inner);
        }

        match self.peek_word() {
            "true" => {
                self.consume_keyword("true");
                Ok(Expr::Literal(Value::Bool(true)))
            }
            "false" => {
                self.consume_keyword("false");
                Ok(Expr::Literal(Value::Bool(false)))
            }
            "none" => {
                self.consume_keyword("none");
                Ok(Expr::Literal(Value::None))
            }
            "" => Err(self.make_error(format!(
                "expected expression, found {}",
                self.describe_next()
            ))),
            _ => Ok(Expr::Var(self.consume_identifier()?.to_owned())),
        }
    }

    fn parse_number(&mut self) -> ParseResult<Expr> {
        let start = self.pos;
        let error = self.make_error("invalid number literal");
        let digits = |p: &mut Self| {
            while p.current_char().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                p.advance_bytes_no_newline(1);
            }
        };
        digits(self);
        let mut is_float = false;
        let after_dot = self.rest().get(1..2).unwrap_or_default();
        if self.peek(".") && after_dot.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance_bytes_no_newline(1);
            digits(self);
        }
        let text: String = self
            .input
            .get(start..self.pos)
            .unwrap_or_default()
            .chars()
            .filter(|&c| c != '_')
            .collect();
        let value = if is_float {
            text.parse().map(Value::Float).map_err(|_| error)?
        } else {
            text.parse().map(Value::Int).map_err(|_| ScriptError {
                message: format!("integer literal '{text}' is out of range"),
                ..error
            })?
        };
        Ok(Expr::Literal(value))
    }

    fn parse_string(&mut self, quote: char) -> ParseResult<String> {
        let error = self.make_error("unterminated string literal");
        self.advance_by_char(quote);
        let mut value = String::new();
        loop {
            let Some(c) = self.current_char() else {
                return Err(error);
            };
            self.advance_by_char(c);
            if c == quote {
                return Ok(value);
            }
            if c != '\\' {
                value.push(c);
                continue;
            }
            let Some(escaped) = self.current_char() else {
                return Err(error);
            };
            let escape_error = self.make_error(format!("unknown escape sequence '\\{escaped}'"));
            self.advance_by_char(escaped);
            match escaped {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                '0' => value.push('\0'),
                '\\' | '"' | '\'' => value.push(escaped),
                'u' => value.push(self.parse_unicode_escape()?),
                _ => return Err(escape_error),
            }
        }
    }

    /// Parses the `{XXXX}` of a `\u{XXXX}` escape.
    fn parse_unicode_escape(&mut self) -> ParseResult<char> {
        let error = self.make_error("invalid unicode escape");
        if !self.consume("{") {
            return Err(error);
        }
        let start = self.pos;
        while self.current_char().is_some_and(|c| c.is_ascii_hexdigit()) {
            self.advance_bytes_no_newline(1);
        }
        let hex = self.input.get(start..self.pos).unwrap_or_default();
        let c = u32::from_str_radix(hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| error.clone())?;
        if !self.consume("}") {
            return Err(error);
        }
        Ok(c)
    }

    fn expect_end(&mut self) -> ParseResult<()> {
        self.skip_whitespace();
        if self.eof() {
            Ok(())
        } else {
            Err(self.make_error(format!("unexpected {}", self.describe_next())))
        }
    }
}

/// Parses the contents of a statement block.
pub(crate) fn parse_statements(input: &str) -> ParseResult<Vec<Stmt>> {
    let mut parser = Parser::new(input);
    let stmts = parser.parse_statements(false)?;
    parser.expect_end()?;
    Ok(stmts)
}

/// Parses the contents of a variable marker. Newlines are allowed anywhere.
pub(crate) fn parse_expression(input: &str) -> ParseResult<Expr> {
    let mut parser = Parser::new(input);
    parser.nesting = 1;
    parser.skip_space();
    let expr = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parses the header line of a partial block. A trailing `:` is accepted.
pub(crate) fn parse_header(input: &str) -> ParseResult<Header> {
    let mut parser = Parser::new(input);
    parser.skip_space();
    let header = match parser.peek_word() {
        "for" => {
            parser.consume_keyword("for");
            let (var, iterable) = parser.parse_for_head()?;
            Header::For { var, iterable }
        }
        "if" => {
            parser.consume_keyword("if");
            Header::If(parser.parse_expression()?)
        }
        "elif" => {
            parser.consume_keyword("elif");
            Header::Elif(parser.parse_expression()?)
        }
        "else" => {
            parser.consume_keyword("else");
            parser.skip_space();
            if parser.consume_keyword("if") {
                Header::Elif(parser.parse_expression()?)
            } else {
                Header::Else
            }
        }
        "while" => {
            parser.consume_keyword("while");
            Header::While(parser.parse_expression()?)
        }
        word => {
            return Err(parser.make_error(format!(
                "expected 'for', 'if', 'elif', 'else' or 'while', found '{word}'"
            )));
        }
    };
    parser.skip_space();
    parser.consume(":");
    parser.expect_end()?;
    Ok(header)
}
