use crate::{
    error::{SyntaxError, SyntaxErrorKind},
    syntax::{Marker, Syntax},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// Literal text between markers. Quoted strings are always part of a text
    /// token, quotes included.
    Text,
    Marker(Marker),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset of the token in the input.
    pub start: usize,
    /// Line of the first character of the token (1-indexed).
    pub line: usize,
    /// Column of the first character of the token (1-indexed).
    pub column: usize,
}

struct Lexer<'a, 's> {
    input: &'a str,
    syntax: &'s Syntax,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
    /// Start of the text fragment being accumulated, if any.
    text_start: Option<(usize, usize, usize)>,
    tokens: Vec<Token<'a>>,
}

impl<'a, 's> Lexer<'a, 's> {
    const fn new(input: &'a str, syntax: &'s Syntax) -> Self {
        Lexer {
            input,
            syntax,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            text_start: None,
            tokens: Vec::new(),
        }
    }

    #[inline]
    const fn current_column(&self) -> usize {
        self.pos - self.line_start_pos + 1
    }

    fn rest(&self) -> &'a str {
        self.input.get(self.pos..).unwrap_or_default()
    }

    fn current_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Advances past one character, tracking line starts.
    #[inline]
    fn advance_char(&mut self, current_char: char) {
        let char_len = current_char.len_utf8();
        if current_char == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos + char_len;
        }
        self.pos += char_len;
    }

    /// Advances over `len` bytes, which must end on a char boundary.
    fn advance_bytes(&mut self, len: usize) {
        let end = self.pos + len;
        while self.pos < end {
            match self.current_char() {
                Some(c) => self.advance_char(c),
                None => break,
            }
        }
    }

    fn begin_text(&mut self) {
        if self.text_start.is_none() {
            self.text_start = Some((self.pos, self.line, self.current_column()));
        }
    }

    fn flush_text(&mut self) {
        if let Some((start, line, column)) = self.text_start.take() {
            if let Some(text) = self.input.get(start..self.pos) {
                self.tokens.push(Token {
                    kind: TokenKind::Text,
                    text,
                    start,
                    line,
                    column,
                });
            }
        }
    }

    fn run(mut self) -> Result<Vec<Token<'a>>, SyntaxError> {
        let quote = self.syntax.quote();
        // Position of the quote that opened the current string.
        let mut open_string: Option<(usize, usize)> = None;

        while let Some(current_char) = self.current_char() {
            if open_string.is_some() {
                if current_char == quote {
                    open_string = None;
                }
                self.advance_char(current_char);
                continue;
            }

            if current_char == quote {
                self.begin_text();
                open_string = Some((self.line, self.current_column()));
                self.advance_char(current_char);
                continue;
            }

            if let Some((marker, len)) = self.syntax.match_marker(self.rest()) {
                self.flush_text();
                let text = self.input.get(self.pos..self.pos + len).unwrap_or_default();
                self.tokens.push(Token {
                    kind: TokenKind::Marker(marker),
                    text,
                    start: self.pos,
                    line: self.line,
                    column: self.current_column(),
                });
                self.advance_bytes(len);
                continue;
            }

            self.begin_text();
            self.advance_char(current_char);
        }

        if let Some((line, column)) = open_string {
            return Err(SyntaxError::new(
                line,
                column,
                SyntaxErrorKind::UnterminatedString,
            ));
        }

        self.flush_text();
        Ok(self.tokens)
    }
}

/// Splits `input` into text fragments and marker tokens.
///
/// A single running flag tracks whether the scan is inside a quoted string;
/// it is toggled only by the quote character and spans the whole input, so a
/// string opened in one block and closed in another swallows everything in
/// between. Backslashes are not special here. Markers are only recognised
/// outside strings.
pub(crate) fn tokenize<'a>(input: &'a str, syntax: &Syntax) -> Result<Vec<Token<'a>>, SyntaxError> {
    Lexer::new(input, syntax).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds_and_text<'a>(tokens: &[Token<'a>]) -> Vec<(TokenKind, &'a str)> {
        tokens.iter().map(|t| (t.kind, t.text)).collect()
    }

    fn lex(input: &str) -> Vec<(TokenKind, &str)> {
        kinds_and_text(&tokenize(input, &Syntax::default()).unwrap())
    }

    const TEXT: TokenKind = TokenKind::Text;

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_input() {
        assert!(lex("").is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_plain_text_is_single_token() {
        assert_eq!(lex("hello // world {"), vec![(TEXT, "hello // world {")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_all_marker_kinds() {
        assert_eq!(
            lex("a/*:b:*/c//:d//!e{{f}}"),
            vec![
                (TEXT, "a"),
                (TokenKind::Marker(Marker::StatementStart), "/*:"),
                (TEXT, "b"),
                (TokenKind::Marker(Marker::StatementEnd), ":*/"),
                (TEXT, "c"),
                (TokenKind::Marker(Marker::PartialStart), "//:"),
                (TEXT, "d"),
                (TokenKind::Marker(Marker::PartialEnd), "//!"),
                (TEXT, "e"),
                (TokenKind::Marker(Marker::VariableStart), "{{"),
                (TEXT, "f"),
                (TokenKind::Marker(Marker::VariableEnd), "}}"),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_markers_inside_string_are_text() {
        assert_eq!(
            lex(r#"/*: x = "{{not a var}}" :*/"#),
            vec![
                (TokenKind::Marker(Marker::StatementStart), "/*:"),
                (TEXT, r#" x = "{{not a var}}" "#),
                (TokenKind::Marker(Marker::StatementEnd), ":*/"),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_string_state_spans_blocks() {
        // The quote opened in the first block is closed in the second one.
        assert_eq!(
            lex(r#"{{ "a }} b {{ c" }}"#),
            vec![
                (TokenKind::Marker(Marker::VariableStart), "{{"),
                (TEXT, r#" "a }} b {{ c" "#),
                (TokenKind::Marker(Marker::VariableEnd), "}}"),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_backslash_does_not_escape_quote() {
        assert_eq!(
            lex(r#"path "C:\" then {{ x }}"#),
            vec![
                (TEXT, r#"path "C:\" then "#),
                (TokenKind::Marker(Marker::VariableStart), "{{"),
                (TEXT, " x "),
                (TokenKind::Marker(Marker::VariableEnd), "}}"),
            ]
        );
        // Every quote toggles, so `\"` ends the string and `}}` is a marker.
        assert_eq!(
            lex(r#"{{ "a\"}}"#),
            vec![
                (TokenKind::Marker(Marker::VariableStart), "{{"),
                (TEXT, r#" "a\""#),
                (TokenKind::Marker(Marker::VariableEnd), "}}"),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unterminated_string() {
        let err = tokenize("line one\n  {{ \"open }}", &Syntax::default()).unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnterminatedString);
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 6);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_token_positions() {
        let tokens = tokenize("ab\n//: if x\n  {{y}}", &Syntax::default()).unwrap();
        let positions: Vec<_> = tokens.iter().map(|t| (t.line, t.column)).collect();
        assert_eq!(positions, vec![(1, 1), (2, 1), (2, 4), (3, 3), (3, 5), (3, 6)]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_custom_syntax() {
        let syntax = Syntax::builder().variable("${", "}").quote('\'').build();
        let tokens = tokenize("a ${ 'x}' } {{b}}", &syntax).unwrap();
        assert_eq!(
            kinds_and_text(&tokens),
            vec![
                (TEXT, "a "),
                (TokenKind::Marker(Marker::VariableStart), "${"),
                (TEXT, " 'x}' "),
                (TokenKind::Marker(Marker::VariableEnd), "}"),
                (TEXT, " {{b"),
                (TokenKind::Marker(Marker::VariableEnd), "}"),
                (TokenKind::Marker(Marker::VariableEnd), "}"),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_multibyte_text() {
        assert_eq!(
            lex("héllo {{ ünï }} ✓"),
            vec![
                (TEXT, "héllo "),
                (TokenKind::Marker(Marker::VariableStart), "{{"),
                (TEXT, " ünï "),
                (TokenKind::Marker(Marker::VariableEnd), "}}"),
                (TEXT, " ✓"),
            ]
        );
    }
}
