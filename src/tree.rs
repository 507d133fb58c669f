use crate::{
    error::{SyntaxError, SyntaxErrorKind},
    lexer::{Token, TokenKind},
    syntax::{Marker, Syntax},
};

/// Index of a part in a [`PartTree`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct PartId(usize);

/// Location of the first character of a block's content.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Span {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Part<'a> {
    /// Text copied to the output verbatim.
    Literal { text: &'a str },
    /// Code executed for its side effects. Never has children.
    Statement { code: &'a str, span: Span },
    /// A control statement header owning the parts up to its close marker.
    Partial {
        header: &'a str,
        span: Span,
        children: Vec<PartId>,
    },
    /// An expression whose value is written to the output.
    Variable { expr: &'a str, span: Span },
}

/// Parts stored in an arena. Every partial block lists its body as child
/// ids; the top-level sibling sequence is `root`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct PartTree<'a> {
    parts: Vec<Part<'a>>,
    root: Vec<PartId>,
}

impl<'a> PartTree<'a> {
    pub fn root(&self) -> &[PartId] {
        &self.root
    }

    pub fn get(&self, id: PartId) -> Option<&Part<'a>> {
        self.parts.get(id.0)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.parts.len()
    }
}

struct Builder<'a, 's> {
    input: &'a str,
    syntax: &'s Syntax,
    tokens: std::vec::IntoIter<Token<'a>>,
    tree: PartTree<'a>,
    /// Open partial blocks; the body of the last one is the insertion point.
    stack: Vec<(PartId, Span)>,
}

impl<'a, 's> Builder<'a, 's> {
    fn insert(&mut self, part: Part<'a>) -> PartId {
        let id = PartId(self.tree.parts.len());
        self.tree.parts.push(part);
        match self.stack.last() {
            Some((parent, _)) => {
                if let Some(Part::Partial { children, .. }) = self.tree.parts.get_mut(parent.0) {
                    children.push(id);
                }
            }
            None => self.tree.root.push(id),
        }
        id
    }

    fn insert_literal(&mut self, text: &'a str) {
        if !text.is_empty() {
            self.insert(Part::Literal { text });
        }
    }

    /// Position right after the open marker `open`.
    fn content_span(open: &Token<'a>) -> Span {
        Span {
            line: open.line,
            column: open.column + open.text.chars().count(),
        }
    }

    /// Collects the raw source between `open` and the next `end` marker.
    /// Markers of other kinds in between are kept as text.
    fn collect_until(&mut self, open: &Token<'a>, end: Marker) -> Result<&'a str, SyntaxError> {
        let content_start = open.start + open.text.len();
        for token in self.tokens.by_ref() {
            if token.kind == TokenKind::Marker(end) {
                return Ok(self.input.get(content_start..token.start).unwrap_or_default());
            }
        }
        Err(SyntaxError::new(
            open.line,
            open.column,
            SyntaxErrorKind::UnterminatedBlock {
                expected: self.syntax.delimiter(end).to_owned(),
            },
        ))
    }

    /// Opens a partial block: the first line of the following text is the
    /// header, the rest of that text starts the body.
    fn open_partial(&mut self, open: &Token<'a>) -> Result<(), SyntaxError> {
        let span = Self::content_span(open);
        let content = match self.tokens.as_slice().first() {
            Some(next) if next.kind == TokenKind::Text => {
                let text = next.text;
                self.tokens.next();
                text
            }
            Some(_) | None => "",
        };

        let (header, body_start) = content.split_once('\n').unwrap_or((content, ""));
        let header = header.strip_suffix('\r').unwrap_or(header);
        if header.trim().is_empty() {
            return Err(SyntaxError::new(
                open.line,
                open.column,
                SyntaxErrorKind::MalformedHeader {
                    header: String::new(),
                    reason: "missing header line".to_owned(),
                },
            ));
        }

        let id = self.insert(Part::Partial {
            header,
            span,
            children: Vec::new(),
        });
        self.stack.push((id, Span {
            line: open.line,
            column: open.column,
        }));
        self.insert_literal(body_start);
        Ok(())
    }

    fn unexpected_close(token: &Token<'a>) -> SyntaxError {
        SyntaxError::new(
            token.line,
            token.column,
            SyntaxErrorKind::UnexpectedClose {
                marker: token.text.to_owned(),
            },
        )
    }

    fn run(mut self) -> Result<PartTree<'a>, SyntaxError> {
        while let Some(token) = self.tokens.next() {
            match token.kind {
                TokenKind::Text => self.insert_literal(token.text),
                TokenKind::Marker(Marker::StatementStart) => {
                    let code = self.collect_until(&token, Marker::StatementEnd)?;
                    let span = Self::content_span(&token);
                    self.insert(Part::Statement { code, span });
                }
                TokenKind::Marker(Marker::VariableStart) => {
                    let expr = self.collect_until(&token, Marker::VariableEnd)?;
                    let span = Self::content_span(&token);
                    self.insert(Part::Variable { expr, span });
                }
                TokenKind::Marker(Marker::PartialStart) => self.open_partial(&token)?,
                TokenKind::Marker(Marker::PartialEnd) => {
                    if self.stack.pop().is_none() {
                        return Err(Self::unexpected_close(&token));
                    }
                }
                TokenKind::Marker(Marker::StatementEnd | Marker::VariableEnd) => {
                    return Err(Self::unexpected_close(&token));
                }
            }
        }

        if let Some((id, span)) = self.stack.last() {
            let header = match self.tree.get(*id) {
                Some(Part::Partial { header, .. }) => header.trim().to_owned(),
                Some(Part::Literal { .. } | Part::Statement { .. } | Part::Variable { .. })
                | None => String::new(),
            };
            return Err(SyntaxError::new(
                span.line,
                span.column,
                SyntaxErrorKind::UnclosedBlock {
                    header,
                    expected: self.syntax.delimiter(Marker::PartialEnd).to_owned(),
                },
            ));
        }

        Ok(self.tree)
    }
}

/// Builds the part tree from the token stream of `input`.
pub(crate) fn build<'a>(
    input: &'a str,
    tokens: Vec<Token<'a>>,
    syntax: &Syntax,
) -> Result<PartTree<'a>, SyntaxError> {
    Builder {
        input,
        syntax,
        tokens: tokens.into_iter(),
        tree: PartTree::default(),
        stack: Vec::new(),
    }
    .run()
}
