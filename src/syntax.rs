//! The marker table used to recognise embedded constructs in a template.
//!
//! The default configuration is:
//!
//! | Construct       | Open  | Close |
//! |-----------------|-------|-------|
//! | Statement block | `/*:` | `:*/` |
//! | Partial block   | `//:` | `//!` |
//! | Variable        | `{{`  | `}}`  |
//!
//! and the string quote is `"`. Markers between quotes are plain text.
//!
//! ```
//! use blockplate::{Context, Syntax, Template};
//!
//! let syntax = Syntax::builder()
//!     .variable("<?", "?>")
//!     .partial("<%", "%>")
//!     .build();
//!
//! let template = Template::builder()
//!     .syntax(syntax)
//!     .compile("<% for n in [1, 2]\n<?n?>%>")
//!     .unwrap();
//! assert_eq!(template.render(&Context::new()).unwrap(), "12");
//! ```

/// The kind of marker a delimiter stands for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Marker {
    StatementStart,
    StatementEnd,
    PartialStart,
    PartialEnd,
    VariableStart,
    VariableEnd,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Syntax {
    statement: (String, String),
    partial: (String, String),
    variable: (String, String),
    quote: char,
}

impl Default for Syntax {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Syntax {
    /// Starts from the default markers.
    pub fn builder() -> SyntaxBuilder {
        SyntaxBuilder::default()
    }

    /// Open and close delimiters of statement blocks.
    pub fn statement(&self) -> (&str, &str) {
        (&self.statement.0, &self.statement.1)
    }

    /// Open and close delimiters of partial blocks.
    pub fn partial(&self) -> (&str, &str) {
        (&self.partial.0, &self.partial.1)
    }

    /// Open and close delimiters of variables.
    pub fn variable(&self) -> (&str, &str) {
        (&self.variable.0, &self.variable.1)
    }

    /// The character that opens and closes strings.
    pub const fn quote(&self) -> char {
        self.quote
    }

    /// The delimiter text of `marker`.
    pub(crate) fn delimiter(&self, marker: Marker) -> &str {
        match marker {
            Marker::StatementStart => &self.statement.0,
            Marker::StatementEnd => &self.statement.1,
            Marker::PartialStart => &self.partial.0,
            Marker::PartialEnd => &self.partial.1,
            Marker::VariableStart => &self.variable.0,
            Marker::VariableEnd => &self.variable.1,
        }
    }

    /// Returns the marker whose delimiter starts `input`, if any. When two
    /// delimiters match the longest one wins; ties go to table order.
    pub(crate) fn match_marker(&self, input: &str) -> Option<(Marker, usize)> {
        let mut best: Option<(Marker, usize)> = None;
        for marker in MARKERS {
            let delimiter = self.delimiter(marker);
            if delimiter.is_empty() || !input.starts_with(delimiter) {
                continue;
            }
            if best.is_none_or(|(_, len)| delimiter.len() > len) {
                best = Some((marker, delimiter.len()));
            }
        }
        best
    }
}

const MARKERS: [Marker; 6] = [
    Marker::StatementStart,
    Marker::StatementEnd,
    Marker::PartialStart,
    Marker::PartialEnd,
    Marker::VariableStart,
    Marker::VariableEnd,
];

/// Builder for a custom [`Syntax`]. Any pair that is not set keeps its
/// default delimiters.
#[derive(Debug, Clone)]
pub struct SyntaxBuilder {
    statement: (String, String),
    partial: (String, String),
    variable: (String, String),
    quote: char,
}

impl Default for SyntaxBuilder {
    fn default() -> Self {
        Self {
            statement: ("/*:".to_owned(), ":*/".to_owned()),
            partial: ("//:".to_owned(), "//!".to_owned()),
            variable: ("{{".to_owned(), "}}".to_owned()),
            quote: '"',
        }
    }
}

impl SyntaxBuilder {
    /// Delimiters of statement blocks, executed for their side effects.
    pub fn statement(&mut self, open: &str, close: &str) -> &mut Self {
        self.statement = (open.to_owned(), close.to_owned());
        self
    }

    /// Delimiters of partial blocks, which wrap the parts that follow them.
    pub fn partial(&mut self, open: &str, close: &str) -> &mut Self {
        self.partial = (open.to_owned(), close.to_owned());
        self
    }

    /// Delimiters of inline variable expressions.
    pub fn variable(&mut self, open: &str, close: &str) -> &mut Self {
        self.variable = (open.to_owned(), close.to_owned());
        self
    }

    /// String quote. Markers between two quotes are plain text.
    pub fn quote(&mut self, quote: char) -> &mut Self {
        self.quote = quote;
        self
    }

    pub fn build(&self) -> Syntax {
        Syntax {
            statement: self.statement.clone(),
            partial: self.partial.clone(),
            variable: self.variable.clone(),
            quote: self.quote,
        }
    }
}
