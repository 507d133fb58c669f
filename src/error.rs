pub type BlockplateResult<T> = std::result::Result<T, BlockplateError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum SyntaxErrorKind {
    /// A quote was opened and never closed before the end of the input.
    #[error("unterminated string literal")]
    UnterminatedString,
    /// A statement block or variable was opened and never closed.
    #[error("unterminated block (expected '{expected}')")]
    UnterminatedBlock { expected: String },
    /// A partial block was still open at the end of the input.
    #[error("unclosed partial block '{header}' (expected '{expected}')")]
    UnclosedBlock { header: String, expected: String },
    /// A close marker appeared without a matching open marker.
    #[error("unexpected '{marker}' with no open block")]
    UnexpectedClose { marker: String },
    /// The header line of a partial block is not a recognised control statement.
    #[error("malformed partial block header '{header}': {reason}")]
    MalformedHeader { header: String, reason: String },
    /// An `else` or `elif` partial block that does not follow an `if` block.
    #[error("'{header}' block must directly follow an 'if' or 'elif' block")]
    OrphanBranch { header: String },
    /// The code inside a block does not parse.
    #[error("{message}")]
    InvalidScript { message: String },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Syntax error in {} at line {line}, column {column}: {kind}", display_name(.name.as_deref()))]
pub struct SyntaxError {
    pub name: Option<String>,
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: SyntaxErrorKind,
}

impl SyntaxError {
    pub(crate) const fn new(line: usize, column: usize, kind: SyntaxErrorKind) -> Self {
        Self {
            name: None,
            line,
            column,
            kind,
        }
    }

    pub(crate) fn with_name(mut self, name: Option<&str>) -> Self {
        self.name = name.map(str::to_owned);
        self
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum EvalErrorKind {
    #[error("unsupported operand types for '{op}': {left} and {right}")]
    TypeMismatch {
        op: String,
        left: String,
        right: String,
    },
    #[error("'{function}' expected {expected}, found {found}")]
    InvalidArgument {
        function: String,
        expected: String,
        found: String,
    },
    #[error("'{function}' takes {expected} argument(s), {found} given")]
    ArgumentCount {
        function: String,
        expected: String,
        found: usize,
    },
    #[error("unsupported operand type for '{op}': {ty}")]
    InvalidOperand { op: String, ty: String },
    #[error("unknown function '{function}'")]
    UnknownFunction { function: String },
    #[error("value of type {ty} is not iterable")]
    NotIterable { ty: String },
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("key '{key}' not found")]
    MissingKey { key: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow in '{op}'")]
    Overflow { op: String },
    #[error("'{keyword}' outside of a loop")]
    LoopControlOutsideLoop { keyword: String },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum BlockplateError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    /// A name was read that is bound neither by the context nor by the template.
    #[error("Undefined variable '{variable_name}' while rendering {}", display_name(.template_name.as_deref()))]
    UndefinedVariable {
        variable_name: String,
        template_name: Option<String>,
        /// Generated program text of the failing template.
        program: String,
    },
    /// The embedded statements failed at render time.
    #[error("Evaluation error while rendering {}: {kind}", display_name(.template_name.as_deref()))]
    Evaluation {
        #[source]
        kind: EvalErrorKind,
        template_name: Option<String>,
        /// Generated program text of the failing template.
        program: String,
    },
}

impl BlockplateError {
    /// The generated program text attached to a render-time error.
    pub fn program(&self) -> Option<&str> {
        match self {
            Self::Syntax(_) => None,
            Self::UndefinedVariable { program, .. } | Self::Evaluation { program, .. } => {
                Some(program)
            }
        }
    }
}

fn display_name(name: Option<&str>) -> String {
    name.map_or_else(|| "<anonymous>".to_owned(), |n| format!("'{n}'"))
}
