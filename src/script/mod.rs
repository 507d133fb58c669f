//! The statement and expression language embedded in templates.
//!
//! Statement blocks, partial block headers and variable markers all contain
//! code in this language. It is parsed once at compile time into [`Stmt`] and
//! [`Expr`] trees which the executor interprets.

mod parser;

use std::fmt::{self, Write};

pub(crate) use parser::{Header, ScriptError, parse_expression, parse_header, parse_statements};

use crate::Value;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        }
    }

    /// Binding strength; higher binds tighter.
    const fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::In => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Rem => 6,
        }
    }
}

const NOT_PRECEDENCE: u8 = 3;
const UNARY_PRECEDENCE: u8 = 7;
const POSTFIX_PRECEDENCE: u8 = 8;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Var(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Calls a built-in function. Filters (`x | f`) and methods (`x.f()`)
    /// are calls with the receiver as first argument.
    Call {
        function: String,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Attr {
        target: Box<Expr>,
        name: String,
    },
}

impl Expr {
    const fn precedence(&self) -> u8 {
        match self {
            Self::Binary { op, .. } => op.precedence(),
            Self::Unary {
                op: UnaryOp::Not, ..
            } => NOT_PRECEDENCE,
            Self::Unary {
                op: UnaryOp::Neg, ..
            } => UNARY_PRECEDENCE,
            Self::Literal(_)
            | Self::List(_)
            | Self::Var(_)
            | Self::Call { .. }
            | Self::Index { .. }
            | Self::Attr { .. } => POSTFIX_PRECEDENCE,
        }
    }

    /// Writes `self`, parenthesised when it binds looser than `min`.
    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

fn fmt_literal(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::None => f.write_str("none"),
        Value::String(s) => write!(f, "{s:?}"),
        Value::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{x:.1}"),
        Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::List(_) | Value::Map(_) => {
            write!(f, "{value}")
        }
    }
}

fn fmt_args(args: &[Expr], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => fmt_literal(value, f),
            Self::List(items) => {
                f.write_str("[")?;
                fmt_args(items, f)?;
                f.write_str("]")
            }
            Self::Var(name) => f.write_str(name),
            Self::Unary { op, operand } => {
                let precedence = self.precedence();
                match op {
                    UnaryOp::Neg => f.write_str("-")?,
                    UnaryOp::Not => f.write_str("not ")?,
                }
                operand.fmt_operand(f, precedence)
            }
            Self::Binary { op, left, right } => {
                let precedence = op.precedence();
                left.fmt_operand(f, precedence)?;
                write!(f, " {} ", op.symbol())?;
                // Operators are left associative.
                right.fmt_operand(f, precedence + 1)
            }
            Self::Call { function, args } => {
                write!(f, "{function}(")?;
                fmt_args(args, f)?;
                f.write_str(")")
            }
            Self::Index { target, index } => {
                target.fmt_operand(f, POSTFIX_PRECEDENCE)?;
                write!(f, "[{index}]")
            }
            Self::Attr { target, name } => {
                target.fmt_operand(f, POSTFIX_PRECEDENCE)?;
                write!(f, ".{name}")
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum AssignOp {
    Set,
    Add,
    Sub,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    /// Appends template text to the output.
    EmitLiteral(String),
    /// Appends the text of a value to the output.
    EmitValue(Expr),
    /// Declares a variable in the current scope.
    Let {
        name: String,
        value: Expr,
    },
    /// Updates the nearest binding of `name`, declaring it if there is none.
    Assign {
        name: String,
        op: AssignOp,
        value: Expr,
    },
    Expr(Expr),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
    For {
        var: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
}

pub(crate) const INDENT: &str = "    ";

fn write_indent<W: Write>(out: &mut W, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        out.write_str(INDENT)?;
    }
    Ok(())
}

/// Writes `body` one level deeper than `depth`, wrapped in braces.
fn write_body<W: Write>(out: &mut W, body: &[Stmt], depth: usize) -> fmt::Result {
    out.write_str(" {\n")?;
    write_block(out, body, depth + 1)?;
    write_indent(out, depth)?;
    out.write_str("}")
}

/// Writes `stmts` as program text, one statement per line, indented by one
/// unit per nesting level.
pub(crate) fn write_block<W: Write>(out: &mut W, stmts: &[Stmt], depth: usize) -> fmt::Result {
    for stmt in stmts {
        write_indent(out, depth)?;
        match stmt {
            Stmt::EmitLiteral(text) => write!(out, "emit_literal({text:?})")?,
            Stmt::EmitValue(expr) => write!(out, "emit_value({expr})")?,
            Stmt::Let { name, value } => write!(out, "let {name} = {value}")?,
            Stmt::Assign { name, op, value } => {
                let op = match op {
                    AssignOp::Set => "=",
                    AssignOp::Add => "+=",
                    AssignOp::Sub => "-=",
                };
                write!(out, "{name} {op} {value}")?;
            }
            Stmt::Expr(expr) => write!(out, "{expr}")?,
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (i, (cond, body)) in branches.iter().enumerate() {
                    if i == 0 {
                        write!(out, "if {cond}")?;
                    } else {
                        write!(out, " elif {cond}")?;
                    }
                    write_body(out, body, depth)?;
                }
                if let Some(body) = otherwise {
                    out.write_str(" else")?;
                    write_body(out, body, depth)?;
                }
            }
            Stmt::For {
                var,
                iterable,
                body,
            } => {
                write!(out, "for {var} in {iterable}")?;
                write_body(out, body, depth)?;
            }
            Stmt::While { cond, body } => {
                write!(out, "while {cond}")?;
                write_body(out, body, depth)?;
            }
            Stmt::Break => out.write_str("break")?,
            Stmt::Continue => out.write_str("continue")?,
        }
        out.write_str("\n")?;
    }
    Ok(())
}
