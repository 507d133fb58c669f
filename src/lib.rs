//! A compiler for templates that embed code in ordinary text.
//!
//! Three kinds of blocks can appear anywhere in the text:
//!
//! - statement blocks `/*: ... :*/` run code for its side effects,
//! - partial blocks `//: header` ... `//!` wrap everything up to the close
//!   marker in a `for`, `if` or `while` statement,
//! - variables `{{ ... }}` write the value of an expression.
//!
//! Everything else is copied to the output verbatim.
//!
//! ```
//! use blockplate::{Context, compile};
//!
//! let template = compile(
//!     "/*: let total = 0 :*/\
//!      //: for item in items\n- {{ item | upper }}\n/*: total += 1 :*///!\
//!      {{ total }} items",
//! )
//! .unwrap();
//!
//! let mut context = Context::new();
//! context.insert("items", vec!["tea", "milk"]);
//! assert_eq!(template.render(&context).unwrap(), "- TEA\n- MILK\n2 items");
//! ```

#[macro_use]
mod tracing_macros;

mod builtins;
mod codegen;
mod context;
mod error;
mod exec;
mod lexer;
mod script;
mod syntax;
mod template;
mod tree;
mod value;

// Public exports.
pub use codegen::Program;
pub use context::Context;
pub use error::{
    BlockplateError, BlockplateResult, EvalErrorKind, SyntaxError, SyntaxErrorKind,
};
pub use syntax::{Syntax, SyntaxBuilder};
pub use template::{Template, TemplateBuilder};
pub use value::Value;

/// Compiles an anonymous template with the default syntax.
///
/// # Errors
///
/// Returns [`BlockplateError::Syntax`] if the template is malformed.
pub fn compile<S: Into<String>>(source: S) -> BlockplateResult<Template> {
    Template::new(source)
}
