use std::{collections::BTreeSet, fmt};

use crate::{
    error::{SyntaxError, SyntaxErrorKind},
    script::{self, AssignOp, Expr, Header, ScriptError, Stmt},
    tree::{Part, PartId, PartTree, Span},
};

/// The compiled form of a template: script statements that write the
/// rendered text through `emit_literal` and `emit_value`.
///
/// `Display` prints the program text with four spaces of indentation per
/// nesting level.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub(crate) stmts: Vec<Stmt>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        script::write_block(f, &self.stmts, 0)
    }
}

/// Translates a position inside a block's code to template coordinates.
const fn locate(span: Span, err: &ScriptError) -> (usize, usize) {
    if err.line == 1 {
        (span.line, span.column + err.column - 1)
    } else {
        (span.line + err.line - 1, err.column)
    }
}

fn invalid_script(span: Span, err: ScriptError) -> SyntaxError {
    let (line, column) = locate(span, &err);
    SyntaxError::new(
        line,
        column,
        SyntaxErrorKind::InvalidScript {
            message: err.message,
        },
    )
}

fn malformed_header(header: &str, span: Span, err: ScriptError) -> SyntaxError {
    let (line, column) = locate(span, &err);
    SyntaxError::new(
        line,
        column,
        SyntaxErrorKind::MalformedHeader {
            header: header.trim().to_owned(),
            reason: err.message,
        },
    )
}

type Branches = Vec<(Expr, Vec<Stmt>)>;

/// The `if` statement an `elif` or `else` block attaches to. It must be the
/// last statement generated, produced by the immediately preceding sibling.
fn chained_if<'s>(
    out: &'s mut [Stmt],
    chain_open: bool,
    header: &str,
    span: Span,
) -> Result<(&'s mut Branches, &'s mut Option<Vec<Stmt>>), SyntaxError> {
    match out.last_mut() {
        Some(Stmt::If {
            branches,
            otherwise,
        }) if chain_open => Ok((branches, otherwise)),
        Some(_) | None => Err(SyntaxError::new(
            span.line,
            span.column,
            SyntaxErrorKind::OrphanBranch {
                header: header.trim().to_owned(),
            },
        )),
    }
}

struct Generator<'t, 'a> {
    tree: &'t PartTree<'a>,
}

impl Generator<'_, '_> {
    fn generate_block(&self, ids: &[PartId]) -> Result<Vec<Stmt>, SyntaxError> {
        let mut out = Vec::new();
        // Set while the previous sibling was an `if` or `elif` partial block.
        let mut chain_open = false;

        for &id in ids {
            let Some(part) = self.tree.get(id) else {
                continue;
            };
            let mut continues_chain = false;

            match part {
                Part::Literal { text } => out.push(Stmt::EmitLiteral((*text).to_owned())),
                Part::Statement { code, span } => {
                    let stmts =
                        script::parse_statements(code).map_err(|e| invalid_script(*span, e))?;
                    out.extend(stmts);
                }
                Part::Variable { expr, span } => {
                    let expr =
                        script::parse_expression(expr).map_err(|e| invalid_script(*span, e))?;
                    out.push(Stmt::EmitValue(expr));
                }
                Part::Partial {
                    header,
                    span,
                    children,
                } => {
                    let parsed = script::parse_header(header)
                        .map_err(|e| malformed_header(header, *span, e))?;
                    let body = self.generate_block(children)?;
                    match parsed {
                        Header::For { var, iterable } => out.push(Stmt::For {
                            var,
                            iterable,
                            body,
                        }),
                        Header::While(cond) => out.push(Stmt::While { cond, body }),
                        Header::If(cond) => {
                            out.push(Stmt::If {
                                branches: vec![(cond, body)],
                                otherwise: None,
                            });
                            continues_chain = true;
                        }
                        Header::Elif(cond) => {
                            let (branches, _) = chained_if(&mut out, chain_open, header, *span)?;
                            branches.push((cond, body));
                            continues_chain = true;
                        }
                        Header::Else => {
                            let (_, otherwise) = chained_if(&mut out, chain_open, header, *span)?;
                            *otherwise = Some(body);
                        }
                    }
                }
            }

            chain_open = continues_chain;
        }

        Ok(out)
    }
}

/// Generates the program for a part tree, depth first in sibling order.
pub(crate) fn generate(tree: &PartTree<'_>) -> Result<Program, SyntaxError> {
    let stmts = Generator { tree }.generate_block(tree.root())?;
    trace!("generated {} top-level statements", stmts.len());
    Ok(Program { stmts })
}

/// Collects names read before the program itself binds them.
#[derive(Default)]
struct FreeVariables<'p> {
    scopes: Vec<BTreeSet<&'p str>>,
    found: Vec<&'p str>,
}

impl<'p> FreeVariables<'p> {
    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn bind(&mut self, name: &'p str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name);
        }
    }

    fn read(&mut self, name: &'p str) {
        if !self.is_bound(name) && !self.found.contains(&name) {
            self.found.push(name);
        }
    }

    fn block(&mut self, stmts: &'p [Stmt], bound: Option<&'p str>) {
        self.scopes.push(bound.into_iter().collect());
        for stmt in stmts {
            self.stmt(stmt);
        }
        self.scopes.pop();
    }

    fn stmt(&mut self, stmt: &'p Stmt) {
        match stmt {
            Stmt::EmitLiteral(_) | Stmt::Break | Stmt::Continue => {}
            Stmt::EmitValue(expr) | Stmt::Expr(expr) => self.expr(expr),
            Stmt::Let { name, value } => {
                self.expr(value);
                self.bind(name);
            }
            Stmt::Assign { name, op, value } => {
                self.expr(value);
                if *op != AssignOp::Set {
                    self.read(name);
                }
                if !self.is_bound(name) {
                    self.bind(name);
                }
            }
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    self.expr(cond);
                    self.block(body, None);
                }
                if let Some(body) = otherwise {
                    self.block(body, None);
                }
            }
            Stmt::For {
                var,
                iterable,
                body,
            } => {
                self.expr(iterable);
                self.block(body, Some(var.as_str()));
            }
            Stmt::While { cond, body } => {
                self.expr(cond);
                self.block(body, None);
            }
        }
    }

    fn expr(&mut self, expr: &'p Expr) {
        match expr {
            Expr::Literal(_) => {}
            Expr::Var(name) => self.read(name),
            Expr::List(items) => items.iter().for_each(|item| self.expr(item)),
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Call { function, args } => {
                // `default` tolerates an unbound first argument.
                let skip = usize::from(
                    function == "default" && matches!(args.first(), Some(Expr::Var(_))),
                );
                args.iter().skip(skip).for_each(|arg| self.expr(arg));
            }
            Expr::Index { target, index } => {
                self.expr(target);
                self.expr(index);
            }
            Expr::Attr { target, .. } => self.expr(target),
        }
    }
}

impl Program {
    /// Names the program reads without binding them first, in order of first
    /// use.
    pub(crate) fn free_variables(&self) -> Vec<&str> {
        let mut walker = FreeVariables::default();
        walker.block(&self.stmts, None);
        walker.found
    }
}
