use std::{cmp::Ordering, collections::BTreeMap};

use crate::{
    Context, Value, builtins,
    codegen::Program,
    error::EvalErrorKind,
    script::{AssignOp, BinaryOp, Expr, Stmt, UnaryOp},
    value::MAX_SEQUENCE_LEN,
};

/// Why a render stopped.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Fault {
    /// A name bound neither by the template nor by the context was read.
    Undefined(String),
    Eval(EvalErrorKind),
}

impl From<EvalErrorKind> for Fault {
    fn from(kind: EvalErrorKind) -> Self {
        Self::Eval(kind)
    }
}

type ExecResult<T> = Result<T, Fault>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

struct Executor<'c> {
    context: &'c Context,
    /// Bindings made by the template, innermost last. The first scope holds
    /// top-level names, including those shadowing the context.
    scopes: Vec<BTreeMap<String, Value>>,
    output: String,
    loop_depth: usize,
}

/// Runs `program` against `context` and returns the text it emitted.
pub(crate) fn execute(program: &Program, context: &Context) -> ExecResult<String> {
    let mut executor = Executor {
        context,
        scopes: vec![BTreeMap::new()],
        output: String::new(),
        loop_depth: 0,
    };
    executor.exec_block(&program.stmts)?;
    Ok(executor.output)
}

impl Executor<'_> {
    fn lookup(&self, name: &str) -> ExecResult<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.context.get(name))
            .ok_or_else(|| Fault::Undefined(name.to_owned()))
    }

    fn declare(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned(), value);
        }
    }

    /// Updates the nearest binding of `name`. A name only the context holds is
    /// shadowed at the top level; an unknown name is declared in the current
    /// scope.
    fn assign(&mut self, name: &str, value: Value) {
        if let Some(slot) = self
            .scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
        {
            *slot = value;
        } else if self.context.contains(name) {
            if let Some(top) = self.scopes.first_mut() {
                top.insert(name.to_owned(), value);
            }
        } else {
            self.declare(name, value);
        }
    }

    fn emit(&mut self, value: &Value) {
        match value {
            Value::String(s) => self.output.push_str(s),
            Value::None
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::List(_)
            | Value::Map(_) => self.output.push_str(&value.to_string()),
        }
    }

    // --- Statements ---

    fn exec_block(&mut self, stmts: &[Stmt]) -> ExecResult<Flow> {
        for stmt in stmts {
            let flow = self.exec(stmt)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    /// Runs `stmts` in a fresh scope, optionally holding one binding.
    fn exec_scoped(&mut self, stmts: &[Stmt], binding: Option<(&str, Value)>) -> ExecResult<Flow> {
        let mut scope = BTreeMap::new();
        if let Some((name, value)) = binding {
            scope.insert(name.to_owned(), value);
        }
        self.scopes.push(scope);
        let flow = self.exec_block(stmts);
        self.scopes.pop();
        flow
    }

    fn exec(&mut self, stmt: &Stmt) -> ExecResult<Flow> {
        match stmt {
            Stmt::EmitLiteral(text) => self.output.push_str(text),
            Stmt::EmitValue(expr) => {
                let value = self.eval(expr)?;
                self.emit(&value);
            }
            Stmt::Let { name, value } => {
                let value = self.eval(value)?;
                self.declare(name, value);
            }
            Stmt::Assign { name, op, value } => {
                let rhs = self.eval(value)?;
                let value = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => binary(BinaryOp::Add, self.lookup(name)?, &rhs)?,
                    AssignOp::Sub => binary(BinaryOp::Sub, self.lookup(name)?, &rhs)?,
                };
                self.assign(name, value);
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.is_truthy() {
                        return self.exec_scoped(body, None);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_scoped(body, None);
                }
            }
            Stmt::For {
                var,
                iterable,
                body,
            } => {
                let items = iterate(self.eval(iterable)?)?;
                self.loop_depth += 1;
                let result = self.run_for(var, items, body);
                self.loop_depth -= 1;
                result?;
            }
            Stmt::While { cond, body } => {
                self.loop_depth += 1;
                let result = self.run_while(cond, body);
                self.loop_depth -= 1;
                result?;
            }
            Stmt::Break => return self.loop_control(Flow::Break, "break"),
            Stmt::Continue => return self.loop_control(Flow::Continue, "continue"),
        }
        Ok(Flow::Normal)
    }

    fn run_for(&mut self, var: &str, items: Vec<Value>, body: &[Stmt]) -> ExecResult<()> {
        for item in items {
            if self.exec_scoped(body, Some((var, item)))? == Flow::Break {
                break;
            }
        }
        Ok(())
    }

    fn run_while(&mut self, cond: &Expr, body: &[Stmt]) -> ExecResult<()> {
        while self.eval(cond)?.is_truthy() {
            if self.exec_scoped(body, None)? == Flow::Break {
                break;
            }
        }
        Ok(())
    }

    fn loop_control(&self, flow: Flow, keyword: &str) -> ExecResult<Flow> {
        if self.loop_depth == 0 {
            return Err(EvalErrorKind::LoopControlOutsideLoop {
                keyword: keyword.to_owned(),
            }
            .into());
        }
        Ok(flow)
    }

    // --- Expressions ---

    fn eval(&mut self, expr: &Expr) -> ExecResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::List(items) => items.iter().map(|item| self.eval(item)).collect(),
            Expr::Var(name) => self.lookup(name).cloned(),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(unary(*op, &value)?)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                // `and` and `or` short-circuit and yield one of their operands.
                match op {
                    BinaryOp::And if !left.is_truthy() => Ok(left),
                    BinaryOp::Or if left.is_truthy() => Ok(left),
                    BinaryOp::And | BinaryOp::Or => self.eval(right),
                    BinaryOp::Eq
                    | BinaryOp::Ne
                    | BinaryOp::Lt
                    | BinaryOp::Le
                    | BinaryOp::Gt
                    | BinaryOp::Ge
                    | BinaryOp::In
                    | BinaryOp::Add
                    | BinaryOp::Sub
                    | BinaryOp::Mul
                    | BinaryOp::Div
                    | BinaryOp::Rem => {
                        let right = self.eval(right)?;
                        Ok(binary(*op, &left, &right)?)
                    }
                }
            }
            Expr::Call { function, args } => self.call(function, args),
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                Ok(index_value(&target, &index)?)
            }
            Expr::Attr { target, name } => {
                let target = self.eval(target)?;
                Ok(attribute(&target, name)?)
            }
        }
    }

    fn eval_all(&mut self, args: &[Expr]) -> ExecResult<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn call(&mut self, function: &str, args: &[Expr]) -> ExecResult<Value> {
        match function {
            "emit" | "write" => {
                for arg in args {
                    let value = self.eval(arg)?;
                    self.emit(&value);
                }
                Ok(Value::None)
            }
            "emit_value" | "emit_literal" => {
                let [arg] = args else {
                    return Err(EvalErrorKind::ArgumentCount {
                        function: function.to_owned(),
                        expected: "1".to_owned(),
                        found: args.len(),
                    }
                    .into());
                };
                let value = self.eval(arg)?;
                if function == "emit_literal" && value.as_str().is_none() {
                    return Err(EvalErrorKind::InvalidArgument {
                        function: function.to_owned(),
                        expected: "a string".to_owned(),
                        found: value.type_name().to_owned(),
                    }
                    .into());
                }
                self.emit(&value);
                Ok(Value::None)
            }
            "default" => {
                let mut values = Vec::with_capacity(args.len());
                if let Some((first, rest)) = args.split_first() {
                    // A missing name or key falls back like `none`.
                    let value = match self.eval(first) {
                        Ok(value) => value,
                        Err(Fault::Undefined(_) | Fault::Eval(EvalErrorKind::MissingKey { .. })) => {
                            Value::None
                        }
                        Err(fault) => return Err(fault),
                    };
                    values.push(value);
                    values.extend(self.eval_all(rest)?);
                }
                Ok(builtins::call(function, &values)?)
            }
            _ => {
                let values = self.eval_all(args)?;
                Ok(builtins::call(function, &values)?)
            }
        }
    }
}

fn iterate(value: Value) -> Result<Vec<Value>, EvalErrorKind> {
    match value {
        Value::List(items) => Ok(items),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        Value::Map(map) => Ok(map.into_keys().map(Value::String).collect()),
        Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) => {
            Err(EvalErrorKind::NotIterable {
                ty: value.type_name().to_owned(),
            })
        }
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> EvalErrorKind {
    EvalErrorKind::TypeMismatch {
        op: op.symbol().to_owned(),
        left: left.type_name().to_owned(),
        right: right.type_name().to_owned(),
    }
}

fn invalid_operand(op: &str, value: &Value) -> EvalErrorKind {
    EvalErrorKind::InvalidOperand {
        op: op.to_owned(),
        ty: value.type_name().to_owned(),
    }
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value, EvalErrorKind> {
    match (op, value) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| EvalErrorKind::Overflow { op: "-".to_owned() }),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Neg, _) => Err(invalid_operand("-", value)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            a.as_float() == b.as_float()
        }
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .zip(b)
                    .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
        }
        _ => a == b,
    }
}

fn compare(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    accept: fn(Ordering) -> bool,
) -> Result<Value, EvalErrorKind> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => return Err(mismatch(op, left, right)),
        },
    };
    // NaN compares false with everything.
    Ok(Value::Bool(ordering.is_some_and(accept)))
}

fn contains(needle: &Value, haystack: &Value) -> Result<bool, EvalErrorKind> {
    match haystack {
        Value::List(items) => Ok(items.iter().any(|item| values_equal(needle, item))),
        Value::String(s) => needle
            .as_str()
            .map(|sub| s.contains(sub))
            .ok_or_else(|| mismatch(BinaryOp::In, needle, haystack)),
        Value::Map(map) => needle
            .as_str()
            .map(|key| map.contains_key(key))
            .ok_or_else(|| mismatch(BinaryOp::In, needle, haystack)),
        Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) => {
            Err(mismatch(BinaryOp::In, needle, haystack))
        }
    }
}

fn checked(op: BinaryOp, result: Option<i64>) -> Result<Value, EvalErrorKind> {
    result.map(Value::Int).ok_or_else(|| EvalErrorKind::Overflow {
        op: op.symbol().to_owned(),
    })
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Value, EvalErrorKind> {
    match op {
        BinaryOp::Add => checked(op, a.checked_add(b)),
        BinaryOp::Sub => checked(op, a.checked_sub(b)),
        BinaryOp::Mul => checked(op, a.checked_mul(b)),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => Err(EvalErrorKind::DivisionByZero),
        BinaryOp::Div => checked(op, a.checked_div(b)),
        BinaryOp::Rem => checked(op, a.checked_rem(b)),
        BinaryOp::Or
        | BinaryOp::And
        | BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge
        | BinaryOp::In => Err(mismatch(op, &Value::Int(a), &Value::Int(b))),
    }
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> Result<Value, EvalErrorKind> {
    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => Err(EvalErrorKind::DivisionByZero),
        BinaryOp::Div => Ok(Value::Float(a / b)),
        BinaryOp::Rem => Ok(Value::Float(a % b)),
        BinaryOp::Or
        | BinaryOp::And
        | BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge
        | BinaryOp::In => Err(mismatch(op, &Value::Float(a), &Value::Float(b))),
    }
}

/// `s` repeated `n` times; a negative count gives the empty string.
fn repeat(op: BinaryOp, s: &str, n: i64) -> Result<Value, EvalErrorKind> {
    let times = usize::try_from(n).unwrap_or(0);
    s.len()
        .checked_mul(times)
        .filter(|len| *len <= MAX_SEQUENCE_LEN)
        .map(|_| Value::String(s.repeat(times)))
        .ok_or_else(|| EvalErrorKind::Overflow {
            op: op.symbol().to_owned(),
        })
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalErrorKind> {
    match (op, left, right) {
        (_, Value::Int(a), Value::Int(b)) => int_arithmetic(op, *a, *b),
        (BinaryOp::Add, Value::String(a), Value::String(b)) => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Value::String(joined))
        }
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (BinaryOp::Mul, Value::String(s), Value::Int(n))
        | (BinaryOp::Mul, Value::Int(n), Value::String(s)) => repeat(op, s, *n),
        _ => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => float_arithmetic(op, a, b),
            _ => Err(mismatch(op, left, right)),
        },
    }
}

/// Applies a binary operator to two evaluated operands.
fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalErrorKind> {
    match op {
        BinaryOp::Or if left.is_truthy() => Ok(left.clone()),
        BinaryOp::And if !left.is_truthy() => Ok(left.clone()),
        BinaryOp::Or | BinaryOp::And => Ok(right.clone()),
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt => compare(op, left, right, Ordering::is_lt),
        BinaryOp::Le => compare(op, left, right, Ordering::is_le),
        BinaryOp::Gt => compare(op, left, right, Ordering::is_gt),
        BinaryOp::Ge => compare(op, left, right, Ordering::is_ge),
        BinaryOp::In => contains(left, right).map(Value::Bool),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, left, right)
        }
    }
}

/// Resolves a possibly negative index against `len`.
fn position(index: i64, len: usize) -> Option<usize> {
    if index < 0 {
        len.checked_sub(usize::try_from(index.unsigned_abs()).ok()?)
    } else {
        usize::try_from(index).ok().filter(|&i| i < len)
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value, EvalErrorKind> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => position(*i, items.len())
            .and_then(|p| items.get(p))
            .cloned()
            .ok_or(EvalErrorKind::IndexOutOfRange {
                index: *i,
                len: items.len(),
            }),
        (Value::String(s), Value::Int(i)) => {
            let len = s.chars().count();
            position(*i, len)
                .and_then(|p| s.chars().nth(p))
                .map(|c| Value::String(c.to_string()))
                .ok_or(EvalErrorKind::IndexOutOfRange { index: *i, len })
        }
        (Value::Map(map), Value::String(key)) => {
            map.get(key)
                .cloned()
                .ok_or_else(|| EvalErrorKind::MissingKey { key: key.clone() })
        }
        _ => Err(EvalErrorKind::TypeMismatch {
            op: "[]".to_owned(),
            left: target.type_name().to_owned(),
            right: index.type_name().to_owned(),
        }),
    }
}

fn attribute(target: &Value, name: &str) -> Result<Value, EvalErrorKind> {
    match target {
        Value::Map(map) => map
            .get(name)
            .cloned()
            .ok_or_else(|| EvalErrorKind::MissingKey {
                key: name.to_owned(),
            }),
        Value::None
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::String(_)
        | Value::List(_) => Err(invalid_operand(&format!(".{name}"), target)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codegen::generate, lexer::tokenize, syntax::Syntax, tree::build};

    fn run(input: &str, context: &Context) -> ExecResult<String> {
        let syntax = Syntax::default();
        let tokens = tokenize(input, &syntax).unwrap();
        let tree = build(input, tokens, &syntax).unwrap();
        let program = generate(&tree).unwrap();
        execute(&program, context)
    }

    fn render(input: &str) -> String {
        run(input, &Context::new()).unwrap()
    }

    fn eval_error(input: &str) -> EvalErrorKind {
        match run(input, &Context::new()) {
            Err(Fault::Eval(kind)) => kind,
            other => panic!("expected an evaluation error, got {other:?}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_arithmetic() {
        assert_eq!(render("{{ 1 + 2 * 3 }}"), "7");
        assert_eq!(render("{{ (1 + 2) * 3 }}"), "9");
        assert_eq!(render("{{ 7 / 2 }} {{ 7 % 4 }}"), "3 3");
        assert_eq!(render("{{ 7.0 / 2 }}"), "3.5");
        assert_eq!(render("{{ -2 - -3 }}"), "1");
        assert_eq!(render("{{ 'ab' * 2 }}"), "abab");
        assert_eq!(render("{{ 'a' + 'b' }}"), "ab");
        assert_eq!(render("{{ [1] + [2] }}"), "[1, 2]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_arithmetic_errors() {
        assert_eq!(eval_error("{{ 1 / 0 }}"), EvalErrorKind::DivisionByZero);
        assert_eq!(eval_error("{{ 1.5 % 0 }}"), EvalErrorKind::DivisionByZero);
        assert_eq!(
            eval_error("{{ 9223372036854775807 + 1 }}"),
            EvalErrorKind::Overflow { op: "+".to_owned() }
        );
        assert_eq!(
            eval_error("{{ 'a' + 1 }}"),
            EvalErrorKind::TypeMismatch {
                op: "+".to_owned(),
                left: "string".to_owned(),
                right: "int".to_owned()
            }
        );
        assert!(matches!(
            eval_error("{{ -'a' }}"),
            EvalErrorKind::InvalidOperand { .. }
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_repeat_is_bounded() {
        assert_eq!(render("{{ 3 * 'ab' }}{{ 'x' * -1 }}"), "ababab");
        assert_eq!(
            eval_error("{{ 'ab' * 9223372036854775807 }}"),
            EvalErrorKind::Overflow { op: "*".to_owned() }
        );
        assert_eq!(
            eval_error("{{ 'a' * 2000000 }}"),
            EvalErrorKind::Overflow { op: "*".to_owned() }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comparisons() {
        assert_eq!(render("{{ 1 == 1.0 }} {{ 2 > 1.5 }} {{ 'a' < 'b' }}"), "true true true");
        assert_eq!(render("{{ [1, 'x'] == [1, 'x'] }} {{ none != 0 }}"), "true true");
        assert_eq!(render("{{ 2 in [1, 2] }} {{ 'el' in 'hello' }} {{ 3 not in [3] }}"), "true true false");
        assert!(matches!(
            eval_error("{{ 1 < 'a' }}"),
            EvalErrorKind::TypeMismatch { .. }
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_logic_yields_operands() {
        assert_eq!(render("{{ none or 'x' }}|{{ 0 and 1 }}|{{ 2 and 3 }}"), "x|0|3");
        assert_eq!(render("{{ not 0 }} {{ !'a' }}"), "true false");
        // The right operand is not evaluated when the left decides.
        assert_eq!(render("{{ true or missing }}"), "true");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_loop_scope() {
        assert_eq!(
            render("/*: x = 0 :*///: for i in range(3)\n/*: let y = i; x += i :*///!{{x}}"),
            "3"
        );
        assert_eq!(
            run("//: for i in range(2)\n/*: let y = i :*///!{{y}}", &Context::new()),
            Err(Fault::Undefined("y".to_owned()))
        );
        assert_eq!(
            run("//: for i in range(2)\n//!{{i}}", &Context::new()),
            Err(Fault::Undefined("i".to_owned()))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_break_and_continue() {
        assert_eq!(
            render(
                "//: for i in range(10)\n/*: if i == 3 { break } elif i % 2 == 0 { continue } :*/{{i}}//!"
            ),
            "1"
        );
        assert_eq!(
            eval_error("/*: break :*/"),
            EvalErrorKind::LoopControlOutsideLoop {
                keyword: "break".to_owned()
            }
        );
        assert_eq!(
            eval_error("//: if true\n/*: continue :*///!"),
            EvalErrorKind::LoopControlOutsideLoop {
                keyword: "continue".to_owned()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_while() {
        assert_eq!(
            render("/*: n = 3 :*///: while n > 0\n{{n}}/*: n -= 1 :*///!"),
            "321"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_assignment_shadows_context() {
        let mut context = Context::new();
        context.insert("a", 1);
        assert_eq!(
            run("//: if true\n/*: a = 5 :*///!{{a}}", &context),
            Ok("5".to_owned())
        );
        assert_eq!(context.get("a"), Some(&Value::Int(1)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_emit_functions() {
        assert_eq!(render("/*: emit('a', 1, none); write('b') :*/"), "a1b");
        assert_eq!(render("/*: emit_value([1]); emit_literal('!') :*/"), "[1]!");
        assert!(matches!(
            eval_error("/*: emit_literal(1) :*/"),
            EvalErrorKind::InvalidArgument { .. }
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_indexing() {
        let mut context = Context::new();
        context
            .insert("xs", vec![10, 20, 30])
            .insert("user", BTreeMap::from([("name", "ann")]));
        let render = |input| run(input, &context);
        assert_eq!(render("{{xs[0]}} {{xs[-1]}} {{xs.1}}"), Ok("10 30 20".to_owned()));
        assert_eq!(render("{{user.name}} {{user['name']}}"), Ok("ann ann".to_owned()));
        assert_eq!(render("{{ 'héllo'[1] }}"), Ok("é".to_owned()));
        assert_eq!(
            render("{{xs[3]}}"),
            Err(Fault::Eval(EvalErrorKind::IndexOutOfRange { index: 3, len: 3 }))
        );
        assert_eq!(
            render("{{user.age}}"),
            Err(Fault::Eval(EvalErrorKind::MissingKey {
                key: "age".to_owned()
            }))
        );
        assert!(matches!(
            render("{{xs.name}}"),
            Err(Fault::Eval(EvalErrorKind::InvalidOperand { .. }))
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_default_catches_missing_values() {
        let mut context = Context::new();
        context.insert("user", BTreeMap::from([("name", "ann")]));
        assert_eq!(
            run("{{ missing | default('d') }} {{ user.age | default(0) }} {{ user.name | default('x') }}", &context),
            Ok("d 0 ann".to_owned())
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_iteration_kinds() {
        assert_eq!(render("//: for c in 'ab'\n[{{c}}]//!"), "[a][b]");
        let mut context = Context::new();
        context.insert("m", BTreeMap::from([("b", 2), ("a", 1)]));
        assert_eq!(
            run("//: for k in m\n{{k}}={{m[k]}};//!", &context),
            Ok("a=1;b=2;".to_owned())
        );
        assert_eq!(
            eval_error("//: for x in 5\n//!"),
            EvalErrorKind::NotIterable {
                ty: "int".to_owned()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_functions_and_methods() {
        assert_eq!(render("{{ 'a b' | upper }}"), "A B");
        assert_eq!(render("{{ ', '.join(['x', 'y']) }}"), "x, y");
        assert_eq!(render("{{ 'a,b'.split(',') | len }}"), "2");
        assert_eq!(
            eval_error("{{ shout('x') }}"),
            EvalErrorKind::UnknownFunction {
                function: "shout".to_owned()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_undefined_variable() {
        assert_eq!(
            run("before {{ missing }}", &Context::new()),
            Err(Fault::Undefined("missing".to_owned()))
        );
    }
}
