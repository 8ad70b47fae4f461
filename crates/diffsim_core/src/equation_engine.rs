use crate::error::EvaluationError;
use crate::traits::{DynamicalSystem, Scalar};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

/// Name → value bindings used by scope-based evaluation.
pub type Scope = HashMap<String, f64>;

/// Built-in named constants. They are never reported as free symbols.
pub const CONSTANTS: [(&str, f64); 2] = [("pi", std::f64::consts::PI), ("e", std::f64::consts::E)];

/// Independent variables that derivatives may be taken with respect to.
pub const INDEPENDENT_VARIABLES: [&str; 2] = ["t", "x"];

fn constant_value(name: &str) -> Option<f64> {
    CONSTANTS
        .iter()
        .find(|(constant, _)| *constant == name)
        .map(|(_, value)| *value)
}

/// The scope key under which the `order`-th derivative of `var` is bound.
/// Order 0 is the variable itself; `derivative_key("y", 1) == "y'"`.
pub fn derivative_key(var: &str, order: usize) -> String {
    let mut key = String::with_capacity(var.len() + order);
    key.push_str(var);
    for _ in 0..order {
        key.push('\'');
    }
    key
}

/// Elementary functions understood by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Abs,
}

impl Function {
    pub const ALL: [Function; 7] = [
        Function::Sin,
        Function::Cos,
        Function::Tan,
        Function::Exp,
        Function::Log,
        Function::Sqrt,
        Function::Abs,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Exp => "exp",
            Function::Log => "log",
            Function::Sqrt => "sqrt",
            Function::Abs => "abs",
        }
    }

    fn apply<T: Scalar>(self, a: T) -> Result<T, EvaluationError> {
        match self {
            Function::Sin => Ok(a.sin()),
            Function::Cos => Ok(a.cos()),
            Function::Tan => Ok(a.tan()),
            Function::Exp => Ok(a.exp()),
            Function::Log => {
                if a <= T::zero() {
                    return Err(domain_error("log", a));
                }
                Ok(a.ln())
            }
            Function::Sqrt => {
                if a < T::zero() {
                    return Err(domain_error("sqrt", a));
                }
                Ok(a.sqrt())
            }
            Function::Abs => Ok(a.abs()),
        }
    }
}

fn domain_error<T: Scalar>(function: &'static str, argument: T) -> EvaluationError {
    EvaluationError::DomainError {
        function,
        argument: argument.to_f64().unwrap_or(f64::NAN),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn apply<T: Scalar>(self, a: T, b: T) -> Result<T, EvaluationError> {
        match self {
            BinaryOp::Add => Ok(a + b),
            BinaryOp::Sub => Ok(a - b),
            BinaryOp::Mul => Ok(a * b),
            BinaryOp::Div => {
                if b == T::zero() {
                    return Err(EvaluationError::DivisionByZero);
                }
                Ok(a / b)
            }
            BinaryOp::Pow => {
                if a < T::zero() && b.fract() != T::zero() {
                    return Err(domain_error("pow", a));
                }
                if a == T::zero() && b < T::zero() {
                    return Err(EvaluationError::DivisionByZero);
                }
                Ok(a.powf(b))
            }
        }
    }
}

/// OpCodes for the Stack-based Virtual Machine.
/// The VM operates on a stack of `Scalar` values (f64 or Dual).
#[derive(Debug, Clone, Copy)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the value of a state component (by index) onto the stack.
    LoadVar(usize),
    /// Pushes the value of a parameter (by index) onto the stack.
    LoadParam(usize),
    /// Pushes the current value of the independent variable.
    LoadTime,
    /// Pops top two values (b, a), pushes (a op b).
    Binary(BinaryOp),
    /// Pops top value (a), pushes -a.
    Neg,
    /// Pops top value (a), pushes f(a).
    Call(Function),
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Bytecode that simply forwards one state component.
    pub fn forward(index: usize) -> Self {
        Self {
            ops: vec![OpCode::LoadVar(index)],
        }
    }
}

/// Stack-based Virtual Machine for evaluating equations.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: Instructions to run.
/// - `t`: The independent variable.
/// - `vars`: Current state vector (read-only).
/// - `params`: Parameter vector (read-only).
/// - `stack`: A mutable buffer for intermediate computations.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        t: T,
        vars: &[T],
        params: &[T],
        stack: &mut Vec<T>,
    ) -> Result<T, EvaluationError> {
        stack.clear();

        for op in &bytecode.ops {
            match op {
                OpCode::LoadConst(val) => stack.push(T::constant(*val)),
                OpCode::LoadVar(idx) => stack.push(vars[*idx]),
                OpCode::LoadParam(idx) => stack.push(params[*idx]),
                OpCode::LoadTime => stack.push(t),
                OpCode::Binary(op) => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(op.apply(a, b)?);
                }
                OpCode::Neg => {
                    let a = pop(stack)?;
                    stack.push(-a);
                }
                OpCode::Call(func) => {
                    let a = pop(stack)?;
                    stack.push(func.apply(a)?);
                }
            }
        }

        let result = pop(stack)?;
        if !stack.is_empty() {
            return Err(EvaluationError::MalformedExpression(
                "bytecode left extra values on the stack".to_string(),
            ));
        }
        Ok(result)
    }
}

fn pop<T>(stack: &mut Vec<T>) -> Result<T, EvaluationError> {
    stack
        .pop()
        .ok_or_else(|| EvaluationError::MalformedExpression("stack underflow".to_string()))
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    /// `dy/dt` or `y'` inside an expression: the order-th derivative of a variable.
    Derivative(String, usize),
    /// `∂²u/∂x²`: a partial derivative, one entry in the list per differentiation.
    /// It can be classified but never evaluated.
    PartialDerivative(String, Vec<String>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Neg(Box<Expr>),
    Call(Function, Box<Expr>),
}

impl Expr {
    /// Every symbol referenced by the expression, excluding function names,
    /// built-in constants and derivative references.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut symbols = BTreeSet::new();
        self.visit(&mut |node| {
            if let Expr::Variable(name) = node {
                if constant_value(name).is_none() {
                    symbols.insert(name.clone());
                }
            }
        });
        symbols
    }

    /// Variables referenced through derivative notation, with their order.
    pub fn derivative_refs(&self) -> BTreeSet<(String, usize)> {
        let mut refs = BTreeSet::new();
        self.visit(&mut |node| {
            if let Expr::Derivative(name, order) = node {
                refs.insert((name.clone(), *order));
            }
        });
        refs
    }

    pub fn references(&self, name: &str) -> bool {
        let mut found = false;
        self.visit(&mut |node| {
            if matches!(node, Expr::Variable(v) if v == name) {
                found = true;
            }
        });
        found
    }

    /// Pre-order traversal.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Number(_)
            | Expr::Variable(_)
            | Expr::Derivative(_, _)
            | Expr::PartialDerivative(_, _) => {}
            Expr::Binary(left, _, right) => {
                left.visit(f);
                right.visit(f);
            }
            Expr::Neg(inner) | Expr::Call(_, inner) => inner.visit(f),
        }
    }

    /// Tree-walking evaluation against a scope. Derivatives are looked up
    /// under `derivative_key`.
    pub fn evaluate(&self, scope: &Scope) -> Result<f64, EvaluationError> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Variable(name) => scope
                .get(name)
                .copied()
                .or_else(|| constant_value(name))
                .ok_or_else(|| EvaluationError::UnknownSymbol(name.clone())),
            Expr::Derivative(name, order) => {
                let key = derivative_key(name, *order);
                scope
                    .get(&key)
                    .copied()
                    .ok_or(EvaluationError::UnknownSymbol(key))
            }
            Expr::PartialDerivative(name, _) => Err(partial_not_evaluable(name)),
            Expr::Binary(left, op, right) => {
                let a = left.evaluate(scope)?;
                let b = right.evaluate(scope)?;
                op.apply(a, b)
            }
            Expr::Neg(inner) => Ok(-inner.evaluate(scope)?),
            Expr::Call(func, arg) => func.apply(arg.evaluate(scope)?),
        }
    }
}

fn partial_not_evaluable(name: &str) -> EvaluationError {
    EvaluationError::MalformedExpression(format!(
        "partial derivative of `{name}` cannot be evaluated"
    ))
}

/// Parses and evaluates `input` against `scope` in one go.
pub fn evaluate(input: &str, scope: &Scope) -> Result<f64, EvaluationError> {
    parse(input)?.evaluate(scope)
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves variable and parameter names to indices.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
    pub time_symbol: Option<String>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let mut var_map = HashMap::new();
        for (i, name) in var_names.iter().enumerate() {
            var_map.insert(name.clone(), i);
        }

        let mut param_map = HashMap::new();
        for (i, name) in param_names.iter().enumerate() {
            param_map.insert(name.clone(), i);
        }

        Self {
            var_map,
            param_map,
            time_symbol: None,
        }
    }

    /// Binds `symbol` to the independent variable passed to `VM::execute`.
    pub fn with_time_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.time_symbol = Some(symbol.into());
        self
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, EvaluationError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), EvaluationError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if self.time_symbol.as_deref() == Some(name.as_str()) {
                    ops.push(OpCode::LoadTime);
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else if let Some(value) = constant_value(name) {
                    ops.push(OpCode::LoadConst(value));
                } else {
                    return Err(EvaluationError::UnknownSymbol(name.clone()));
                }
            }
            Expr::Derivative(name, order) => {
                let key = derivative_key(name, *order);
                match self.var_map.get(&key) {
                    Some(&idx) => ops.push(OpCode::LoadVar(idx)),
                    None => return Err(EvaluationError::UnknownSymbol(key)),
                }
            }
            Expr::PartialDerivative(name, _) => return Err(partial_not_evaluable(name)),
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(OpCode::Binary(*op));
            }
            Expr::Neg(operand) => {
                self.compile_recursive(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(func, arg) => {
                self.compile_recursive(arg, ops)?;
                ops.push(OpCode::Call(*func));
            }
        }
        Ok(())
    }
}

// --- Simple Parser ---

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr, EvaluationError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(EvaluationError::MalformedExpression(
            "empty expression".to_string(),
        ));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(EvaluationError::MalformedExpression(format!(
            "unexpected token {token:?}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Derivative(String, usize),
    PartialDerivative(String, Vec<String>),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

/// Identifier continuation; superscript digits such as `²` are excluded.
pub(crate) fn is_identifier_continue(c: char) -> bool {
    c.is_alphabetic() || c.is_ascii_digit() || c == '_'
}

/// `^n`, `²` or `³`. Outer `None` means a malformed marker, inner `None` means absent.
pub(crate) fn read_order_marker(chars: &[char], i: &mut usize) -> Option<Option<usize>> {
    match chars.get(*i) {
        Some('^') => {
            *i += 1;
            let start = *i;
            while chars.get(*i).is_some_and(|c| c.is_ascii_digit()) {
                *i += 1;
            }
            let digits: String = chars[start..*i].iter().collect();
            digits.parse().ok().map(Some)
        }
        Some('²') => {
            *i += 1;
            Some(Some(2))
        }
        Some('³') => {
            *i += 1;
            Some(Some(3))
        }
        _ => Some(None),
    }
}

pub(crate) fn read_identifier(chars: &[char], i: &mut usize) -> Option<String> {
    let start = *i;
    if !chars.get(*i)?.is_alphabetic() {
        return None;
    }
    while chars.get(*i).is_some_and(|&c| is_identifier_continue(c)) {
        *i += 1;
    }
    Some(chars[start..*i].iter().collect())
}

fn skip_whitespace(chars: &[char], i: &mut usize) {
    while chars.get(*i).is_some_and(|c| c.is_whitespace()) {
        *i += 1;
    }
}

/// Reads `∂u/∂x`, `∂²u/∂x²` or `∂^2u/∂x∂y` starting at the leading `∂`.
/// Denominator orders must add up to the numerator order; a first-order
/// quotient leaves any trailing `^n` to the expression parser.
fn read_partial_derivative(chars: &[char], i: &mut usize) -> Result<Token, EvaluationError> {
    let start = *i;
    let malformed = || {
        let rest: String = chars[start..].iter().collect();
        EvaluationError::MalformedExpression(format!("malformed partial derivative at `{rest}`"))
    };
    let mut j = start + 1;
    let order = read_order_marker(chars, &mut j)
        .ok_or_else(malformed)?
        .unwrap_or(1);
    skip_whitespace(chars, &mut j);
    let name = read_identifier(chars, &mut j);
    skip_whitespace(chars, &mut j);
    let (Some(name), Some('/')) = (name, chars.get(j)) else {
        return Err(malformed());
    };
    j += 1;

    let mut wrt = Vec::new();
    while order > 0 && wrt.len() < order {
        skip_whitespace(chars, &mut j);
        if chars.get(j) != Some(&'∂') {
            return Err(malformed());
        }
        j += 1;
        skip_whitespace(chars, &mut j);
        let variable = read_identifier(chars, &mut j).ok_or_else(malformed)?;
        let times = if order > 1 {
            read_order_marker(chars, &mut j)
                .ok_or_else(malformed)?
                .unwrap_or(1)
        } else {
            1
        };
        if times == 0 || wrt.len() + times > order {
            return Err(malformed());
        }
        wrt.extend(std::iter::repeat(variable).take(times));
    }
    if order == 0 || wrt.len() != order {
        return Err(malformed());
    }
    *i = j;
    Ok(Token::PartialDerivative(name, wrt))
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvaluationError> {
    let chars: Vec<char> = input.replace("\\partial", "∂").chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '∂' {
            tokens.push(read_partial_derivative(&chars, &mut i)?);
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // Scientific notation: 1e-3, 2.5E4
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                    i = j;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text.parse().map_err(|_| {
                EvaluationError::MalformedExpression(format!("invalid number `{text}`"))
            })?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() {
            let start = i;
            while i < chars.len() && is_identifier_continue(chars[i]) {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            let mut primes = 0;
            while i < chars.len() && chars[i] == '\'' {
                primes += 1;
                i += 1;
            }
            if primes > 0 {
                tokens.push(Token::Derivative(ident, primes));
            } else {
                tokens.push(Token::Identifier(ident));
            }
        } else {
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => {
                    return Err(EvaluationError::MalformedExpression(format!(
                        "unexpected character `{c}`"
                    )))
                }
            };
            tokens.push(token);
            i += 1;
        }
    }

    Ok(fold_leibniz_derivatives(tokens))
}

/// Rewrites `dy / dt` (and `dy / dx`) token triples into a single derivative token.
fn fold_leibniz_derivatives(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if let (Some(Token::Identifier(num)), Some(Token::Slash), Some(Token::Identifier(den))) =
            (tokens.get(i), tokens.get(i + 1), tokens.get(i + 2))
        {
            let is_wrt = den
                .strip_prefix('d')
                .is_some_and(|wrt| INDEPENDENT_VARIABLES.contains(&wrt));
            if let Some(var) = num.strip_prefix('d').filter(|v| !v.is_empty()) {
                if is_wrt {
                    out.push(Token::Derivative(var.to_string(), 1));
                    i += 3;
                    continue;
                }
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self) -> Result<(), EvaluationError> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(EvaluationError::MalformedExpression(
                "expected ')'".to_string(),
            )),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.parse_term()?;

        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            let right = self.parse_term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvaluationError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                let expr = self.parse_unary()?;
                Ok(Expr::Neg(Box::new(expr)))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    // `^` binds tighter than unary minus and associates to the right.
    fn parse_power(&mut self) -> Result<Expr, EvaluationError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(
                Box::new(base),
                BinaryOp::Pow,
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, EvaluationError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Derivative(name, order)) => Ok(Expr::Derivative(name, order)),
            Some(Token::PartialDerivative(name, wrt)) => Ok(Expr::PartialDerivative(name, wrt)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume(); // eat '('
                    let func = Function::from_name(&name)
                        .ok_or_else(|| EvaluationError::UnknownFunction(name.clone()))?;
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(func, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(EvaluationError::MalformedExpression(format!(
                "unexpected token {token:?}"
            ))),
            None => Err(EvaluationError::MalformedExpression(
                "unexpected end of expression".to_string(),
            )),
        }
    }
}

// --- EquationSystem ---

/// A concrete implementation of `DynamicalSystem` that uses the VM.
/// Contains one compiled bytecode expression per state component.
pub struct EquationSystem<T: Scalar> {
    pub equations: Vec<Bytecode>,
    pub params: Vec<T>,
    // Scratch buffer reused across calls; cleared on every execution.
    // Note: This makes the system !Sync.
    pub stack: RefCell<Vec<T>>,
}

impl<T: Scalar> EquationSystem<T> {
    pub fn new(equations: Vec<Bytecode>, params: Vec<T>) -> Self {
        Self {
            equations,
            params,
            stack: RefCell::new(Vec::with_capacity(64)),
        }
    }

    /// Same bytecode over a different scalar type.
    pub fn map_params<U: Scalar>(&self, f: impl Fn(T) -> U) -> EquationSystem<U> {
        EquationSystem::new(
            self.equations.clone(),
            self.params.iter().map(|&p| f(p)).collect(),
        )
    }
}

impl<T: Scalar> DynamicalSystem<T> for EquationSystem<T> {
    fn dimension(&self) -> usize {
        self.equations.len()
    }

    fn apply(&self, t: T, x: &[T], out: &mut [T]) -> Result<(), EvaluationError> {
        let mut stack = self.stack.borrow_mut();
        for (i, eq) in self.equations.iter().enumerate() {
            out[i] = VM::execute(eq, t, x, &self.params, &mut stack)?;
        }
        Ok(())
    }
}
