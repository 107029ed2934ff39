//! Field expressions: parser and tree-walking evaluator.
//!
//! Expressions size arrays, compute implicit lengths and select optional
//! fields. They are parsed once, when a type is defined, and evaluated
//! against a [`Scope`] for every message.
//!
//! ```
//! use plc_wire::expression::{Expr, MapScope};
//! use plc_wire::Value;
//!
//! let expr: Expr = "transportSize == 3 ? COUNT(data) : COUNT(data) * 8".parse()?;
//! let scope = MapScope::new()
//!     .with("transportSize", Value::Int(4))
//!     .with("data", Value::bytes(&[1, 2, 3]));
//! assert_eq!(expr.evaluate(&scope)?, Value::Int(24));
//! # Ok::<(), plc_wire::CodecError>(())
//! ```

use std::cmp::Ordering;
use std::str::FromStr;

use crate::error::{CodecError, Result};
use crate::value::Value;

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Decimal or `0x` hex integer.
    Int(i128),
    /// Decimal with a fraction, e.g. `8.0`.
    Float(f64),
    /// Single or double quoted text.
    Str(String),
}

/// A possibly chained, indexed or called variable reference: `a[0].b`, `COUNT(x)`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    /// Identifier.
    pub name: String,
    /// Call arguments, for built-in functions.
    pub args: Option<Vec<Expr>>,
    /// Index into a list value.
    pub index: Option<Box<Expr>>,
    /// Next link of a `.` chain.
    pub child: Option<Box<VarRef>>,
}

impl VarRef {
    fn is_plain(&self) -> bool {
        self.args.is_none() && self.index.is_none() && self.child.is_none()
    }
}

/// Target of an explicit cast.
#[derive(Debug, Clone, PartialEq)]
pub enum CastTarget {
    /// Unsigned integer with the given bit width.
    UInt(u8),
    /// Signed integer with the given bit width.
    Int(u8),
    /// Floating point.
    Float,
    /// Boolean.
    Bool,
    /// Text.
    String,
    /// A registered message type or concrete case.
    Type(String),
}

impl CastTarget {
    /// Parses a type name such as `uint 8`, `int16`, `float 32` or `S7ParameterReadVarResponse`.
    pub fn parse(name: &str) -> Self {
        let compact: String = name.split_whitespace().collect();
        let width = |prefix: &str| compact.strip_prefix(prefix).and_then(|w| w.parse::<u8>().ok());
        if let Some(bits) = width("uint") {
            Self::UInt(bits)
        } else if let Some(bits) = width("int") {
            Self::Int(bits)
        } else if compact.starts_with("float") || compact == "double" {
            Self::Float
        } else if compact == "bit" || compact == "bool" {
            Self::Bool
        } else if compact == "string" {
            Self::String
        } else {
            Self::Type(name.trim().to_string())
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, PartialEq)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// unary `-`
    Neg,
    /// `CAST(x, type)`
    Cast(CastTarget),
}

/// Binary operators, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `||`
    Or,
    /// `&&`
    And,
    /// `|`
    BitOr,
    /// `&`
    BitAnd,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `^` (power)
    Pow,
}

impl BinaryOp {
    fn from_token(op: &str) -> Option<(Self, u8)> {
        let entry = match op {
            "||" => (Self::Or, 1),
            "&&" => (Self::And, 2),
            "|" => (Self::BitOr, 3),
            "&" => (Self::BitAnd, 4),
            "==" => (Self::Eq, 5),
            "!=" => (Self::Ne, 5),
            "<" => (Self::Lt, 6),
            ">" => (Self::Gt, 6),
            "<=" => (Self::Le, 6),
            ">=" => (Self::Ge, 6),
            "<<" => (Self::Shl, 7),
            ">>" => (Self::Shr, 7),
            "+" => (Self::Add, 8),
            "-" => (Self::Sub, 8),
            "*" => (Self::Mul, 9),
            "/" => (Self::Div, 9),
            "%" => (Self::Mod, 9),
            "^" => (Self::Pow, 10),
            _ => return None,
        };
        Some(entry)
    }
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant.
    Literal(Literal),
    /// Variable, enum member, built-in or function call.
    Var(VarRef),
    /// `!x`, `-x`, `CAST(x, t)`.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// `a op b`.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// `c ? a : b` or `if(c, a, b)`.
    Ternary {
        /// Condition.
        condition: Box<Expr>,
        /// Value when the condition holds.
        then: Box<Expr>,
        /// Value otherwise.
        otherwise: Box<Expr>,
    },
}

impl Expr {
    /// Parses an expression.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let expr = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    /// Integer literal shorthand.
    pub fn int(value: i128) -> Self {
        Self::Literal(Literal::Int(value))
    }

    /// Plain variable reference shorthand.
    pub fn var(name: &str) -> Self {
        Self::Var(VarRef {
            name: name.to_string(),
            args: None,
            index: None,
            child: None,
        })
    }

    /// Name of a plain variable reference (`foo`, not `foo.bar` or `foo[0]`).
    pub fn as_plain_var(&self) -> Option<&str> {
        match self {
            Self::Var(v) if v.is_plain() => Some(&v.name),
            _ => None,
        }
    }

    /// Evaluates the expression.
    pub fn evaluate(&self, scope: &dyn Scope) -> Result<Value> {
        eval(self, scope, false)
    }
}

impl FromStr for Expr {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Name resolution for expression evaluation.
pub trait Scope {
    /// Built-in pseudo variables (`lengthInBytes`, `curPos`, `_lastItem`, ...).
    fn builtin(&self, name: &str) -> Result<Option<Value>>;

    /// Field or argument by name.
    fn variable(&self, name: &str) -> Option<Value>;

    /// Enum member `Type.MEMBER`, if `type_name` names an enum.
    fn enum_member(&self, _type_name: &str, _member: &str) -> Option<Value> {
        None
    }

    /// Property of a value reached through a `.` chain.
    fn property(&self, base: &Value, name: &str) -> Result<Value> {
        match base {
            Value::Message(m) => m.require(name).cloned(),
            other => Err(CodecError::invalid_expression(format!(
                "cannot read '{}' of a {} value",
                name,
                other.kind()
            ))),
        }
    }

    /// Wire size of a value, for `ARRAY_SIZE_IN_BYTES`.
    fn size_in_bytes(&self, value: &Value) -> Result<u64> {
        Err(CodecError::invalid_expression(format!(
            "ARRAY_SIZE_IN_BYTES is not available for a {} value here",
            value.kind()
        )))
    }

    /// Vendor helper invoked through `STATIC_CALL`.
    fn static_call(&self, name: &str, _args: &[Value]) -> Result<Value> {
        Err(CodecError::invalid_expression(format!("unknown static function '{}'", name)))
    }
}

/// A scope backed by a list of named values, mostly for tests and ad-hoc evaluation.
#[derive(Debug, Clone, Default)]
pub struct MapScope {
    variables: Vec<(String, Value)>,
    enum_members: Vec<(String, String, Value)>,
}

impl MapScope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable.
    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.variables.push((name.to_string(), value));
        self
    }

    /// Adds an enum member.
    pub fn with_enum_member(mut self, type_name: &str, member: &str, value: Value) -> Self {
        self.enum_members.push((type_name.to_string(), member.to_string(), value));
        self
    }
}

impl Scope for MapScope {
    fn builtin(&self, _name: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    fn variable(&self, name: &str) -> Option<Value> {
        self.variables.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone())
    }

    fn enum_member(&self, type_name: &str, member: &str) -> Option<Value> {
        self.enum_members
            .iter()
            .find(|(t, m, _)| t == type_name && m == member)
            .map(|(_, _, v)| v.clone())
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i128),
    Float(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Question,
    Colon,
}

const OPERATORS: &[&str] = &[
    "||", "&&", "==", "!=", "<=", ">=", "<<", ">>", "<", ">", "+", "-", "*", "/", "%", "^", "&", "|", "!",
];

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            if c == '0' && i + 1 < chars.len() && (chars[i + 1] == 'x' || chars[i + 1] == 'X') {
                i += 2;
                while i < chars.len() && chars[i].is_ascii_hexdigit() {
                    i += 1;
                }
                let digits: String = chars[start + 2..i].iter().collect();
                let value = i128::from_str_radix(&digits, 16)
                    .map_err(|_| CodecError::invalid_expression(format!("bad hex literal in '{}'", source)))?;
                tokens.push(Token::Int(value));
                continue;
            }
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| CodecError::invalid_expression(format!("bad float literal '{}'", text)))?;
                tokens.push(Token::Float(value));
            } else {
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<i128>()
                    .map_err(|_| CodecError::invalid_expression(format!("bad integer literal '{}'", text)))?;
                tokens.push(Token::Int(value));
            }
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        if c == '\'' || c == '"' {
            let start = i + 1;
            i += 1;
            while i < chars.len() && chars[i] != c {
                i += 1;
            }
            if i >= chars.len() {
                return Err(CodecError::invalid_expression(format!("unterminated string in '{}'", source)));
            }
            tokens.push(Token::Str(chars[start..i].iter().collect()));
            i += 1;
            continue;
        }
        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ',' => Some(Token::Comma),
            '.' => Some(Token::Dot),
            '?' => Some(Token::Question),
            ':' => Some(Token::Colon),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(token);
            i += 1;
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            Some(op) => {
                tokens.push(Token::Op(*op));
                i += op.len();
            }
            None => {
                return Err(CodecError::invalid_expression(format!(
                    "unexpected character '{}' in '{}'",
                    c, source
                )))
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> CodecError {
        CodecError::invalid_expression(format!("{} at token {} of '{}'", reason, self.pos, self.source))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            _ => Err(self.error(&format!("expected {:?}", expected))),
        }
    }

    fn expression(&mut self) -> Result<Expr> {
        let condition = self.binary(1)?;
        if self.peek() == Some(&Token::Question) {
            self.pos += 1;
            let then = self.expression()?;
            self.expect(Token::Colon)?;
            let otherwise = self.expression()?;
            return Ok(Expr::Ternary {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(condition)
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let (op, prec) = match self.peek() {
                Some(Token::Op(op)) => match BinaryOp::from_token(op) {
                    Some(entry) => entry,
                    None => break,
                },
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            // `^` is right associative
            let next_prec = if op == BinaryOp::Pow { prec } else { prec + 1 };
            let rhs = self.binary(next_prec)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Op("!")) => {
                self.pos += 1;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(self.unary()?),
                })
            }
            Some(Token::Op("-")) => {
                self.pos += 1;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(self.unary()?),
                })
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Int(v)) => Ok(Expr::Literal(Literal::Int(v))),
            Some(Token::Float(v)) => Ok(Expr::Literal(Literal::Float(v))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Literal::Str(s))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Literal::Bool(true))),
                "false" => Ok(Expr::Literal(Literal::Bool(false))),
                "null" => Ok(Expr::Literal(Literal::Null)),
                _ => {
                    let var = self.var_ref(name)?;
                    lower_special_calls(var).map_err(|reason| self.error(&reason))
                }
            },
            _ => Err(self.error("expected a term")),
        }
    }

    fn var_ref(&mut self, name: String) -> Result<VarRef> {
        let mut args = None;
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let mut list = Vec::new();
            if self.peek() != Some(&Token::RParen) {
                loop {
                    list.push(self.expression()?);
                    if self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
            }
            self.expect(Token::RParen)?;
            args = Some(list);
        }
        let mut index = None;
        if self.peek() == Some(&Token::LBracket) {
            self.pos += 1;
            index = Some(Box::new(self.expression()?));
            self.expect(Token::RBracket)?;
        }
        let mut child = None;
        if self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            match self.next() {
                Some(Token::Ident(next)) => child = Some(Box::new(self.var_ref(next)?)),
                _ => return Err(self.error("expected a name after '.'")),
            }
        }
        Ok(VarRef {
            name,
            args,
            index,
            child,
        })
    }
}

/// Rewrites `if(c, a, b)` into a ternary and `CAST(x, T)` into a cast node.
fn lower_special_calls(var: VarRef) -> std::result::Result<Expr, String> {
    let VarRef {
        name,
        args,
        index,
        child,
    } = var;
    match (name.as_str(), args) {
        ("if", Some(mut args)) => {
            if args.len() != 3 || index.is_some() || child.is_some() {
                return Err("if() takes exactly three arguments".to_string());
            }
            let otherwise = args.remove(2);
            let then = args.remove(1);
            let condition = args.remove(0);
            Ok(Expr::Ternary {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            })
        }
        ("CAST", Some(mut args)) => {
            if args.len() != 2 {
                return Err("CAST() takes a value and a type".to_string());
            }
            let target = match args.remove(1) {
                Expr::Literal(Literal::Str(s)) => CastTarget::parse(&s),
                Expr::Var(v) if v.is_plain() => CastTarget::parse(&v.name),
                _ => return Err("CAST() type must be a name or a string".to_string()),
            };
            let cast = Expr::Unary {
                op: UnaryOp::Cast(target),
                operand: Box::new(args.remove(0)),
            };
            if index.is_none() && child.is_none() {
                return Ok(cast);
            }
            // CAST(x, T).field: keep the chain by wrapping the cast in a call-less reference
            Ok(Expr::Var(VarRef {
                name: CAST_RESULT.to_string(),
                args: Some(vec![cast]),
                index,
                child,
            }))
        }
        (_, args) => Ok(Expr::Var(VarRef {
            name,
            args,
            index,
            child,
        })),
    }
}

/// Internal function name that forwards its single argument, used to chain after `CAST`.
pub(crate) const CAST_RESULT: &str = "_CAST_RESULT";

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

fn is_function_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn eval(expr: &Expr, scope: &dyn Scope, null_safe: bool) -> Result<Value> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(v) => Value::Int(*v),
            Literal::Float(v) => Value::Float(*v),
            Literal::Str(s) => Value::String(s.clone()),
        }),
        Expr::Var(var) => eval_var(var, scope, null_safe),
        Expr::Unary { op, operand } => {
            let value = eval(operand, scope, null_safe)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.as_bool()?)),
                UnaryOp::Neg => match value {
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => other
                        .as_int()?
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| CodecError::invalid_expression("arithmetic overflow in negation")),
                },
                UnaryOp::Cast(target) => cast(value, target),
            }
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, scope, null_safe),
        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => {
            if eval(condition, scope, null_safe)?.as_bool()? {
                eval(then, scope, null_safe)
            } else {
                eval(otherwise, scope, null_safe)
            }
        }
    }
}

fn eval_var(var: &VarRef, scope: &dyn Scope, null_safe: bool) -> Result<Value> {
    let base = if let Some(args) = &var.args {
        call_function(&var.name, args, scope, null_safe)?
    } else if let Some(builtin) = scope.builtin(&var.name)? {
        builtin
    } else if let Some(member) = var
        .child
        .as_ref()
        .and_then(|child| scope.enum_member(&var.name, &child.name))
    {
        // `Type.MEMBER` consumes the first link of the chain
        let child = var.child.as_deref();
        return match child.and_then(|c| c.child.as_deref()) {
            Some(rest) => follow_chain(member, rest, scope, null_safe),
            None => Ok(member),
        };
    } else if let Some(value) = scope.variable(&var.name) {
        value
    } else if is_function_name(&var.name) {
        call_function(&var.name, &[], scope, null_safe)?
    } else {
        return Err(CodecError::invalid_expression(format!("unknown variable '{}'", var.name)));
    };
    let base = apply_index(base, var.index.as_deref(), scope, null_safe)?;
    match &var.child {
        Some(child) => follow_chain(base, child, scope, null_safe),
        None => Ok(base),
    }
}

fn follow_chain(base: Value, link: &VarRef, scope: &dyn Scope, null_safe: bool) -> Result<Value> {
    if base.is_null() {
        if null_safe {
            return Ok(Value::Null);
        }
        return Err(CodecError::invalid_expression(format!("cannot read '{}' of null", link.name)));
    }
    let value = scope.property(&base, &link.name)?;
    let value = apply_index(value, link.index.as_deref(), scope, null_safe)?;
    match &link.child {
        Some(next) => follow_chain(value, next, scope, null_safe),
        None => Ok(value),
    }
}

fn apply_index(value: Value, index: Option<&Expr>, scope: &dyn Scope, null_safe: bool) -> Result<Value> {
    let Some(index) = index else {
        return Ok(value);
    };
    let i = eval(index, scope, null_safe)?.as_int()?;
    let items = value.as_list()?;
    usize::try_from(i)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .ok_or_else(|| CodecError::invalid_expression(format!("index {} out of bounds for {} items", i, items.len())))
}

fn call_function(name: &str, args: &[Expr], scope: &dyn Scope, null_safe: bool) -> Result<Value> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(CodecError::invalid_expression(format!(
                "{}() takes {} argument(s), got {}",
                name,
                n,
                args.len()
            )))
        }
    };
    match name {
        CAST_RESULT => {
            arity(1)?;
            eval(&args[0], scope, null_safe)
        }
        "COUNT" => {
            arity(1)?;
            match eval(&args[0], scope, null_safe)? {
                Value::Null => Ok(Value::Int(0)),
                Value::List(items) => Ok(Value::Int(items.len() as i128)),
                Value::String(s) => Ok(Value::Int(s.chars().count() as i128)),
                other => Err(CodecError::invalid_expression(format!("COUNT() of a {} value", other.kind()))),
            }
        }
        "ARRAY_SIZE_IN_BYTES" => {
            arity(1)?;
            let value = eval(&args[0], scope, null_safe)?;
            Ok(Value::Int(i128::from(scope.size_in_bytes(&value)?)))
        }
        "CEIL" => {
            arity(1)?;
            let value = eval(&args[0], scope, null_safe)?.as_float()?;
            Ok(Value::Int(value.ceil() as i128))
        }
        "STR_LEN" => {
            arity(1)?;
            match eval(&args[0], scope, null_safe)? {
                Value::String(s) => Ok(Value::Int(s.len() as i128)),
                Value::Null => Ok(Value::Int(0)),
                other => Err(CodecError::invalid_expression(format!("STR_LEN() of a {} value", other.kind()))),
            }
        }
        "STATIC_CALL" => {
            let (first, rest) = args
                .split_first()
                .ok_or_else(|| CodecError::invalid_expression("STATIC_CALL() needs a function name"))?;
            let function = match first {
                Expr::Literal(Literal::Str(s)) => s.clone(),
                other => match other.as_plain_var() {
                    Some(n) => n.to_string(),
                    None => return Err(CodecError::invalid_expression("STATIC_CALL() name must be a string")),
                },
            };
            let values = rest
                .iter()
                .map(|arg| eval(arg, scope, null_safe))
                .collect::<Result<Vec<_>>>()?;
            scope.static_call(&function, &values)
        }
        _ => Err(CodecError::invalid_expression(format!("unknown function '{}'", name))),
    }
}

fn cast(value: Value, target: &CastTarget) -> Result<Value> {
    match target {
        CastTarget::UInt(bits) | CastTarget::Int(bits) => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let v = match value {
                Value::Float(f) => f.trunc() as i128,
                other => other.as_int()?,
            };
            let bits = u32::from(*bits).clamp(1, 64);
            let (min, max) = if matches!(target, CastTarget::UInt(_)) {
                (0i128, (1i128 << bits) - 1)
            } else {
                (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
            };
            if v < min || v > max {
                return Err(CodecError::invalid_expression(format!("{} is out of range for {:?}", v, target)));
            }
            Ok(Value::Int(v))
        }
        CastTarget::Float => Ok(Value::Float(value.as_float()?)),
        CastTarget::Bool => Ok(Value::Bool(value.as_bool()?)),
        CastTarget::String => Ok(match value {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        }),
        CastTarget::Type(name) => {
            let compatible = match &value {
                Value::Null => return Ok(Value::Null),
                Value::Message(m) => m.type_name() == name.as_str() || m.case_name() == Some(name.as_str()),
                _ => false,
            };
            if compatible {
                Ok(value)
            } else {
                Err(CodecError::invalid_expression(format!("cannot cast {} to {}", value, name)))
            }
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (
            Value::Enum {
                type_name: t1,
                symbol: s1,
                ..
            },
            Value::Enum {
                type_name: t2,
                symbol: s2,
                ..
            },
        ) => t1 == t2 && s1 == s2,
        (Value::Enum { symbol, .. }, Value::String(s)) | (Value::String(s), Value::Enum { symbol, .. }) => symbol == s,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::List(x), Value::List(y)) => x == y,
        (Value::Message(x), Value::Message(y)) => x == y,
        (Value::Float(_), _) | (_, Value::Float(_)) => match (a.as_float(), b.as_float()) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        },
        _ => match (a.as_int(), b.as_int()) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        },
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering> {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Ok(x.cmp(y));
    }
    if matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)) {
        let (x, y) = (a.as_float()?, b.as_float()?);
        return x
            .partial_cmp(&y)
            .ok_or_else(|| CodecError::invalid_expression("cannot compare NaN"));
    }
    Ok(a.as_int()?.cmp(&b.as_int()?))
}

fn overflow(op: BinaryOp) -> CodecError {
    CodecError::invalid_expression(format!("arithmetic overflow in {:?}", op))
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
    if op == BinaryOp::Add {
        if let (Value::String(x), y) | (y, Value::String(x)) = (a, b) {
            let rendered = match y {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(Value::String(if matches!(a, Value::String(_)) {
                format!("{}{}", x, rendered)
            } else {
                format!("{}{}", rendered, x)
            }));
        }
    }
    let float = matches!(a, Value::Float(_)) || matches!(b, Value::Float(_));
    if float || (op == BinaryOp::Pow && b.as_int()? < 0) {
        let (x, y) = (a.as_float()?, b.as_float()?);
        let result = match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
            BinaryOp::Mod => x % y,
            BinaryOp::Pow => x.powf(y),
            _ => return Err(CodecError::invalid_expression(format!("{:?} is not defined for floats", op))),
        };
        return Ok(Value::Float(result));
    }
    let (x, y) = (a.as_int()?, b.as_int()?);
    let result = match op {
        BinaryOp::Add => x.checked_add(y),
        BinaryOp::Sub => x.checked_sub(y),
        BinaryOp::Mul => x.checked_mul(y),
        BinaryOp::Div | BinaryOp::Mod if y == 0 => {
            return Err(CodecError::invalid_expression("division by zero"));
        }
        BinaryOp::Div => x.checked_div(y),
        BinaryOp::Mod => x.checked_rem(y),
        BinaryOp::Pow => u32::try_from(y).ok().and_then(|e| x.checked_pow(e)),
        BinaryOp::BitAnd => Some(x & y),
        BinaryOp::BitOr => Some(x | y),
        BinaryOp::Shl => u32::try_from(y).ok().filter(|s| *s < 127).map(|s| x << s),
        BinaryOp::Shr => u32::try_from(y).ok().filter(|s| *s < 127).map(|s| x >> s),
        _ => None,
    };
    result.map(Value::Int).ok_or_else(|| overflow(op))
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, scope: &dyn Scope, null_safe: bool) -> Result<Value> {
    match op {
        BinaryOp::And => {
            if !eval(lhs, scope, null_safe)?.as_bool()? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(rhs, scope, null_safe)?.as_bool()?))
        }
        BinaryOp::Or => {
            if eval(lhs, scope, null_safe)?.as_bool()? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(rhs, scope, null_safe)?.as_bool()?))
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            // comparing against a null literal never dereferences through a null
            let null_check = matches!(lhs, Expr::Literal(Literal::Null)) || matches!(rhs, Expr::Literal(Literal::Null));
            let safe = null_safe || null_check;
            let a = eval(lhs, scope, safe)?;
            let b = eval(rhs, scope, safe)?;
            let equal = values_equal(&a, &b);
            Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            let a = eval(lhs, scope, null_safe)?;
            let b = eval(rhs, scope, null_safe)?;
            let ordering = compare(&a, &b)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Gt => ordering == Ordering::Greater,
                BinaryOp::Le => ordering != Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        _ => {
            let a = eval(lhs, scope, null_safe)?;
            let b = eval(rhs, scope, null_safe)?;
            arithmetic(op, &a, &b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ParsedMessage;

    fn eval_str(source: &str, scope: &MapScope) -> Result<Value> {
        Expr::parse(source)?.evaluate(scope)
    }

    #[test]
    fn test_precedence() {
        let scope = MapScope::new();
        assert_eq!(eval_str("1 + 2 * 3", &scope).unwrap(), Value::Int(7));
        assert_eq!(eval_str("(1 + 2) * 3", &scope).unwrap(), Value::Int(9));
        assert_eq!(eval_str("2 ^ 3 ^ 2", &scope).unwrap(), Value::Int(512));
        assert_eq!(eval_str("1 << 4 | 1", &scope).unwrap(), Value::Int(17));
        assert_eq!(eval_str("0x10 - 1 == 15 && !false", &scope).unwrap(), Value::Bool(true));
        assert_eq!(eval_str("-3 % 2", &scope).unwrap(), Value::Int(-1));
        assert_eq!(eval_str("7 / 2", &scope).unwrap(), Value::Int(3));
        assert_eq!(eval_str("7 / 2.0", &scope).unwrap(), Value::Float(3.5));
    }

    #[test]
    fn test_ternary_forms() {
        let scope = MapScope::new().with("x", Value::Int(3));
        assert_eq!(eval_str("x > 2 ? 10 : 20", &scope).unwrap(), Value::Int(10));
        assert_eq!(eval_str("if(x > 5, 10, 20)", &scope).unwrap(), Value::Int(20));
        assert_eq!(eval_str("x == 1 ? 1 : x == 3 ? 3 : 0", &scope).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_functions() {
        let scope = MapScope::new()
            .with("data", Value::bytes(&[1, 2, 3]))
            .with("dataLength", Value::Int(9))
            .with("name", Value::from("station"));
        assert_eq!(eval_str("COUNT(data)", &scope).unwrap(), Value::Int(3));
        assert_eq!(eval_str("CEIL(dataLength / 8.0)", &scope).unwrap(), Value::Int(2));
        assert_eq!(eval_str("STR_LEN(name)", &scope).unwrap(), Value::Int(7));
        assert_eq!(eval_str("data[1] + data[2]", &scope).unwrap(), Value::Int(5));
        assert!(eval_str("data[3]", &scope).is_err());
        assert!(eval_str("ARRAY_SIZE_IN_BYTES(data)", &scope).is_err());
        assert!(eval_str("STATIC_CALL('crc', data)", &scope).is_err());
    }

    #[test]
    fn test_null_check_suppresses_dereference() {
        let scope = MapScope::new().with("payload", Value::Null);
        assert_eq!(
            eval_str("payload != null ? payload.lengthInBytes : 0", &scope).unwrap(),
            Value::Int(0)
        );
        assert_eq!(eval_str("payload.items == null", &scope).unwrap(), Value::Bool(true));
        assert!(eval_str("payload.items", &scope).is_err());
    }

    #[test]
    fn test_message_property_chain() {
        let inner = ParsedMessage::new("S7ParameterReadVarResponse", vec![("numItems".to_string(), Value::Int(2))]);
        let scope = MapScope::new().with("parameter", Value::from(inner));
        assert_eq!(eval_str("parameter.numItems", &scope).unwrap(), Value::Int(2));
        assert_eq!(
            eval_str("CAST(parameter, S7ParameterReadVarResponse).numItems", &scope).unwrap(),
            Value::Int(2)
        );
        assert!(eval_str("CAST(parameter, 'S7ParameterSetupCommunication')", &scope).is_err());
    }

    #[test]
    fn test_enum_members() {
        let bit = Value::Enum {
            type_name: "DataTransportSize".to_string(),
            symbol: "BIT".to_string(),
            value: 3,
        };
        let scope = MapScope::new()
            .with("transportSize", bit.clone())
            .with_enum_member("DataTransportSize", "BIT", bit);
        assert_eq!(
            eval_str("transportSize == DataTransportSize.BIT", &scope).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(eval_str("transportSize == 3", &scope).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_casts() {
        let scope = MapScope::new().with("v", Value::Int(300));
        assert_eq!(eval_str("CAST(v, 'uint 16')", &scope).unwrap(), Value::Int(300));
        assert!(eval_str("CAST(v, 'uint 8')", &scope).is_err());
        assert!(eval_str("CAST(-v, 'int 8')", &scope).is_err());
        assert_eq!(eval_str("CAST(-100, 'int 8')", &scope).unwrap(), Value::Int(-100));
        assert_eq!(eval_str("CAST(v, float)", &scope).unwrap(), Value::Float(300.0));
    }

    #[test]
    fn test_string_operations() {
        let scope = MapScope::new().with("s", Value::from("DB"));
        assert_eq!(eval_str("s == 'DB'", &scope).unwrap(), Value::Bool(true));
        assert_eq!(eval_str("s + \"1\"", &scope).unwrap(), Value::from("DB1"));
        assert_eq!(eval_str("'A' < 'B'", &scope).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_errors_are_invalid_expression() {
        let scope = MapScope::new();
        for source in ["unknownField + 1", "1 +", "FOO(1)", "(1", "1 / 0", "'open", "a ? b"] {
            let err = eval_str(source, &scope).unwrap_err();
            assert!(
                matches!(err, CodecError::InvalidExpression { .. }),
                "{} gave {:?}",
                source,
                err
            );
        }
    }

    #[test]
    fn test_negation_overflow() {
        let scope = MapScope::new().with("v", Value::Int(i128::MIN));
        let err = eval_str("-v", &scope).unwrap_err();
        assert!(matches!(err, CodecError::InvalidExpression { .. }), "{:?}", err);
        assert_eq!(eval_str("-(v + 1)", &scope).unwrap(), Value::Int(i128::MAX));
    }

    #[test]
    fn test_cast_target_parse() {
        assert_eq!(CastTarget::parse("uint 8"), CastTarget::UInt(8));
        assert_eq!(CastTarget::parse("int16"), CastTarget::Int(16));
        assert_eq!(CastTarget::parse("float 32"), CastTarget::Float);
        assert_eq!(
            CastTarget::parse("S7ParameterReadVarResponse"),
            CastTarget::Type("S7ParameterReadVarResponse".to_string())
        );
    }
}
