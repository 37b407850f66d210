//! Arithmetic formulas with named variables.
//!
//! Workload files describe iteration counts, payload sizes and evolving
//! models as strings over `num_nodes`, `num_gpus_per_node`, `num_gpus`,
//! `phase_iteration` and arbitrary user/runtime arguments. Formulas are
//! parsed once at workload load time and re-evaluated on every rescale.

use std::collections::HashMap;
use std::fmt;

use rustc_hash::FxHashMap;

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Number(f64),
    Variable(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum UnaryOp {
    Neg,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Func {
    Floor,
    Ceil,
    Round,
    Abs,
    Sqrt,
    Log,
    Log2,
    Min,
    Max,
}

impl Func {
    fn arity(&self) -> usize {
        match self {
            Func::Min | Func::Max => 2,
            _ => 1,
        }
    }
}

/// A formula precompiled into an expression tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

/// Variable bindings for one evaluation.
///
/// Built fresh at every scale point from the job geometry and argument maps.
#[derive(Default)]
pub struct EvalContext {
    vars: FxHashMap<String, f64>,
}

impl EvalContext {
    pub fn new(num_nodes: u32, num_gpus_per_node: u32) -> Self {
        let mut ctx = EvalContext::default();
        ctx.set("num_nodes", num_nodes as f64);
        ctx.set("num_gpus_per_node", num_gpus_per_node as f64);
        ctx.set("num_gpus", (num_nodes * num_gpus_per_node) as f64);
        ctx
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.vars.insert(name.to_string(), value);
    }

    pub fn with_phase_iteration(mut self, iteration: u32) -> Self {
        self.set("phase_iteration", iteration as f64);
        self
    }

    /// Merges string-valued argument maps (user arguments, runtime
    /// arguments). Non-numeric values are skipped: they are legal as job
    /// metadata but cannot participate in arithmetic.
    pub fn with_arguments(mut self, arguments: &HashMap<String, String>) -> Self {
        for (name, value) in arguments {
            if let Ok(number) = value.parse::<f64>() {
                self.set(name, number);
            }
        }
        self
    }
}

impl Formula {
    /// Parses a formula, panicking on malformed input (fatal per the error
    /// handling contract: a workload that cannot be evaluated must never
    /// reach the scheduler).
    pub fn parse(source: &str) -> Formula {
        let tokens = tokenize(source);
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            source,
        };
        let expr = parser.parse_expr(0);
        if parser.pos != parser.tokens.len() {
            panic!("Formula '{}' has trailing input", source);
        }
        Formula {
            source: source.to_string(),
            expr,
        }
    }

    /// Parses a plain number into a constant formula.
    pub fn constant(value: f64) -> Formula {
        Formula {
            source: value.to_string(),
            expr: Expr::Number(value),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the formula; referencing a variable absent from `ctx` is
    /// fatal.
    pub fn evaluate(&self, ctx: &EvalContext) -> f64 {
        eval(&self.expr, ctx, &self.source)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn eval(expr: &Expr, ctx: &EvalContext, source: &str) -> f64 {
    match expr {
        Expr::Number(n) => *n,
        Expr::Variable(name) => *ctx
            .vars
            .get(name)
            .unwrap_or_else(|| panic!("Formula '{}' references unknown token '{}'", source, name)),
        Expr::Unary(UnaryOp::Neg, inner) => -eval(inner, ctx, source),
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, ctx, source);
            let r = eval(rhs, ctx, source);
            match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                BinaryOp::Mod => l % r,
                BinaryOp::Pow => l.powf(r),
            }
        }
        Expr::Call(func, args) => {
            let a: Vec<f64> = args.iter().map(|e| eval(e, ctx, source)).collect();
            match func {
                Func::Floor => a[0].floor(),
                Func::Ceil => a[0].ceil(),
                Func::Round => a[0].round(),
                Func::Abs => a[0].abs(),
                Func::Sqrt => a[0].sqrt(),
                Func::Log => a[0].ln(),
                Func::Log2 => a[0].log2(),
                Func::Min => a[0].min(a[1]),
                Func::Max => a[0].max(a[1]),
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // scientific notation: 1e9, 2.5e-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .unwrap_or_else(|_| panic!("Formula '{}' has invalid number '{}'", source, text));
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => panic!("Formula '{}' has unexpected character '{}'", source, c),
        }
    }
    tokens
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, token: Token) {
        match self.next() {
            Some(t) if t == token => {}
            other => panic!(
                "Formula '{}': expected {:?}, found {:?}",
                self.source, token, other
            ),
        }
    }

    // Pratt parsing with ^ right-associative above * / %, which sit above + -.
    fn parse_expr(&mut self, min_bp: u8) -> Expr {
        let mut lhs = self.parse_prefix();
        loop {
            let (op, bp, right_bp) = match self.peek() {
                Some(Token::Plus) => (BinaryOp::Add, 1, 2),
                Some(Token::Minus) => (BinaryOp::Sub, 1, 2),
                Some(Token::Star) => (BinaryOp::Mul, 3, 4),
                Some(Token::Slash) => (BinaryOp::Div, 3, 4),
                Some(Token::Percent) => (BinaryOp::Mod, 3, 4),
                Some(Token::Caret) => (BinaryOp::Pow, 6, 5),
                _ => break,
            };
            if bp < min_bp {
                break;
            }
            self.next();
            let rhs = self.parse_expr(right_bp);
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        lhs
    }

    fn parse_prefix(&mut self) -> Expr {
        match self.next() {
            Some(Token::Number(n)) => Expr::Number(n),
            Some(Token::Minus) => Expr::Unary(UnaryOp::Neg, Box::new(self.parse_expr(5))),
            Some(Token::LParen) => {
                let inner = self.parse_expr(0);
                self.expect(Token::RParen);
                inner
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.parse_call(&name)
                } else {
                    Expr::Variable(name)
                }
            }
            other => panic!("Formula '{}': unexpected token {:?}", self.source, other),
        }
    }

    fn parse_call(&mut self, name: &str) -> Expr {
        let func = match name {
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "round" => Func::Round,
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "log" => Func::Log,
            "log2" => Func::Log2,
            "min" => Func::Min,
            "max" => Func::Max,
            _ => panic!("Formula '{}': unknown function '{}'", self.source, name),
        };
        self.expect(Token::LParen);
        let mut args = Vec::new();
        loop {
            args.push(self.parse_expr(0));
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => panic!(
                    "Formula '{}': expected ',' or ')', found {:?}",
                    self.source, other
                ),
            }
        }
        if args.len() != func.arity() {
            panic!(
                "Formula '{}': function '{}' expects {} argument(s)",
                self.source,
                name,
                func.arity()
            );
        }
        Expr::Call(func, args)
    }
}
