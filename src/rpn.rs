//! Reverse Polish notation calculator for derived series
//!
//! Expressions are comma-separated tokens evaluated against an operand
//! stack of `f64`. NaN stands for "unknown", infinities for saturation.
//! Symbolic tokens are resolved per bucket through a [`ReferenceResolver`]
//! and an [`EvaluationScope`]; an unresolved reference yields
//! [`ExpressionError::UnknownReference`], which callers treat as "skip this
//! bucket" rather than a failure.
//!
//! # Operators
//!
//! | Token                               | Pops             | Pushes                          |
//! |-------------------------------------|------------------|---------------------------------|
//! | `+ - * / %`                         | a, b             | a op b (IEEE semantics)         |
//! | `addnan`                            | a, b             | a + b, a lone NaN counts as 0   |
//! | `lt le gt ge eq ne`                 | a, b             | 1.0 / 0.0                       |
//! | `if` / `ifte`                       | cond, then, else | then if cond != 0 else else     |
//! | `min max`                           | a, b             | min / max, NaN if either is NaN |
//! | `limit`                             | v, lo, hi        | v, or NaN outside `[lo, hi]`    |
//! | `un isinf`                          | a                | 1.0 / 0.0                       |
//! | `sin cos log exp sqrt floor ceil abs atan` | a         | f(a)                            |
//! | `sort rev`                          | n, v1..vn        | reordered values                |
//! | `avg`                               | n, v1..vn        | mean of the non-NaN values      |
//! | `unkn inf neginf now time`          |                  | constant / clock / bucket time  |
//! | `dup exc pop`                       |                  | stack manipulation              |
//!
//! # Example
//!
//! ```rust
//! use tsdb_gateway::rpn::{EvaluationScope, RpnCalculator};
//!
//! struct Bucket;
//!
//! impl EvaluationScope for Bucket {
//!     fn timestamp(&self) -> i64 {
//!         60
//!     }
//!     fn lookup_by_shortcut(&self, name: &str) -> Option<f64> {
//!         (name == "used").then_some(30.0)
//!     }
//! }
//!
//! let calc = RpnCalculator::new();
//! assert_eq!(calc.evaluate_str("used,2,*", &Bucket).unwrap(), 60.0);
//! assert!(calc.evaluate_str("free,2,*", &Bucket).is_err());
//! ```

use chrono::Utc;

use crate::error::ExpressionError;

/// Per-bucket view used to resolve symbolic tokens
pub trait EvaluationScope {
    /// Timestamp of the bucket being evaluated
    fn timestamp(&self) -> i64;

    /// Value of the series registered under `name` in this bucket
    fn lookup_by_shortcut(&self, name: &str) -> Option<f64>;
}

/// Strategy turning a symbolic token into a value
pub trait ReferenceResolver: Send + Sync {
    /// Resolve `token` in `scope`; `None` means unknown in this bucket
    fn resolve(&self, token: &str, scope: &dyn EvaluationScope) -> Option<f64>;
}

/// Resolves references by series shortcut
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortcutResolver;

impl ReferenceResolver for ShortcutResolver {
    fn resolve(&self, token: &str, scope: &dyn EvaluationScope) -> Option<f64> {
        scope.lookup_by_shortcut(token)
    }
}

/// Built-in operator, one variant per token in the table above
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    AddNan,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    If,
    Min,
    Max,
    Limit,
    Un,
    IsInf,
    Sin,
    Cos,
    Log,
    Exp,
    Sqrt,
    Floor,
    Ceil,
    Abs,
    Atan,
    Sort,
    Rev,
    Avg,
    Unkn,
    Inf,
    NegInf,
    Now,
    Dup,
    Exc,
    Pop,
}

impl Operator {
    fn lookup(token: &str) -> Option<Self> {
        let op = match token.to_ascii_lowercase().as_str() {
            "+" => Operator::Add,
            "-" => Operator::Sub,
            "*" => Operator::Mul,
            "/" => Operator::Div,
            "%" => Operator::Mod,
            "addnan" => Operator::AddNan,
            "lt" => Operator::Lt,
            "le" => Operator::Le,
            "gt" => Operator::Gt,
            "ge" => Operator::Ge,
            "eq" => Operator::Eq,
            "ne" => Operator::Ne,
            "if" | "ifte" => Operator::If,
            "min" => Operator::Min,
            "max" => Operator::Max,
            "limit" => Operator::Limit,
            "un" => Operator::Un,
            "isinf" => Operator::IsInf,
            "sin" => Operator::Sin,
            "cos" => Operator::Cos,
            "log" => Operator::Log,
            "exp" => Operator::Exp,
            "sqrt" => Operator::Sqrt,
            "floor" => Operator::Floor,
            "ceil" => Operator::Ceil,
            "abs" => Operator::Abs,
            "atan" => Operator::Atan,
            "sort" => Operator::Sort,
            "rev" => Operator::Rev,
            "avg" => Operator::Avg,
            "unkn" => Operator::Unkn,
            "inf" => Operator::Inf,
            "neginf" => Operator::NegInf,
            "now" => Operator::Now,
            "dup" => Operator::Dup,
            "exc" => Operator::Exc,
            "pop" => Operator::Pop,
            _ => return None,
        };
        Some(op)
    }

    fn name(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
            Operator::AddNan => "addnan",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::If => "if",
            Operator::Min => "min",
            Operator::Max => "max",
            Operator::Limit => "limit",
            Operator::Un => "un",
            Operator::IsInf => "isinf",
            Operator::Sin => "sin",
            Operator::Cos => "cos",
            Operator::Log => "log",
            Operator::Exp => "exp",
            Operator::Sqrt => "sqrt",
            Operator::Floor => "floor",
            Operator::Ceil => "ceil",
            Operator::Abs => "abs",
            Operator::Atan => "atan",
            Operator::Sort => "sort",
            Operator::Rev => "rev",
            Operator::Avg => "avg",
            Operator::Unkn => "unkn",
            Operator::Inf => "inf",
            Operator::NegInf => "neginf",
            Operator::Now => "now",
            Operator::Dup => "dup",
            Operator::Exc => "exc",
            Operator::Pop => "pop",
        }
    }
}

/// Compiled expression token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Numeric literal
    Number(f64),
    /// Built-in operator
    Op(Operator),
    /// Bucket timestamp
    Time,
    /// Symbolic reference resolved per bucket
    Reference(String),
}

/// Expression tokenized once, evaluated once per bucket
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    source: String,
    tokens: Vec<Token>,
}

impl CompiledExpression {
    /// Tokenize an expression
    pub fn compile(expression: &str) -> Result<Self, ExpressionError> {
        let tokens = expression
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(classify)
            .collect::<Result<Vec<_>, _>>()?;

        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }

        Ok(Self {
            source: expression.to_string(),
            tokens,
        })
    }

    /// Original expression text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Compiled tokens
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Symbolic references in order of appearance
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Reference(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

fn classify(token: &str) -> Result<Token, ExpressionError> {
    if let Some(op) = Operator::lookup(token) {
        return Ok(Token::Op(op));
    }
    if token.eq_ignore_ascii_case("time") {
        return Ok(Token::Time);
    }
    match token.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => Ok(Token::Reference(token.to_string())),
        _ => token
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ExpressionError::InvalidToken(token.to_string())),
    }
}

/// Stack machine evaluating compiled expressions
pub struct RpnCalculator {
    resolver: Box<dyn ReferenceResolver>,
}

impl Default for RpnCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RpnCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpnCalculator").finish_non_exhaustive()
    }
}

impl RpnCalculator {
    /// Calculator resolving references by series shortcut
    pub fn new() -> Self {
        Self::with_resolver(ShortcutResolver)
    }

    /// Calculator with a custom reference resolver
    pub fn with_resolver(resolver: impl ReferenceResolver + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
        }
    }

    /// Compile and evaluate in one step
    pub fn evaluate_str(
        &self,
        expression: &str,
        scope: &dyn EvaluationScope,
    ) -> Result<f64, ExpressionError> {
        self.evaluate(&CompiledExpression::compile(expression)?, scope)
    }

    /// Evaluate and return the value on top of the stack
    pub fn evaluate(
        &self,
        expression: &CompiledExpression,
        scope: &dyn EvaluationScope,
    ) -> Result<f64, ExpressionError> {
        self.execute(expression, scope)?
            .pop()
            .ok_or(ExpressionError::Empty)
    }

    /// Evaluate and return the whole stack, bottom first
    pub fn execute(
        &self,
        expression: &CompiledExpression,
        scope: &dyn EvaluationScope,
    ) -> Result<Vec<f64>, ExpressionError> {
        let mut stack = Stack::default();

        for token in &expression.tokens {
            match token {
                Token::Number(n) => stack.push(*n),
                Token::Time => stack.push(scope.timestamp() as f64),
                Token::Reference(name) => {
                    let value = self
                        .resolver
                        .resolve(name, scope)
                        .ok_or_else(|| ExpressionError::UnknownReference(name.clone()))?;
                    stack.push(value);
                }
                Token::Op(op) => apply(*op, &mut stack)?,
            }
        }

        Ok(stack.values)
    }
}

#[derive(Default)]
struct Stack {
    values: Vec<f64>,
}

impl Stack {
    fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    fn pop(&mut self, op: Operator) -> Result<f64, ExpressionError> {
        self.values
            .pop()
            .ok_or_else(|| ExpressionError::StackUnderflow {
                operator: op.name().to_string(),
            })
    }

    /// Pop `b` then `a`, returning `(a, b)` in push order
    fn pop2(&mut self, op: Operator) -> Result<(f64, f64), ExpressionError> {
        let b = self.pop(op)?;
        let a = self.pop(op)?;
        Ok((a, b))
    }

    /// Pop a count operand, then that many values in push order
    fn pop_counted(&mut self, op: Operator) -> Result<Vec<f64>, ExpressionError> {
        let raw = self.pop(op)?;
        let invalid = || ExpressionError::InvalidCount {
            operator: op.name().to_string(),
            count: raw.to_string(),
        };
        if !raw.is_finite() || raw < 0.0 || raw.fract() != 0.0 {
            return Err(invalid());
        }
        let count = raw as usize;
        if count > self.values.len() {
            return Err(invalid());
        }
        Ok(self.values.split_off(self.values.len() - count))
    }
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn apply(op: Operator, stack: &mut Stack) -> Result<(), ExpressionError> {
    use Operator::*;

    match op {
        Add | Sub | Mul | Div | Mod | Lt | Le | Gt | Ge | Eq | Ne | Min | Max | AddNan => {
            let (a, b) = stack.pop2(op)?;
            let result = match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div => a / b,
                Mod => a % b,
                Lt => truth(a < b),
                Le => truth(a <= b),
                Gt => truth(a > b),
                Ge => truth(a >= b),
                Eq => truth(a == b),
                Ne => truth(a != b),
                Min if a.is_nan() || b.is_nan() => f64::NAN,
                Max if a.is_nan() || b.is_nan() => f64::NAN,
                Min => a.min(b),
                Max => a.max(b),
                _ => match (a.is_nan(), b.is_nan()) {
                    (true, true) => f64::NAN,
                    (true, false) => b,
                    (false, true) => a,
                    (false, false) => a + b,
                },
            };
            stack.push(result);
        }
        If => {
            let otherwise = stack.pop(op)?;
            let then = stack.pop(op)?;
            let condition = stack.pop(op)?;
            stack.push(if condition != 0.0 && !condition.is_nan() {
                then
            } else {
                otherwise
            });
        }
        Limit => {
            let upper = stack.pop(op)?;
            let lower = stack.pop(op)?;
            let value = stack.pop(op)?;
            let in_range = value >= lower && value <= upper;
            stack.push(if in_range { value } else { f64::NAN });
        }
        Un | IsInf | Sin | Cos | Log | Exp | Sqrt | Floor | Ceil | Abs | Atan => {
            let a = stack.pop(op)?;
            stack.push(match op {
                Un => truth(a.is_nan()),
                IsInf => truth(a.is_infinite()),
                Sin => a.sin(),
                Cos => a.cos(),
                Log => a.ln(),
                Exp => a.exp(),
                Sqrt => a.sqrt(),
                Floor => a.floor(),
                Ceil => a.ceil(),
                Abs => a.abs(),
                _ => a.atan(),
            });
        }
        Sort => {
            let mut values = stack.pop_counted(op)?;
            values.sort_by(|a, b| a.total_cmp(b));
            stack.values.extend(values);
        }
        Rev => {
            let values = stack.pop_counted(op)?;
            stack.values.extend(values.into_iter().rev());
        }
        Avg => {
            let values = stack.pop_counted(op)?;
            let known: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
            stack.push(if known.is_empty() {
                f64::NAN
            } else {
                known.iter().sum::<f64>() / known.len() as f64
            });
        }
        Unkn => stack.push(f64::NAN),
        Inf => stack.push(f64::INFINITY),
        NegInf => stack.push(f64::NEG_INFINITY),
        Now => stack.push(Utc::now().timestamp() as f64),
        Dup => {
            let a = stack.pop(op)?;
            stack.push(a);
            stack.push(a);
        }
        Exc => {
            let (a, b) = stack.pop2(op)?;
            stack.push(b);
            stack.push(a);
        }
        Pop => {
            stack.pop(op)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Scope {
        timestamp: i64,
        values: HashMap<&'static str, f64>,
    }

    impl Scope {
        fn empty() -> Self {
            Self {
                timestamp: 120,
                values: HashMap::new(),
            }
        }
    }

    impl EvaluationScope for Scope {
        fn timestamp(&self) -> i64 {
            self.timestamp
        }

        fn lookup_by_shortcut(&self, name: &str) -> Option<f64> {
            self.values.get(name).copied()
        }
    }

    fn eval(expr: &str) -> f64 {
        RpnCalculator::new().evaluate_str(expr, &Scope::empty()).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("5,1,10,+,+"), 16.0);
        assert_eq!(eval("1234,100,%"), 34.0);
        assert_eq!(eval("10,4,-"), 6.0);
        assert_eq!(eval("1,0,/"), f64::INFINITY);
        assert!(eval("0,0,/").is_nan());
    }

    #[test]
    fn test_sort_leaves_largest_on_top() {
        let calc = RpnCalculator::new();
        let expr = CompiledExpression::compile("9,3,4,5,1,2,8,6,7,0,10,sort").unwrap();
        let mut stack = calc.execute(&expr, &Scope::empty()).unwrap();
        let mut popped = Vec::new();
        while let Some(v) = stack.pop() {
            popped.push(v);
        }
        assert_eq!(popped, vec![9.0, 8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_rev_and_avg() {
        let calc = RpnCalculator::new();
        let expr = CompiledExpression::compile("1,2,3,3,rev").unwrap();
        assert_eq!(calc.execute(&expr, &Scope::empty()).unwrap(), vec![3.0, 2.0, 1.0]);
        assert_eq!(eval("2,unkn,4,3,avg"), 3.0);
        assert!(eval("unkn,1,avg").is_nan());
    }

    #[test]
    fn test_addnan() {
        assert_eq!(eval("unkn,5,addnan"), 5.0);
        assert_eq!(eval("5,unkn,addnan"), 5.0);
        assert!(eval("unkn,unkn,addnan").is_nan());
        assert!(eval("unkn,5,+").is_nan());
    }

    #[test]
    fn test_comparisons_and_if() {
        assert_eq!(eval("1,2,lt"), 1.0);
        assert_eq!(eval("2,2,ne"), 0.0);
        assert_eq!(eval("1,10,20,if"), 10.0);
        assert_eq!(eval("0,10,20,IFTE"), 20.0);
    }

    #[test]
    fn test_limit_and_min_max() {
        assert_eq!(eval("5,0,10,limit"), 5.0);
        assert!(eval("15,0,10,limit").is_nan());
        assert_eq!(eval("3,7,max"), 7.0);
        assert!(eval("3,unkn,min").is_nan());
    }

    #[test]
    fn test_stack_ops_and_constants() {
        assert_eq!(eval("3,dup,*"), 9.0);
        assert_eq!(eval("1,2,exc,-"), 1.0);
        assert_eq!(eval("1,2,pop"), 1.0);
        assert_eq!(eval("inf,isinf"), 1.0);
        assert_eq!(eval("neginf,abs"), f64::INFINITY);
        assert_eq!(eval("unkn,un"), 1.0);
        assert!(eval("now") > 1_600_000_000.0);
    }

    #[test]
    fn test_time_is_bucket_timestamp() {
        assert_eq!(eval("TIME,60,/"), 2.0);
    }

    #[test]
    fn test_references() {
        let mut scope = Scope::empty();
        scope.values.insert("a", 3.0);
        scope.values.insert("sys.cpu", 4.0);
        let calc = RpnCalculator::new();
        assert_eq!(calc.evaluate_str("a,sys.cpu,*", &scope).unwrap(), 12.0);
        assert_eq!(
            calc.evaluate_str("a,missing,+", &scope),
            Err(ExpressionError::UnknownReference("missing".into()))
        );
    }

    #[test]
    fn test_custom_resolver() {
        struct Constant;
        impl ReferenceResolver for Constant {
            fn resolve(&self, _token: &str, _scope: &dyn EvaluationScope) -> Option<f64> {
                Some(2.0)
            }
        }
        let calc = RpnCalculator::with_resolver(Constant);
        assert_eq!(calc.evaluate_str("anything,3,*", &Scope::empty()).unwrap(), 6.0);
    }

    #[test]
    fn test_errors() {
        let calc = RpnCalculator::new();
        let scope = Scope::empty();
        assert!(matches!(
            calc.evaluate_str("1,+", &scope),
            Err(ExpressionError::StackUnderflow { .. })
        ));
        assert!(matches!(
            calc.evaluate_str("1,2,5,sort", &scope),
            Err(ExpressionError::InvalidCount { .. })
        ));
        assert!(matches!(
            calc.evaluate_str("1,$x,+", &scope),
            Err(ExpressionError::InvalidToken(_))
        ));
        assert_eq!(CompiledExpression::compile(" , "), Err(ExpressionError::Empty));
    }

    #[test]
    fn test_compiled_references() {
        let expr = CompiledExpression::compile("a,b,+,time,*").unwrap();
        assert_eq!(expr.references().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
