//! Recursive-descent parser for the Python expression subset.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expression  = or_test [ "if" or_test "else" expression ]
//! or_test     = and_test ( "or" and_test )*
//! and_test    = not_test ( "and" not_test )*
//! not_test    = "not" not_test | comparison
//! comparison  = arith ( comp_op arith )*
//! arith       = term ( ("+" | "-") term )*
//! term        = factor ( ("*" | "/" | "//" | "%") factor )*
//! factor      = ("-" | "+") factor | power
//! power       = primary [ "**" factor ]
//! primary     = atom ( "[" subscript "]" | "." NAME | "(" args ")" )*
//! ```
//!
//! Comprehensions (`[... for ... in ... if ...]`, `{k: v for ...}` and bare
//! generator arguments) are accepted; lambdas, assignments and statements are not.

use serde_json::Value;

use super::lexer::Token;
use crate::ExprError;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Const(Value),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        target: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
    },
    Attr {
        target: Box<Expr>,
        name: String,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Operands of an `and` chain, left to right.
    And(Vec<Expr>),
    /// Operands of an `or` chain, left to right.
    Or(Vec<Expr>),
    Compare {
        first: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    ListComp {
        elt: Box<Expr>,
        clauses: Vec<Clause>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        clauses: Vec<Clause>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

/// One `for target in iter [if cond]*` clause of a comprehension.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Clause {
    pub target: Target,
    pub iter: Expr,
    pub conds: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Target {
    Name(String),
    Tuple(Vec<Target>),
}

/// Parse a complete token stream into a single expression.
pub(crate) fn parse(tokens: &[Token]) -> Result<Expr, ExprError> {
    if tokens.is_empty() {
        return Err(ExprError::parse("empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expression()?;
    if let Some(tok) = parser.peek() {
        return Err(ExprError::parse(format!("unexpected token: {tok:?}")));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        self.pos += 1;
        tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(Token::Op(o)) if *o == op)
    }

    fn at_name(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == name)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_name(&mut self, name: &str) -> bool {
        if self.at_name(name) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ExprError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{op}'")))
        }
    }

    fn expect_name(&mut self, name: &str) -> Result<(), ExprError> {
        if self.eat_name(name) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{name}'")))
        }
    }

    fn unexpected(&self, wanted: &str) -> ExprError {
        match self.peek() {
            Some(tok) => ExprError::parse(format!("expected {wanted}, got {tok:?}")),
            None => ExprError::parse(format!("expected {wanted}, got end of expression")),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::parse("expression nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let body = self.or_test()?;
        let expr = if self.eat_name("if") {
            let cond = self.or_test()?;
            self.expect_name("else")?;
            let otherwise = self.expression()?;
            Expr::IfElse {
                cond: Box::new(cond),
                then: Box::new(body),
                otherwise: Box::new(otherwise),
            }
        } else {
            body
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn or_test(&mut self) -> Result<Expr, ExprError> {
        let first = self.and_test()?;
        if !self.at_name("or") {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.eat_name("or") {
            operands.push(self.and_test()?);
        }
        Ok(Expr::Or(operands))
    }

    fn and_test(&mut self) -> Result<Expr, ExprError> {
        let first = self.not_test()?;
        if !self.at_name("and") {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.eat_name("and") {
            operands.push(self.not_test()?);
        }
        Ok(Expr::And(operands))
    }

    fn not_test(&mut self) -> Result<Expr, ExprError> {
        if self.eat_name("not") {
            self.enter()?;
            let operand = self.not_test()?;
            self.depth -= 1;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let first = self.arith()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comp_op() {
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn comp_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek()? {
            Token::Op("==") => CmpOp::Eq,
            Token::Op("!=") => CmpOp::Ne,
            Token::Op("<") => CmpOp::Lt,
            Token::Op("<=") => CmpOp::Le,
            Token::Op(">") => CmpOp::Gt,
            Token::Op(">=") => CmpOp::Ge,
            Token::Name(n) if n == "in" => CmpOp::In,
            Token::Name(n) if n == "not" => {
                if !matches!(self.peek_at(1), Some(Token::Name(n)) if n == "in") {
                    return None;
                }
                self.pos += 1;
                CmpOp::NotIn
            }
            Token::Name(n) if n == "is" => {
                if matches!(self.peek_at(1), Some(Token::Name(n)) if n == "not") {
                    self.pos += 1;
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn arith(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                self.depth = depth;
                return Ok(left);
            };
            // Every link nests the tree one level deeper.
            self.enter()?;
            let right = self.term()?;
            left = binary(op, left, right);
        }
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut left = self.factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                self.depth = depth;
                return Ok(left);
            };
            self.enter()?;
            let right = self.factor()?;
            left = binary(op, left, right);
        }
    }

    fn factor(&mut self) -> Result<Expr, ExprError> {
        let op = if self.eat_op("-") {
            UnaryOp::Neg
        } else if self.eat_op("+") {
            UnaryOp::Pos
        } else {
            return self.power();
        };
        self.enter()?;
        let operand = self.factor()?;
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.primary()?;
        if self.eat_op("**") {
            // Right-associative and binds tighter than unary minus on its left.
            self.enter()?;
            let exp = self.factor()?;
            self.depth -= 1;
            return Ok(binary(BinOp::Pow, base, exp));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut expr = self.atom()?;
        loop {
            if self.at_op("[") || self.at_op(".") || self.at_op("(") {
                self.enter()?;
            }
            if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else if self.eat_op(".") {
                let name = match self.next() {
                    Some(Token::Name(n)) => n.clone(),
                    _ => return Err(ExprError::parse("expected attribute name after '.'")),
                };
                expr = Expr::Attr {
                    target: Box::new(expr),
                    name,
                };
            } else if self.eat_op("(") {
                let args = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else {
                self.depth = depth;
                return Ok(expr);
            }
        }
    }

    fn subscript(&mut self, target: Expr) -> Result<Expr, ExprError> {
        let lower = if self.at_op(":") {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        if self.eat_op(":") {
            let upper = if self.at_op("]") {
                None
            } else {
                Some(Box::new(self.expression()?))
            };
            self.expect_op("]")?;
            return Ok(Expr::Slice {
                target: Box::new(target),
                lower,
                upper,
            });
        }
        self.expect_op("]")?;
        let index = lower.ok_or_else(|| ExprError::parse("empty subscript"))?;
        Ok(Expr::Index {
            target: Box::new(target),
            index,
        })
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.eat_op(")") {
            return Ok(args);
        }
        let first = self.expression()?;
        if self.at_name("for") {
            // Bare generator argument: `sum(x for x in xs)`.
            let clauses = self.comp_clauses()?;
            self.expect_op(")")?;
            return Ok(vec![Expr::ListComp {
                elt: Box::new(first),
                clauses,
            }]);
        }
        args.push(first);
        while self.eat_op(",") {
            if self.at_op(")") {
                break;
            }
            args.push(self.expression()?);
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let expr = match self.next() {
            Some(Token::Int(n)) => Expr::Const(Value::from(*n)),
            Some(Token::Float(f)) => Expr::Const(
                serde_json::Number::from_f64(*f)
                    .map(Value::Number)
                    .ok_or_else(|| ExprError::parse("non-finite float literal"))?,
            ),
            Some(Token::Str(s)) => {
                // Adjacent literals concatenate, as in `'a' 'b'`.
                let mut text = s.clone();
                while let Some(Token::Str(more)) = self.peek() {
                    text.push_str(more);
                    self.pos += 1;
                }
                Expr::Const(Value::String(text))
            }
            Some(Token::Name(n)) => match n.as_str() {
                "True" => Expr::Const(Value::Bool(true)),
                "False" => Expr::Const(Value::Bool(false)),
                "None" => Expr::Const(Value::Null),
                "lambda" | "import" | "yield" | "await" | "def" | "class" | "del" => {
                    return Err(ExprError::parse(format!("'{n}' is not supported")));
                }
                _ => Expr::Name(n.clone()),
            },
            Some(Token::Op("(")) => self.paren()?,
            Some(Token::Op("[")) => self.list()?,
            Some(Token::Op("{")) => self.dict()?,
            Some(tok) => return Err(ExprError::parse(format!("unexpected token: {tok:?}"))),
            None => return Err(ExprError::parse("unexpected end of expression")),
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn paren(&mut self) -> Result<Expr, ExprError> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.expression()?;
        if self.at_name("for") {
            let clauses = self.comp_clauses()?;
            self.expect_op(")")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                clauses,
            });
        }
        if self.eat_op(")") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(")") {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(items))
    }

    fn list(&mut self) -> Result<Expr, ExprError> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.expression()?;
        if self.at_name("for") {
            let clauses = self.comp_clauses()?;
            self.expect_op("]")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                clauses,
            });
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn dict(&mut self) -> Result<Expr, ExprError> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        let key = self.expression()?;
        if !self.eat_op(":") {
            return Err(ExprError::parse("set literals are not supported"));
        }
        let value = self.expression()?;
        if self.at_name("for") {
            let clauses = self.comp_clauses()?;
            self.expect_op("}")?;
            return Ok(Expr::DictComp {
                key: Box::new(key),
                value: Box::new(value),
                clauses,
            });
        }
        let mut entries = vec![(key, value)];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            let k = self.expression()?;
            self.expect_op(":")?;
            let v = self.expression()?;
            entries.push((k, v));
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(entries))
    }

    fn comp_clauses(&mut self) -> Result<Vec<Clause>, ExprError> {
        let mut clauses = Vec::new();
        while self.eat_name("for") {
            let target = self.target_list()?;
            self.expect_name("in")?;
            let iter = self.or_test()?;
            let mut conds = Vec::new();
            while self.eat_name("if") {
                conds.push(self.or_test()?);
            }
            clauses.push(Clause {
                target,
                iter,
                conds,
            });
        }
        Ok(clauses)
    }

    fn target_list(&mut self) -> Result<Target, ExprError> {
        let first = self.target()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_name("in") {
                break;
            }
            items.push(self.target()?);
        }
        Ok(Target::Tuple(items))
    }

    fn target(&mut self) -> Result<Target, ExprError> {
        if self.eat_op("(") {
            let inner = self.target_list()?;
            self.expect_op(")")?;
            return Ok(inner);
        }
        match self.next() {
            Some(Token::Name(n)) if !is_keyword(n) => Ok(Target::Name(n.clone())),
            _ => Err(ExprError::parse("invalid comprehension target")),
        }
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn is_keyword(name: &str) -> bool {
    matches!(
        name,
        "and" | "or" | "not" | "in" | "is" | "if" | "else" | "for" | "True" | "False" | "None"
    )
}
