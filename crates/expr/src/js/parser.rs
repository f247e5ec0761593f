//! Recursive-descent parser for the JavaScript subset.
//!
//! A script is either a single expression (optionally ending in `;`) or, when
//! it contains a `return` keyword, a function body made of declarations,
//! assignments, `if`/`else`, blocks and `return`. There are no loops, so every
//! script terminates.

use super::lexer::{Tok, Token};
use crate::ExprError;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Program {
    Expr(Expr),
    Body(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Decl {
        name: String,
        init: Option<Expr>,
        constant: bool,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Return(Option<Expr>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    Block(Vec<Stmt>),
    Expr(Expr),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Regex {
        pattern: String,
        flags: String,
    },
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
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
    /// A run of one logical operator, operands left to right.
    Logical {
        op: LogicalOp,
        operands: Vec<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Arrow {
        params: Vec<String>,
        body: ArrowBody,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ArrowBody {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
    Pos,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// Keywords that have no meaning in the subset and must not be used as names.
const RESERVED: &[&str] = &[
    "function", "new", "this", "class", "import", "export", "await", "yield", "delete", "void",
    "in", "instanceof", "for", "while", "do", "switch", "case", "break", "continue", "throw",
    "try", "catch", "finally", "with", "super", "async",
];

pub(crate) fn parse(tokens: &[Token]) -> Result<Program, ExprError> {
    let mut p = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };

    let is_body = tokens
        .iter()
        .any(|t| matches!(&t.tok, Tok::Ident(name) if name == "return"));

    let program = if is_body {
        let mut stmts = Vec::new();
        while p.peek().is_some() {
            stmts.push(p.statement()?);
        }
        Program::Body(stmts)
    } else {
        let expr = p.expression()?;
        p.eat_punct(";");
        Program::Expr(expr)
    };

    if p.peek().is_some() {
        return Err(p.unexpected("end of script"));
    }
    Ok(program)
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

    fn peek_tok(&self) -> Option<&'a Tok> {
        self.peek().map(|t| &t.tok)
    }

    fn next(&mut self) -> Option<&'a Tok> {
        let tok = self.tokens.get(self.pos).map(|t| &t.tok);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn at_punct(&self, p: &str) -> bool {
        matches!(self.peek_tok(), Some(Tok::Punct(q)) if *q == p)
    }

    fn at_ident(&self, name: &str) -> bool {
        matches!(self.peek_tok(), Some(Tok::Ident(n)) if n == name)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ExprError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{p}'")))
        }
    }

    fn ident(&mut self) -> Result<String, ExprError> {
        match self.next() {
            Some(Tok::Ident(name)) if !RESERVED.contains(&name.as_str()) => Ok(name.clone()),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected("identifier"))
            }
        }
    }

    fn unexpected(&self, wanted: &str) -> ExprError {
        match self.peek_tok() {
            Some(tok) => ExprError::parse(format!("expected {wanted}, found {tok:?}")),
            None => ExprError::parse(format!("expected {wanted}, found end of script")),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::parse("expression nested too deeply"));
        }
        Ok(())
    }

    // ---- statements ----

    fn statement(&mut self) -> Result<Stmt, ExprError> {
        self.enter()?;
        let stmt = self.statement_inner()?;
        self.depth -= 1;
        Ok(stmt)
    }

    fn statement_inner(&mut self) -> Result<Stmt, ExprError> {
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.at_punct("{") {
            self.pos += 1;
            return Ok(Stmt::Block(self.block_rest()?));
        }

        let keyword = match self.peek_tok() {
            Some(Tok::Ident(name)) => Some(name.as_str()),
            _ => None,
        };

        match keyword {
            Some("const" | "let" | "var") => {
                let constant = keyword == Some("const");
                self.pos += 1;
                let mut decls = Vec::new();
                loop {
                    let name = self.ident()?;
                    let init = if self.eat_punct("=") {
                        Some(self.expression()?)
                    } else {
                        None
                    };
                    if constant && init.is_none() {
                        return Err(ExprError::parse(format!(
                            "missing initializer in const declaration of '{name}'"
                        )));
                    }
                    decls.push(Stmt::Decl {
                        name,
                        init,
                        constant,
                    });
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.end_statement()?;
                Ok(if decls.len() == 1 {
                    decls.remove(0)
                } else {
                    Stmt::Block(decls)
                })
            }
            Some("return") => {
                self.pos += 1;
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement()?;
                Ok(Stmt::Return(value))
            }
            Some("if") => {
                self.pos += 1;
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.at_ident("else") {
                    self.pos += 1;
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            Some(_) if self.is_assignment() => {
                let name = self.ident()?;
                self.expect_punct("=")?;
                let value = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::Assign { name, value })
            }
            _ => {
                let expr = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block_rest(&mut self) -> Result<Vec<Stmt>, ExprError> {
        let mut stmts = Vec::new();
        while !self.eat_punct("}") {
            if self.peek().is_none() {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn is_assignment(&self) -> bool {
        matches!(self.peek_tok(), Some(Tok::Ident(_)))
            && matches!(
                self.tokens.get(self.pos + 1).map(|t| &t.tok),
                Some(Tok::Punct("="))
            )
    }

    /// A `return` argument is absent at `;`, `}`, end of input or a line break.
    fn at_statement_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(t) => t.nl_before || self.at_punct(";") || self.at_punct("}"),
        }
    }

    fn end_statement(&mut self) -> Result<(), ExprError> {
        if self.eat_punct(";") || self.at_statement_end() {
            Ok(())
        } else {
            Err(self.unexpected("';'"))
        }
    }

    // ---- expressions ----

    pub(crate) fn expression(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let expr = self.conditional()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn conditional(&mut self) -> Result<Expr, ExprError> {
        if self.at_arrow() {
            return self.arrow();
        }
        let cond = self.logical_or()?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.expression()?;
        self.expect_punct(":")?;
        let otherwise = self.expression()?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn logical_or(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut operands = vec![self.logical_and()?];
        let mut run_op: Option<LogicalOp> = None;
        loop {
            let op = if self.eat_punct("||") {
                LogicalOp::Or
            } else if self.eat_punct("??") {
                LogicalOp::Nullish
            } else {
                break;
            };
            let right = self.logical_and()?;
            if let Some(current) = run_op.filter(|current| *current != op) {
                // Switching between `||` and `??` nests the run so far.
                self.enter()?;
                let run = std::mem::take(&mut operands);
                operands.push(Expr::Logical {
                    op: current,
                    operands: run,
                });
            }
            run_op = Some(op);
            operands.push(right);
        }
        self.depth = depth;
        match run_op {
            Some(op) => Ok(Expr::Logical { op, operands }),
            None => operands
                .pop()
                .ok_or_else(|| ExprError::parse("empty logical expression")),
        }
    }

    fn logical_and(&mut self) -> Result<Expr, ExprError> {
        let first = self.equality()?;
        if !self.at_punct("&&") {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.eat_punct("&&") {
            operands.push(self.equality()?);
        }
        Ok(Expr::Logical {
            op: LogicalOp::And,
            operands,
        })
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut left = next(self)?;
        'outer: loop {
            for (sym, op) in ops {
                if self.eat_punct(sym) {
                    // Every link nests the tree one level deeper.
                    self.enter()?;
                    let right = next(self)?;
                    left = binary(*op, left, right);
                    continue 'outer;
                }
            }
            self.depth = depth;
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[
                ("===", BinOp::StrictEq),
                ("!==", BinOp::StrictNe),
                ("==", BinOp::LooseEq),
                ("!=", BinOp::LooseNe),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[
                ("<=", BinOp::Le),
                (">=", BinOp::Ge),
                ("<", BinOp::Lt),
                (">", BinOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
            Self::exponent,
        )
    }

    fn exponent(&mut self) -> Result<Expr, ExprError> {
        let base = self.unary()?;
        if self.eat_punct("**") {
            self.enter()?;
            let exp = self.exponent()?;
            self.depth -= 1;
            return Ok(binary(BinOp::Pow, base, exp));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = if self.eat_punct("!") {
            UnaryOp::Not
        } else if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Pos
        } else if self.at_ident("typeof") {
            self.pos += 1;
            UnaryOp::TypeOf
        } else {
            return self.postfix();
        };
        self.enter()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut expr = self.primary()?;
        loop {
            if self.at_punct(".") || self.at_punct("?.") || self.at_punct("[") || self.at_punct("(") {
                self.enter()?;
            }
            if self.eat_punct(".") {
                let property = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                if self.eat_punct("[") {
                    let index = self.expression()?;
                    self.expect_punct("]")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: true,
                    };
                } else {
                    let property = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else if self.at_punct("(") {
                self.pos += 1;
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                self.depth = depth;
                return Ok(expr);
            }
        }
    }

    /// Property names after `.` may be any identifier, keywords included.
    fn property_name(&mut self) -> Result<String, ExprError> {
        match self.next() {
            Some(Tok::Ident(name)) => Ok(name.clone()),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected("property name"))
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            args.push(self.expression()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let expr = match self.next() {
            Some(Tok::Num(n)) => Expr::Num(*n),
            Some(Tok::Str(s)) => Expr::Str(s.clone()),
            Some(Tok::Regex { pattern, flags }) => Expr::Regex {
                pattern: pattern.clone(),
                flags: flags.clone(),
            },
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" => Expr::Null,
                "undefined" => Expr::Undefined,
                other if RESERVED.contains(&other) => {
                    return Err(ExprError::parse(format!("'{other}' is not supported")));
                }
                "const" | "let" | "var" | "return" | "if" | "else" | "typeof" => {
                    return Err(ExprError::parse(format!("unexpected keyword '{name}'")));
                }
                _ => Expr::Ident(name.clone()),
            },
            Some(Tok::Punct("(")) => {
                let inner = self.expression()?;
                self.expect_punct(")")?;
                inner
            }
            Some(Tok::Punct("[")) => {
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.expression()?);
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                Expr::Array(items)
            }
            Some(Tok::Punct("{")) => self.object_literal()?,
            Some(_) => {
                self.pos -= 1;
                return Err(self.unexpected("expression"));
            }
            None => return Err(self.unexpected("expression")),
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn object_literal(&mut self) -> Result<Expr, ExprError> {
        let mut entries = Vec::new();
        while !self.eat_punct("}") {
            let key = match self.next() {
                Some(Tok::Ident(name)) => name.clone(),
                Some(Tok::Str(s)) => s.clone(),
                Some(Tok::Num(n)) => format_key(*n),
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.unexpected("property key"));
                }
            };
            let value = if self.eat_punct(":") {
                self.expression()?
            } else {
                Expr::Ident(key.clone())
            };
            entries.push((key, value));
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }

    /// `x => ...` or `(a, b) => ...` starts here.
    fn at_arrow(&self) -> bool {
        let tok_at = |i: usize| self.tokens.get(i).map(|t| &t.tok);
        match tok_at(self.pos) {
            Some(Tok::Ident(_)) => matches!(tok_at(self.pos + 1), Some(Tok::Punct("=>"))),
            Some(Tok::Punct("(")) => {
                let mut i = self.pos + 1;
                loop {
                    match tok_at(i) {
                        Some(Tok::Punct(")")) => {
                            return matches!(tok_at(i + 1), Some(Tok::Punct("=>")));
                        }
                        Some(Tok::Ident(_)) | Some(Tok::Punct(",")) => i += 1,
                        _ => return false,
                    }
                }
            }
            _ => false,
        }
    }

    fn arrow(&mut self) -> Result<Expr, ExprError> {
        let mut params = Vec::new();
        if self.eat_punct("(") {
            while !self.eat_punct(")") {
                params.push(self.ident()?);
                if !self.eat_punct(",") {
                    self.expect_punct(")")?;
                    break;
                }
            }
        } else {
            params.push(self.ident()?);
        }
        self.expect_punct("=>")?;

        let body = if self.eat_punct("{") {
            ArrowBody::Block(self.block_rest()?)
        } else {
            ArrowBody::Expr(Box::new(self.expression()?))
        };
        Ok(Expr::Arrow { params, body })
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn format_key(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::js::lexer::tokenize;

    fn parse_str(src: &str) -> Result<Program, ExprError> {
        parse(&tokenize(src)?)
    }

    #[test]
    fn bare_expression_with_trailing_semicolon() {
        assert!(matches!(
            parse_str("data.amount > 100;").unwrap(),
            Program::Expr(Expr::Binary { op: BinOp::Gt, .. })
        ));
    }

    #[test]
    fn return_inside_a_string_is_not_a_body() {
        assert!(matches!(
            parse_str("data.kind === 'return'").unwrap(),
            Program::Expr(_)
        ));
    }

    #[test]
    fn body_with_declarations() {
        let program = parse_str("const limit = 10\nlet n = data.n;\nreturn n < limit").unwrap();
        match program {
            Program::Body(stmts) => {
                assert_eq!(stmts.len(), 3);
                assert!(matches!(stmts[2], Stmt::Return(Some(_))));
            }
            other => panic!("expected body, got {other:?}"),
        }
    }

    #[test]
    fn return_followed_by_newline_returns_nothing() {
        match parse_str("return\ntrue").unwrap() {
            Program::Body(stmts) => {
                assert_eq!(stmts[0], Stmt::Return(None));
                assert_eq!(stmts[1], Stmt::Expr(Expr::Bool(true)));
            }
            other => panic!("expected body, got {other:?}"),
        }
    }

    #[test]
    fn arrow_functions() {
        assert!(matches!(
            parse_str("data.items.some(x => x > 1)").unwrap(),
            Program::Expr(Expr::Call { .. })
        ));
        assert!(parse_str("data.items.map((a, b) => a + b)").is_ok());
    }

    #[test]
    fn unsupported_keywords_are_rejected() {
        assert!(parse_str("new Function('return 1')").is_err());
        assert!(parse_str("this.x").is_err());
        assert!(parse_str("function f() { return 1 }").is_err());
    }

    #[test]
    fn syntax_errors() {
        assert!(parse_str("data.amount >").is_err());
        assert!(parse_str("(1 + 2").is_err());
        assert!(parse_str("1 2").is_err());
    }

    #[test]
    fn logical_runs_stay_flat() {
        let src = vec!["x === 1"; 300].join(" || ");
        match parse_str(&src).unwrap() {
            Program::Expr(Expr::Logical { op, operands }) => {
                assert_eq!(op, LogicalOp::Or);
                assert_eq!(operands.len(), 300);
            }
            other => panic!("expected logical run, got {other:?}"),
        }
        match parse_str("a || b ?? c").unwrap() {
            Program::Expr(Expr::Logical { op, operands }) => {
                assert_eq!(op, LogicalOp::Nullish);
                assert!(matches!(&operands[0], Expr::Logical { op: LogicalOp::Or, .. }));
            }
            other => panic!("expected logical run, got {other:?}"),
        }
    }

    #[test]
    fn long_operator_chains_are_bounded() {
        assert!(parse_str(&vec!["1"; 40].join(" + ")).is_ok());
        assert!(parse_str(&vec!["1"; 500].join(" + ")).is_err());
        assert!(parse_str(&vec!["a"; 500].join(" === ")).is_err());
        assert!(parse_str(&vec!["a"; 500].join(" || b ?? ")).is_err());
        assert!(parse_str(&format!("x{}", "[0]".repeat(500))).is_err());
        assert!(parse_str(&format!("x{}", ".y".repeat(500))).is_err());
    }
}
