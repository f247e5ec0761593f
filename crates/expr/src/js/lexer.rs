//! Tokenizer for the JavaScript expression subset.
//!
//! Comments are dropped here, so later stages never see `//` or `/* */`.
//! Each token remembers whether a line break preceded it; the parser uses
//! that for automatic semicolon insertion.

use crate::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Regex { pattern: String, flags: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub tok: Tok,
    pub nl_before: bool,
}

const PUNCTUATORS: &[&str] = &[
    "===", "!==", "**", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "=>", "(", ")", "[", "]",
    "{", "}", ",", ";", ":", ".", "?", "+", "-", "*", "/", "%", "<", ">", "!", "=",
];

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut nl_before = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' || c == '\r' || c == '\u{2028}' || c == '\u{2029}' {
            nl_before = true;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let mut j = i + 2;
            loop {
                match chars.get(j) {
                    None => return Err(ExprError::parse("unterminated comment")),
                    Some('*') if chars.get(j + 1) == Some(&'/') => break,
                    Some('\n') => nl_before = true,
                    _ => {}
                }
                j += 1;
            }
            i = j + 2;
            continue;
        }

        let (tok, next) = match c {
            '\'' | '"' | '`' => read_string(&chars, i)?,
            c if c.is_ascii_digit() || (c == '.' && peek_digit(&chars, i + 1)) => {
                read_number(&chars, i)?
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                let mut j = i;
                while j < chars.len()
                    && (chars[j].is_alphanumeric() || chars[j] == '_' || chars[j] == '$')
                {
                    j += 1;
                }
                (Tok::Ident(chars[start..j].iter().collect()), j)
            }
            '/' if regex_allowed(tokens.last()) => read_regex(&chars, i)?,
            _ => read_punct(&chars, i)?,
        };

        tokens.push(Token { tok, nl_before });
        nl_before = false;
        i = next;
    }

    Ok(tokens)
}

/// A `/` starts a regex literal unless the previous token ends an operand.
fn regex_allowed(prev: Option<&Token>) -> bool {
    match prev.map(|t| &t.tok) {
        None => true,
        Some(Tok::Punct(p)) => !matches!(*p, ")" | "]" | "}"),
        Some(Tok::Ident(name)) => matches!(name.as_str(), "return" | "typeof"),
        Some(_) => false,
    }
}

fn peek_digit(chars: &[char], idx: usize) -> bool {
    chars.get(idx).is_some_and(|c| c.is_ascii_digit())
}

fn read_punct(chars: &[char], i: usize) -> Result<(Tok, usize), ExprError> {
    let p = PUNCTUATORS
        .iter()
        .find(|p| p.chars().enumerate().all(|(k, pc)| chars.get(i + k) == Some(&pc)))
        .ok_or_else(|| ExprError::parse(format!("unexpected character '{}'", chars[i])))?;

    // `a?.5:b` is a conditional, not optional chaining.
    if *p == "?." && peek_digit(chars, i + 2) {
        return Ok((Tok::Punct("?"), i + 1));
    }
    Ok((Tok::Punct(p), i + p.len()))
}

fn read_string(chars: &[char], start: usize) -> Result<(Tok, usize), ExprError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((Tok::Str(out), i + 1)),
            '\n' if quote != '`' => break,
            '$' if quote == '`' && chars.get(i + 1) == Some(&'{') => {
                return Err(ExprError::parse("template interpolation is not supported"));
            }
            '\\' => {
                let esc = chars
                    .get(i + 1)
                    .ok_or_else(|| ExprError::parse("unterminated string literal"))?;
                out.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => *other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    Err(ExprError::parse("unterminated string literal"))
}

fn read_number(chars: &[char], start: usize) -> Result<(Tok, usize), ExprError> {
    let mut i = start;
    let mut seen_dot = false;

    while i < chars.len() {
        match chars[i] {
            c if c.is_ascii_digit() || c == '_' => i += 1,
            '.' if !seen_dot => {
                seen_dot = true;
                i += 1;
            }
            'e' | 'E' => {
                i += 1;
                if matches!(chars.get(i), Some('+') | Some('-')) {
                    i += 1;
                }
            }
            _ => break,
        }
    }

    let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
    let n = text
        .parse::<f64>()
        .map_err(|_| ExprError::parse(format!("invalid number: {text}")))?;
    Ok((Tok::Num(n), i))
}

fn read_regex(chars: &[char], start: usize) -> Result<(Tok, usize), ExprError> {
    let mut pattern = String::new();
    let mut in_class = false;
    let mut i = start + 1;

    loop {
        match chars.get(i) {
            None | Some('\n') => return Err(ExprError::parse("unterminated regex literal")),
            Some('\\') => {
                pattern.push('\\');
                if let Some(c) = chars.get(i + 1) {
                    pattern.push(*c);
                }
                i += 2;
            }
            Some('[') => {
                in_class = true;
                pattern.push('[');
                i += 1;
            }
            Some(']') => {
                in_class = false;
                pattern.push(']');
                i += 1;
            }
            Some('/') if !in_class => {
                i += 1;
                break;
            }
            Some(c) => {
                pattern.push(*c);
                i += 1;
            }
        }
    }

    let mut flags = String::new();
    while let Some(c) = chars.get(i).filter(|c| c.is_ascii_alphabetic()) {
        flags.push(*c);
        i += 1;
    }
    Ok((Tok::Regex { pattern, flags }, i))
}
