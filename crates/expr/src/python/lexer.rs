//! Tokenizer for the Python expression subset.

use crate::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    /// Identifier or keyword (`and`, `for`, `None`, ...).
    Name(String),
    /// Operator or punctuation.
    Op(&'static str),
}

// Longest operators first so `//` wins over `/`.
const OPERATORS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "(", ")", "[", "]", "{", "}", ",", ":", ".", "+", "-",
    "*", "/", "%", "<", ">",
];

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' | '\\' => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\'' | '"' => {
                let (s, next) = read_string(&chars, i)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            c if c.is_ascii_digit() || (c == '.' && peek_digit(&chars, i + 1)) => {
                let (tok, next) = read_number(&chars, i)?;
                tokens.push(tok);
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            _ => {
                let op = OPERATORS
                    .iter()
                    .find(|op| op.chars().enumerate().all(|(k, oc)| chars.get(i + k) == Some(&oc)))
                    .ok_or_else(|| ExprError::parse(format!("unexpected character '{c}'")))?;
                tokens.push(Token::Op(op));
                i += op.len();
            }
        }
    }

    Ok(tokens)
}

fn peek_digit(chars: &[char], idx: usize) -> bool {
    chars.get(idx).is_some_and(|c| c.is_ascii_digit())
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), ExprError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\n' => break,
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

fn read_number(chars: &[char], start: usize) -> Result<(Token, usize), ExprError> {
    let mut i = start;
    let mut is_float = false;

    while i < chars.len() {
        match chars[i] {
            c if c.is_ascii_digit() || c == '_' => i += 1,
            '.' if !is_float => {
                is_float = true;
                i += 1;
            }
            'e' | 'E' => {
                is_float = true;
                i += 1;
                if matches!(chars.get(i), Some('+') | Some('-')) {
                    i += 1;
                }
            }
            _ => break,
        }
    }

    let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
    let tok = if is_float {
        Token::Float(
            text.parse()
                .map_err(|_| ExprError::parse(format!("invalid number: {text}")))?,
        )
    } else {
        Token::Int(
            text.parse()
                .map_err(|_| ExprError::parse(format!("integer literal out of range: {text}")))?,
        )
    };
    Ok((tok, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_is_a_single_operator() {
        let tokens = tokenize("a // 2").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Name("a".into()), Token::Op("//"), Token::Int(2)]
        );
    }

    #[test]
    fn comments_and_escapes() {
        let tokens = tokenize("'it\\'s' # trailing comment").unwrap();
        assert_eq!(tokens, vec![Token::Str("it's".into())]);
    }

    #[test]
    fn unterminated_string_is_rejected() {
        assert!(tokenize("data['amount").is_err());
    }

    #[test]
    fn float_literals() {
        assert_eq!(tokenize("99.99").unwrap(), vec![Token::Float(99.99)]);
        assert_eq!(tokenize("1e3").unwrap(), vec![Token::Float(1000.0)]);
    }
}
