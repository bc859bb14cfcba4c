//! Tokenizer for the expression language.

use super::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    /// `#`, the current element inside a collection predicate
    Element,
    /// `#acc`, the running accumulator inside `reduce`
    Accumulator,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
}

/// A token and the byte offset where it starts
pub(super) type Spanned = (Token, usize);

pub(super) fn tokenize(source: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let peek = chars.get(i + 1).map(|(_, c)| *c);
        let two = |t: Token| -> (Token, usize) { (t, 2) };
        let one = |t: Token| -> (Token, usize) { (t, 1) };

        let (token, width) = match (c, peek) {
            ('=', Some('=')) => two(Token::EqEq),
            ('!', Some('=')) => two(Token::NotEq),
            ('<', Some('=')) => two(Token::LtEq),
            ('>', Some('=')) => two(Token::GtEq),
            ('&', Some('&')) => two(Token::AndAnd),
            ('|', Some('|')) => two(Token::OrOr),
            ('(', _) => one(Token::LParen),
            (')', _) => one(Token::RParen),
            ('[', _) => one(Token::LBracket),
            (']', _) => one(Token::RBracket),
            ('{', _) => one(Token::LBrace),
            ('}', _) => one(Token::RBrace),
            (',', _) => one(Token::Comma),
            (':', _) => one(Token::Colon),
            ('?', _) => one(Token::Question),
            ('+', _) => one(Token::Plus),
            ('-', _) => one(Token::Minus),
            ('*', _) => one(Token::Star),
            ('/', _) => one(Token::Slash),
            ('%', _) => one(Token::Percent),
            ('!', _) => one(Token::Bang),
            ('<', _) => one(Token::Lt),
            ('>', _) => one(Token::Gt),
            ('.', Some(d)) if !d.is_ascii_digit() => one(Token::Dot),
            ('.', None) => one(Token::Dot),
            ('#', _) => {
                let rest: String = chars[i + 1..].iter().take(3).map(|(_, c)| *c).collect();
                let after = chars.get(i + 4).map(|(_, c)| *c);
                let is_acc =
                    rest == "acc" && !after.is_some_and(|c| c.is_alphanumeric() || c == '_');
                if is_acc {
                    (Token::Accumulator, 4)
                } else {
                    one(Token::Element)
                }
            }
            ('"', _) | ('\'', _) => {
                let (text, consumed) = lex_string(&chars, i, c)?;
                tokens.push((Token::Str(text), pos));
                i += consumed;
                continue;
            }
            (c, _) if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    // stop before a member access such as `1..` or `x.1.field`
                    if chars[i].1 == '.'
                        && !chars.get(i + 1).is_some_and(|(_, c)| c.is_ascii_digit())
                    {
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let value = text.parse::<f64>().map_err(|_| ExpressionError::Syntax {
                    position: pos,
                    message: format!("invalid number '{}'", text),
                })?;
                tokens.push((Token::Number(value), pos));
                continue;
            }
            (c, _) if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '$')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                tokens.push((Token::Ident(text), pos));
                continue;
            }
            (other, _) => {
                return Err(ExpressionError::Syntax {
                    position: pos,
                    message: format!("unexpected character '{}'", other),
                })
            }
        };

        tokens.push((token, pos));
        i += width;
    }

    Ok(tokens)
}

fn lex_string(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), ExpressionError> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((out, i - start + 1));
        }
        if c == '\\' {
            i += 1;
            let escaped = chars.get(i).map(|(_, c)| *c).ok_or(ExpressionError::Syntax {
                position: chars[start].0,
                message: "unterminated string".to_string(),
            })?;
            out.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
        } else {
            out.push(c);
        }
        i += 1;
    }
    Err(ExpressionError::Syntax {
        position: chars[start].0,
        message: "unterminated string".to_string(),
    })
}
