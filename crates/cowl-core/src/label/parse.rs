//! Parser for the textual label form.
//!
//! ```text
//! label  := "public" | "top" | clause ( "&" clause )*
//! clause := "(" name ( "|" name )* ")" | name
//! ```
//!
//! Whitespace between tokens is ignored. `,` is accepted as a synonym for
//! `&` so that lists of principals read naturally on the command line.

use std::collections::BTreeSet;

use super::{
    Clause, Label, LabelError, MAX_EXPRESSION_LEN, MAX_PARSED_CLAUSE_LEN, MAX_PARSED_CLAUSES,
    Principal,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Open,
    Close,
    Or,
    And,
    Name(&'a str),
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    const fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.input[self.pos..];
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    /// Returns the next token and the offset it started at.
    fn next_token(&mut self) -> Option<(usize, Token<'a>)> {
        self.skip_whitespace();
        let start = self.pos;
        let rest = &self.input[start..];
        let c = rest.chars().next()?;
        let token = match c {
            '(' => Token::Open,
            ')' => Token::Close,
            '|' => Token::Or,
            '&' | ',' => Token::And,
            _ => {
                let len = rest
                    .find(|ch: char| ch.is_whitespace() || "()|&,".contains(ch))
                    .unwrap_or(rest.len());
                self.pos += len;
                return Some((start, Token::Name(&rest[..len])));
            },
        };
        self.pos += c.len_utf8();
        Some((start, token))
    }
}

fn error(offset: usize, reason: impl Into<String>) -> LabelError {
    LabelError::Parse {
        offset,
        reason: reason.into(),
    }
}

fn principal(offset: usize, name: &str) -> Result<Principal, LabelError> {
    Principal::new(name).map_err(|e| error(offset, e.to_string()))
}

pub(super) fn parse_label(input: &str) -> Result<Label, LabelError> {
    if input.len() > MAX_EXPRESSION_LEN {
        return Err(error(
            MAX_EXPRESSION_LEN,
            format!("expression exceeds {MAX_EXPRESSION_LEN} bytes"),
        ));
    }

    match input.trim() {
        "" => return Err(error(0, "empty label expression")),
        "public" => return Ok(Label::public()),
        "top" => return Ok(Label::top()),
        _ => {},
    }

    let mut lexer = Lexer::new(input);
    let mut clauses = BTreeSet::new();
    loop {
        if clauses.len() >= MAX_PARSED_CLAUSES {
            return Err(error(
                lexer.pos,
                format!("more than {MAX_PARSED_CLAUSES} clauses"),
            ));
        }
        clauses.insert(parse_clause(&mut lexer)?);

        match lexer.next_token() {
            None => break,
            Some((_, Token::And)) => {},
            Some((offset, token)) => {
                return Err(error(offset, format!("expected '&', found {token:?}")));
            },
        }
    }

    Ok(Label::from_clauses(clauses))
}

fn parse_clause(lexer: &mut Lexer<'_>) -> Result<Clause, LabelError> {
    match lexer.next_token() {
        Some((offset, Token::Name(name))) => Ok(Clause::singleton(principal(offset, name)?)),
        Some((_, Token::Open)) => {
            let mut members = Vec::new();
            loop {
                match lexer.next_token() {
                    Some((offset, Token::Name(name))) => {
                        if members.len() >= MAX_PARSED_CLAUSE_LEN {
                            return Err(error(
                                offset,
                                format!("more than {MAX_PARSED_CLAUSE_LEN} principals in a clause"),
                            ));
                        }
                        members.push(principal(offset, name)?);
                    },
                    Some((offset, token)) => {
                        return Err(error(offset, format!("expected a principal, found {token:?}")));
                    },
                    None => return Err(error(lexer.input.len(), "unterminated clause")),
                }

                match lexer.next_token() {
                    Some((_, Token::Or)) => {},
                    Some((_, Token::Close)) => break,
                    Some((offset, token)) => {
                        return Err(error(offset, format!("expected '|' or ')', found {token:?}")));
                    },
                    None => return Err(error(lexer.input.len(), "unterminated clause")),
                }
            }
            Clause::new(members)
        },
        Some((offset, token)) => Err(error(offset, format!("expected a clause, found {token:?}"))),
        None => Err(error(lexer.input.len(), "expected a clause")),
    }
}
