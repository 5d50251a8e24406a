//! Regular expressions over tokens.
//!
//! Phrase (`->`) and parse (`^`) rule bodies share one grammar:
//!
//! ```text
//! expr   ::= concat ('|' concat)*
//! concat ::= qual+
//! qual   ::= atom ('?' | '*' | '+')?
//! atom   ::= '(' expr ')' | literal | '&' ident | '@' ident
//! ```
//!
//! The parser produces an [`Expr`] tree; compilation into an NFA lives in
//! `engine::nfa`. An atom is kept as its raw token here -- reference sigils
//! (`&`/`@`) and direction prefixes (`/`, `\`) are interpreted at compile
//! time, since their meaning depends on whether the rule is a phrase or a
//! parse expression.

use crate::error::{Result, ValetError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Atom(String),
    Concat(Vec<Expr>),
    Altern(Vec<Expr>),
    Opt(Box<Expr>),
    Star(Box<Expr>),
    Plus(Box<Expr>),
}

impl Expr {
    /// Names of extractors referenced by `&name` / `@name` atoms.
    pub fn references(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<String>) {
        match self {
            Expr::Atom(symbol) => {
                if let Some(caps) = regex!(r"^[&@][/\\]?(\w+(?:\.\w+)*)$").captures(symbol) {
                    let name = caps[1].to_string();
                    if !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
            Expr::Concat(subs) | Expr::Altern(subs) => {
                for s in subs {
                    s.collect_references(out);
                }
            }
            Expr::Opt(sub) | Expr::Star(sub) | Expr::Plus(sub) => sub.collect_references(out),
        }
    }
}

pub struct ExprParser<'a> {
    expr: &'a str,
    toks: Vec<&'a str>,
    pos: usize,
}

impl<'a> ExprParser<'a> {
    pub fn new(expr: &'a str) -> ExprParser<'a> {
        let toks = regex!(r"[&@]?[/\\]?\w+(?:\.\w+)*|\S").find_iter(expr).map(|m| m.as_str()).collect();
        ExprParser { expr, toks, pos: 0 }
    }

    pub fn parse(mut self) -> Result<Expr> {
        let expr = self.altern()?;
        if self.pos < self.toks.len() {
            return Err(self.error(format!("Extra tokens starting with '{}'", self.toks[self.pos])));
        }
        Ok(expr)
    }

    fn error(&self, message: String) -> ValetError {
        ValetError::Parse { file: String::new(), line: 0, message: format!("{} in expression '{}'", message, self.expr) }
    }

    fn peek(&self) -> Option<&'a str> {
        self.toks.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<&'a str> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn altern(&mut self) -> Result<Expr> {
        let mut subs = vec![self.concat()?];
        while self.peek() == Some("|") {
            self.next();
            subs.push(self.concat()?);
        }
        if subs.len() > 1 {
            Ok(Expr::Altern(subs))
        } else {
            Ok(subs.pop().unwrap())
        }
    }

    fn concat(&mut self) -> Result<Expr> {
        let mut subs = Vec::new();
        while let Some(sub) = self.qualified()? {
            subs.push(sub);
        }
        if subs.is_empty() {
            return Err(self.error("Empty concatenation".to_string()));
        }
        Ok(Expr::Concat(subs))
    }

    fn qualified(&mut self) -> Result<Option<Expr>> {
        let Some(atom) = self.atom()? else { return Ok(None) };
        let expr = match self.peek() {
            Some("?") => {
                self.next();
                Expr::Opt(Box::new(atom))
            }
            Some("*") => {
                self.next();
                Expr::Star(Box::new(atom))
            }
            Some("+") => {
                self.next();
                Expr::Plus(Box::new(atom))
            }
            _ => atom,
        };
        Ok(Some(expr))
    }

    fn atom(&mut self) -> Result<Option<Expr>> {
        match self.peek() {
            None | Some("|") | Some(")") => Ok(None),
            Some("(") => {
                self.next();
                let inner = self.altern()?;
                if self.next() != Some(")") {
                    return Err(self.error("Unbalanced '('".to_string()));
                }
                Ok(Some(inner))
            }
            Some(op @ ("?" | "*" | "+")) => Err(self.error(format!("Misplaced operator '{}'", op))),
            Some(tok) => {
                self.next();
                Ok(Some(Expr::Atom(tok.to_string())))
            }
        }
    }
}

/// Parse a phrase/parse rule body.
pub fn parse(expr: &str) -> Result<Expr> {
    ExprParser::new(expr).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(s: &str) -> Expr {
        Expr::Atom(s.to_string())
    }

    #[test]
    fn parses_concatenation_and_qualifiers() {
        let e = parse("&num ( , &num )* ( . &num )?").unwrap();
        let Expr::Concat(subs) = e else { panic!() };
        assert_eq!(subs.len(), 3);
        assert_eq!(subs[0], atom("&num"));
        assert!(matches!(subs[1], Expr::Star(_)));
        assert!(matches!(subs[2], Expr::Opt(_)));
    }

    #[test]
    fn alternation_binds_loosest() {
        let e = parse("a b | c").unwrap();
        let Expr::Altern(subs) = e else { panic!() };
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0], Expr::Concat(vec![atom("a"), atom("b")]));
    }

    #[test]
    fn direction_prefixes_stay_attached() {
        let e = parse(r"/nsubj \obj &x").unwrap();
        let Expr::Concat(ref subs) = e else { panic!() };
        assert_eq!(subs[0], atom("/nsubj"));
        assert_eq!(subs[1], atom(r"\obj"));
        assert_eq!(e.references(), vec!["x".to_string()]);
    }

    #[test]
    fn references_are_collected_once() {
        let e = parse("&num ( , &num )* @big.sub").unwrap();
        assert_eq!(e.references(), vec!["num".to_string(), "big.sub".to_string()]);
    }

    #[test]
    fn reports_misplaced_operators_and_unbalanced_parens() {
        assert!(parse("* a").is_err());
        assert!(parse("( a b").is_err());
        assert!(parse("a |").is_err());
        assert!(parse("").is_err());
    }
}
