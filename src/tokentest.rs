//! Token tests: per-token predicates.
//!
//! A token test holds at a single token index. The forms are membership
//! (`{ a b c }`, optionally loaded from a file with `f{path}`), regular
//! expression (`/re/`), substring (`<s>`), annotation lookup
//! (`layer[ tag1 tag2 ]`), reference to another test (`&name` / `@name`),
//! and the boolean combinations `not` / `and` / `or` with the usual
//! precedence and parentheses.
//!
//! Case-insensitive variants take an `i` suffix (or inherit it from the
//! `i:` rule delimiter); a membership test with an `s` suffix compares the
//! `lemma` annotation layer instead of the surface token.
//!
//! Within parse expressions the same predicates run against dependency edge
//! labels; lookups have no meaning there and report an error.

use std::collections::BTreeSet;

use regex::RegexBuilder;

use crate::engine::context::Context;
use crate::error::{Result, ValetError};
use crate::manager::{Capability, Manager, NsId};
use crate::tokens::TokenSequence;

/// Loads the line contents of `f{path}` membership files; implemented by the
/// manager so the import path chain applies.
pub trait LexiconLoader {
    fn load_lines(&self, path: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub enum TokenTest {
    /// Built-in ANY: holds at every token.
    Any,
    Membership { members: BTreeSet<String>, case_insensitive: bool, stemming: bool },
    Regex { pattern: String, re: regex::Regex, case_insensitive: bool },
    Substring { needle: String, case_insensitive: bool },
    Lookup { layer: String, tags: BTreeSet<String> },
    Reference { name: String },
    And(Vec<TokenTest>),
    Or(Vec<TokenTest>),
    Not(Box<TokenTest>),
}

impl TokenTest {
    /// Does the test hold at token `at`? `ns` is the namespace the test was
    /// defined in, used to resolve references.
    pub fn matches_at(
        &self,
        seq: &TokenSequence,
        at: usize,
        ns: NsId,
        mgr: &Manager,
        ctx: &mut Context<'_>,
    ) -> Result<bool> {
        match self {
            TokenTest::Any => Ok(true),
            TokenTest::Membership { members, case_insensitive, stemming } => {
                if *stemming {
                    let Some(tags) = seq.token_annotation("lemma", at) else {
                        return Err(ValetError::ParseRequirement(
                            "membership test with stemming needs a 'lemma' annotation layer".to_string(),
                        ));
                    };
                    return Ok(tags.iter().any(|t| contains(members, t, *case_insensitive)));
                }
                Ok(contains(members, seq.token(at), *case_insensitive))
            }
            TokenTest::Regex { re, .. } => Ok(re.is_match(seq.token(at))),
            TokenTest::Substring { needle, case_insensitive } => {
                let tok = seq.token(at);
                if *case_insensitive {
                    Ok(tok.to_lowercase().contains(needle))
                } else {
                    Ok(tok.contains(needle))
                }
            }
            TokenTest::Lookup { layer, tags } => {
                let Some(annotation) = seq.token_annotation(layer, at) else {
                    return Err(ValetError::ParseRequirement(format!(
                        "lookup test needs annotation layer '{}', which the token sequence lacks",
                        layer
                    )));
                };
                Ok(annotation.iter().any(|t| tags.contains(t)))
            }
            TokenTest::Reference { name } => mgr.reference_test(ns, name, ctx, |test, test_ns, mgr, ctx| {
                test.matches_at(seq, at, test_ns, mgr, ctx)
            }),
            TokenTest::And(subs) => {
                for sub in subs {
                    if !sub.matches_at(seq, at, ns, mgr, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            TokenTest::Or(subs) => {
                for sub in subs {
                    if sub.matches_at(seq, at, ns, mgr, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            TokenTest::Not(sub) => Ok(!sub.matches_at(seq, at, ns, mgr, ctx)?),
        }
    }

    /// Does the test hold for a dependency edge label?
    pub fn matches_label(&self, label: &str, ns: NsId, mgr: &Manager, ctx: &mut Context<'_>) -> Result<bool> {
        match self {
            TokenTest::Any => Ok(true),
            TokenTest::Membership { members, case_insensitive, .. } => Ok(contains(members, label, *case_insensitive)),
            TokenTest::Regex { re, .. } => Ok(re.is_match(label)),
            TokenTest::Substring { needle, case_insensitive } => {
                if *case_insensitive {
                    Ok(label.to_lowercase().contains(needle))
                } else {
                    Ok(label.contains(needle))
                }
            }
            TokenTest::Lookup { layer, .. } => Err(ValetError::ParseRequirement(format!(
                "lookup test on layer '{}' cannot be applied to a dependency edge label",
                layer
            ))),
            TokenTest::Reference { name } => mgr.reference_test(ns, name, ctx, |test, test_ns, mgr, ctx| {
                test.matches_label(label, test_ns, mgr, ctx)
            }),
            TokenTest::And(subs) => {
                for sub in subs {
                    if !sub.matches_label(label, ns, mgr, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            TokenTest::Or(subs) => {
                for sub in subs {
                    if sub.matches_label(label, ns, mgr, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            TokenTest::Not(sub) => Ok(!sub.matches_label(label, ns, mgr, ctx)?),
        }
    }

    /// NLP capabilities this test needs, not following references.
    pub fn local_requirements(&self, out: &mut BTreeSet<Capability>) {
        match self {
            TokenTest::Lookup { layer, .. } => match layer.as_str() {
                "pos" => {
                    out.insert(Capability::Pos);
                }
                "ner" => {
                    out.insert(Capability::Ner);
                }
                "lemma" => {
                    out.insert(Capability::Lemma);
                }
                _ => {}
            },
            TokenTest::Membership { stemming: true, .. } => {
                out.insert(Capability::Lemma);
            }
            TokenTest::And(subs) | TokenTest::Or(subs) => {
                for sub in subs {
                    sub.local_requirements(out);
                }
            }
            TokenTest::Not(sub) => sub.local_requirements(out),
            _ => {}
        }
    }

    /// Names of other tests this one references.
    pub fn references(&self, out: &mut Vec<String>) {
        match self {
            TokenTest::Reference { name } => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            TokenTest::And(subs) | TokenTest::Or(subs) => {
                for sub in subs {
                    sub.references(out);
                }
            }
            TokenTest::Not(sub) => sub.references(out),
            _ => {}
        }
    }
}

fn contains(members: &BTreeSet<String>, item: &str, case_insensitive: bool) -> bool {
    if case_insensitive {
        members.contains(&item.to_lowercase())
    } else {
        members.contains(item)
    }
}

/// Parse a token test expression. `default_ci` comes from the `i:` delimiter
/// and makes every atom case-insensitive.
pub fn parse(expr: &str, default_ci: bool, loader: &dyn LexiconLoader) -> Result<TokenTest> {
    let toks: Vec<&str> = regex!(r"(?s)\{.*?\}i?s?i?|\w+\[.*?\]|/\S+?/i?|<\S+>i?|[&@]\w+(?:\.\w+)*|\(|\)|\S+")
        .find_iter(expr)
        .map(|m| m.as_str())
        .collect();
    let mut parser = TestParser { expr, toks, pos: 0, default_ci, loader };
    let test = parser.or_expr()?;
    if parser.pos < parser.toks.len() {
        return Err(parser.error(format!("Extra tokens starting with '{}'", parser.toks[parser.pos])));
    }
    Ok(test)
}

struct TestParser<'a> {
    expr: &'a str,
    toks: Vec<&'a str>,
    pos: usize,
    default_ci: bool,
    loader: &'a dyn LexiconLoader,
}

impl<'a> TestParser<'a> {
    fn error(&self, message: String) -> ValetError {
        ValetError::Parse { file: String::new(), line: 0, message: format!("{} in token test expression '{}'", message, self.expr) }
    }

    fn peek(&self) -> Option<&'a str> {
        self.toks.get(self.pos).copied()
    }

    // or_expr -> and_expr ('or' and_expr)*
    fn or_expr(&mut self) -> Result<TokenTest> {
        let mut subs = vec![self.and_expr()?];
        while self.peek() == Some("or") {
            self.pos += 1;
            subs.push(self.and_expr()?);
        }
        if subs.len() > 1 {
            Ok(TokenTest::Or(subs))
        } else {
            Ok(subs.pop().unwrap())
        }
    }

    // and_expr -> not_expr ('and' not_expr)*
    fn and_expr(&mut self) -> Result<TokenTest> {
        let mut subs = vec![self.not_expr()?];
        while self.peek() == Some("and") {
            self.pos += 1;
            subs.push(self.not_expr()?);
        }
        if subs.len() > 1 {
            Ok(TokenTest::And(subs))
        } else {
            Ok(subs.pop().unwrap())
        }
    }

    // not_expr -> atom | 'not' atom
    fn not_expr(&mut self) -> Result<TokenTest> {
        if self.peek() == Some("not") {
            self.pos += 1;
            return Ok(TokenTest::Not(Box::new(self.atom()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<TokenTest> {
        let Some(tok) = self.peek() else {
            return Err(self.error("Missing operand".to_string()));
        };
        self.pos += 1;

        if tok == "(" {
            let test = self.or_expr()?;
            if self.peek() != Some(")") {
                return Err(self.error("Unbalanced '('".to_string()));
            }
            self.pos += 1;
            return Ok(test);
        }

        // Membership, inline or from file.
        if let Some(caps) = regex!(r"(?s)^(f?)\{(.*)\}(i?s?i?)$").captures(tok) {
            let is_file = !caps[1].is_empty();
            let flags = &caps[3];
            let case_insensitive = flags.contains('i') || self.default_ci;
            let stemming = flags.contains('s');
            let items: Vec<String> = if is_file {
                self.loader.load_lines(&caps[2])?
            } else {
                caps[2].split_whitespace().map(|s| s.to_string()).collect()
            };
            let members = items
                .into_iter()
                .filter(|s| !s.is_empty())
                .map(|s| if case_insensitive { s.to_lowercase() } else { s })
                .collect();
            return Ok(TokenTest::Membership { members, case_insensitive, stemming });
        }

        // Substring.
        if let Some(caps) = regex!(r"^<(.*)>(i?)$").captures(tok) {
            let case_insensitive = !caps[2].is_empty() || self.default_ci;
            let needle = if case_insensitive { caps[1].to_lowercase() } else { caps[1].to_string() };
            return Ok(TokenTest::Substring { needle, case_insensitive });
        }

        // Regular expression.
        if let Some(caps) = regex!(r"^/(.*)/(i?)$").captures(tok) {
            let pattern = caps[1].to_string();
            let case_insensitive = !caps[2].is_empty() || self.default_ci;
            let re = RegexBuilder::new(&pattern)
                .case_insensitive(case_insensitive)
                .build()
                .map_err(|e| self.error(format!("Bad regex /{}/: {}", pattern, e)))?;
            return Ok(TokenTest::Regex { pattern, re, case_insensitive });
        }

        // Reference to another test.
        if let Some(caps) = regex!(r"^[&@](\w+(?:\.\w+)*)$").captures(tok) {
            return Ok(TokenTest::Reference { name: caps[1].to_string() });
        }

        // Annotation lookup.
        if let Some(caps) = regex!(r"(?s)^(\w+)\[(.*)\]$").captures(tok) {
            let tags = caps[2].split_whitespace().map(|s| s.to_string()).collect();
            return Ok(TokenTest::Lookup { layer: caps[1].to_string(), tags });
        }

        Err(self.error(format!("Unparsable atom '{}'", tok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoFiles;
    impl LexiconLoader for NoFiles {
        fn load_lines(&self, path: &str) -> Result<Vec<String>> {
            Err(ValetError::Io { path: path.to_string(), message: "no files in tests".to_string() })
        }
    }

    fn p(expr: &str) -> TokenTest {
        parse(expr, false, &NoFiles).unwrap()
    }

    #[test]
    fn parses_each_atom_form() {
        assert!(matches!(p("{ a an the }i"), TokenTest::Membership { case_insensitive: true, stemming: false, .. }));
        assert!(matches!(p("{ run }s"), TokenTest::Membership { stemming: true, .. }));
        assert!(matches!(p("/^\\d+$/"), TokenTest::Regex { .. }));
        assert!(matches!(p("<ing>i"), TokenTest::Substring { case_insensitive: true, .. }));
        assert!(matches!(p("pos[NN NNS]"), TokenTest::Lookup { .. }));
        assert!(matches!(p("&other"), TokenTest::Reference { .. }));
        assert!(matches!(p("@other.qualified"), TokenTest::Reference { .. }));
    }

    #[test]
    fn boolean_precedence_is_or_over_and_over_not() {
        let t = p("not { a } and { b } or { c }");
        let TokenTest::Or(subs) = t else { panic!() };
        assert_eq!(subs.len(), 2);
        let TokenTest::And(conj) = &subs[0] else { panic!() };
        assert!(matches!(conj[0], TokenTest::Not(_)));
    }

    #[test]
    fn parenthesized_groups_override_precedence() {
        let t = p("{ a } and ( { b } or { c } )");
        let TokenTest::And(subs) = t else { panic!() };
        assert!(matches!(subs[1], TokenTest::Or(_)));
    }

    #[test]
    fn delimiter_case_flag_applies_to_all_atoms() {
        let t = parse("{ The }", true, &NoFiles).unwrap();
        let TokenTest::Membership { members, case_insensitive, .. } = t else { panic!() };
        assert!(case_insensitive);
        assert!(members.contains("the"));
    }

    #[test]
    fn rejects_bad_atoms_and_dangling_operators() {
        assert!(parse("{ a } and", false, &NoFiles).is_err());
        assert!(parse("}{", false, &NoFiles).is_err());
        assert!(parse("( { a }", false, &NoFiles).is_err());
        assert!(parse("/(/", false, &NoFiles).is_err());
    }

    #[test]
    fn lookup_requirements_map_known_layers() {
        let mut caps = BTreeSet::new();
        p("pos[NN] and ner[ORG] or { run }s").local_requirements(&mut caps);
        assert!(caps.contains(&Capability::Pos));
        assert!(caps.contains(&Capability::Ner));
        assert!(caps.contains(&Capability::Lemma));
    }
}
