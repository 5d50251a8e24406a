//! Rule-source statement parser.
//!
//! A rule file is a sequence of statements. A statement starts at column 0
//! (or at the fixed indent of an enclosing namespace block) and has the shape
//!
//! ```text
//! <name> <delimiter> [a=b, ...] <body>
//! ```
//!
//! Lines beginning with `#` are comments; all lines immediately following a
//! statement that are indented deeper than it are continuation lines, joined
//! to the body with a single space. An import statement with an empty body
//! (`name <-`) opens a namespace block: the indented statements that follow
//! belong to the namespace `name` and must share one indentation level.
//!
//! This layer only splits and classifies statements; it never resolves names.

use crate::error::{Result, ValetError};
use std::fmt;

/// Statement type selected by the delimiter token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// `:` or `i:`
    Test { ci: bool },
    /// `->` or `i->`
    Phrase { ci: bool },
    /// `L->` or `Li->`
    Lexicon { ci: bool },
    /// `<-`; empty body opens a namespace block
    Import,
    /// `^`
    Parse,
    /// `~`
    Coord,
    /// `$`
    Frame,
}

impl Delimiter {
    fn from_token(tok: &str) -> Option<Delimiter> {
        match tok {
            ":" => Some(Delimiter::Test { ci: false }),
            "i:" => Some(Delimiter::Test { ci: true }),
            "->" => Some(Delimiter::Phrase { ci: false }),
            "i->" => Some(Delimiter::Phrase { ci: true }),
            "L->" => Some(Delimiter::Lexicon { ci: false }),
            "Li->" => Some(Delimiter::Lexicon { ci: true }),
            "<-" => Some(Delimiter::Import),
            "^" => Some(Delimiter::Parse),
            "~" => Some(Delimiter::Coord),
            "$" => Some(Delimiter::Frame),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Delimiter::Test { ci: false } => ":",
            Delimiter::Test { ci: true } => "i:",
            Delimiter::Phrase { ci: false } => "->",
            Delimiter::Phrase { ci: true } => "i->",
            Delimiter::Lexicon { ci: false } => "L->",
            Delimiter::Lexicon { ci: true } => "Li->",
            Delimiter::Import => "<-",
            Delimiter::Parse => "^",
            Delimiter::Coord => "~",
            Delimiter::Frame => "$",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub name: String,
    pub delimiter: Delimiter,
    /// Binding qualifier `[a=b, ...]`, if present.
    pub bindings: Option<Vec<(String, String)>>,
    pub body: String,
    /// 1-based line number of the statement's first line.
    pub line: usize,
    /// Enclosing namespace-block name, if the statement is inside one.
    pub namespace: Option<String>,
}

impl Statement {
    pub fn is_namespace_opener(&self) -> bool {
        self.delimiter == Delimiter::Import && self.body.is_empty()
    }
}

impl fmt::Display for Statement {
    /// Renders the statement as a single rule line (continuations joined,
    /// namespace indentation dropped). `parse(render(s))` reproduces `s` up
    /// to line number and namespace.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.delimiter.token())?;
        if let Some(bindings) = &self.bindings {
            let pairs: Vec<String> = bindings.iter().map(|(a, b)| format!("{}={}", a, b)).collect();
            write!(f, " [{}]", pairs.join(", "))?;
        }
        if !self.body.is_empty() {
            write!(f, " {}", self.body)?;
        }
        Ok(())
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn parse_bindings(file: &str, line: usize, text: &str) -> Result<Vec<(String, String)>> {
    let inner = &text[1..text.len() - 1];
    let mut pairs = Vec::new();
    for part in inner.split(',') {
        let caps = regex!(r"^\s*(\w+(?:\.\w+)*)\s*=\s*(\w+(?:\.\w+)*)\s*$")
            .captures(part)
            .ok_or_else(|| ValetError::parse(file, line, format!("Malformed binding: '{}'", part.trim())))?;
        pairs.push((caps[1].to_string(), caps[2].to_string()));
    }
    Ok(pairs)
}

/// Split `text` into statements. `file` labels parse errors.
pub fn parse(text: &str, file: &str) -> Result<Vec<Statement>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut statements = Vec::new();
    let mut scope: Option<String> = None;
    let mut scope_indent: Option<usize> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let lineno = i + 1;
        if is_blank(line) || is_comment(line) {
            i += 1;
            continue;
        }

        let indent = indent_of(line);
        if indent == 0 {
            scope = None;
            scope_indent = None;
        } else if scope.is_some() {
            if scope_indent.is_none() {
                scope_indent = Some(indent);
            }
            if scope_indent != Some(indent) {
                return Err(ValetError::parse(file, lineno, "Bad indentation in namespace block"));
            }
        } else {
            return Err(ValetError::parse(file, lineno, format!("Unexpected indentation: {}", line.trim_end())));
        }

        let caps = regex!(r"^\s*(\w+)\s*(i?->|Li?->|i?:|<-|~|\^|\$)\s*(\[[^\]]*\])?\s*(.*)$")
            .captures(line)
            .ok_or_else(|| ValetError::parse(file, lineno, format!("Unparsable: {}", line.trim_end())))?;

        let name = caps[1].to_string();
        let delimiter = Delimiter::from_token(&caps[2])
            .ok_or_else(|| ValetError::parse(file, lineno, format!("Unknown delimiter '{}'", &caps[2])))?;
        let bindings = match caps.get(3) {
            Some(q) => Some(parse_bindings(file, lineno, q.as_str())?),
            None => None,
        };
        let mut body = caps[4].trim_end().to_string();

        i += 1;

        let namespace_opener = delimiter == Delimiter::Import && body.is_empty();
        if !namespace_opener {
            // Pull in continuation lines.
            while i < lines.len() {
                let next = lines[i];
                if is_blank(next) || is_comment(next) || indent_of(next) <= indent {
                    break;
                }
                body.push(' ');
                body.push_str(next.trim());
                i += 1;
            }
        }

        statements.push(Statement {
            name,
            delimiter,
            bindings,
            body,
            line: lineno,
            namespace: if indent > 0 { scope.clone() } else { None },
        });

        if namespace_opener {
            scope = Some(statements.last().unwrap().name.clone());
            scope_indent = None;
        }
    }

    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(text: &str) -> Statement {
        let mut stmts = parse(text, "<test>").unwrap();
        assert_eq!(stmts.len(), 1);
        stmts.pop().unwrap()
    }

    #[test]
    fn delimiters_select_statement_type() {
        assert_eq!(one("t : { a b }").delimiter, Delimiter::Test { ci: false });
        assert_eq!(one("t i: { a b }").delimiter, Delimiter::Test { ci: true });
        assert_eq!(one("p -> a b").delimiter, Delimiter::Phrase { ci: false });
        assert_eq!(one("p i-> a b").delimiter, Delimiter::Phrase { ci: true });
        assert_eq!(one("l L-> words.txt").delimiter, Delimiter::Lexicon { ci: false });
        assert_eq!(one("l Li-> words.txt").delimiter, Delimiter::Lexicon { ci: true });
        assert_eq!(one("i <- other.vrules").delimiter, Delimiter::Import);
        assert_eq!(one("d ^ nsubj").delimiter, Delimiter::Parse);
        assert_eq!(one("c ~ match(a, _)").delimiter, Delimiter::Coord);
        assert_eq!(one("f $ frame(a, x=b)").delimiter, Delimiter::Frame);
    }

    #[test]
    fn continuation_lines_join_with_single_space() {
        let s = one("p -> a b\n   c d\n   e");
        assert_eq!(s.body, "a b c d e");
        assert_eq!(s.line, 1);
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let stmts = parse("# header\n\na : { x }\n# tail\nb : { y }\n", "<test>").unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1].line, 5);
    }

    #[test]
    fn binding_qualifier_parses_pairs() {
        let s = one("pnp ~ [noun=propnoun, a=b.c] np");
        assert_eq!(
            s.bindings,
            Some(vec![("noun".to_string(), "propnoun".to_string()), ("a".to_string(), "b.c".to_string())])
        );
        assert_eq!(s.body, "np");
    }

    #[test]
    fn namespace_block_scopes_statements() {
        let text = "ns <-\n  a : { x }\n  b -> &a\nc : { y }\n";
        let stmts = parse(text, "<test>").unwrap();
        assert_eq!(stmts.len(), 4);
        assert!(stmts[0].is_namespace_opener());
        assert_eq!(stmts[1].namespace.as_deref(), Some("ns"));
        assert_eq!(stmts[2].namespace.as_deref(), Some("ns"));
        assert_eq!(stmts[3].namespace, None);
    }

    #[test]
    fn inconsistent_block_indent_is_an_error() {
        // A deeper-indented line is a continuation; a shallower (but still
        // indented) line breaks the block's fixed indent.
        let cont = parse("ns <-\n   a -> x\n    y\n", "<test>").unwrap();
        assert_eq!(cont[1].body, "x y");

        let err = parse("ns <-\n   a : { x }\n  b : { y }\n", "<test>").unwrap_err();
        assert!(matches!(err, ValetError::Parse { line: 3, .. }));
    }

    #[test]
    fn malformed_lines_report_line_and_text() {
        let err = parse("a : { x }\nnodelimiter here\n", "rules.vrules").unwrap_err();
        match err {
            ValetError::Parse { file, line, message } => {
                assert_eq!(file, "rules.vrules");
                assert_eq!(line, 2);
                assert!(message.contains("nodelimiter here"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn statements_round_trip_through_render() {
        let sources = [
            "article : { a an the }i",
            "num i: /^\\d+$/",
            "bignum -> &num ( , &num )* ( . &num )?",
            "money i-> $ @bignum",
            "lex L-> phrases.txt",
            "imp <- shared.vrules",
            "svo ^ nsubj obj",
            "ma ~ select(bignum, money)",
            "pnp ~ [noun=propnoun] np",
            "hframe $ frame(hiring, employer=hsubj name, employee=hobj name)",
        ];
        for src in sources {
            let s = one(src);
            let rendered = s.to_string();
            let reparsed = one(&rendered);
            assert_eq!(s, reparsed, "round-trip failed for '{}' -> '{}'", src, rendered);
        }
    }
}
