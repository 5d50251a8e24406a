//! One-call convenience API.
//!
//! [`extract`] parses rule source, tokenizes the input with the default
//! tokenizer, applies the named pattern, and returns plain extraction
//! records. Callers that reuse a compiled rule set or bring their own
//! annotations should hold a [`Manager`] and call [`Manager::apply`]
//! directly; [`extract_with`] covers the middle ground.

use crate::error::Result;
use crate::manager::Manager;
use crate::tokens::{tokenize, TokenSequence};

/// A resolved extraction from the input text.
///
/// `begin`/`end` are token indices (half-open); the offsets are byte
/// positions into the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Name of the applied pattern.
    pub pattern: String,
    /// Slice of the input covered by the match.
    pub text: String,
    pub begin: usize,
    pub end: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Parse `rules`, tokenize `text`, and apply `pattern`.
pub fn extract(rules: &str, pattern: &str, text: &str) -> Result<Vec<Extraction>> {
    let mut mgr = Manager::default();
    mgr.parse_string(rules)?;
    let seq = tokenize(text);
    extract_with(&mgr, pattern, &seq)
}

/// Apply `pattern` from an already-built manager to a token sequence.
pub fn extract_with(mgr: &Manager, pattern: &str, seq: &TokenSequence) -> Result<Vec<Extraction>> {
    let mut out = Vec::new();
    for m in mgr.apply(pattern, seq)? {
        let (begin, end) = m.extent();
        let (start_offset, end_offset) = if begin < end {
            (seq.start_offset(begin), seq.end_offset(end - 1))
        } else {
            let off = if begin < seq.len() { seq.start_offset(begin) } else { seq.text().len() };
            (off, off)
        };
        out.push(Extraction {
            pattern: m.name.clone().unwrap_or_else(|| pattern.to_string()),
            text: m.matching_text().to_string(),
            begin,
            end,
            start_offset,
            end_offset,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matches::MatchKind;
    use crate::tokens::tokenize;

    fn manager(rules: &str) -> Manager {
        let mut mgr = Manager::default();
        mgr.parse_string(rules).unwrap();
        mgr
    }

    fn extents(mgr: &Manager, name: &str, seq: &TokenSequence) -> Vec<(usize, usize)> {
        mgr.apply(name, seq).unwrap().map(|m| m.extent()).collect()
    }

    #[test]
    fn membership_test_on_plain_text() {
        let found = extract("article : { a an the }i", "article", "The quick fox").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "The");
        assert_eq!((found[0].begin, found[0].end), (0, 1));
        assert_eq!((found[0].start_offset, found[0].end_offset), (0, 3));
    }

    #[test]
    fn phrase_cascade_captures_nested_submatches() {
        let mgr = manager(
            "num : /^\\d+$/\n\
             bignum -> &num ( , &num )* ( . &num )?\n\
             money -> $ @bignum",
        );
        // Tokens: Cost is $ 1 , 130 , 000 today
        let seq = tokenize("Cost is $ 1 , 130 , 000 today");
        let matches: Vec<_> = mgr.apply("money", &seq).unwrap().collect();
        assert_eq!(matches.len(), 1);
        let money = &matches[0];
        assert_eq!(money.extent(), (2, 8));
        assert_eq!(money.matching_text(), "$ 1 , 130 , 000");

        let bignums = money.all_submatches(Some("bignum"));
        assert_eq!(bignums.len(), 1);
        assert_eq!(bignums[0].extent(), (3, 8));
        assert_eq!(bignums[0].all_submatches(Some("num")).len(), 3);
    }

    #[test]
    fn select_retrieves_captured_submatches() {
        let mgr = manager(
            "num : /^\\d+$/\n\
             bignum -> &num ( , &num )* ( . &num )?\n\
             money -> $ @bignum\n\
             ma ~ select(bignum, money)",
        );
        let seq = tokenize("Cost is $ 1 , 130 , 000 today");
        let extents = extents(&mgr, "ma", &seq);
        assert_eq!(extents, vec![(3, 8)]);
    }

    #[test]
    fn inverted_prefix_drops_prefixed_matches() {
        let mgr = manager(
            "num : /^\\d+$/\n\
             dollar : { $ }\n\
             bignum -> &num ( , &num )* ( . &num )?\n\
             notmoney ~ prefix(dollar, bignum, inverted)",
        );
        let seq = tokenize("pay $ 5 and 6 dollars");
        let found = extents(&mgr, "notmoney", &seq);
        assert_eq!(found, vec![(4, 5)]);
        assert_eq!(seq.spanned_text(4, 5), "6");
    }

    #[test]
    fn parse_expressions_walk_both_directions_unless_constrained() {
        let mgr = manager("rel ^ nsubj\nsv ^ /nsubj\nsvo ^ nsubj obj");
        let mut seq = tokenize("Rita bought an apple");
        seq.add_dependencies(&[(0, 1, "nsubj"), (3, 1, "obj"), (2, 3, "det")]);

        // Undirected: one walk per direction over the nsubj edge.
        let rel: Vec<_> = mgr.apply("rel", &seq).unwrap().map(|m| (m.begin, m.end)).collect();
        assert!(rel.contains(&(0, 1)), "child-to-parent walk: {rel:?}");
        assert!(rel.contains(&(1, 0)), "parent-to-child walk: {rel:?}");

        // `/` restricts to the upward sense.
        let sv: Vec<_> = mgr.apply("sv", &seq).unwrap().map(|m| (m.begin, m.end)).collect();
        assert_eq!(sv, vec![(0, 1)]);

        // Two-edge path from subject through the verb to the object.
        let svo: Vec<_> = mgr.apply("svo", &seq).unwrap().map(|m| (m.begin, m.end)).collect();
        assert_eq!(svo, vec![(0, 3)]);
    }

    #[test]
    fn connects_and_frames_fill_keyed_fields() {
        let mgr = manager(
            "name : { Acme Bob }\n\
             hire : { hired }\n\
             nsubj ^ nsubj\n\
             dobj ^ dobj\n\
             hsubj ~ select(hire, connects(nsubj, name, hire))\n\
             hobj ~ select(hire, connects(dobj, hire, name))\n\
             hiring ~ union(hsubj, hobj)\n\
             hframe $ frame(hiring, employer=hsubj name, employee=hobj name)",
        );
        let mut seq = tokenize("Acme hired Bob");
        seq.add_dependencies(&[(0, 1, "nsubj"), (2, 1, "dobj")]);

        assert_eq!(extents(&mgr, "hsubj", &seq), vec![(1, 2)]);
        assert_eq!(extents(&mgr, "hobj", &seq), vec![(1, 2)]);
        assert_eq!(extents(&mgr, "hiring", &seq), vec![(1, 2)]);

        let frames: Vec<_> = mgr.frames("hframe", &seq).unwrap().collect();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.kind, MatchKind::Frame);
        assert_eq!(frame.extent(), (1, 2));

        let employer = &frame.fields["employer"];
        assert_eq!(employer.len(), 1);
        assert_eq!(employer[0].matching_text(), "Acme");
        let employee = &frame.fields["employee"];
        assert_eq!(employee.len(), 1);
        assert_eq!(employee[0].matching_text(), "Bob");
    }

    #[test]
    fn binding_rebinds_references_dynamically() {
        let mgr = manager(
            "article : { a an the }i\n\
             adj : pos[JJ]\n\
             noun : pos[NN NNS]\n\
             propnoun : pos[NNP]\n\
             np -> &article? &adj* &noun+\n\
             pnp ~ [noun=propnoun] np",
        );
        let mut seq = tokenize("Rita saw red dogs");
        seq.add_tag_layer("pos", &["NNP", "VBD", "JJ", "NN"]);

        assert_eq!(extents(&mgr, "np", &seq), vec![(2, 4), (3, 4)]);
        assert_eq!(extents(&mgr, "pnp", &seq), vec![(0, 1)]);
        // The rebound submatch records the name actually used.
        let m = mgr.apply("pnp", &seq).unwrap().next().unwrap();
        assert_eq!(m.all_submatches(Some("propnoun")).len(), 1);
        assert!(m.all_submatches(Some("noun")).is_empty());
    }

    #[test]
    fn bare_extractor_equals_match_over_base_stream() {
        let mgr = manager("num : /^\\d+$/\nrun -> &num +\nc1 ~ run\nc2 ~ match(run, _)");
        let seq = tokenize("1 2 x 3");
        assert_eq!(extents(&mgr, "c1", &seq), extents(&mgr, "c2", &seq));
    }

    #[test]
    fn precedes_zero_equals_prefix_and_follows_zero_equals_suffix() {
        let mgr = manager(
            "num : /^\\d+$/\n\
             dollar : { $ }\n\
             p1 ~ prefix(dollar, num)\n\
             p2 ~ precedes(dollar, 0, num)\n\
             s1 ~ suffix(num, dollar)\n\
             s2 ~ follows(num, 0, dollar)",
        );
        let seq = tokenize("pay $ 5 and 6 now");
        assert_eq!(extents(&mgr, "p1", &seq), extents(&mgr, "p2", &seq));
        assert_eq!(extents(&mgr, "s1", &seq), extents(&mgr, "s2", &seq));
        assert_eq!(extents(&mgr, "p1", &seq), vec![(2, 3)]);
    }

    #[test]
    fn inter_with_itself_preserves_extents_and_diff_empties() {
        let mgr = manager("num : /^\\d+$/\nsame ~ inter(num, num)\nnone ~ diff(num, num)");
        let seq = tokenize("1 a 2");
        assert_eq!(extents(&mgr, "same", &seq), extents(&mgr, "num", &seq));
        assert_eq!(extents(&mgr, "none", &seq), Vec::<(usize, usize)>::new());
    }

    #[test]
    fn rebinding_is_idempotent() {
        let mgr = manager(
            "noun : pos[NN]\n\
             propnoun : pos[NNP]\n\
             np -> &noun\n\
             once ~ [noun=propnoun] np\n\
             inner ~ [noun=propnoun] once",
        );
        let mut seq = tokenize("Rita runs");
        seq.add_tag_layer("pos", &["NNP", "VBZ"]);
        assert_eq!(extents(&mgr, "once", &seq), vec![(0, 1)]);
        assert_eq!(extents(&mgr, "inner", &seq), extents(&mgr, "once", &seq));
    }

    #[test]
    fn union_unifies_coincident_extents() {
        let mgr = manager(
            "a : { x y }\n\
             b : { y z }\n\
             u ~ union(a, b)",
        );
        let seq = tokenize("x y z");
        assert_eq!(extents(&mgr, "u", &seq), vec![(0, 1), (1, 2), (2, 3)]);
        let at_y = mgr.apply("u", &seq).unwrap().find(|m| m.extent() == (1, 2)).unwrap();
        // Both inputs matched "y"; the unified output collects them.
        assert_eq!(at_y.submatches.len(), 2);
    }

    #[test]
    fn contains_overlaps_and_count() {
        let mgr = manager(
            "num : /^\\d+$/\n\
             pair -> &num &num\n\
             c ~ contains(pair, num)\n\
             o ~ overlaps(pair, pair)\n\
             two ~ count(num, 2, pair)\n\
             three ~ count(num, 3, pair)",
        );
        let seq = tokenize("1 2 3");
        // pair matches (0,2) and (1,3); each contains two nums.
        assert_eq!(extents(&mgr, "c", &seq), vec![(0, 2), (0, 2), (1, 3), (1, 3)]);
        assert_eq!(extents(&mgr, "two", &seq), vec![(0, 2), (1, 3)]);
        assert_eq!(extents(&mgr, "three", &seq), Vec::<(usize, usize)>::new());
        // The two pair matches overlap each other (and themselves).
        assert_eq!(extents(&mgr, "o", &seq).len(), 4);
    }

    #[test]
    fn lexicon_files_resolve_through_builtin_chain_error() {
        // A lexicon path that resolves nowhere reports an import error.
        let mut mgr = Manager::default();
        let err = mgr.parse_string("cities L-> no_such_file.txt").unwrap_err();
        assert!(matches!(err, crate::error::ValetError::Io { .. }));
    }

    #[test]
    fn builtin_rule_files_import() {
        let mgr = manager("o <- ortho.vrules\ncash -> $ &o.num");
        let seq = tokenize("pay $ 500 now");
        assert_eq!(extents(&mgr, "cash", &seq), vec![(1, 3)]);
    }
}
