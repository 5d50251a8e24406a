//! The manager: rule registry, namespaces, and the extraction entry points.
//!
//! A [`Manager`] owns a tree of namespaces, each mapping local names to
//! compiled extractors. Parsing a rule file registers its statements into the
//! file's root namespace; imports attach child namespaces. A built-in
//! namespace holding `START`, `END`, `ROOT` and `ANY` parents every file
//! root, so the resolution climb always reaches it.
//!
//! Resolution of a reference `p1.p2...leaf` from a namespace `N`: any active
//! binding frame may first substitute the leading component; then `p1` is
//! looked up as a child namespace of `N` (descending for the remaining
//! components) or, for unqualified references, as an extractor in `N`;
//! failing both, the search climbs to `N`'s parent. Reaching the root
//! without a hit is `UnresolvedName`.
//!
//! Once built, a manager is immutable; all per-extraction state lives in a
//! [`Context`], created fresh by [`Manager::apply`] and threaded through
//! every nested call.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::engine::context::{Context, ScanMode};
use crate::engine::coordinator::{self, CoordExpr};
use crate::engine::frame::{self, FrameDef};
use crate::engine::nfa::Nfa;
use crate::error::{Result, ValetError};
use crate::expr;
use crate::matches::{Match, MatchRef};
use crate::statement::{self, Delimiter, Statement};
use crate::tokens::{tokenize, TokenSequence};
use crate::tokentest::{self, LexiconLoader, TokenTest};

pub type NsId = usize;
type ExtId = usize;

/// NLP layers an extractor needs the token sequence provider to populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    Pos,
    Lemma,
    Ner,
    DepParse,
}

/// What a name resolves to, as seen by the NFA runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Test,
    Phrase,
    Lexicon,
    Parse,
    Coord,
    Frame,
    Start,
    End,
    Root,
}

impl RefKind {
    pub fn long_name(&self) -> &'static str {
        match self {
            RefKind::Test => "token test",
            RefKind::Phrase => "phrase expression",
            RefKind::Lexicon => "phrase lexicon",
            RefKind::Parse => "parse expression",
            RefKind::Coord => "coordinator",
            RefKind::Frame => "frame",
            RefKind::Start | RefKind::End | RefKind::Root => "built-in extractor",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Trace import resolution to stderr.
    pub verbose_imports: bool,
    /// Memoize scan results per extraction.
    pub caching: bool,
    /// Error when a rule redefines an existing name instead of overwriting.
    pub error_on_redefinition: bool,
    /// Longest phrase/walk attempt, in tokens from its start.
    pub max_match: usize,
}

impl Default for ManagerOptions {
    fn default() -> ManagerOptions {
        ManagerOptions { verbose_imports: false, caching: true, error_on_redefinition: false, max_match: 300 }
    }
}

#[derive(Debug)]
enum ExtractorKind {
    Test(TokenTest),
    Phrase(Nfa),
    Lexicon(Nfa),
    Parse(Nfa),
    Coord(CoordExpr),
    Frame(FrameDef),
    Start,
    End,
    Root,
}

impl ExtractorKind {
    fn ref_kind(&self) -> RefKind {
        match self {
            ExtractorKind::Test(_) => RefKind::Test,
            ExtractorKind::Phrase(_) => RefKind::Phrase,
            ExtractorKind::Lexicon(_) => RefKind::Lexicon,
            ExtractorKind::Parse(_) => RefKind::Parse,
            ExtractorKind::Coord(_) => RefKind::Coord,
            ExtractorKind::Frame(_) => RefKind::Frame,
            ExtractorKind::Start => RefKind::Start,
            ExtractorKind::End => RefKind::End,
            ExtractorKind::Root => RefKind::Root,
        }
    }
}

#[derive(Debug)]
struct StoredExtractor {
    name: String,
    ns: NsId,
    bindings: Option<Vec<(String, String)>>,
    kind: ExtractorKind,
}

#[derive(Debug, Default)]
struct NamespaceNode {
    parent: Option<NsId>,
    children: BTreeMap<String, NsId>,
    entries: BTreeMap<String, ExtId>,
}

/// Built-in rule files, the last stop of the import path chain.
const BUILTIN_FILES: [(&str, &str); 3] = [
    ("ortho.vrules", include_str!("data/ortho.vrules")),
    ("syntax.vrules", include_str!("data/syntax.vrules")),
    ("ner.vrules", include_str!("data/ner.vrules")),
];

/// Resolves import paths against the cwd, the importing file's directory,
/// and the built-in data files, in that order.
struct ImportResolver<'a> {
    dir: Option<&'a Path>,
    verbose: bool,
}

enum DataSource {
    File(PathBuf),
    Builtin(&'static str, &'static str),
}

impl ImportResolver<'_> {
    fn resolve(&self, fname: &str) -> Result<DataSource> {
        let p = Path::new(fname);
        if p.is_absolute() {
            if p.exists() {
                return Ok(DataSource::File(p.to_path_buf()));
            }
        } else {
            if p.exists() {
                return Ok(DataSource::File(p.to_path_buf()));
            }
            if let Some(dir) = self.dir {
                let joined = dir.join(fname);
                if joined.exists() {
                    return Ok(DataSource::File(joined));
                }
            }
            if let Some((name, content)) = BUILTIN_FILES.iter().find(|(name, _)| *name == fname) {
                if self.verbose {
                    eprintln!("[import] resolved '{}' to built-in data", name);
                }
                return Ok(DataSource::Builtin(name, content));
            }
        }
        Err(ValetError::Io { path: fname.to_string(), message: "not found along the import resolution chain".to_string() })
    }

    fn read(&self, fname: &str) -> Result<(String, String, Option<PathBuf>)> {
        match self.resolve(fname)? {
            DataSource::File(path) => {
                if self.verbose {
                    eprintln!("[import] reading {}", path.display());
                }
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| ValetError::Io { path: fname.to_string(), message: e.to_string() })?;
                let label = path.display().to_string();
                let dir = path.parent().map(|d| d.to_path_buf());
                Ok((content, label, dir))
            }
            DataSource::Builtin(name, content) => Ok((content.to_string(), format!("builtin:{}", name), None)),
        }
    }
}

impl LexiconLoader for ImportResolver<'_> {
    fn load_lines(&self, path: &str) -> Result<Vec<String>> {
        let (content, _, _) = self.read(path)?;
        Ok(content.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }
}

pub struct Manager {
    options: ManagerOptions,
    namespaces: Vec<NamespaceNode>,
    extractors: Vec<StoredExtractor>,
    /// Namespace of the top-level rule file.
    root: NsId,
}

impl Default for Manager {
    fn default() -> Manager {
        Manager::new(ManagerOptions::default())
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("namespaces", &self.namespaces.len())
            .field("extractors", &self.extractors.len())
            .finish()
    }
}

impl Manager {
    pub fn new(options: ManagerOptions) -> Manager {
        let mut mgr = Manager { options, namespaces: Vec::new(), extractors: Vec::new(), root: 0 };
        let builtin = mgr.new_namespace(None);
        for (name, kind) in [
            ("START", ExtractorKind::Start),
            ("END", ExtractorKind::End),
            ("ROOT", ExtractorKind::Root),
            ("ANY", ExtractorKind::Test(TokenTest::Any)),
        ] {
            let id = mgr.extractors.len();
            mgr.extractors.push(StoredExtractor { name: name.to_string(), ns: builtin, bindings: None, kind });
            mgr.namespaces[builtin].entries.insert(name.to_string(), id);
        }
        mgr.root = mgr.new_namespace(Some(builtin));
        mgr
    }

    fn new_namespace(&mut self, parent: Option<NsId>) -> NsId {
        self.namespaces.push(NamespaceNode { parent, ..NamespaceNode::default() });
        self.namespaces.len() - 1
    }

    /// Load rules from a file, eagerly parsing it and everything it imports.
    pub fn parse_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ValetError::Io { path: path.display().to_string(), message: e.to_string() })?;
        let dir = path.parent().map(|d| d.to_path_buf());
        self.parse_source(&content, &path.display().to_string(), self.root, dir.as_deref())
    }

    /// Load rules from a string.
    pub fn parse_string(&mut self, source: &str) -> Result<()> {
        self.parse_source(source, "<string>", self.root, None)
    }

    fn parse_source(&mut self, source: &str, file: &str, root_ns: NsId, dir: Option<&Path>) -> Result<()> {
        let statements = statement::parse(source, file)?;
        let mut blocks: BTreeMap<String, NsId> = BTreeMap::new();
        for stmt in statements {
            let target = match &stmt.namespace {
                Some(block) => *blocks.get(block).ok_or_else(|| {
                    ValetError::parse(file, stmt.line, format!("Statement outside its namespace block '{}'", block))
                })?,
                None => root_ns,
            };
            if stmt.is_namespace_opener() {
                let child = self.new_namespace(Some(target));
                self.namespaces[target].children.insert(stmt.name.clone(), child);
                blocks.insert(stmt.name.clone(), child);
                continue;
            }
            self.register(&stmt, target, file, dir)?;
        }
        Ok(())
    }

    fn register(&mut self, stmt: &Statement, ns: NsId, file: &str, dir: Option<&Path>) -> Result<()> {
        let resolver = ImportResolver { dir, verbose: self.options.verbose_imports };
        let located = |e: ValetError| match e {
            ValetError::Parse { message, .. } => ValetError::parse(file, stmt.line, message),
            other => other,
        };

        if self.options.error_on_redefinition
            && (self.namespaces[ns].entries.contains_key(&stmt.name) || self.namespaces[ns].children.contains_key(&stmt.name))
        {
            return Err(ValetError::parse(file, stmt.line, format!("'{}' is already defined", stmt.name)));
        }

        let kind = match stmt.delimiter {
            Delimiter::Test { ci } => ExtractorKind::Test(tokentest::parse(&stmt.body, ci, &resolver).map_err(located)?),
            Delimiter::Phrase { ci } => {
                let ast = expr::parse(&stmt.body).map_err(located)?;
                ExtractorKind::Phrase(Nfa::compile(&ast, false, ci, self.options.max_match))
            }
            Delimiter::Parse => {
                let ast = expr::parse(&stmt.body).map_err(located)?;
                ExtractorKind::Parse(Nfa::compile(&ast, true, false, self.options.max_match))
            }
            Delimiter::Lexicon { ci } => {
                let phrases: Vec<Vec<String>> = resolver
                    .load_lines(&stmt.body)?
                    .iter()
                    .map(|line| tokenize(line).tokens().to_vec())
                    .collect();
                ExtractorKind::Lexicon(Nfa::from_lexicon(&phrases, ci, self.options.max_match))
            }
            Delimiter::Coord => ExtractorKind::Coord(coordinator::parse(&stmt.body).map_err(located)?),
            Delimiter::Frame => ExtractorKind::Frame(frame::parse(&stmt.body).map_err(located)?),
            Delimiter::Import => {
                // Namespace openers are handled by the caller; here the body
                // is a file path.
                let (content, label, sub_dir) = resolver.read(&stmt.body)?;
                let child = self.new_namespace(Some(ns));
                self.namespaces[ns].children.insert(stmt.name.clone(), child);
                self.parse_source(&content, &label, child, sub_dir.as_deref())?;
                return Ok(());
            }
        };

        let id = self.extractors.len();
        self.extractors.push(StoredExtractor {
            name: stmt.name.clone(),
            ns,
            bindings: stmt.bindings.clone(),
            kind,
        });
        self.namespaces[ns].entries.insert(stmt.name.clone(), id);
        Ok(())
    }

    ///////////////////////////////////////////////////////////////////////////
    // Name resolution

    /// Apply the innermost binding frame to the leading component of `name`.
    pub(crate) fn binding_view(&self, _ns: NsId, name: &str, ctx: &Context<'_>) -> String {
        let (first, rest) = match name.split_once('.') {
            Some((first, rest)) => (first, Some(rest)),
            None => (name, None),
        };
        match (ctx.binding_for(first), rest) {
            (Some(sub), None) => sub.to_string(),
            (Some(sub), Some(rest)) => format!("{}.{}", sub, rest),
            (None, _) => name.to_string(),
        }
    }

    fn resolve(&self, ns: NsId, name: &str, ctx: &Context<'_>) -> Result<(String, ExtId)> {
        let substituted = self.binding_view(ns, name, ctx);
        let parts: Vec<&str> = substituted.split('.').collect();
        let mut cur = Some(ns);
        while let Some(n) = cur {
            if let Some(ext) = self.resolve_from(n, &parts) {
                return Ok((substituted, ext));
            }
            cur = self.namespaces[n].parent;
        }
        Err(ValetError::UnresolvedName(substituted))
    }

    /// One resolution step without climbing: an entry for unqualified names,
    /// or a descent through child namespaces for qualified ones.
    fn resolve_from(&self, ns: NsId, parts: &[&str]) -> Option<ExtId> {
        if parts.len() == 1 {
            return self.namespaces[ns].entries.get(parts[0]).copied();
        }
        let child = *self.namespaces[ns].children.get(parts[0])?;
        self.resolve_from(child, &parts[1..])
    }

    pub(crate) fn ref_kind(&self, ns: NsId, name: &str, ctx: &Context<'_>) -> Result<(String, ExtId, RefKind)> {
        let (display, ext) = self.resolve(ns, name, ctx)?;
        let kind = self.extractors[ext].kind.ref_kind();
        Ok((display, ext, kind))
    }

    /// Resolve a reference that must be a token test and run `f` on it, with
    /// the test's own binding qualifier in effect.
    pub(crate) fn reference_test<'t, R>(
        &self,
        ns: NsId,
        name: &str,
        ctx: &mut Context<'t>,
        f: impl FnOnce(&TokenTest, NsId, &Manager, &mut Context<'t>) -> Result<R>,
    ) -> Result<R> {
        let (display, ext) = self.resolve(ns, name, ctx)?;
        let stored = &self.extractors[ext];
        match &stored.kind {
            ExtractorKind::Test(test) => {
                // Reference chains between token tests are position-free, so
                // a nested re-entry of the same test is always a cycle.
                ctx.enter(ext, usize::MAX, &display)?;
                let result = self.with_bindings(ext, ctx, |mgr, ctx| f(test, stored.ns, mgr, ctx));
                ctx.exit(ext, usize::MAX);
                result
            }
            other => Err(ValetError::Type { name: display, expected: "token test", actual: other.ref_kind().long_name() }),
        }
    }

    pub(crate) fn test_matches_at<'t>(
        &self,
        ext: ExtId,
        seq: &'t TokenSequence,
        at: usize,
        ctx: &mut Context<'t>,
    ) -> Result<bool> {
        let stored = &self.extractors[ext];
        match &stored.kind {
            ExtractorKind::Test(test) => self.with_bindings(ext, ctx, |mgr, ctx| test.matches_at(seq, at, stored.ns, mgr, ctx)),
            other => Err(ValetError::Type {
                name: stored.name.clone(),
                expected: "token test",
                actual: other.ref_kind().long_name(),
            }),
        }
    }

    pub(crate) fn test_matches_label(&self, ext: ExtId, label: &str, ctx: &mut Context<'_>) -> Result<bool> {
        let stored = &self.extractors[ext];
        match &stored.kind {
            ExtractorKind::Test(test) => {
                self.with_bindings(ext, ctx, |mgr, ctx| test.matches_label(label, stored.ns, mgr, ctx))
            }
            other => Err(ValetError::Type {
                name: stored.name.clone(),
                expected: "token test",
                actual: other.ref_kind().long_name(),
            }),
        }
    }

    fn with_bindings<'t, R>(
        &self,
        ext: ExtId,
        ctx: &mut Context<'t>,
        f: impl FnOnce(&Manager, &mut Context<'t>) -> Result<R>,
    ) -> Result<R> {
        let bindings = self.extractors[ext].bindings.as_deref();
        if let Some(pairs) = bindings {
            ctx.push_bindings(pairs);
        }
        let result = f(self, ctx);
        if bindings.is_some() {
            ctx.pop_bindings();
        }
        result
    }

    ///////////////////////////////////////////////////////////////////////////
    // Scan dispatch

    /// All matches of `name` within `[start, end)`, resolved from `ns`,
    /// named and ordered by extent.
    pub(crate) fn scan_named<'t>(
        &self,
        ns: NsId,
        name: &str,
        seq: &'t TokenSequence,
        start: usize,
        end: usize,
        ctx: &mut Context<'t>,
    ) -> Result<Vec<MatchRef<'t>>> {
        let (display, ext) = self.resolve(ns, name, ctx)?;
        self.scan_resolved(ext, &display, seq, start, end, ctx)
    }

    pub(crate) fn scan_resolved<'t>(
        &self,
        ext: ExtId,
        display: &str,
        seq: &'t TokenSequence,
        start: usize,
        end: usize,
        ctx: &mut Context<'t>,
    ) -> Result<Vec<MatchRef<'t>>> {
        if self.options.caching {
            if let Some(hit) = ctx.cached(ScanMode::Scan, ext, start, end) {
                return Ok((*hit).clone());
            }
        }
        ctx.enter(ext, start, display)?;
        let result = self.with_bindings(ext, ctx, |mgr, ctx| mgr.run_scan(ext, display, seq, start, end, ctx));
        ctx.exit(ext, start);
        let mut matches = result?;
        matches.sort_by_key(|m| m.extent());
        let refs: Vec<MatchRef<'t>> = matches
            .into_iter()
            .map(|mut m| {
                m.name = Some(display.to_string());
                Rc::new(m)
            })
            .collect();
        if std::env::var_os("VALET_DEBUG_RULES").is_some() {
            eprintln!("[scan] {} [{}, {}) -> {} matches", display, start, end, refs.len());
        }
        if self.options.caching {
            ctx.store(ScanMode::Scan, ext, start, end, Rc::new(refs.clone()));
        }
        Ok(refs)
    }

    fn run_scan<'t>(
        &self,
        ext: ExtId,
        display: &str,
        seq: &'t TokenSequence,
        start: usize,
        end: usize,
        ctx: &mut Context<'t>,
    ) -> Result<Vec<Match<'t>>> {
        let stored = &self.extractors[ext];
        match &stored.kind {
            ExtractorKind::Test(test) => {
                let mut out = Vec::new();
                for i in start..end {
                    if test.matches_at(seq, i, stored.ns, self, ctx)? {
                        out.push(Match::phrase(seq, i, i + 1));
                    }
                }
                Ok(out)
            }
            ExtractorKind::Phrase(nfa) | ExtractorKind::Lexicon(nfa) => {
                // Greedy and left-anchored per start index: the longest
                // accepting run at each start, without consuming tokens, so
                // overlapping matches at later starts still appear.
                let mut out = Vec::new();
                for s in start..end {
                    let runs = nfa.phrase_matches(self, ctx, seq, stored.ns, display, s, end)?;
                    let mut best: Option<Match<'t>> = None;
                    for run in runs {
                        if run.end == s {
                            continue;
                        }
                        if best.as_ref().map(|b| run.end > b.end).unwrap_or(true) {
                            best = Some(run);
                        }
                    }
                    out.extend(best);
                }
                Ok(out)
            }
            ExtractorKind::Parse(nfa) => {
                let mut out = Vec::new();
                for s in start..end {
                    for run in nfa.arc_matches(self, ctx, seq, stored.ns, display, s, end)? {
                        if run.end != s {
                            out.push(run);
                        }
                    }
                }
                Ok(out)
            }
            ExtractorKind::Coord(coord) => coord.scan(self, ctx, seq, stored.ns, start, end),
            ExtractorKind::Frame(frame) => frame.extract(self, ctx, seq, stored.ns, start, end, false),
            ExtractorKind::Start => {
                Ok(if start == 0 { vec![Match::phrase(seq, 0, 0)] } else { Vec::new() })
            }
            ExtractorKind::End => {
                Ok(if end == seq.len() { vec![Match::phrase(seq, seq.len(), seq.len())] } else { Vec::new() })
            }
            ExtractorKind::Root => {
                let mut out = Vec::new();
                let mut s = start;
                while s < end {
                    if let Some(m) = self.root_run(seq, s, end)? {
                        s = m.end;
                        out.push(m);
                    } else {
                        s += 1;
                    }
                }
                Ok(out)
            }
        }
    }

    /// The maximal run of parse-root tokens beginning exactly at `at`.
    fn root_run<'t>(&self, seq: &'t TokenSequence, at: usize, end: usize) -> Result<Option<Match<'t>>> {
        if !seq.has_dependencies() {
            return Err(ValetError::ParseRequirement(
                "ROOT applied to a token sequence without a dependency parse".to_string(),
            ));
        }
        if at >= end || !seq.is_root_token(at) {
            return Ok(None);
        }
        let mut run_end = at + 1;
        while run_end < end && seq.is_root_token(run_end) {
            run_end += 1;
        }
        Ok(Some(Match::phrase(seq, at, run_end)))
    }

    /// Matches of `name` starting exactly at `at`. Unlike a scan, phrase
    /// extractors yield *every* accepting run here, which is what makes
    /// nested submatch capture complete when one rule calls out to another.
    pub(crate) fn matches_named<'t>(
        &self,
        ns: NsId,
        name: &str,
        seq: &'t TokenSequence,
        at: usize,
        end: usize,
        ctx: &mut Context<'t>,
    ) -> Result<Vec<MatchRef<'t>>> {
        let (display, ext) = self.resolve(ns, name, ctx)?;
        self.matches_resolved(ext, &display, seq, at, end, ctx)
    }

    pub(crate) fn matches_resolved<'t>(
        &self,
        ext: ExtId,
        display: &str,
        seq: &'t TokenSequence,
        at: usize,
        end: usize,
        ctx: &mut Context<'t>,
    ) -> Result<Vec<MatchRef<'t>>> {
        if self.options.caching {
            if let Some(hit) = ctx.cached(ScanMode::Matches, ext, at, end) {
                return Ok((*hit).clone());
            }
        }
        ctx.enter(ext, at, display)?;
        let result = self.with_bindings(ext, ctx, |mgr, ctx| mgr.run_matches(ext, display, seq, at, end, ctx));
        ctx.exit(ext, at);
        let refs: Vec<MatchRef<'t>> = result?
            .into_iter()
            .map(|mut m| {
                m.name = Some(display.to_string());
                Rc::new(m)
            })
            .collect();
        if self.options.caching {
            ctx.store(ScanMode::Matches, ext, at, end, Rc::new(refs.clone()));
        }
        Ok(refs)
    }

    fn run_matches<'t>(
        &self,
        ext: ExtId,
        display: &str,
        seq: &'t TokenSequence,
        at: usize,
        end: usize,
        ctx: &mut Context<'t>,
    ) -> Result<Vec<Match<'t>>> {
        let stored = &self.extractors[ext];
        match &stored.kind {
            ExtractorKind::Test(test) => {
                if at < end && test.matches_at(seq, at, stored.ns, self, ctx)? {
                    Ok(vec![Match::phrase(seq, at, at + 1)])
                } else {
                    Ok(Vec::new())
                }
            }
            ExtractorKind::Phrase(nfa) | ExtractorKind::Lexicon(nfa) => {
                let runs = nfa.phrase_matches(self, ctx, seq, stored.ns, display, at, end)?;
                Ok(runs.into_iter().filter(|m| m.end != at).collect())
            }
            ExtractorKind::Parse(nfa) => {
                let runs = nfa.arc_matches(self, ctx, seq, stored.ns, display, at, end)?;
                Ok(runs.into_iter().filter(|m| m.end != at).collect())
            }
            ExtractorKind::Coord(coord) => {
                let all = coord.scan(self, ctx, seq, stored.ns, at, end)?;
                Ok(all.into_iter().filter(|m| m.begin == at).collect())
            }
            ExtractorKind::Frame(frame) => frame.extract(self, ctx, seq, stored.ns, at, end, true),
            ExtractorKind::Start => Ok(if at == 0 { vec![Match::phrase(seq, 0, 0)] } else { Vec::new() }),
            ExtractorKind::End => {
                Ok(if at == seq.len() { vec![Match::phrase(seq, seq.len(), seq.len())] } else { Vec::new() })
            }
            ExtractorKind::Root => Ok(self.root_run(seq, at, end)?.into_iter().collect()),
        }
    }

    ///////////////////////////////////////////////////////////////////////////
    // Public entry points

    /// Apply the named extractor to a token sequence, yielding its matches
    /// ordered by extent.
    pub fn apply<'t>(&self, name: &str, seq: &'t TokenSequence) -> Result<MatchStream<'t>> {
        let mut ctx = Context::new();
        let matches = self.scan_named(self.root, name, seq, 0, seq.len(), &mut ctx)?;
        Ok(MatchStream { inner: matches.into_iter() })
    }

    /// Like [`Manager::apply`], but restricted to frame extractors.
    pub fn frames<'t>(&self, name: &str, seq: &'t TokenSequence) -> Result<MatchStream<'t>> {
        let ctx = Context::new();
        let (display, ext) = self.resolve(self.root, name, &ctx)?;
        let kind = self.extractors[ext].kind.ref_kind();
        if kind != RefKind::Frame {
            return Err(ValetError::Type { name: display, expected: "frame", actual: kind.long_name() });
        }
        self.apply(name, seq)
    }

    /// The first match at or after `start`, or None.
    pub fn search<'t>(&self, name: &str, seq: &'t TokenSequence, start: usize) -> Result<Option<MatchRef<'t>>> {
        let mut ctx = Context::new();
        let matches = self.scan_named(self.root, name, seq, start, seq.len(), &mut ctx)?;
        Ok(matches.into_iter().next())
    }

    /// The longest match beginning exactly at `at`, or None.
    pub fn longest_match_at<'t>(&self, name: &str, seq: &'t TokenSequence, at: usize) -> Result<Option<MatchRef<'t>>> {
        let mut ctx = Context::new();
        let matches = self.matches_named(self.root, name, seq, at, seq.len(), &mut ctx)?;
        Ok(matches.into_iter().max_by_key(|m| m.extent().1))
    }

    /// NLP capabilities needed to run the named extractor: the union over
    /// everything it transitively references. Cycles contribute the partial
    /// set gathered before re-entry.
    pub fn requirements(&self, name: &str) -> Result<BTreeSet<Capability>> {
        let mut visited = HashSet::new();
        let mut ctx = Context::new();
        self.requirements_of(self.root, name, &mut visited, &mut ctx)
    }

    fn requirements_of(
        &self,
        ns: NsId,
        name: &str,
        visited: &mut HashSet<ExtId>,
        ctx: &mut Context<'_>,
    ) -> Result<BTreeSet<Capability>> {
        let (_, ext) = self.resolve(ns, name, ctx)?;
        let mut caps = BTreeSet::new();
        if !visited.insert(ext) {
            return Ok(caps);
        }
        let stored = &self.extractors[ext];
        let mut refs = Vec::new();
        match &stored.kind {
            ExtractorKind::Test(test) => {
                test.local_requirements(&mut caps);
                test.references(&mut refs);
            }
            ExtractorKind::Phrase(nfa) => refs.extend(nfa.references().iter().cloned()),
            ExtractorKind::Parse(nfa) => {
                caps.insert(Capability::DepParse);
                refs.extend(nfa.references().iter().cloned());
            }
            ExtractorKind::Lexicon(_) | ExtractorKind::Start | ExtractorKind::End => {}
            ExtractorKind::Root => {
                caps.insert(Capability::DepParse);
            }
            ExtractorKind::Coord(coord) => coord.references(&mut refs),
            ExtractorKind::Frame(frame) => frame.references(&mut refs),
        }
        let target_ns = stored.ns;
        let bindings = stored.bindings.as_deref();
        if let Some(pairs) = bindings {
            ctx.push_bindings(pairs);
        }
        let mut result = Ok(());
        for r in refs {
            match self.requirements_of(target_ns, &r, visited, ctx) {
                Ok(sub) => caps.extend(sub),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        if bindings.is_some() {
            ctx.pop_bindings();
        }
        result?;
        Ok(caps)
    }
}

/// Stream of matches from one extraction, ordered by extent.
pub struct MatchStream<'t> {
    inner: std::vec::IntoIter<MatchRef<'t>>,
}

impl<'t> Iterator for MatchStream<'t> {
    type Item = MatchRef<'t>;

    fn next(&mut self) -> Option<MatchRef<'t>> {
        self.inner.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(rules: &str) -> Manager {
        let mut mgr = Manager::default();
        mgr.parse_string(rules).unwrap();
        mgr
    }

    fn extents(mgr: &Manager, name: &str, seq: &TokenSequence) -> Vec<(usize, usize)> {
        mgr.apply(name, seq).unwrap().map(|m| m.extent()).collect()
    }

    #[test]
    fn token_test_scan_yields_single_token_matches() {
        let mgr = manager("article : { a an the }i");
        let seq = tokenize("The quick fox saw an owl");
        assert_eq!(extents(&mgr, "article", &seq), vec![(0, 1), (4, 5)]);
    }

    #[test]
    fn phrase_scan_is_greedy_and_non_consuming() {
        let mgr = manager("num : /^\\d+$/\nrun -> &num +");
        let seq = tokenize("1 2 3 x");
        // Longest run per start index; later starts still produce their own.
        assert_eq!(extents(&mgr, "run", &seq), vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn phrase_submatches_record_reference_names() {
        let mgr = manager("num : /^\\d+$/\nbignum -> &num ( , &num )*");
        let seq = tokenize("1 , 130 , 000");
        let m = mgr.apply("bignum", &seq).unwrap().next().unwrap();
        assert_eq!(m.extent(), (0, 5));
        let nums = m.all_submatches(Some("num"));
        assert_eq!(nums.len(), 3);
        assert!(nums.iter().all(|n| n.name.as_deref() == Some("num")));
    }

    #[test]
    fn unresolved_references_surface_at_apply_time() {
        let mgr = manager("p -> &missing");
        let seq = tokenize("a b");
        assert!(matches!(mgr.apply("p", &seq), Err(ValetError::UnresolvedName(n)) if n == "missing"));
        assert!(matches!(mgr.apply("absent", &seq), Err(ValetError::UnresolvedName(_))));
    }

    #[test]
    fn type_errors_are_detected_at_run_time() {
        let mgr = manager("p -> a\nq ^ nsubj\nr -> @q");
        let mut seq = tokenize("a b");
        seq.add_dependencies(&[(0, 1, "nsubj")]);
        assert!(matches!(mgr.apply("r", &seq), Err(ValetError::Type { .. })));
    }

    #[test]
    fn builtins_resolve_from_any_namespace() {
        let mgr = manager("ns <-\n  anyword -> &ANY\ntop -> @ns.anyword &ANY");
        let seq = tokenize("x y");
        assert_eq!(extents(&mgr, "top", &seq), vec![(0, 2)]);
    }

    #[test]
    fn start_and_end_anchor_phrases() {
        let mgr = manager("w : /./\nfirst -> @START &w\nlast -> &w @END");
        let seq = tokenize("a b c");
        assert_eq!(extents(&mgr, "first", &seq), vec![(0, 1)]);
        assert_eq!(extents(&mgr, "last", &seq), vec![(2, 3)]);
    }

    #[test]
    fn namespace_blocks_resolve_by_qualified_name() {
        let mgr = manager("ortho <-\n  num : /^\\d+$/\nmoney -> $ &ortho.num");
        let seq = tokenize("pay $ 5 now");
        assert_eq!(extents(&mgr, "money", &seq), vec![(1, 3)]);
        assert_eq!(extents(&mgr, "ortho.num", &seq), vec![(2, 3)]);
    }

    #[test]
    fn inner_rules_see_outer_names_through_the_climb() {
        let mgr = manager("digit : /^\\d$/\nns <-\n  two -> &digit &digit\ntop ~ match(ns.two, _)");
        let seq = tokenize("4 2");
        assert_eq!(extents(&mgr, "top", &seq), vec![(0, 2)]);
    }

    #[test]
    fn redefinition_overwrites_by_default() {
        let mgr = manager("x : { a }\nx : { b }");
        let seq = tokenize("a b");
        assert_eq!(extents(&mgr, "x", &seq), vec![(1, 2)]);

        let mut strict = Manager::new(ManagerOptions { error_on_redefinition: true, ..ManagerOptions::default() });
        assert!(strict.parse_string("x : { a }\nx : { b }").is_err());
    }

    #[test]
    fn recursion_at_same_position_is_reported() {
        let mgr = manager("loop -> @loop x");
        let seq = tokenize("x x");
        assert!(matches!(mgr.apply("loop", &seq), Err(ValetError::Recursion { .. })));
    }

    #[test]
    fn requirements_union_over_references() {
        let mgr = manager("noun : pos[NN]\nent : ner[ORG]\nnp -> &noun &ent\nsv ^ nsubj\nboth ~ contains(np, sv)");
        let req = mgr.requirements("both").unwrap();
        assert_eq!(
            req,
            BTreeSet::from([Capability::Pos, Capability::Ner, Capability::DepParse])
        );
        assert_eq!(mgr.requirements("noun").unwrap(), BTreeSet::from([Capability::Pos]));
    }

    #[test]
    fn requirements_survive_reference_cycles() {
        let mgr = manager("a -> &noun @b\nb -> @a\nnoun : pos[NN]");
        assert_eq!(mgr.requirements("a").unwrap(), BTreeSet::from([Capability::Pos]));
    }

    #[test]
    fn missing_annotation_layer_is_a_requirement_error() {
        let mgr = manager("noun : pos[NN]");
        let seq = tokenize("dog");
        assert!(matches!(mgr.apply("noun", &seq), Err(ValetError::ParseRequirement(_))));
    }

    #[test]
    fn parse_rule_without_dependencies_is_a_requirement_error() {
        let mgr = manager("sv ^ nsubj");
        let seq = tokenize("Rita runs");
        assert!(matches!(mgr.apply("sv", &seq), Err(ValetError::ParseRequirement(_))));
    }

    #[test]
    fn frames_entry_point_rejects_non_frames() {
        let mgr = manager("x : { a }\nf $ frame(x)");
        let seq = tokenize("a");
        assert!(mgr.frames("f", &seq).is_ok());
        assert!(matches!(mgr.frames("x", &seq), Err(ValetError::Type { .. })));
    }

    #[test]
    fn longest_match_and_search() {
        let mgr = manager("num : /^\\d+$/\nrun -> &num +");
        let seq = tokenize("x 1 2 3");
        let m = mgr.longest_match_at("run", &seq, 1).unwrap().unwrap();
        assert_eq!(m.extent(), (1, 4));
        let m = mgr.search("run", &seq, 0).unwrap().unwrap();
        assert_eq!(m.extent(), (1, 4));
        assert!(mgr.search("run", &seq, 4).unwrap().is_none());
    }
}
