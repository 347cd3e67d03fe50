//! Parser for the DOT subset used to describe task graphs.
//!
//! Supported: an optional `[strict] digraph [name] { ... }` wrapper or a bare
//! statement list; node statements `a [k=v, k2="v2"]`; edge chains
//! `a -> b -> c [attrs]`; graph attributes `k=v` (ignored); `//`, `#` and
//! `/* */` comments. IDs are bare (`[A-Za-z0-9_.]`, numerals), quoted, or
//! angle-bracketed. The content of an angle-bracketed value is kept verbatim.

use crate::errors::ParseError;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A node with its attributes, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotNode {
    /// Node identifier.
    pub id: String,
    /// Attributes; later declarations override earlier ones.
    pub attrs: BTreeMap<String, String>,
}

/// A parsed graph: nodes in first-mention order and deduplicated edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DotGraph {
    /// Nodes in the order they were first mentioned.
    pub nodes: Vec<DotNode>,
    /// Edges as (from, to) node positions in `nodes`.
    pub edges: Vec<(usize, usize)>,
    index: HashMap<String, usize>,
    edge_set: HashSet<(usize, usize)>,
}

impl DotGraph {
    /// Returns the position of a node by id.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    fn node(&mut self, id: &str) -> usize {
        if let Some(&pos) = self.index.get(id) {
            return pos;
        }
        let pos = self.nodes.len();
        self.nodes.push(DotNode {
            id: id.to_string(),
            attrs: BTreeMap::new(),
        });
        self.index.insert(id.to_string(), pos);
        pos
    }

    fn edge(&mut self, from: usize, to: usize) {
        if self.edge_set.insert((from, to)) {
            self.edges.push((from, to));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Id(String),
    Arrow,
    UndirectedEdge,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Eq,
    Semi,
    Comma,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Self::Id(s) => format!("'{s}'"),
            Self::Arrow => "'->'".to_string(),
            Self::UndirectedEdge => "'--'".to_string(),
            Self::LBrace => "'{'".to_string(),
            Self::RBrace => "'}'".to_string(),
            Self::LBracket => "'['".to_string(),
            Self::RBracket => "']'".to_string(),
            Self::Eq => "'='".to_string(),
            Self::Semi => "';'".to_string(),
            Self::Comma => "','".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Tok,
    line: usize,
    column: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    at_line_start: bool,
}

fn is_id_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
            column: 1,
            at_line_start: true,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
            self.at_line_start = true;
        } else {
            self.column += 1;
            if !c.is_whitespace() {
                self.at_line_start = false;
            }
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line, self.column, message)
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.chars.peek().copied() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') if self.at_line_start => self.skip_line(),
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    match ahead.next() {
                        Some('/') => self.skip_line(),
                        Some('*') => {
                            self.bump();
                            self.bump();
                            self.skip_block_comment()?;
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), ParseError> {
        let mut prev = '\0';
        while let Some(c) = self.bump() {
            if prev == '*' && c == '/' {
                return Ok(());
            }
            prev = c;
        }
        Err(self.error("unterminated block comment"))
    }

    fn quoted(&mut self) -> Result<String, ParseError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated quoted string")),
                Some('"') => return Ok(out),
                Some('\\') => match self.chars.peek().copied() {
                    Some('"') => {
                        self.bump();
                        out.push('"');
                    }
                    Some('\\') => {
                        self.bump();
                        out.push('\\');
                    }
                    Some('\n') => {
                        // Line continuation.
                        self.bump();
                    }
                    _ => out.push('\\'),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn angled(&mut self) -> Result<String, ParseError> {
        let mut out = String::new();
        let mut depth = 1usize;
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated '<' value")),
                Some('<') => {
                    depth += 1;
                    out.push('<');
                }
                Some('>') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(out);
                    }
                    out.push('>');
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn bare(&mut self, first: char) -> String {
        let mut out = String::from(first);
        while let Some(c) = self.chars.peek().copied() {
            if !is_id_char(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    fn tokens(mut self) -> Result<Vec<Spanned>, ParseError> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let Some(c) = self.bump() else {
                return Ok(out);
            };
            let tok = match c {
                '{' => Tok::LBrace,
                '}' => Tok::RBrace,
                '[' => Tok::LBracket,
                ']' => Tok::RBracket,
                '=' => Tok::Eq,
                ';' => Tok::Semi,
                ',' => Tok::Comma,
                '"' => Tok::Id(self.quoted()?),
                '<' => Tok::Id(self.angled()?),
                '-' => match self.chars.peek().copied() {
                    Some('>') => {
                        self.bump();
                        Tok::Arrow
                    }
                    Some('-') => {
                        self.bump();
                        Tok::UndirectedEdge
                    }
                    Some(d) if d.is_ascii_digit() || d == '.' => Tok::Id(self.bare('-')),
                    _ => return Err(ParseError::new(line, column, "unexpected '-'")),
                },
                c if is_id_char(c) => Tok::Id(self.bare(c)),
                other => {
                    return Err(ParseError::new(
                        line,
                        column,
                        format!("unexpected character '{other}'"),
                    ))
                }
            };
            out.push(Spanned { tok, line, column });
        }
    }
}

struct Parser {
    toks: Vec<Spanned>,
    pos: usize,
    end: (usize, usize),
    graph: DotGraph,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|s| &s.tok)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.toks.get(self.pos + offset).map(|s| &s.tok)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let (line, column) = self
            .toks
            .get(self.pos)
            .map_or(self.end, |s| (s.line, s.column));
        ParseError::new(line, column, message)
    }

    fn unexpected(&self, wanted: &str) -> ParseError {
        match self.peek() {
            Some(tok) => self.error_here(format!("expected {wanted}, found {}", tok.describe())),
            None => self.error_here(format!("expected {wanted}, found end of input")),
        }
    }

    fn expect(&mut self, tok: &Tok, wanted: &str) -> Result<(), ParseError> {
        if self.peek() == Some(tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(wanted))
        }
    }

    fn id(&mut self, wanted: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(Tok::Id(_)) => match self.advance() {
                Some(Spanned { tok: Tok::Id(s), .. }) => Ok(s),
                _ => Err(self.unexpected(wanted)),
            },
            _ => Err(self.unexpected(wanted)),
        }
    }

    fn is_keyword(&self, offset: usize, keyword: &str) -> bool {
        matches!(self.peek_at(offset), Some(Tok::Id(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn parse(mut self) -> Result<DotGraph, ParseError> {
        let mut wrapped = false;
        if self.is_keyword(0, "strict") {
            self.pos += 1;
        }
        if self.is_keyword(0, "digraph") {
            self.pos += 1;
            if matches!(self.peek(), Some(Tok::Id(_))) {
                self.pos += 1;
            }
            self.expect(&Tok::LBrace, "'{'")?;
            wrapped = true;
        } else if self.is_keyword(0, "graph") && !matches!(self.peek_at(1), Some(Tok::Eq)) {
            return Err(self.error_here("undirected graphs are not supported"));
        }

        self.statements(wrapped)?;

        if wrapped {
            self.expect(&Tok::RBrace, "'}'")?;
        }
        if self.peek().is_some() {
            return Err(self.unexpected("end of input"));
        }
        Ok(self.graph)
    }

    fn statements(&mut self, wrapped: bool) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                None => return Ok(()),
                Some(Tok::RBrace) if wrapped => return Ok(()),
                Some(Tok::Semi) => {
                    self.pos += 1;
                }
                Some(Tok::Id(_)) => self.statement()?,
                Some(_) => return Err(self.unexpected("a statement")),
            }
        }
    }

    fn statement(&mut self) -> Result<(), ParseError> {
        if matches!(self.peek_at(1), Some(Tok::Eq)) {
            // Graph-level attribute.
            self.id("attribute name")?;
            self.pos += 1;
            self.id("attribute value")?;
            return Ok(());
        }
        if self.is_keyword(0, "subgraph") {
            return Err(self.error_here("subgraphs are not supported"));
        }
        if ["graph", "node", "edge"].iter().any(|k| self.is_keyword(0, k))
            && matches!(self.peek_at(1), Some(Tok::LBracket))
        {
            // Default attribute statements carry no task configuration.
            self.pos += 1;
            self.attr_lists()?;
            return Ok(());
        }

        let first = self.id("node name")?;
        let mut chain = vec![self.graph.node(&first)];
        loop {
            match self.peek() {
                Some(Tok::Arrow) => {
                    self.pos += 1;
                    let next = self.id("node name")?;
                    chain.push(self.graph.node(&next));
                }
                Some(Tok::UndirectedEdge) => {
                    return Err(self.error_here("undirected edges are not supported"))
                }
                _ => break,
            }
        }

        let attrs = self.attr_lists()?;
        if chain.len() == 1 {
            self.graph.nodes[chain[0]].attrs.extend(attrs);
        } else {
            // Edge attributes are accepted and ignored.
            for pair in chain.windows(2) {
                self.graph.edge(pair[0], pair[1]);
            }
        }
        Ok(())
    }

    fn attr_lists(&mut self) -> Result<BTreeMap<String, String>, ParseError> {
        let mut attrs = BTreeMap::new();
        while self.peek() == Some(&Tok::LBracket) {
            self.pos += 1;
            loop {
                match self.peek() {
                    Some(Tok::RBracket) => {
                        self.pos += 1;
                        break;
                    }
                    Some(Tok::Comma | Tok::Semi) => {
                        self.pos += 1;
                    }
                    Some(Tok::Id(_)) => {
                        let key = self.id("attribute name")?;
                        self.expect(&Tok::Eq, "'='")?;
                        let value = self.id("attribute value")?;
                        attrs.insert(key, value);
                    }
                    _ => return Err(self.unexpected("an attribute or ']'")),
                }
            }
        }
        Ok(attrs)
    }
}

/// Parses graph text into nodes and edges.
///
/// # Errors
///
/// Returns a [`ParseError`] with the position of the first offending token.
pub fn parse(text: &str) -> Result<DotGraph, ParseError> {
    let lexer = Lexer::new(text);
    let toks = lexer.tokens()?;
    let end = text.lines().enumerate().last().map_or((1, 1), |(i, l)| {
        (i + 1, l.chars().count() + 1)
    });
    Parser {
        toks,
        pos: 0,
        end,
        graph: DotGraph::default(),
    }
    .parse()
}
