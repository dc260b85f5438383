use anyhow::{Context, Result, bail, ensure};
use checkrando_game::{EdgeIdx, NodeIdx, SceneId, Topology};
use hashbrown::HashMap;
use log::{info, warn};
use std::path::Path;

use crate::lexer::{Lexeme, Token, split_statements, tokenize};
use crate::macros::{MacroTable, SkipPredicate};
use crate::{FALSE_STATE, LogicLayer, LogicSet, TRUE_STATE, normalize_alternatives};

const MAX_MACRO_DEPTH: usize = 16;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompileReport {
    pub statements: usize,
    pub compiled: usize,
    pub skipped: usize,
    pub edges: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Any,
    Group(String),
    Not(Box<Pattern>),
}

impl Pattern {
    fn is_exact(&self) -> bool {
        matches!(self, Pattern::Exact(_))
    }
}

#[derive(Clone, Debug)]
enum Postfix {
    Term(String),
    Int(u32),
    Hash,
    And,
    Or,
}

enum Value {
    Int(u32),
    Sets(Vec<LogicSet>),
}

pub struct LogicCompiler<'a> {
    topology: &'a Topology,
    macros: &'a MacroTable,
    skips: &'a dyn SkipPredicate,
}

// Per-source parsing state:
struct CompileState {
    scene: Option<SceneId>,
    groups: HashMap<(SceneId, String), Vec<Pattern>>,
    layer: LogicLayer,
}

impl<'a> LogicCompiler<'a> {
    pub fn new(
        topology: &'a Topology,
        macros: &'a MacroTable,
        skips: &'a dyn SkipPredicate,
    ) -> Self {
        LogicCompiler {
            topology,
            macros,
            skips,
        }
    }

    pub fn compile_file(&self, name: &str, path: &Path) -> Result<(LogicLayer, CompileReport)> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read logic layer {name} at {}", path.display()))?;
        Ok(self.compile(name, &text))
    }

    pub fn compile(&self, name: &str, text: &str) -> (LogicLayer, CompileReport) {
        let mut state = CompileState {
            scene: None,
            groups: HashMap::new(),
            layer: LogicLayer::new(name),
        };
        let mut report = CompileReport::default();
        for statement in split_statements(tokenize(text)) {
            let line = statement.first().map(|l| l.line).unwrap_or(0);
            report.statements += 1;
            match self.compile_statement(&mut state, &statement) {
                Ok(()) => report.compiled += 1,
                Err(e) => {
                    warn!("{name}:{line}: skipping statement: {e:#}");
                    report.skipped += 1;
                }
            }
        }
        report.edges = state.layer.num_edges();
        info!(
            "Compiled logic layer {name}: {} statements, {} skipped, {} edges",
            report.statements, report.skipped, report.edges
        );
        (state.layer, report)
    }

    fn compile_statement(&self, state: &mut CompileState, statement: &[Lexeme]) -> Result<()> {
        let tokens: Vec<&Token> = statement.iter().map(|l| &l.token).collect();
        match tokens.as_slice() {
            [Token::Ident(kw), Token::Int(id)] if kw == "Scene" => {
                let scene = *id as SceneId;
                if self.topology.scene_nodes(scene).is_empty() {
                    warn!("Scene {scene} has no nodes in the topology");
                }
                state.scene = Some(scene);
                Ok(())
            }
            [Token::Group(name), Token::LBrace, rest @ ..] => {
                let scene = state.scene.context("group defined before any Scene")?;
                let Some((Token::RBrace, items)) = rest.split_last() else {
                    bail!("group ${name} is not closed");
                };
                let mut patterns = vec![];
                for item in items.split(|t| **t == Token::Comma) {
                    if item.is_empty() {
                        continue;
                    }
                    patterns.push(parse_pattern(item)?);
                }
                state.groups.insert((scene, name.clone()), patterns);
                Ok(())
            }
            _ => self.compile_rule(state, &tokens),
        }
    }

    fn compile_rule(&self, state: &mut CompileState, tokens: &[&Token]) -> Result<()> {
        let scene = state.scene.context("logic rule before any Scene")?;
        let arrow_pos = tokens
            .iter()
            .position(|t| matches!(t, Token::Arrow | Token::TwoWay))
            .context("expected '->' or '<->'")?;
        let colon_pos = tokens
            .iter()
            .position(|t| **t == Token::Colon)
            .context("expected ':'")?;
        ensure!(arrow_pos < colon_pos, "expected ':' after the destination");
        let two_way = *tokens[arrow_pos] == Token::TwoWay;
        let from = parse_pattern(&tokens[..arrow_pos])?;
        let to = parse_pattern(&tokens[arrow_pos + 1..colon_pos])?;
        let expr = &tokens[colon_pos + 1..];
        ensure!(!expr.is_empty(), "missing logic expression");

        let alternatives = self.compile_expr(expr)?;

        let mut edges = self.resolve_edges(state, scene, &from, &to)?;
        if two_way {
            edges.extend(self.resolve_edges(state, scene, &to, &from)?);
        }
        for edge in edges {
            state.layer.insert(scene, edge, alternatives.clone())?;
        }
        Ok(())
    }

    fn resolve_edges(
        &self,
        state: &CompileState,
        scene: SceneId,
        from: &Pattern,
        to: &Pattern,
    ) -> Result<Vec<EdgeIdx>> {
        let from_nodes = self.resolve_pattern(state, scene, from, 0)?;
        let to_nodes = self.resolve_pattern(state, scene, to, 0)?;
        let mut edges = vec![];
        for &a in &from_nodes {
            for &b in &to_nodes {
                if a != b {
                    edges.extend(self.topology.find_edges(a, b));
                }
            }
        }
        if edges.is_empty() && from.is_exact() && to.is_exact() {
            bail!(
                "no edge {} -> {} in scene {scene}",
                self.topology.nodes[from_nodes[0]].alias,
                self.topology.nodes[to_nodes[0]].alias
            );
        }
        Ok(edges)
    }

    fn resolve_pattern(
        &self,
        state: &CompileState,
        scene: SceneId,
        pattern: &Pattern,
        depth: usize,
    ) -> Result<Vec<NodeIdx>> {
        ensure!(depth <= MAX_MACRO_DEPTH, "group nesting too deep");
        let scene_nodes = self.topology.scene_nodes(scene);
        let alias = |i: &NodeIdx| self.topology.nodes[*i].alias.as_str();
        let nodes: Vec<NodeIdx> = match pattern {
            Pattern::Exact(name) => {
                let node = self
                    .topology
                    .node_by_alias(scene, name)
                    .with_context(|| format!("no node {name} in scene {scene}"))?;
                vec![node]
            }
            Pattern::Prefix(p) => scene_nodes
                .iter()
                .copied()
                .filter(|i| alias(i).starts_with(p.as_str()))
                .collect(),
            Pattern::Suffix(s) => scene_nodes
                .iter()
                .copied()
                .filter(|i| alias(i).ends_with(s.as_str()))
                .collect(),
            Pattern::Any => scene_nodes.to_vec(),
            Pattern::Group(name) => {
                let patterns = state
                    .groups
                    .get(&(scene, name.clone()))
                    .with_context(|| format!("unknown group ${name} in scene {scene}"))?;
                let mut out: Vec<NodeIdx> = vec![];
                for p in patterns {
                    for n in self.resolve_pattern(state, scene, p, depth + 1)? {
                        if !out.contains(&n) {
                            out.push(n);
                        }
                    }
                }
                out
            }
            Pattern::Not(inner) => {
                let excluded = self.resolve_pattern(state, scene, inner, depth + 1)?;
                scene_nodes
                    .iter()
                    .copied()
                    .filter(|n| !excluded.contains(n))
                    .collect()
            }
        };
        Ok(nodes)
    }

    /// Compiles an expression to its alternatives, e.g. `X+Y|2#Z` to
    /// `[{X:1,Y:1},{Z:2}]`.
    pub fn compile_expr(&self, tokens: &[&Token]) -> Result<Vec<LogicSet>> {
        let mut expanded = vec![];
        for t in tokens {
            self.expand(t, &mut expanded, 0)?;
        }
        let postfix = to_postfix(&expanded)?;
        evaluate(&postfix)
    }

    pub fn compile_expr_str(&self, text: &str) -> Result<Vec<LogicSet>> {
        let lexemes = tokenize(text);
        let tokens: Vec<&Token> = lexemes
            .iter()
            .map(|l| &l.token)
            .filter(|t| **t != Token::Newline)
            .collect();
        self.compile_expr(&tokens)
    }

    fn expand(&self, token: &Token, out: &mut Vec<Token>, depth: usize) -> Result<()> {
        let Token::Ident(name) = token else {
            out.push(token.clone());
            return Ok(());
        };
        if let Some(expansion) = self.macros.get(name) {
            ensure!(depth < MAX_MACRO_DEPTH, "macro {name} expands too deeply");
            out.push(Token::LParen);
            for t in expansion {
                self.expand(t, out, depth + 1)?;
            }
            out.push(Token::RParen);
        } else if let Some(enabled) = self.skips.classify(name) {
            let literal = if enabled { TRUE_STATE } else { FALSE_STATE };
            out.push(Token::Ident(literal.to_string()));
        } else {
            out.push(token.clone());
        }
        Ok(())
    }
}

fn parse_pattern(tokens: &[&Token]) -> Result<Pattern> {
    match tokens {
        [Token::Bang, rest @ ..] => Ok(Pattern::Not(Box::new(parse_pattern(rest)?))),
        [Token::Group(name)] => Ok(Pattern::Group(name.clone())),
        [Token::Ident(name)] => {
            if name == "*" {
                Ok(Pattern::Any)
            } else if let Some(prefix) = name.strip_suffix('*') {
                Ok(Pattern::Prefix(prefix.to_string()))
            } else if let Some(suffix) = name.strip_prefix('*') {
                Ok(Pattern::Suffix(suffix.to_string()))
            } else if name.contains('*') {
                bail!("unsupported wildcard in '{name}'")
            } else {
                Ok(Pattern::Exact(name.clone()))
            }
        }
        [] => bail!("missing node pattern"),
        _ => bail!(
            "invalid node pattern '{}'",
            tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" ")
        ),
    }
}

fn precedence(token: &Token) -> u8 {
    match token {
        Token::Hash => 3,
        Token::Plus => 2,
        Token::Pipe => 1,
        _ => 0,
    }
}

fn operator(token: &Token) -> Postfix {
    match token {
        Token::Hash => Postfix::Hash,
        Token::Plus => Postfix::And,
        _ => Postfix::Or,
    }
}

// Shunting-yard. Operators are left-associative; syntax is validated here so
// that evaluation only ever sees well-formed input.
fn to_postfix(tokens: &[Token]) -> Result<Vec<Postfix>> {
    let mut output = vec![];
    let mut ops: Vec<&Token> = vec![];
    let mut expect_operand = true;
    for token in tokens {
        match token {
            Token::Ident(name) => {
                ensure!(expect_operand, "unexpected term '{name}'");
                output.push(Postfix::Term(name.clone()));
                expect_operand = false;
            }
            Token::Int(n) => {
                ensure!(expect_operand, "unexpected integer {n}");
                output.push(Postfix::Int(*n));
                expect_operand = false;
            }
            Token::Hash | Token::Plus | Token::Pipe => {
                ensure!(!expect_operand, "unexpected operator '{token}'");
                while let Some(top) = ops.last() {
                    if **top != Token::LParen && precedence(top) >= precedence(token) {
                        output.push(operator(top));
                        ops.pop();
                    } else {
                        break;
                    }
                }
                ops.push(token);
                expect_operand = true;
            }
            Token::LParen => {
                ensure!(expect_operand, "unexpected '('");
                ops.push(token);
            }
            Token::RParen => {
                ensure!(!expect_operand, "unexpected ')'");
                loop {
                    match ops.pop() {
                        Some(Token::LParen) => break,
                        Some(op) => output.push(operator(op)),
                        None => bail!("unbalanced ')'"),
                    }
                }
            }
            _ => bail!("unexpected token '{token}' in expression"),
        }
    }
    ensure!(!expect_operand, "expression ends with an operator");
    while let Some(op) = ops.pop() {
        ensure!(*op != Token::LParen, "unbalanced '('");
        output.push(operator(op));
    }
    Ok(output)
}

fn and(left: Vec<LogicSet>, right: Vec<LogicSet>) -> Result<Vec<LogicSet>> {
    let mut out = vec![];
    for a in &left {
        for b in &right {
            let mut set = a.clone();
            set.conditions.extend(b.conditions.iter().cloned());
            out.push(set.normalized()?);
        }
    }
    normalize_alternatives(out)
}

fn scale(n: u32, sets: Vec<LogicSet>) -> Result<Vec<LogicSet>> {
    let mut scaled = vec![];
    for s in sets {
        if s.is_never() {
            scaled.push(s);
            continue;
        }
        let mut set = LogicSet::default();
        for c in &s.conditions {
            let Some(count) = c.count.checked_mul(n) else {
                bail!("{n}#{} overflows", c.state);
            };
            set.add(&c.state, count)?;
        }
        scaled.push(set);
    }
    normalize_alternatives(scaled)
}

fn evaluate(postfix: &[Postfix]) -> Result<Vec<LogicSet>> {
    let mut stack: Vec<Value> = vec![];
    for item in postfix {
        let value = match item {
            Postfix::Term(name) if name == TRUE_STATE => Value::Sets(vec![LogicSet::always()]),
            Postfix::Term(name) if name == FALSE_STATE => Value::Sets(vec![LogicSet::never()]),
            Postfix::Term(name) => Value::Sets(vec![LogicSet::single(name, 1)]),
            Postfix::Int(n) => Value::Int(*n),
            op => {
                let (Some(rhs), Some(lhs)) = (stack.pop(), stack.pop()) else {
                    panic!("corrupt logic value stack at {op:?}");
                };
                match (op, lhs, rhs) {
                    (Postfix::Hash, Value::Int(n), Value::Sets(sets)) => Value::Sets(scale(n, sets)?),
                    (Postfix::Hash, _, _) => bail!("'#' expects an integer and a term"),
                    (Postfix::And, Value::Sets(l), Value::Sets(r)) => Value::Sets(and(l, r)?),
                    (Postfix::Or, Value::Sets(l), Value::Sets(r)) => {
                        let mut all = l;
                        all.extend(r);
                        Value::Sets(normalize_alternatives(all)?)
                    }
                    _ => bail!("bare integer used as a condition"),
                }
            }
        };
        stack.push(value);
    }
    let result = stack.pop();
    assert!(stack.is_empty(), "corrupt logic value stack");
    match result {
        Some(Value::Sets(sets)) => Ok(sets),
        Some(Value::Int(n)) => bail!("bare integer {n} used as a condition"),
        None => panic!("corrupt logic value stack: empty"),
    }
}
