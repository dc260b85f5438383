use anyhow::{Context, Result, bail};
use hashbrown::HashMap;

use crate::lexer::{Token, tokenize};
use crate::{FALSE_STATE, TRUE_STATE};

/// Named logic expressions, substituted for bare identifiers during compilation.
#[derive(Clone, Debug, Default)]
pub struct MacroTable {
    macros: HashMap<String, Vec<Token>>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: &str, expr: &str) -> Result<()> {
        let tokens: Vec<Token> = tokenize(expr)
            .into_iter()
            .map(|l| l.token)
            .filter(|t| *t != Token::Newline)
            .collect();
        if tokens.is_empty() {
            bail!("macro {name} has an empty expansion");
        }
        if let Some(t) = tokens.iter().find(|t| {
            !matches!(
                t,
                Token::Ident(_)
                    | Token::Int(_)
                    | Token::Hash
                    | Token::Plus
                    | Token::Pipe
                    | Token::LParen
                    | Token::RParen
            )
        }) {
            bail!("unexpected token '{t}' in macro {name}");
        }
        self.macros.insert(name.to_string(), tokens);
        Ok(())
    }

    // Rebinds a macro to a literal, as settings toggles do.
    pub fn bind(&mut self, name: &str, value: bool) {
        let literal = if value { TRUE_STATE } else { FALSE_STATE };
        self.macros
            .insert(name.to_string(), vec![Token::Ident(literal.to_string())]);
    }

    /// Reads `Name = expr` lines; blank lines and `//` comments are ignored.
    pub fn parse(&mut self, text: &str) -> Result<usize> {
        let mut count = 0;
        for (i, line) in text.lines().enumerate() {
            let line = match line.find("//") {
                Some(pos) => &line[..pos],
                None => line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((name, expr)) = line.split_once('=') else {
                bail!("line {}: expected 'Name = expression'", i + 1);
            };
            let name = name.trim();
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                bail!("line {}: invalid macro name '{name}'", i + 1);
            }
            self.define(name, expr.trim())
                .with_context(|| format!("line {}", i + 1))?;
            count += 1;
        }
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<&[Token]> {
        self.macros.get(name).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

/// Classifies identifiers that name optional skips: `Some(true)` when the skip
/// is enabled (the term becomes `true`), `Some(false)` when disabled.
pub trait SkipPredicate {
    fn classify(&self, ident: &str) -> Option<bool>;
}

pub struct NoSkips;

impl SkipPredicate for NoSkips {
    fn classify(&self, _ident: &str) -> Option<bool> {
        None
    }
}

impl SkipPredicate for HashMap<String, bool> {
    fn classify(&self, ident: &str) -> Option<bool> {
        self.get(ident).copied()
    }
}
