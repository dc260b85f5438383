use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Int(u32),
    Group(String), // `$Name`
    Hash,
    Plus,
    Pipe,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Bang,
    Arrow,  // `->`
    TwoWay, // `<->`
    Newline,
    Unknown(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{s}"),
            Token::Int(n) => write!(f, "{n}"),
            Token::Group(s) => write!(f, "${s}"),
            Token::Hash => write!(f, "#"),
            Token::Plus => write!(f, "+"),
            Token::Pipe => write!(f, "|"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Bang => write!(f, "!"),
            Token::Arrow => write!(f, "->"),
            Token::TwoWay => write!(f, "<->"),
            Token::Newline => write!(f, "\\n"),
            Token::Unknown(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lexeme {
    pub token: Token,
    pub line: usize, // 1-based
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '\'' | '*')
}

fn take_word(chars: &[char], mut i: usize) -> (String, usize) {
    let start = i;
    while i < chars.len() && is_word_char(chars[i]) {
        i += 1;
    }
    (chars[start..i].iter().collect(), i)
}

/// Splits logic text into tokens. Never fails: characters outside the grammar
/// become `Token::Unknown` and make the enclosing statement malformed.
pub fn tokenize(text: &str) -> Vec<Lexeme> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = vec![];
    let mut line = 1;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let token = match c {
            '\n' => {
                out.push(Lexeme {
                    token: Token::Newline,
                    line,
                });
                line += 1;
                i += 1;
                continue;
            }
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '-' if chars.get(i + 1) == Some(&'>') => {
                i += 2;
                Token::Arrow
            }
            '<' if chars.get(i + 1) == Some(&'-') && chars.get(i + 2) == Some(&'>') => {
                i += 3;
                Token::TwoWay
            }
            '$' => {
                let (word, next) = take_word(&chars, i + 1);
                i = next.max(i + 1);
                if word.is_empty() {
                    Token::Unknown('$')
                } else {
                    Token::Group(word)
                }
            }
            c if is_word_char(c) => {
                let (word, next) = take_word(&chars, i);
                i = next;
                if word.chars().all(|c| c.is_ascii_digit()) {
                    match word.parse::<u32>() {
                        Ok(n) => Token::Int(n),
                        Err(_) => Token::Unknown(c),
                    }
                } else {
                    Token::Ident(word)
                }
            }
            _ => {
                i += 1;
                match c {
                    '#' => Token::Hash,
                    '+' => Token::Plus,
                    '|' => Token::Pipe,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    ',' => Token::Comma,
                    ':' => Token::Colon,
                    '!' => Token::Bang,
                    _ => Token::Unknown(c),
                }
            }
        };
        out.push(Lexeme { token, line });
    }
    out
}

// Only these can open a statement: `Scene N`, `$Group {`, or a rule with an arrow.
fn starts_statement(line: &[Lexeme]) -> bool {
    let token = |i: usize| line.get(i).map(|l| &l.token);
    match (token(0), token(1)) {
        (Some(Token::Ident(kw)), Some(Token::Int(_))) if kw == "Scene" => true,
        (Some(Token::Group(_)), Some(Token::LBrace)) => true,
        _ => line
            .iter()
            .any(|l| matches!(l.token, Token::Arrow | Token::TwoWay)),
    }
}

/// Groups tokens into statements. A newline ends a statement when no bracket
/// is open and the previous token can end an expression. A line that opens a
/// new statement always closes the pending one, so an unbalanced bracket
/// costs only its own statement.
pub fn split_statements(lexemes: Vec<Lexeme>) -> Vec<Vec<Lexeme>> {
    let mut lines: Vec<Vec<Lexeme>> = vec![vec![]];
    for lexeme in lexemes {
        if lexeme.token == Token::Newline {
            lines.push(vec![]);
        } else if let Some(line) = lines.last_mut() {
            line.push(lexeme);
        }
    }

    let mut statements = vec![];
    let mut current: Vec<Lexeme> = vec![];
    let mut depth: i32 = 0;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if !current.is_empty() && starts_statement(&line) {
            statements.push(std::mem::take(&mut current));
            depth = 0;
        }
        for lexeme in line {
            match lexeme.token {
                Token::LParen | Token::LBrace => depth += 1,
                Token::RParen | Token::RBrace => depth -= 1,
                _ => {}
            }
            current.push(lexeme);
        }
        let ends_term = matches!(
            current.last().map(|l| &l.token),
            Some(Token::Ident(_) | Token::Int(_) | Token::RParen | Token::RBrace)
        );
        if depth <= 0 && ends_term {
            statements.push(std::mem::take(&mut current));
            depth = 0;
        }
    }
    if !current.is_empty() {
        statements.push(current);
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<Token> {
        tokenize(text).into_iter().map(|l| l.token).collect()
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokens("Door* <-> !$Exits: 2#Key+Dash // trailing"),
            vec![
                Token::Ident("Door*".to_string()),
                Token::TwoWay,
                Token::Bang,
                Token::Group("Exits".to_string()),
                Token::Colon,
                Token::Int(2),
                Token::Hash,
                Token::Ident("Key".to_string()),
                Token::Plus,
                Token::Ident("Dash".to_string()),
            ]
        );
        assert_eq!(tokens("a - b"), vec![
            Token::Ident("a".to_string()),
            Token::Unknown('-'),
            Token::Ident("b".to_string()),
        ]);
    }

    #[test]
    fn test_split_statements() {
        let text = "Scene 3\nA -> B: X +\n  Y\nC -> D: (X |\nY)\n\n$G {\n A,\n B }\n";
        let statements = split_statements(tokenize(text));
        assert_eq!(statements.len(), 4);
        assert_eq!(statements[1].len(), 7);
        assert_eq!(statements[1][0].line, 2);
        assert_eq!(statements[3].last().map(|l| &l.token), Some(&Token::RBrace));
    }

    #[test]
    fn test_unclosed_bracket_ends_at_next_statement() {
        let text = "Scene 3\nA -> B: (X\nA -> C: Y\n$G { A,\nScene 4\nC -> D: Z\n";
        let statements = split_statements(tokenize(text));
        let first_lines: Vec<usize> = statements.iter().map(|s| s[0].line).collect();
        assert_eq!(first_lines, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(statements[1].last().map(|l| &l.token), Some(&Token::Ident("X".to_string())));
    }

    #[test]
    fn test_unicode_aliases() {
        assert_eq!(
            tokens("Höhle -> Tür: Schlüssel"),
            vec![
                Token::Ident("Höhle".to_string()),
                Token::Arrow,
                Token::Ident("Tür".to_string()),
                Token::Colon,
                Token::Ident("Schlüssel".to_string()),
            ]
        );
    }
}
