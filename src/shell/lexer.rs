use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Pipe,       // |
    Or,         // ||
    Background, // &
    And,        // &&
    Input,      // <
    Output,     // >
    Semicolon,  // ;
    Bang,       // !
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "{}", w),
            Token::Pipe => write!(f, "|"),
            Token::Or => write!(f, "||"),
            Token::Background => write!(f, "&"),
            Token::And => write!(f, "&&"),
            Token::Input => write!(f, "<"),
            Token::Output => write!(f, ">"),
            Token::Semicolon => write!(f, ";"),
            Token::Bang => write!(f, "!"),
        }
    }
}

const OPERATORS: &[char] = &['|', '&', '<', '>', ';', '!'];

/// Splits a command line into words and operators.
pub fn tokenize(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if OPERATORS.contains(&c) {
            chars.next();
            let doubled = chars.peek().map(|&(_, n)| n) == Some(c);
            let tok = match (c, doubled) {
                ('|', true) => Token::Or,
                ('|', false) => Token::Pipe,
                ('&', true) => Token::And,
                ('&', false) => Token::Background,
                ('<', _) => Token::Input,
                ('>', _) => Token::Output,
                (';', _) => Token::Semicolon,
                _ => Token::Bang,
            };
            if matches!(tok, Token::Or | Token::And) {
                chars.next();
            }
            tokens.push(tok);
            continue;
        }
        let mut end = line.len();
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() || OPERATORS.contains(&c) {
                end = i;
                break;
            }
            chars.next();
        }
        tokens.push(Token::Word(line[start..end].to_string()));
    }
    tokens
}
