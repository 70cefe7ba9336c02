use logos::Logos;
use std::fmt;

#[derive(Logos, Debug, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r\n]+")] // Whitespace
#[logos(skip r"//[^\n]*")] // Line comments
pub enum Token {
    // --- Keywords ---
    #[token("boolean")]
    Boolean,
    #[token("else")]
    Else,
    #[token("false")]
    False,
    #[token("if")]
    If,
    #[token("int")]
    Int,
    #[token("return")]
    Return,
    #[token("true")]
    True,
    #[token("void")]
    Void,
    #[token("while")]
    While,

    // --- Identifiers and literals ---
    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse().ok())]
    Number(i32),

    // --- Operators ---
    #[token("&&")]
    LAnd,
    #[token("||")]
    LOr,
    #[token("!")]
    LNot,
    #[token("==")]
    Eq,
    #[token("!=")]
    Neq,
    #[token(">=")]
    Ge,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token("<")]
    Lt,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    // --- Punctuation ---
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Boolean => write!(f, "boolean"),
            Token::Else => write!(f, "else"),
            Token::False => write!(f, "false"),
            Token::If => write!(f, "if"),
            Token::Int => write!(f, "int"),
            Token::Return => write!(f, "return"),
            Token::True => write!(f, "true"),
            Token::Void => write!(f, "void"),
            Token::While => write!(f, "while"),
            Token::Ident(s) => write!(f, "'{}'", s),
            Token::Number(n) => write!(f, "{}", n),
            Token::LAnd => write!(f, "&&"),
            Token::LOr => write!(f, "||"),
            Token::LNot => write!(f, "!"),
            Token::Eq => write!(f, "=="),
            Token::Neq => write!(f, "!="),
            Token::Ge => write!(f, ">="),
            Token::Gt => write!(f, ">"),
            Token::Le => write!(f, "<="),
            Token::Lt => write!(f, "<"),
            Token::Assign => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
        }
    }
}

/// A lexical error: the offending character and where it occurs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexicalError {
    pub line: usize,
    pub column: usize,
    pub unexpected_char: char,
    pub context: String,
}

impl fmt::Display for LexicalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unexpected character '{}' at line {}, column {}\n  context: {}",
            self.unexpected_char, self.line, self.column, self.context
        )
    }
}

impl std::error::Error for LexicalError {}

/// Convert a byte position to line and column numbers (1-based).
pub fn position_to_line_col(source: &str, position: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in source.char_indices() {
        if i >= position {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// The source line containing an error position, trimmed.
fn error_context(source: &str, position: usize) -> String {
    let line_start = source[..position].rfind('\n').map(|p| p + 1).unwrap_or(0);
    let line_end = source[position..]
        .find('\n')
        .map(|p| position + p)
        .unwrap_or(source.len());
    source[line_start..line_end].trim().to_string()
}

/// A token together with the source line it starts on.
#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub line: usize,
}

/// Tokenizes a whole source file up front, failing on the first bad character.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, LexicalError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let (line, column) = position_to_line_col(source, span.start);
        match result {
            Ok(token) => tokens.push(SpannedToken { token, line }),
            Err(_) => {
                return Err(LexicalError {
                    line,
                    column,
                    unexpected_char: source[span.start..].chars().next().unwrap_or('\0'),
                    context: error_context(source, span.start),
                })
            }
        }
    }
    Ok(tokens)
}
