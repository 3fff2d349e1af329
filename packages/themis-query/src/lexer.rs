//! AQL lexer (spec §4.9): tokenizes query text into a flat stream the
//! recursive-descent parser consumes. Built on `logos`, the same role
//! `tick_phases`/`api_request` play in the teacher's runtime crate of
//! turning raw input into a typed stream before anything touches state.

use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[token("FOR", ignore(ascii_case))]
    For,
    #[token("IN", ignore(ascii_case))]
    In,
    #[token("FILTER", ignore(ascii_case))]
    Filter,
    #[token("SORT", ignore(ascii_case))]
    Sort,
    #[token("ASC", ignore(ascii_case))]
    Asc,
    #[token("DESC", ignore(ascii_case))]
    Desc,
    #[token("LIMIT", ignore(ascii_case))]
    Limit,
    #[token("LET", ignore(ascii_case))]
    Let,
    #[token("RETURN", ignore(ascii_case))]
    Return,
    #[token("COLLECT", ignore(ascii_case))]
    Collect,
    #[token("INTO", ignore(ascii_case))]
    Into,
    #[token("AGGREGATE", ignore(ascii_case))]
    Aggregate,
    #[token("WITH", ignore(ascii_case))]
    With,
    #[token("AS", ignore(ascii_case))]
    As,
    #[token("ANY", ignore(ascii_case))]
    Any,
    #[token("ALL", ignore(ascii_case))]
    All,
    #[token("SATISFIES", ignore(ascii_case))]
    Satisfies,
    #[token("OUTBOUND", ignore(ascii_case))]
    Outbound,
    #[token("INBOUND", ignore(ascii_case))]
    Inbound,
    #[token("SHORTEST_PATH", ignore(ascii_case))]
    ShortestPath,
    #[token("TO", ignore(ascii_case))]
    To,
    #[token("AND", ignore(ascii_case))]
    And,
    #[token("OR", ignore(ascii_case))]
    Or,
    #[token("NOT", ignore(ascii_case))]
    Not,
    #[token("NULL", ignore(ascii_case))]
    NullLit,
    #[token("TRUE", ignore(ascii_case))]
    TrueLit,
    #[token("FALSE", ignore(ascii_case))]
    FalseLit,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token("..")]
    DotDot,

    #[token("==")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
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

    #[regex(r"@[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice()[1..].to_string())]
    BindVar(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unquote(lex.slice()))]
    #[regex(r"'([^'\\]|\\.)*'", |lex| unquote(lex.slice()))]
    StringLit(String),

    #[regex(r"-?[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    FloatLit(f64),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    IntLit(i64),
}

fn unquote(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// A token with the source line/column it started at, so parse errors can
/// report a precise location (spec §4.9 "ParseError with line/column").
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
    pub column: u32,
}

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, (u32, u32)> {
    let mut lexer = Token::lexer(src);
    let mut out = Vec::new();
    let mut line = 1u32;
    let mut line_start = 0usize;
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => {
                let column = (span.start - line_start) as u32 + 1;
                out.push(Spanned { token, line, column });
            }
            Err(_) => {
                let column = (span.start - line_start) as u32 + 1;
                return Err((line, column));
            }
        }
        for (i, ch) in src[span.clone()].char_indices() {
            if ch == '\n' {
                line += 1;
                line_start = span.start + i + 1;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_simple_for_filter_return() {
        let tokens = tokenize(r#"FOR u IN users FILTER u.city == "Berlin" RETURN u"#).unwrap();
        assert!(matches!(tokens[0].token, Token::For));
        assert!(matches!(tokens[1].token, Token::Ident(ref s) if s == "u"));
        assert!(matches!(tokens[5].token, Token::Eq));
        assert!(matches!(tokens[6].token, Token::StringLit(ref s) if s == "Berlin"));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let tokens = tokenize("for x in y return x").unwrap();
        assert!(matches!(tokens[0].token, Token::For));
        assert!(matches!(tokens[2].token, Token::In));
    }

    #[test]
    fn bind_vars_and_numbers_are_recognized() {
        let tokens = tokenize("FILTER x == @threshold + 1.5").unwrap();
        assert!(tokens.iter().any(|t| matches!(&t.token, Token::BindVar(s) if s == "threshold")));
        assert!(tokens.iter().any(|t| matches!(t.token, Token::FloatLit(v) if (v - 1.5).abs() < 1e-9)));
    }

    #[test]
    fn unterminated_token_reports_a_position() {
        let err = tokenize("FILTER x == #bad").unwrap_err();
        assert_eq!(err.0, 1);
    }
}
