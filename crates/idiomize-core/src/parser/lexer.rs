//! Tokenizer for the Rust subset, built with nom
//!
//! ```ebnf
//! tokens   = { trivia, token }, trivia;
//! trivia   = { whitespace | "//" line | "/*" text "*/" };
//! token    = byte_str | byte | string | char | lifetime | number | ident | punct;
//! number   = ( "0x" hex | "0o" oct | "0b" bin | dec [ "." dec ] [ exp ] ) [ suffix ];
//! suffix   = ( "i" | "u" ) ( "8" | "16" | "32" | "64" | "128" | "size" ) | "f32" | "f64";
//! ```
//!
//! `<<` and `>>` are never produced; the parser joins two adjacent `<` or `>`
//! tokens so that nested generic arguments close cleanly.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1, take_while_m_n},
    character::complete::{alpha1, alphanumeric1, anychar, char, digit1, multispace1, none_of},
    combinator::{map, map_res, not, opt, peek, recognize, value},
    multi::{many0, many0_count},
    sequence::{delimited, pair, preceded, terminated, tuple},
};

use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Lifetime(String),
    Int { value: u128, suffix: Option<String> },
    Float(String),
    Char(char),
    Byte(u8),
    Str(String),
    ByteStr(Vec<u8>),
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offsets into the source
    pub start: usize,
    pub end: usize,
}

type LexResult<'a, T> = IResult<&'a str, T>;

fn line_comment(input: &str) -> LexResult<'_, ()> {
    value((), pair(tag("//"), take_while(|c: char| c != '\n')))(input)
}

fn block_comment(input: &str) -> LexResult<'_, ()> {
    value((), tuple((tag("/*"), take_until("*/"), tag("*/"))))(input)
}

fn trivia(input: &str) -> LexResult<'_, ()> {
    value(
        (),
        many0_count(alt((value((), multispace1), line_comment, block_comment))),
    )(input)
}

fn ident(input: &str) -> LexResult<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn digits(input: &str) -> LexResult<'_, &str> {
    recognize(pair(digit1, take_while(|c: char| c.is_ascii_digit() || c == '_')))(input)
}

fn int_suffix(input: &str) -> LexResult<'_, &str> {
    recognize(pair(
        alt((char('i'), char('u'))),
        alt((tag("size"), tag("128"), tag("16"), tag("32"), tag("64"), tag("8"))),
    ))(input)
}

fn float_suffix(input: &str) -> LexResult<'_, &str> {
    alt((tag("f32"), tag("f64")))(input)
}

fn parse_radix(text: &str, radix: u32) -> Result<u128, std::num::ParseIntError> {
    u128::from_str_radix(&text.replace('_', ""), radix)
}

fn radix_int(input: &str) -> LexResult<'_, TokenKind> {
    let prefixed = |prefix: &'static str, radix: u32| {
        map_res(
            preceded(
                tag(prefix),
                take_while1(move |c: char| c == '_' || c.is_digit(radix)),
            ),
            move |text: &str| parse_radix(text, radix),
        )
    };
    let (input, value) = alt((prefixed("0x", 16), prefixed("0o", 8), prefixed("0b", 2)))(input)?;
    let (input, suffix) = opt(int_suffix)(input)?;
    Ok((
        input,
        TokenKind::Int {
            value,
            suffix: suffix.map(str::to_string),
        },
    ))
}

fn exponent(input: &str) -> LexResult<'_, &str> {
    recognize(tuple((
        alt((char('e'), char('E'))),
        opt(alt((char('+'), char('-')))),
        digits,
    )))(input)
}

fn float(input: &str) -> LexResult<'_, TokenKind> {
    let with_fraction = recognize(tuple((
        digits,
        char('.'),
        digits,
        opt(exponent),
        opt(float_suffix),
    )));
    let with_exponent = recognize(tuple((digits, exponent, opt(float_suffix))));
    let with_suffix = recognize(pair(digits, float_suffix));
    map(alt((with_fraction, with_exponent, with_suffix)), |text: &str| {
        TokenKind::Float(text.to_string())
    })(input)
}

fn dec_int(input: &str) -> LexResult<'_, TokenKind> {
    let (input, value) = map_res(digits, |text: &str| parse_radix(text, 10))(input)?;
    let (input, suffix) = opt(int_suffix)(input)?;
    // `1.foo()` and `1..2` stay integers; `1.` alone is not supported
    Ok((
        input,
        TokenKind::Int {
            value,
            suffix: suffix.map(str::to_string),
        },
    ))
}

fn number(input: &str) -> LexResult<'_, TokenKind> {
    alt((radix_int, float, dec_int))(input)
}

fn hex_escape(input: &str) -> LexResult<'_, u32> {
    map_res(
        preceded(char('x'), take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit())),
        |text: &str| u32::from_str_radix(text, 16),
    )(input)
}

fn unicode_escape(input: &str) -> LexResult<'_, u32> {
    map_res(
        preceded(
            char('u'),
            delimited(char('{'), take_while1(|c: char| c.is_ascii_hexdigit()), char('}')),
        ),
        |text: &str| u32::from_str_radix(text, 16),
    )(input)
}

/// One possibly escaped character, as a code point.
fn escaped(input: &str) -> LexResult<'_, u32> {
    preceded(
        char('\\'),
        alt((
            value('\n' as u32, char('n')),
            value('\r' as u32, char('r')),
            value('\t' as u32, char('t')),
            value('\\' as u32, char('\\')),
            value(0, char('0')),
            value('\'' as u32, char('\'')),
            value('"' as u32, char('"')),
            hex_escape,
            unicode_escape,
        )),
    )(input)
}

fn quoted_char(input: &str) -> LexResult<'_, u32> {
    alt((escaped, map(none_of("\\\""), |c| c as u32)))(input)
}

/// Line continuation: backslash, newline and the indentation after it.
fn continuation(input: &str) -> LexResult<'_, ()> {
    value((), tuple((char('\\'), char('\n'), take_while(char::is_whitespace))))(input)
}

fn string_body(input: &str) -> LexResult<'_, Vec<u32>> {
    delimited(
        char('"'),
        map(
            many0(alt((map(continuation, |_| None), map(quoted_char, Some)))),
            |chars| chars.into_iter().flatten().collect(),
        ),
        char('"'),
    )(input)
}

fn string(input: &str) -> LexResult<'_, TokenKind> {
    map_res(string_body, |chars| {
        chars
            .into_iter()
            .map(char::from_u32)
            .collect::<Option<String>>()
            .map(TokenKind::Str)
            .ok_or("invalid character in string literal")
    })(input)
}

fn byte_string(input: &str) -> LexResult<'_, TokenKind> {
    map_res(preceded(char('b'), string_body), |chars| {
        chars
            .into_iter()
            .map(|c| u8::try_from(c).ok())
            .collect::<Option<Vec<u8>>>()
            .map(TokenKind::ByteStr)
            .ok_or("non-byte character in byte string literal")
    })(input)
}

fn char_body(input: &str) -> LexResult<'_, u32> {
    delimited(
        char('\''),
        alt((escaped, map(none_of("\\'"), |c| c as u32))),
        char('\''),
    )(input)
}

fn char_lit(input: &str) -> LexResult<'_, TokenKind> {
    map_res(char_body, |c| {
        char::from_u32(c)
            .map(TokenKind::Char)
            .ok_or("invalid character literal")
    })(input)
}

fn byte_lit(input: &str) -> LexResult<'_, TokenKind> {
    map_res(preceded(char('b'), char_body), |c| {
        u8::try_from(c).map(TokenKind::Byte)
    })(input)
}

fn lifetime(input: &str) -> LexResult<'_, TokenKind> {
    map(
        terminated(preceded(char('\''), ident), not(peek(char('\'')))),
        |name: &str| TokenKind::Lifetime(name.to_string()),
    )(input)
}

fn punct(input: &str) -> LexResult<'_, TokenKind> {
    let long = alt((
        value("<<=", tag("<<=")),
        value(">>=", tag(">>=")),
        value("...", tag("...")),
        value("..", tag("..")),
        value("::", tag("::")),
        value("->", tag("->")),
        value("=>", tag("=>")),
        value("==", tag("==")),
        value("!=", tag("!=")),
        value("<=", tag("<=")),
        value(">=", tag(">=")),
        value("&&", tag("&&")),
        value("||", tag("||")),
        value("+=", tag("+=")),
        value("-=", tag("-=")),
        value("*=", tag("*=")),
        value("/=", tag("/=")),
        value("%=", tag("%=")),
        value("^=", tag("^=")),
        value("&=", tag("&=")),
        value("|=", tag("|=")),
    ));
    let short = alt((
        value("+", char('+')),
        value("-", char('-')),
        value("*", char('*')),
        value("/", char('/')),
        value("%", char('%')),
        value("^", char('^')),
        value("!", char('!')),
        value("&", char('&')),
        value("|", char('|')),
        value("=", char('=')),
        value("<", char('<')),
        value(">", char('>')),
        value(".", char('.')),
        value(",", char(',')),
        value(";", char(';')),
        value(":", char(':')),
        value("#", char('#')),
        value("?", char('?')),
        value("$", char('$')),
        value("@", char('@')),
    ));
    let delim = alt((
        value("(", char('(')),
        value(")", char(')')),
        value("[", char('[')),
        value("]", char(']')),
        value("{", char('{')),
        value("}", char('}')),
    ));
    map(alt((long, short, delim)), TokenKind::Punct)(input)
}

fn token(input: &str) -> LexResult<'_, TokenKind> {
    alt((
        byte_string,
        byte_lit,
        string,
        char_lit,
        lifetime,
        number,
        map(ident, |name: &str| TokenKind::Ident(name.to_string())),
        punct,
    ))(input)
}

/// Splits `src` into tokens with byte spans.
pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let offset = |rest: &str| src.len() - rest.len();
    let mut tokens = Vec::new();
    let mut rest = src;
    loop {
        let (after_trivia, ()) = trivia(rest)
            .map_err(|_| ParseError::new(offset(rest), "unterminated comment"))?;
        rest = after_trivia;
        if rest.is_empty() {
            break;
        }
        let start = offset(rest);
        let (after, kind) = token(rest).map_err(|_| {
            let found = anychar::<&str, nom::error::Error<&str>>(rest)
                .map(|(_, c)| c)
                .unwrap_or(' ');
            ParseError::new(start, format!("unexpected character `{found}`"))
        })?;
        rest = after;
        tokens.push(Token {
            kind,
            start,
            end: offset(rest),
        });
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_numbers_and_suffixes() {
        assert_eq!(
            kinds("0x1F 10u8 1_000 2.5 1e3 3f32"),
            vec![
                TokenKind::Int { value: 31, suffix: None },
                TokenKind::Int { value: 10, suffix: Some("u8".to_string()) },
                TokenKind::Int { value: 1000, suffix: None },
                TokenKind::Float("2.5".to_string()),
                TokenKind::Float("1e3".to_string()),
                TokenKind::Float("3f32".to_string()),
            ]
        );
    }

    #[test]
    fn test_strings_and_bytes() {
        assert_eq!(
            kinds(r#"b"hi\0" "a\"b" b'x' '\n' 'a"#),
            vec![
                TokenKind::ByteStr(b"hi\0".to_vec()),
                TokenKind::Str("a\"b".to_string()),
                TokenKind::Byte(b'x'),
                TokenKind::Char('\n'),
                TokenKind::Lifetime("a".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_and_punctuation() {
        assert_eq!(
            kinds("a /* c */ :: b // tail\n -> x >>= 1"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Punct("::"),
                TokenKind::Ident("b".to_string()),
                TokenKind::Punct("->"),
                TokenKind::Ident("x".to_string()),
                TokenKind::Punct(">>="),
                TokenKind::Int { value: 1, suffix: None },
            ]
        );
    }

    #[test]
    fn test_shift_is_two_tokens() {
        let tokens = tokenize("a << b").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Punct("<"));
        assert_eq!(tokens[2].kind, TokenKind::Punct("<"));
        assert_eq!(tokens[1].end, tokens[2].start);
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a ` b").unwrap_err();
        assert_eq!(err.offset, 2);
    }
}
