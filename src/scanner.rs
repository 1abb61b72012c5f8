use std::borrow::Cow;
use std::iter::FusedIterator;

/// Scanner takes in an input and spits out tokens.
#[derive(Debug)]
pub struct Scanner<'a> {
    input: &'a str,
    // rather than keeping two pointers to distinguish 'start' from 'current' like the C
    // version, we just track the number of bytes into the input that we've used up
    // while scanning the next token.
    // that is:
    // - my scanned_input_len is the C version's (current - start)
    // - my self.unscanned_input() is the C version's current (both are &str)
    // - my self.reset_scanned_input() is the C version's `start = current`
    scanned_input_len: usize,
    current_line: usize,
    ended: bool,
}

/// The full token vocabulary. Several kinds (`Id`, `QId`, `Bool`, `QBool`, `If`,
/// `SelfKw`, ...) are recognized or declared but have no parse rule yet; the
/// quantum kinds in particular are reserved slots for the quantum lane.
#[allow(dead_code, missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    // Bracket families. All four open brackets route to the same grouping
    // behavior in the compiler; only the required closer differs.
    LeftParen,
    RightParen,
    LeftSquare,
    RightSquare,
    LeftCurly,
    RightCurly,
    LeftAngle,
    RightAngle,
    // Other single-character tokens.
    Dot,
    Colon,
    Assign,
    // Literals.
    Id,
    QId,
    String,
    Bool,
    Number,
    QBool,
    QNumber,
    // Keywords.
    Fn,
    Type,
    Main,
    If,
    SelfKw,
    True,
    False,
    QTrue,
    QFalse,
    Null,

    Error,
    Eof,
}

/// Token is a single token, including a ref to the raw characters that constitute it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub(crate) typ: TokenType,
    // The Cow is to handle Error tokens, which carry a message instead of a
    // slice of the input.
    pub(crate) raw: Cow<'a, str>,
    pub(crate) line: usize,
}

impl<'a> Scanner<'a> {
    /// Returns a fresh Scanner, ready to spit out tokens from the given source
    pub fn new<'b>(source: &'b str) -> Scanner<'b>
    where
        'b: 'a,
    {
        Scanner {
            input: source,
            current_line: 1,
            ended: false,
            scanned_input_len: 0,
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<'a> Scanner<'a> {
    /// Returns the next token from the input, advancing the scanner.
    /// Errors are represented in-band as TokenType::Error.
    /// The scanner will return one Eof token, then None afterwards.
    pub fn next_token(&mut self) -> Option<Token<'a>> {
        self.skip_whitespace();
        let next_char = match self.take_next_char() {
            None if self.ended => return None,
            None => {
                self.ended = true;
                return Some(Token {
                    typ: TokenType::Eof,
                    raw: Cow::Borrowed(self.input),
                    line: self.current_line,
                });
            }
            Some(c) => c,
        };
        let token = match next_char {
            '(' => self.make_token(TokenType::LeftParen),
            ')' => self.make_token(TokenType::RightParen),
            '[' => self.make_token(TokenType::LeftSquare),
            ']' => self.make_token(TokenType::RightSquare),
            '{' => self.make_token(TokenType::LeftCurly),
            '}' => self.make_token(TokenType::RightCurly),
            '<' => self.make_token(TokenType::LeftAngle),
            '>' => self.make_token(TokenType::RightAngle),
            '.' => self.make_token(TokenType::Dot),
            ':' => self.make_token(TokenType::Colon),
            '=' => self.make_token(TokenType::Assign),
            '"' => self.scan_string_literal(),
            '0'..='9' => self.scan_numeric_literal(),
            '@' => match self.peek_next_char() {
                Some(c) if is_identifier_start(c) => self.scan_quantum_identifier(),
                Some('0'..='9') => self.scan_quantum_numeric_literal(),
                _ => self.err_token("unexpected character '@'.".to_string()),
            },
            c if is_identifier_start(c) => self.scan_identifier_or_keyword(),
            c => self.err_token(format!("unexpected character '{}'.", c)),
        };
        self.reset_scanned_input();
        Some(token)
    }

    fn unscanned_input(&self) -> &'a str {
        if self.scanned_input_len < self.input.len() {
            &self.input[self.scanned_input_len..]
        } else {
            ""
        }
    }

    fn peek_next_char(&mut self) -> Option<char> {
        self.unscanned_input().chars().next()
    }

    fn peek_next_next_char(&mut self) -> Option<char> {
        self.unscanned_input().chars().nth(1)
    }

    fn take_next_char(&mut self) -> Option<char> {
        let next_char = self.peek_next_char()?;
        self.scanned_input_len += next_char.len_utf8();
        Some(next_char)
    }

    // The language treats commas and semicolons as separators with no grammar
    // of their own, so they are skipped along with whitespace and comments.
    fn skip_whitespace(&mut self) {
        loop {
            match self.peek_next_char() {
                Some('\n') => {
                    self.current_line += 1;
                    self.take_next_char();
                }
                Some(',') | Some(';') => {
                    self.take_next_char();
                }
                Some(c) if c.is_whitespace() => {
                    // only \n is recognized as newline, no other chars
                    self.take_next_char();
                }
                Some('/') if self.peek_next_next_char() == Some('/') => {
                    // skip to the end of the line, leaving the \n alone, then
                    // continue the outer whitespace skipping
                    while !matches!(self.peek_next_char(), Some('\n') | None) {
                        self.take_next_char();
                    }
                }
                _ => break,
            }
        }
        self.reset_scanned_input();
    }

    // Makes a token of the given type from the scanned portion of input (as determined
    // by scanned_input_len) and the current line.
    // Does NOT reset scanned input, caller of this probably also wants to call that.
    fn make_token(&mut self, typ: TokenType) -> Token<'a> {
        Token {
            typ,
            line: self.current_line,
            raw: Cow::Borrowed(&self.input[0..self.scanned_input_len]),
        }
    }

    // Makes an error token with the given message on the current line.
    fn err_token(&self, message: String) -> Token<'a> {
        Token {
            typ: TokenType::Error,
            raw: Cow::Owned(message),
            line: self.current_line,
        }
    }

    // Equivalent of the C version's `start = current;`, in other words, mark the scanned
    // portion of input as done by removing it from input.
    fn reset_scanned_input(&mut self) {
        self.input = self.unscanned_input();
        self.scanned_input_len = 0;
    }

    // Assumes we have just scanned the initial double-quote.
    // There are no escape sequences, in particular double-quote cannot appear in string
    // literals. The token's raw chars are the chars of the literal including both quotes.
    fn scan_string_literal(&mut self) -> Token<'a> {
        loop {
            match self.peek_next_char() {
                Some('"') => {
                    self.take_next_char();
                    return self.make_token(TokenType::String);
                }
                Some(c) => {
                    if c == '\n' {
                        self.current_line += 1
                    }
                    self.take_next_char();
                }
                None => {
                    // Ran out of input without finding end-quote
                    return self.err_token("unterminated string.".to_string());
                }
            }
        }
    }

    // '1.' is not a valid literal; '1.x' scans as three tokens: one, dot, 'x'.
    // That is, the dot is only brought into the numeric literal token if it's
    // followed by a digit.
    fn scan_numeric_literal(&mut self) -> Token<'a> {
        self.scan_number_tail();
        self.make_token(TokenType::Number)
    }

    fn scan_number_tail(&mut self) {
        while let Some('0'..='9') = self.peek_next_char() {
            self.take_next_char();
        }
        if self.peek_next_char() == Some('.')
            && matches!(self.peek_next_next_char(), Some('0'..='9'))
        {
            self.take_next_char(); // decimal
            while let Some('0'..='9') = self.peek_next_char() {
                self.take_next_char();
            }
        }
    }

    // Assumes the '@' sigil was consumed and a digit follows. Same shape as a
    // classical number, tokenized as QNumber; nothing downstream parses it yet.
    fn scan_quantum_numeric_literal(&mut self) -> Token<'a> {
        self.scan_number_tail();
        self.make_token(TokenType::QNumber)
    }

    fn scan_identifier_or_keyword(&mut self) -> Token<'a> {
        while self.peek_next_char().map_or(false, is_identifier_continue) {
            self.take_next_char();
        }
        self.make_token(token_type_from_str(&self.input[0..self.scanned_input_len]))
    }

    // Assumes the '@' sigil was consumed and an identifier char follows. Only the
    // quantum boolean keywords are typed so far; any other quantum identifier is
    // an error token. Asymmetric with scan_quantum_numeric_literal, which happily
    // produces QNumber tokens.
    fn scan_quantum_identifier(&mut self) -> Token<'a> {
        while self.peek_next_char().map_or(false, is_identifier_continue) {
            self.take_next_char();
        }
        match token_type_from_str(&self.input[1..self.scanned_input_len]) {
            TokenType::True => self.make_token(TokenType::QTrue),
            TokenType::False => self.make_token(TokenType::QFalse),
            _ => self.err_token("unrecognized quantum identifier.".to_string()),
        }
    }
}

// assumes text is not empty
fn token_type_from_str(token_text: &str) -> TokenType {
    let mut chars = token_text.chars();
    match chars.next().unwrap() {
        'm' => keyword_if_equal(&token_text[1..], "ain", TokenType::Main),
        'n' => keyword_if_equal(&token_text[1..], "ull", TokenType::Null),
        'i' => keyword_if_equal(&token_text[1..], "f", TokenType::If),
        's' => keyword_if_equal(&token_text[1..], "elf", TokenType::SelfKw),
        'f' => match chars.next() {
            Some('n') if token_text.len() == 2 => TokenType::Fn,
            Some('a') => keyword_if_equal(&token_text[2..], "lse", TokenType::False),
            _ => TokenType::Id,
        },
        't' => match chars.next() {
            Some('y') => keyword_if_equal(&token_text[2..], "pe", TokenType::Type),
            Some('r') => keyword_if_equal(&token_text[2..], "ue", TokenType::True),
            _ => TokenType::Id,
        },
        _ => TokenType::Id,
    }
}

fn keyword_if_equal(text: &str, keyword_text: &str, typ: TokenType) -> TokenType {
    if text == keyword_text {
        typ
    } else {
        TokenType::Id
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

impl<'a> FusedIterator for Scanner<'a> {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_happy_path_test() {
        let input = r#"
( // comment
) ( { } [ ] < > : = .
123.1, 12; "hi"
"#;
        let scanner = Scanner::new(input);
        let tokens: Vec<Token<'_>> = scanner.collect();
        let expected_tokens = vec![
            Token {
                typ: TokenType::LeftParen,
                raw: "(".into(),
                line: 2,
            },
            Token {
                typ: TokenType::RightParen,
                raw: ")".into(),
                line: 3,
            },
            Token {
                typ: TokenType::LeftParen,
                raw: "(".into(),
                line: 3,
            },
            Token {
                typ: TokenType::LeftCurly,
                raw: "{".into(),
                line: 3,
            },
            Token {
                typ: TokenType::RightCurly,
                raw: "}".into(),
                line: 3,
            },
            Token {
                typ: TokenType::LeftSquare,
                raw: "[".into(),
                line: 3,
            },
            Token {
                typ: TokenType::RightSquare,
                raw: "]".into(),
                line: 3,
            },
            Token {
                typ: TokenType::LeftAngle,
                raw: "<".into(),
                line: 3,
            },
            Token {
                typ: TokenType::RightAngle,
                raw: ">".into(),
                line: 3,
            },
            Token {
                typ: TokenType::Colon,
                raw: ":".into(),
                line: 3,
            },
            Token {
                typ: TokenType::Assign,
                raw: "=".into(),
                line: 3,
            },
            Token {
                typ: TokenType::Dot,
                raw: ".".into(),
                line: 3,
            },
            Token {
                typ: TokenType::Number,
                raw: "123.1".into(),
                line: 4,
            },
            Token {
                typ: TokenType::Number,
                raw: "12".into(),
                line: 4,
            },
            Token {
                typ: TokenType::String,
                raw: "\"hi\"".into(),
                line: 4,
            },
            Token {
                typ: TokenType::Eof,
                raw: "".into(),
                line: 5,
            },
        ];
        assert_eq!(tokens.len(), expected_tokens.len());
        for (i, (expected, got)) in tokens.into_iter().zip(expected_tokens).enumerate() {
            assert_eq!(expected, got, "on the token number {}", i);
        }
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let text = "fn type main if self true false null f t ty fnord Null _x x1";
        let expected_tokens: Vec<_> = vec![
            ("fn", TokenType::Fn),
            ("type", TokenType::Type),
            ("main", TokenType::Main),
            ("if", TokenType::If),
            ("self", TokenType::SelfKw),
            ("true", TokenType::True),
            ("false", TokenType::False),
            ("null", TokenType::Null),
            ("f", TokenType::Id),
            ("t", TokenType::Id),
            ("ty", TokenType::Id),
            ("fnord", TokenType::Id),
            ("Null", TokenType::Id),
            ("_x", TokenType::Id),
            ("x1", TokenType::Id),
            ("", TokenType::Eof),
        ]
        .into_iter()
        .map(|(raw, typ)| Token {
            typ,
            raw: raw.into(),
            line: 1,
        })
        .collect();
        let tokens: Vec<_> = Scanner::new(text).collect();
        assert_eq!(tokens.len(), expected_tokens.len());
        for (i, (expected, got)) in expected_tokens.into_iter().zip(tokens).enumerate() {
            assert_eq!(expected, got, "comparing token {}", i);
        }
    }

    #[test]
    fn test_quantum_tokens() {
        let tokens: Vec<_> = Scanner::new("@true @false @12.5 @3").collect();
        let expected: Vec<(TokenType, &str)> = vec![
            (TokenType::QTrue, "@true"),
            (TokenType::QFalse, "@false"),
            (TokenType::QNumber, "@12.5"),
            (TokenType::QNumber, "@3"),
            (TokenType::Eof, ""),
        ];
        assert_eq!(tokens.len(), expected.len());
        for (token, (typ, raw)) in tokens.iter().zip(expected) {
            assert_eq!(token.typ, typ);
            assert_eq!(token.raw, raw);
        }
    }

    #[test]
    fn test_quantum_identifier_gap() {
        // only @true/@false are typed; other quantum identifiers are errors
        let tokens: Vec<_> = Scanner::new("@foo").collect();
        assert_eq!(tokens[0].typ, TokenType::Error);
        assert_eq!(tokens[0].raw, "unrecognized quantum identifier.");

        // a lone sigil is just an unexpected character
        let tokens: Vec<_> = Scanner::new("@ ").collect();
        assert_eq!(tokens[0].typ, TokenType::Error);
        assert_eq!(tokens[0].raw, "unexpected character '@'.");
    }

    #[test]
    fn test_unterminated_string() {
        let tokens: Vec<_> = Scanner::new("\"oops").collect();
        assert_eq!(tokens[0].typ, TokenType::Error);
        assert_eq!(tokens[0].raw, "unterminated string.");
    }

    #[test]
    fn test_multiline_string_counts_lines() {
        let tokens: Vec<_> = Scanner::new("\"a\nb\" 1").collect();
        assert_eq!(tokens[0].typ, TokenType::String);
        assert_eq!(tokens[0].line, 2);
        assert_eq!(tokens[1].typ, TokenType::Number);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn test_number_dot_boundary() {
        let tokens: Vec<_> = Scanner::new("1. 2.5").collect();
        let kinds: Vec<_> = tokens.iter().map(|t| t.typ).collect();
        assert_eq!(
            kinds,
            vec![
                TokenType::Number,
                TokenType::Dot,
                TokenType::Number,
                TokenType::Eof
            ]
        );
        assert_eq!(tokens[0].raw, "1");
        assert_eq!(tokens[2].raw, "2.5");
    }
}
