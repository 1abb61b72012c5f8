// https://matklad.github.io/2020/04/13/simple-but-powerful-pratt-parsing.html
// is a very helpful guide to writing a Pratt parser in Rust.

use crate::{
    scanner::{Token, TokenType},
    vm::{Chunk, Heap, Instruction, Value},
};

// Parser takes a source of tokens, and spits out a chunk.
// It writes to stderr on errors. The public API for Parser is the compile() function.
#[derive(Debug)]
struct Parser<'a, 'h, T> {
    tokens: T,
    chunk: Chunk,
    heap: &'h mut Heap,
    previous_token: Token<'a>,
    current_token: Token<'a>,
    had_error: bool,
    in_panic_mode: bool,
    // how many diagnostics actually reached stderr; panic mode caps this at one.
    // only inspected by tests
    #[allow(dead_code)]
    errors_reported: usize,
}

mod precedence {
    // A comparable enum, thus we derive Ord. The C-style approach would be an
    // array indexed by token kind, but that's really just a match statement.
    // Only the minimal ladder exists: nothing climbs past Assignment until
    // infix rules appear.
    #[allow(dead_code)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Precedence {
        Bottom,
        Assignment,
        Call,
        Primary,
        Top,
    }
    use Precedence::*;

    impl Precedence {
        #[allow(dead_code)]
        pub fn next(&self) -> Precedence {
            match self {
                Bottom => Assignment,
                Assignment => Call,
                Call => Primary,
                Primary => Top,
                Top => Top,
            }
        }
    }

    pub const fn bottom_precedence() -> Precedence {
        Precedence::Bottom
    }

    use crate::scanner::TokenType;

    // No token kind has an infix rule yet. The VM's arithmetic opcodes are
    // reachable only from hand-assembled chunks; wiring operators into this
    // table is the obvious next step, but which tokens spell them is not
    // settled, so nothing is guessed at here.
    pub fn infix_precedence(_typ: &TokenType) -> Option<Precedence> {
        None
    }
}

use precedence::*;

impl<'a, 'h, T> Parser<'a, 'h, T>
where
    T: Iterator<Item = Token<'a>>,
{
    fn compile(&mut self) -> bool {
        self.expression();
        if self.current_token.typ != TokenType::Eof {
            self.error_at_current("expected end of input.");
        }

        self.end_compile();
        self.had_error
    }

    // Shift current into previous and pull the next token, reporting (and
    // skipping) any error tokens the scanner produced along the way. Once the
    // scanner is exhausted the parser stays parked on Eof.
    fn advance(&mut self) {
        let next = loop {
            match self.tokens.next() {
                None => break self.current_token.clone(),
                Some(next) => {
                    if let TokenType::Error = next.typ {
                        let message = next.raw.clone().into_owned();
                        self.error_at(&next, &message);
                    } else {
                        break next;
                    }
                }
            }
        };
        self.previous_token = std::mem::replace(&mut self.current_token, next);
    }

    fn consume(&mut self, expected_type: TokenType, message_if_missing: &str) {
        if self.current_token.typ == expected_type {
            self.advance();
        } else {
            self.error_at_current(message_if_missing);
        }
    }

    fn expression(&mut self) {
        self.expression_with_min_prec(bottom_precedence());
    }

    // The contract of this function is to consume an expression and emit bytecode
    // to the chunk such that the bytecode is a stack-ified version of the
    // expression. The token that starts the expression must have prefix behavior:
    // a literal, or an open bracket of any family.
    fn expression_with_min_prec(&mut self, min_precedence: Precedence) {
        self.advance();
        match self.previous_token.typ {
            TokenType::Number => self.number(),
            TokenType::String => self.string(),
            TokenType::Null => self.write_instruction(Instruction::Null),
            TokenType::True => self.write_instruction(Instruction::True),
            TokenType::False => self.write_instruction(Instruction::False),
            // every bracket family opens a group; only the required closer differs
            TokenType::LeftParen => self.grouping(TokenType::RightParen, ')'),
            TokenType::LeftSquare => self.grouping(TokenType::RightSquare, ']'),
            TokenType::LeftCurly => self.grouping(TokenType::RightCurly, '}'),
            TokenType::LeftAngle => self.grouping(TokenType::RightAngle, '>'),
            _ => {
                self.error_at_previous("expected expression.");
                return;
            }
        }

        // The infix half of the climb. infix_precedence has no entries, so this
        // loop never fires; it is the seam where operator parsing slots in.
        loop {
            let prec = match infix_precedence(&self.current_token.typ) {
                Some(prec) => prec,
                None => break,
            };
            if prec < min_precedence {
                break;
            }
            self.advance();
            self.error_at_previous("unexpected token in infix operator position.");
            break;
        }
    }

    // Prefix handler for number literals: parse the lexeme and emit a pool load.
    fn number(&mut self) {
        let value: f64 = self
            .previous_token
            .raw
            .parse()
            .expect("numeric lexemes are digit runs");
        self.emit_literal(Value::Number(value));
    }

    // Prefix handler for string literals: copy the lexeme interior into a fresh
    // heap string and emit a pool load for it.
    fn string(&mut self) {
        let raw = &self.previous_token.raw;
        let contents = &raw[1..raw.len() - 1]; // strip the enclosing quotes
        let value = Value::Elem(self.heap.new_string_with_value(contents));
        self.emit_literal(value);
    }

    // Prefix handler shared by all bracket families: parse a full sub-expression
    // at the lowest precedence, then require the family's closing delimiter.
    fn grouping(&mut self, closing: TokenType, closing_char: char) {
        self.expression();
        self.consume(
            closing,
            &format!("expected '{}' after expression.", closing_char),
        );
    }

    fn emit_literal(&mut self, value: Value) {
        let idx = match self.chunk.add_literal(value) {
            Ok(idx) => idx,
            Err(_) => {
                self.error_at_previous("too many literals in one chunk.");
                // degrade to slot zero and keep compiling
                0
            }
        };
        self.write_instruction(Instruction::Literal(idx));
    }

    fn write_instruction(&mut self, instruction: Instruction) {
        self.chunk
            .write_instruction(instruction, self.previous_token.line)
    }

    fn end_compile(&mut self) {
        self.write_instruction(Instruction::Return);
    }

    fn error_at_current(&mut self, message: &str) {
        // This clone is a bit ugly, it could be avoided by copying the assignment
        // to had_error into all the erroring fns so that the printing to stderr
        // could be &self instead of &mut self
        let current_token = self.current_token.clone();
        self.error_at(&current_token, message);
    }

    fn error_at_previous(&mut self, message: &str) {
        let previous_token = self.previous_token.clone();
        self.error_at(&previous_token, message);
    }

    // Panic mode: the first error prints and sets the sticky flag; everything
    // after it is swallowed (had_error stays true). There is no
    // resynchronization point that clears the flag.
    fn error_at(&mut self, token: &Token<'a>, message: &str) {
        if self.in_panic_mode {
            return;
        } else {
            self.in_panic_mode = true;
        }
        eprint!("[line {}] error", token.line);
        match token.typ {
            TokenType::Eof => eprint!(" at end"),
            TokenType::Error => {}
            _ => eprint!(" at '{}'", token.raw),
        };
        eprintln!(": {}", message);
        self.had_error = true;
        self.errors_reported += 1;
    }
}

/// Take a source of tokens, attempt to compile it (writing errors to stderr),
/// and if compilation succeeds, return the chunk. String literals are allocated
/// into the given heap, which must outlive any run of the returned chunk.
pub fn compile<'a, T>(tokens: T, heap: &mut Heap) -> Option<Chunk>
where
    T: Iterator<Item = Token<'a>>,
{
    // Both token slots start as placeholders; the priming advance() pulls the
    // real first token, reporting it if the scanner flagged it as an error.
    let placeholder = Token {
        typ: TokenType::Eof,
        raw: "".into(),
        line: 1,
    };
    let mut parser = Parser {
        tokens,
        chunk: Chunk::new(),
        heap,
        previous_token: placeholder.clone(),
        current_token: placeholder,
        had_error: false,
        in_panic_mode: false,
        errors_reported: 0,
    };
    parser.advance();
    if !parser.compile() {
        Some(parser.chunk)
    } else {
        None
    }
}
