use std::convert::TryFrom;
use std::fmt::{Display, Write};

use thiserror::Error;

macro_rules! binary_arithmetic {
    ($self:ident, $offset:ident, $op:tt) => {
	{
            let b = $self.stack_pop()?;
            let a = $self.stack_pop()?;
            match (a, b) {
                (Value::Number(a), Value::Number(b)) => {
                    $self.stack_push((a $op b).into())
                }
                _ => Err($self.runtime_error("Operands must be numbers.", $offset)),
            }
	}
    };
}

/// A single instruction, in a parsed/type-safe format.
/// This type is an intermediate representation: the compiler emits these, the chunk
/// stores the serialized bytes, and the VM decodes them back one at a time while
/// executing. The byte encoding is one opcode byte, plus a one-byte literal-pool
/// index for `Literal`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Load a literal by its index into the chunk's literal pool.
    Literal(u8),
    /// Put null on the stack
    Null,
    /// Put true on the stack
    True,
    /// Put false on the stack
    False,
    /// Negate the top value on the stack
    Negate,
    /// If stack is TOP: b, a ..., pop two and push (a+b)
    Add,
    /// If stack is TOP: b, a ..., pop two and push (a-b)
    Sub,
    /// If stack is TOP: b, a ..., pop two and push (a*b)
    Mul,
    /// If stack is TOP: b, a ..., pop two and push (a/b)
    Div,
    /// Pop and print the top value, ending the run
    Return,
    /// Reserved quantum-lane opcode; decodes and disassembles but does not execute
    QTrue,
    /// Reserved quantum-lane opcode; decodes and disassembles but does not execute
    QFalse,
}

impl Instruction {
    const OP_CODE_LITERAL: u8 = 0;
    // 1 is reserved for a wide-index literal load that was never defined
    const OP_CODE_NULL: u8 = 2;
    const OP_CODE_TRUE: u8 = 3;
    const OP_CODE_FALSE: u8 = 4;
    const OP_CODE_NEGATE: u8 = 5;
    const OP_CODE_ADD: u8 = 6;
    const OP_CODE_SUB: u8 = 7;
    const OP_CODE_MUL: u8 = 8;
    const OP_CODE_DIV: u8 = 9;
    const OP_CODE_RETURN: u8 = 10;
    const OP_CODE_QTRUE: u8 = 11;
    const OP_CODE_QFALSE: u8 = 12;

    /// Try to parse an instruction from the beginning of some bytes, returning the
    /// number of bytes that the instruction consists of on success in addition.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Instruction, usize), InternalError> {
        match *bytes.first().ok_or(InternalError::TruncatedInstruction)? {
            Instruction::OP_CODE_LITERAL => {
                let idx = *bytes.get(1).ok_or(InternalError::TruncatedInstruction)?;
                Ok((Instruction::Literal(idx), 2))
            }
            Instruction::OP_CODE_NULL => Ok((Instruction::Null, 1)),
            Instruction::OP_CODE_TRUE => Ok((Instruction::True, 1)),
            Instruction::OP_CODE_FALSE => Ok((Instruction::False, 1)),
            Instruction::OP_CODE_NEGATE => Ok((Instruction::Negate, 1)),
            Instruction::OP_CODE_ADD => Ok((Instruction::Add, 1)),
            Instruction::OP_CODE_SUB => Ok((Instruction::Sub, 1)),
            Instruction::OP_CODE_MUL => Ok((Instruction::Mul, 1)),
            Instruction::OP_CODE_DIV => Ok((Instruction::Div, 1)),
            Instruction::OP_CODE_RETURN => Ok((Instruction::Return, 1)),
            Instruction::OP_CODE_QTRUE => Ok((Instruction::QTrue, 1)),
            Instruction::OP_CODE_QFALSE => Ok((Instruction::QFalse, 1)),
            other => Err(InternalError::UnknownOpcode(other)),
        }
    }

    /// write_to is a way to get an instruction as bytes in a way that, in some cases,
    /// can avoid the extra allocation that would result from an Into<Vec<u8>> impl
    pub fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        match self {
            Self::Literal(u) => writer.write(&[Instruction::OP_CODE_LITERAL, *u]),
            Self::Null => writer.write(&[Instruction::OP_CODE_NULL]),
            Self::True => writer.write(&[Instruction::OP_CODE_TRUE]),
            Self::False => writer.write(&[Instruction::OP_CODE_FALSE]),
            Self::Negate => writer.write(&[Instruction::OP_CODE_NEGATE]),
            Self::Add => writer.write(&[Instruction::OP_CODE_ADD]),
            Self::Sub => writer.write(&[Instruction::OP_CODE_SUB]),
            Self::Mul => writer.write(&[Instruction::OP_CODE_MUL]),
            Self::Div => writer.write(&[Instruction::OP_CODE_DIV]),
            Self::Return => writer.write(&[Instruction::OP_CODE_RETURN]),
            Self::QTrue => writer.write(&[Instruction::OP_CODE_QTRUE]),
            Self::QFalse => writer.write(&[Instruction::OP_CODE_QFALSE]),
        }
    }

    /// Number of bytes in the byte representation of this instruction
    pub fn num_bytes(&self) -> usize {
        match self {
            Instruction::Literal(_) => 2,
            _ => 1,
        }
    }
}

impl From<&Instruction> for Vec<u8> {
    fn from(val: &Instruction) -> Self {
        let mut v = vec![];
        val.write_to(&mut v).expect("writing to a Vec cannot fail");
        v
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Literal(_) => write!(f, "OP_LITERAL"),
            Instruction::Null => write!(f, "OP_NULL"),
            Instruction::True => write!(f, "OP_TRUE"),
            Instruction::False => write!(f, "OP_FALSE"),
            Instruction::Negate => write!(f, "OP_NEGATE"),
            Instruction::Add => write!(f, "OP_ADD"),
            Instruction::Sub => write!(f, "OP_SUB"),
            Instruction::Mul => write!(f, "OP_MUL"),
            Instruction::Div => write!(f, "OP_DIV"),
            Instruction::Return => write!(f, "OP_RETURN"),
            Instruction::QTrue => write!(f, "OP_QTRUE"),
            Instruction::QFalse => write!(f, "OP_QFALSE"),
        }
    }
}

/// A chunk is the unit of execution for the VM: serialized instruction bytes, a
/// per-byte table of originating source lines, and the literal pool those bytes
/// index into. The code and line buffers grow together; they always have the
/// same length.
#[derive(Debug)]
pub struct Chunk {
    code: Vec<u8>,
    lines: Vec<usize>,
    literals: Vec<Value>,
}

impl Chunk {
    /// A new chunk is empty.
    pub fn new() -> Self {
        Chunk {
            code: Vec::new(),
            lines: Vec::new(),
            literals: Vec::new(),
        }
    }

    /// Append one raw byte and the source line it came from.
    pub fn write_byte(&mut self, byte: u8, line: usize) {
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Serialize an instruction into the chunk's code, recording the source line
    /// for each of its bytes.
    pub fn write_instruction(&mut self, instruction: Instruction, line: usize) {
        let mut bytes = Vec::with_capacity(instruction.num_bytes());
        instruction
            .write_to(&mut bytes)
            .expect("writing to a Vec cannot fail");
        for byte in bytes {
            self.write_byte(byte, line);
        }
    }

    /// Add a literal value to the chunk's pool, returning its index.
    /// Indexes are encoded as a single operand byte, so the pool holds at most
    /// 256 entries; adding more is an error the compiler reports.
    pub fn add_literal(&mut self, literal: Value) -> Result<u8, InternalError> {
        let idx =
            u8::try_from(self.literals.len()).map_err(|_| InternalError::TooManyLiterals)?;
        self.literals.push(literal);
        Ok(idx)
    }

    /// The serialized instruction bytes.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    fn literal(&self, idx: u8) -> Result<&Value, InternalError> {
        self.literals
            .get(usize::from(idx))
            .ok_or(InternalError::LiteralIndexOutOfRange(idx))
    }

    // Render one instruction, returning the text and the instruction's width in
    // bytes. Format: zero-padded byte offset, source line (or a `|` continuation
    // marker when unchanged from the previous byte), mnemonic, and for literal
    // loads the operand index plus the resolved value.
    fn disassemble_instruction(&self, offset: usize) -> (String, usize) {
        let mut ret = format!("{:04} ", offset);
        if offset > 0 && self.lines[offset] == self.lines[offset - 1] {
            ret.push_str("   | ");
        } else {
            write!(&mut ret, "{:4} ", self.lines[offset]).expect("writing to string");
        }
        match Instruction::from_bytes(&self.code[offset..]) {
            Ok((instr, width)) => {
                // width specifiers don't reach through a custom Display impl,
                // so pad the mnemonic as a string
                let name = instr.to_string();
                if let Instruction::Literal(idx) = instr {
                    write!(&mut ret, "{:<16} {:4} '", name, idx).expect("writing to string");
                    match self.literal(idx) {
                        Ok(value) => write!(&mut ret, "{}'", value).expect("writing to string"),
                        Err(_) => ret.push_str("<out of range>'"),
                    }
                } else {
                    ret.push_str(&name);
                }
                (ret, width)
            }
            Err(_) => {
                write!(&mut ret, "not implemented opcode {}", self.code[offset])
                    .expect("writing to string");
                (ret, 1)
            }
        }
    }

    /// Return a human-readable string for a chunk.
    pub fn disassemble(&self, title: &str) -> String {
        let mut ret = format!("== {} ==\n", title);
        let mut offset = 0;
        while offset < self.code.len() {
            let (text, width) = self.disassemble_instruction(offset);
            ret.push_str(&text);
            ret.push('\n');
            offset += width;
        }
        ret
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

/// One link in the chained-instruction representation reserved for quantum data.
/// A quantum value is meant to be described as a sequence of classical and quantum
/// instructions plus inline quantum literals; none of this is produced or consumed
/// anywhere yet, and what the instructions would mean is deliberately undefined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QData {
    /// The operation or literal this link carries.
    pub op: QOp,
    /// The rest of the chain.
    pub next: Option<Box<QData>>,
}

/// The payload of one [`QData`] link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QOp {
    /// A classical instruction byte.
    Classical(u8),
    /// A quantum instruction byte.
    Quantum(u8),
    /// An inline quantum literal: a quantum type tag and its raw data.
    Literal {
        /// Type tag (1 = quantum bool, 2 = quantum number).
        qtype: u8,
        /// Raw payload byte.
        data: u8,
    },
}

/// Declared heap-object kinds for the quantum lane. No allocation path constructs
/// these yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QElemType {
    /// A quantum boolean.
    QBool,
    /// A 2-qubit register.
    Qu2,
    /// A 3-qubit register.
    Qu3,
    /// A 4-qubit register.
    Qu4,
}

/// VM-internal representation of a chat value.
///
/// The quantum variants are reserved extension slots: the scanner recognizes
/// quantum lexemes, but neither the compiler nor the VM ever builds one of
/// these, and their semantics are intentionally left undefined.
#[derive(Debug, Clone)]
pub enum Value {
    /// Null is a type and a value.
    Null,
    /// Boolean backed by Rust bool.
    Bool(bool),
    /// The single numeric base type, backed by f64. Infinities and NaN are
    /// allowed but we make no guarantees about how they compare.
    Number(f64),
    /// A heap-allocated element; currently only strings exist.
    Elem(ElemRef),
    /// Reserved: a quantum boolean.
    QBool(QData),
    /// Reserved: a quantum number.
    QNumber(QData),
    /// Reserved: a heap-allocated quantum element.
    QElem(QElemType),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(l0), Self::Bool(r0)) => l0 == r0,
            (Self::Number(l0), Self::Number(r0)) => l0 == r0,
            (Self::Elem(l0), Self::Elem(r0)) => {
                match (&*l0.as_elem().borrow(), &*r0.as_elem().borrow()) {
                    (Elem::String(s1), Elem::String(s2)) => s1 == s2,
                }
            }
            (Self::QBool(l0), Self::QBool(r0)) => l0 == r0,
            (Self::QNumber(l0), Self::QNumber(r0)) => l0 == r0,
            (Self::QElem(l0), Self::QElem(r0)) => l0 == r0,
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(val) => write!(f, "{}", val),
            Self::Elem(e) => match &*e.as_elem().borrow() {
                Elem::String(s) => write!(f, r#""{}""#, s),
            },
            Self::QBool(_) | Self::QNumber(_) | Self::QElem(_) => write!(f, "<quantum>"),
        }
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Number(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

pub use heap::{Elem, ElemRef, Heap, SharedElem};

const STACK_SIZE: usize = 256;

/// A Vm executes one completed chunk on a fixed-depth value stack.
#[derive(Debug)]
pub struct Vm {
    chunk: Chunk,
    ip: usize,
    // A Vec with a hard length cap rather than a fixed array, so slots don't
    // need a placeholder value; push and pop enforce the cap explicitly.
    stack: Vec<Value>,
    // Never read directly; owning it keeps the chunk's literal ElemRefs alive
    // for the duration of the run.
    #[allow(dead_code)]
    heap: Heap,
}

/// Errors that can be returned by compiling or running chat code.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// SyntaxError covers scanning and compiling failures; the diagnostic has
    /// already been written to stderr by the time this is returned.
    #[error("compile error")]
    SyntaxError,
    /// RuntimeError happens with runtime problems, like mismatched operand types
    #[error("runtime error")]
    RuntimeError,
    /// The value stack has a hardcoded max depth
    #[error("stack overflow")]
    StackOverflow,
    /// Popped more values than were pushed
    #[error("stack underflow")]
    StackUnderflow,
    /// Internal errors should not occur for chunks that compiled successfully.
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

/// VM error that should never come up for a chunk the compiler produced.
#[derive(Debug, Clone, Error)]
pub enum InternalError {
    /// Chunks have a limited number of slots for literals.
    #[error("tried to store more than the maximum number of literals in a chunk")]
    TooManyLiterals,
    /// An opcode byte with no defined instruction.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    /// The code buffer ended in the middle of an instruction.
    #[error("instruction truncated at end of chunk")]
    TruncatedInstruction,
    /// A literal load pointed past the end of the pool.
    #[error("literal index {0} out of range")]
    LiteralIndexOutOfRange(u8),
    /// The quantum opcodes are declared but have no execution semantics yet.
    /// Carries the offending opcode byte.
    #[error("quantum opcode {0} is not executable")]
    QuantumUnimplemented(u8),
}

impl Vm {
    /// The VM must be initialized with some code to run.
    pub fn new(chunk: Chunk) -> Self {
        Vm {
            chunk,
            ip: 0,
            stack: Vec::with_capacity(STACK_SIZE),
            heap: Heap::new(),
        }
    }

    /// New Vm from a pre-existing heap. The compiler allocates string literals
    /// into a heap, which must stay alive while the chunk referencing them runs.
    pub fn new_with_heap(chunk: Chunk, heap: Heap) -> Self {
        Vm {
            chunk,
            ip: 0,
            stack: Vec::with_capacity(STACK_SIZE),
            heap,
        }
    }

    /// Run the chunk until it returns or an error occurs. After an error the
    /// value stack is empty; a halted VM is not meant to be resumed.
    pub fn run(&mut self) -> Result<(), ChatError> {
        while self.ip < self.chunk.code.len() {
            let offset = self.ip;
            // decode failures take the same clear-the-stack exit as execution
            // failures
            let (instr, width) = match Instruction::from_bytes(&self.chunk.code[offset..]) {
                Ok(decoded) => decoded,
                Err(err) => {
                    self.stack.clear();
                    return Err(err.into());
                }
            };
            #[cfg(feature = "trace")]
            {
                print!("          ");
                for val in &self.stack {
                    print!("[ {} ]", val)
                }
                println!();
                println!("{}", self.chunk.disassemble_instruction(offset).0);
            }
            self.ip += width;
            match self.execute(&instr, offset) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(err) => {
                    // no post-error stack state may be observable
                    self.stack.clear();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    // Execute one instruction; Ok(true) means the run has ended.
    // `offset` is the byte offset of the instruction's opcode, for diagnostics.
    fn execute(&mut self, instruction: &Instruction, offset: usize) -> Result<bool, ChatError> {
        match instruction {
            Instruction::Literal(idx) => {
                let value = self
                    .chunk
                    .literal(*idx)
                    .map_err(ChatError::Internal)?
                    .clone();
                self.stack_push(value)?;
            }
            Instruction::Null => self.stack_push(Value::Null)?,
            Instruction::True => self.stack_push(true.into())?,
            Instruction::False => self.stack_push(false.into())?,
            Instruction::Negate => {
                let value = self.stack_pop()?;
                if let Value::Number(number) = value {
                    self.stack_push((-number).into())?;
                } else {
                    return Err(self.runtime_error("Operand must be a number.", offset));
                }
            }
            Instruction::Add => binary_arithmetic!(self, offset, +)?,
            Instruction::Sub => binary_arithmetic!(self, offset, -)?,
            Instruction::Mul => binary_arithmetic!(self, offset, *)?,
            Instruction::Div => binary_arithmetic!(self, offset, /)?,
            Instruction::Return => {
                let val = self.stack_pop()?;
                println!("{}", val);
                return Ok(true);
            }
            Instruction::QTrue => {
                return Err(
                    InternalError::QuantumUnimplemented(Instruction::OP_CODE_QTRUE).into(),
                );
            }
            Instruction::QFalse => {
                return Err(
                    InternalError::QuantumUnimplemented(Instruction::OP_CODE_QFALSE).into(),
                );
            }
        }
        Ok(false)
    }

    // Report a runtime error to stderr with the source line of the failing
    // instruction, reset the stack, and produce the error for the caller.
    fn runtime_error(&mut self, message: &str, offset: usize) -> ChatError {
        eprintln!("{}", message);
        eprintln!("[line {}] in script", self.chunk.lines[offset]);
        self.stack.clear();
        ChatError::RuntimeError
    }

    fn stack_push(&mut self, value: Value) -> Result<(), ChatError> {
        if self.stack.len() >= STACK_SIZE {
            Err(ChatError::StackOverflow)
        } else {
            self.stack.push(value);
            Ok(())
        }
    }

    fn stack_pop(&mut self) -> Result<Value, ChatError> {
        self.stack.pop().ok_or(ChatError::StackUnderflow)
    }
}

/// heap is our internal interface for allocating elements whose lifetime is not
/// tied to a single stack slot. There is no collector: the heap only allocates
/// and tracks, and everything it owns is released together when it is dropped.
/// One heap is created per interpret call, filled by the compiler (string
/// literals) and handed to the VM together with the chunk, so allocations live
/// exactly as long as the run that made them.
///
/// The entry point is the `Heap` type and its `new_*` methods, which allocate an
/// element and return an `ElemRef` through which it can be accessed. Internally
/// the Heap keeps `Rc<RefCell<_>>` nodes in a linked list and hands out
/// `Weak<RefCell<_>>`, so an `ElemRef` is only alive as long as the heap keeps
/// its element alive; using a dead ref is a panic, not undefined behavior.
mod heap {
    use std::cell::RefCell;
    use std::ops::Deref;
    use std::rc::{Rc, Weak};

    /// A heap-allocated element. Strings are the only concrete kind so far;
    /// there is no interning, every string literal gets a fresh allocation.
    #[derive(Debug)]
    pub enum Elem {
        /// An owned string.
        String(String),
    }

    // Internal representation of a heap element. The elements are arranged in a
    // linked list using the `next` field, and are owned by the nodes (with the
    // head node owned by the Heap itself).
    #[derive(Debug)]
    struct HeapNode {
        next: Option<Box<HeapNode>>,
        elem: Rc<RefCell<Elem>>,
    }

    /// Hides the shared-ownership and interior-mutability details behind a
    /// newtype; `borrow` delegates to the RefCell method of the same name.
    #[derive(Debug)]
    pub struct SharedElem(Rc<RefCell<Elem>>);

    impl SharedElem {
        /// Borrow the element immutably.
        pub fn borrow(&self) -> impl Deref<Target = Elem> + '_ {
            self.0.borrow()
        }
    }

    /// A non-owning handle to a heap element.
    #[derive(Debug, Clone)]
    pub struct ElemRef {
        value: Weak<RefCell<Elem>>,
    }

    /// Allocates and tracks heap elements, releasing them all when dropped.
    #[derive(Debug)]
    pub struct Heap {
        head: Option<Box<HeapNode>>,
    }

    impl Heap {
        /// A new, empty heap.
        pub fn new() -> Heap {
            Heap { head: None }
        }

        /// Allocate a string element, copying from value, and return the ref by
        /// which it can be accessed.
        pub fn new_string_with_value(&mut self, value: &str) -> ElemRef {
            let elem_in_rc = Rc::new(RefCell::new(Elem::String(String::from(value))));
            let node = HeapNode {
                elem: elem_in_rc.clone(),
                next: self.head.take(),
            };
            self.head = Some(Box::new(node));
            ElemRef {
                value: Rc::downgrade(&elem_in_rc),
            }
        }
    }

    impl Default for Heap {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Elem {
        /// The string contents, if this element is a string.
        pub fn as_string(&self) -> Option<&String> {
            let Elem::String(s) = self;
            Some(s)
        }
    }

    impl ElemRef {
        /// Convert a ref to its element, panicking if the ref is no longer alive.
        pub fn as_elem(&self) -> SharedElem {
            SharedElem(self.value.upgrade().expect("heap element outlived its heap"))
        }

        /// Apply a function to the element if it's a string, returning None if
        /// it isn't one.
        pub fn map_as_string<F, Ret>(&self, f: F) -> Option<Ret>
        where
            F: FnOnce(&String) -> Ret,
        {
            Some(f(self.as_elem().borrow().as_string()?))
        }
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn test_heap_allocates_fresh_strings() {
            let mut heap = Heap::new();
            let a = heap.new_string_with_value("hello");
            let b = heap.new_string_with_value("hello");
            assert_eq!(a.map_as_string(|s| s.clone()), Some("hello".to_string()));
            // same contents, distinct allocations
            assert!(!Rc::ptr_eq(
                &a.value.upgrade().unwrap(),
                &b.value.upgrade().unwrap()
            ));
        }

        #[test]
        fn test_ref_dies_with_heap() {
            let elem_ref = {
                let mut heap = Heap::new();
                heap.new_string_with_value("gone")
            };
            assert!(elem_ref.value.upgrade().is_none());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn chunk_of(instructions: &[Instruction], literals: Vec<Value>) -> Chunk {
        let mut chunk = Chunk::new();
        for literal in literals {
            chunk.add_literal(literal).expect("test pool fits");
        }
        for instr in instructions {
            chunk.write_instruction(*instr, 1);
        }
        chunk
    }

    #[test]
    fn test_code_and_lines_stay_parallel() {
        let mut chunk = Chunk::new();
        chunk.add_literal(Value::Number(1.0)).unwrap();
        chunk.write_instruction(Instruction::Literal(0), 3);
        chunk.write_instruction(Instruction::Return, 4);
        assert_eq!(
            chunk.code,
            vec![Instruction::OP_CODE_LITERAL, 0, Instruction::OP_CODE_RETURN]
        );
        assert_eq!(chunk.lines, vec![3, 3, 4]);
    }

    #[test]
    fn test_literal_pool_limit() {
        let mut chunk = Chunk::new();
        for i in 0..256 {
            let idx = chunk
                .add_literal(Value::Number(i as f64))
                .expect("pool has room");
            assert_eq!(usize::from(idx), i);
        }
        assert!(matches!(
            chunk.add_literal(Value::Number(256.0)),
            Err(InternalError::TooManyLiterals)
        ));
    }

    #[test]
    fn test_instruction_byte_round() {
        let instructions = [
            Instruction::Literal(7),
            Instruction::Null,
            Instruction::True,
            Instruction::False,
            Instruction::Negate,
            Instruction::Add,
            Instruction::Sub,
            Instruction::Mul,
            Instruction::Div,
            Instruction::Return,
            Instruction::QTrue,
            Instruction::QFalse,
        ];
        for instr in instructions {
            let bytes: Vec<u8> = Vec::from(&instr);
            assert_eq!(bytes.len(), instr.num_bytes());
            let (decoded, width) = Instruction::from_bytes(&bytes).expect("decodes");
            assert_eq!(decoded, instr);
            assert_eq!(width, bytes.len());
        }
    }

    #[test]
    fn test_decode_rejects_reserved_and_unknown() {
        assert!(matches!(
            Instruction::from_bytes(&[1]),
            Err(InternalError::UnknownOpcode(1))
        ));
        assert!(matches!(
            Instruction::from_bytes(&[200]),
            Err(InternalError::UnknownOpcode(200))
        ));
        assert!(matches!(
            Instruction::from_bytes(&[Instruction::OP_CODE_LITERAL]),
            Err(InternalError::TruncatedInstruction)
        ));
    }

    #[test]
    fn test_multiply_happy_path() {
        let chunk = chunk_of(
            &[
                Instruction::Literal(0),
                Instruction::Literal(1),
                Instruction::Mul,
                Instruction::Return,
            ],
            vec![Value::Number(3.0), Value::Number(4.0)],
        );
        let mut vm = Vm::new(chunk);
        assert!(vm.run().is_ok());
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn test_add_type_error_resets_stack() {
        let chunk = chunk_of(
            &[
                Instruction::True,
                Instruction::Literal(0),
                Instruction::Add,
                Instruction::Return,
            ],
            vec![Value::Number(1.0)],
        );
        let mut vm = Vm::new(chunk);
        assert!(matches!(vm.run(), Err(ChatError::RuntimeError)));
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn test_negate_type_error() {
        let chunk = chunk_of(
            &[Instruction::False, Instruction::Negate, Instruction::Return],
            vec![],
        );
        let mut vm = Vm::new(chunk);
        assert!(matches!(vm.run(), Err(ChatError::RuntimeError)));
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn test_negate_number() {
        let chunk = chunk_of(
            &[
                Instruction::Literal(0),
                Instruction::Negate,
                Instruction::Return,
            ],
            vec![Value::Number(2.5)],
        );
        let mut vm = Vm::new(chunk);
        assert!(vm.run().is_ok());
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn test_stack_underflow_is_explicit() {
        let chunk = chunk_of(&[Instruction::Add], vec![]);
        let mut vm = Vm::new(chunk);
        assert!(matches!(vm.run(), Err(ChatError::StackUnderflow)));
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn test_stack_overflow_is_explicit() {
        let mut chunk = Chunk::new();
        for _ in 0..=STACK_SIZE {
            chunk.write_instruction(Instruction::True, 1);
        }
        chunk.write_instruction(Instruction::Return, 1);
        let mut vm = Vm::new(chunk);
        assert!(matches!(vm.run(), Err(ChatError::StackOverflow)));
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn test_quantum_opcodes_do_not_execute() {
        let chunk = chunk_of(&[Instruction::QTrue, Instruction::Return], vec![]);
        let mut vm = Vm::new(chunk);
        assert!(matches!(
            vm.run(),
            Err(ChatError::Internal(InternalError::QuantumUnimplemented(
                Instruction::OP_CODE_QTRUE
            )))
        ));
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn test_decode_error_resets_stack() {
        let mut chunk = Chunk::new();
        chunk.write_instruction(Instruction::True, 1);
        // a raw reserved opcode byte, which no compiler output contains
        chunk.write_byte(1, 1);
        let mut vm = Vm::new(chunk);
        assert!(matches!(
            vm.run(),
            Err(ChatError::Internal(InternalError::UnknownOpcode(1)))
        ));
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn test_string_literal_value() {
        let mut heap = Heap::new();
        let chunk = chunk_of(
            &[Instruction::Literal(0), Instruction::Return],
            vec![Value::Elem(heap.new_string_with_value("hi"))],
        );
        let mut vm = Vm::new_with_heap(chunk, heap);
        assert!(vm.run().is_ok());
    }

    #[test]
    fn test_value_equality() {
        let mut heap = Heap::new();
        let a = Value::Elem(heap.new_string_with_value("s"));
        let b = Value::Elem(heap.new_string_with_value("s"));
        let c = Value::Elem(heap.new_string_with_value("t"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(Value::Number(1.0), Value::Number(1.0));
        assert_ne!(Value::Number(1.0), Value::Bool(true));
        assert_eq!(Value::Null, Value::Null);
    }

    #[test]
    fn test_value_display() {
        let mut heap = Heap::new();
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Number(12.0).to_string(), "12");
        assert_eq!(Value::Number(0.5).to_string(), "0.5");
        assert_eq!(
            Value::Elem(heap.new_string_with_value("hi")).to_string(),
            "\"hi\""
        );
    }

    #[test]
    fn test_disassemble_format() {
        let mut chunk = Chunk::new();
        chunk.add_literal(Value::Number(1.5)).unwrap();
        chunk.write_instruction(Instruction::Literal(0), 1);
        chunk.write_instruction(Instruction::Negate, 1);
        chunk.write_instruction(Instruction::Return, 2);
        let text = chunk.disassemble("test");
        let expected = "\
== test ==
0000    1 OP_LITERAL          0 '1.5'
0002    | OP_NEGATE
0003    2 OP_RETURN
";
        assert_eq!(text, expected);
    }
}
