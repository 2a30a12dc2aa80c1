// vm.rs - the 16-bit virtual machine: image memory, registers, stacks in
// image memory, the indirect-threaded inner interpreter, and the name
// dictionary.
//
// Register model (the classic eForth set):
//
//   IP    interpreter pointer, walks the threaded-code body
//   WP    work pointer, the code address being dispatched
//   SP    data stack pointer (stack lives in the image, grows down)
//   RP    return stack pointer (same)
//
// The inner loop fetches the cell at WP, treats it as an opcode and
// dispatches the matching primitive. Colon words begin with the CALL
// opcode, so "dispatch the cell at WP" handles primitives and threaded
// code uniformly.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::mpsc::{sync_channel, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use crate::assembler::AsmDiagnostic;
use crate::errors::VmError;
use crate::primitives::Primitive;

// ============================================================================
// MEMORY MAP
// ============================================================================
//
//   0000-00FF   user-variable initial values, copied up by COLD
//   0100        cold start vector
//   0180-....   code dictionary, growing up
//   ....-3DF0   name dictionary, growing down
//   3E00-       live user variables
//   3F60        bottom of the data stack, growing down
//   3F70-       terminal input buffer
//   3FF0        bottom of the return stack, growing down

/// Size of a cell in bytes.
pub const CELLL: u16 = 2;
/// Default numeric radix.
pub const BASEE: u16 = 10;
/// Depth of the vocabulary search-order stack.
pub const VOCSS: u16 = 8;
/// Top of image memory.
pub const EM: u16 = 0x4000;
/// Cold start vector.
pub const COLDD: u16 = 0x0100;
/// User area size.
pub const US: u16 = 64 * CELLL;
/// Return stack and TIB size.
pub const RTS: u16 = 64 * CELLL;
/// Bottom of the return stack (RP0).
pub const RPP: u16 = EM - 8 * CELLL;
/// Terminal input buffer.
pub const TIBB: u16 = RPP - RTS;
/// Bottom of the data stack (SP0).
pub const SPP: u16 = TIBB - 8 * CELLL;
/// Base of the user area.
pub const UPP: u16 = EM - 256 * CELLL;
/// Ceiling of the name dictionary.
pub const NAMEE: u16 = UPP - 8 * CELLL;
/// Base of the code dictionary.
pub const CODEE: u16 = COLDD + US;
/// Opcode of CALL; compiled as the head cell of every colon body.
pub const CALLL: u16 = 2;
/// Kernel version, reported by VER and the sign-on banner.
pub const VERSION: u16 = 1;
/// Compile-only lexicon bit in the length-flag byte.
pub const COMPO: u16 = 0x40;
/// Immediate lexicon bit in the length-flag byte.
pub const IMEDD: u16 = 0x80;
/// Mask clearing the lexicon bits of a name's first cell during search.
pub const MASKK: u16 = 0x7F1F;

/// First user-variable offset; the first four cells are reserved.
const USER0: u16 = 4 * CELLL;

/// The interpreter exit sentinel, stored into IP by BYE.
pub const HALTED: u16 = 0xFFFF;

/// A complete eForth machine: image, registers, primitive table and the
/// build-time symbol state used by the meta-assembler.
pub struct Forth {
    pub ip: u16,
    pub sp: u16,
    pub rp: u16,
    pub wp: u16,
    pub memory: Vec<u8>,

    /// Dense primitive dispatch, indexed by opcode. Slot 0 is unused so
    /// that a zero cell is never a valid instruction.
    pub(crate) ops: Vec<Option<Primitive>>,
    /// Cells consumed in the code dictionary.
    pub(crate) cp_cells: u16,
    /// Word, constant and label-image symbols: name to cell value.
    pub(crate) symbols: HashMap<String, u16>,
    /// Pseudo-assembly symbol to dictionary name.
    pub(crate) aliases: HashMap<String, String>,
    /// User-variable names that reserve extra cells, and how many.
    pub(crate) user_extras: HashMap<String, u16>,
    /// Offset assigned to the next $USER declaration.
    pub(crate) user_offset: u16,

    /// Bottom of the name dictionary.
    pub np: u16,
    /// Length-flag byte address of the most recent name header.
    pub last: u16,

    /// Diagnostics collected while assembling the kernel.
    pub diagnostics: Vec<AsmDiagnostic>,

    pub(crate) input: Option<Box<dyn Read + Send>>,
    pub(crate) output: Box<dyn Write>,
    pub(crate) rx: Option<Receiver<u8>>,
}

impl Forth {
    /// A machine with the primitive code-words installed but no kernel.
    pub fn bare(
        input: Box<dyn Read + Send>,
        output: Box<dyn Write>,
    ) -> Result<Self, VmError> {
        let mut f = Forth {
            ip: 0,
            sp: SPP,
            rp: RPP,
            wp: 0,
            memory: vec![0; EM as usize],
            ops: vec![None],
            cp_cells: 0,
            symbols: HashMap::new(),
            aliases: HashMap::new(),
            user_extras: HashMap::new(),
            user_offset: USER0,
            np: NAMEE,
            last: 0,
            diagnostics: Vec::new(),
            input: Some(input),
            output,
            rx: None,
        };
        for prim in Primitive::all() {
            f.add_prim(*prim)?;
        }
        crate::bootstrap::install_symbols(&mut f);
        Ok(f)
    }

    /// A complete machine: primitives plus the assembled high-level
    /// kernel, wired to the given byte source and sink.
    pub fn new(
        input: Box<dyn Read + Send>,
        output: Box<dyn Write>,
    ) -> Result<Self, VmError> {
        let mut f = Self::bare(input, output)?;
        crate::bootstrap::build_image(&mut f)?;
        for diag in &f.diagnostics {
            eprintln!("kernel assembly: {}", diag);
        }
        Ok(f)
    }

    // ========================================================================
    // MEMORY AND STACKS
    // ========================================================================

    pub fn read_cell(&self, addr: u16) -> Result<u16, VmError> {
        let a = addr as usize;
        if a + 1 >= self.memory.len() {
            return Err(VmError::OutOfRange(addr));
        }
        Ok(u16::from_le_bytes([self.memory[a], self.memory[a + 1]]))
    }

    pub fn write_cell(&mut self, addr: u16, value: u16) -> Result<(), VmError> {
        let a = addr as usize;
        if a + 1 >= self.memory.len() {
            return Err(VmError::OutOfRange(addr));
        }
        self.memory[a..a + 2].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_byte(&self, addr: u16) -> Result<u8, VmError> {
        self.memory
            .get(addr as usize)
            .copied()
            .ok_or(VmError::OutOfRange(addr))
    }

    pub fn write_byte(&mut self, addr: u16, value: u8) -> Result<(), VmError> {
        match self.memory.get_mut(addr as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VmError::OutOfRange(addr)),
        }
    }

    pub fn push(&mut self, value: u16) -> Result<(), VmError> {
        self.sp = self.sp.wrapping_sub(CELLL);
        self.write_cell(self.sp, value)
    }

    pub fn pop(&mut self) -> Result<u16, VmError> {
        let value = self.read_cell(self.sp)?;
        self.sp = self.sp.wrapping_add(CELLL);
        Ok(value)
    }

    pub fn rpush(&mut self, value: u16) -> Result<(), VmError> {
        self.rp = self.rp.wrapping_sub(CELLL);
        self.write_cell(self.rp, value)
    }

    pub fn rpop(&mut self) -> Result<u16, VmError> {
        let value = self.read_cell(self.rp)?;
        self.rp = self.rp.wrapping_add(CELLL);
        Ok(value)
    }

    // ========================================================================
    // DICTIONARY
    // ========================================================================

    /// Lay a name header for `word` pointing at code address `ca`.
    ///
    /// Headers grow down from NAMEE on cell boundaries:
    ///
    ///   NP+0  code address
    ///   NP+2  link to the previous header's length-flag byte, 0 at the end
    ///   NP+4  length-flag byte: length in the low 5 bits, COMPO/IMEDD above
    ///   NP+5  name characters, zero padded to the next cell boundary
    pub fn add_name(&mut self, word: &str, ca: u16, flags: u16) -> Result<(), VmError> {
        let name_cells = word.len() as u16 / CELLL;
        let np = self.np.wrapping_sub((name_cells + 3) * CELLL);
        if np < CODEE + CELLL * self.cp_cells {
            return Err(VmError::NameOverflow(np));
        }
        self.write_cell(np, ca)?;
        self.write_cell(np + 2, self.last)?;
        self.write_byte(np + 4, (word.len() as u16 | flags) as u8)?;
        for (i, ch) in word.bytes().enumerate() {
            self.write_byte(np + 5 + i as u16, ch)?;
        }
        self.np = np;
        self.last = np + 4;
        Ok(())
    }

    /// Register a primitive: assign it the next opcode, give it one code
    /// cell holding that opcode, and enter it in the name dictionary.
    pub(crate) fn add_prim(&mut self, prim: Primitive) -> Result<(), VmError> {
        let opcode = self.ops.len() as u16;
        self.ops.push(Some(prim));
        let addr = CODEE + CELLL * self.cp_cells;
        self.cp_cells += 1;
        self.write_cell(addr, opcode)?;
        self.symbols.insert(prim.name().to_string(), addr);
        self.add_name(prim.name(), addr, prim.flags())
    }

    /// Code address of a word, or value of a registered constant.
    pub fn addr(&self, word: &str) -> Result<u16, VmError> {
        self.symbols
            .get(word)
            .copied()
            .ok_or_else(|| VmError::Undefined(word.to_string()))
    }

    /// Host-side colon definition, e.g. `add_word(": square DUP UM+ DROP ;")`.
    /// A single `( ... )` comment is stripped; remaining tokens resolve the
    /// same way meta-assembler tokens do.
    pub fn add_word(&mut self, cdef: &str) -> Result<(), VmError> {
        let cleaned = match (cdef.find('('), cdef.find(')')) {
            (Some(i), Some(j)) if i < j => format!("{}{}", &cdef[..i], &cdef[j + 1..]),
            _ => cdef.to_string(),
        };
        let fields: Vec<&str> = cleaned.split_whitespace().collect();
        if fields.len() < 3 || fields[0] != ":" || fields[fields.len() - 1] != ";" {
            return Err(VmError::BadDefinition(cdef.to_string()));
        }
        let name = fields[1];
        let mut words: Vec<String> = vec!["CALLL".into(), "doLIST".into()];
        words.extend(fields[2..fields.len() - 1].iter().map(|w| w.to_string()));
        words.push("EXIT".into());
        crate::assembler::compile_words(self, name, &words, &HashMap::new(), 0)
    }

    // ========================================================================
    // INNER INTERPRETER
    // ========================================================================

    /// Advance to the next threaded instruction:
    /// WP := cell at IP, IP += 2.
    pub fn next(&mut self) -> Result<(), VmError> {
        self.wp = self.read_cell(self.ip)?;
        self.ip = self.ip.wrapping_add(CELLL);
        Ok(())
    }

    /// One fetch-dispatch step of the inner interpreter.
    pub fn step(&mut self) -> Result<(), VmError> {
        let opcode = self.read_cell(self.wp)?;
        match self.ops.get(opcode as usize).copied().flatten() {
            Some(prim) => self.run_primitive(prim),
            None => Err(VmError::UnknownOpcode {
                opcode,
                wp: self.wp,
            }),
        }
    }

    /// Seed the cold start vector with `word` and interpret until BYE
    /// plants the exit sentinel.
    pub fn execute(&mut self, word: &str) -> Result<(), VmError> {
        let ca = self.addr(word)?;
        self.write_cell(COLDD, ca)?;
        self.ip = COLDD;
        self.next()?;
        while self.ip != HALTED {
            self.step()?;
        }
        Ok(())
    }

    /// Boot the machine: cold start, sign-on banner, then the QUIT shell.
    pub fn run(&mut self) -> Result<(), VmError> {
        self.execute("COLD")
    }

    // ========================================================================
    // BYTE I/O
    // ========================================================================

    /// Detach the byte source into a producer thread feeding a bounded
    /// channel of one byte. Line feeds are delivered as carriage returns.
    /// Subsequent calls are no-ops.
    pub(crate) fn start_input_pump(&mut self) {
        let Some(mut reader) = self.input.take() else {
            return;
        };
        let (tx, rx) = sync_channel::<u8>(1);
        thread::spawn(move || {
            let mut buf = [0u8; 1];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let byte = if buf[0] == b'\n' { b'\r' } else { buf[0] };
                        if tx.send(byte).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        self.rx = Some(rx);
    }

    /// Non-blocking poll of the input channel. `None` means no byte is
    /// pending (or the source is exhausted); the poll backs off for a
    /// millisecond so an idle shell does not spin hot.
    pub(crate) fn poll_rx(&mut self) -> Option<u8> {
        match &self.rx {
            Some(rx) => match rx.try_recv() {
                Ok(byte) => Some(byte),
                Err(TryRecvError::Empty) => {
                    thread::sleep(Duration::from_millis(1));
                    None
                }
                Err(TryRecvError::Disconnected) => None,
            },
            None => None,
        }
    }

    pub(crate) fn emit_byte(&mut self, byte: u8) -> Result<(), VmError> {
        self.output
            .write_all(&[byte])
            .and_then(|_| self.output.flush())
            .map_err(|e| VmError::Output(e.to_string()))
    }
}
