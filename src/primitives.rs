// primitives.rs - the machine-level code words.
//
// Everything else in the system is threaded code assembled from these.
// Each primitive is one method on Forth; apart from BYE, CALL and EXECUTE
// every method finishes with NEXT so the inner interpreter keeps walking
// the current colon body.

use crate::errors::VmError;
use crate::vm::{Forth, COMPO, HALTED};

/// Declares the primitive word set in opcode order and generates the
/// `Primitive` enum, its metadata accessors, and the dispatch method on
/// `Forth`. Registration order matters: CALL must receive opcode 2, the
/// value exported to the assembler as CALLL.
macro_rules! define_primitives {
    (
        $(
            $variant:ident => $name:literal, $flags:expr => $method:ident
        ),* $(,)?
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Primitive {
            $( $variant, )*
        }

        impl Primitive {
            /// Dictionary name of this primitive.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Primitive::$variant => $name, )*
                }
            }

            /// Lexicon bits for the name header.
            pub fn flags(&self) -> u16 {
                match self {
                    $( Primitive::$variant => $flags, )*
                }
            }

            /// All primitives in registration (opcode) order.
            pub fn all() -> &'static [Primitive] {
                &[ $( Primitive::$variant, )* ]
            }
        }

        impl Forth {
            pub(crate) fn run_primitive(&mut self, prim: Primitive) -> Result<(), VmError> {
                match prim {
                    $( Primitive::$variant => self.$method(), )*
                }
            }
        }
    };
}

define_primitives! {
    // System interface
    Bye => "BYE", 0 => op_bye,
    Call => "CALL", 0 => op_call,
    DoList => "doLIST", COMPO => op_do_list,
    BangIo => "!IO", 0 => op_bang_io,
    QueryRx => "?RX", 0 => op_query_rx,
    TxStore => "TX!", 0 => op_tx_store,
    Execute => "EXECUTE", 0 => op_execute,

    // Inner interpreter
    DoLit => "doLIT", COMPO => op_do_lit,
    Exit => "EXIT", 0 => op_exit,
    DoNext => "next", COMPO => op_do_next,
    QueryBranch => "?branch", COMPO => op_query_branch,
    Branch => "branch", COMPO => op_branch,

    // Memory access
    Store => "!", 0 => op_store,
    Fetch => "@", 0 => op_fetch,
    CStore => "C!", 0 => op_c_store,
    CFetch => "C@", 0 => op_c_fetch,

    // Return stack
    RpFetch => "RP@", 0 => op_rp_fetch,
    RpStore => "RP!", COMPO => op_rp_store,
    RFrom => "R>", 0 => op_r_from,
    RFetch => "R@", 0 => op_r_fetch,
    ToR => ">R", COMPO => op_to_r,

    // Data stack
    Drop => "DROP", 0 => op_drop,
    Dup => "DUP", 0 => op_dup,
    Swap => "SWAP", 0 => op_swap,
    Over => "OVER", 0 => op_over,
    SpFetch => "SP@", 0 => op_sp_fetch,
    SpStore => "SP!", 0 => op_sp_store,

    // Logic
    ZeroLess => "0<", 0 => op_zero_less,
    And => "AND", 0 => op_and,
    Or => "OR", 0 => op_or,
    Xor => "XOR", 0 => op_xor,

    // Arithmetic
    UmPlus => "UM+", 0 => op_um_plus,
}

impl Forth {
    // ========================================================================
    // SYSTEM INTERFACE
    // ========================================================================

    // BYE ( -- ) plant the exit sentinel; the driver loop halts.
    fn op_bye(&mut self) -> Result<(), VmError> {
        self.ip = HALTED;
        Ok(())
    }

    // CALL ( -- ) head of every colon body. Leaves the body address on
    // the data stack and steers dispatch into doLIST, whose code address
    // sits in the following cell.
    fn op_call(&mut self) -> Result<(), VmError> {
        let body = self.wp.wrapping_add(4);
        self.push(body)?;
        self.wp = self.read_cell(self.wp.wrapping_add(2))?;
        Ok(())
    }

    // !IO ( -- ) initialize I/O: detach the byte source into the ?RX
    // producer thread.
    fn op_bang_io(&mut self) -> Result<(), VmError> {
        self.start_input_pump();
        self.next()
    }

    // ?RX ( -- c T | F ) non-blocking receive from the input channel.
    fn op_query_rx(&mut self) -> Result<(), VmError> {
        match self.poll_rx() {
            Some(byte) => {
                self.push(byte as u16)?;
                self.push(0xFFFF)?;
            }
            None => self.push(0)?,
        }
        self.next()
    }

    // TX! ( c -- ) send one byte to the output sink.
    fn op_tx_store(&mut self) -> Result<(), VmError> {
        let c = self.pop()? as u8;
        self.emit_byte(c)?;
        self.next()
    }

    // EXECUTE ( ca -- ) dispatch the word at ca.
    fn op_execute(&mut self) -> Result<(), VmError> {
        self.wp = self.pop()?;
        Ok(())
    }

    // ========================================================================
    // INNER INTERPRETER
    // ========================================================================

    // doLIST ( a -- ) enter a colon body: save the caller's IP on the
    // return stack, reload IP from the address CALL pushed.
    fn op_do_list(&mut self) -> Result<(), VmError> {
        let ip = self.ip;
        self.rpush(ip)?;
        self.ip = self.pop()?;
        self.next()
    }

    // EXIT ( -- ) undo doLIST: restore the caller's IP.
    fn op_exit(&mut self) -> Result<(), VmError> {
        self.ip = self.rpop()?;
        self.next()
    }

    // doLIT ( -- w ) push the inline literal and step over it.
    fn op_do_lit(&mut self) -> Result<(), VmError> {
        let w = self.read_cell(self.ip)?;
        self.push(w)?;
        self.ip = self.ip.wrapping_add(2);
        self.next()
    }

    // next ( -- ) FOR-NEXT runtime: decrement the signed index on the
    // return stack; loop through the inline target while it stays >= 0.
    fn op_do_next(&mut self) -> Result<(), VmError> {
        let index = (self.read_cell(self.rp)? as i16).wrapping_sub(1);
        self.write_cell(self.rp, index as u16)?;
        if index >= 0 {
            self.ip = self.read_cell(self.ip)?;
        } else {
            self.rp = self.rp.wrapping_add(2);
            self.ip = self.ip.wrapping_add(2);
        }
        self.next()
    }

    // ?branch ( f -- ) branch through the inline target when f is zero.
    fn op_query_branch(&mut self) -> Result<(), VmError> {
        let flag = self.pop()?;
        if flag == 0 {
            self.ip = self.read_cell(self.ip)?;
        } else {
            self.ip = self.ip.wrapping_add(2);
        }
        self.next()
    }

    // branch ( -- ) unconditional branch through the inline target.
    fn op_branch(&mut self) -> Result<(), VmError> {
        self.ip = self.read_cell(self.ip)?;
        self.next()
    }

    // ========================================================================
    // MEMORY ACCESS
    // ========================================================================

    // ! ( w a -- )
    fn op_store(&mut self) -> Result<(), VmError> {
        let a = self.pop()?;
        let w = self.pop()?;
        self.write_cell(a, w)?;
        self.next()
    }

    // @ ( a -- w )
    fn op_fetch(&mut self) -> Result<(), VmError> {
        let a = self.pop()?;
        let w = self.read_cell(a)?;
        self.push(w)?;
        self.next()
    }

    // C! ( c b -- ) store the low byte only.
    fn op_c_store(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let c = self.pop()?;
        self.write_byte(b, (c & 0x00FF) as u8)?;
        self.next()
    }

    // C@ ( b -- c ) fetch one byte, zero extended.
    fn op_c_fetch(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let c = self.read_byte(b)?;
        self.push(c as u16)?;
        self.next()
    }

    // ========================================================================
    // RETURN STACK
    // ========================================================================

    // RP@ ( -- a )
    fn op_rp_fetch(&mut self) -> Result<(), VmError> {
        let rp = self.rp;
        self.push(rp)?;
        self.next()
    }

    // RP! ( a -- )
    fn op_rp_store(&mut self) -> Result<(), VmError> {
        self.rp = self.pop()?;
        self.next()
    }

    // R> ( -- w )
    fn op_r_from(&mut self) -> Result<(), VmError> {
        let w = self.rpop()?;
        self.push(w)?;
        self.next()
    }

    // R@ ( -- w )
    fn op_r_fetch(&mut self) -> Result<(), VmError> {
        let w = self.read_cell(self.rp)?;
        self.push(w)?;
        self.next()
    }

    // >R ( w -- )
    fn op_to_r(&mut self) -> Result<(), VmError> {
        let w = self.pop()?;
        self.rpush(w)?;
        self.next()
    }

    // ========================================================================
    // DATA STACK
    // ========================================================================

    // DROP ( w -- )
    fn op_drop(&mut self) -> Result<(), VmError> {
        self.pop()?;
        self.next()
    }

    // DUP ( w -- w w )
    fn op_dup(&mut self) -> Result<(), VmError> {
        let w = self.read_cell(self.sp)?;
        self.push(w)?;
        self.next()
    }

    // SWAP ( w1 w2 -- w2 w1 )
    fn op_swap(&mut self) -> Result<(), VmError> {
        let w2 = self.pop()?;
        let w1 = self.pop()?;
        self.push(w2)?;
        self.push(w1)?;
        self.next()
    }

    // OVER ( w1 w2 -- w1 w2 w1 )
    fn op_over(&mut self) -> Result<(), VmError> {
        let w1 = self.read_cell(self.sp.wrapping_add(2))?;
        self.push(w1)?;
        self.next()
    }

    // SP@ ( -- a ) the pointer value before this push.
    fn op_sp_fetch(&mut self) -> Result<(), VmError> {
        let sp = self.sp;
        self.push(sp)?;
        self.next()
    }

    // SP! ( a -- )
    fn op_sp_store(&mut self) -> Result<(), VmError> {
        self.sp = self.pop()?;
        self.next()
    }

    // ========================================================================
    // LOGIC
    // ========================================================================

    // 0< ( n -- f ) true (all ones) when the sign bit is set.
    fn op_zero_less(&mut self) -> Result<(), VmError> {
        let n = self.pop()?;
        self.push(if (n as i16) < 0 { 0xFFFF } else { 0 })?;
        self.next()
    }

    // AND ( w w -- w )
    fn op_and(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(a & b)?;
        self.next()
    }

    // OR ( w w -- w )
    fn op_or(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(a | b)?;
        self.next()
    }

    // XOR ( w w -- w )
    fn op_xor(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(a ^ b)?;
        self.next()
    }

    // ========================================================================
    // ARITHMETIC
    // ========================================================================

    // UM+ ( u u -- u cy ) unsigned add with the carry as a second result.
    // All other kernel arithmetic is threaded code over this.
    fn op_um_plus(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let sum = a as u32 + b as u32;
        self.push((sum & 0xFFFF) as u16)?;
        self.push((sum >> 16) as u16)?;
        self.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::SPP;
    use std::io;

    fn forth() -> Forth {
        Forth::bare(Box::new(io::empty()), Box::new(io::sink())).unwrap()
    }

    #[test]
    fn um_plus_preserves_information() {
        let mut f = forth();
        for (a, b) in [(0u16, 0u16), (1, 2), (0xFFFF, 1), (0x8000, 0x8000), (0xFFFF, 0xFFFF)] {
            f.push(a).unwrap();
            f.push(b).unwrap();
            f.run_primitive(Primitive::UmPlus).unwrap();
            let carry = f.pop().unwrap();
            let low = f.pop().unwrap();
            assert_eq!(65536 * carry as u32 + low as u32, a as u32 + b as u32);
        }
    }

    #[test]
    fn zero_less_tests_the_sign_bit() {
        let mut f = forth();
        f.push(0x8000).unwrap();
        f.run_primitive(Primitive::ZeroLess).unwrap();
        assert_eq!(f.pop().unwrap(), 0xFFFF);

        f.push(0x7FFF).unwrap();
        f.run_primitive(Primitive::ZeroLess).unwrap();
        assert_eq!(f.pop().unwrap(), 0);
    }

    #[test]
    fn c_store_keeps_only_the_low_byte() {
        let mut f = forth();
        f.push(0xABCD).unwrap();
        f.push(0x20).unwrap();
        f.run_primitive(Primitive::CStore).unwrap();
        assert_eq!(f.memory[0x20], 0xCD);
        assert_eq!(f.memory[0x21], 0x00);

        f.push(0x20).unwrap();
        f.run_primitive(Primitive::CFetch).unwrap();
        assert_eq!(f.pop().unwrap(), 0x00CD);
    }

    #[test]
    fn dup_drop_and_swap_swap_are_identities() {
        let mut f = forth();
        f.push(42).unwrap();
        f.run_primitive(Primitive::Dup).unwrap();
        f.run_primitive(Primitive::Drop).unwrap();
        assert_eq!(f.pop().unwrap(), 42);
        assert_eq!(f.sp, SPP);

        f.push(1).unwrap();
        f.push(2).unwrap();
        f.run_primitive(Primitive::Swap).unwrap();
        f.run_primitive(Primitive::Swap).unwrap();
        assert_eq!(f.pop().unwrap(), 2);
        assert_eq!(f.pop().unwrap(), 1);
    }

    #[test]
    fn to_r_from_r_round_trips() {
        let mut f = forth();
        let rp0 = f.rp;
        f.push(7).unwrap();
        f.run_primitive(Primitive::ToR).unwrap();
        f.run_primitive(Primitive::RFrom).unwrap();
        assert_eq!(f.pop().unwrap(), 7);
        assert_eq!(f.rp, rp0);
    }

    #[test]
    fn next_counter_exits_below_zero() {
        let mut f = forth();
        // Counter 1: the first pass takes the loop branch.
        f.rpush(1).unwrap();
        f.ip = 0x60;
        f.write_cell(0x60, 0x90).unwrap();
        f.write_cell(0x90, 0).unwrap();
        f.run_primitive(Primitive::DoNext).unwrap();
        assert_eq!(f.read_cell(f.rp).unwrap(), 0);

        // Counter 0: decrements to -1 and takes the exit branch.
        let rp = f.rp;
        f.ip = 0x60;
        f.run_primitive(Primitive::DoNext).unwrap();
        assert_eq!(f.rp, rp + 2);
        assert_eq!(f.read_cell(rp).unwrap(), 0xFFFF);
    }
}
