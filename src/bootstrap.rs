// bootstrap.rs - builds the boot image: registers the assembler constants
// and the classic eForth symbol aliases, then assembles the high-level
// kernel into the dictionary.

use crate::errors::VmError;
use crate::vm::{
    Forth, BASEE, CALLL, CELLL, CODEE, COLDD, COMPO, EM, IMEDD, MASKK, NAMEE, RPP, SPP, TIBB,
    UPP, VERSION, VOCSS,
};

/// The complete high-level kernel, in meta-assembler form.
pub const KERNEL: &str = include_str!("kernel.asm");

/// Constants the kernel listing refers to by name.
const CONSTANTS: &[(&str, u16)] = &[
    ("UPP", UPP),
    ("CELLL", CELLL),
    ("0-CELLL", 0u16.wrapping_sub(CELLL)),
    ("CRR", 13),
    ("ERR", 27),
    ("BASEE", BASEE),
    ("VOCSS", VOCSS),
    ("MASKK", MASKK),
    ("LF", 10),
    ("BKSPP", 8),
    ("TIC", 39),
    ("COMPO", COMPO),
    ("IMEDD", IMEDD),
    ("TIBB", TIBB),
    ("RPP", RPP),
    ("EM", EM),
    ("COLDD", COLDD),
    ("SPP", SPP),
    ("NAMEE", NAMEE),
    ("CODEE", CODEE),
    ("CALLL", CALLL),
    ("VERSION", VERSION),
];

/// Classic eForth assembly symbols for the primitive words.
const ALIASES: &[(&str, &str)] = &[
    ("QRX", "?RX"),
    ("TXSTO", "TX!"),
    ("STOIO", "!IO"),
    ("DOLIT", "doLIT"),
    ("DOLST", "doLIST"),
    ("_EXIT", "EXIT"),
    ("EXECU", "EXECUTE"),
    ("DONXT", "next"),
    ("QBRAN", "?branch"),
    ("BRAN", "branch"),
    ("STORE", "!"),
    ("AT", "@"),
    ("CSTOR", "C!"),
    ("CAT", "C@"),
    ("RPAT", "RP@"),
    ("RPSTO", "RP!"),
    ("RFROM", "R>"),
    ("RAT", "R@"),
    ("TOR", ">R"),
    ("SPAT", "SP@"),
    ("SPSTO", "SP!"),
    ("DROP", "DROP"),
    ("DUPP", "DUP"),
    ("SWAP", "SWAP"),
    ("OVER", "OVER"),
    ("ZLESS", "0<"),
    ("ANDD", "AND"),
    ("ORR", "OR"),
    ("XORR", "XOR"),
    ("UPLUS", "UM+"),
];

/// User variables that reserve extra cells beyond their own, in cells.
const USER_EXTRAS: &[(&str, u16)] = &[
    ("#TIB", 1),         // buffer address cell
    ("CONTEXT", VOCSS),  // vocabulary search-order stack
    ("CURRENT", 1),      // vocabulary link cell
];

/// Install the constant, alias and reserved-cell tables. Runs once per
/// machine, before anything is assembled.
pub fn install_symbols(forth: &mut Forth) {
    for (name, value) in CONSTANTS {
        forth.symbols.insert((*name).to_string(), *value);
    }
    for (sym, word) in ALIASES {
        forth.aliases.insert((*sym).to_string(), (*word).to_string());
    }
    for (name, cells) in USER_EXTRAS {
        forth.user_extras.insert((*name).to_string(), *cells);
    }
}

/// Assemble the kernel into the dictionary. Any definition the assembler
/// had to skip ends up in `forth.diagnostics`.
pub fn build_image(forth: &mut Forth) -> Result<(), VmError> {
    forth.assemble(KERNEL);
    Ok(())
}
