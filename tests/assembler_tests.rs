// Tests of the meta-assembler: directives, flag bits, labels, inline
// strings, and the user-variable template.

mod common;

use common::{forth, forth_with, run_word};
use eforth16::vm::{CELLL, COMPO, IMEDD, RPP, SPP, TIBB, UPP};

#[test]
fn colon_directive_compiles_a_runnable_word() {
    let (mut f, _out) = forth();
    f.assemble(
        "
;   doTEN - a testing routine

        $COLON  COMPO+5,'doTEN',DOTEN
        DW      DOLIT,99,EXIT
",
    );
    assert!(f.diagnostics.is_empty(), "{:?}", f.diagnostics);

    // The length-flag byte of the newest header carries the compile-only
    // bit and the name length.
    let flag = f.read_byte(f.last).unwrap() as u16;
    assert_eq!(flag & COMPO, COMPO);
    assert_eq!(flag & 0x1F, 5);

    run_word(&mut f, "doTEN");
    assert_eq!(f.pop().unwrap(), 99);
}

#[test]
fn imedd_prefix_sets_the_immediate_bit() {
    let (mut f, _out) = forth();
    f.assemble(
        "
        $COLON  IMEDD+5,'doTEN',DOTEN
        DW      DOLIT,99,EXIT
",
    );
    let flag = f.read_byte(f.last).unwrap() as u16;
    assert_eq!(flag & IMEDD, IMEDD);
    run_word(&mut f, "doTEN");
    assert_eq!(f.pop().unwrap(), 99);
}

#[test]
fn labels_resolve_forward_branches() {
    let (mut f, _out) = forth();
    f.assemble(
        "
        $COLON  8,'TESTQDUP',TQDUP
        DW      DUPP
        DW      QBRAN,TQDP1
        DW      DUPP
TQDP1:  DW      EXIT
",
    );
    assert!(f.diagnostics.is_empty(), "{:?}", f.diagnostics);

    f.push(0).unwrap();
    run_word(&mut f, "TESTQDUP");
    assert_eq!(f.pop().unwrap(), 0);

    f.push(4).unwrap();
    run_word(&mut f, "TESTQDUP");
    assert_eq!(f.pop().unwrap(), 4);
    assert_eq!(f.pop().unwrap(), 4);
}

#[test]
fn loop_counter_runs_the_body_count_plus_one_times() {
    let (mut f, _out) = forth();
    f.assemble(
        "
        $COLON  7,'TCOUNT3',TCNT3
        DW      DOLIT,0,DOLIT,2,TOR
TCNT1:  DW      DOLIT,1,PLUS
        DW      DONXT,TCNT1
        DW      EXIT
",
    );
    assert!(f.diagnostics.is_empty(), "{:?}", f.diagnostics);
    run_word(&mut f, "TCOUNT3");
    // Indexes 2, 1 and 0 each run the body; -1 exits the loop.
    assert_eq!(f.pop().unwrap(), 3);
}

#[test]
fn inline_string_reaches_the_output_sink() {
    let (mut f, out) = forth_with("");
    f.assemble(
        "
        $COLON  6,'TGREET',TGREE
        D$      DOTQP,'gooood'
        DW      EXIT
",
    );
    assert!(f.diagnostics.is_empty(), "{:?}", f.diagnostics);
    // EMIT dispatches through the 'EMIT user vector; copy the boot
    // template up first, the way COLD does.
    run_word(
        &mut f,
        "doLIT UZERO doLIT UPP doLIT ULAST-UZERO CMOVE TGREET",
    );
    assert_eq!(out.contents(), "gooood");
}

#[test]
fn string_definitions_stay_cell_aligned() {
    let (mut f, _out) = forth();
    f.assemble(
        "
        $COLON  4,'TODD',TODD
        D$      DOTQP,' ok'
        DW      EXIT
        $COLON  5,'TAFTE',TAFTE
        DW      DOLIT,1,EXIT
",
    );
    assert!(f.diagnostics.is_empty(), "{:?}", f.diagnostics);
    // The word laid down after an odd-length string still starts on a
    // cell boundary and runs.
    assert_eq!(f.addr("TAFTE").unwrap() % 2, 0);
    run_word(&mut f, "TAFTE");
    assert_eq!(f.pop().unwrap(), 1);
}

#[test]
fn user_template_holds_the_boot_values() {
    let (f, _out) = forth();
    // The template at address zero is what COLD copies to the user area:
    // four reserved cells, then SP0, RP0 and the I/O vectors.
    assert_eq!(f.read_cell(8).unwrap(), SPP);
    assert_eq!(f.read_cell(10).unwrap(), RPP);
    assert_eq!(f.read_cell(12).unwrap(), f.addr("?RX").unwrap());
    assert_eq!(f.read_cell(14).unwrap(), f.addr("TX!").unwrap());
    assert_eq!(f.read_cell(16).unwrap(), f.addr("accept").unwrap());
    assert_eq!(f.read_cell(18).unwrap(), f.addr("kTAP").unwrap());
    assert_eq!(f.read_cell(22).unwrap(), f.addr(".OK").unwrap());
    assert_eq!(f.read_cell(24).unwrap(), 10); // BASE
    assert_eq!(f.read_cell(34).unwrap(), TIBB);
    assert_eq!(f.read_cell(38).unwrap(), f.addr("$INTERPRET").unwrap());
    assert_eq!(f.read_cell(40).unwrap(), f.addr("NUMBER?").unwrap());
    assert_eq!(f.addr("ULAST-UZERO").unwrap(), 74);
}

#[test]
fn user_variables_reserve_their_extra_cells() {
    let (f, _out) = forth();
    // Offsets compiled into the user words: SP0 at the first slot after
    // the reserved cells, CSP right after #TIB's extra cell, CP after
    // CONTEXT's vocabulary stack and CURRENT's link cell.
    for (word, offset) in [("SP0", 8u16), ("#TIB", 32), ("CSP", 36), ("CONTEXT", 46), ("CP", 68)] {
        let ca = f.addr(word).unwrap();
        assert_eq!(
            f.read_cell(ca + 3 * CELLL).unwrap(),
            offset,
            "{word} offset"
        );
    }
}

#[test]
fn user_word_pushes_its_live_address() {
    let (mut f, _out) = forth_with("");
    // Copy the template up the way COLD does, then SP0 must point into
    // the live user area and hold SPP.
    run_word(
        &mut f,
        "doLIT UZERO doLIT UPP doLIT ULAST-UZERO CMOVE SP0",
    );
    let a = f.pop().unwrap();
    assert_eq!(a, UPP + 8);
    assert_eq!(f.read_cell(a).unwrap(), SPP);
}
