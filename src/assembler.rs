// assembler.rs - the meta-assembler that turns the pseudo-assembly kernel
// listing into threaded code in the image.
//
// Directives:
//
//   $COLON n,'name',sym     open a colon definition (seeds CALLL, doLIST)
//   $USER  n,'name',sym     open a user-variable word (doUSER + offset)
//   LABEL:                  record a branch target inside the open body
//   DW tok,tok,...          append one cell per token
//   D$ tok,'text'           append a runtime token plus a counted string
//
// Tokens resolve through a classifier into a small tagged sum; a single
// emitter appends the classified item to the code list. Labels become
// placeholder cells that are back-patched once the body is complete, when
// every item's image offset is known.

use std::collections::HashMap;
use std::fmt;

use crate::errors::VmError;
use crate::vm::{Forth, BASEE, CELLL, CODEE, COMPO, IMEDD, RPP, SPP, TIBB, VOCSS};

/// A non-fatal assembly failure: the named definition was skipped and
/// does not exist in the image.
#[derive(Debug, Clone)]
pub struct AsmDiagnostic {
    pub word: String,
    pub detail: String,
}

impl fmt::Display for AsmDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skipped \"{}\": {}", self.word, self.detail)
    }
}

/// What a source token turned out to be.
enum Token {
    /// A known word, constant or alias: emit its cell value.
    Word(u16),
    /// An integer literal.
    Number(u16),
    /// A branch target inside the current body, by item index.
    Label(usize),
    /// A character literal 'x'.
    Char(u8),
    /// An inline counted string.
    Str(String),
}

fn classify(f: &Forth, tok: &str, labels: &HashMap<String, usize>) -> Result<Token, VmError> {
    if let Some(&value) = f.symbols.get(tok) {
        return Ok(Token::Word(value));
    }
    if let Some(value) = parse_number(tok) {
        return Ok(Token::Number(value));
    }
    if let Some(&index) = labels.get(tok) {
        return Ok(Token::Label(index));
    }
    if let Some(name) = f.aliases.get(tok) {
        return f
            .symbols
            .get(name)
            .map(|&value| Token::Word(value))
            .ok_or_else(|| VmError::Undefined(name.clone()));
    }
    if tok.len() == 3 && tok.starts_with('\'') && tok.ends_with('\'') {
        return Ok(Token::Char(tok.as_bytes()[1]));
    }
    if tok.len() > 3 && tok.starts_with('\'') && tok.ends_with('\'') {
        return Ok(Token::Str(tok[1..tok.len() - 1].to_string()));
    }
    Err(VmError::Undefined(tok.to_string()))
}

/// Decimal or 0x-prefixed hex, optionally negative; negatives are encoded
/// two's-complement into the cell.
fn parse_number(tok: &str) -> Option<u16> {
    let (negative, body) = match tok.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, tok),
    };
    let magnitude = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i32::from_str_radix(hex, 16).ok()?
    } else {
        body.parse::<i32>().ok()?
    };
    let value = if negative { -magnitude } else { magnitude };
    if (-0x8000..=0xFFFF).contains(&value) {
        Some(value as u16)
    } else {
        None
    }
}

/// One emitted item: a cell or a counted string, at a known image offset.
struct CodeItem {
    bytes: Vec<u8>,
    offset: u16,
    /// Index of the item this placeholder must point at, for labels.
    target: Option<usize>,
}

/// The body of one definition while it is being laid down.
struct CodeList {
    items: Vec<CodeItem>,
    start: u16,
}

impl CodeList {
    fn new(start: u16) -> Self {
        CodeList {
            items: Vec::new(),
            start,
        }
    }

    fn end(&self) -> u16 {
        match self.items.last() {
            Some(item) => item.offset + item.bytes.len() as u16,
            None => self.start,
        }
    }

    fn size(&self) -> u16 {
        self.end() - self.start
    }

    fn push_cell(&mut self, value: u16) {
        let offset = self.end();
        self.items.push(CodeItem {
            bytes: value.to_le_bytes().to_vec(),
            offset,
            target: None,
        });
    }

    fn push_label(&mut self, target: usize) {
        self.push_cell(0);
        if let Some(item) = self.items.last_mut() {
            item.target = Some(target);
        }
    }

    /// Counted string: length byte, characters, one zero pad byte when the
    /// total would otherwise leave the code pointer off a cell boundary.
    fn push_string(&mut self, text: &str) {
        let offset = self.end();
        let mut bytes = Vec::with_capacity(text.len() + 2);
        bytes.push(text.len() as u8);
        bytes.extend_from_slice(text.as_bytes());
        if bytes.len() % CELLL as usize != 0 {
            bytes.push(0);
        }
        self.items.push(CodeItem {
            bytes,
            offset,
            target: None,
        });
    }

    /// Back-patch every placeholder with its target's absolute offset.
    fn fix_labels(&mut self) -> Result<(), VmError> {
        let offsets: Vec<u16> = self.items.iter().map(|item| item.offset).collect();
        for item in &mut self.items {
            if let Some(target) = item.target {
                let offset = offsets
                    .get(target)
                    .copied()
                    .ok_or_else(|| VmError::Undefined(format!("label target {}", target)))?;
                item.bytes = offset.to_le_bytes().to_vec();
            }
        }
        Ok(())
    }

    fn write_into(&self, f: &mut Forth) -> Result<(), VmError> {
        for item in &self.items {
            for (i, byte) in item.bytes.iter().enumerate() {
                f.write_byte(item.offset + i as u16, *byte)?;
            }
        }
        Ok(())
    }
}

/// Resolve `words` and lay them down as a new definition named `name`.
/// Labels map token names to body item indexes recorded while parsing.
pub(crate) fn compile_words(
    f: &mut Forth,
    name: &str,
    words: &[String],
    labels: &HashMap<String, usize>,
    flags: u16,
) -> Result<(), VmError> {
    let start = CODEE + CELLL * f.cp_cells;
    let mut list = CodeList::new(start);
    for word in words {
        match classify(f, word, labels)? {
            Token::Word(value) | Token::Number(value) => list.push_cell(value),
            Token::Char(c) => list.push_cell(c as u16),
            Token::Label(target) => list.push_label(target),
            Token::Str(text) => list.push_string(&text),
        }
    }
    list.fix_labels()?;
    list.write_into(f)?;
    f.cp_cells += list.size() / CELLL;
    f.symbols.insert(name.to_string(), start);
    f.add_name(name, start, flags)
}

/// A definition whose body is still being collected.
struct Pending {
    name: String,
    words: Vec<String>,
    labels: HashMap<String, usize>,
    flags: u16,
}

impl Forth {
    /// Run the meta-assembler over a pseudo-assembly listing. Definitions
    /// that fail to resolve are skipped and recorded in `diagnostics`; the
    /// rest of the listing still assembles.
    pub fn assemble(&mut self, src: &str) {
        let mut pending: Option<Pending> = None;
        for line in src.lines() {
            let fields: Vec<&str> = line
                .split(|c: char| c == ' ' || c == '\t' || c == ',')
                .filter(|s| !s.is_empty())
                .collect();
            let toks: Vec<&str> = fields
                .iter()
                .take_while(|t| !t.starts_with(';'))
                .copied()
                .collect();

            let mut i = 0;
            while i < toks.len() {
                let tok = toks[i];
                i += 1;
                match tok {
                    "$COLON" => {
                        self.finish_definition(&mut pending);
                        let (Some(name), Some(&sym)) = (quoted_name(line), toks.last()) else {
                            self.diagnostics.push(AsmDiagnostic {
                                word: line.trim().to_string(),
                                detail: "malformed $COLON".into(),
                            });
                            break;
                        };
                        let mut flags = 0;
                        if line.contains("COMPO+") {
                            flags |= COMPO;
                        }
                        if line.contains("IMEDD+") {
                            flags |= IMEDD;
                        }
                        self.aliases.insert(sym.to_string(), name.clone());
                        pending = Some(Pending {
                            name,
                            words: vec!["CALLL".into(), "doLIST".into()],
                            labels: HashMap::new(),
                            flags,
                        });
                        break;
                    }
                    "$USER" => {
                        self.finish_definition(&mut pending);
                        let (Some(&quoted), Some(&sym)) = (toks.get(i + 1), toks.get(i + 2))
                        else {
                            self.diagnostics.push(AsmDiagnostic {
                                word: line.trim().to_string(),
                                detail: "malformed $USER".into(),
                            });
                            break;
                        };
                        let Some(name) = quoted.get(1..quoted.len().saturating_sub(1)) else {
                            self.diagnostics.push(AsmDiagnostic {
                                word: line.trim().to_string(),
                                detail: "malformed $USER name".into(),
                            });
                            break;
                        };
                        let name = name.to_string();
                        self.aliases.insert(sym.to_string(), name.clone());
                        let offset = self.user_offset;
                        self.user_offset += CELLL;
                        if let Some(&extra) = self.user_extras.get(&name) {
                            self.user_offset += extra * CELLL;
                        }
                        pending = Some(Pending {
                            name,
                            words: vec![
                                "CALLL".into(),
                                "doLIST".into(),
                                "doUSER".into(),
                                offset.to_string(),
                            ],
                            labels: HashMap::new(),
                            flags: 0,
                        });
                        break;
                    }
                    "DW" => {
                        if let Some(p) = pending.as_mut() {
                            p.words.extend(toks[i..].iter().map(|t| t.to_string()));
                        }
                        break;
                    }
                    "D$" => {
                        if let (Some(p), Some(&action), Some(text)) =
                            (pending.as_mut(), toks.get(i), quoted_span(line))
                        {
                            p.words.push(action.to_string());
                            p.words.push(text);
                        }
                        break;
                    }
                    label if label.ends_with(':') && i == 1 => {
                        if let Some(p) = pending.as_mut() {
                            p.labels
                                .insert(label[..label.len() - 1].to_string(), p.words.len());
                        }
                    }
                    // anything else on the line is host-side bookkeeping,
                    // e.g. the _USER adjustments covered by user_extras
                    _ => {}
                }
            }
        }
        self.finish_definition(&mut pending);
    }

    fn finish_definition(&mut self, pending: &mut Option<Pending>) {
        let Some(p) = pending.take() else {
            return;
        };
        if let Err(e) = compile_words(self, &p.name, &p.words, &p.labels, p.flags) {
            self.diagnostics.push(AsmDiagnostic {
                word: p.name,
                detail: e.to_string(),
            });
        }
        if let Err(e) = self.init_user_area() {
            self.diagnostics.push(AsmDiagnostic {
                word: "UZERO".into(),
                detail: e.to_string(),
            });
        }
    }

    /// Rebuild the user-variable initial-value template at address 0 and
    /// refresh the UZERO / ULAST-UZERO constants. COLD block-copies this
    /// template into the live user area. Vectors that are not defined yet
    /// stay zero; the template written after the last definition closes is
    /// the one the image boots with.
    pub(crate) fn init_user_area(&mut self) -> Result<(), VmError> {
        let lookup = |f: &Forth, name: &str| f.symbols.get(name).copied().unwrap_or(0);
        let qrx = lookup(self, "?RX");
        let txsto = lookup(self, "TX!");
        let accep = lookup(self, "accept");
        let ktap = lookup(self, "kTAP");
        let dotok = lookup(self, ".OK");
        let inter = lookup(self, "$INTERPRET");
        let numbq = lookup(self, "NUMBER?");
        let ctop = CODEE + CELLL * self.cp_cells;

        let mut init: Vec<u16> = vec![
            0, 0, 0, 0, // reserved
            SPP,   // SP0
            RPP,   // RP0
            qrx,   // '?KEY
            txsto, // 'EMIT
            accep, // 'EXPECT
            ktap,  // 'TAP
            txsto, // 'ECHO
            dotok, // 'PROMPT
            BASEE, // BASE
            0,     // tmp
            0,     // SPAN
            0,     // >IN
            0,     // #TIB count
            TIBB,  // #TIB buffer address
            0,     // CSP
            inter, // 'EVAL
            numbq, // 'NUMBER
            0,     // HLD
            0,     // HANDLER
            0,     // CONTEXT
        ];
        init.extend(std::iter::repeat(0).take(VOCSS as usize)); // vocabulary stack
        init.extend([
            0,         // CURRENT
            0,         // vocabulary link
            ctop,      // CP
            self.np,   // NP
            self.last, // LAST
        ]);

        self.symbols.insert("UZERO".into(), 0);
        self.symbols
            .insert("ULAST-UZERO".into(), CELLL * init.len() as u16);
        for (i, value) in init.iter().enumerate() {
            self.write_cell(i as u16 * CELLL, *value)?;
        }
        Ok(())
    }
}

/// The text between the outermost pair of single (or, failing that,
/// double) quotes on a line.
fn quoted_name(line: &str) -> Option<String> {
    for quote in ['\'', '"'] {
        if let (Some(i), Some(j)) = (line.find(quote), line.rfind(quote)) {
            if i < j {
                return Some(line[i + 1..j].to_string());
            }
        }
    }
    None
}

/// The span from the first to the last single quote, inclusive.
fn quoted_span(line: &str) -> Option<String> {
    let i = line.find('\'')?;
    let j = line.rfind('\'')?;
    (i < j).then(|| line[i..=j].to_string())
}
