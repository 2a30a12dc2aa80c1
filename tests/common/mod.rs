// Shared helpers for the integration tests: an in-memory byte sink the
// test can read back after the machine has run, and a word runner that
// mirrors how the cold-start vector boots the inner interpreter.
#![allow(dead_code)]

use eforth16::vm::Forth;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// A cloneable sink; the clone handed to the machine and the handle kept
/// by the test share the same buffer.
#[derive(Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A full machine reading from `input`, with a readable output sink.
pub fn forth_with(input: &str) -> (Forth, SharedSink) {
    let sink = SharedSink::new();
    let forth = Forth::new(
        Box::new(io::Cursor::new(input.as_bytes().to_vec())),
        Box::new(sink.clone()),
    )
    .unwrap();
    (forth, sink)
}

/// A full machine with no input.
pub fn forth() -> (Forth, SharedSink) {
    forth_with("")
}

/// Wrap `words` in a throwaway colon definition ending in BYE and run it.
/// Arguments go on the stack before the call, results come off after.
pub fn run_word(f: &mut Forth, words: &str) {
    f.add_word(&format!(": trial {} BYE ;", words)).unwrap();
    f.execute("trial").unwrap();
}
