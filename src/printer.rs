//! Per-cursor printer chain: `open_printer`/
//! `close_printer` push/pop a stack of output sinks on the cursor;
//! `print` writes to the top one. Grounded on the design note's own
//! "model as a stack of output sinks... the sink is a simple trait with
//! `write(Reference)`" guidance rather than any single teacher file.

use crate::gc::Gc;
use crate::reference::Reference;
use crate::value::Data;

use crate::operators::number_to_string;

/// `+ Send` so a `Cursor` carrying an open printer chain can cross into a
/// `Scheduler`-spawned thread.
pub trait PrinterSink: std::fmt::Debug + Send {
    fn write(&mut self, text: &str);
}

/// The default sink: the process's standard output.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl PrinterSink for StdoutSink {
    fn write(&mut self, text: &str) {
        print!("{text}");
    }
}

/// A sink that buffers into memory, used by embedders that capture
/// output instead of inheriting the host's stdout, and by tests.
#[derive(Debug, Default)]
pub struct BufferSink {
    pub buffer: String,
}

impl PrinterSink for BufferSink {
    fn write(&mut self, text: &str) {
        self.buffer.push_str(text);
    }
}

/// Renders a Reference's Data for `print`,
/// delegating to each format's canonical string form.
pub fn render(gc: &Gc, reference: &Reference) -> String {
    match gc.get(reference.handle()) {
        Data::None => "none".to_string(),
        Data::Null => "null".to_string(),
        Data::Number(n) => number_to_string(*n),
        Data::Boolean(b) => b.to_string(),
        Data::Object(o) => o.as_string().map(|s| s.value.clone()).unwrap_or_else(|| format!("<{}>", o.class.0)),
        Data::Package(p) => p.name(),
        Data::Function(_) => "<function>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sink_accumulates_writes() {
        let mut sink = BufferSink::default();
        sink.write("a");
        sink.write("b");
        assert_eq!(sink.buffer, "ab");
    }
}
