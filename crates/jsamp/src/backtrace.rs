use std::collections::HashMap;
use std::ffi::c_void;
use std::path::Path;

use crate::sample::StackFrame;

/// Turns captured frames into report lines.
///
/// Addresses are resolved at most once each; a report usually sees the same
/// few hundred addresses over and over.
#[derive(Debug, Default)]
pub struct Symbolizer {
    cache: HashMap<StackFrame, String>,
}

impl Symbolizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, frame: &StackFrame) -> String {
        match frame {
            StackFrame::Label(label) => label.clone(),
            StackFrame::Address(ip) => self
                .cache
                .entry(frame.clone())
                .or_insert_with(|| Self::resolve(*ip, *ip))
                .clone(),
            // resolve() steps back one byte from what it is given
            StackFrame::InstructionPointer(pc) => self
                .cache
                .entry(frame.clone())
                .or_insert_with(|| Self::resolve(*pc, pc.wrapping_add(1)))
                .clone(),
        }
    }

    // Inlined frames resolve to several symbols; keep the innermost one.
    fn resolve(ip: usize, lookup: usize) -> String {
        let mut name: Option<String> = None;
        let mut location: Option<String> = None;

        ::backtrace::resolve(lookup as *mut c_void, |symbol| {
            if name.is_some() {
                return;
            }
            name = symbol.name().map(|n| format!("{:#}", n));
            location = match (symbol.filename(), symbol.lineno()) {
                (Some(file), Some(line)) => Some(format!("{}:{}", file_name(file), line)),
                (Some(file), None) => Some(file_name(file).to_owned()),
                _ => None,
            };
        });

        let name = name.unwrap_or_else(|| format!("{:#x}", ip));
        let location = location.unwrap_or_else(|| "Unknown Source".to_owned());
        format!("{}({})", name, location)
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .or_else(|| path.to_str())
        .unwrap_or("?")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_rendered_verbatim() {
        let mut symbolizer = Symbolizer::new();
        let frame = StackFrame::Label("Worker.run(Worker.java:42)".to_owned());
        assert_eq!(symbolizer.render(&frame), "Worker.run(Worker.java:42)");
    }

    #[test]
    fn test_unknown_address() {
        let mut symbolizer = Symbolizer::new();
        // Nothing is mapped at the first page.
        let rendered = symbolizer.render(&StackFrame::Address(0x10));
        assert_eq!(rendered, "0x10(Unknown Source)");
    }

    #[inline(never)]
    fn known_function() -> usize {
        known_function as usize
    }

    #[test]
    fn test_resolves_own_function() {
        let mut symbolizer = Symbolizer::new();
        // +1 so that the return-address adjustment lands inside the function
        let rendered = symbolizer.render(&StackFrame::Address(known_function() + 1));
        assert!(rendered.contains("known_function"), "{}", rendered);
        assert!(rendered.ends_with(')'));

        // cached
        assert_eq!(symbolizer.cache.len(), 1);
        symbolizer.render(&StackFrame::Address(known_function() + 1));
        assert_eq!(symbolizer.cache.len(), 1);
    }

    #[test]
    fn test_interrupted_at_first_instruction() {
        let mut symbolizer = Symbolizer::new();
        let rendered = symbolizer.render(&StackFrame::InstructionPointer(known_function()));
        assert!(rendered.contains("known_function"), "{}", rendered);
    }

    #[test]
    fn test_unknown_instruction_pointer_keeps_its_address() {
        let mut symbolizer = Symbolizer::new();
        let rendered = symbolizer.render(&StackFrame::InstructionPointer(0x10));
        assert_eq!(rendered, "0x10(Unknown Source)");
    }
}
