//! Independent re-read of encoded output.
//!
//! Uses `wasmparser` rather than our own decoder, so a framing bug in the
//! encoder cannot be masked by a matching bug in the decoder. This is not
//! validation: function bodies and index bounds are not checked.

use wasmparser::{BinaryReaderError, Parser, Payload};

/// Walks the header, every section frame, and the import, memory, and export
/// entries of `bytes`.
pub fn check_framing(bytes: &[u8]) -> Result<(), BinaryReaderError> {
    for payload in Parser::new(0).parse_all(bytes) {
        match payload? {
            Payload::ImportSection(reader) => {
                for import in reader {
                    import?;
                }
            }
            Payload::MemorySection(reader) => {
                for memory in reader {
                    memory?;
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    export?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}
