use std::io::Write;

/// Copy a failed target's captured output to stderr, ending on a newline.
pub fn print_captured(captured: &[u8]) {
    if captured.is_empty() {
        return;
    }
    let mut stderr = std::io::stderr().lock();
    let _ = stderr.write_all(captured);
    if !captured.ends_with(b"\n") {
        let _ = stderr.write_all(b"\n");
    }
    let _ = stderr.flush();
}
