use std::io::BufRead;

/// Reads one answer line; only an exact `y` confirms.
pub fn confirm(mut input: impl BufRead) -> std::io::Result<bool> {
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim_end_matches(|c: char| c == '\r' || c == '\n') == "y")
}
