// File: src/errors.rs
//
// Error taxonomy and diagnostic formatting. Keeps the teacher's
// `colored`-based presentation and its Levenshtein "did you mean?" helper,
// repurposed here for suggesting a close global-variable name.

use colored::Colorize;
use std::fmt;

/// A single compile-time diagnostic, formatted as spec.md §6 requires:
/// `[line N] Error [at X]: MSG`.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub line: usize,
    /// The offending token's lexeme, or `None` to report "at end".
    pub at: Option<String>,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = match &self.at {
            Some(lexeme) if lexeme.is_empty() => "at end".to_string(),
            Some(lexeme) => format!("at '{}'", lexeme),
            None => "at end".to_string(),
        };
        write!(f, "[line {}] Error {}: {}", self.line, location, self.message)
    }
}

impl CompileError {
    pub fn print(&self) {
        eprintln!("{}", format!("{}", self).red());
    }
}

/// One frame of a runtime stack trace, newest first.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub line: usize,
    pub function_name: String,
}

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        for (i, frame) in self.trace.iter().enumerate() {
            let line = format!("[line {}] in {}", frame.line, frame.function_name);
            if i + 1 == self.trace.len() {
                write!(f, "{}", line)?;
            } else {
                writeln!(f, "{}", line)?;
            }
        }
        Ok(())
    }
}

impl RuntimeError {
    pub fn print(&self) {
        eprintln!("{}", format!("{}", self).red());
    }
}

#[derive(Debug)]
pub enum InterpretResult {
    Ok,
    CompileError(Vec<CompileError>),
    RuntimeError(RuntimeError),
}

impl InterpretResult {
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretResult::Ok => 0,
            InterpretResult::CompileError(_) => 65,
            InterpretResult::RuntimeError(_) => 70,
        }
    }
}

/// Levenshtein distance between two strings, used for "did you mean?"
/// suggestions on undefined-variable errors.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();
    let (len1, len2) = (s1_chars.len(), s2_chars.len());

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut matrix = vec![vec![0usize; len2 + 1]; len1 + 1];
    for (i, row) in matrix.iter_mut().enumerate().take(len1 + 1) {
        row[0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if s1_chars[i - 1] == s2_chars[j - 1] { 0 } else { 1 };
            matrix[i][j] = std::cmp::min(
                std::cmp::min(matrix[i - 1][j] + 1, matrix[i][j - 1] + 1),
                matrix[i - 1][j - 1] + cost,
            );
        }
    }

    matrix[len1][len2]
}

/// Finds the closest candidate to `target` by Levenshtein distance, capped
/// at distance 3 so wildly unrelated names aren't suggested.
pub fn find_closest_match<'a>(target: &str, candidates: &'a [String]) -> Option<&'a str> {
    let mut best: Option<(&str, usize)> = None;
    for candidate in candidates {
        let distance = levenshtein_distance(target, candidate);
        if distance <= 3 && best.as_ref().map(|(_, d)| distance < *d).unwrap_or(true) {
            best = Some((candidate.as_str(), distance));
        }
    }
    best.map(|(s, _)| s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_compile_error_at_token() {
        let err =
            CompileError { line: 3, at: Some("+".to_string()), message: "Expect expression.".into() };
        assert_eq!(format!("{}", err), "[line 3] Error at '+': Expect expression.");
    }

    #[test]
    fn formats_compile_error_at_end() {
        let err = CompileError { line: 5, at: Some(String::new()), message: "Unexpected EOF.".into() };
        assert_eq!(format!("{}", err), "[line 5] Error at end: Unexpected EOF.");
    }

    #[test]
    fn runtime_error_prints_trace_newest_first() {
        let err = RuntimeError {
            message: "Undefined variable 'a'.".into(),
            trace: vec![
                TraceFrame { line: 2, function_name: "inner".into() },
                TraceFrame { line: 5, function_name: "script".into() },
            ],
        };
        let text = format!("{}", err);
        let inner_pos = text.find("in inner").unwrap();
        let script_pos = text.find("in script").unwrap();
        assert!(inner_pos < script_pos);
    }

    #[test]
    fn suggests_close_match() {
        let candidates = vec!["count".to_string(), "total".to_string()];
        assert_eq!(find_closest_match("coutn", &candidates), Some("count"));
        assert_eq!(find_closest_match("zzzzzzzz", &candidates), None);
    }
}
