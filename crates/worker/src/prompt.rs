//! Prompt template and completion fences
//!
//! The prompt ends with an opening code fence so the model's continuation
//! starts directly with code. [`normalize_completion`] strips the same
//! fences back off the generated text.

/// Opening fence the prompt ends with (without the trailing newline)
pub const FENCE_OPEN: &str = "```python";

/// Closing fence the model is expected to emit
pub const FENCE_CLOSE: &str = "```";

/// Wrap a problem statement in the bug-fix instruction template
///
/// Total and deterministic: an empty statement still yields a prompt.
pub fn format_prompt(problem_statement: &str) -> String {
    format!(
        "INSTRUCTION: You are an expert programmer. Rewrite the following code snippet to fix the bug described or inferred from the issue description. Only output the complete fixed code snippet.\n\
         \n\
         PROBLEM:\n\
         {problem_statement}\n\
         \n\
         FIXED CODE:\n\
         {FENCE_OPEN}\n"
    )
}

/// Prompt for an optional problem statement
///
/// Absent or blank statements yield no prompt; such tasks never reach
/// generation.
pub fn prompt_for(problem_statement: Option<&str>) -> Option<String> {
    match problem_statement {
        Some(statement) if !statement.trim().is_empty() => Some(format_prompt(statement)),
        _ => None,
    }
}

/// Clean raw model output
///
/// Trims whitespace, strips a leading opening fence and a trailing closing
/// fence, then trims again.
pub fn normalize_completion(raw: &str) -> String {
    let mut cleaned = raw.trim();
    if let Some(rest) = cleaned.strip_prefix(FENCE_OPEN) {
        cleaned = rest.trim();
    }
    if let Some(rest) = cleaned.strip_suffix(FENCE_CLOSE) {
        cleaned = rest.trim();
    }
    cleaned.trim().to_string()
}
