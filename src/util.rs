//! Shared text helpers.

/// First balanced `{...}` span in a model answer.
///
/// Braces inside JSON string literals are ignored, so a reasoning string such
/// as `"use {fast} EMA"` does not end the object early.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip markdown code fences from generator output.
///
/// Prefers a ```` ```python ```` block, then the first generic fenced block,
/// and otherwise returns the trimmed input unchanged.
pub fn strip_code_fences(text: &str) -> String {
    if let Some(body) = fenced_body(text, "```python") {
        return body;
    }
    if let Some(body) = fenced_body(text, "```") {
        return body;
    }
    text.trim().to_string()
}

fn fenced_body(text: &str, opener: &str) -> Option<String> {
    let start = text.find(opener)? + opener.len();
    let rest = &text[start..];
    // Skip an info string such as "json" or "py" on the opening line.
    let rest = match rest.find('\n') {
        Some(nl) if opener == "```" && !rest[..nl].trim().contains(' ') => &rest[nl + 1..],
        _ => rest,
    };
    let body = match rest.find("```") {
        Some(end) => &rest[..end],
        None => rest,
    };
    Some(body.trim().to_string())
}

/// Truncate to at most `max_chars` characters, appending a marker when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...[truncated]");
    out
}

/// Keep the last `max_chars` characters. Tracebacks carry the useful part at the end.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    format!("[truncated]...{}", tail)
}
