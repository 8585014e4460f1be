//! Instructions sent to the vision model, and cleanup of what comes back.

pub const RECOGNITION_PROMPT: &str = "\
You transcribe source code from screenshots.
Return only the code visible in the image, exactly as written, preserving \
indentation and line breaks. Do not explain, summarize or add commentary. \
If the image contains no code, return an empty response.";

pub const MERGE_PROMPT: &str = "\
You receive consecutive fragments of source code transcribed from an ordered \
series of screenshots. Adjacent screenshots often overlap.
Combine them into one coherent listing:
- remove lines duplicated across the boundary between consecutive fragments
- keep structural order: imports and headers first, then the body, then trailing members
- repair small syntax breakage caused by cut-off lines
- when the fragments clearly belong to different files, start each file with a line \
`// ===== FILE: <name> =====`
Return only the merged code, with no commentary.";

/// Delimits fragments in the merge request.
pub fn fragment_header(index: usize, total: usize) -> String {
    format!("----- FRAGMENT {} OF {} -----", index + 1, total)
}

/// Removes a Markdown code fence wrapped around the whole answer.
///
/// Models tend to reply with ```` ```rust ... ``` ```` even when asked not
/// to. Only a fence enclosing the entire text is stripped; fences in the
/// middle are left alone.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return text.to_string();
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text.to_string();
    };

    // drop the language tag line
    match body.split_once('\n') {
        Some((_tag, code)) => code.trim_end_matches('\n').to_string() + "\n",
        None => body.trim().to_string(),
    }
}
