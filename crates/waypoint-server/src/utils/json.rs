// crates/waypoint-server/src/utils/json.rs
// Hardened extraction of structured data from LLM output

use serde::de::DeserializeOwned;

/// Extract typed JSON from LLM output, tolerating prose and markdown wrapping.
///
/// Strategies, in order:
/// 1. direct parse of the trimmed content
/// 2. contents of the first fenced ```json / ``` block
/// 3. first balanced `{...}` or `[...]` region (bracket-depth scan)
///
/// Returns `Err` with a short diagnostic when none of the strategies yield
/// parseable JSON; callers treat that as a first-class outcome, not a bug.
pub fn extract_llm_json<T: DeserializeOwned>(content: &str) -> Result<T, String> {
    let trimmed = content.trim();

    if let Ok(v) = serde_json::from_str::<T>(trimmed) {
        return Ok(v);
    }

    if let Some(fenced) = fenced_block(trimmed)
        && let Ok(v) = serde_json::from_str::<T>(fenced)
    {
        return Ok(v);
    }

    if let Some(balanced) = balanced_region(trimmed)
        && let Ok(v) = serde_json::from_str::<T>(balanced)
    {
        return Ok(v);
    }

    Err(format!(
        "no parseable JSON in LLM output (tried direct, fenced, bracket-scan); starts: {:?}",
        excerpt(trimmed, 120)
    ))
}

/// Contents of the first markdown code fence, if any.
///
/// Unlike a prefix/suffix strip this finds a fence anywhere in the text, so
/// "Here is the plan:\n```json\n{...}\n```" works.
fn fenced_block(s: &str) -> Option<&str> {
    let open = s.find("```")?;
    let after = &s[open + 3..];
    // Skip the info string ("json", "JSON", or empty) up to the newline
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// First balanced `{...}` or `[...]` region, string- and escape-aware.
fn balanced_region(s: &str) -> Option<&str> {
    let start = s.find(['{', '['])?;
    let (open, close) = if s.as_bytes()[start] == b'{' {
        (b'{', b'}')
    } else {
        (b'[', b']')
    };

    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
        } else if in_string {
            match b {
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
        } else {
            match b {
                b'"' => in_string = true,
                _ if b == open => depth += 1,
                _ if b == close => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&s[start..=i]);
                    }
                }
                _ => {}
            }
        }
    }

    None
}

/// Truncate to at most `max` characters on a char boundary, appending an
/// ellipsis marker when anything was cut. Used to bound log excerpts.
pub fn excerpt(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}…")
}
