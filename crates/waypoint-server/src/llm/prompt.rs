// crates/waypoint-server/src/llm/prompt.rs
// Composite prompt assembly for generation calls

/// Build the single prompt submitted to the inference service: optional
/// system preamble, then retrieved context in a fenced block, then the user
/// prompt.
pub fn compose_prompt(system: Option<&str>, context: Option<&str>, prompt: &str) -> String {
    let mut out = String::new();

    if let Some(system) = system
        && !system.trim().is_empty()
    {
        out.push_str(system.trim());
        out.push_str("\n\n");
    }

    if let Some(context) = context
        && !context.trim().is_empty()
    {
        out.push_str("Relevant context:\n```\n");
        out.push_str(context.trim());
        out.push_str("\n```\n\n");
    }

    out.push_str(prompt);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_only() {
        assert_eq!(compose_prompt(None, None, "hello"), "hello");
    }

    #[test]
    fn test_system_preamble_first() {
        let out = compose_prompt(Some("You are helpful."), None, "hello");
        assert!(out.starts_with("You are helpful.\n\n"));
        assert!(out.ends_with("hello"));
    }

    #[test]
    fn test_context_in_fenced_block() {
        let out = compose_prompt(None, Some("fact: water is wet"), "is water wet?");
        assert!(out.contains("Relevant context:\n```\nfact: water is wet\n```"));
        assert!(out.ends_with("is water wet?"));
    }

    #[test]
    fn test_empty_context_omitted() {
        let out = compose_prompt(Some("sys"), Some("   "), "q");
        assert!(!out.contains("Relevant context"));
    }

    #[test]
    fn test_full_ordering() {
        let out = compose_prompt(Some("sys"), Some("ctx"), "q");
        let sys = out.find("sys").unwrap();
        let ctx = out.find("Relevant context").unwrap();
        let q = out.find("q").unwrap();
        assert!(sys < ctx && ctx < q);
    }
}
