//! Follow-up extraction — a regex-free scanner, deliberately imprecise (spec
//! §4.5 / Design Notes): case-insensitive prefix match, capture to the next
//! newline or period.

const PREFIXES: &[&str] = &["next step:", "follow-up:", "then:", "create task:"];

/// Returns every capture longer than 5 characters, trimmed.
pub fn extract_follow_ups(output: &str) -> Vec<String> {
    let lower = output.to_lowercase();
    let mut captures = Vec::new();

    for prefix in PREFIXES {
        let mut search_from = 0;
        while let Some(rel_idx) = lower[search_from..].find(prefix) {
            let start = search_from + rel_idx + prefix.len();
            let rest = &output[start..];
            let end = rest
                .find(['\n', '.'])
                .map(|i| start + i)
                .unwrap_or(output.len());
            let capture = output[start..end].trim().to_string();
            if capture.len() > 5 {
                captures.push(capture);
            }
            search_from = end.max(start + 1);
            if search_from >= output.len() {
                break;
            }
        }
    }
    captures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_single_prefix() {
        let out = "All done.\nNext step: deploy the service to staging.\nThanks!";
        let caps = extract_follow_ups(out);
        assert_eq!(caps, vec!["deploy the service to staging".to_string()]);
    }

    #[test]
    fn test_case_insensitive_match() {
        let out = "FOLLOW-UP: review the PR before merging";
        let caps = extract_follow_ups(out);
        assert_eq!(caps, vec!["review the PR before merging".to_string()]);
    }

    #[test]
    fn test_ignores_short_captures() {
        let out = "then: ok";
        assert!(extract_follow_ups(out).is_empty());
    }

    #[test]
    fn test_multiple_prefixes_in_one_output() {
        let out = "Create task: write the changelog.\nThen: notify the team in chat";
        let caps = extract_follow_ups(out);
        assert_eq!(caps.len(), 2);
        assert!(caps.contains(&"write the changelog".to_string()));
        assert!(caps.contains(&"notify the team in chat".to_string()));
    }

    #[test]
    fn test_no_prefix_present() {
        assert!(extract_follow_ups("nothing interesting here").is_empty());
    }
}
