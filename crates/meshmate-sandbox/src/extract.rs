//! Fenced code-block extraction from assistant replies.

use std::sync::LazyLock;

use regex::Regex;

/// Fence tags treated as runnable script. An untagged fence counts too.
pub const SCRIPT_LANGUAGES: &[&str] = &["rhai", "rust", "js", "javascript"];

static FENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    match Regex::new(r"(?ms)^[ \t]*```[ \t]*([A-Za-z0-9_+-]*)[^\n]*\n(.*?)^[ \t]*```") {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::error!(error = %e, "Code fence pattern failed to compile");
            None
        }
    }
});

/// One fenced block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Lowercased fence tag; `None` when untagged.
    pub language: Option<String>,
    pub code: String,
}

/// Pull runnable script blocks out of `text`, in order.
///
/// Blocks tagged with a language outside [`SCRIPT_LANGUAGES`] are skipped.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    let Some(fence) = FENCE.as_ref() else {
        return Vec::new();
    };

    fence
        .captures_iter(text)
        .filter_map(|caps| {
            let tag = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
            let code = caps.get(2).map_or("", |m| m.as_str()).trim_end().to_string();
            if code.trim().is_empty() {
                return None;
            }
            match tag.as_str() {
                "" => Some(CodeBlock {
                    language: None,
                    code,
                }),
                lang if SCRIPT_LANGUAGES.contains(&lang) => Some(CodeBlock {
                    language: Some(tag),
                    code,
                }),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_and_untagged_blocks() {
        let reply = "Here you go:\n```rhai\nlet x = 1;\nprint(x);\n```\nand also\n```\nprint(2);\n```\n";
        let blocks = extract_code_blocks(reply);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language.as_deref(), Some("rhai"));
        assert_eq!(blocks[0].code, "let x = 1;\nprint(x);");
        assert_eq!(blocks[1].language, None);
        assert_eq!(blocks[1].code, "print(2);");
    }

    #[test]
    fn test_other_languages_and_empty_blocks_skipped() {
        let reply = "```python\nimport os\n```\n```JS\nlet a = 1;\n```\n```\n\n```\n";
        let blocks = extract_code_blocks(reply);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language.as_deref(), Some("js"));
    }

    #[test]
    fn test_no_fences() {
        assert!(extract_code_blocks("just prose, no code").is_empty());
    }
}
