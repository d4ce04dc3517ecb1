//! Tool-call mode: name validation and argument scanning.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::domain::{Finding, RiskAssessment, Severity};
use crate::error::CoreError;

/// Longest accepted tool name.
pub const MAX_TOOL_NAME_LEN: usize = 100;

/// Characters that let a string break out of a shell argument.
pub const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '`', '$', '>', '<'];

struct PatternRule {
    id: &'static str,
    severity: Severity,
    pattern: &'static str,
    message: &'static str,
}

const ARGUMENT_RULES: &[PatternRule] = &[
    PatternRule {
        id: "tool.path-traversal",
        severity: Severity::Medium,
        pattern: r"(^|[\\/])\.\.([\\/]|$)",
        message: "path traversal",
    },
    PatternRule {
        id: "tool.sensitive-path",
        severity: Severity::High,
        pattern: r"(?i)(/etc/(passwd|shadow|sudoers)|~/\.ssh|\.ssh/|id_rsa|/proc/self|c:\\windows\\system32)",
        message: "sensitive system path",
    },
    PatternRule {
        id: "tool.code-injection",
        severity: Severity::High,
        pattern: r"(?i)(__import__|\bexec\s*\(|\beval\s*\(|\bsubprocess\b|\bos\.system\b|\bopen\s*\(|\bfile\s*\(|\binput\s*\(|\braw_input\s*\()",
        message: "code injection marker",
    },
    PatternRule {
        id: "tool.sql-injection",
        severity: Severity::High,
        pattern: r"(?i)('\s*or\s+'?\d+'?\s*=\s*'?\d+|;\s*drop\s+table\b|\bunion\s+(all\s+)?select\b)",
        message: "SQL injection marker",
    },
    PatternRule {
        id: "tool.markup-injection",
        severity: Severity::High,
        pattern: r"(?i)(<\s*script\b|javascript:)",
        message: "markup injection marker",
    },
    PatternRule {
        id: "tool.destructive-command",
        severity: Severity::Critical,
        pattern: r"(?i)(\brm\s+-[a-z]*(rf|fr)[a-z]*\b|\bmkfs(\.\w+)?\b|\bdd\s+if=|:\(\)\s*\{\s*:\|:&\s*\};:|\bshutdown\s+(-|now)|\bformat\s+[a-z]:|>\s*/dev/sd[a-z])",
        message: "destructive shell command",
    },
];

static COMPILED_RULES: LazyLock<Vec<(&'static PatternRule, Regex)>> = LazyLock::new(|| {
    ARGUMENT_RULES
        .iter()
        .filter_map(|rule| match Regex::new(rule.pattern) {
            Ok(regex) => Some((rule, regex)),
            Err(e) => {
                tracing::error!(rule = rule.id, error = %e, "Argument rule failed to compile");
                None
            }
        })
        .collect()
});

/// Check a qualified tool name: ASCII letters, digits, `.`, `_` and `-`.
pub fn validate_tool_name(name: &str) -> Result<(), CoreError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TOOL_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidToolName(name.to_string()))
    }
}

/// Scan every string in `arguments` (recursively) for dangerous patterns.
pub fn scan_arguments(arguments: &Value) -> RiskAssessment {
    let mut assessment = RiskAssessment::new();
    scan_value(arguments, "arguments", &mut assessment);
    assessment
}

fn scan_value(value: &Value, path: &str, assessment: &mut RiskAssessment) {
    match value {
        Value::String(text) => scan_string(text, path, assessment),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                scan_value(item, &format!("{path}[{index}]"), assessment);
            }
        }
        Value::Object(fields) => {
            for (key, field) in fields {
                scan_value(field, &format!("{path}.{key}"), assessment);
            }
        }
        _ => {}
    }
}

fn scan_string(text: &str, path: &str, assessment: &mut RiskAssessment) {
    let metacharacters: String = SHELL_METACHARACTERS
        .iter()
        .filter(|c| text.contains(**c))
        .collect();
    if !metacharacters.is_empty() {
        assessment.record(Finding::new(
            "tool.shell-metacharacter",
            Severity::Medium,
            format!("{path} contains shell metacharacters '{metacharacters}'"),
        ));
    }

    for (rule, regex) in COMPILED_RULES.iter() {
        if let Some(found) = regex.find(text) {
            assessment.record(Finding::new(
                rule.id,
                rule.severity,
                format!("{path} contains {}: '{}'", rule.message, found.as_str().trim()),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_all_rules_compile() {
        assert_eq!(COMPILED_RULES.len(), ARGUMENT_RULES.len());
    }

    #[test]
    fn test_tool_names() {
        assert!(validate_tool_name("blender.add_cube").is_ok());
        assert!(validate_tool_name("fs-tools.read_file.v2").is_ok());
        assert!(matches!(
            validate_tool_name("rm -rf"),
            Err(CoreError::InvalidToolName(_))
        ));
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name("tool;ls").is_err());
        assert!(validate_tool_name(&"a".repeat(101)).is_err());
        assert!(validate_tool_name(&"a".repeat(100)).is_ok());
    }

    #[test]
    fn test_every_shell_metacharacter_is_at_least_medium() {
        for c in SHELL_METACHARACTERS {
            let args = json!({"nested": {"list": ["safe", format!("name{c}suffix")]}});
            let assessment = scan_arguments(&args);
            assert!(
                assessment.severity() >= Severity::Medium,
                "metacharacter {c:?} was not flagged"
            );
            assert!(assessment.has_rule("tool.shell-metacharacter"));
        }
    }

    #[test]
    fn test_clean_arguments_are_low() {
        let assessment = scan_arguments(&json!({"name": "Cube", "size": 2, "tags": ["a", "b"]}));
        assert_eq!(assessment.severity(), Severity::Low);
        assert!(assessment.is_clean());
    }

    #[test]
    fn test_pattern_severities() {
        assert_eq!(
            scan_arguments(&json!({"path": "../../secrets"})).severity(),
            Severity::Medium
        );
        assert_eq!(
            scan_arguments(&json!({"path": "/etc/passwd"})).severity(),
            Severity::High
        );
        assert_eq!(
            scan_arguments(&json!({"code": "__import__('os')"})).severity(),
            Severity::High
        );
        assert_eq!(
            scan_arguments(&json!({"q": "' OR 1=1"})).severity(),
            Severity::High
        );
        assert_eq!(
            scan_arguments(&json!({"cmd": "rm -rf /"})).severity(),
            Severity::Critical
        );
    }

    #[test]
    fn test_finding_names_the_argument_path() {
        let assessment = scan_arguments(&json!({"files": ["ok", "../up"]}));
        assert!(assessment.findings()[0].message.starts_with("arguments.files[1]"));
    }
}
