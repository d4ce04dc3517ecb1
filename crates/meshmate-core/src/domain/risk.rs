//! Risk classification produced by the security validator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered danger level. `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!(
                "unknown severity '{other}' (expected low, medium, high or critical)"
            )),
        }
    }
}

/// A single triggered rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable rule identifier, e.g. `tool.shell-metacharacter`.
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    /// 1-based source line for script findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Finding {
    pub fn new(rule: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            severity,
            message: message.into(),
            line: None,
        }
    }

    #[must_use]
    pub const fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

/// Accumulated findings for one tool call or script.
///
/// The severity is always the maximum over the recorded findings, so it is
/// only reachable through [`RiskAssessment::record`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    severity: Severity,
    findings: Vec<Finding>,
}

impl RiskAssessment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, finding: Finding) {
        self.severity = self.severity.max(finding.severity);
        self.findings.push(finding);
    }

    pub fn extend(&mut self, other: Self) {
        for finding in other.findings {
            self.record(finding);
        }
    }

    pub const fn severity(&self) -> Severity {
        self.severity
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Identifiers of every triggered rule, deduplicated in first-seen order.
    pub fn triggered_rules(&self) -> Vec<&str> {
        let mut rules: Vec<&str> = Vec::new();
        for finding in &self.findings {
            if !rules.contains(&finding.rule.as_str()) {
                rules.push(&finding.rule);
            }
        }
        rules
    }

    /// Human-readable warnings, one per finding.
    pub fn warnings(&self) -> Vec<String> {
        self.findings
            .iter()
            .map(|f| match f.line {
                Some(line) => format!("line {line}: {}", f.message),
                None => f.message.clone(),
            })
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn has_rule(&self, rule: &str) -> bool {
        self.findings.iter().any(|f| f.rule == rule)
    }

    /// Whether a caller using `threshold` should refuse the action.
    pub fn exceeds(&self, threshold: Severity) -> bool {
        self.severity >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("extreme".parse::<Severity>().is_err());
    }

    #[test]
    fn test_empty_assessment_is_low() {
        let assessment = RiskAssessment::new();
        assert_eq!(assessment.severity(), Severity::Low);
        assert!(assessment.is_clean());
        assert!(assessment.triggered_rules().is_empty());
    }

    #[test]
    fn test_severity_is_max_of_findings() {
        let mut assessment = RiskAssessment::new();
        assessment.record(Finding::new("a", Severity::Medium, "m"));
        assessment.record(Finding::new("b", Severity::Critical, "c").at_line(3));
        assessment.record(Finding::new("a", Severity::Low, "l"));

        assert_eq!(assessment.severity(), Severity::Critical);
        assert_eq!(assessment.triggered_rules(), vec!["a", "b"]);
        assert_eq!(assessment.warnings()[1], "line 3: c");
        assert!(assessment.exceeds(Severity::High));
    }

    #[test]
    fn test_serde_keeps_severity() {
        let mut assessment = RiskAssessment::new();
        assessment.record(Finding::new("x", Severity::High, "bad"));
        let json = serde_json::to_value(&assessment).unwrap();
        assert_eq!(json["severity"], "high");
        let back: RiskAssessment = serde_json::from_value(json).unwrap();
        assert_eq!(back, assessment);
    }
}
