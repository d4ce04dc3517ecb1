//! Script mode: static classification of a candidate script.

use regex::Regex;

use super::lexer::{CallSite, ScriptOutline, outline};
use super::rules::{
    DYNAMIC_EVAL_BUILTINS, FILESYSTEM_FUNCTIONS, FILESYSTEM_MODULES, HostOperationRule,
    INTROSPECTION_BUILTINS, NETWORK_FUNCTIONS, NETWORK_MODULES, PROCESS_FUNCTIONS,
    PROCESS_MODULES, STDIN_FUNCTIONS, ScriptPolicy, module_root,
};
use crate::domain::{Finding, RiskAssessment, Severity};

pub const RULE_PARSE_ERROR: &str = "script.parse-error";
pub const RULE_RESTRICTED_IMPORT: &str = "script.restricted-import";
pub const RULE_UNLISTED_IMPORT: &str = "script.unlisted-import";
pub const RULE_DYNAMIC_IMPORT: &str = "script.dynamic-import";
pub const RULE_DYNAMIC_EVAL: &str = "script.dynamic-eval";
pub const RULE_INTROSPECTION: &str = "script.introspection";
pub const RULE_FILESYSTEM: &str = "script.filesystem";
pub const RULE_NETWORK: &str = "script.network";
pub const RULE_PROCESS: &str = "script.process";
pub const RULE_STDIN: &str = "script.stdin";

pub(crate) struct CompiledHostRule {
    rule: HostOperationRule,
    regex: Regex,
}

pub(crate) fn compile_host_rules(rules: &[HostOperationRule]) -> Vec<CompiledHostRule> {
    rules
        .iter()
        .filter_map(|rule| match Regex::new(&rule.pattern) {
            Ok(regex) => Some(CompiledHostRule {
                rule: rule.clone(),
                regex,
            }),
            Err(e) => {
                tracing::warn!(rule = %rule.id, error = %e, "Skipping host rule with invalid pattern");
                None
            }
        })
        .collect()
}

pub(crate) fn assess(
    source: &str,
    policy: &ScriptPolicy,
    host_rules: &[CompiledHostRule],
) -> RiskAssessment {
    let mut assessment = RiskAssessment::new();

    let outline = match outline(source) {
        Ok(outline) => outline,
        Err(e) => {
            assessment.record(
                Finding::new(
                    RULE_PARSE_ERROR,
                    Severity::Critical,
                    format!("script could not be analyzed: {}", e.message),
                )
                .at_line(e.line),
            );
            return assessment;
        }
    };

    check_imports(&outline, policy, &mut assessment);
    for call in &outline.calls {
        check_call(call, &outline, &mut assessment);
        for compiled in host_rules {
            if compiled.regex.is_match(&call.path) {
                assessment.record(
                    Finding::new(
                        compiled.rule.id.clone(),
                        compiled.rule.severity,
                        format!("{}() {}", call.path, compiled.rule.message),
                    )
                    .at_line(call.line),
                );
            }
        }
    }

    assessment
}

fn check_imports(outline: &ScriptOutline, policy: &ScriptPolicy, assessment: &mut RiskAssessment) {
    for &line in &outline.dynamic_imports {
        assessment.record(
            Finding::new(
                RULE_DYNAMIC_IMPORT,
                Severity::High,
                "import path is computed at run time and cannot be checked",
            )
            .at_line(line),
        );
    }
    for import in &outline.imports {
        if policy.is_restricted(&import.module) {
            assessment.record(
                Finding::new(
                    RULE_RESTRICTED_IMPORT,
                    Severity::High,
                    format!("import of restricted module '{}'", import.module),
                )
                .at_line(import.line),
            );
        } else if !policy.is_allowed(&import.module) {
            assessment.record(
                Finding::new(
                    RULE_UNLISTED_IMPORT,
                    Severity::High,
                    format!("import of module '{}' outside the allowed list", import.module),
                )
                .at_line(import.line),
            );
        }
    }
}

fn check_call(call: &CallSite, outline: &ScriptOutline, assessment: &mut RiskAssessment) {
    let name = call.name.as_str();
    let receiver = call.receiver_root().map(module_root);
    let free = receiver.is_none();
    // A script may define its own `open` or `call`; only flag free calls that
    // are not declared locally.
    let builtin = free && !outline.functions.iter().any(|f| f == name);
    let in_modules = |modules: &[&str]| receiver.is_some_and(|r| modules.contains(&r));

    let finding = if builtin && DYNAMIC_EVAL_BUILTINS.contains(&name) {
        Some((
            RULE_DYNAMIC_EVAL,
            Severity::Critical,
            format!("dynamic evaluation via {name}()"),
        ))
    } else if builtin && INTROSPECTION_BUILTINS.contains(&name) {
        Some((
            RULE_INTROSPECTION,
            Severity::Medium,
            format!("introspection via {name}()"),
        ))
    } else if (builtin && PROCESS_FUNCTIONS.contains(&name))
        || in_modules(PROCESS_MODULES)
        || (receiver == Some("os") && is_os_process_call(name))
    {
        Some((
            RULE_PROCESS,
            Severity::High,
            format!("OS process operation {}()", call.path),
        ))
    } else if (builtin && FILESYSTEM_FUNCTIONS.contains(&name)) || in_modules(FILESYSTEM_MODULES) {
        Some((
            RULE_FILESYSTEM,
            Severity::High,
            format!("file system operation {}()", call.path),
        ))
    } else if (builtin && NETWORK_FUNCTIONS.contains(&name)) || in_modules(NETWORK_MODULES) {
        Some((
            RULE_NETWORK,
            Severity::High,
            format!("network operation {}()", call.path),
        ))
    } else if builtin && STDIN_FUNCTIONS.contains(&name) {
        Some((
            RULE_STDIN,
            Severity::Medium,
            format!("{name}() waits on standard input"),
        ))
    } else {
        None
    };

    if let Some((rule, severity, message)) = finding {
        assessment.record(Finding::new(rule, severity, message).at_line(call.line));
    }
}

fn is_os_process_call(name: &str) -> bool {
    PROCESS_FUNCTIONS.contains(&name) || name.starts_with("exec") || name.starts_with("spawn")
}
