//! Rule tables shared by the tool-call and script validators.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::Severity;

/// Modules a script may import by default: the host's scripting surface plus
/// side-effect-free utility modules.
pub const DEFAULT_ALLOWED_MODULES: &[&str] = &[
    // Host scripting surface
    "bpy", "bmesh", "mathutils", "bpy_extras", "gpu", "gpu_extras", "blf", "aud", "freestyle",
    "cycles", "scene",
    // Utilities
    "math", "random", "time", "datetime", "json", "re", "collections", "itertools",
    "functools", "operator", "typing", "enum", "dataclasses", "copy", "weakref", "decimal",
    "fractions", "statistics", "uuid", "string", "textwrap", "unicodedata", "codecs", "base64",
    "binascii", "struct", "array", "bisect", "heapq", "keyword", "reprlib",
];

/// Modules that are refused even if a policy lists them as allowed.
pub const RESTRICTED_MODULES: &[&str] = &[
    "os", "sys", "subprocess", "shutil", "glob", "pathlib", "tempfile", "io", "fs",
    "socket", "urllib", "urllib2", "urllib3", "requests", "http", "httplib", "ftplib", "smtplib",
    "telnetlib", "net", "threading", "multiprocessing", "concurrent", "asyncio", "process",
    "signal", "pty", "fcntl", "resource", "platform", "pickle", "marshal", "shelve", "ctypes",
    "cffi", "importlib", "imp", "inspect", "code", "codeop", "gc", "builtins", "__builtin__",
    "env",
];

/// Built-ins that evaluate code or reach names dynamically.
pub const DYNAMIC_EVAL_BUILTINS: &[&str] = &[
    "eval", "exec", "execfile", "compile", "__import__", "reload", "import_module", "globals",
    "locals", "vars", "getattr", "setattr", "delattr", "Fn", "call", "curry",
];

/// Reflection built-ins that are suspicious but cannot reach anything alone.
pub const INTROSPECTION_BUILTINS: &[&str] = &["dir", "hasattr", "is_def_fn", "is_def_var", "type_of"];

pub const FILESYSTEM_FUNCTIONS: &[&str] = &[
    "open", "file", "read_file", "write_file", "remove_file", "unlink", "rmdir", "mkdir",
    "makedirs", "removedirs", "rmtree", "listdir", "scandir", "walk", "chmod", "chown", "chdir",
    "copyfile", "copytree", "symlink",
];

pub const FILESYSTEM_MODULES: &[&str] = &["os", "shutil", "pathlib", "io", "fs", "glob", "tempfile"];

pub const NETWORK_FUNCTIONS: &[&str] = &[
    "socket", "urlopen", "urlretrieve", "http_get", "http_post", "fetch", "download",
    "create_connection",
];

pub const NETWORK_MODULES: &[&str] = &[
    "socket", "urllib", "urllib2", "urllib3", "requests", "http", "httplib", "ftplib", "smtplib",
    "telnetlib", "net",
];

pub const PROCESS_FUNCTIONS: &[&str] = &[
    "system", "popen", "spawn", "spawnl", "spawnv", "fork", "forkpty", "execv", "execve",
    "execvp", "execl", "kill", "killpg", "run_command", "shell",
];

/// Calls that wait on the host's standard input.
pub const STDIN_FUNCTIONS: &[&str] = &["input", "raw_input"];

pub const PROCESS_MODULES: &[&str] = &["subprocess", "multiprocessing", "pty", "process", "signal"];

/// A regex over a dotted call path (`bpy.ops.wm.quit_blender`) with a severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOperationRule {
    pub id: String,
    pub pattern: String,
    pub severity: Severity,
    pub message: String,
}

impl HostOperationRule {
    pub fn new(id: &str, pattern: &str, severity: Severity, message: &str) -> Self {
        Self {
            id: id.to_string(),
            pattern: pattern.to_string(),
            severity,
            message: message.to_string(),
        }
    }
}

/// Host operations that need attention even when every import is allowed.
pub fn default_host_rules() -> Vec<HostOperationRule> {
    vec![
        HostOperationRule::new(
            "host.quit",
            r"^bpy\.ops\.wm\.quit",
            Severity::Critical,
            "quits the host application",
        ),
        HostOperationRule::new(
            "host.reset",
            r"^bpy\.ops\.wm\.(read_factory_settings|read_homefile)",
            Severity::High,
            "resets the host session and discards unsaved work",
        ),
        HostOperationRule::new(
            "host.save-file",
            r"^bpy\.ops\.wm\.save",
            Severity::High,
            "writes project files to disk",
        ),
        HostOperationRule::new(
            "host.preferences",
            r"^bpy\.ops\.preferences\.",
            Severity::High,
            "changes host preferences or add-ons",
        ),
        HostOperationRule::new(
            "host.remove-data",
            r"^bpy\.data\.\w+\.remove$",
            Severity::High,
            "permanently removes data blocks",
        ),
        HostOperationRule::new(
            "host.delete",
            r"^bpy\.ops\.\w+\.delete",
            Severity::High,
            "deletes scene content",
        ),
        HostOperationRule::new(
            "host.open-file",
            r"^bpy\.ops\.wm\.open",
            Severity::Medium,
            "replaces the open project",
        ),
        HostOperationRule::new(
            "host.clear",
            r"\.clear$",
            Severity::Medium,
            "clears a collection",
        ),
    ]
}

/// Which imports a script may use and which host operations are flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPolicy {
    pub allowed_modules: BTreeSet<String>,
    pub restricted_modules: BTreeSet<String>,
    pub host_rules: Vec<HostOperationRule>,
}

impl Default for ScriptPolicy {
    fn default() -> Self {
        Self {
            allowed_modules: DEFAULT_ALLOWED_MODULES.iter().map(ToString::to_string).collect(),
            restricted_modules: RESTRICTED_MODULES.iter().map(ToString::to_string).collect(),
            host_rules: default_host_rules(),
        }
    }
}

impl ScriptPolicy {
    /// Add modules to the whitelist.
    #[must_use]
    pub fn allowing<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_modules
            .extend(modules.into_iter().map(Into::into));
        self
    }

    pub fn is_restricted(&self, module: &str) -> bool {
        self.restricted_modules.contains(module)
            || self.restricted_modules.contains(module_root(module))
    }

    /// A module is importable when it (or its root package) is allowed and
    /// neither is restricted.
    pub fn is_allowed(&self, module: &str) -> bool {
        !self.is_restricted(module)
            && (self.allowed_modules.contains(module)
                || self.allowed_modules.contains(module_root(module)))
    }
}

/// First segment of a module path: `os.path` and `os/path` both give `os`.
pub fn module_root(module: &str) -> &str {
    module
        .split(['.', '/', ':'])
        .next()
        .unwrap_or(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_membership() {
        let policy = ScriptPolicy::default();
        assert!(policy.is_allowed("math"));
        assert!(policy.is_allowed("bpy.ops"));
        assert!(!policy.is_allowed("os"));
        assert!(!policy.is_allowed("os.path"));
        assert!(!policy.is_allowed("numpy"));
        assert!(policy.is_restricted("subprocess"));
    }

    #[test]
    fn test_restricted_wins_over_allowed() {
        let policy = ScriptPolicy::default().allowing(["os", "numpy"]);
        assert!(!policy.is_allowed("os"));
        assert!(policy.is_allowed("numpy"));
    }

    #[test]
    fn test_module_root() {
        assert_eq!(module_root("os.path"), "os");
        assert_eq!(module_root("utils/helpers"), "utils");
        assert_eq!(module_root("scene"), "scene");
    }
}
