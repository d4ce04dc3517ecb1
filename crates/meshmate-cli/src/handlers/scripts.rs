//! `check` and `run`.

use std::fs;
use std::io::Read;

use anyhow::{Context, Result};
use meshmate::{CoreHandle, ExecutionOutcome};
use meshmate_sandbox::extract_code_blocks;

use crate::commands::ScriptSource;
use crate::error::CliError;

pub fn check(handle: &CoreHandle, source: &ScriptSource) -> Result<()> {
    let script = load(source)?;
    let risk = handle.check_script(&script);

    println!("Risk level: {}", risk.severity());
    for finding in risk.findings() {
        match finding.line {
            Some(line) => println!(
                "  [{}] line {line}: {} ({})",
                finding.severity, finding.message, finding.rule
            ),
            None => println!(
                "  [{}] {} ({})",
                finding.severity, finding.message, finding.rule
            ),
        }
    }

    let threshold = handle.settings().effective_script_block_threshold();
    if risk.exceeds(threshold) {
        println!("Would be blocked (threshold: {threshold}).");
        return Err(CliError::Execution {
            outcome: ExecutionOutcome::Blocked,
        }
        .into());
    }
    Ok(())
}

pub fn run(handle: &CoreHandle, source: &ScriptSource) -> Result<()> {
    let script = load(source)?;
    let result = handle.run_script(&script);
    print!("{result}");

    match result.outcome {
        ExecutionOutcome::Success => Ok(()),
        outcome => Err(CliError::Execution { outcome }.into()),
    }
}

/// Read the script text, pulling the first code block out of a reply when asked.
fn load(source: &ScriptSource) -> Result<String> {
    let text = match (&source.path, &source.code) {
        (_, Some(code)) => code.clone(),
        (Some(path), None) if path.as_os_str() == "-" => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("reading script from stdin")?;
            text
        }
        (Some(path), None) => {
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
        }
        (None, None) => {
            return Err(CliError::Arguments("give a script path, `-` or --code".into()).into());
        }
    };

    if source.from_reply {
        return Ok(select_block(&text)?);
    }
    Ok(text)
}

/// First runnable code block in an assistant reply.
pub fn select_block(reply: &str) -> Result<String, CliError> {
    extract_code_blocks(reply)
        .into_iter()
        .next()
        .map(|block| block.code)
        .ok_or_else(|| CliError::Arguments("the reply contains no runnable code block".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_select_block() {
        let reply = "Sure:\n```python\nprint(1)\n```\n```rhai\nprint(2);\n```\n";
        assert_eq!(select_block(reply).unwrap(), "print(2);");
        assert!(select_block("no code here").is_err());
    }

    #[test]
    fn test_load_from_file_and_reply() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "Here:\n```\nprint(\"hi\");\n```\n").unwrap();

        let raw = load(&ScriptSource {
            path: Some(file.path().to_path_buf()),
            code: None,
            from_reply: false,
        })
        .unwrap();
        assert!(raw.starts_with("Here:"));

        let block = load(&ScriptSource {
            path: Some(file.path().to_path_buf()),
            code: None,
            from_reply: true,
        })
        .unwrap();
        assert_eq!(block, "print(\"hi\");");
    }

    #[test]
    fn test_load_requires_a_source() {
        let err = load(&ScriptSource {
            path: None,
            code: None,
            from_reply: false,
        })
        .unwrap_err();
        assert!(err.downcast_ref::<CliError>().is_some());

        let missing = load(&ScriptSource {
            path: Some(PathBuf::from("/nonexistent/meshmate/script.rhai")),
            code: None,
            from_reply: false,
        });
        assert!(missing.is_err());
    }
}
