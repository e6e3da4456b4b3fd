//! Fixed invocation templates per test engine
//!
//! Commands are argument vectors, never shell strings. The only caller-supplied
//! piece is the test file path, which is checked against an allow-listed
//! character set before it is placed in the vector.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestEngine {
    Jest,
    Mocha,
    Pytest,
    /// `sh <file>`; for generated shell checks
    Shell,
}

impl TestEngine {
    pub const ALL: [Self; 4] = [Self::Jest, Self::Mocha, Self::Pytest, Self::Shell];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Jest => "jest",
            Self::Mocha => "mocha",
            Self::Pytest => "pytest",
            Self::Shell => "shell",
        }
    }

    /// Program and arguments for running `test_file`. The path must already
    /// have passed [`validate_test_path`].
    #[must_use]
    pub fn command(self, test_file: &str) -> CommandSpec {
        let (program, args): (&str, Vec<&str>) = match self {
            Self::Jest => ("npx", vec!["jest", test_file, "--runInBand", "--verbose"]),
            Self::Mocha => ("npx", vec!["mocha", test_file]),
            Self::Pytest => ("python", vec!["-m", "pytest", test_file, "-v"]),
            Self::Shell => ("sh", vec![test_file]),
        };
        CommandSpec {
            program: program.to_string(),
            args: args.into_iter().map(str::to_string).collect(),
        }
    }
}

impl fmt::Display for TestEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown test engine `{s}`"))
    }
}

/// Program plus argument vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Program followed by its arguments
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone()).chain(self.args.iter().cloned()).collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// Accept only `[A-Za-z0-9_./-]`, with no leading `-` so the path can never
/// be read as an option.
///
/// # Errors
/// Reason the path was rejected
pub fn validate_test_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("test path is empty".into());
    }
    if path.starts_with('-') {
        return Err(format!("test path `{path}` starts with `-`"));
    }
    if let Some(bad) = path
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')))
    {
        return Err(format!("test path `{path}` contains disallowed character {bad:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn templates() {
        assert_eq!(
            TestEngine::Jest.command("tests/a.test.ts").argv(),
            vec!["npx", "jest", "tests/a.test.ts", "--runInBand", "--verbose"]
        );
        assert_eq!(TestEngine::Pytest.command("t/test_a.py").to_string(), "python -m pytest t/test_a.py -v");
        assert_eq!(TestEngine::Shell.command("check.sh").argv(), vec!["sh", "check.sh"]);
    }

    #[test]
    fn path_allow_list() {
        assert!(validate_test_path("tests/api/users.test.ts").is_ok());
        assert!(validate_test_path("a-b_c/D.spec.js").is_ok());
        for bad in ["", "-rf", "a b.ts", "x;rm -rf /", "$(id).ts", "a`b`.ts", "a|b", "ü.ts"] {
            assert!(validate_test_path(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn parse_engine() {
        assert_eq!("PyTest".parse::<TestEngine>().unwrap(), TestEngine::Pytest);
        assert!("ruby".parse::<TestEngine>().is_err());
    }
}
