// src/invocation/operation.rs
//! Engine operations and their command-line flags

use serde_json::{Map, Value};

/// Parameter-file options (`.mpc` format): flag name to value, `true`
/// meaning a bare flag
pub type SolverOptions = Map<String, Value>;

/// Flag forcing one JSON object per stdout line
pub const JSON_STREAM_FLAG: &str = "--json-stream";

/// What a run asks the engine to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Type-check only
    Check,
    /// Report inputs, outputs and solve method
    Interface,
    /// Flatten to FlatZinc
    Compile,
    /// Solve, always with intermediate solutions
    Solve { json_output: bool },
    Version,
    Solvers,
    /// Configuration directories (stdlib location)
    ConfigDirs,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Check => "check",
            Operation::Interface => "interface",
            Operation::Compile => "compile",
            Operation::Solve { .. } => "solve",
            Operation::Version => "version",
            Operation::Solvers => "solvers",
            Operation::ConfigDirs => "config-dirs",
        }
    }

    /// Operation flags; `output` is the FlatZinc target of a compile
    pub fn flags(&self, output: Option<&str>) -> Vec<String> {
        let flags: Vec<&str> = match self {
            Operation::Check => vec!["--model-check-only"],
            Operation::Interface => vec!["-c", "--model-interface-only"],
            Operation::Compile => {
                let mut flags = vec!["-c", "--fzn"];
                flags.extend(output);
                flags
            }
            Operation::Solve { json_output: true } => vec!["-i", "--output-mode", "json"],
            Operation::Solve { json_output: false } => vec!["-i"],
            Operation::Version => vec!["--version"],
            Operation::Solvers => vec!["--solvers-json"],
            Operation::ConfigDirs => vec!["--config-dirs"],
        };
        flags.into_iter().map(str::to_string).collect()
    }

    /// Whether stdout carries the JSON line protocol
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            Operation::Check | Operation::Interface | Operation::Compile | Operation::Solve { .. }
        )
    }

    /// Exclusive runs never hand their context back to the pool
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Operation::Compile | Operation::Solve { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        assert_eq!(Operation::Check.flags(None), ["--model-check-only"]);
        assert_eq!(Operation::Interface.flags(None), ["-c", "--model-interface-only"]);
        assert_eq!(Operation::Compile.flags(Some("_fzn_0.fzn")), ["-c", "--fzn", "_fzn_0.fzn"]);
        assert_eq!(
            Operation::Solve { json_output: true }.flags(None),
            ["-i", "--output-mode", "json"]
        );
        assert_eq!(Operation::Solve { json_output: false }.flags(None), ["-i"]);
    }

    #[test]
    fn test_classification() {
        assert!(Operation::Solve { json_output: false }.is_exclusive());
        assert!(Operation::Compile.is_exclusive());
        assert!(!Operation::Check.is_exclusive());
        assert!(Operation::Interface.is_streaming());
        assert!(!Operation::Version.is_streaming());
        assert!(!Operation::ConfigDirs.is_streaming());
    }
}
