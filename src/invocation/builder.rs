// src/invocation/builder.rs
//! Turns a model snapshot plus an operation into a concrete engine run
//!
//! Argument order is fixed:
//!
//! ```text
//! [--json-stream] [aux .mpc] [operation flags] [run list]
//! ```

use crate::invocation::operation::{Operation, SolverOptions, JSON_STREAM_FLAG};
use crate::utils::errors::{ClientError, Result};
use crate::vfs::model::{probe_unused_name, FileEntry, Model};
use crate::vfs::path::normalize_relative;
use std::collections::BTreeMap;
use tracing::debug;

/// A positional file argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEntry {
    /// Staged by the transport, sandbox-relative
    Staged(String),
    /// Passed to the engine untouched
    Local(String),
}

/// Everything a transport needs to start one engine run
#[derive(Debug, Clone)]
pub struct Invocation {
    pub operation: Operation,

    /// Inline files to stage, keyed by normalised relative path
    pub files: BTreeMap<String, String>,

    /// Generated parameter file holding the solver options
    pub aux_file: Option<String>,

    pub flags: Vec<String>,

    pub run_list: Vec<RunEntry>,

    /// Files whose contents are returned with the exit event
    pub output_files: Vec<String>,

    pub json_stream: bool,
}

impl Invocation {
    /// An operation that needs no model (version, solvers, config dirs)
    pub fn standalone(operation: Operation) -> Self {
        Self {
            operation,
            files: BTreeMap::new(),
            aux_file: None,
            flags: operation.flags(None),
            run_list: vec![],
            output_files: vec![],
            json_stream: operation.is_streaming(),
        }
    }

    /// Snapshot `model` for `operation`.
    ///
    /// Fails with `PathTraversal` if a staged path escapes the sandbox root,
    /// and with `MissingContent` if a path-only file is used while
    /// `allow_local` is false. The model itself is never modified.
    pub fn for_model(
        model: &Model,
        operation: Operation,
        options: Option<&SolverOptions>,
        allow_local: bool,
    ) -> Result<Self> {
        let mut files = BTreeMap::new();
        let mut staged_names = BTreeMap::new();
        for (path, entry) in model.files() {
            if let FileEntry::Inline(contents) = entry {
                let normalized = normalize_relative(path)
                    .ok_or_else(|| ClientError::PathTraversal(path.clone()))?;
                files.insert(normalized.clone(), contents.clone());
                staged_names.insert(path.clone(), normalized);
            }
        }

        let mut run_list = Vec::with_capacity(model.run_list().len());
        for path in model.run_list() {
            match staged_names.get(path) {
                Some(normalized) => run_list.push(RunEntry::Staged(normalized.clone())),
                None if allow_local => run_list.push(RunEntry::Local(path.clone())),
                None => return Err(ClientError::MissingContent(path.clone())),
            }
        }

        // Generated names must miss both the staged paths and the raw
        // model keys, local files included
        let mut taken: BTreeMap<String, ()> = files.keys().map(|path| (path.clone(), ())).collect();
        taken.extend(model.files().keys().map(|path| (path.clone(), ())));

        let aux_file = match options {
            Some(options) => {
                let (name, _) = probe_unused_name(&taken, "_mzn_", ".mpc", model.counter());
                files.insert(name.clone(), serde_json::to_string(options)?);
                taken.insert(name.clone(), ());
                Some(name)
            }
            None => None,
        };

        let mut output_files = vec![];
        if operation == Operation::Compile {
            let (name, _) = probe_unused_name(&taken, "_fzn_", ".fzn", 0);
            output_files.push(name);
        }

        let invocation = Self {
            operation,
            flags: operation.flags(output_files.first().map(String::as_str)),
            files,
            aux_file,
            run_list,
            output_files,
            json_stream: operation.is_streaming(),
        };
        debug!(
            operation = operation.name(),
            files = invocation.files.len(),
            run_list = invocation.run_list.len(),
            "Built invocation"
        );
        Ok(invocation)
    }

    /// Final argument list; `resolve` maps a staged relative path to what
    /// the engine should see
    pub fn args(&self, resolve: impl Fn(&str) -> String) -> Vec<String> {
        let mut args = Vec::with_capacity(self.flags.len() + self.run_list.len() + 2);
        if self.json_stream {
            args.push(JSON_STREAM_FLAG.to_string());
        }
        if let Some(aux) = &self.aux_file {
            args.push(resolve(aux));
        }
        for flag in &self.flags {
            if self.output_files.contains(flag) {
                args.push(resolve(flag));
            } else {
                args.push(flag.clone());
            }
        }
        for entry in &self.run_list {
            match entry {
                RunEntry::Staged(path) => args.push(resolve(path)),
                RunEntry::Local(path) => args.push(path.clone()),
            }
        }
        args
    }

    /// FlatZinc target of a compile run
    pub fn compiled_output(&self) -> Option<&str> {
        match self.operation {
            Operation::Compile => self.output_files.first().map(String::as_str),
            _ => None,
        }
    }
}
