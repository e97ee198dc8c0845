// src/vfs/model.rs
//! The caller-owned model: a virtual file set plus the run list
//!
//! ```text
//! Model
//! ├─ files:    { "_mzn_0.mzn" => Inline("var 1..3: x;"), "data.dzn" => Local }
//! ├─ run_list: ["_mzn_0.mzn", "data.dzn"]   (positional engine arguments)
//! └─ counter:  1                            (next synthesized name)
//! ```

use serde::Serialize;
use std::collections::BTreeMap;

/// Extensions the engine accepts as positional arguments
pub const RUNNABLE_EXTENSIONS: [&str; 6] = [".mzn", ".mzc", ".dzn", ".json", ".mpc", ".fzn"];

/// One entry of the virtual file set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEntry {
    /// Text supplied by the caller
    Inline(String),

    /// Path registered without contents; the engine reads it itself
    Local,
}

impl FileEntry {
    pub fn contents(&self) -> Option<&str> {
        match self {
            FileEntry::Inline(text) => Some(text),
            FileEntry::Local => None,
        }
    }
}

/// A constraint model as a set of named files
#[derive(Debug, Clone, Default)]
pub struct Model {
    files: BTreeMap<String, FileEntry>,
    run_list: Vec<String>,
    counter: u64,
}

impl Model {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a snippet of model code as its own `.mzn` file.
    ///
    /// Returns the synthesized filename, which is what engine diagnostics
    /// will refer to.
    pub fn add_string(&mut self, model: impl Into<String>) -> String {
        let filename = self.next_name("_mzn_", ".mzn");
        self.add_file(filename.clone(), model, true);
        filename
    }

    /// Add a snippet of DZN data as its own `.dzn` file
    pub fn add_dzn_string(&mut self, dzn: impl Into<String>) -> String {
        let filename = self.next_name("_dzn_", ".dzn");
        self.add_file(filename.clone(), dzn, true);
        filename
    }

    /// Add JSON input data as its own `.json` file
    pub fn add_json<T: Serialize + ?Sized>(&mut self, data: &T) -> serde_json::Result<String> {
        let contents = serde_json::to_string(data)?;
        let filename = self.next_name("_json_", ".json");
        self.add_file(filename.clone(), contents, true);
        Ok(filename)
    }

    /// Store `contents` under `filename`, overwriting any previous entry.
    ///
    /// With `use_file` the file is also passed to the engine when its
    /// extension is runnable.
    pub fn add_file(&mut self, filename: impl Into<String>, contents: impl Into<String>, use_file: bool) {
        let filename = filename.into();
        self.files
            .insert(filename.clone(), FileEntry::Inline(contents.into()));
        self.enqueue(&filename, use_file);
    }

    /// Register a path without contents.
    ///
    /// An existing inline entry is kept and only enqueued. Otherwise the path
    /// is recorded as local: the subprocess transport hands it to the engine
    /// untouched, the sandboxed transport refuses it.
    pub fn add_local_file(&mut self, filename: impl Into<String>, use_file: bool) {
        let filename = filename.into();
        self.files
            .entry(filename.clone())
            .or_insert(FileEntry::Local);
        self.enqueue(&filename, use_file);
    }

    /// Files in the model, keyed by path
    pub fn files(&self) -> &BTreeMap<String, FileEntry> {
        &self.files
    }

    /// Paths passed to the engine, in insertion order
    pub fn run_list(&self) -> &[String] {
        &self.run_list
    }

    /// Next value of the name counter
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.files.contains_key(filename)
    }

    pub fn contents(&self, filename: &str) -> Option<&str> {
        self.files.get(filename).and_then(FileEntry::contents)
    }

    fn next_name(&mut self, prefix: &str, extension: &str) -> String {
        let (name, next) = probe_unused_name(&self.files, prefix, extension, self.counter);
        self.counter = next;
        name
    }

    fn enqueue(&mut self, filename: &str, use_file: bool) {
        if use_file && is_runnable(filename) && !self.run_list.iter().any(|f| f == filename) {
            self.run_list.push(filename.to_string());
        }
    }
}

/// Whether the engine accepts `filename` as a positional argument
pub fn is_runnable(filename: &str) -> bool {
    RUNNABLE_EXTENSIONS
        .iter()
        .any(|extension| filename.ends_with(extension))
}

/// Find `{prefix}{n}{extension}` not present in `taken`, starting at `start`.
///
/// Returns the name and the counter value following it.
pub fn probe_unused_name<V>(
    taken: &BTreeMap<String, V>,
    prefix: &str,
    extension: &str,
    start: u64,
) -> (String, u64) {
    let mut n = start;
    loop {
        let name = format!("{prefix}{n}{extension}");
        n += 1;
        if !taken.contains_key(&name) {
            return (name, n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_names() {
        let mut model = Model::new();
        assert_eq!(model.add_string("var 1..3: x;"), "_mzn_0.mzn");
        assert_eq!(model.add_dzn_string("y = 2;"), "_dzn_1.dzn");
        assert_eq!(model.add_json(&serde_json::json!({"y": 2})).unwrap(), "_json_2.json");
        assert_eq!(model.contents("_json_2.json"), Some(r#"{"y":2}"#));
        assert_eq!(model.run_list(), ["_mzn_0.mzn", "_dzn_1.dzn", "_json_2.json"]);
    }

    #[test]
    fn test_generated_name_skips_taken() {
        let mut model = Model::new();
        model.add_file("_mzn_0.mzn", "int: a;", true);
        model.add_file("_mzn_1.mzn", "int: b;", true);
        assert_eq!(model.add_string("int: c;"), "_mzn_2.mzn");
        assert_eq!(model.counter(), 3);
    }

    #[test]
    fn test_run_list_admission() {
        let mut model = Model::new();
        model.add_file("model.mzn", "var 1..3: x;", true);
        model.add_file("model.mzn", "var 1..4: x;", true);
        model.add_file("lib.mzn", "int: y;", false);
        model.add_file("notes.txt", "hello", true);
        model.add_file("opts.mpc", "{}", true);

        assert_eq!(model.run_list(), ["model.mzn", "opts.mpc"]);
        assert_eq!(model.contents("model.mzn"), Some("var 1..4: x;"));
        assert!(model.contains("lib.mzn"));
        assert!(model.contains("notes.txt"));
    }

    #[test]
    fn test_local_file_registration() {
        let mut model = Model::new();
        model.add_file("inline.mzn", "int: y;", false);
        model.add_local_file("inline.mzn", true);
        model.add_local_file("/data/instance.dzn", true);

        assert_eq!(model.contents("inline.mzn"), Some("int: y;"));
        assert_eq!(model.files().get("/data/instance.dzn"), Some(&FileEntry::Local));
        assert_eq!(model.run_list(), ["inline.mzn", "/data/instance.dzn"]);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = Model::new();
        original.add_file("test.mzn", "var 1..3: x; int: y;", true);

        let mut copy = original.clone();
        copy.add_json(&serde_json::json!({"y": 2})).unwrap();
        copy.add_file("test.mzn", "changed", true);

        original.add_json(&serde_json::json!({"y": 1})).unwrap();

        assert_eq!(original.contents("test.mzn"), Some("var 1..3: x; int: y;"));
        assert_eq!(copy.contents("test.mzn"), Some("changed"));
        assert_eq!(original.run_list().len(), 2);
        assert_eq!(copy.run_list().len(), 2);
        assert_eq!(original.contents(&copy.run_list()[1]), Some(r#"{"y":1}"#));
        assert_eq!(copy.contents(&copy.run_list()[1]), Some(r#"{"y":2}"#));
    }

    proptest! {
        #[test]
        fn prop_generated_names_never_collide(
            snippets in proptest::collection::vec(0u8..3, 1..40),
            preset in proptest::collection::vec(0u64..20, 0..10),
        ) {
            let mut model = Model::new();
            for n in &preset {
                model.add_file(format!("_mzn_{n}.mzn"), "", true);
            }

            let mut seen: HashSet<String> = model.files().keys().cloned().collect();
            for kind in snippets {
                let name = match kind {
                    0 => model.add_string("var bool: b;"),
                    1 => model.add_dzn_string("n = 1;"),
                    _ => model.add_json(&serde_json::json!({"n": 1})).unwrap(),
                };
                prop_assert!(seen.insert(name));
            }
        }
    }
}
