// src/testing.rs
//! Test doubles: a bookkeeping-only transport for pool tests and a scripted
//! engine module for end-to-end runs on the sandbox transport.
//!
//! The scripted engine understands a tiny subset of the modelling language:
//! one declaration per line (`int: y;`, `var 1..y: x;`), simple constraints
//! of the form `x > 2;` on a single variable, data from `.dzn` assignments
//! and `.json` objects, and `all-solutions` from a parameter file. A
//! `% slow` line makes it pause between solutions, `% panic` makes it panic
//! and `% whoami` makes it trace the name of the thread it runs on.

use crate::invocation::Invocation;
use crate::protocol::event::{Event, ExitEvent};
use crate::runtime::context::{ContextId, ExecutionContext, ReadyState, Readiness, Transport};
use crate::runtime::sandbox::{EngineModule, ModuleEnv, ModuleLoader};
use crate::utils::errors::{ClientError, Result};
use crate::vfs::MemFs;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// How fake contexts come up
#[derive(Debug, Clone, Default)]
pub enum Startup {
    #[default]
    Immediate,
    /// Stay `Starting` until `FakeTransport::finish_startup`
    Manual,
    Failing(String),
}

#[derive(Default)]
struct FakeState {
    startup: Startup,
    fail_creations: AtomicUsize,
    terminated: Mutex<Vec<ContextId>>,
    starters: Mutex<HashMap<ContextId, watch::Sender<ReadyState>>>,
}

/// Transport whose contexts run nothing and exit 0 immediately
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<FakeState>,
}

impl FakeTransport {
    pub fn with_startup(startup: Startup) -> Self {
        Self {
            state: Arc::new(FakeState {
                startup,
                ..Default::default()
            }),
        }
    }

    pub fn fail_next_creations(&self, count: usize) {
        self.state.fail_creations.store(count, Ordering::SeqCst);
    }

    pub fn terminated(&self) -> Vec<ContextId> {
        self.state.terminated.lock().clone()
    }

    pub fn finish_startup(&self, id: ContextId, outcome: std::result::Result<(), String>) {
        let state = match outcome {
            Ok(()) => ReadyState::Ready,
            Err(reason) => ReadyState::Failed(reason),
        };
        if let Some(tx) = self.state.starters.lock().get(&id) {
            tx.send_replace(state);
        }
    }
}

impl Transport for FakeTransport {
    type Context = FakeContext;

    fn name(&self) -> &'static str {
        "fake"
    }

    fn create_context(&self, id: ContextId) -> Result<FakeContext> {
        let failing = self
            .state
            .fail_creations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClientError::ContextSpawnFailed("scripted creation failure".into()));
        }

        let (tx, readiness) = Readiness::channel();
        match &self.state.startup {
            Startup::Immediate => {
                tx.send_replace(ReadyState::Ready);
            }
            Startup::Manual => {}
            Startup::Failing(reason) => {
                tx.send_replace(ReadyState::Failed(reason.clone()));
            }
        }
        self.state.starters.lock().insert(id, tx);

        Ok(FakeContext {
            id,
            readiness,
            state: Arc::clone(&self.state),
        })
    }

    fn supports_local_files(&self) -> bool {
        false
    }
}

pub struct FakeContext {
    id: ContextId,
    readiness: Readiness,
    state: Arc<FakeState>,
}

#[async_trait]
impl ExecutionContext for FakeContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    fn launch(&self, _invocation: Invocation, _cancel: CancellationToken) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Event::Exit(ExitEvent::with_code(0)));
        rx
    }

    async fn read_files(&self, paths: Vec<String>) -> Result<Vec<Option<String>>> {
        Ok(vec![None; paths.len()])
    }

    fn terminate(&self) {
        self.state.terminated.lock().push(self.id);
    }
}

/// Loader for the scripted engine
#[derive(Debug, Clone, Default)]
pub struct ScriptedLoader {
    failure: Option<String>,
    load_delay: Option<Duration>,
}

impl ScriptedLoader {
    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            load_delay: None,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            failure: None,
            load_delay: Some(delay),
        }
    }
}

impl ModuleLoader for ScriptedLoader {
    fn load(&self, fs: &mut MemFs) -> Result<Box<dyn EngineModule>> {
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        if let Some(reason) = &self.failure {
            return Err(ClientError::ContextSpawnFailed(reason.clone()));
        }
        fs.write("/stdlib/std/stdlib.mzn", "include \"builtins.mzn\";\n");
        fs.write("/stdlib/std/builtins.mzn", "% builtins\n");
        Ok(Box::new(ScriptedEngine))
    }
}

struct ScriptedEngine;

#[derive(Debug, Default)]
struct Parsed {
    params: BTreeMap<String, String>,
    vars: BTreeMap<String, (String, String)>,
    constraints: Vec<(String, String, i64)>,
    data: BTreeMap<String, i64>,
    errors: Vec<Value>,
    method: &'static str,
    slow: bool,
    whoami: bool,
}

impl EngineModule for ScriptedEngine {
    fn call_main(&mut self, env: &mut ModuleEnv<'_>, args: &[String]) -> i32 {
        let has = |flag: &str| args.iter().any(|arg| arg == flag);

        if has("--version") {
            let _ = writeln!(env.stdout, "MiniZinc to FlatZinc converter, version 2.8.5, build 0");
            return 0;
        }
        if has("--solvers-json") {
            let _ = writeln!(env.stdout, r#"[{{"id":"org.gecode.gecode","name":"Gecode","version":"6.3.0"}}]"#);
            return 0;
        }
        if has("--config-dirs") {
            let _ = writeln!(env.stdout, r#"{{"globalConfigFile":"","mznStdlibDir":"/stdlib"}}"#);
            return 0;
        }

        let mut all_solutions = false;
        let mut parsed = Parsed {
            method: "sat",
            ..Default::default()
        };
        for arg in args.iter().filter(|arg| arg.contains('.') && !arg.starts_with('-')) {
            let path = env.resolve(arg);
            let Some(text) = env.fs.read_to_string(&path) else {
                continue;
            };
            if arg.ends_with(".mpc") {
                let options: Map<String, Value> = serde_json::from_str(&text).unwrap_or_default();
                all_solutions = options.get("all-solutions") == Some(&Value::Bool(true));
            } else if arg.ends_with(".json") {
                let data: Map<String, Value> = serde_json::from_str(&text).unwrap_or_default();
                for (name, value) in data {
                    if let Some(value) = value.as_i64() {
                        parsed.data.insert(name, value);
                    }
                }
            } else if arg.ends_with(".mzn") || arg.ends_with(".dzn") {
                if text.contains("% panic") {
                    panic!("scripted panic");
                }
                parse(&path, &text, &mut parsed);
            }
        }
        check_identifiers(&mut parsed);

        if parsed.whoami {
            let worker = std::thread::current().name().unwrap_or_default().to_string();
            let _ = writeln!(env.stdout, "{}", json!({"type": "trace", "section": "context", "message": worker}));
        }

        for error in &parsed.errors {
            let _ = writeln!(env.stdout, "{}", error);
        }
        if !parsed.errors.is_empty() {
            return 1;
        }

        if has("--model-check-only") {
            0
        } else if has("--model-interface-only") {
            interface(env, &parsed)
        } else if has("--fzn") {
            compile(env, args, &parsed)
        } else {
            solve(env, &parsed, all_solutions, has("json"))
        }
    }
}

fn parse(path: &str, text: &str, parsed: &mut Parsed) {
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        match line {
            "% slow" => parsed.slow = true,
            "% whoami" => parsed.whoami = true,
            _ => {}
        }
        let Some(statement) = line.strip_suffix(';') else {
            continue;
        };
        if let Some(goal) = statement.strip_prefix("solve ") {
            parsed.method = match goal.split_whitespace().next() {
                Some("minimize") => "min",
                Some("maximize") => "max",
                _ => "sat",
            };
        } else if let Some(body) = statement.strip_prefix("constraint ") {
            let mut parts = body.split_whitespace();
            match (parts.next(), parts.next(), parts.next().map(str::parse::<i64>)) {
                (Some(name), Some(op), Some(Ok(bound))) => {
                    parsed.constraints.push((name.to_string(), op.to_string(), bound))
                }
                (Some(name), Some(_), Some(Err(_))) => {
                    let undefined = body.split_whitespace().nth(2).unwrap_or(name);
                    parsed.errors.push(type_error(path, index, undefined));
                }
                _ => {}
            }
        } else if let Some((name, value)) = statement.split_once('=').filter(|(lhs, _)| !lhs.contains(':')) {
            if let Ok(value) = value.trim().parse() {
                parsed.data.insert(name.trim().to_string(), value);
            }
        } else if let Some((ty, name)) = statement.split_once(':') {
            let name = name.split('=').next().unwrap_or(name).trim().to_string();
            match ty.trim().strip_prefix("var ") {
                Some(domain) => {
                    parsed.vars.insert(name, (path.to_string(), domain.trim().to_string()));
                }
                None => {
                    parsed.params.insert(name, ty.trim().to_string());
                }
            }
        }
    }
}

fn type_error(path: &str, index: usize, name: &str) -> Value {
    json!({
        "type": "error",
        "what": "type error",
        "message": format!("undefined identifier `{}'", name),
        "location": {
            "filename": path,
            "firstLine": index + 1,
            "firstColumn": 1,
            "lastLine": index + 1,
            "lastColumn": 1
        }
    })
}

fn check_identifiers(parsed: &mut Parsed) {
    let known: BTreeSet<&String> = parsed.params.keys().chain(parsed.vars.keys()).collect();
    let unknown: Vec<String> = parsed
        .constraints
        .iter()
        .filter(|(name, _, _)| !known.contains(name))
        .map(|(name, _, _)| name.clone())
        .collect();
    for name in unknown {
        parsed.errors.push(json!({
            "type": "error",
            "what": "type error",
            "message": format!("undefined identifier `{}'", name)
        }));
    }
}

fn interface(env: &mut ModuleEnv<'_>, parsed: &Parsed) -> i32 {
    let scalar = |ty: &str| if ty.contains("..") { "int".to_string() } else { ty.to_string() };
    let input: Map<String, Value> = parsed
        .params
        .iter()
        .map(|(name, ty)| (name.clone(), json!({"type": scalar(ty)})))
        .collect();
    let output: Map<String, Value> = parsed
        .vars
        .iter()
        .map(|(name, (_, domain))| (name.clone(), json!({"type": scalar(domain)})))
        .collect();
    let message = json!({
        "type": "interface",
        "input": input,
        "output": output,
        "method": parsed.method,
        "has_output_item": false,
        "included_files": [],
        "globals": []
    });
    let _ = writeln!(env.stdout, "{}", message);
    0
}

fn compile(env: &mut ModuleEnv<'_>, args: &[String], parsed: &Parsed) -> i32 {
    let Some(target) = args.iter().skip_while(|arg| *arg != "--fzn").nth(1) else {
        return 1;
    };
    let mut flat = String::new();
    for (name, (_, domain)) in &parsed.vars {
        flat.push_str(&format!("var {}: {} :: output_var;\n", domain, name));
    }
    flat.push_str("solve satisfy;\n");
    let path = env.resolve(target);
    env.fs.write(&path, flat);
    0
}

fn bound(token: &str, data: &BTreeMap<String, i64>) -> Option<i64> {
    token.trim().parse().ok().or_else(|| data.get(token.trim()).copied())
}

fn solve(env: &mut ModuleEnv<'_>, parsed: &Parsed, all_solutions: bool, json_output: bool) -> i32 {
    let Some((name, (_, domain))) = parsed.vars.iter().next() else {
        let _ = writeln!(env.stdout, r#"{{"type":"status","status":"SATISFIED"}}"#);
        return 0;
    };
    let Some((low, high)) = domain
        .split_once("..")
        .and_then(|(low, high)| Some((bound(low, &parsed.data)?, bound(high, &parsed.data)?)))
    else {
        let _ = writeln!(env.stderr, "unsupported domain {}", domain);
        return 1;
    };

    let mut count = 0;
    for value in low..=high {
        if env.interrupted() {
            return 130;
        }
        let satisfied = parsed.constraints.iter().all(|(_, op, rhs)| match op.as_str() {
            ">" => value > *rhs,
            ">=" => value >= *rhs,
            "<" => value < *rhs,
            "<=" => value <= *rhs,
            "!=" => value != *rhs,
            "=" | "==" => value == *rhs,
            _ => true,
        });
        if !satisfied {
            continue;
        }

        count += 1;
        let mut output = json!({"dzn": format!("{} = {};\n", name, value)});
        if json_output {
            let mut assignment = Map::new();
            assignment.insert(name.clone(), json!(value));
            output["json"] = Value::Object(assignment);
        }
        let _ = writeln!(env.stdout, "{}", json!({"type": "solution", "output": output}));
        if parsed.slow {
            std::thread::sleep(Duration::from_millis(5));
        }
        if !all_solutions {
            break;
        }
    }

    let _ = writeln!(env.stdout, "{}", json!({"type": "statistics", "statistics": {"nSolutions": count}}));
    let status = match (count, all_solutions) {
        (0, _) => Some("UNSATISFIABLE"),
        (_, true) => Some("ALL_SOLUTIONS"),
        (_, false) => None,
    };
    if let Some(status) = status {
        let _ = writeln!(env.stdout, "{}", json!({"type": "status", "status": status}));
    }
    0
}
