// src/progress/summary.rs
//! Running summary of a solve, folded from its events

use crate::protocol::event::{Diagnostic, Event, SolutionEvent, SolveStatus};
use serde::Serialize;
use serde_json::{Map, Value};

/// What a successful solve resolves to
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub solution: Option<SolutionEvent>,
    pub statistics: Map<String, Value>,
}

/// Accumulated state of one run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub status: SolveStatus,
    pub solution: Option<SolutionEvent>,
    pub statistics: Map<String, Value>,
    pub errors: Vec<Diagnostic>,
}

impl RunSummary {
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Solution(solution) => {
                self.solution = Some(solution.clone());
                self.status = SolveStatus::Satisfied;
            }
            Event::Status(status) => self.status = status.status,
            Event::Statistics(stats) => {
                for (key, value) in &stats.statistics {
                    self.statistics.insert(key.clone(), value.clone());
                }
            }
            Event::Error(error) => self.errors.push(error.clone()),
            _ => {}
        }
    }

    /// First error the engine reported
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.errors.first()
    }

    pub fn to_result(&self) -> SolveResult {
        SolveResult {
            status: self.status,
            solution: self.solution.clone(),
            statistics: self.statistics.clone(),
        }
    }
}
