//! Execution Timeline
//!
//! Records when each unit of a run starts and how it ends, for the
//! end-of-run summary.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::workflow::model::Status;

/// Type of timeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    /// Unit started executing
    Started,
    /// Unit finished with the given status
    Finished(Status),
    /// Unit aborted the run
    Aborted,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// Identity of the unit
    pub unit_id: String,
    /// Position of the unit in the working list
    pub position: usize,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Timeline of one run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn record(&mut self, unit_id: impl Into<String>, position: usize, event_type: EventType) {
        self.events.push(TimelineEvent {
            unit_id: unit_id.into(),
            position,
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Identities of units that finished, in execution order.
    pub fn finished_units(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| matches!(e.event_type, EventType::Finished(_)))
            .map(|e| e.unit_id.as_str())
            .collect()
    }

    /// Wall time of every unit that started and ended.
    pub fn durations(&self) -> HashMap<String, Duration> {
        let mut starts: HashMap<&str, Instant> = HashMap::new();
        let mut durations = HashMap::new();

        for event in &self.events {
            match event.event_type {
                EventType::Started => {
                    starts.insert(&event.unit_id, event.timestamp);
                }
                EventType::Finished(_) | EventType::Aborted => {
                    if let Some(start) = starts.get(event.unit_id.as_str()) {
                        durations.insert(
                            event.unit_id.clone(),
                            event.timestamp.duration_since(*start),
                        );
                    }
                }
            }
        }

        durations
    }

    /// One line per ended unit: position, identity, outcome and duration.
    pub fn summary(&self) -> String {
        let durations = self.durations();
        let mut output = String::new();

        for event in &self.events {
            let outcome = match &event.event_type {
                EventType::Started => continue,
                EventType::Finished(status) => status.as_str().to_string(),
                EventType::Aborted => "aborted".to_string(),
            };
            let millis = durations
                .get(&event.unit_id)
                .map_or(0, |d| d.as_millis());

            output.push_str(&format!(
                "{:>4}  {:12}  {:12}  {} ms\n",
                event.position,
                truncate(&event.unit_id, 12),
                outcome,
                millis
            ));
        }

        output.push_str(&format!("Total: {} ms\n", self.elapsed().as_millis()));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
