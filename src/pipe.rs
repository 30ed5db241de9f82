//! Result piping — forwards a finished task's result into downstream task starts.
//!
//! Each source task owns one ordered list of destinations. Registering more
//! destinations for the same source appends to the list; duplicates are kept.
//!
//! Fan-out is detached: [`PipeRouter::run`] works out every downstream start,
//! spawns one task that issues them in destination order and returns without
//! waiting for any publish to complete.

use std::collections::HashMap;
use std::fmt;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::bus::TaskStarter;
use crate::error::PipeError;

/// Where a task's result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Forward the whole result to `target`.
    Direct { target: String },
    /// Forward each element of a sequence result to `target`.
    Map { target: String },
    /// Forward element `i` of a sequence result to `targets[i]`.
    Spread { targets: Vec<String> },
}

impl Destination {
    pub fn direct(target: impl Into<String>) -> Self {
        Self::Direct {
            target: target.into(),
        }
    }

    pub fn map(target: impl Into<String>) -> Self {
        Self::Map {
            target: target.into(),
        }
    }

    pub fn spread<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Spread {
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse the loose registration form: a bare task name, or
    /// `{"opcode": "map" | "spread", "names": [...]}`. An empty spread is
    /// accepted and never starts anything.
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(name) = value.as_str() {
            return Some(Self::direct(name));
        }

        let opcode = value.get("opcode")?.as_str()?;
        let names = value
            .get("names")?
            .as_array()?
            .iter()
            .map(|n| n.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?;

        match opcode {
            "map" => names.into_iter().next().map(Self::map),
            "spread" => Some(Self::Spread { targets: names }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Direct { .. } => "direct",
            Self::Map { .. } => "map",
            Self::Spread { .. } => "spread",
        }
    }

    /// Downstream `(task, params)` starts for `result`.
    fn starts(&self, source: &str, result: &Value) -> Result<Vec<(String, Value)>, PipeError> {
        match self {
            Self::Direct { target } => Ok(vec![(target.clone(), result.clone())]),
            Self::Map { target } => {
                let items = sequence(source, self.kind(), result)?;
                Ok(items
                    .iter()
                    .map(|item| (target.clone(), item.clone()))
                    .collect())
            }
            Self::Spread { targets } => {
                let items = sequence(source, self.kind(), result)?;
                Ok(targets
                    .iter()
                    .zip(items)
                    .map(|(target, item)| (target.clone(), item.clone()))
                    .collect())
            }
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { target } | Self::Map { target } => {
                write!(f, "{} {}", self.kind(), target)
            }
            Self::Spread { targets } => write!(f, "spread [{}]", targets.join(", ")),
        }
    }
}

fn sequence<'a>(
    source: &str,
    kind: &'static str,
    result: &'a Value,
) -> Result<&'a [Value], PipeError> {
    result
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| PipeError::NotASequence {
            task: source.to_string(),
            kind,
        })
}

/// Registry of pipes keyed by source task name.
pub struct PipeRouter {
    starter: TaskStarter,
    pipes: RwLock<HashMap<String, Vec<Destination>>>,
}

impl PipeRouter {
    pub fn new(starter: TaskStarter) -> Self {
        Self {
            starter,
            pipes: RwLock::new(HashMap::new()),
        }
    }

    /// Append `destination` to the pipe for `source`.
    pub async fn add(&self, source: &str, destination: Destination) {
        debug!(source = %source, destination = %destination, "pipe registered");
        self.pipes
            .write()
            .await
            .entry(source.to_string())
            .or_default()
            .push(destination);
    }

    /// Register a destination in its loose form. Unrecognized shapes are
    /// dropped with a warning. Returns whether anything was registered.
    pub async fn add_value(&self, source: &str, destination: &Value) -> bool {
        match Destination::from_value(destination) {
            Some(dest) => {
                self.add(source, dest).await;
                true
            }
            None => {
                warn!(source = %source, destination = %destination, "unknown destination structure");
                false
            }
        }
    }

    pub async fn destinations(&self, source: &str) -> Vec<Destination> {
        self.pipes
            .read()
            .await
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Fan `result` out to every destination registered for `source`.
    ///
    /// Returns the number of downstream starts issued. A map or spread
    /// destination given a non-sequence result is skipped; the others still
    /// run and the first such error is returned.
    pub async fn run(&self, source: &str, result: &Value) -> Result<usize, PipeError> {
        let destinations = self.destinations(source).await;
        if destinations.is_empty() {
            return Ok(0);
        }

        let mut starts = Vec::new();
        let mut first_error = None;
        for destination in &destinations {
            match destination.starts(source, result) {
                Ok(mut s) => {
                    debug!(source = %source, destination = %destination, count = s.len(), "piping");
                    starts.append(&mut s);
                }
                Err(e) => {
                    warn!(source = %source, destination = %destination, "{e}");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        let issued = starts.len();
        if issued > 0 {
            let starter = self.starter.clone();
            tokio::spawn(async move {
                let calls = starts.iter().map(|(task, params)| {
                    let starter = starter.clone();
                    async move { (task, starter.start(task, params.clone()).await) }
                });
                for (task, outcome) in join_all(calls).await {
                    if let Err(e) = outcome {
                        warn!(task = %task, "piped start failed: {e}");
                    }
                }
            });
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(issued),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::testing::RecordingBus;

    fn router(bus: &Arc<RecordingBus>) -> PipeRouter {
        PipeRouter::new(TaskStarter::new(bus.clone()))
    }

    #[tokio::test]
    async fn direct_forwards_whole_result() {
        let bus = Arc::new(RecordingBus::new());
        let pipes = router(&bus);
        pipes.add("a", Destination::direct("b")).await;

        let issued = pipes.run("a", &json!({"rows": 3})).await.unwrap();
        assert_eq!(issued, 1);
        assert_eq!(
            bus.wait_for(1).await,
            vec![("b".to_string(), json!({"rows": 3}))]
        );
    }

    #[tokio::test]
    async fn map_forwards_each_element_in_order() {
        let bus = Arc::new(RecordingBus::new());
        let pipes = router(&bus);
        pipes.add("a", Destination::map("b")).await;

        pipes.run("a", &json!(["x", "y", "z"])).await.unwrap();
        assert_eq!(
            bus.wait_for(3).await,
            vec![
                ("b".to_string(), json!("x")),
                ("b".to_string(), json!("y")),
                ("b".to_string(), json!("z")),
            ]
        );
    }

    #[tokio::test]
    async fn spread_pairs_by_position_and_ignores_extras() {
        let bus = Arc::new(RecordingBus::new());
        let pipes = router(&bus);
        pipes.add("a", Destination::spread(["b", "c"])).await;

        let issued = pipes.run("a", &json!(["x", "y", "extra"])).await.unwrap();
        assert_eq!(issued, 2);
        assert_eq!(
            bus.wait_for(2).await,
            vec![("b".to_string(), json!("x")), ("c".to_string(), json!("y"))]
        );

        let short = pipes.run("a", &json!(["only"])).await.unwrap();
        assert_eq!(short, 1);
    }

    #[tokio::test]
    async fn repeated_registration_accumulates() {
        let bus = Arc::new(RecordingBus::new());
        let pipes = router(&bus);
        pipes.add("a", Destination::direct("b")).await;
        pipes.add("a", Destination::direct("b")).await;
        pipes.add("a", Destination::map("c")).await;

        assert_eq!(pipes.destinations("a").await.len(), 3);
        let issued = pipes.run("a", &json!([1])).await.unwrap();
        assert_eq!(issued, 3);
        assert_eq!(
            bus.wait_for(3).await,
            vec![
                ("b".to_string(), json!([1])),
                ("b".to_string(), json!([1])),
                ("c".to_string(), json!(1)),
            ]
        );
    }

    #[tokio::test]
    async fn non_sequence_result_fails_only_that_destination() {
        let bus = Arc::new(RecordingBus::new());
        let pipes = router(&bus);
        pipes.add("a", Destination::map("b")).await;
        pipes.add("a", Destination::direct("c")).await;

        let err = pipes.run("a", &json!("scalar")).await.unwrap_err();
        assert!(matches!(err, PipeError::NotASequence { kind: "map", .. }));
        assert_eq!(
            bus.wait_for(1).await,
            vec![("c".to_string(), json!("scalar"))]
        );
    }

    #[tokio::test]
    async fn unknown_source_is_a_noop() {
        let bus = Arc::new(RecordingBus::new());
        let pipes = router(&bus);
        assert_eq!(pipes.run("nobody", &json!(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_does_not_wait_for_publishes() {
        let bus = Arc::new(RecordingBus::new().with_delay(std::time::Duration::from_millis(200)));
        let pipes = router(&bus);
        pipes.add("a", Destination::direct("b")).await;

        let started = std::time::Instant::now();
        pipes.run("a", &json!(1)).await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_millis(100));
        assert_eq!(bus.wait_for(1).await.len(), 1);
    }

    #[test]
    fn loose_destination_shapes() {
        assert_eq!(
            Destination::from_value(&json!("b")),
            Some(Destination::direct("b"))
        );
        assert_eq!(
            Destination::from_value(&json!({"opcode": "map", "names": ["b", "ignored"]})),
            Some(Destination::map("b"))
        );
        assert_eq!(
            Destination::from_value(&json!({"opcode": "spread", "names": ["b", "c"]})),
            Some(Destination::spread(["b", "c"]))
        );
    }

    #[test]
    fn malformed_destination_shapes() {
        for bad in [
            json!(42),
            json!({"opcode": "fold", "names": ["b"]}),
            json!({"opcode": "map", "names": []}),
            json!({"opcode": "spread"}),
            json!({"opcode": "spread", "names": "b"}),
            json!({"opcode": "spread", "names": ["b", 1]}),
            json!({"names": ["b"]}),
        ] {
            assert_eq!(Destination::from_value(&bad), None, "{bad}");
        }
    }

    #[tokio::test]
    async fn empty_spread_registers_but_starts_nothing() {
        let bus = Arc::new(RecordingBus::new());
        let pipes = router(&bus);
        assert!(
            pipes
                .add_value("a", &json!({"opcode": "spread", "names": []}))
                .await
        );
        assert_eq!(
            pipes.destinations("a").await,
            vec![Destination::Spread { targets: vec![] }]
        );

        assert_eq!(pipes.run("a", &json!(["x", "y"])).await.unwrap(), 0);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(bus.calls().is_empty());
    }

    #[tokio::test]
    async fn add_value_drops_malformed() {
        let bus = Arc::new(RecordingBus::new());
        let pipes = router(&bus);
        assert!(!pipes.add_value("a", &json!({"opcode": "fold"})).await);
        assert!(pipes.add_value("a", &json!("b")).await);
        assert_eq!(pipes.destinations("a").await, vec![Destination::direct("b")]);
    }
}
