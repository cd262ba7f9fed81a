//! Pipeline Engine
//!
//! Named, versioned, typed transformation chains applied at fixed lifecycle
//! points: query pipelines rewrite the parsed request before planning,
//! document pipelines rewrite each document at ingest, result pipelines
//! rewrite the merged response before it returns.
//!
//! Stages are opaque map-in/map-out transformations; they cannot hold
//! references into merger state or plan-cache entries. Failure semantics
//! are graceful degradation: a stage error or pipeline timeout logs a
//! warning, bumps the failure metric, and forwards the input unchanged. A
//! search or index operation never fails because of a pipeline. The
//! `abort` policy is accepted at registration and currently treated as
//! `continue` on those paths; test execution (`run_strict`) surfaces the
//! error instead.

pub mod stages;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, SearchError};
use crate::metrics::Metrics;
use crate::node::Document;

/// Lifecycle point a pipeline attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Query,
    Document,
    Result,
}

/// What to do when a stage fails. Reserved for future use: search and
/// index paths treat `Abort` as `Continue`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Continue,
    Abort,
}

/// One transformation step. Pure map-in/map-out; implementations may be
/// built-ins or wrap sandboxed user code.
pub trait Stage: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn process(&self, input: Document) -> std::result::Result<Document, String>;
}

/// Registration body of a pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDef {
    pub kind: PipelineKind,
    pub stages: Vec<Value>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// A registered pipeline.
#[derive(Debug)]
pub struct Pipeline {
    pub name: String,
    pub version: u32,
    pub kind: PipelineKind,
    pub on_failure: FailurePolicy,
    pub timeout: Duration,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Run with graceful degradation: any stage error or a timeout between
    /// stages yields the original input unchanged, with a warning logged
    /// and the failure metric bumped once.
    pub fn run(&self, input: Document, metrics: &Metrics) -> Document {
        metrics.pipeline_executions.fetch_add(1, Ordering::Relaxed);
        match self.apply(input.clone()) {
            Ok(output) => output,
            Err(failure) => {
                warn!(
                    pipeline = %self.name,
                    stage = %failure.stage,
                    error = %failure.message,
                    "pipeline_failed_passing_through"
                );
                metrics.pipeline_failures.fetch_add(1, Ordering::Relaxed);
                input
            }
        }
    }

    /// Run without degradation; used by the `_execute` test endpoint.
    pub fn run_strict(&self, input: Document) -> Result<Document> {
        self.apply(input).map_err(|failure| SearchError::PipelineFailed {
            pipeline: self.name.clone(),
            stage: failure.stage,
            message: failure.message,
        })
    }

    fn apply(&self, mut current: Document) -> std::result::Result<Document, StageFailure> {
        let started = Instant::now();
        for stage in &self.stages {
            // The timeout is observed between stages: a stage that has not
            // started yet does not start once the budget is gone.
            if self.timeout.is_zero() || started.elapsed() > self.timeout {
                return Err(StageFailure {
                    stage: stage.name().to_string(),
                    message: format!("pipeline timeout of {:?} exceeded", self.timeout),
                });
            }
            current = stage.process(current).map_err(|message| StageFailure {
                stage: stage.name().to_string(),
                message,
            })?;
        }
        Ok(current)
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|stage| stage.name().to_string())
            .collect()
    }
}

struct StageFailure {
    stage: String,
    message: String,
}

/// Serializable description for the pipeline GET endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineInfo {
    pub name: String,
    pub version: u32,
    pub kind: PipelineKind,
    pub stages: Vec<String>,
    pub on_failure: FailurePolicy,
    pub timeout_ms: u64,
}

impl From<&Pipeline> for PipelineInfo {
    fn from(pipeline: &Pipeline) -> Self {
        PipelineInfo {
            name: pipeline.name.clone(),
            version: pipeline.version,
            kind: pipeline.kind,
            stages: pipeline.stage_names(),
            on_failure: pipeline.on_failure,
            timeout_ms: pipeline.timeout.as_millis() as u64,
        }
    }
}

/// Read-mostly pipeline registry. Registration replaces atomically; running
/// requests keep the Arc they already resolved.
pub struct PipelineRegistry {
    pipelines: DashMap<String, Arc<Pipeline>>,
    default_timeout: Duration,
}

impl PipelineRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        PipelineRegistry {
            pipelines: DashMap::new(),
            default_timeout,
        }
    }

    /// Register or replace a pipeline. Replacement bumps the version.
    pub fn register(&self, name: &str, def: &PipelineDef) -> Result<Arc<Pipeline>> {
        let mut built = Vec::with_capacity(def.stages.len());
        for (i, spec) in def.stages.iter().enumerate() {
            built.push(stages::build_stage(i, spec)?);
        }
        let version = self
            .pipelines
            .get(name)
            .map_or(1, |existing| existing.version + 1);
        let pipeline = Arc::new(Pipeline {
            name: name.to_string(),
            version,
            kind: def.kind,
            on_failure: def.on_failure,
            timeout: def
                .timeout_ms
                .map_or(self.default_timeout, Duration::from_millis),
            stages: built,
        });
        self.pipelines.insert(name.to_string(), Arc::clone(&pipeline));
        Ok(pipeline)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.get(name).map(|entry| Arc::clone(&entry))
    }

    pub fn remove(&self, name: &str) -> bool {
        self.pipelines.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
