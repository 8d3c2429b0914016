//! Frame processing pipelines
//!
//! A pipeline is an ordered list of [`Stage`]s run once per frame. The run
//! carries either a frame or an error from stage to stage:
//!
//! ```text
//!            on_frame Ok(Some)           on_frame Err
//!   Frame ───────────────────► Frame    Frame ─────────► Error
//!
//!            on_error Ok(Some)           on_error Err
//!   Error ───────────────────► Frame    Error ─────────► Error
//!
//!   Ok(None) from either handler ──► Consumed (later stages idle)
//! ```
//!
//! Stages that do not handle the current mode are skipped. Whatever is left
//! after the last stage is the [`Outcome`]. Setting `frame.handled` does not
//! stop the run.

pub mod middleware;
pub mod stage;

use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::protocol::Frame;

pub use stage::{FnStage, Stage, StageContext};

/// Run state between stages
#[derive(Debug)]
pub enum Flow {
    Frame(Frame),
    Error(Error),
    Consumed,
}

/// Result of a pipeline run
#[derive(Debug)]
pub enum Outcome {
    /// A frame made it through every stage
    Delivered(Frame),
    /// A stage took the frame (or recovered from the error) without passing anything on
    Consumed,
    /// An error no stage recovered from
    Failed(Error),
}

/// Ordered list of stages
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn push(&mut self, stage: impl Stage + 'static) -> &mut Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append a shared stage
    pub fn push_arc(&mut self, stage: Arc<dyn Stage>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Insert a stage at `index` (clamped to the end)
    pub fn insert(&mut self, index: usize, stage: Arc<dyn Stage>) {
        let index = index.min(self.stages.len());
        self.stages.insert(index, stage);
    }

    /// Insert a stage in front of the stage called `name`
    ///
    /// Appends if no such stage exists.
    pub fn insert_before(&mut self, name: &str, stage: Arc<dyn Stage>) {
        match self.position(name) {
            Some(idx) => self.stages.insert(idx, stage),
            None => self.stages.push(stage),
        }
    }

    /// Remove the first stage called `name`
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Stage>> {
        let idx = self.position(name)?;
        Some(self.stages.remove(idx))
    }

    /// Index of the first stage called `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name() == name)
    }

    /// Stage names in run order
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run a frame or an error through every stage in order
    pub fn run(&self, cx: &StageContext<'_>, start: Flow) -> Outcome {
        let mut flow = start;

        for stage in &self.stages {
            flow = match flow {
                Flow::Frame(frame) if stage.handles_frames() => match stage.on_frame(cx, frame) {
                    Ok(Some(frame)) => Flow::Frame(frame),
                    Ok(None) => Flow::Consumed,
                    Err(err) => {
                        tracing::trace!(stage = stage.name(), error = %err, "Stage raised error");
                        Flow::Error(err)
                    }
                },
                Flow::Error(err) if stage.handles_errors() => match stage.on_error(cx, err) {
                    Ok(Some(frame)) => Flow::Frame(frame),
                    Ok(None) => Flow::Consumed,
                    Err(err) => Flow::Error(err),
                },
                other => other,
            };
        }

        match flow {
            Flow::Frame(frame) => Outcome::Delivered(frame),
            Flow::Error(err) => Outcome::Failed(err),
            Flow::Consumed => Outcome::Consumed,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::Result;
    use crate::protocol::Command;
    use crate::server::{BrokerConfig, ConnectionRegistry};

    /// Stage that counts how often each handler runs
    struct Recorder {
        name: &'static str,
        frames: AtomicUsize,
        errors: AtomicUsize,
        recover: bool,
    }

    impl Recorder {
        fn new(name: &'static str, recover: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                frames: AtomicUsize::new(0),
                errors: AtomicUsize::new(0),
                recover,
            })
        }
    }

    impl Stage for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn handles_errors(&self) -> bool {
            self.recover
        }

        fn on_frame(&self, _cx: &StageContext<'_>, frame: Frame) -> Result<Option<Frame>> {
            self.frames.fetch_add(1, Ordering::SeqCst);
            Ok(Some(frame))
        }

        fn on_error(&self, _cx: &StageContext<'_>, _error: Error) -> Result<Option<Frame>> {
            self.errors.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Frame::empty(Command::Receipt)))
        }
    }

    fn failing(name: &'static str) -> Arc<dyn Stage> {
        Arc::new(FnStage::new(name, |_, _| Err(Error::protocol("boom"))))
    }

    fn run(pipeline: &Pipeline, start: Flow) -> Outcome {
        let registry = ConnectionRegistry::new(BrokerConfig::default());
        let (conn, _rx) = registry.register(None);
        let cx = StageContext::new(&registry, &conn);
        pipeline.run(&cx, start)
    }

    #[test]
    fn test_frame_passes_every_stage() {
        let a = Recorder::new("a", false);
        let b = Recorder::new("b", false);
        let mut pipeline = Pipeline::new();
        pipeline.push_arc(a.clone()).push_arc(b.clone());

        let outcome = run(&pipeline, Flow::Frame(Frame::empty(Command::Send)));
        assert!(matches!(outcome, Outcome::Delivered(ref f) if f.command == Command::Send));
        assert_eq!(a.frames.load(Ordering::SeqCst), 1);
        assert_eq!(b.frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_skips_frame_only_stages() {
        let after = Recorder::new("after", false);
        let mut pipeline = Pipeline::new();
        pipeline.push_arc(failing("fail")).push_arc(after.clone());

        let outcome = run(&pipeline, Flow::Frame(Frame::empty(Command::Send)));
        assert!(matches!(outcome, Outcome::Failed(Error::Protocol(_))));
        assert_eq!(after.frames.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_error_recovery_resumes_frame_mode() {
        let recover = Recorder::new("recover", true);
        let after = Recorder::new("after", false);
        let mut pipeline = Pipeline::new();
        pipeline
            .push_arc(failing("fail"))
            .push_arc(recover.clone())
            .push_arc(after.clone());

        let outcome = run(&pipeline, Flow::Frame(Frame::empty(Command::Send)));
        assert!(matches!(outcome, Outcome::Delivered(ref f) if f.command == Command::Receipt));
        assert_eq!(recover.errors.load(Ordering::SeqCst), 1);
        // The recovering stage does not also run its frame handler
        assert_eq!(recover.frames.load(Ordering::SeqCst), 0);
        assert_eq!(after.frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_handler_upstream_of_failure_does_not_run() {
        let early = Recorder::new("early", true);
        let mut pipeline = Pipeline::new();
        pipeline.push_arc(early.clone()).push_arc(failing("fail"));

        let outcome = run(&pipeline, Flow::Frame(Frame::empty(Command::Send)));
        assert!(matches!(outcome, Outcome::Failed(_)));
        assert_eq!(early.frames.load(Ordering::SeqCst), 1);
        assert_eq!(early.errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_starting_in_error_mode() {
        let recover = Recorder::new("recover", true);
        let mut pipeline = Pipeline::new();
        pipeline.push_arc(recover.clone());

        let outcome = run(&pipeline, Flow::Error(Error::malformed("bad")));
        assert!(matches!(outcome, Outcome::Delivered(_)));
        assert_eq!(recover.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_consumed_frame_stops_processing() {
        let after = Recorder::new("after", false);
        let mut pipeline = Pipeline::new();
        pipeline
            .push(FnStage::new("swallow", |_, _| Ok(None)))
            .push_arc(after.clone());

        let outcome = run(&pipeline, Flow::Frame(Frame::empty(Command::Send)));
        assert!(matches!(outcome, Outcome::Consumed));
        assert_eq!(after.frames.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handled_flag_does_not_stop_run() {
        let after = Recorder::new("after", false);
        let mut pipeline = Pipeline::new();
        pipeline
            .push(FnStage::new("mark", |_, mut frame: Frame| {
                frame.handled = true;
                Ok(Some(frame))
            }))
            .push_arc(after.clone());

        let outcome = run(&pipeline, Flow::Frame(Frame::empty(Command::Send)));
        assert!(matches!(outcome, Outcome::Delivered(ref f) if f.handled));
        assert_eq!(after.frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_insert_and_remove_by_name() {
        let mut pipeline = Pipeline::new();
        pipeline.push_arc(Recorder::new("a", false));
        pipeline.push_arc(Recorder::new("c", false));
        pipeline.insert_before("c", Recorder::new("b", false));
        pipeline.insert(0, Recorder::new("first", false));

        assert_eq!(pipeline.stage_names(), vec!["first", "a", "b", "c"]);
        assert!(pipeline.remove("a").is_some());
        assert!(pipeline.remove("missing").is_none());
        assert_eq!(pipeline.len(), 3);
    }
}
