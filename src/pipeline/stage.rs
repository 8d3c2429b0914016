//! Pipeline stage trait
//!
//! A stage may handle frames, errors, or both. A stage that does not
//! handle the current mode is skipped for that run.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::server::ConnectionRegistry;
use crate::session::Connection;

/// What a stage sees while it runs
pub struct StageContext<'a> {
    registry: &'a ConnectionRegistry,
    connection: &'a Arc<Connection>,
}

impl<'a> StageContext<'a> {
    pub fn new(registry: &'a ConnectionRegistry, connection: &'a Arc<Connection>) -> Self {
        Self {
            registry,
            connection,
        }
    }

    /// Registry the pipeline belongs to
    pub fn registry(&self) -> &'a ConnectionRegistry {
        self.registry
    }

    /// Connection the frame or error belongs to
    pub fn connection(&self) -> &'a Arc<Connection> {
        self.connection
    }

    /// Send a frame back to this connection through the send pipeline
    pub fn reply(&self, frame: Frame) -> Result<()> {
        self.registry.send_frame(self.connection, frame)
    }
}

/// One step of a pipeline
///
/// `on_frame` returning `Ok(None)` consumes the frame: later stages see
/// neither a frame nor an error. Returning `Err` switches the run into
/// error mode from the next stage on. `on_error` returning `Ok(..)`
/// recovers and switches back to frame mode.
pub trait Stage: Send + Sync {
    /// Name used to locate the stage inside a pipeline
    fn name(&self) -> &str;

    fn handles_frames(&self) -> bool {
        true
    }

    fn handles_errors(&self) -> bool {
        false
    }

    fn on_frame(&self, cx: &StageContext<'_>, frame: Frame) -> Result<Option<Frame>> {
        let _ = cx;
        Ok(Some(frame))
    }

    fn on_error(&self, cx: &StageContext<'_>, error: Error) -> Result<Option<Frame>> {
        let _ = cx;
        Err(error)
    }
}

type FrameFn = dyn Fn(&StageContext<'_>, Frame) -> Result<Option<Frame>> + Send + Sync;

/// Frame-only stage built from a closure
pub struct FnStage {
    name: String,
    f: Box<FrameFn>,
}

impl FnStage {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&StageContext<'_>, Frame) -> Result<Option<Frame>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_frame(&self, cx: &StageContext<'_>, frame: Frame) -> Result<Option<Frame>> {
        (self.f)(cx, frame)
    }
}

impl fmt::Debug for FnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}
