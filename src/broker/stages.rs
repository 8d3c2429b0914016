//! Routing stages
//!
//! Installed into the receive pipeline by [`Broker::install`].

use std::sync::Arc;

use super::store::Broker;
use crate::error::{Error, Result};
use crate::pipeline::{Stage, StageContext};
use crate::protocol::constants::{HEADER_ACK, HEADER_DESTINATION, HEADER_ID};
use crate::protocol::{Command, Frame};

pub const SUBSCRIBE: &str = "subscribe";
pub const SEND: &str = "send";

/// Header value, treating an empty value as absent
fn non_empty<'a>(frame: &'a Frame, key: &str) -> Option<&'a str> {
    frame.header(key).filter(|v| !v.is_empty())
}

/// Handles SUBSCRIBE and UNSUBSCRIBE
#[derive(Debug)]
pub struct SubscribeRecv {
    broker: Arc<Broker>,
}

impl SubscribeRecv {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

impl Stage for SubscribeRecv {
    fn name(&self) -> &str {
        SUBSCRIBE
    }

    fn on_frame(&self, cx: &StageContext<'_>, mut frame: Frame) -> Result<Option<Frame>> {
        match frame.command {
            Command::Subscribe => {
                let destination = non_empty(&frame, HEADER_DESTINATION)
                    .ok_or_else(|| Error::protocol("SUBSCRIBE requires a destination header"))?;
                self.broker.subscribe(
                    cx.connection(),
                    destination,
                    non_empty(&frame, HEADER_ID),
                    non_empty(&frame, HEADER_ACK),
                )?;
            }
            Command::Unsubscribe => {
                let destination = non_empty(&frame, HEADER_DESTINATION);
                let id = non_empty(&frame, HEADER_ID);
                if destination.is_none() && id.is_none() {
                    return Err(Error::protocol(
                        "UNSUBSCRIBE requires at least a destination or an id header",
                    ));
                }
                self.broker.unsubscribe(cx.connection(), destination, id)?;
            }
            _ => return Ok(Some(frame)),
        }

        frame.handled = true;
        Ok(Some(frame))
    }
}

/// Publishes SEND frames
#[derive(Debug)]
pub struct SendRecv {
    broker: Arc<Broker>,
}

impl SendRecv {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

impl Stage for SendRecv {
    fn name(&self) -> &str {
        SEND
    }

    fn on_frame(&self, cx: &StageContext<'_>, mut frame: Frame) -> Result<Option<Frame>> {
        if frame.command != Command::Send {
            return Ok(Some(frame));
        }

        self.broker.publish(cx.registry(), &frame)?;
        frame.handled = true;
        Ok(Some(frame))
    }
}
