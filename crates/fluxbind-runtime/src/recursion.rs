#![forbid(unsafe_code)]

//! Dispatch depth tracking and binding-loop detection.
//!
//! Every synchronous dispatch enters a frame. Below the threshold nothing is
//! recorded. Past it, each validate delivery records `(object, property,
//! listener)`; a repeated frame, or more than `max_frames` recorded frames,
//! is a loop.
//! The resulting [`BindError::BindingLoop`] unwinds every nested dispatch and
//! is reported once, by the outermost frame.

use ahash::AHashSet;
use fluxbind_core::object::slot_label;
use fluxbind_core::{BindError, LoopFrame, ObjectId, ObjectRef};

use crate::registry::{ListenerId, ListenerTarget};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct FrameKey {
    object: ObjectId,
    slot: Option<usize>,
    listener: ListenerId,
}

#[derive(Debug)]
pub(crate) struct DispatchState {
    depth: usize,
    threshold: usize,
    max_frames: usize,
    seen: AHashSet<FrameKey>,
    frames: Vec<LoopFrame>,
}

impl DispatchState {
    pub(crate) fn new(threshold: usize, max_frames: usize) -> Self {
        Self {
            depth: 0,
            threshold,
            max_frames,
            seen: AHashSet::new(),
            frames: Vec::new(),
        }
    }

    /// Enter a dispatch frame; returns the new depth.
    pub(crate) fn enter(&mut self) -> usize {
        self.depth += 1;
        self.depth
    }

    /// Leave a dispatch frame. Recorded frames are discarded once the stack
    /// drains.
    pub(crate) fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.seen.clear();
            self.frames.clear();
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    /// Note a delivery about to happen at the current depth.
    pub(crate) fn record(
        &mut self,
        object: &ObjectRef,
        slot: Option<usize>,
        target: &ListenerTarget,
    ) -> Result<(), BindError> {
        if self.depth <= self.threshold {
            return Ok(());
        }
        let key = FrameKey {
            object: ObjectId::of(object),
            slot,
            listener: target.id(),
        };
        let repeated = !self.seen.insert(key);
        self.frames.push(LoopFrame {
            object: key.object,
            type_name: object.type_name().to_string(),
            property: slot.map_or_else(|| "*".to_string(), |s| slot_label(object, s)),
            listener: target.describe(),
        });
        if repeated || self.frames.len() > self.max_frames {
            let frames = std::mem::take(&mut self.frames);
            self.seen.clear();
            return Err(BindError::BindingLoop { frames });
        }
        Ok(())
    }
}
