//! Ordered listeners for audio-core lifecycle events.

use super::PolicyEngine;
use crate::core::{Sink, SinkInput, SinkInputNewData, SourceOutput, SourceOutputNewData};
use tracing::trace;

/// Lifecycle event kinds, in the order the engine registers for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    SinkInputNew,
    SinkInputUnlinkPost,
    SinkInputPut,
    SinkInputStateChanged,
    SourceOutputNew,
    SourceOutputUnlinkPost,
    SourceOutputPut,
    SinkPut,
    SinkUnlink,
    SinkUnlinkPost,
    SinkInputMoveStart,
    SinkInputMoveFinish,
    SinkStateChanged,
    SourceStateChanged,
}

/// Payload handed to listeners.
#[derive(Debug)]
pub enum HookEvent<'a> {
    /// Stream about to be created; listeners may rewrite its data
    SinkInputNew(&'a mut SinkInputNewData),
    /// Stream already removed from the core
    SinkInputUnlinkPost(&'a SinkInput),
    SinkInputPut(u32),
    SinkInputStateChanged(u32),
    SourceOutputNew(&'a mut SourceOutputNewData),
    SourceOutputUnlinkPost(&'a SourceOutput),
    SourceOutputPut(u32),
    SinkPut(u32),
    /// Sink still present, about to be removed
    SinkUnlink(u32),
    /// Sink already removed from the core
    SinkUnlinkPost(&'a Sink),
    SinkInputMoveStart(u32),
    SinkInputMoveFinish(u32),
    SinkStateChanged(u32),
    SourceStateChanged(u32),
}

impl HookEvent<'_> {
    pub fn kind(&self) -> HookKind {
        match self {
            HookEvent::SinkInputNew(_) => HookKind::SinkInputNew,
            HookEvent::SinkInputUnlinkPost(_) => HookKind::SinkInputUnlinkPost,
            HookEvent::SinkInputPut(_) => HookKind::SinkInputPut,
            HookEvent::SinkInputStateChanged(_) => HookKind::SinkInputStateChanged,
            HookEvent::SourceOutputNew(_) => HookKind::SourceOutputNew,
            HookEvent::SourceOutputUnlinkPost(_) => HookKind::SourceOutputUnlinkPost,
            HookEvent::SourceOutputPut(_) => HookKind::SourceOutputPut,
            HookEvent::SinkPut(_) => HookKind::SinkPut,
            HookEvent::SinkUnlink(_) => HookKind::SinkUnlink,
            HookEvent::SinkUnlinkPost(_) => HookKind::SinkUnlinkPost,
            HookEvent::SinkInputMoveStart(_) => HookKind::SinkInputMoveStart,
            HookEvent::SinkInputMoveFinish(_) => HookKind::SinkInputMoveFinish,
            HookEvent::SinkStateChanged(_) => HookKind::SinkStateChanged,
            HookEvent::SourceStateChanged(_) => HookKind::SourceStateChanged,
        }
    }
}

pub type HookFn = fn(&mut PolicyEngine, &mut HookEvent<'_>);

/// Listeners in registration order.
#[derive(Default)]
pub struct HookRegistry {
    listeners: Vec<(HookKind, &'static str, HookFn)>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, kind: HookKind, name: &'static str, hook: HookFn) {
        self.listeners.push((kind, name, hook));
    }

    /// Listeners of `kind`, in the order they were connected.
    pub fn listeners(&self, kind: HookKind) -> Vec<(&'static str, HookFn)> {
        self.listeners
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, name, hook)| (*name, *hook))
            .collect()
    }

    /// Registered kinds, in order, duplicates included.
    pub fn kinds(&self) -> Vec<HookKind> {
        self.listeners.iter().map(|(kind, _, _)| *kind).collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl PolicyEngine {
    /// Run every listener of the event's kind.
    pub(crate) fn fire(&mut self, event: &mut HookEvent<'_>) {
        for (name, hook) in self.hooks.listeners(event.kind()) {
            trace!("Hook {} ({:?})", name, event.kind());
            hook(self, event);
        }
    }
}
