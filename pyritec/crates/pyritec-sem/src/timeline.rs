//! Ownership timeline recording.
//!
//! When `track_timeline` is enabled the ownership and borrow passes record an
//! ordered event log per variable: allocation, borrows, moves, uses, drops.
//! The log exists purely for diagnostic quality (the LSP renders it next to
//! ownership errors) and is disabled by default because it allocates per
//! event.

use pyritec_util::{Span, Symbol};

/// What happened to a variable at a point in the program
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Allocate,
    Borrow,
    MutBorrow,
    Move,
    Use,
    Drop,
}

impl EventKind {
    fn label(self) -> &'static str {
        match self {
            EventKind::Allocate => "ALLOCATED",
            EventKind::Borrow => "BORROWED",
            EventKind::MutBorrow => "MUT BORROWED",
            EventKind::Move => "MOVED",
            EventKind::Use => "USED",
            EventKind::Drop => "DROPPED",
        }
    }
}

/// One timeline entry
#[derive(Clone, Debug)]
pub struct OwnershipEvent {
    pub variable: Symbol,
    pub kind: EventKind,
    pub message: String,
    pub span: Span,
}

/// The per-unit event log
#[derive(Debug, Default)]
pub struct Timeline {
    enabled: bool,
    events: Vec<OwnershipEvent>,
}

impl Timeline {
    /// Create a timeline; a disabled timeline drops every event
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events: Vec::new(),
        }
    }

    /// True when events are being recorded
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record an event; no-op while disabled
    pub fn add_event(
        &mut self,
        variable: Symbol,
        kind: EventKind,
        message: impl Into<String>,
        span: Span,
    ) {
        if !self.enabled {
            return;
        }
        self.events.push(OwnershipEvent {
            variable,
            kind,
            message: message.into(),
            span,
        });
    }

    /// All recorded events in program order
    pub fn events(&self) -> &[OwnershipEvent] {
        &self.events
    }

    /// Events for one variable
    pub fn events_for(&self, variable: Symbol) -> Vec<&OwnershipEvent> {
        self.events
            .iter()
            .filter(|e| e.variable == variable)
            .collect()
    }

    /// Render the timeline for one variable, or for all when `variable` is `None`
    pub fn format(&self, variable: Option<Symbol>) -> String {
        let mut out = String::from("Ownership Timeline:\n");
        for event in &self.events {
            if let Some(var) = variable {
                if event.variable != var {
                    continue;
                }
            }
            out.push_str(&format!(
                "  Line {}: {} {} - {}\n",
                event.span.line,
                event.variable,
                event.kind.label(),
                event.message
            ));
        }
        out
    }

    /// Drain the events out of the timeline
    pub fn take_events(&mut self) -> Vec<OwnershipEvent> {
        std::mem::take(&mut self.events)
    }
}
