//! Replay buffer for the currently open elements.
//!
//! While the buffering node is not spliced in, the upstream node tees its
//! events here. At splice-in time the open start elements are replayed into
//! the buffering node so it knows the ancestry (and namespace context) of
//! the element that triggered the splice.

use crate::error::Result;
use crate::xml::{DocumentHandler, SaxEvent};

/// Tracks the stack of open start elements.
#[derive(Debug, Default)]
pub struct ElementStackKeeper {
    capturing: bool,
    open: Vec<SaxEvent>,
}

impl ElementStackKeeper {
    /// Create an idle keeper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin capturing for a later replay.
    pub fn start(&mut self) {
        self.capturing = true;
    }

    /// Stop capturing. The open-element stack is still maintained.
    pub fn stop(&mut self) {
        self.capturing = false;
    }

    /// Whether a replay is currently meaningful.
    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Number of open elements.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Observe one event.
    pub fn record(&mut self, event: &SaxEvent) {
        match event {
            SaxEvent::StartElement { .. } => self.open.push(event.clone()),
            SaxEvent::EndElement { .. } => {
                self.open.pop();
            },
            SaxEvent::StartDocument => self.open.clear(),
            _ => {},
        }
    }

    /// Replay the open start elements into `handler`.
    ///
    /// With `include_last == false` the innermost open element is skipped,
    /// for when that element will reach the handler through the chain.
    pub fn retrieve(&self, handler: &mut dyn DocumentHandler, include_last: bool) -> Result<()> {
        if !self.capturing {
            log::debug!("Element stack retrieve requested while idle");
            return Ok(());
        }
        let count = if include_last {
            self.open.len()
        } else {
            self.open.len().saturating_sub(1)
        };
        for event in &self.open[..count] {
            handler.handle(event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{Attributes, EventRecorder};

    fn feed(keeper: &mut ElementStackKeeper, events: &[SaxEvent]) {
        for event in events {
            keeper.record(event);
        }
    }

    #[test]
    fn test_retrieve_open_elements() {
        let mut keeper = ElementStackKeeper::new();
        keeper.start();
        feed(
            &mut keeper,
            &[
                SaxEvent::StartDocument,
                SaxEvent::start("root", Attributes::new()),
                SaxEvent::start("closed", Attributes::new()),
                SaxEvent::end("closed"),
                SaxEvent::start("sig", Attributes::new()),
            ],
        );
        assert_eq!(keeper.depth(), 2);

        let mut all = EventRecorder::new();
        keeper.retrieve(&mut all, true).unwrap();
        assert_eq!(all.events().len(), 2);
        assert!(all.events()[1].is_start_of("sig"));

        let mut parents = EventRecorder::new();
        keeper.retrieve(&mut parents, false).unwrap();
        assert_eq!(parents.events().len(), 1);
        assert!(parents.events()[0].is_start_of("root"));
    }

    #[test]
    fn test_idle_keeper_tracks_but_does_not_replay() {
        let mut keeper = ElementStackKeeper::new();
        feed(&mut keeper, &[SaxEvent::start("root", Attributes::new())]);
        let mut recorder = EventRecorder::new();
        keeper.retrieve(&mut recorder, true).unwrap();
        assert!(recorder.events().is_empty());

        keeper.start();
        keeper.retrieve(&mut recorder, true).unwrap();
        assert_eq!(recorder.events().len(), 1);
    }
}
