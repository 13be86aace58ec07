//! The spliceable SAX chain.
//!
//! ```text
//!   upstream ──▶ [ buffering node ] ──▶ downstream
//!       │             ▲
//!       └─ tee ─▶ element stack (replayed at splice-in)
//! ```
//!
//! The upstream node is a [`ChainSource`]: its target can be switched between
//! the downstream sink and the buffering node at any event boundary.

pub mod keeper;
pub mod stack;
pub mod status;

pub use keeper::{
    C14nTreeBuffer, CollectTarget, CollectedElement, CollectorId, EventKeeper, KeeperInput,
    SaxEventKeeper, SharedKeeper, TreeBuffer,
};
pub use stack::ElementStackKeeper;
pub use status::{StatusBroadcaster, StatusChange, StatusSubscription};

use crate::error::Result;
use crate::xml::{DocumentHandler, SaxEvent, SharedHandler};
use std::cell::RefCell;
use std::rc::Rc;

/// Upstream node whose forwarding target can be re-pointed.
pub trait ChainSource: DocumentHandler {
    /// Point forwarding at `target`; `None` drops events.
    fn set_document_handler(&mut self, target: Option<SharedHandler>);
}

/// Shared upstream node.
pub type SharedSource = Rc<RefCell<dyn ChainSource>>;

/// Plain upstream node used when writing signatures.
///
/// Forwards to its target and tees every event into the element stack.
#[derive(Default)]
pub struct ChainHead {
    target: Option<SharedHandler>,
    stack: Option<Rc<RefCell<ElementStackKeeper>>>,
}

impl ChainHead {
    /// Create a head forwarding to `target`.
    pub fn new(target: Option<SharedHandler>) -> Self {
        Self {
            target,
            stack: None,
        }
    }

    /// Tee events into an element stack.
    pub fn with_element_stack(mut self, stack: Rc<RefCell<ElementStackKeeper>>) -> Self {
        self.stack = Some(stack);
        self
    }
}

impl DocumentHandler for ChainHead {
    fn handle(&mut self, event: &SaxEvent) -> Result<()> {
        if let Some(stack) = &self.stack {
            stack.borrow_mut().record(event);
        }
        if let Some(target) = &self.target {
            target.borrow_mut().handle(event)?;
        }
        Ok(())
    }
}

impl ChainSource for ChainHead {
    fn set_document_handler(&mut self, target: Option<SharedHandler>) {
        self.target = target;
    }
}
