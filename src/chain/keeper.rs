//! The buffering node of the SAX chain.
//!
//! A [`SaxEventKeeper`] sits between the upstream event source and the
//! downstream sink while signature work is in progress. It
//!
//! - collects complete element subtrees selected by `Id` or element name,
//!   together with the namespace context they appeared in
//! - optionally blocks output, holding events back so placeholder values
//!   (digests, signature value) can be patched before they are written
//! - reports collecting/blocking transitions through a [`StatusBroadcaster`]

use super::status::{StatusBroadcaster, StatusChange};
use crate::error::{Error, Result};
use crate::xml::c14n::{canonicalize, in_scope_namespaces};
use crate::xml::{local_name, Attributes, DocumentHandler, SaxEvent, SharedHandler};
use std::cell::RefCell;
use std::rc::Rc;

/// Selects the element a collector captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectTarget {
    /// First element whose `Id` attribute equals the value
    ById(String),
    /// First element with this local name
    ByName(String),
}

impl CollectTarget {
    fn matches(&self, name: &str, attributes: &Attributes) -> bool {
        match self {
            CollectTarget::ById(id) => attributes.get("Id") == Some(id.as_str()),
            CollectTarget::ByName(local) => local_name(name) == local,
        }
    }
}

/// Handle of a registered collector.
pub type CollectorId = usize;

/// A captured element subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedElement {
    /// Events from the element's start to its end, inclusive
    pub events: Vec<SaxEvent>,
    /// Namespace bindings in scope at the element's parent
    pub inherited_namespaces: Vec<(String, String)>,
}

/// Turns a collected element into the bytes that get digested.
pub trait TreeBuffer {
    /// Canonical form of the element.
    fn canonicalize(&self, element: &CollectedElement) -> Result<Vec<u8>>;
}

/// Tree buffer producing inclusive canonical XML.
#[derive(Debug, Default, Clone, Copy)]
pub struct C14nTreeBuffer;

impl TreeBuffer for C14nTreeBuffer {
    fn canonicalize(&self, element: &CollectedElement) -> Result<Vec<u8>> {
        canonicalize(&element.events, &element.inherited_namespaces)
    }
}

/// Interface of the buffering node as seen by the controller.
pub trait EventKeeper: DocumentHandler {
    /// Re-target forwarding. `None` drops forwarded events.
    fn set_next_handler(&mut self, next: Option<SharedHandler>);

    /// Forget the open-element ancestry, before a replay rebuilds it.
    fn reset_ancestry(&mut self);

    /// Rebuild ancestry from an event the sink has already seen. The event
    /// is observed by collectors but never forwarded or held back.
    fn replay_ancestor(&mut self, event: &SaxEvent);

    /// Register a collector.
    fn add_collector(&mut self, target: CollectTarget) -> CollectorId;

    /// Release a collector and its captured events.
    fn release_collector(&mut self, id: CollectorId);

    /// Captured element, once the collector has seen the element's end.
    fn collected(&self, id: CollectorId) -> Option<&CollectedElement>;

    /// Mutable access to a captured element.
    fn collected_mut(&mut self, id: CollectorId) -> Option<&mut CollectedElement>;

    /// Canonical bytes of a captured element.
    fn canonicalize(&self, id: CollectorId) -> Result<Vec<u8>>;

    /// Start holding output back.
    fn add_blocker(&mut self);

    /// Stop holding output back, flushing everything held so far.
    fn release_blocker(&mut self) -> Result<()>;

    /// Events held back by the blocker.
    fn blocked_events_mut(&mut self) -> &mut Vec<SaxEvent>;

    /// Whether a collector is pending or active.
    fn is_collecting(&self) -> bool;

    /// Whether output is held back.
    fn is_blocking(&self) -> bool;

    /// Broadcaster for status changes.
    fn broadcaster(&self) -> StatusBroadcaster;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectorState {
    Pending,
    Active { depth: usize },
    Done,
    Released,
}

#[derive(Debug)]
struct Collector {
    target: CollectTarget,
    state: CollectorState,
    element: CollectedElement,
}

/// Default buffering node.
pub struct SaxEventKeeper {
    next: Option<SharedHandler>,
    ancestors: Vec<Attributes>,
    collectors: Vec<Collector>,
    tree_buffer: Box<dyn TreeBuffer>,
    blockers: usize,
    blocked: Vec<SaxEvent>,
    broadcaster: StatusBroadcaster,
    reported_collecting: bool,
    reported_blocking: bool,
}

impl SaxEventKeeper {
    /// Create a keeper that canonicalizes with the given tree buffer.
    pub fn new(tree_buffer: Box<dyn TreeBuffer>) -> Self {
        Self {
            next: None,
            ancestors: Vec::new(),
            collectors: Vec::new(),
            tree_buffer,
            blockers: 0,
            blocked: Vec::new(),
            broadcaster: StatusBroadcaster::new(),
            reported_collecting: false,
            reported_blocking: false,
        }
    }

    fn report_status(&mut self) {
        let collecting = self.is_collecting();
        if collecting != self.reported_collecting {
            self.reported_collecting = collecting;
            self.broadcaster.notify(StatusChange::Collecting(collecting));
        }
        let blocking = self.is_blocking();
        if blocking != self.reported_blocking {
            self.reported_blocking = blocking;
            self.broadcaster.notify(StatusChange::Blocking(blocking));
        }
    }

    fn observe(&mut self, event: &SaxEvent) {
        match event {
            SaxEvent::StartElement { name, attributes } => {
                let depth = self.ancestors.len();
                let mut inherited = None;
                for collector in &mut self.collectors {
                    if collector.state == CollectorState::Pending
                        && collector.target.matches(name, attributes)
                    {
                        let scope = inherited
                            .get_or_insert_with(|| in_scope_namespaces(self.ancestors.iter()));
                        collector.state = CollectorState::Active { depth };
                        collector.element.inherited_namespaces = scope.clone();
                    }
                }
                self.ancestors.push(attributes.clone());
                self.capture(event);
            },
            SaxEvent::EndElement { .. } => {
                self.capture(event);
                self.ancestors.pop();
                let depth = self.ancestors.len();
                for collector in &mut self.collectors {
                    if collector.state == (CollectorState::Active { depth }) {
                        collector.state = CollectorState::Done;
                    }
                }
            },
            SaxEvent::Characters(_) => self.capture(event),
            SaxEvent::StartDocument | SaxEvent::EndDocument => {},
        }
    }

    fn capture(&mut self, event: &SaxEvent) {
        for collector in &mut self.collectors {
            if let CollectorState::Active { .. } = collector.state {
                collector.element.events.push(event.clone());
            }
        }
    }

    fn forward(&mut self, event: &SaxEvent) -> Result<()> {
        if self.blockers > 0 {
            self.blocked.push(event.clone());
            return Ok(());
        }
        if let Some(next) = &self.next {
            next.borrow_mut().handle(event)?;
        }
        Ok(())
    }
}

impl DocumentHandler for SaxEventKeeper {
    fn handle(&mut self, event: &SaxEvent) -> Result<()> {
        self.observe(event);
        self.forward(event)?;
        self.report_status();
        Ok(())
    }
}

impl EventKeeper for SaxEventKeeper {
    fn set_next_handler(&mut self, next: Option<SharedHandler>) {
        self.next = next;
    }

    fn reset_ancestry(&mut self) {
        self.ancestors.clear();
    }

    fn replay_ancestor(&mut self, event: &SaxEvent) {
        self.observe(event);
        self.report_status();
    }

    fn add_collector(&mut self, target: CollectTarget) -> CollectorId {
        log::trace!("Adding collector for {:?}", target);
        self.collectors.push(Collector {
            target,
            state: CollectorState::Pending,
            element: CollectedElement::default(),
        });
        self.report_status();
        self.collectors.len() - 1
    }

    fn release_collector(&mut self, id: CollectorId) {
        if let Some(collector) = self.collectors.get_mut(id) {
            collector.state = CollectorState::Released;
            collector.element = CollectedElement::default();
        }
        self.report_status();
    }

    fn collected(&self, id: CollectorId) -> Option<&CollectedElement> {
        self.collectors
            .get(id)
            .filter(|c| c.state == CollectorState::Done)
            .map(|c| &c.element)
    }

    fn collected_mut(&mut self, id: CollectorId) -> Option<&mut CollectedElement> {
        self.collectors
            .get_mut(id)
            .filter(|c| c.state == CollectorState::Done)
            .map(|c| &mut c.element)
    }

    fn canonicalize(&self, id: CollectorId) -> Result<Vec<u8>> {
        let element = self.collected(id).ok_or_else(|| {
            Error::PreconditionViolated(format!("collector {} has no complete element", id))
        })?;
        self.tree_buffer.canonicalize(element)
    }

    fn add_blocker(&mut self) {
        self.blockers += 1;
        self.report_status();
    }

    fn release_blocker(&mut self) -> Result<()> {
        if self.blockers == 0 {
            return Ok(());
        }
        self.blockers -= 1;
        if self.blockers == 0 {
            let held = std::mem::take(&mut self.blocked);
            log::trace!("Flushing {} held events", held.len());
            if let Some(next) = &self.next {
                let mut next = next.borrow_mut();
                for event in &held {
                    next.handle(event)?;
                }
            }
        }
        self.report_status();
        Ok(())
    }

    fn blocked_events_mut(&mut self) -> &mut Vec<SaxEvent> {
        &mut self.blocked
    }

    fn is_collecting(&self) -> bool {
        self.collectors.iter().any(|c| {
            matches!(
                c.state,
                CollectorState::Pending | CollectorState::Active { .. }
            )
        })
    }

    fn is_blocking(&self) -> bool {
        self.blockers > 0
    }

    fn broadcaster(&self) -> StatusBroadcaster {
        self.broadcaster.clone()
    }
}

/// Shared buffering node.
pub type SharedKeeper = Rc<RefCell<dyn EventKeeper>>;

/// Document-handler view of a shared keeper, for linking it into a chain.
pub struct KeeperInput {
    keeper: SharedKeeper,
}

impl KeeperInput {
    /// Wrap a shared keeper.
    pub fn new(keeper: SharedKeeper) -> Self {
        Self { keeper }
    }
}

impl DocumentHandler for KeeperInput {
    fn handle(&mut self, event: &SaxEvent) -> Result<()> {
        self.keeper.borrow_mut().handle(event)
    }
}
