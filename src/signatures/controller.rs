//! SAX Chain Controller.
//!
//! Owns the decision whether the buffering node is spliced into the live
//! event chain:
//!
//! ```text
//!   unspliced:  upstream ───────────────────────▶ downstream
//!   spliced:    upstream ──▶ buffering node ──▶ downstream
//! ```
//!
//! The node is spliced in exactly while it collects an element or blocks
//! output. Status changes reported by the node are drained after every
//! event the controller drives, so a notification never re-enters a splice
//! that is still in progress.
//!
//! On top of the splicing the controller runs the two signature missions:
//! creating a signature (stream digests, template streamed through the
//! blocked node, same-document digests and signature value patched in) and
//! reading signatures (parse, collect, verify).

use super::engine::{
    decode_base64, encode_base64, SecurityComponents, SecurityContext, SignatureEngine,
    UriBinding,
};
use super::export::odf::export_signature;
use super::export::ooxml::{
    export_relationship_signature, OFFICE_OBJECT_ID, PACKAGE_OBJECT_ID, PACKAGE_SIGNATURE_ID,
    SIGNED_PROPERTIES_ID,
};
use super::parser::{ParseNotice, SignatureParser};
use super::types::{
    ReferenceKind, ReferenceRecord, SecurityId, SignatureDialect, SignatureRecord,
    VerificationStatus,
};
use crate::chain::{
    ChainHead, ChainSource, CollectTarget, CollectorId, ElementStackKeeper, EventKeeper,
    KeeperInput, SharedKeeper, SharedSource, StatusSubscription,
};
use crate::error::{Error, Result};
use crate::package::relationships::{is_relationships_uri, relationship_transform};
use crate::package::Package;
use crate::xml::{
    canonicalize_document, local_name, read_events, DocumentHandler, EventRecorder, SaxEvent,
    SharedHandler, XmlEventWriter,
};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::rc::Rc;
use uuid::Uuid;

/// Lifecycle of the security components within a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComponentStatus {
    /// Not created yet
    #[default]
    Uninitialized,
    /// Engine, tree buffer and buffering node are available
    Ready,
    /// Creation failed; stays failed until the next mission
    Failed,
}

/// The links around the buffering node.
struct ChainConnector {
    upstream: SharedSource,
    downstream: Option<SharedHandler>,
    replay: Option<Rc<RefCell<ElementStackKeeper>>>,
}

/// Collectors registered for the signature being read.
#[derive(Debug, Default)]
struct PendingVerification {
    signed_info: Option<CollectorId>,
    targets: Vec<(String, CollectorId)>,
}

/// Document-handler view of the upstream node.
struct SourceInput(SharedSource);

impl DocumentHandler for SourceInput {
    fn handle(&mut self, event: &SaxEvent) -> Result<()> {
        self.0.borrow_mut().handle(event)
    }
}

/// Drives the buffering node and the signature missions.
pub struct SignatureController {
    components: Rc<dyn SecurityComponents>,
    sticky: bool,
    status: ComponentStatus,
    engine: Option<Box<dyn SignatureEngine>>,
    keeper: Option<SharedKeeper>,
    subscription: Option<StatusSubscription>,
    connector: Option<ChainConnector>,
    spliced: bool,
    binding: Option<Rc<dyn UriBinding>>,
    security_context: Option<Rc<dyn SecurityContext>>,
    records: Vec<SignatureRecord>,
    pending: Option<PendingVerification>,
    next_security_id: SecurityId,
    in_mission: bool,
}

impl SignatureController {
    /// Create a controller building its components with `components`.
    pub fn new(components: Rc<dyn SecurityComponents>) -> Self {
        Self {
            components,
            sticky: false,
            status: ComponentStatus::Uninitialized,
            engine: None,
            keeper: None,
            subscription: None,
            connector: None,
            spliced: false,
            binding: None,
            security_context: None,
            records: Vec::new(),
            pending: None,
            next_security_id: 1,
            in_mission: false,
        }
    }

    /// Keep the buffering node spliced from connect to disconnect.
    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    /// Component status of the current mission.
    pub fn status(&self) -> ComponentStatus {
        self.status
    }

    /// Whether the buffering node is currently part of the chain.
    pub fn is_spliced(&self) -> bool {
        self.spliced
    }

    /// Buffering node, once components were created.
    pub fn event_keeper(&self) -> Option<SharedKeeper> {
        self.keeper.clone()
    }

    /// Begin a mission.
    pub fn start_mission(
        &mut self,
        binding: Option<Rc<dyn UriBinding>>,
        security_context: Option<Rc<dyn SecurityContext>>,
    ) {
        if self.in_mission {
            log::warn!("Starting a mission while the previous one is still open");
            self.end_mission();
        }
        self.records.clear();
        self.pending = None;
        self.status = ComponentStatus::Uninitialized;
        self.binding = binding;
        self.security_context = security_context;
        self.in_mission = true;
    }

    /// End the mission, releasing every collector, subscription and binding.
    ///
    /// Safe to call when components were never created or failed.
    pub fn end_mission(&mut self) {
        if self.status == ComponentStatus::Ready {
            self.release_pending();
        }
        self.clear_chain_connector();
        self.binding = None;
        self.security_context = None;
        self.subscription = None;
        self.keeper = None;
        self.engine = None;
        self.status = ComponentStatus::Uninitialized;
        self.in_mission = false;
    }

    /// Allocate a signature handle. Handles are never reused.
    pub fn new_security_id(&mut self) -> SecurityId {
        let id = self.next_security_id;
        self.next_security_id += 1;
        id
    }

    /// Create the components if this mission has not tried yet.
    ///
    /// Returns whether they are available.
    pub fn ensure_components(&mut self) -> bool {
        if self.status == ComponentStatus::Uninitialized {
            let engine = self.components.create_engine();
            let keeper = self
                .components
                .create_tree_buffer()
                .and_then(|buffer| self.components.create_event_keeper(buffer));
            match (engine, keeper) {
                (Some(engine), Some(keeper)) => {
                    self.subscription = Some(keeper.borrow().broadcaster().subscribe());
                    self.engine = Some(engine);
                    self.keeper = Some(keeper);
                    self.status = ComponentStatus::Ready;
                },
                _ => {
                    log::warn!("Security components unavailable for this mission");
                    self.status = ComponentStatus::Failed;
                },
            }
        }
        self.status == ComponentStatus::Ready
    }

    /// Describe the chain around the buffering node.
    ///
    /// `upstream` must currently forward to `downstream`. The replay buffer,
    /// if any, is started so splice-in can rebuild the open ancestry.
    pub fn set_chain_connector(
        &mut self,
        upstream: SharedSource,
        downstream: Option<SharedHandler>,
        replay: Option<Rc<RefCell<ElementStackKeeper>>>,
    ) -> Result<()> {
        self.clear_chain_connector();
        if let Some(replay) = &replay {
            replay.borrow_mut().start();
        }
        self.connector = Some(ChainConnector {
            upstream,
            downstream,
            replay,
        });
        if self.sticky {
            self.connect_keeper(true)?;
        }
        Ok(())
    }

    /// Forget the chain, unsplicing first if needed.
    pub fn clear_chain_connector(&mut self) {
        if self.spliced {
            self.disconnect_keeper();
        }
        self.connector = None;
    }

    /// Splice the buffering node in.
    ///
    /// With `retrieve_last` the replay includes the innermost open element,
    /// for when the event that caused the splice was already delivered.
    /// Returns whether a splice happened.
    pub fn splice_in(&mut self, retrieve_last: bool) -> Result<bool> {
        if self.spliced || self.sticky {
            return Ok(false);
        }
        self.connect_keeper(retrieve_last)
    }

    /// Take the buffering node out of the chain.
    pub fn splice_out(&mut self) {
        if !self.spliced || self.sticky {
            return;
        }
        self.disconnect_keeper();
    }

    /// Spliced iff the buffering node collects or blocks.
    pub fn reconcile_splice_state(&mut self) -> Result<()> {
        let (collecting, blocking) = match &self.keeper {
            Some(keeper) => {
                let keeper = keeper.borrow();
                (keeper.is_collecting(), keeper.is_blocking())
            },
            None => (false, false),
        };
        if collecting || blocking {
            self.splice_in(true)?;
        } else {
            self.splice_out();
        }
        Ok(())
    }

    /// Drain queued status changes and reconcile once if there were any.
    pub fn dispatch_status_changes(&mut self) -> Result<()> {
        let mut changed = false;
        if let Some(subscription) = &self.subscription {
            while let Some(change) = subscription.next_change() {
                log::trace!("Buffering node status: {:?}", change);
                changed = true;
            }
        }
        if changed {
            self.reconcile_splice_state()?;
        }
        Ok(())
    }

    fn connect_keeper(&mut self, retrieve_last: bool) -> Result<bool> {
        if self.spliced || !self.ensure_components() {
            return Ok(false);
        }
        let (Some(keeper), Some(connector)) = (self.keeper.clone(), self.connector.as_ref()) else {
            return Ok(false);
        };

        // The sink has already seen the open elements: they only rebuild ancestry
        keeper.borrow_mut().set_next_handler(None);
        keeper.borrow_mut().reset_ancestry();
        if let Some(replay) = &connector.replay {
            let mut ancestry = EventRecorder::new();
            replay.borrow().retrieve(&mut ancestry, retrieve_last)?;
            replay.borrow_mut().stop();
            let mut keeper = keeper.borrow_mut();
            for event in ancestry.events() {
                keeper.replay_ancestor(event);
            }
        }

        let input: SharedHandler = Rc::new(RefCell::new(KeeperInput::new(Rc::clone(&keeper))));
        connector.upstream.borrow_mut().set_document_handler(Some(input));
        keeper
            .borrow_mut()
            .set_next_handler(connector.downstream.clone());

        self.spliced = true;
        log::debug!("Buffering node spliced in");
        Ok(true)
    }

    fn disconnect_keeper(&mut self) {
        if let Some(keeper) = &self.keeper {
            keeper.borrow_mut().set_next_handler(None);
        }
        if let Some(connector) = &self.connector {
            connector
                .upstream
                .borrow_mut()
                .set_document_handler(connector.downstream.clone());
            if let Some(replay) = &connector.replay {
                replay.borrow_mut().start();
            }
        }
        self.spliced = false;
        log::debug!("Buffering node spliced out");
    }

    fn record_mut(&mut self, id: SecurityId) -> &mut SignatureRecord {
        let index = match self.records.iter().position(|r| r.security_id == id) {
            Some(index) => index,
            None => {
                self.records.push(SignatureRecord::new(id));
                self.records.len() - 1
            },
        };
        &mut self.records[index]
    }

    fn record_index(&self, id: SecurityId) -> Result<usize> {
        self.records
            .iter()
            .position(|r| r.security_id == id)
            .ok_or_else(|| Error::PreconditionViolated(format!("unknown signature {}", id)))
    }

    /// Set the signer certificate of a signature.
    pub fn set_x509_certificate(
        &mut self,
        id: SecurityId,
        issuer_name: &str,
        serial_number: &str,
        certificate: &str,
        certificate_digest: Option<String>,
    ) {
        let record = self.record_mut(id);
        record.issuer_name = issuer_name.to_string();
        record.serial_number = serial_number.to_string();
        record.certificate = certificate.to_string();
        record.certificate_digest = certificate_digest;
    }

    /// Add a package entry to a signature.
    pub fn add_for_signing(&mut self, id: SecurityId, uri: &str, binary: bool) {
        self.record_mut(id)
            .references
            .push(ReferenceRecord::stream(uri, binary));
    }

    /// Set the signing time.
    pub fn set_date_time(&mut self, id: SecurityId, date_time: DateTime<Utc>) {
        let record = self.record_mut(id);
        record.date_time = Some(date_time);
        record.date_time_text = None;
    }

    /// Set the signature comment.
    pub fn set_description(&mut self, id: SecurityId, description: &str) {
        self.record_mut(id).description = description.to_string();
    }

    /// Signatures created or read in this mission.
    pub fn signature_records(&self) -> &[SignatureRecord] {
        &self.records
    }

    /// One signature by handle.
    pub fn signature_record(&self, id: SecurityId) -> Option<&SignatureRecord> {
        self.records.iter().find(|r| r.security_id == id)
    }

    /// Create a canonical-dialect signature and stream it through the chain.
    ///
    /// The chain connector must be set; the signature is written at the
    /// current position of the upstream node.
    pub fn create_and_write_signature(&mut self, id: SecurityId) -> Result<()> {
        let index = self.record_index(id)?;
        {
            let record = &mut self.records[index];
            record.references.retain(|r| !r.is_same_document());
            record.validate()?;

            let property_id = new_xml_id();
            record.signature_id = Some(new_xml_id());
            record
                .references
                .push(ReferenceRecord::same_document(property_id.as_str()));
            record.property_id = Some(property_id);
            if record.description.is_empty() {
                record.description_property_id = None;
            } else {
                let description_id = new_xml_id();
                record
                    .references
                    .push(ReferenceRecord::same_document(description_id.as_str()));
                record.description_property_id = Some(description_id);
            }
        }
        self.write_signature(id, SignatureDialect::Canonical, None)
    }

    /// Create a relationship-dialect signature as a standalone part.
    ///
    /// The XAdES signed properties are referenced unless `test_mode` is set.
    pub fn create_and_write_relationship_signature(
        &mut self,
        id: SecurityId,
        package: &dyn Package,
        test_mode: bool,
    ) -> Result<Vec<u8>> {
        let index = self.record_index(id)?;
        {
            let record = &mut self.records[index];
            record.references.retain(|r| !r.is_same_document());
            record.validate()?;

            record.signature_id = Some(PACKAGE_SIGNATURE_ID.to_string());
            record
                .references
                .push(ReferenceRecord::same_document(PACKAGE_OBJECT_ID));
            record
                .references
                .push(ReferenceRecord::same_document(OFFICE_OBJECT_ID));
            if !test_mode {
                record
                    .references
                    .push(ReferenceRecord::same_document(SIGNED_PROPERTIES_ID));
            }
        }

        let writer = Rc::new(RefCell::new(XmlEventWriter::new(Vec::new())));
        let stack = Rc::new(RefCell::new(ElementStackKeeper::new()));
        let downstream: SharedHandler = writer.clone();
        let head = Rc::new(RefCell::new(
            ChainHead::new(Some(Rc::clone(&downstream))).with_element_stack(Rc::clone(&stack)),
        ));
        let upstream: SharedSource = head.clone();
        self.set_chain_connector(upstream, Some(downstream), Some(stack))?;

        let mut result = head.borrow_mut().start_document();
        if result.is_ok() {
            result = self.write_signature(id, SignatureDialect::Relationship, Some(package));
        }
        if result.is_ok() {
            result = head.borrow_mut().end_document();
        }
        self.clear_chain_connector();
        result?;

        let bytes = writer.borrow_mut().take_bytes();
        Ok(bytes)
    }

    fn write_signature(
        &mut self,
        id: SecurityId,
        dialect: SignatureDialect,
        package: Option<&dyn Package>,
    ) -> Result<()> {
        let index = self.record_index(id)?;
        let context = self.security_context.clone().ok_or_else(|| {
            Error::PreconditionViolated("no security context in this mission".to_string())
        })?;
        if !self.ensure_components() {
            return Err(Error::ComponentUnavailable(
                "security components could not be created".to_string(),
            ));
        }
        let keeper = self.keeper.clone().ok_or_else(|| {
            Error::ComponentUnavailable("buffering node missing".to_string())
        })?;

        let mut record = self.records[index].clone();
        record.signature_algorithm = dialect.signature_algorithm();
        for reference in &mut record.references {
            reference.digest_algorithm = dialect.digest_algorithm();
        }
        self.digest_streams(&mut record, dialect)?;

        let signed_info = keeper
            .borrow_mut()
            .add_collector(CollectTarget::ByName("SignedInfo".to_string()));
        let targets: Vec<(String, CollectorId)> = record
            .references
            .iter()
            .filter(|r| r.is_same_document())
            .map(|r| {
                let collector = keeper
                    .borrow_mut()
                    .add_collector(CollectTarget::ById(r.uri.clone()));
                (r.uri.clone(), collector)
            })
            .collect();
        self.dispatch_status_changes()?;

        if !self.spliced {
            release_collectors(&keeper, Some(signed_info), &targets);
            self.dispatch_status_changes()?;
            return Err(Error::ComponentUnavailable(
                "no SAX chain to splice the buffering node into".to_string(),
            ));
        }

        // Hold the whole signature back until the digests are in place
        keeper.borrow_mut().add_blocker();
        self.dispatch_status_changes()?;

        let result = self.emit_and_sign(
            &mut record,
            dialect,
            package,
            &keeper,
            signed_info,
            &targets,
            context.as_ref(),
        );

        release_collectors(&keeper, Some(signed_info), &targets);
        if result.is_err() {
            keeper.borrow_mut().blocked_events_mut().clear();
        }
        let flushed = keeper.borrow_mut().release_blocker();
        self.dispatch_status_changes()?;
        result?;
        flushed?;

        log::info!(
            "Created signature {} with {} references",
            id,
            record.references.len()
        );
        self.records[index] = record;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_and_sign(
        &self,
        record: &mut SignatureRecord,
        dialect: SignatureDialect,
        package: Option<&dyn Package>,
        keeper: &SharedKeeper,
        signed_info: CollectorId,
        targets: &[(String, CollectorId)],
        context: &dyn SecurityContext,
    ) -> Result<()> {
        let upstream = self
            .connector
            .as_ref()
            .map(|c| Rc::clone(&c.upstream))
            .ok_or_else(|| Error::PreconditionViolated("no chain connector".to_string()))?;
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| Error::ComponentUnavailable("signature engine missing".to_string()))?;

        let mut input = SourceInput(upstream);
        match dialect {
            SignatureDialect::Canonical => export_signature(&mut input, record)?,
            SignatureDialect::Relationship => {
                let package = package.ok_or_else(|| {
                    Error::PreconditionViolated(
                        "relationship signatures need the package".to_string(),
                    )
                })?;
                export_relationship_signature(&mut input, record, package)?;
            },
        }

        let mut keeper = keeper.borrow_mut();
        for (uri, collector) in targets {
            let data = keeper.canonicalize(*collector)?;
            let value = encode_base64(&engine.digest(dialect.digest_algorithm(), &data));
            let attribute = format!("#{}", uri);
            patch_reference_digest(keeper.blocked_events_mut(), &attribute, &value);
            if let Some(element) = keeper.collected_mut(signed_info) {
                patch_reference_digest(&mut element.events, &attribute, &value);
            }
            for reference in record
                .references
                .iter_mut()
                .filter(|r| r.is_same_document() && &r.uri == uri)
            {
                reference.digest_value = value.clone();
            }
        }

        let signed_info_bytes = keeper.canonicalize(signed_info)?;
        let signature = context.sign(dialect.signature_algorithm(), &signed_info_bytes)?;
        record.signature_value = encode_base64(&signature);
        patch_element_text(
            keeper.blocked_events_mut(),
            "SignatureValue",
            &record.signature_value,
        );
        Ok(())
    }

    fn digest_streams(&self, record: &mut SignatureRecord, dialect: SignatureDialect) -> Result<()> {
        let binding = self.binding.as_ref().ok_or_else(|| {
            Error::PreconditionViolated("no URI binding in this mission".to_string())
        })?;
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| Error::ComponentUnavailable("signature engine missing".to_string()))?;
        for reference in record
            .references
            .iter_mut()
            .filter(|r| !r.is_same_document())
        {
            let data = digest_input(dialect, reference, binding.resolve(&reference.uri)?)?;
            reference.digest_value = encode_base64(&engine.digest(reference.digest_algorithm, &data));
        }
        Ok(())
    }

    /// Parse signatures from `xml` and verify each one.
    ///
    /// A malformed document does not fail the read: the signature that was
    /// being parsed is kept with status [`VerificationStatus::Invalid`].
    /// With `keep_stream_bytes` every record parsed from `xml` keeps the whole
    /// stream for verbatim re-export. Relationship streams hold one signature.
    pub fn read_and_verify(
        &mut self,
        xml: &[u8],
        dialect: SignatureDialect,
        keep_stream_bytes: bool,
    ) -> Result<()> {
        let stack = Rc::new(RefCell::new(ElementStackKeeper::new()));
        let parser = Rc::new(RefCell::new(
            SignatureParser::new(None).with_element_stack(Rc::clone(&stack)),
        ));
        let upstream: SharedSource = parser.clone();
        self.set_chain_connector(upstream, None, Some(stack))?;

        let outcome = read_events(xml, |event| {
            parser.borrow_mut().handle(&event)?;
            self.handle_notices(&parser, xml, dialect, keep_stream_bytes)
        });

        if let Err(e) = outcome {
            log::warn!("Signature stream is malformed: {}", e);
            let partial = parser.borrow_mut().take_partial();
            if let Some(mut record) = partial {
                record.security_id = self.new_security_id();
                record.status = VerificationStatus::Invalid;
                self.records.push(record);
            }
        }
        self.release_pending();
        self.dispatch_status_changes()?;
        self.clear_chain_connector();
        Ok(())
    }

    fn handle_notices(
        &mut self,
        parser: &Rc<RefCell<SignatureParser>>,
        xml: &[u8],
        dialect: SignatureDialect,
        keep_stream_bytes: bool,
    ) -> Result<()> {
        loop {
            let notice = parser.borrow_mut().next_notice();
            let Some(notice) = notice else {
                break;
            };
            match notice {
                ParseNotice::SignatureStarted => {
                    self.release_pending();
                    let signed_info = if self.ensure_components() {
                        self.keeper.as_ref().map(|keeper| {
                            keeper
                                .borrow_mut()
                                .add_collector(CollectTarget::ByName("SignedInfo".to_string()))
                        })
                    } else {
                        None
                    };
                    self.pending = Some(PendingVerification {
                        signed_info,
                        targets: Vec::new(),
                    });
                },
                ParseNotice::SameDocumentReference(id) => {
                    if let (Some(keeper), Some(pending)) = (&self.keeper, self.pending.as_mut()) {
                        let collector = keeper
                            .borrow_mut()
                            .add_collector(CollectTarget::ById(id.clone()));
                        pending.targets.push((id, collector));
                    }
                },
                ParseNotice::SignatureFinished(mut record) => {
                    record.security_id = self.new_security_id();
                    record.status = self.verify(&record, dialect);
                    if keep_stream_bytes {
                        record.raw_bytes = Some(xml.to_vec());
                    }
                    log::debug!("Read signature {}: {:?}", record.security_id, record.status);
                    self.release_pending();
                    self.records.push(record);
                },
            }
            self.dispatch_status_changes()?;
        }
        self.dispatch_status_changes()
    }

    fn release_pending(&mut self) {
        if let (Some(pending), Some(keeper)) = (self.pending.take(), &self.keeper) {
            release_collectors(keeper, pending.signed_info, &pending.targets);
        }
    }

    /// Check every digest and the signature value of a parsed record.
    fn verify(&self, record: &SignatureRecord, dialect: SignatureDialect) -> VerificationStatus {
        let (Some(engine), Some(keeper), Some(pending)) =
            (&self.engine, &self.keeper, &self.pending)
        else {
            return VerificationStatus::Unknown;
        };
        let keeper = keeper.borrow();

        for reference in &record.references {
            let data = if reference.is_same_document() {
                let collector = pending
                    .targets
                    .iter()
                    .find(|(id, _)| id == &reference.uri)
                    .map(|(_, collector)| *collector);
                match collector.map(|c| keeper.canonicalize(c)) {
                    Some(Ok(data)) => data,
                    _ => {
                        log::debug!("Referenced element #{} not found", reference.uri);
                        return VerificationStatus::Invalid;
                    },
                }
            } else {
                let Some(binding) = &self.binding else {
                    return VerificationStatus::Unknown;
                };
                match binding
                    .resolve(&reference.uri)
                    .and_then(|bytes| digest_input(dialect, reference, bytes))
                {
                    Ok(data) => data,
                    Err(e) => {
                        log::debug!("Cannot digest {}: {}", reference.uri, e);
                        return VerificationStatus::Invalid;
                    },
                }
            };
            let digest = engine.digest(reference.digest_algorithm, &data);
            match decode_base64(&reference.digest_value) {
                Ok(expected) if expected == digest => {},
                _ => {
                    log::debug!("Digest mismatch for {}", reference.uri);
                    return VerificationStatus::Invalid;
                },
            }
        }

        let Some(signed_info) = pending.signed_info else {
            return VerificationStatus::Unknown;
        };
        let Ok(signed_info) = keeper.canonicalize(signed_info) else {
            return VerificationStatus::Invalid;
        };
        if record.certificate.is_empty() {
            return VerificationStatus::Unknown;
        }
        let (Ok(certificate), Ok(signature)) = (
            decode_base64(&record.certificate),
            decode_base64(&record.signature_value),
        ) else {
            return VerificationStatus::Invalid;
        };
        match engine.verify(record.signature_algorithm, &certificate, &signed_info, &signature) {
            Ok(true) => VerificationStatus::Valid,
            Ok(false) => VerificationStatus::Invalid,
            Err(e) => {
                log::warn!("Cannot verify signature {}: {}", record.security_id, e);
                VerificationStatus::Unknown
            },
        }
    }
}

impl Default for SignatureController {
    fn default() -> Self {
        Self::new(Rc::new(super::engine::DefaultComponents))
    }
}

/// Bytes that get digested for a stream reference.
///
/// Canonical signatures canonicalize XML entries; relationship signatures
/// apply the relationship transform to relationship parts. Everything else
/// is digested as stored.
pub fn digest_input(
    dialect: SignatureDialect,
    reference: &ReferenceRecord,
    bytes: Vec<u8>,
) -> Result<Vec<u8>> {
    match dialect {
        SignatureDialect::Canonical if reference.kind == ReferenceKind::XmlStream => {
            canonicalize_document(&bytes)
        },
        SignatureDialect::Relationship if is_relationships_uri(&reference.uri) => {
            relationship_transform(&bytes)
        },
        _ => Ok(bytes),
    }
}

fn new_xml_id() -> String {
    format!("ID_{}", Uuid::new_v4().simple())
}

fn release_collectors(
    keeper: &SharedKeeper,
    signed_info: Option<CollectorId>,
    targets: &[(String, CollectorId)],
) {
    let mut keeper = keeper.borrow_mut();
    if let Some(collector) = signed_info {
        keeper.release_collector(collector);
    }
    for (_, collector) in targets {
        keeper.release_collector(*collector);
    }
}

/// Replace the text of the first `local` element.
fn patch_element_text(events: &mut [SaxEvent], local: &str, value: &str) -> bool {
    let Some(start) = events.iter().position(|e| e.is_start_of(local)) else {
        return false;
    };
    match events.get_mut(start + 1) {
        Some(SaxEvent::Characters(text)) => {
            *text = value.to_string();
            true
        },
        _ => false,
    }
}

/// Replace the digest value of the reference whose `URI` is `uri`.
fn patch_reference_digest(events: &mut [SaxEvent], uri: &str, value: &str) -> bool {
    let start = events.iter().position(|e| match e {
        SaxEvent::StartElement { name, attributes } => {
            local_name(name) == "Reference" && attributes.get("URI") == Some(uri)
        },
        _ => false,
    });
    match start {
        Some(start) => patch_element_text(&mut events[start..], "DigestValue", value),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TreeBuffer;
    use crate::signatures::engine::{DefaultComponents, RsaSecurityContext};
    use crate::xml::Attributes;

    struct NoComponents;

    impl SecurityComponents for NoComponents {
        fn create_engine(&self) -> Option<Box<dyn SignatureEngine>> {
            None
        }

        fn create_tree_buffer(&self) -> Option<Box<dyn TreeBuffer>> {
            None
        }

        fn create_event_keeper(
            &self,
            _tree_buffer: Box<dyn TreeBuffer>,
        ) -> Option<Rc<RefCell<dyn EventKeeper>>> {
            None
        }
    }

    struct Chain {
        head: Rc<RefCell<ChainHead>>,
        sink: Rc<RefCell<EventRecorder>>,
        stack: Rc<RefCell<ElementStackKeeper>>,
    }

    fn connect(controller: &mut SignatureController) -> Chain {
        let sink = Rc::new(RefCell::new(EventRecorder::new()));
        let stack = Rc::new(RefCell::new(ElementStackKeeper::new()));
        let downstream: SharedHandler = sink.clone();
        let head = Rc::new(RefCell::new(
            ChainHead::new(Some(Rc::clone(&downstream))).with_element_stack(Rc::clone(&stack)),
        ));
        let upstream: SharedSource = head.clone();
        controller
            .set_chain_connector(upstream, Some(downstream), Some(Rc::clone(&stack)))
            .unwrap();
        Chain { head, sink, stack }
    }

    #[test]
    fn test_splice_follows_collecting() {
        let mut controller = SignatureController::default();
        controller.start_mission(None, None);
        let chain = connect(&mut controller);

        chain.head.borrow_mut().start_document().unwrap();
        chain
            .head
            .borrow_mut()
            .start_element("root", Attributes::new().with("xmlns", "urn:r"))
            .unwrap();
        assert!(!controller.is_spliced());

        assert!(controller.ensure_components());
        let keeper = controller.event_keeper().unwrap();
        let collector = keeper
            .borrow_mut()
            .add_collector(CollectTarget::ById("x".to_string()));
        controller.dispatch_status_changes().unwrap();
        assert!(controller.is_spliced());
        assert!(!chain.stack.borrow().is_capturing());

        chain
            .head
            .borrow_mut()
            .start_element("a", Attributes::new().with("Id", "x"))
            .unwrap();
        chain.head.borrow_mut().end_element("a").unwrap();
        let collected = keeper.borrow().canonicalize(collector).unwrap();
        assert_eq!(collected, br#"<a xmlns="urn:r" Id="x"></a>"#.to_vec());

        keeper.borrow_mut().release_collector(collector);
        controller.dispatch_status_changes().unwrap();
        assert!(!controller.is_spliced());
        assert!(chain.stack.borrow().is_capturing());

        chain.head.borrow_mut().end_element("root").unwrap();
        // Every event reached the sink exactly once, the replay included
        assert_eq!(chain.sink.borrow().events().len(), 5);
        controller.end_mission();
        assert_eq!(controller.status(), ComponentStatus::Uninitialized);
    }

    #[test]
    fn test_blocker_splice_delivers_ancestry_once() {
        let mut controller = SignatureController::default();
        controller.start_mission(None, None);
        let chain = connect(&mut controller);
        assert!(controller.ensure_components());
        let keeper = controller.event_keeper().unwrap();

        chain
            .head
            .borrow_mut()
            .start_element("root", Attributes::new())
            .unwrap();
        keeper.borrow_mut().add_blocker();
        controller.dispatch_status_changes().unwrap();
        assert!(controller.is_spliced());
        keeper.borrow_mut().release_blocker().unwrap();
        controller.dispatch_status_changes().unwrap();
        assert!(!controller.is_spliced());
        chain.head.borrow_mut().end_element("root").unwrap();

        let events = chain.sink.borrow().events().to_vec();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_start_of("root"));
        assert!(events[1].is_end_of("root"));
        controller.end_mission();
    }

    #[test]
    fn test_sticky_stays_spliced() {
        let mut controller = SignatureController::default().with_sticky(true);
        controller.start_mission(None, None);
        let _chain = connect(&mut controller);
        assert!(controller.is_spliced());

        controller.reconcile_splice_state().unwrap();
        assert!(controller.is_spliced());
        controller.splice_out();
        assert!(controller.is_spliced());

        controller.clear_chain_connector();
        assert!(!controller.is_spliced());
    }

    #[test]
    fn test_failed_components_stay_unspliced() {
        let context =
            RsaSecurityContext::from_pkcs8_pem(include_str!("../../tests/fixtures/signer_key.pem"))
                .unwrap();
        let mut controller = SignatureController::new(Rc::new(NoComponents));
        controller.start_mission(None, Some(Rc::new(context)));
        let _chain = connect(&mut controller);
        assert!(!controller.splice_in(false).unwrap());
        assert_eq!(controller.status(), ComponentStatus::Failed);

        let id = controller.new_security_id();
        controller.add_for_signing(id, "content.xml", false);
        assert!(matches!(
            controller.create_and_write_signature(id),
            Err(Error::ComponentUnavailable(_))
        ));
        controller.end_mission();
    }

    #[test]
    fn test_security_ids_are_not_reused() {
        let mut controller = SignatureController::new(Rc::new(DefaultComponents));
        controller.start_mission(None, None);
        let first = controller.new_security_id();
        controller.end_mission();
        controller.start_mission(None, None);
        assert!(controller.new_security_id() > first);
    }

    #[test]
    fn test_create_rejects_empty_signature() {
        let mut controller = SignatureController::default();
        controller.start_mission(None, None);
        let id = controller.new_security_id();
        controller.set_description(id, "nothing to sign");
        assert!(matches!(
            controller.create_and_write_signature(id),
            Err(Error::PreconditionViolated(_))
        ));
    }

    #[test]
    fn test_patch_helpers() {
        let mut events = vec![
            SaxEvent::start("Reference", Attributes::new().with("URI", "a.xml")),
            SaxEvent::start("DigestValue", Attributes::new()),
            SaxEvent::Characters(String::new()),
            SaxEvent::end("DigestValue"),
            SaxEvent::end("Reference"),
            SaxEvent::start("Reference", Attributes::new().with("URI", "#p")),
            SaxEvent::start("DigestValue", Attributes::new()),
            SaxEvent::Characters(String::new()),
            SaxEvent::end("DigestValue"),
            SaxEvent::end("Reference"),
            SaxEvent::start("SignatureValue", Attributes::new()),
            SaxEvent::Characters(String::new()),
            SaxEvent::end("SignatureValue"),
        ];
        assert!(patch_reference_digest(&mut events, "#p", "ZA=="));
        assert!(patch_element_text(&mut events, "SignatureValue", "cw=="));
        assert!(!patch_reference_digest(&mut events, "#missing", "x"));
        assert_eq!(events[2], SaxEvent::Characters(String::new()));
        assert_eq!(events[7], SaxEvent::Characters("ZA==".to_string()));
        assert_eq!(events[11], SaxEvent::Characters("cw==".to_string()));
    }

    #[test]
    fn test_digest_input_rules() {
        let xml = b"<a  b='1'/>".to_vec();
        let xml_ref = ReferenceRecord::stream("content.xml", false);
        let bin_ref = ReferenceRecord::stream("content.xml", true);
        assert_eq!(
            digest_input(SignatureDialect::Canonical, &xml_ref, xml.clone()).unwrap(),
            br#"<a b="1"></a>"#.to_vec()
        );
        assert_eq!(
            digest_input(SignatureDialect::Canonical, &bin_ref, xml.clone()).unwrap(),
            xml
        );
        // Relationship signatures only transform relationship parts
        assert_eq!(
            digest_input(SignatureDialect::Relationship, &xml_ref, xml.clone()).unwrap(),
            xml
        );
    }
}
