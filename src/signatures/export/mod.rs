//! Signature serializers.
//!
//! Both dialects emit SAX events into a [`DocumentHandler`], so the same
//! code path writes to a file, to a recorder in tests, or through the
//! spliced chain while a new signature is being created.
//!
//! Digest and signature values are written as plain character events; an
//! empty value still produces a (blank) character event so the buffering
//! node can patch it in place later.

pub mod odf;
pub mod ooxml;

use super::ns;
use crate::error::Result;
use crate::xml::{Attributes, DocumentHandler};

/// `<name attrs>text</name>`, always emitting the character event.
fn text_element(
    handler: &mut dyn DocumentHandler,
    name: &str,
    attributes: Attributes,
    text: &str,
) -> Result<()> {
    handler.start_element(name, attributes)?;
    handler.characters(text)?;
    handler.end_element(name)
}

/// `<name attrs/>`.
fn empty_element(
    handler: &mut dyn DocumentHandler,
    name: &str,
    attributes: Attributes,
) -> Result<()> {
    handler.start_element(name, attributes)?;
    handler.end_element(name)
}

fn algorithm(uri: &str) -> Attributes {
    Attributes::new().with("Algorithm", uri)
}

/// `<Transforms><Transform Algorithm="c14n"/></Transforms>`.
fn c14n_transforms(handler: &mut dyn DocumentHandler) -> Result<()> {
    handler.start_element("Transforms", Attributes::new())?;
    empty_element(handler, "Transform", algorithm(ns::ALGO_C14N))?;
    handler.end_element("Transforms")
}
