//! Vendor normalization seam (vendor event -> Fragments)

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::VendorError;
use crate::types::fragment::Fragment;
use crate::Result;

/// Translates one vendor's streamed events into fragments.
///
/// Implementations do no I/O. They may keep state across events of a single stream
/// (e.g. which tool call is open), which is why `normalize` takes `&mut self` and a
/// normalizer is used for exactly one stream.
pub trait Normalizer: Send + 'static {
    /// One decoded `data:` payload.
    type Event: DeserializeOwned + Send + 'static;
    /// The error object the vendor sends in place of an event.
    type Envelope: ErrorEnvelope;

    fn vendor(&self) -> &'static str;

    /// Fragments for one event, in wire order. Zero fragments is fine.
    fn normalize(&mut self, event: Self::Event) -> Result<Vec<Fragment>>;

    /// Called once after the last event, to flush whatever the vendor left open.
    fn finish(&mut self) -> Result<Vec<Fragment>> {
        Ok(Vec::new())
    }
}

/// A vendor error envelope, tried when a frame does not decode as an event.
pub trait ErrorEnvelope: DeserializeOwned + Send + 'static {
    fn into_vendor_error(self) -> VendorError;
}

/// For decoders with no error envelope: never deserializes.
#[derive(Debug, Deserialize)]
pub enum NoEnvelope {}

impl ErrorEnvelope for NoEnvelope {
    fn into_vendor_error(self) -> VendorError {
        match self {}
    }
}
