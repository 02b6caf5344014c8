//! Data types shared by every pipeline stage
//!
//! Entity bodies travel through the engine as loosely typed [`Document`]s.
//! The envelope fields the engine depends on are pulled out into a typed
//! [`Envelope`]; everything else stays opaque.

mod document;
mod entity;
mod envelope;
mod manifest;
mod rule;

pub use document::{resolve_path, string_field, Document};
pub use entity::{EntityKind, Environment, ParseKindError};
pub use envelope::{Envelope, EnvelopeError, EnvelopeResult};
pub(crate) use envelope::parse_timestamp;
pub use manifest::{IndexPointer, ManifestRecord};
pub use rule::{
    AlertAction, AlertRecord, Condition, Operator, RuleDefinition, RuleEvaluation, Severity,
};
