//! Errors raised while assembling the extension pipeline.

use crate::registry::RuleKind;

/// Invalid extension registration.
///
/// Only produced while a renderer is being built, never while rendering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Another rule of the same kind already uses this name.
    #[error("{kind} rule `{name}` is already registered")]
    DuplicateName {
        /// Rule kind the name collides in.
        kind: RuleKind,
        /// The duplicated name.
        name: String,
    },
    /// The anchor references a rule that does not exist.
    #[error("{kind} rule `{name}` is anchored to unknown rule `{anchor}`")]
    UnknownAnchor {
        /// Rule kind of the extension being registered.
        kind: RuleKind,
        /// Name of the extension being registered.
        name: String,
        /// Name the anchor refers to.
        anchor: String,
    },
    /// A block rule declares that it interrupts a block rule that does not exist.
    #[error("block rule `{name}` interrupts unknown block rule `{target}`")]
    UnknownInterrupt {
        /// Name of the block rule being registered.
        name: String,
        /// The unknown rule name.
        target: String,
    },
}
