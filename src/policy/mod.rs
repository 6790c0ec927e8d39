//! # Base Declaration Policy
//!
//! Deterministic eligibility decisions for installing and connecting
//! interfaces.
//!
//! ## Architecture
//!
//! Every interface carries base-declaration text for its plugs and its slots.
//! The registry parses it once into a [`BaseDeclaration`]; the
//! [`BaseDeclarationEvaluator`] matches it against a candidate endpoint or
//! plug/slot pair and returns one of three outcomes:
//!
//! ```text
//! evaluate_connection(plug: mounter, slot: core)
//!   → slots/allow-installation: slot-snap-type [core]   matches
//!   → slots/deny-auto-connection: true                  matches
//!   → Evaluation { eligibility: RequiresManualConsent,
//!                  rule_name: "slots/deny-auto-connection" }
//! ```
//!
//! `Denied` is absolute. `RequiresManualConsent` means an explicit consent
//! step may still connect the pair. Callers must never conflate the two.

pub mod constraints;
pub mod declaration;
pub mod evaluator;

pub use constraints::{AttrMatcher, AttributeConstraints, Constraints, EndpointView, MatchContext};
pub use declaration::{BaseDeclaration, DeclarationError, Rule, RuleKind, RuleSet};
pub use evaluator::{BaseDeclarationEvaluator, Eligibility, Evaluation};
