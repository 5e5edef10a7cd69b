//! Anonymization applied to every datum before it reaches a data store.
//!
//! The pipeline is a pure function of the datum and the rule set. It runs
//! exactly once, in the protocol's store path; retries resend the stored,
//! already-anonymized record.

pub mod anonymizer;
pub mod rules;

// Re-export commonly used types
pub use anonymizer::Anonymizer;
pub use rules::{RuleConfig, RuleError, RuleSet};
