//! Readiness classification of observed cluster objects.
//!
//! [`StateClassifier::classify`] turns one snapshot into the [`BadObjectSet`]
//! of objects failing readiness. Certificate rotation and machine role
//! filtering work on the same snapshots.

pub mod bad;
pub mod certs;
pub mod classify;
pub mod machines;

pub use bad::{BadObject, BadObjectKey, BadObjectSet};
pub use certs::{CertificateFingerprints, RotationError, UnrotatedCertificate, verify_certificate_rotation};
pub use classify::{ExclusionRules, ReadinessCheck, StateClassifier};
pub use machines::{NodeRoles, machines_by_role};
