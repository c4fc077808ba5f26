//! Shared types for CheckTick survey encryption.
//!
//! The records here mirror the persisted shape of surveys, organizations,
//! federated identities, responses and audit entries. Only the fields the
//! encryption subsystem reads or writes are modelled.

mod audit;
mod blob;
mod ids;
mod survey;
mod unlock;

pub use audit::{AuditAction, AuditLogEntry, AuditScope};
pub use blob::Blob;
pub use ids::{AuditEntryId, OrganizationId, ResponseId, SessionId, SurveyId, UserId};
pub use survey::{
    FederatedIdentity, LegacyKeyHash, Organization, Survey, SurveyResponse, WrappedKeys,
};
pub use unlock::UnlockMethod;
