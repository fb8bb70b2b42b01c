pub mod audit_event;
pub mod invite;

pub use audit_event::{AuditAction, AuditEvent};
pub use invite::{Invite, InviteRole, InviteState};
