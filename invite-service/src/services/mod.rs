pub mod audit;
pub mod cache;
pub mod database;
pub mod email;
pub mod error;
pub mod invite;
pub mod limits;
pub mod policy;
pub mod token;

pub use audit::{AuditSink, MockAuditSink, PgAuditSink};
pub use cache::{CacheStore, InviteCache, MemoryCache, RedisService};
pub use database::{Database, InviteFilter, InviteStore, InviteTx, MemoryInviteStore};
pub use email::{EmailProvider, EmailService, MockEmailService};
pub use error::ServiceError;
pub use invite::{InvitePreview, InviteService, InviteSettings};
pub use limits::{RateLimiter, SpamGuard};
pub use policy::DomainPolicy;
pub use token::{InviteClaims, InviteTokenService};
