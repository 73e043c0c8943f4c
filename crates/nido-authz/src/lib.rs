//! Nido Authz — acting-user aware delegation over the authorization
//! tree: standing checks, permission narrowing and membership rules.

pub mod cache;
pub mod config;
pub mod error;
pub mod service;

pub use cache::AdminCache;
pub use config::AuthzConfig;
pub use error::AuthzError;
pub use service::{ActingContext, DelegationService, NewOrgUnit};
