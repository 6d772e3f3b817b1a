pub mod metadata_store;
pub mod models;
pub mod roles;
pub mod service;
pub mod session_manager;

pub use metadata_store::{CentralMetadataStore, TenantDescriptor};
pub use roles::{RoleCatalog, RoleTemplate};
pub use service::{IssuedToken, RbacService};
pub use session_manager::{SessionCleanupService, SessionConfig, SessionData, SessionManager, SessionState, SessionStats};
