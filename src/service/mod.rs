//! The credential resolution engine: session authorization, recursive
//! credential resolution, and the account directory operations built on the
//! persistent cache.

pub mod authorizer;
pub mod directory;
pub mod resolver;

pub use authorizer::{AuthorizeParams, SessionAuthorizer};
pub use directory::{AccountListing, IdentifierKind};
pub use resolver::{CredentialResolver, ResolveRequest};
