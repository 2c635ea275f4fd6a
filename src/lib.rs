pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod service;

pub use error::VelaError;
pub use gateway::{AwsIdentityGateway, IdentityGateway};
pub use service::authorizer::SessionAuthorizer;
pub use service::resolver::CredentialResolver;
