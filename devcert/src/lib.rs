//! Local development certificate authority.
//!
//! Creates a root CA under the user's config directory, registers it with
//! the OS trust store and browser NSS databases, and issues domain
//! certificates signed by it.

pub mod browser;
pub mod ca;
pub mod command;
pub mod config;
pub mod domains;
pub mod error;
pub mod nss;
pub mod output;
pub mod paths;
pub mod platform;
pub mod protected;
pub mod signing;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod ui;
pub mod wizard;

pub use ca::CertificateAuthority;
pub use config::{CaOptions, DomainOptions, Settings, TrustOptions};
pub use domains::DomainCertificate;
pub use error::{DevcertError, Result};
pub use paths::ConfigPaths;
pub use platform::{PlatformServices, TrustStoreDriver, current_driver};
pub use signing::{RcgenSigner, SigningAuthority};
