//! Proxy provider subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyProviderRecord (config file / store)
//!     → secret.rs (missing cookie secrets filled from the secret file)
//!     → store.rs (versioned records, cookie secret generated once)
//!     → validation.rs (pure: record → ProxyProvider | all errors)
//!     → model.rs (OAuth2 defaults, derived redirect URIs)
//!     → resolver.rs (compile exemptions, publish ConfigSnapshot)
//!
//! certificate.rs resolves a provider's optional certificate id
//! to key material when an upstream client is built.
//! ```

pub mod certificate;
pub mod model;
pub mod resolver;
pub mod secret;
pub mod store;
pub mod validation;

pub use certificate::{
    delete_certificate, CertificateError, CertificateKeyPair, CertificateStore,
    MemoryCertificateStore,
};
pub use model::{
    callback_url, ClientType, JwtAlgorithm, OAuth2Defaults, ProxyProvider, ProxyProviderRecord,
    ResponseType, SkipPaths, CALLBACK_PATH, DEFAULT_USER_ATTRIBUTE, SIGN_OUT_PATH,
};
pub use resolver::{ConfigResolver, ConfigSnapshot, ResolveError};
pub use secret::{generate_cookie_secret, random_token, CookieSecret, SecretFile, SecretFileError};
pub use store::{MemoryProviderStore, ProviderStore, StoreError, VersionedRecord};
pub use validation::{compile_provider, validate_provider};
