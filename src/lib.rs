/// Nick Hider - identity masking engine
///
/// Hides the local user's and other users' names, identifiers, skins and
/// capes in a client: stable short aliases, synthetic identifiers, text
/// sanitization and non-blocking texture resolution with retry, backoff and
/// rate-limit aware cooldowns.

pub mod breaker;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod mojang;
pub mod resolution;
pub mod sanitize;
pub mod textures;
pub mod validation;

pub use config::{EngineConfig, PrivacyConfig};
pub use context::PrivacyRuntime;
pub use error::{EngineError, EngineResult, FailureKind, FetchError};
pub use identity::{
    derive_identifier, AliasRegistry, IdentityMasker, MaskedIdentity, ProfileIdentity,
};
pub use resolution::{ResolutionService, ResolutionStatus, ResolvedTexture, TextureHandle};
pub use sanitize::{PlayerDirectory, SessionSnapshot, TextSanitizer};
