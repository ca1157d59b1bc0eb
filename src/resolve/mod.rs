//! Reference resolution in two phases.
//!
//! - `identity` - container names, hosts and ports (phase 1)
//! - `resolver` - `${...}` substitution against identities and outputs (phase 2)
//! - `outputs` - write-once table of provisioning outputs
//! - `secret` - secret store and required-secret checks
//! - `template` - token scanner

pub mod identity;
pub mod outputs;
pub mod resolver;
pub mod secret;
pub mod template;

pub use identity::{assign_identities, container_name, Identity, IdentityTable, PortAllocator};
pub use outputs::{OutputsTable, ProvisionOutputs};
pub use resolver::{ResolvedEnvironment, Resolver};
pub use secret::{check_engine_secrets, check_secrets, EnvSecretStore, SecretStore};
