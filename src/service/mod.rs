//! Core services behind the authentication flows.

mod flow;
mod provision;
mod renew;
mod reset;

pub use flow::{AuthFlowOrchestrator, IssuedToken, RevokeOutcome};
pub use provision::UserProvisioner;
pub use renew::TokenRenewalService;
pub use reset::ResetKeyService;
