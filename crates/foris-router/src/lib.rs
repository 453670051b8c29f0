//! Foris Router
//!
//! Everything above the transport boundary:
//! - Module capability traits ([`Module`], [`ModuleProvider`])
//! - The module registry and its startup loader ([`ModuleRegistry`], [`ModuleLoader`])
//! - The request dispatcher ([`Router`])
//! - Modules implemented by external executables ([`external`])

pub mod error;
pub mod external;
pub mod module;
pub mod registry;
pub mod router;

pub use error::{HandlerError, HandlerResult, Result, RouterError};
pub use external::ExternalProvider;
pub use module::{EntryPointAnnouncer, Module, ModuleContext, ModuleDescriptor, ModuleProvider};
pub use registry::{ModuleLoader, ModuleRegistry};
pub use router::{Router, ERR_INCORRECT_INPUT, ERR_WRONG_KIND};
