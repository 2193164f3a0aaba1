// crates/wmag-adapters/src/lib.rs
// ============================================================================
// Crate: wmag-adapters
// ============================================================================
//! The pipeline's three external collaborator seams ([`ContextProvider`],
//! [`PlannerAdapter`], [`ToolAdapter`]) plus stub, in-process
//! implementations for local development and tests. Concrete deployments
//! bring their own planner and tool transports.

#![forbid(unsafe_code)]

pub mod error;
pub mod stub;
pub mod traits;

pub use error::ContextError;
pub use error::PlannerError;
pub use error::ToolError;
pub use error::ToolRetryClass;
pub use stub::EchoToolAdapter;
pub use stub::EmptyContextProvider;
pub use stub::FirstActionPlannerAdapter;
pub use traits::ContextProvider;
pub use traits::PlannerAdapter;
pub use traits::TaskDescriptor;
pub use traits::ToolAdapter;
