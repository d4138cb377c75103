//! Side effect execution relay and its per-side-effect state manager.

pub mod actions;
pub mod relay;
pub mod state;

pub use relay::{
    create_execution_relay, ExecutionClient, ExecutionRelay, ExecutionServices,
};
pub use state::{SideEffectRecord, SideEffectStateManager, TerminalReport};
