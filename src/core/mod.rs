pub mod descriptor;
pub mod state;

pub use descriptor::{BearerAuth, ChildKind, ChildServerDescriptor, ChildTarget, ModuleSpec};
pub use state::{
    ActiveConnection, ChildSnapshot, ConnectionLimits, GatewaySnapshot, GatewayState, MountState,
};
