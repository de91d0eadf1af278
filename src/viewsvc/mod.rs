//! View service: primary/backup role assignment with failure detection.

mod view;
mod liveness;
mod engine;
mod vmanager;
mod reactor;
mod server;

pub use view::{Role, ServerId, View, ViewNum};
pub use engine::ViewState;
pub use vmanager::{ViewManager, ViewServiceConfig, ViewStatus};
pub use reactor::{ConnId, ViewReply, ViewRequest};
pub use server::ViewServer;
