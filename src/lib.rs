//! Viewserv: a view service assigning primary/backup roles to replica
//! servers, plus client-side stubs for pinging and querying it.

#[macro_use]
mod utils;

mod viewsvc;
mod client;

pub use utils::{logger_init, set_me, ViewServError, ME};

pub use viewsvc::{
    ConnId, Role, ServerId, View, ViewManager, ViewNum, ViewReply,
    ViewRequest, ViewServer, ViewServiceConfig, ViewState, ViewStatus,
};

pub use client::{ViewClerk, ViewPinger};
