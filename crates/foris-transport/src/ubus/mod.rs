//! Local-IPC transport over ubus
//!
//! A native client for the ubusd socket protocol: an 8-byte header followed
//! by a blob attribute tree, with JSON payloads carried as blobmsg tables.

pub mod blobmsg;
pub mod client;
pub mod listener;
pub mod proto;
pub mod sender;
pub mod worker;

pub use client::{MethodSignature, ObjectHandler, UbusConnection, DEFAULT_UBUS_SOCKET};
pub use listener::{endpoint_name, UbusListener};
pub use sender::{UbusNotificationSender, UbusRequestSender};
pub use worker::{plan_workers, set_parent_death_signal, WorkerSupervisor};
