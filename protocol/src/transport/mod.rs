//! # Transport
//!
//! The socket layer: [`kernel::NetKernel`] is the message router every
//! other component sits on top of; [`connection::Connection`] is its
//! per-peer outbound link; [`tls`] is the optional pass-through security
//! layer; [`signals`] and [`handler`] are the seams a consumer (a
//! [`crate::genserver::GenServer`], the DLM) hooks into.

pub mod connection;
pub mod handler;
pub mod kernel;
pub mod signals;
pub mod tls;

pub use connection::{Connection, ConnectionOptions};
pub use handler::{Handler, ReplyTarget};
pub use kernel::{KernelError, KernelStatus, NetKernel, NetKernelOptions};
pub use signals::KernelSignal;
pub use tls::TlsConfig;
