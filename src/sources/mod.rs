//! Source implementations: live sockets and scripted replays

pub mod script;
pub mod socket;

pub use script::ScriptSource;
pub use socket::SocketSource;
