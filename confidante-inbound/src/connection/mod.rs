pub mod debug;
pub mod tcp;

pub use debug::DebugConnection;
pub use tcp::TcpConnection;
