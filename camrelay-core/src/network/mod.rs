pub mod acceptor;
pub mod connection;

pub use acceptor::{Acceptor, AcceptorConfig, ConnectionHandler};
pub use connection::{Connection, ConnectionConfig};
