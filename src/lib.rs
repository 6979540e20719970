pub mod client;
pub mod codec;
pub mod error;
pub mod game;
pub mod invitation;
pub mod logger;
pub mod player;
pub mod registry;
pub mod session;
pub mod supervisor;

pub use error::ServerError;
