mod model;
mod sspanel;
mod store;
mod v2board;

pub use model::*;
pub use sspanel::*;
pub use store::*;
pub use v2board::*;

pub use sqlx::mysql::MySqlConnectOptions;
