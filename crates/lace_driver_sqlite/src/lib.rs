mod driver;

pub use driver::{SqliteCancelHandle, SqliteConnection, SqliteDriver};
