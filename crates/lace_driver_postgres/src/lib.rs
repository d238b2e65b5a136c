mod driver;

pub use driver::{PostgresCancelHandle, PostgresConnection, PostgresDriver};
