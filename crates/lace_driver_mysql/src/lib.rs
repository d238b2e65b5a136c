mod driver;

pub use driver::{MySqlCancelHandle, MySqlConnection, MySqlDriver};
