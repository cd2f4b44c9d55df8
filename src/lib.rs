pub mod cmor_table;
pub mod config;
pub mod cube;
pub mod derive;
pub mod dispatch;
pub mod error;
pub mod fixes;
pub mod logging;
pub mod nc_utils;
pub mod resolver;
pub mod save;
pub mod test_utils;
pub mod time;
pub mod transform;
pub mod units;
