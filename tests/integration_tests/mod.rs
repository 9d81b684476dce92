pub mod common;
mod database_tests;
mod persistence_tests;
mod query_tests;
mod upgrade_tests;
