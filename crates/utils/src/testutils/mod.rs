mod data_fixture;
pub use data_fixture::{data_fixture, DataFixture};
