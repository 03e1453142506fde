// Library for tests to access modules

pub mod audit;
pub mod config;
pub mod executor;
pub mod models;
pub mod planner;
pub mod routes;
pub mod status;
pub mod store;
pub mod validator;
pub mod version;
