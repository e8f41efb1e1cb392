#![forbid(unsafe_code)]

pub mod access;
pub mod auth;
pub mod connection;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod room_hub;
pub mod routes;
pub mod store;
pub mod uploads;



#[cfg(test)]
mod room_hub_tests;

#[cfg(test)]
mod store_tests;
