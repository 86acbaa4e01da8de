// src/lib.rs

pub mod api;
pub mod auction;
pub mod bidding;
pub mod config;
pub mod error;
pub mod logging;
pub mod mock_partner;
pub mod model;
pub mod openrtb;
