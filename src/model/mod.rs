pub mod adapters;
pub mod bid;
pub mod context;
pub mod partner;
