pub mod adapter;
pub mod assembler;
pub mod category;
pub mod deadline;
pub mod dispatcher;
pub mod engine;
pub mod granularity;
pub mod price;
pub mod transport;
