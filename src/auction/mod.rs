pub mod multibid;
pub mod privacy;
pub mod scoper;
