//! Corpus handling: reading, language pools, balanced scheduling and padding.

pub mod batch;
pub mod instance;
pub mod lang;
pub mod padding;
pub mod pool;
pub mod reader;
pub mod scheduler;
pub mod vocab;
