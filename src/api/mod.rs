//! HTTP surface: the Ingest API and Decision API (§4.5).

pub mod decision;
pub mod ingest;

pub use decision::get_decision;
pub use ingest::ingest_signal;
