pub mod admin;
pub mod audit;
pub mod billing;
pub mod config;
pub mod enrichment;
pub mod entitlements;
pub mod error;
pub mod extractor;
pub mod leads;
pub mod organizations;
pub mod profiles;
pub mod routes;
pub mod sequences;
