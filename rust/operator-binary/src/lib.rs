// Exported so that the binary (and anything else that needs the CertificateRequest CRD) can share it
pub mod crd;

pub mod certificate;
pub mod config;
pub mod controller;
pub mod credential;
pub mod duration;
pub mod finalizer;
pub mod reconciler;
pub mod renewal;
pub mod status;
pub mod store;
pub mod utils;

#[cfg(test)]
mod test_utils;
