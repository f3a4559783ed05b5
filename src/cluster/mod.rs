//! Cluster-wide identifiers shared by the bridge components

pub mod fid;

pub use fid::{Fid, FidParseError};
