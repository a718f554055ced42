//! # dialab
//!
//! Diameter traffic generator and test endpoint for lab use.
//!
//! ## Reference
//! Wire format per [RFC 6733](https://tools.ietf.org/html/rfc6733).
//!
//! The crate composes Diameter messages from a dictionary and a store of
//! pre-supplied AVP values, exchanges them with peers over SCTP or TCP,
//! answers base-protocol traffic (CER/DWR/DPR) automatically, and can
//! append everything it sends or receives to a PCAP file.

pub mod avp;
pub mod dictionary;
pub mod display;
pub mod error;
pub mod message;
pub mod node;
pub mod pcap;
pub mod route;
pub mod server;
pub mod signal;
pub mod store;
pub mod transport;

pub use crate::error::{Error, Result};
pub use crate::message::{flags, Message};
