//! # mfc-rs
//!
//! This crate watches the MyFreeCams chat for a set of broadcasters and
//! captures their HLS streams to disk while they are live.
//!
//! ## Usage
//!
//! The [`grabber::Grabber`] ties everything together: it loads the server
//! directory, connects to a chat server as a guest, looks up the tracked
//! broadcasters and starts or stops a capture as their status changes.
//!
//! ```no_run
//! use mfc_rs::{config::Config, grabber::Grabber};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut grabber = Grabber::new(vec!["somebody".into()], Config::default()).unwrap();
//!
//!     // Cancel the token to stop every capture and close the chat connection
//!     let shutdown = CancellationToken::new();
//!     grabber.run(shutdown).await.unwrap();
//! }
//! ```
//!
//! The lower level pieces can be used on their own. [`frame`] decodes the
//! length-prefixed chat frames, [`session::ChatSession`] handles the chat
//! handshake and keepalive, and [`capture::StreamLoader`] downloads a single
//! stream into a file.

#[forbid(unsafe_code)]
#[macro_use]
extern crate log;

pub mod capture;
pub mod config;
pub mod directory;
pub mod frame;
pub mod grabber;
pub mod hls;
pub mod presence;
pub mod session;
pub mod signer;
pub mod stats;
pub mod util;
pub mod worker;

#[cfg(test)]
mod testing;
