//! # chzzk-rec
//!
//! This crate watches [Chzzk](https://chzzk.naver.com) channels and records
//! every live broadcast to disk. Capture is delegated to `streamlink` and the
//! finished file is remuxed with `ffmpeg` so that its timestamps start at
//! zero.
//!
//! ## Usage
//!
//! The `recorder` module drives everything. It needs a parsed
//! [`config::Config`] and something that can answer channel and live status
//! queries, normally a [`api::ChzzkClient`].
//!
//! ```rust,no_run
//! use chzzk_rec::{api::ChzzkClient, config::Config, recorder::Recorder};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load("config.yaml").unwrap();
//!
//!     // HttpClient with the NID cookies and retry middleware
//!     let client = ChzzkClient::new(&config.cookies).unwrap();
//!
//!     // Runs until Ctrl-C / SIGTERM
//!     let mut recorder = Recorder::new(config, client);
//!     recorder.run().await.unwrap();
//! }
//! ```
//!
//! Recordings land in the directory given by `output.path`, named after
//! `output.filename`. Both are templates understood by the `template`
//! module.

#![forbid(unsafe_code)]

#[macro_use]
extern crate log;

pub mod api;
pub mod config;
pub mod ffmpeg;
pub mod lock;
pub mod recorder;
pub mod stats;
pub mod streamlink;
pub mod template;
pub mod util;
