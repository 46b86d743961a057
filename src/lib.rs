//! Rebuilds capture-file frames from truncated, link-layer-less packet
//! capture events.
//!
//! Events flow through a two-stage pipeline: a decode stage produces
//! [`event::CapturedPacketEvent`]s, and the capture intake hands each one to
//! the [`reconstruct::Reconstructor`], which prepends a BSD loopback header,
//! fixes up length fields and writes the frame to a [`sink::CaptureSink`].

pub mod cancel;
pub mod cli;
pub mod decode;
pub mod error;
pub mod event;
pub mod intake;
pub mod output;
pub mod packet;
pub mod pipeline;
pub mod reconstruct;
pub mod sink;
pub mod stats;
