//! Remote automation
//!
//! The device scope needs exactly one thing from the automation layer:
//! writing named device settings inside a session. `Automation` captures
//! that; `MarionetteClient` implements it over the Marionette protocol.

pub mod client;
pub mod codec;
pub mod extension;

use async_trait::async_trait;
use serde_json::Value;

use crate::common::Result;

pub use client::MarionetteClient;

/// Settings-writing session against the device under test
#[async_trait]
pub trait Automation: Send {
    /// Connect and open a session
    async fn start_session(&mut self) -> Result<()>;

    /// Write one device setting
    async fn set_setting(&mut self, name: &str, value: &Value) -> Result<()>;

    /// Close the session; closing when no session is open is a no-op
    async fn end_session(&mut self) -> Result<()>;
}
