//! devicelink: device-code sign-in and multi-account credential management.
//!
//! Signs a user in to GitHub via the OAuth 2.0 Device Authorization Grant,
//! persists the resulting credential per account, and tracks which of the
//! known accounts is active.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use devicelink::prelude::*;
//!
//! # async fn example() -> devicelink::error::Result<()> {
//! let config = DeviceLinkConfig::from_env()?;
//! let session = Arc::new(config.session_manager()?);
//! session.restore().await;
//!
//! let flow = Arc::new(config.device_flow());
//! let handle = session.start_login(flow, |code: &DeviceCode| {
//!     println!("Visit {} and enter {}", code.verification_uri, code.user_code);
//! });
//! let account = handle.wait().await?;
//! println!("Signed in as {}", account.username);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod prelude;
pub mod session;

#[cfg(feature = "cli")]
pub mod cli;
