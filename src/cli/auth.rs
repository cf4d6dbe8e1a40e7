//! CLI command handlers for login, logout, switching, and status.

use std::sync::Arc;

use crate::auth::{AuthError, DeviceCode};
use crate::config::DeviceLinkConfig;
use crate::error::Result;
use crate::session::{SessionManager, SessionState};

/// Handle `devicelink login`.
///
/// Ctrl-C cancels the attempt; nothing is persisted in that case.
pub async fn handle_login(config: &DeviceLinkConfig, session: &Arc<SessionManager>) -> Result<()> {
    let flow = Arc::new(config.device_flow());
    let handle = session.start_login(flow, |code: &DeviceCode| {
        println!("🔗 Visit: {}", code.verification_uri);
        println!("📋 Enter code: {}", code.user_code);
        println!(
            "⏳ Waiting for authorization (code expires in {}s)...",
            code.seconds_remaining()
        );
    });

    let cancel = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    let result = handle.wait().await;
    interrupt.abort();

    match result {
        Ok(account) => {
            println!("✅ Logged in as {}", account.username);
            Ok(())
        }
        Err(AuthError::Cancelled) => {
            println!("Login cancelled");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Handle `devicelink logout [--keep-credential]`.
pub async fn handle_logout(session: &SessionManager, keep_credential: bool) -> Result<()> {
    let Some(username) = session.state().username().map(str::to_string) else {
        println!("Not logged in");
        return Ok(());
    };
    session.logout(!keep_credential).await?;
    if keep_credential {
        println!("✅ Logged out from {username} (credential kept)");
    } else {
        println!("✅ Logged out from {username}");
    }
    Ok(())
}

/// Handle `devicelink switch <username>`.
pub async fn handle_switch(session: &SessionManager, username: &str) -> Result<()> {
    session.switch_account(username).await?;
    match session.state() {
        SessionState::LoggedIn(account) if account.username == username => {
            println!("✅ Active account: {username}");
        }
        _ => println!("❌ No stored credential for {username}"),
    }
    Ok(())
}

/// Handle `devicelink status`.
pub async fn handle_status(session: &SessionManager) -> Result<()> {
    println!("🔐 Session Status\n");
    match session.state() {
        SessionState::LoggedIn(account) => println!("  Active: ✅ {}", account.username),
        SessionState::LoggedOut => println!("  Active: ❌ Not logged in"),
        SessionState::Loading => println!("  Active: ⏳ Loading"),
    }
    println!("  Known accounts: {}", session.list_known_accounts().len());
    if let Some(error) = session.last_error() {
        println!("  Last error: ⚠️  {error}");
    }
    Ok(())
}

/// Handle `devicelink accounts`.
pub async fn handle_accounts(session: &SessionManager) -> Result<()> {
    let known = session.list_known_accounts();
    if known.is_empty() {
        println!("No known accounts");
        return Ok(());
    }
    let active = session.state();
    for username in known {
        let marker = if active.username() == Some(username.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {username}");
    }
    Ok(())
}
