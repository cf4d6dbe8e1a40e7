//! CLI entry point for devicelink.

pub mod auth;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// devicelink CLI
#[derive(Parser, Debug)]
#[command(
    name = "devicelink",
    version,
    about = "Sign in to GitHub with a device code and manage stored accounts"
)]
pub struct Cli {
    /// Config file (defaults to ~/.devicelink/config.toml)
    #[arg(long, global = true, env = "DEVICELINK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in with a device code
    Login,
    /// Sign out of the active account
    Logout(LogoutArgs),
    /// Make a stored account the active one
    Switch(SwitchArgs),
    /// Show the active account
    Status,
    /// List known accounts
    Accounts,
}

/// Arguments for `devicelink logout`.
#[derive(Parser, Debug)]
pub struct LogoutArgs {
    /// Keep the stored credential so the account can be switched back to
    #[arg(long)]
    pub keep_credential: bool,
}

/// Arguments for `devicelink switch`.
#[derive(Parser, Debug)]
pub struct SwitchArgs {
    pub username: String,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_login() {
        let cli = Cli::try_parse_from(["devicelink", "login"]).unwrap();
        assert!(matches!(cli.command, Commands::Login));
        assert!(cli.config.is_none());
    }

    #[test]
    fn parse_logout_removes_credential_by_default() {
        let cli = Cli::try_parse_from(["devicelink", "logout"]).unwrap();
        match cli.command {
            Commands::Logout(args) => assert!(!args.keep_credential),
            other => panic!("expected Logout, got {other:?}"),
        }
    }

    #[test]
    fn parse_logout_keep_credential() {
        let cli = Cli::try_parse_from(["devicelink", "logout", "--keep-credential"]).unwrap();
        match cli.command {
            Commands::Logout(args) => assert!(args.keep_credential),
            other => panic!("expected Logout, got {other:?}"),
        }
    }

    #[test]
    fn parse_switch_with_global_config() {
        let cli = Cli::try_parse_from([
            "devicelink",
            "switch",
            "octocat",
            "--config",
            "/tmp/devicelink.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/devicelink.toml")));
        match cli.command {
            Commands::Switch(args) => assert_eq!(args.username, "octocat"),
            other => panic!("expected Switch, got {other:?}"),
        }
    }

    #[test]
    fn parse_status_and_accounts() {
        let status = Cli::try_parse_from(["devicelink", "status"]).unwrap();
        assert!(matches!(status.command, Commands::Status));
        let accounts = Cli::try_parse_from(["devicelink", "accounts"]).unwrap();
        assert!(matches!(accounts.command, Commands::Accounts));
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["devicelink"]).is_err());
    }

    #[test]
    fn parse_switch_missing_username_is_error() {
        assert!(Cli::try_parse_from(["devicelink", "switch"]).is_err());
    }
}
