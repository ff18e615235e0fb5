use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "anistream",
    version,
    about = "Browse and stream anime from the terminal"
)]
pub struct Cli {
    /// Read configuration from this file instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Don't publish Discord Rich Presence
    #[arg(long)]
    pub disable_rpc: bool,

    /// mpv or an mpv-compatible binary to launch (overrides `player.command`).
    /// It is passed mpv's flags and must serve `--input-ipc-server`
    #[arg(long, value_name = "CMD")]
    pub player: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Check player, configuration and source availability
    Doctor,
    /// Browse with rofi menus instead of the terminal UI
    Rofi {
        /// Extra arguments for every rofi call, e.g. "-theme nord"
        #[arg(long, value_name = "FLAGS", allow_hyphen_values = true)]
        rofi_flags: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "anistream",
            "--config",
            "/tmp/a.toml",
            "--disable-rpc",
            "--player",
            "/opt/mpv/bin/mpv",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/a.toml")));
        assert!(cli.disable_rpc);
        assert_eq!(cli.player.as_deref(), Some("/opt/mpv/bin/mpv"));
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_parse_doctor() {
        let cli = Cli::try_parse_from(["anistream", "doctor"]).unwrap();
        assert_eq!(cli.command, Some(Command::Doctor));
        assert!(!cli.disable_rpc);
    }

    #[test]
    fn test_player_help_names_mpv() {
        use clap::CommandFactory;

        let command = Cli::command();
        let player = command
            .get_arguments()
            .find(|arg| arg.get_id() == "player")
            .unwrap();
        let help = player.get_help().unwrap().to_string();
        assert!(help.contains("mpv-compatible"), "{help}");
    }

    #[test]
    fn test_parse_rofi() {
        let cli =
            Cli::try_parse_from(["anistream", "rofi", "--rofi-flags", "-theme nord"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Rofi {
                rofi_flags: Some("-theme nord".to_string())
            })
        );

        let cli = Cli::try_parse_from(["anistream", "--disable-rpc", "rofi"]).unwrap();
        assert_eq!(cli.command, Some(Command::Rofi { rofi_flags: None }));
        assert!(cli.disable_rpc);
    }

    #[test]
    fn test_unknown_flag_fails() {
        assert!(Cli::try_parse_from(["anistream", "--bogus"]).is_err());
    }
}
