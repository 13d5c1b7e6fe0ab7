use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory as _, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::{io, path::PathBuf};

use crate::config::{Backlight, SaverConfig, parse_brightness};
use crate::controller::{MacController, SettingsController};
use crate::saver::{ExitOutcome, SaverState, StateStore};

/// Toggle battery saving mode: dim the screen, turn off Wi-Fi, Bluetooth and the keyboard backlight
#[derive(Debug, Parser)]
#[clap(
    version,
    about,
    author,
    long_about=None,
    after_help="Relies on the `brightness`, `blueutil` and `cliclick` tools, see the `tools` section of the preferences file",
)]
pub struct SaverCLI {
    /// Path to the preferences file
    #[clap(short, long, global = true)]
    preferences: Option<PathBuf>,
    /// Path to the snapshot file, overrides `state_file` from the preferences
    #[clap(short, long, global = true)]
    state_file: Option<PathBuf>,
    /// Print more diagnostics (-v, -vv)
    #[clap(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[clap(subcommand)]
    command: SaverOptions,
}

impl SaverCLI {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }

    pub fn run(self) -> Result<()> {
        let paths = Paths {
            preferences: self.preferences,
            state_file: self.state_file,
        };
        self.command.parse(&paths)
    }
}

#[derive(Debug, Subcommand)]
#[clap(rename_all = "kebab-case")]
enum SaverOptions {
    /// Show the launcher result for the next toggle, as JSON
    Preview,
    /// Launcher entry point: `true` turns battery saving mode on, `false` turns it off
    Run {
        #[clap(action = ArgAction::Set)]
        turn_on: bool,
    },
    /// Turn battery saving mode on if it is off, and off if it is on
    Toggle,
    /// Turn battery saving mode on
    On {
        /// Take a new snapshot even if battery saving mode is already on
        #[clap(short, long)]
        force: bool,
    },
    /// Turn battery saving mode off
    Off {
        /// Apply the deactivation preferences instead of restoring Wi-Fi and Bluetooth
        #[clap(long)]
        no_restore: bool,
    },
    /// Show current status
    Status,
    /// Change a single setting
    Set {
        #[clap(subcommand)]
        control: Control,
    },
    /// Initialize by creating a sample preferences file
    Init {
        /// Path to the preferences file, `.yaml` writes YAML
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the settings applied when turning on and off
    Preferences,
    /// Generate shell completions
    Completions {
        /// The shell to generate the completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Subcommand)]
enum Control {
    /// Display brightness, between 0 and 1
    Brightness {
        #[clap(value_parser = parse_brightness)]
        level: f64,
    },
    /// Wi-Fi radio
    Wifi { state: Switch },
    /// Bluetooth radio
    Bluetooth { state: Switch },
    /// Keyboard backlight: on, off or a level between 0 and 16
    Backlight { level: Backlight },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl From<Switch> for bool {
    fn from(switch: Switch) -> Self {
        matches!(switch, Switch::On)
    }
}

struct Paths {
    preferences: Option<PathBuf>,
    state_file: Option<PathBuf>,
}

/// Everything one toggle needs: validated preferences, the snapshot store and the machine.
struct Session {
    config: SaverConfig,
    store: StateStore,
    controller: MacController,
}

impl Session {
    fn open(paths: &Paths) -> Result<Self> {
        let config = SaverConfig::load(paths.preferences.clone())?;
        let state_file = paths
            .state_file
            .clone()
            .unwrap_or_else(|| config.state_file.clone());
        let store = StateStore::open(&state_file).with_context(|| {
            format!("Failed to read snapshot file `{}`", state_file.display())
        })?;
        let controller = MacController::new(config.tools.clone(), config.probe.clone());

        Ok(Self {
            config,
            store,
            controller,
        })
    }

    fn turn_on(&mut self, force: bool) -> Result<()> {
        if self.store.is_active() && !force {
            anyhow::bail!("Battery saver is already on, pass --force to take a new snapshot anyway");
        }

        self.store
            .enter_saving_mode(&self.controller, &self.config.activation)
            .with_context(|| "Failed to turn battery saver on")?;
        eprintln!("Battery saver on");
        Ok(())
    }

    fn turn_off(&mut self, restore: bool) -> Result<()> {
        let outcome = self
            .store
            .exit_saving_mode(&self.controller, &self.config.deactivation, restore)
            .with_context(|| "Failed to turn battery saver off")?;

        match outcome {
            ExitOutcome::NotActive => eprintln!("Battery saver is not on"),
            ExitOutcome::Restored => eprintln!("Battery saver off, Wi-Fi and Bluetooth restored"),
            ExitOutcome::Applied => eprintln!("Battery saver off"),
        }
        Ok(())
    }

    /// Enter or leave battery saving mode the way the launcher plugin does.
    fn run(&mut self, turn_on: bool) -> Result<()> {
        if turn_on {
            self.turn_on(false)
        } else {
            let restore = self.config.remember_settings;
            self.turn_off(restore)
        }
    }
}

/// Builds the controller alone, for commands that never touch the snapshot.
fn load_controller(paths: &Paths) -> Result<MacController> {
    let config = SaverConfig::load(paths.preferences.clone())?;
    Ok(MacController::new(config.tools, config.probe))
}

/// The launcher's result entry.
#[derive(Debug, Serialize)]
struct PluginResult {
    title: &'static str,
    run_args: [bool; 1],
}

impl PluginResult {
    fn for_state(state: &SaverState) -> Self {
        let turn_on = !state.is_active();
        Self {
            title: if turn_on {
                "Turn battery saver on"
            } else {
                "Turn battery saver off"
            },
            run_args: [turn_on],
        }
    }
}

impl SaverOptions {
    fn parse(self, paths: &Paths) -> Result<()> {
        match self {
            Self::Preview => {
                let session = Session::open(paths)?;
                let result = PluginResult::for_state(session.store.state());
                println!("{}", serde_json::to_string(&result)?);
            }
            Self::Run { turn_on } => {
                Session::open(paths)?.run(turn_on)?;
            }
            Self::Toggle => {
                let mut session = Session::open(paths)?;
                let turn_on = !session.store.is_active();
                session.run(turn_on)?;
            }
            Self::On { force } => {
                Session::open(paths)?.turn_on(force)?;
            }
            Self::Off { no_restore } => {
                let mut session = Session::open(paths)?;
                let restore = session.config.remember_settings && !no_restore;
                session.turn_off(restore)?;
            }
            Self::Status => {
                let session = Session::open(paths)?;
                print_status(&session.store);
            }
            Self::Set { control } => {
                control
                    .apply(&load_controller(paths)?)
                    .with_context(|| format!("Failed to set {:?}", control))?;
            }
            Self::Init { output } => {
                SaverConfig::generate_sample(output)
                    .with_context(|| "Failed to create preferences sample file")?;
            }
            Self::Preferences => {
                let config = SaverConfig::load(paths.preferences.clone())?;
                println!("{}", config);
            }
            Self::Completions { shell } => {
                let mut cmd = SaverCLI::command();
                let name = cmd.get_name().to_string();

                clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
            }
        }

        Ok(())
    }
}

impl Control {
    fn apply(&self, controller: &dyn SettingsController) -> Result<()> {
        match *self {
            Self::Brightness { level } => controller.set_brightness(level)?,
            Self::Wifi { state } => controller.set_wireless(state.into())?,
            Self::Bluetooth { state } => controller.set_short_range_radio(state.into())?,
            Self::Backlight { level } => controller.set_backlight(level.enabled(), level.level())?,
        }
        Ok(())
    }
}

fn print_status(store: &StateStore) {
    let on_off = |on: bool| if on { "on" } else { "off" };

    match store.state() {
        SaverState::Inactive => eprintln!("Battery saver is off"),
        SaverState::Active(snapshot) => {
            match snapshot.saved_at {
                Some(saved_at) => println!(
                    "Battery saver is on (since {})",
                    saved_at.format("%Y-%m-%d %H:%M:%S")
                ),
                None => println!("Battery saver is on"),
            }
            println!("• Wi-Fi was {}", on_off(snapshot.wifi));
            println!("• Bluetooth was {}", on_off(snapshot.bluetooth));
        }
        SaverState::Damaged { reason } => {
            println!("Battery saver is on, but its snapshot is damaged: {}", reason);
            println!(
                "• Run `off --no-restore` or delete `{}`",
                store.path().display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeController;
    use crate::saver::Snapshot;

    #[test]
    fn cli_definition_is_valid() {
        SaverCLI::command().debug_assert();
    }

    #[test]
    fn parses_launcher_run() {
        let cli = SaverCLI::try_parse_from(["battery-saver", "run", "false"]).unwrap();
        assert!(matches!(cli.command, SaverOptions::Run { turn_on: false }));

        let cli = SaverCLI::try_parse_from(["battery-saver", "-vv", "run", "true"]).unwrap();
        assert!(matches!(cli.command, SaverOptions::Run { turn_on: true }));
        assert_eq!(cli.verbosity(), 2);
    }

    #[test]
    fn set_rejects_out_of_range_values() {
        assert!(SaverCLI::try_parse_from(["battery-saver", "set", "backlight", "17"]).is_err());
        assert!(SaverCLI::try_parse_from(["battery-saver", "set", "brightness", "2"]).is_err());
        assert!(SaverCLI::try_parse_from(["battery-saver", "set", "wifi", "maybe"]).is_err());
    }

    #[test]
    fn single_settings_ignore_an_unreadable_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let preferences = dir.path().join("preferences.json");
        std::fs::write(&preferences, "{}").unwrap();
        let paths = Paths {
            preferences: Some(preferences),
            state_file: Some(dir.path().to_path_buf()),
        };

        assert!(Session::open(&paths).is_err());
        assert!(load_controller(&paths).is_ok());
    }

    #[test]
    fn set_drives_the_controller() {
        let fake = FakeController::new(false, false);

        Control::Wifi { state: Switch::On }.apply(&fake).unwrap();
        Control::Backlight {
            level: Backlight::Level(3),
        }
        .apply(&fake)
        .unwrap();

        assert!(fake.wireless());
        assert_eq!(fake.backlight_level(), 3);
    }

    #[test]
    fn preview_offers_the_opposite_of_the_current_state() {
        let off = serde_json::to_value(PluginResult::for_state(&SaverState::Inactive)).unwrap();
        assert_eq!(
            off,
            serde_json::json!({"title": "Turn battery saver on", "run_args": [true]})
        );

        let active = SaverState::Active(Snapshot {
            wifi: true,
            bluetooth: true,
            brightness: ".65".to_string(),
            backlight: 1,
            saved_at: None,
        });
        let on = serde_json::to_value(PluginResult::for_state(&active)).unwrap();
        assert_eq!(
            on,
            serde_json::json!({"title": "Turn battery saver off", "run_args": [false]})
        );
    }
}
