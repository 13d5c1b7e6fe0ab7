use chrono::{DateTime, Local};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::{config::SaverSettings, controller::SettingsController, error::StoreError};

/// Brightness written into every snapshot. It is never read back.
const SNAPSHOT_BRIGHTNESS: &str = ".65";
/// Backlight written into every snapshot, meaning fully on. It is never read back.
const SNAPSHOT_BACKLIGHT: u8 = 1;

/// Settings captured right before battery saving mode was turned on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(with = "flag")]
    pub wifi: bool,
    #[serde(with = "flag")]
    pub bluetooth: bool,
    pub brightness: String,
    pub backlight: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Local>>,
}

/// Stores booleans as `0`/`1`, reads either form back.
mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Flag {
            Int(i64),
            Bool(bool),
        }

        Ok(match Flag::deserialize(deserializer)? {
            Flag::Int(value) => value != 0,
            Flag::Bool(value) => value,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaverState {
    Inactive,
    Active(Snapshot),
    /// The snapshot file exists but could not be parsed.
    Damaged { reason: String },
}

impl SaverState {
    /// Returns `true` unless the state is [`Inactive`].
    ///
    /// [`Inactive`]: SaverState::Inactive
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Inactive)
    }
}

/// What [`StateStore::exit_saving_mode`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Battery saving mode was not on; nothing was touched.
    NotActive,
    /// Wi-Fi and Bluetooth came from the snapshot.
    Restored,
    /// Every setting came from the deactivation preferences.
    Applied,
}

/// Tracks whether battery saving mode is on, backed by a snapshot file.
pub struct StateStore {
    path: PathBuf,
    state: SaverState,
}

impl StateStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = Self::read_state(&path)?;
        Ok(Self { path, state })
    }

    fn read_state(path: &Path) -> Result<SaverState, StoreError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SaverState::Inactive),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        match serde_json::from_str::<Snapshot>(&content) {
            Ok(snapshot) => Ok(SaverState::Active(snapshot)),
            Err(e) => {
                warn!("snapshot `{}` could not be parsed: {}", path.display(), e);
                Ok(SaverState::Damaged {
                    reason: e.to_string(),
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &SaverState {
        &self.state
    }

    /// Whether saving mode is on. A snapshot file deleted behind our back reads as off.
    pub fn is_active(&self) -> bool {
        self.state.is_active() && self.path.exists()
    }

    /// Records the current Wi-Fi and Bluetooth state, overwriting any previous snapshot.
    pub fn save_snapshot(
        &mut self,
        controller: &dyn SettingsController,
    ) -> Result<Snapshot, StoreError> {
        let snapshot = Snapshot {
            wifi: controller.query_wireless_state()?,
            bluetooth: controller.query_short_range_radio_state()?,
            brightness: SNAPSHOT_BRIGHTNESS.to_string(),
            backlight: SNAPSHOT_BACKLIGHT,
            saved_at: Some(Local::now()),
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let json = serde_json::to_string(&snapshot)?;
        fs::write(&self.path, json).map_err(|source| self.io_error(source))?;

        info!(
            "saved snapshot to `{}` (wifi: {}, bluetooth: {})",
            self.path.display(),
            snapshot.wifi,
            snapshot.bluetooth
        );

        self.state = SaverState::Active(snapshot.clone());
        Ok(snapshot)
    }

    /// Snapshots the current settings, then applies `settings`.
    ///
    /// Calling this while already active replaces the snapshot with the
    /// already reduced settings, losing the originals.
    pub fn enter_saving_mode(
        &mut self,
        controller: &dyn SettingsController,
        settings: &SaverSettings,
    ) -> Result<(), StoreError> {
        if self.is_active() {
            warn!("battery saving mode is already on, the previous snapshot will be replaced");
        }

        self.save_snapshot(controller)?;

        controller.set_brightness(settings.brightness)?;
        controller.set_wireless(settings.wifi)?;
        controller.set_short_range_radio(settings.bluetooth)?;
        controller.set_backlight(settings.backlight.enabled(), settings.backlight.level())?;

        info!("battery saving mode on");
        Ok(())
    }

    /// Leaves battery saving mode and removes the snapshot.
    ///
    /// With `restore_from_snapshot`, Wi-Fi and Bluetooth return to their
    /// snapshot values; brightness and backlight always come from `settings`.
    pub fn exit_saving_mode(
        &mut self,
        controller: &dyn SettingsController,
        settings: &SaverSettings,
        restore_from_snapshot: bool,
    ) -> Result<ExitOutcome, StoreError> {
        if !self.is_active() {
            info!("battery saving mode is not on, nothing to exit");
            self.state = SaverState::Inactive;
            return Ok(ExitOutcome::NotActive);
        }

        let (wifi, bluetooth, outcome) = match (&self.state, restore_from_snapshot) {
            (SaverState::Inactive, _) => {
                info!("battery saving mode is not on, nothing to exit");
                return Ok(ExitOutcome::NotActive);
            }
            (SaverState::Active(snapshot), true) => {
                (snapshot.wifi, snapshot.bluetooth, ExitOutcome::Restored)
            }
            (SaverState::Damaged { reason }, true) => {
                return Err(StoreError::DamagedSnapshot {
                    path: self.path.clone(),
                    reason: reason.clone(),
                });
            }
            (_, false) => (settings.wifi, settings.bluetooth, ExitOutcome::Applied),
        };

        controller.set_wireless(wifi)?;
        controller.set_short_range_radio(bluetooth)?;
        controller.set_backlight(settings.backlight.enabled(), settings.backlight.level())?;
        controller.set_brightness(settings.brightness)?;

        self.clear()?;
        info!("battery saving mode off ({:?})", outcome);
        Ok(outcome)
    }

    /// Deletes the snapshot file; a file that is already gone is fine.
    fn clear(&mut self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("snapshot `{}` was already removed", self.path.display())
            }
            Err(source) => return Err(self.io_error(source)),
        }
        self.state = SaverState::Inactive;
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
