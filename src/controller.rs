//! Drives the external tools behind each power-hungry setting.

use log::debug;
use std::{io::ErrorKind, path::Path, process::Command};

use crate::config::{ProbeConfig, ToolPaths};
use crate::error::ControllerError;

/// Number of keystrokes that take the keyboard backlight from fully off to fully on.
pub const BACKLIGHT_STEPS: u8 = 16;

/// One keyboard backlight keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklightKey {
    Up,
    Down,
}

impl BacklightKey {
    /// The `cliclick` key-press command for this key.
    pub fn keypress(self) -> &'static str {
        match self {
            Self::Up => "kp:keys-light-up",
            Self::Down => "kp:keys-light-down",
        }
    }
}

/// On/off operations for every setting battery saving mode touches.
///
/// Implemented by [`MacController`] for the real machine and by a recording
/// fake in tests.
pub trait SettingsController {
    /// Set the display brightness, `0.0..=1.0`. Out of range values are passed through.
    fn set_brightness(&self, level: f64) -> Result<(), ControllerError>;

    /// Turn the Wi-Fi radio on or off.
    fn set_wireless(&self, enabled: bool) -> Result<(), ControllerError>;

    /// Turn Bluetooth on or off.
    fn set_short_range_radio(&self, enabled: bool) -> Result<(), ControllerError>;

    /// Send a single keyboard backlight keystroke.
    fn backlight_step(&self, key: BacklightKey) -> Result<(), ControllerError>;

    /// Best-effort guess whether Wi-Fi is on.
    fn query_wireless_state(&self) -> Result<bool, ControllerError>;

    /// Whether Bluetooth is on.
    fn query_short_range_radio_state(&self) -> Result<bool, ControllerError>;

    /// Set the keyboard backlight.
    ///
    /// There is no way to read or set the level directly, so this works in
    /// keystrokes:
    /// - disabling sends [`BACKLIGHT_STEPS`] down keys;
    /// - enabling without a level sends [`BACKLIGHT_STEPS`] up keys;
    /// - enabling with a level first turns the backlight fully off, then sends
    ///   `level` up keys. `16` is fully on and `0` leaves it off.
    fn set_backlight(&self, enabled: bool, level: Option<u8>) -> Result<(), ControllerError> {
        if let Some(level) = level.filter(|level| *level > BACKLIGHT_STEPS) {
            return Err(ControllerError::InvalidBacklightLevel(level));
        }

        match (enabled, level) {
            (false, _) => self.press_backlight(BacklightKey::Down, BACKLIGHT_STEPS),
            (true, None) => self.press_backlight(BacklightKey::Up, BACKLIGHT_STEPS),
            (true, Some(level)) => {
                self.press_backlight(BacklightKey::Down, BACKLIGHT_STEPS)?;
                match level {
                    BACKLIGHT_STEPS => self.set_backlight(true, None),
                    0 => Ok(()),
                    level => self.press_backlight(BacklightKey::Up, level),
                }
            }
        }
    }

    /// Send `times` identical backlight keystrokes.
    fn press_backlight(&self, key: BacklightKey, times: u8) -> Result<(), ControllerError> {
        for _ in 0..times {
            self.backlight_step(key)?;
        }
        Ok(())
    }
}

/// Controls a Mac through `brightness`, `blueutil`, `cliclick` and `networksetup`.
pub struct MacController {
    tools: ToolPaths,
    probe: ProbeConfig,
}

impl MacController {
    pub fn new(tools: ToolPaths, probe: ProbeConfig) -> Self {
        Self { tools, probe }
    }

    /// Run a tool to completion and return its stdout.
    fn run_tool(program: &Path, args: &[&str]) -> Result<String, ControllerError> {
        let tool = program.display().to_string();
        debug!("running `{}` {:?}", tool, args);

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| match source.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    ControllerError::ToolNotFound { tool: tool.clone() }
                }
                _ => ControllerError::Spawn {
                    tool: tool.clone(),
                    source,
                },
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ControllerError::ToolFailed {
                tool,
                status: output.status,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl SettingsController for MacController {
    fn set_brightness(&self, level: f64) -> Result<(), ControllerError> {
        Self::run_tool(&self.tools.brightness, &[&level.to_string()])?;
        Ok(())
    }

    fn set_wireless(&self, enabled: bool) -> Result<(), ControllerError> {
        Self::run_tool(
            &self.tools.networksetup,
            &[
                "-setairportpower",
                &self.tools.wifi_interface,
                switch_arg(enabled),
            ],
        )?;
        Ok(())
    }

    fn set_short_range_radio(&self, enabled: bool) -> Result<(), ControllerError> {
        Self::run_tool(&self.tools.blueutil, &[switch_arg(enabled)])?;
        Ok(())
    }

    fn backlight_step(&self, key: BacklightKey) -> Result<(), ControllerError> {
        Self::run_tool(&self.tools.cliclick, &[key.keypress()])?;
        Ok(())
    }

    /// Fetches the probe URL; a successful response is taken to mean Wi-Fi is on.
    ///
    /// Captive portals or a LAN without internet access read as "off".
    fn query_wireless_state(&self) -> Result<bool, ControllerError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.probe.timeout)
            .build()?;

        match client.get(self.probe.url.clone()).send() {
            Ok(response) => {
                debug!("wireless probe answered with {}", response.status());
                Ok(response.status().is_success())
            }
            Err(e) => {
                debug!("wireless probe failed: {}", e);
                Ok(false)
            }
        }
    }

    fn query_short_range_radio_state(&self) -> Result<bool, ControllerError> {
        let output = Self::run_tool(&self.tools.blueutil, &[])?;
        parse_radio_status(&output).ok_or_else(|| ControllerError::UnexpectedOutput {
            tool: self.tools.blueutil.display().to_string(),
            output: output.trim().to_string(),
        })
    }
}

fn switch_arg(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

/// Reads `blueutil` status output such as `Power: 1`.
fn parse_radio_status(output: &str) -> Option<bool> {
    let flag = output.split_whitespace().nth(1)?;
    flag.parse::<i64>().ok().map(|flag| flag != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Call, FakeController};

    fn ups_and_downs(calls: &[Call]) -> (usize, usize) {
        let ups = calls
            .iter()
            .filter(|c| **c == Call::Backlight(BacklightKey::Up))
            .count();
        let downs = calls
            .iter()
            .filter(|c| **c == Call::Backlight(BacklightKey::Down))
            .count();
        (ups, downs)
    }

    #[test]
    fn backlight_off_sends_all_down_keys() {
        let fake = FakeController::new(true, true);
        fake.set_backlight(false, None).unwrap();
        assert_eq!(ups_and_downs(&fake.calls()), (0, 16));
        assert_eq!(fake.backlight_level(), 0);
    }

    #[test]
    fn backlight_on_without_level_sends_all_up_keys() {
        let fake = FakeController::new(true, true);
        fake.set_backlight(true, None).unwrap();
        assert_eq!(ups_and_downs(&fake.calls()), (16, 0));
        assert_eq!(fake.backlight_level(), 16);
    }

    #[test]
    fn backlight_level_resets_then_steps_up_exactly_level_times() {
        for level in 1..BACKLIGHT_STEPS {
            let fake = FakeController::new(true, true);
            fake.set_backlight(true, Some(level)).unwrap();

            let calls = fake.calls();
            let (downs, ups) = calls.split_at(BACKLIGHT_STEPS as usize);
            assert!(downs.iter().all(|c| *c == Call::Backlight(BacklightKey::Down)));
            assert_eq!(ups.len(), level as usize, "level {}", level);
            assert!(ups.iter().all(|c| *c == Call::Backlight(BacklightKey::Up)));
            assert_eq!(fake.backlight_level(), level);
        }
    }

    #[test]
    fn backlight_level_zero_stays_off() {
        let fake = FakeController::new(true, true);
        fake.set_backlight(true, Some(0)).unwrap();
        assert_eq!(ups_and_downs(&fake.calls()), (0, 16));
        assert_eq!(fake.backlight_level(), 0);
    }

    #[test]
    fn backlight_level_sixteen_is_full_on() {
        let fake = FakeController::new(true, true);
        fake.set_backlight(true, Some(16)).unwrap();
        assert_eq!(ups_and_downs(&fake.calls()), (16, 16));
        assert_eq!(fake.backlight_level(), 16);
    }

    #[test]
    fn backlight_level_above_range_is_rejected_before_any_keystroke() {
        let fake = FakeController::new(true, true);
        let err = fake.set_backlight(true, Some(17)).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidBacklightLevel(17)));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn radio_status_reads_second_token() {
        assert_eq!(parse_radio_status("Power: 1\n"), Some(true));
        assert_eq!(parse_radio_status("Power: 0\nDiscoverable: 1\n"), Some(false));
        assert_eq!(parse_radio_status("Power:"), None);
        assert_eq!(parse_radio_status("Power: on"), None);
    }

    #[test]
    fn missing_tool_is_reported_as_not_found() {
        let err = MacController::run_tool(Path::new("/nonexistent/battery-saver-tool"), &[])
            .unwrap_err();
        assert!(matches!(err, ControllerError::ToolNotFound { .. }));
    }

    #[test]
    fn failing_tool_reports_its_exit_status() {
        let err = MacController::run_tool(Path::new("false"), &[]).unwrap_err();
        assert!(matches!(err, ControllerError::ToolFailed { .. }));
    }

    #[test]
    fn unreadable_radio_status_is_unexpected_output() {
        let controller = MacController::new(
            ToolPaths {
                blueutil: "echo".into(),
                ..ToolPaths::default()
            },
            ProbeConfig::default(),
        );

        let err = controller.query_short_range_radio_state().unwrap_err();
        assert!(matches!(err, ControllerError::UnexpectedOutput { .. }));
    }

    fn controller_probing(url: url::Url) -> MacController {
        MacController::new(
            ToolPaths::default(),
            ProbeConfig {
                url,
                timeout: std::time::Duration::from_secs(2),
            },
        )
    }

    /// Answers a single HTTP request with `status` on a local port.
    fn serve_once(status: &'static str) -> url::Url {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request);
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        url::Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    #[test]
    fn wireless_reads_on_only_for_a_successful_response() {
        let ok = controller_probing(serve_once("200 OK"));
        assert!(ok.query_wireless_state().unwrap());

        let missing = controller_probing(serve_once("404 Not Found"));
        assert!(!missing.query_wireless_state().unwrap());
    }

    #[test]
    fn wireless_reads_off_when_nothing_answers() {
        let closed = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);
            url::Url::parse(&format!("http://{}/", addr)).unwrap()
        };

        assert!(!controller_probing(closed).query_wireless_state().unwrap());
    }
}
