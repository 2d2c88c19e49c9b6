//! Linux status provider
//!
//! Battery and charger state come from `/sys/class/power_supply`, Wi-Fi
//! signal quality from `/proc/net/wireless`. Anything missing or unreadable
//! reads as zero / disconnected; the sampler keeps running either way.

use crate::core::StatusProvider;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";
pub const DEFAULT_WIRELESS_PATH: &str = "/proc/net/wireless";

/// Full-scale link quality reported by most drivers
const LINK_QUALITY_MAX: f32 = 70.0;

pub struct SysfsStatus {
    power_supply_dir: PathBuf,
    wireless_path: PathBuf,
}

impl SysfsStatus {
    pub fn new() -> Self {
        Self::with_paths(DEFAULT_POWER_SUPPLY_DIR, DEFAULT_WIRELESS_PATH)
    }

    pub fn with_paths(
        power_supply_dir: impl Into<PathBuf>,
        wireless_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            power_supply_dir: power_supply_dir.into(),
            wireless_path: wireless_path.into(),
        }
    }

    /// Power supply entries whose `type` file matches `kind`
    fn supplies(&self, kind: &str) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.power_supply_dir) else {
            return Vec::new();
        };
        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| read_trimmed(&p.join("type")).as_deref() == Some(kind))
            .collect();
        found.sort();
        found
    }
}

impl Default for SysfsStatus {
    fn default() -> Self {
        Self::new()
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Link quality of the first interface in `/proc/net/wireless`, as a percentage
fn parse_wireless(contents: &str) -> Option<u32> {
    // Two header lines, then "iface: status link level noise ..."
    let line = contents.lines().skip(2).find(|l| l.contains(':'))?;
    let (_, fields) = line.split_once(':')?;
    let link = fields.split_whitespace().nth(1)?;
    let quality: f32 = link.trim_end_matches('.').parse().ok()?;
    Some(((quality / LINK_QUALITY_MAX) * 100.0).clamp(0.0, 100.0).round() as u32)
}

impl StatusProvider for SysfsStatus {
    fn battery_percent(&mut self) -> i32 {
        self.supplies("Battery")
            .first()
            .and_then(|bat| read_trimmed(&bat.join("capacity")))
            .and_then(|s| s.parse::<i32>().ok())
            .map(|v| v.clamp(0, 100))
            .unwrap_or(0)
    }

    fn charger_connected(&mut self) -> bool {
        let external_online = ["Mains", "USB"].iter().any(|kind| {
            self.supplies(kind)
                .iter()
                .any(|p| read_trimmed(&p.join("online")).as_deref() == Some("1"))
        });
        if external_online {
            return true;
        }
        self.supplies("Battery")
            .first()
            .and_then(|bat| read_trimmed(&bat.join("status")))
            .is_some_and(|s| s == "Charging" || s == "Full")
    }

    fn wifi_signal_percent(&mut self) -> u32 {
        fs::read_to_string(&self.wireless_path)
            .ok()
            .and_then(|c| parse_wireless(&c))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WIRELESS: &str = "\
Inter-| sta-|   Quality        |   Discarded packets               | Missed | WE
 face | tus | link level noise |  nwid  crypt   frag  retry   misc | beacon | 22
wlan0: 0000   56.  -54.  -256        0      0      0      0     12        0
";

    /// Fresh scratch directory under the system temp dir
    fn scratch_dir(name: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "padstream-{}-{}-{}",
            name,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn supply(root: &Path, name: &str, files: &[(&str, &str)]) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for (file, contents) in files {
            fs::write(dir.join(file), format!("{}\n", contents)).unwrap();
        }
    }

    #[test]
    fn test_parse_wireless() {
        assert_eq!(parse_wireless(WIRELESS), Some(80));
        assert_eq!(parse_wireless("header\nheader\n"), None);
    }

    #[test]
    fn test_reads_battery_and_charger() {
        let root = scratch_dir("battery");
        supply(
            &root,
            "BAT0",
            &[
                ("type", "Battery"),
                ("capacity", "63"),
                ("status", "Discharging"),
            ],
        );
        supply(&root, "AC", &[("type", "Mains"), ("online", "0")]);
        let wireless = root.join("wireless");
        fs::write(&wireless, WIRELESS).unwrap();

        let mut status = SysfsStatus::with_paths(&root, &wireless);
        assert_eq!(status.battery_percent(), 63);
        assert!(!status.charger_connected());
        assert_eq!(status.wifi_signal_percent(), 80);

        supply(&root, "AC", &[("online", "1")]);
        assert!(status.charger_connected());

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_files_read_as_zero() {
        let root = scratch_dir("empty");
        let mut status = SysfsStatus::with_paths(root.join("absent"), root.join("absent-wireless"));
        assert_eq!(status.battery_percent(), 0);
        assert!(!status.charger_connected());
        assert_eq!(status.wifi_signal_percent(), 0);
        fs::remove_dir_all(&root).unwrap();
    }
}
