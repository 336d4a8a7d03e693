//! Device information attached to `session_start`

use crate::types::{Properties, PropertyValue};

/// Client library version reported with every session
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Platform name sent with attribution lookups.
pub fn platform() -> &'static str {
    platform_name(std::env::consts::OS)
}

fn platform_name(os: &str) -> &str {
    match os {
        "android" => "Android",
        "ios" => "IPhonePlayer",
        "macos" => "OSXPlayer",
        "windows" => "WindowsPlayer",
        "linux" => "LinuxPlayer",
        other => other,
    }
}

/// Properties describing this device and client build.
pub fn device_info() -> Properties {
    let mut info = Properties::new();
    info.insert("platform".to_string(), platform().into());
    info.insert("os".to_string(), std::env::consts::OS.into());
    info.insert("os_family".to_string(), std::env::consts::FAMILY.into());
    info.insert("arch".to_string(), std::env::consts::ARCH.into());
    info.insert("sdk_version".to_string(), SDK_VERSION.into());
    if let Some(locale) = locale() {
        info.insert("locale".to_string(), PropertyValue::String(locale));
    }
    info
}

/// Locale from the POSIX environment, without the encoding suffix.
fn locale() -> Option<String> {
    ["LC_ALL", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|value| value.split('.').next().unwrap_or_default().to_string())
        .find(|value| !value.is_empty() && value != "C" && value != "POSIX")
}
