use super::Coordinate;
use serde::{Deserialize, Serialize};

/// External map applications an agent can hand navigation off to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationApp {
    GoogleMaps,
    Waze,
    AppleMaps,
}

impl std::str::FromStr for NavigationApp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google_maps" | "google" => Ok(NavigationApp::GoogleMaps),
            "waze" => Ok(NavigationApp::Waze),
            "apple_maps" | "apple" => Ok(NavigationApp::AppleMaps),
            other => Err(format!("unknown navigation app '{}'", other)),
        }
    }
}

/// Build a launchable URI that opens `app` with directions to `destination`.
///
/// Pure string construction, no network access.
pub fn deep_link(destination: Coordinate, app: NavigationApp) -> String {
    let ll = format!("{},{}", destination.latitude, destination.longitude);
    let encoded = urlencoding::encode(&ll);

    match app {
        NavigationApp::GoogleMaps => format!(
            "https://www.google.com/maps/dir/?api=1&destination={}&travelmode=driving",
            encoded
        ),
        NavigationApp::Waze => format!("https://waze.com/ul?ll={}&navigate=yes", encoded),
        NavigationApp::AppleMaps => format!("https://maps.apple.com/?daddr={}&dirflg=d", encoded),
    }
}
