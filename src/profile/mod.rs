//! Hardware profile identification
//!
//! Maps the platform identity (DMI product name plus CPU vendor) onto one of the
//! supported handheld generations. The resulting [`SystemProfile`] is created once
//! at startup and selects the chord table the matcher runs with.

use std::fmt::{self, Display};
use thiserror::Error;
use tracing::{debug, info};

const DMI_PRODUCT_NAME: &str = "/sys/devices/virtual/dmi/id/product_name";
const CPU_INFO: &str = "/proc/cpuinfo";

const AYA_GEN1_PRODUCTS: [&str; 5] = [
    "AYA NEO FOUNDER",
    "AYA NEO 2021",
    "AYANEO 2021",
    "AYANEO 2021 Pro",
    "AYANEO 2021 Pro Retro Power",
];

const AYA_GEN2_PRODUCTS: [&str; 8] = [
    "NEXT",
    "NEXT Pro",
    "NEXT Advance",
    "AYANEO NEXT",
    "AYANEO NEXT Pro",
    "AYANEO NEXT Advance",
    "AIR",
    "AIR Pro",
];

const OXP_PRODUCTS: [&str; 1] = ["ONE XPLAYER"];

/// Supported handheld hardware generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemProfile {
    /// Aya Neo Founder edition through 2021 Pro Retro Power
    AyaGen1,
    /// Aya Neo NEXT, AIR and later
    AyaGen2,
    OxpIntel,
    OxpAmd,
}

impl Display for SystemProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemProfile::AyaGen1 => write!(f, "AYA_GEN1"),
            SystemProfile::AyaGen2 => write!(f, "AYA_GEN2"),
            SystemProfile::OxpIntel => write!(f, "OXP_INTEL"),
            SystemProfile::OxpAmd => write!(f, "OXP_AMD"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error(
        "{product} is not currently supported by this tool. Please open an issue and include \
         the product name and CPU vendor of this system"
    )]
    ProfileUnsupported { product: String },

    #[error("Failed to read platform identity from {path}: {source}")]
    IdentityUnreadable {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Reads the platform identity and resolves the active profile
pub fn detect_profile() -> Result<SystemProfile, ProfileError> {
    let product = std::fs::read_to_string(DMI_PRODUCT_NAME).map_err(|source| {
        ProfileError::IdentityUnreadable {
            path: DMI_PRODUCT_NAME,
            source,
        }
    })?;
    // The CPU vendor only disambiguates OXP units, so a missing cpuinfo is not fatal.
    let cpu_vendor = std::fs::read_to_string(CPU_INFO)
        .ok()
        .and_then(|info| cpu_vendor_from_cpuinfo(&info))
        .unwrap_or_default();

    debug!(
        "Platform identity: product={:?} cpu_vendor={:?}",
        product.trim(),
        cpu_vendor
    );

    let profile = profile_from_identity(product.trim(), &cpu_vendor)?;
    info!("Detected system profile {} ({})", profile, product.trim());
    Ok(profile)
}

/// Pure mapping from identity strings to a profile
pub fn profile_from_identity(product: &str, cpu_vendor: &str) -> Result<SystemProfile, ProfileError> {
    if AYA_GEN1_PRODUCTS.contains(&product) {
        return Ok(SystemProfile::AyaGen1);
    }
    if AYA_GEN2_PRODUCTS.contains(&product) {
        return Ok(SystemProfile::AyaGen2);
    }
    if OXP_PRODUCTS.contains(&product) {
        match cpu_vendor {
            "GenuineIntel" => return Ok(SystemProfile::OxpIntel),
            "AuthenticAMD" | "AuthenticAMD Advanced Micro Devices, Inc." => {
                return Ok(SystemProfile::OxpAmd)
            }
            _ => {}
        }
    }

    Err(ProfileError::ProfileUnsupported {
        product: format!("{} ({})", product, cpu_vendor),
    })
}

fn cpu_vendor_from_cpuinfo(cpuinfo: &str) -> Option<String> {
    cpuinfo.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "vendor_id").then(|| value.trim().to_string())
    })
}
