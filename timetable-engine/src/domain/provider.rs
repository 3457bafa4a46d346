//! Provider identity and descriptor types.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

/// Error returned when parsing an invalid provider id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid provider id: {reason}")]
pub struct InvalidProviderId {
    reason: &'static str,
}

/// A validated provider identifier.
///
/// Provider ids name one timetable source (e.g. a transit operator's feed)
/// and double as keys for the capability cache and the shared script
/// storage. They are non-empty, lowercase ASCII letters, digits or `_`.
///
/// # Examples
///
/// ```
/// use timetable_engine::domain::ProviderId;
///
/// let id = ProviderId::parse("de_db").unwrap();
/// assert_eq!(id.as_str(), "de_db");
///
/// // Uppercase is rejected
/// assert!(ProviderId::parse("DE_DB").is_err());
///
/// // Empty is rejected
/// assert!(ProviderId::parse("").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(String);

impl ProviderId {
    /// Parse a provider id from a string.
    ///
    /// The input must be non-empty and consist of lowercase ASCII letters,
    /// digits or underscores.
    pub fn parse(s: &str) -> Result<Self, InvalidProviderId> {
        if s.is_empty() {
            return Err(InvalidProviderId {
                reason: "must not be empty",
            });
        }

        for b in s.bytes() {
            if !(b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_') {
                return Err(InvalidProviderId {
                    reason: "must be lowercase ASCII letters, digits or '_'",
                });
            }
        }

        Ok(ProviderId(s.to_string()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderId({})", self.0)
    }
}

impl<'de> Deserialize<'de> for ProviderId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ProviderId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// The mode of transport a departure belongs to.
///
/// Scripts report vehicle types by name; anything unrecognized falls back to
/// the provider's default, or [`VehicleType::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    #[default]
    Unknown,
    Tram,
    Bus,
    TrolleyBus,
    Subway,
    InterurbanTrain,
    RegionalTrain,
    RegionalExpressTrain,
    InterregionalTrain,
    IntercityTrain,
    HighSpeedTrain,
    Ferry,
    Plane,
}

impl VehicleType {
    /// The script-facing name of this vehicle type.
    pub fn name(self) -> &'static str {
        match self {
            VehicleType::Unknown => "unknown",
            VehicleType::Tram => "tram",
            VehicleType::Bus => "bus",
            VehicleType::TrolleyBus => "trolley_bus",
            VehicleType::Subway => "subway",
            VehicleType::InterurbanTrain => "interurban_train",
            VehicleType::RegionalTrain => "regional_train",
            VehicleType::RegionalExpressTrain => "regional_express_train",
            VehicleType::InterregionalTrain => "interregional_train",
            VehicleType::IntercityTrain => "intercity_train",
            VehicleType::HighSpeedTrain => "high_speed_train",
            VehicleType::Ferry => "ferry",
            VehicleType::Plane => "plane",
        }
    }

    /// Parse a vehicle type from its script-facing name.
    ///
    /// Returns `None` for unrecognized names.
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "tram" => VehicleType::Tram,
            "bus" => VehicleType::Bus,
            "trolley_bus" => VehicleType::TrolleyBus,
            "subway" => VehicleType::Subway,
            "interurban_train" => VehicleType::InterurbanTrain,
            "regional_train" => VehicleType::RegionalTrain,
            "regional_express_train" => VehicleType::RegionalExpressTrain,
            "interregional_train" => VehicleType::InterregionalTrain,
            "intercity_train" => VehicleType::IntercityTrain,
            "high_speed_train" => VehicleType::HighSpeedTrain,
            "ferry" => VehicleType::Ferry,
            "plane" => VehicleType::Plane,
            "unknown" => VehicleType::Unknown,
            _ => return None,
        };
        Some(ty)
    }
}

/// Static descriptor for one provider.
///
/// Produced by the provider metadata reader (outside this crate) from a
/// declarative provider-description file; the engine only consumes it.
/// `Deserialize` is derived so descriptors can be loaded from JSON in the
/// demo binary and tests.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderData {
    /// The provider's id.
    pub id: ProviderId,

    /// Path to the provider's script file.
    pub script_path: PathBuf,

    /// Optional script extensions the provider's script needs (e.g. "url").
    #[serde(default)]
    pub script_extensions: Vec<String>,

    /// Vehicle type assumed when a record does not name one.
    #[serde(default)]
    pub default_vehicle_type: VehicleType,

    /// Files the script includes, relative to the script's directory or
    /// absolute. Changes to any of these invalidate cached capabilities.
    #[serde(default)]
    pub includes: Vec<PathBuf>,
}

impl ProviderData {
    /// Create a descriptor with just an id and a script path.
    pub fn new(id: ProviderId, script_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            script_path: script_path.into(),
            script_extensions: Vec::new(),
            default_vehicle_type: VehicleType::Unknown,
            includes: Vec::new(),
        }
    }

    /// Set the script extensions.
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.script_extensions = extensions;
        self
    }

    /// Set the default vehicle type.
    pub fn with_default_vehicle_type(mut self, ty: VehicleType) -> Self {
        self.default_vehicle_type = ty;
        self
    }

    /// Set the include list.
    pub fn with_includes(mut self, includes: Vec<PathBuf>) -> Self {
        self.includes = includes;
        self
    }

    /// Resolve the include paths against the script's directory.
    ///
    /// Relative include paths are interpreted relative to the directory the
    /// script itself lives in.
    pub fn resolved_includes(&self) -> Vec<PathBuf> {
        let base = self.script_path.parent();
        self.includes
            .iter()
            .map(|inc| {
                if inc.is_absolute() {
                    inc.clone()
                } else {
                    match base {
                        Some(dir) => dir.join(inc),
                        None => inc.clone(),
                    }
                }
            })
            .collect()
    }

    /// Load a descriptor from a JSON file.
    ///
    /// A relative `script_path` is resolved against the descriptor's own
    /// directory (includes resolve against the script's directory, see
    /// [`resolved_includes`](Self::resolved_includes)).
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, std::io::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut data: ProviderData =
            serde_json::from_str(&contents).map_err(std::io::Error::other)?;
        if data.script_path.is_relative() {
            if let Some(dir) = path.parent() {
                data.script_path = dir.join(&data.script_path);
            }
        }
        Ok(data)
    }
}
