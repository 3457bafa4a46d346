//! Provider capabilities.

use std::fmt;
use std::str::FromStr;

use super::request::RequestKind;

/// Error returned when parsing an unknown feature name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider feature: {0}")]
pub struct InvalidFeature(pub String);

/// A capability a provider script offers.
///
/// Features are either declared by the script's optional `features()` entry
/// function or inferred from which entry functions the script defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderFeature {
    Departures,
    Arrivals,
    Journeys,
    StopSuggestions,
    StopSuggestionsByGeoPosition,
    AdditionalData,
}

impl ProviderFeature {
    /// The script-facing name of the feature.
    pub fn name(self) -> &'static str {
        match self {
            ProviderFeature::Departures => "Departures",
            ProviderFeature::Arrivals => "Arrivals",
            ProviderFeature::Journeys => "Journeys",
            ProviderFeature::StopSuggestions => "StopSuggestions",
            ProviderFeature::StopSuggestionsByGeoPosition => "StopSuggestionsByGeoPosition",
            ProviderFeature::AdditionalData => "AdditionalData",
        }
    }

    /// All features.
    pub fn all() -> &'static [ProviderFeature] {
        &[
            ProviderFeature::Departures,
            ProviderFeature::Arrivals,
            ProviderFeature::Journeys,
            ProviderFeature::StopSuggestions,
            ProviderFeature::StopSuggestionsByGeoPosition,
            ProviderFeature::AdditionalData,
        ]
    }

    /// Features implied by the presence of an entry function.
    ///
    /// A timetable entry function implies both departures and arrivals; the
    /// suggestion entry function implies plain suggestions only, since
    /// geo-position support needs an explicit declaration.
    pub fn implied_by_entry(entry: &str) -> &'static [ProviderFeature] {
        match entry {
            "getTimetable" => &[ProviderFeature::Departures, ProviderFeature::Arrivals],
            "getJourneys" => &[ProviderFeature::Journeys],
            "getStopSuggestions" => &[ProviderFeature::StopSuggestions],
            "getAdditionalData" => &[ProviderFeature::AdditionalData],
            _ => &[],
        }
    }

    /// The feature a request kind needs.
    pub fn required_for(kind: RequestKind) -> ProviderFeature {
        match kind {
            RequestKind::Departures => ProviderFeature::Departures,
            RequestKind::Arrivals => ProviderFeature::Arrivals,
            RequestKind::Journeys => ProviderFeature::Journeys,
            RequestKind::StopSuggestions => ProviderFeature::StopSuggestions,
            RequestKind::StopSuggestionsByGeoPosition => {
                ProviderFeature::StopSuggestionsByGeoPosition
            }
            RequestKind::AdditionalData => ProviderFeature::AdditionalData,
        }
    }
}

impl FromStr for ProviderFeature {
    type Err = InvalidFeature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderFeature::all()
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| InvalidFeature(s.to_string()))
    }
}

impl fmt::Display for ProviderFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_roundtrip() {
        for feature in ProviderFeature::all() {
            assert_eq!(feature.name().parse::<ProviderFeature>().unwrap(), *feature);
        }
    }

    #[test]
    fn timetable_entry_implies_both_directions() {
        let implied = ProviderFeature::implied_by_entry("getTimetable");
        assert!(implied.contains(&ProviderFeature::Departures));
        assert!(implied.contains(&ProviderFeature::Arrivals));
    }

    #[test]
    fn unrelated_function_implies_nothing() {
        assert!(ProviderFeature::implied_by_entry("parseRow").is_empty());
    }

    #[test]
    fn required_feature_per_kind() {
        assert_eq!(
            ProviderFeature::required_for(RequestKind::Journeys),
            ProviderFeature::Journeys
        );
        assert_eq!(
            ProviderFeature::required_for(RequestKind::StopSuggestionsByGeoPosition),
            ProviderFeature::StopSuggestionsByGeoPosition
        );
    }
}
