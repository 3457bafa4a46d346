//! Typed requests submitted to the engine.
//!
//! The out-of-scope data-source layer parses its textual source names into
//! these types; the engine only ever sees the typed form. A request is
//! immutable once created and owned by its job for the job's lifetime.

use std::fmt;

use chrono::NaiveDateTime;

use super::provider::ProviderId;

/// The opaque identity of one logical data feed.
///
/// Source names deduplicate submissions (at most one in-flight job per
/// source name) and key the incremental batches published while a job runs.
/// The engine never interprets the contents.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceName(String);

impl SourceName {
    /// Wrap a source-name string.
    pub fn new(s: impl Into<String>) -> Self {
        SourceName(s.into())
    }

    /// Returns the source name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceName({})", self.0)
    }
}

impl From<&str> for SourceName {
    fn from(s: &str) -> Self {
        SourceName::new(s)
    }
}

/// The kind of data a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Departures,
    Arrivals,
    Journeys,
    StopSuggestions,
    StopSuggestionsByGeoPosition,
    AdditionalData,
}

impl RequestKind {
    /// The name of the script entry function serving this request kind.
    ///
    /// Departures and arrivals share one timetable entry function; the
    /// direction is passed as a parameter. Both stop-suggestion kinds share
    /// the suggestion entry function.
    pub fn entry_function(self) -> &'static str {
        match self {
            RequestKind::Departures | RequestKind::Arrivals => "getTimetable",
            RequestKind::Journeys => "getJourneys",
            RequestKind::StopSuggestions | RequestKind::StopSuggestionsByGeoPosition => {
                "getStopSuggestions"
            }
            RequestKind::AdditionalData => "getAdditionalData",
        }
    }

    /// Whether a request of this kind is expected to produce records.
    ///
    /// Stop suggestions may legitimately come back empty ("no stop matches
    /// the typed prefix"); the data-bearing kinds are subject to the
    /// engine's empty-result policy.
    pub fn expects_data(self) -> bool {
        !matches!(
            self,
            RequestKind::StopSuggestions | RequestKind::StopSuggestionsByGeoPosition
        )
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Departures => "departures",
            RequestKind::Arrivals => "arrivals",
            RequestKind::Journeys => "journeys",
            RequestKind::StopSuggestions => "stop suggestions",
            RequestKind::StopSuggestionsByGeoPosition => "stop suggestions by geo position",
            RequestKind::AdditionalData => "additional data",
        };
        f.write_str(name)
    }
}

/// Fields shared by every request kind.
#[derive(Debug, Clone)]
pub struct RequestCommon {
    /// The provider to run the request against.
    pub provider: ProviderId,

    /// Identity of the logical feed this request belongs to.
    pub source_name: SourceName,

    /// The start of the requested time window.
    pub date_time: NaiveDateTime,

    /// Upper bound on the number of items the caller wants.
    pub max_count: usize,
}

impl RequestCommon {
    /// Create common request fields.
    pub fn new(
        provider: ProviderId,
        source_name: SourceName,
        date_time: NaiveDateTime,
        max_count: usize,
    ) -> Self {
        Self {
            provider,
            source_name,
            date_time,
            max_count,
        }
    }
}

/// Request for a stop's departure board.
#[derive(Debug, Clone)]
pub struct DepartureRequest {
    pub common: RequestCommon,
    /// Stop to fetch departures for, as the provider names it.
    pub stop: String,
    /// Provider-assigned stop id, when the caller already knows it.
    pub stop_id: Option<String>,
    /// City disambiguation for providers that need it.
    pub city: Option<String>,
}

/// Request for a stop's arrival board.
///
/// Same shape as [`DepartureRequest`]; scripts receive the direction as a
/// parameter.
#[derive(Debug, Clone)]
pub struct ArrivalRequest {
    pub common: RequestCommon,
    pub stop: String,
    pub stop_id: Option<String>,
    pub city: Option<String>,
}

/// Request for journeys between two stops.
#[derive(Debug, Clone)]
pub struct JourneyRequest {
    pub common: RequestCommon,
    /// Origin stop name.
    pub origin: String,
    /// Target stop name.
    pub target: String,
    /// Whether `date_time` is the departure (true) or arrival (false) time.
    pub time_is_departure: bool,
}

/// Request for stop-name completions.
#[derive(Debug, Clone)]
pub struct StopSuggestionRequest {
    pub common: RequestCommon,
    /// The partial stop name typed so far.
    pub stop: String,
    pub city: Option<String>,
}

/// Request for stops near a geographic position.
#[derive(Debug, Clone)]
pub struct StopSuggestionFromGeoRequest {
    pub common: RequestCommon,
    pub longitude: f64,
    pub latitude: f64,
    /// Search radius in meters.
    pub distance: u32,
}

/// Request for additional data for one already-published item.
#[derive(Debug, Clone)]
pub struct AdditionalDataRequest {
    pub common: RequestCommon,
    /// Index of the item in the published timetable.
    pub item_index: usize,
    /// Stop the original timetable was fetched for.
    pub stop: String,
    /// Values the script needs to re-identify the item (line, target, time),
    /// as produced by the original run.
    pub route_data_url: Option<String>,
}

/// A typed request for one provider, dispatched on its kind.
#[derive(Debug, Clone)]
pub enum Request {
    Departures(DepartureRequest),
    Arrivals(ArrivalRequest),
    Journeys(JourneyRequest),
    StopSuggestions(StopSuggestionRequest),
    StopSuggestionsByGeoPosition(StopSuggestionFromGeoRequest),
    AdditionalData(AdditionalDataRequest),
}

impl Request {
    /// The request's kind discriminant.
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Departures(_) => RequestKind::Departures,
            Request::Arrivals(_) => RequestKind::Arrivals,
            Request::Journeys(_) => RequestKind::Journeys,
            Request::StopSuggestions(_) => RequestKind::StopSuggestions,
            Request::StopSuggestionsByGeoPosition(_) => RequestKind::StopSuggestionsByGeoPosition,
            Request::AdditionalData(_) => RequestKind::AdditionalData,
        }
    }

    /// The common fields shared by all kinds.
    pub fn common(&self) -> &RequestCommon {
        match self {
            Request::Departures(r) => &r.common,
            Request::Arrivals(r) => &r.common,
            Request::Journeys(r) => &r.common,
            Request::StopSuggestions(r) => &r.common,
            Request::StopSuggestionsByGeoPosition(r) => &r.common,
            Request::AdditionalData(r) => &r.common,
        }
    }

    /// The provider this request targets.
    pub fn provider(&self) -> &ProviderId {
        &self.common().provider
    }

    /// The source name identifying this request's feed.
    pub fn source_name(&self) -> &SourceName {
        &self.common().source_name
    }

    /// The script entry function serving this request.
    pub fn entry_function(&self) -> &'static str {
        self.kind().entry_function()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn common(source: &str) -> RequestCommon {
        RequestCommon::new(
            ProviderId::parse("de_db").unwrap(),
            SourceName::new(source),
            NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(10, 30, 0)
                .unwrap(),
            20,
        )
    }

    #[test]
    fn entry_function_mapping() {
        let dep = Request::Departures(DepartureRequest {
            common: common("Departures de_db|stop=Main St"),
            stop: "Main St".into(),
            stop_id: None,
            city: None,
        });
        assert_eq!(dep.entry_function(), "getTimetable");
        assert_eq!(dep.kind(), RequestKind::Departures);

        let arr = Request::Arrivals(ArrivalRequest {
            common: common("Arrivals de_db|stop=Main St"),
            stop: "Main St".into(),
            stop_id: None,
            city: None,
        });
        assert_eq!(arr.entry_function(), "getTimetable");

        let journeys = Request::Journeys(JourneyRequest {
            common: common("Journeys de_db"),
            origin: "A".into(),
            target: "B".into(),
            time_is_departure: true,
        });
        assert_eq!(journeys.entry_function(), "getJourneys");

        let geo = Request::StopSuggestionsByGeoPosition(StopSuggestionFromGeoRequest {
            common: common("Stops de_db|lat=48.1"),
            longitude: 11.6,
            latitude: 48.1,
            distance: 500,
        });
        assert_eq!(geo.entry_function(), "getStopSuggestions");
    }

    #[test]
    fn stop_suggestions_do_not_expect_data() {
        assert!(RequestKind::Departures.expects_data());
        assert!(RequestKind::Journeys.expects_data());
        assert!(RequestKind::AdditionalData.expects_data());
        assert!(!RequestKind::StopSuggestions.expects_data());
        assert!(!RequestKind::StopSuggestionsByGeoPosition.expects_data());
    }

    #[test]
    fn source_name_is_opaque() {
        let a = SourceName::new("Departures de_db|stop=Main St");
        let b = SourceName::from("Departures de_db|stop=Main St");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "Departures de_db|stop=Main St");
    }
}
