//! Domain types for the provider-script engine.
//!
//! This module contains the core model types that cross the engine's
//! boundaries: provider descriptors, typed requests, and the timetable
//! records scripts produce. All identifier types enforce their invariants at
//! construction time, so code that receives them can trust their validity.

mod feature;
mod provider;
mod record;
mod request;

pub use feature::{InvalidFeature, ProviderFeature};
pub use provider::{InvalidProviderId, ProviderData, ProviderId, VehicleType};
pub use record::{
    GlobalTimetableInfo, InfoKey, RecordValue, ResultBatch, TimetableRecord, UnknownInfoKey,
};
pub use request::{
    AdditionalDataRequest, ArrivalRequest, DepartureRequest, JourneyRequest, Request,
    RequestCommon, RequestKind, SourceName, StopSuggestionFromGeoRequest, StopSuggestionRequest,
};
