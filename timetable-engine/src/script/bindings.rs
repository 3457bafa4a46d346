//! Host objects injected into every sandbox.
//!
//! Each job gets fresh handle values pushed into its scope: `helper` (text
//! and time utilities), `network` (the download bridge), `storage` (the
//! provider's shared map) and `result` (the collector). Handles are plain
//! cloned values, never global state, so concurrent jobs cannot interfere.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Position};
use std::sync::Arc;
use tracing::warn;

use crate::collector::ResultCollector;
use crate::domain::{InfoKey, RecordValue, Request, TimetableRecord, VehicleType};
use crate::network::{DownloadRequest, HttpMethod, NetworkBridge};
use crate::storage::{ProviderStorage, StorageValue};

/// Text and time utilities for scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Helper;

impl Helper {
    fn trim(&mut self, s: &str) -> String {
        s.trim_matches(|c: char| c.is_whitespace() || c == '\u{a0}')
            .to_string()
    }

    fn strip_tags(&mut self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut in_tag = false;
        for c in s.chars() {
            match c {
                '<' => in_tag = true,
                '>' => in_tag = false,
                c if !in_tag => out.push(c),
                _ => {}
            }
        }
        out
    }

    fn decode_html_entities(&mut self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(pos) = rest.find('&') {
            out.push_str(&rest[..pos]);
            rest = &rest[pos..];
            let Some(end) = rest.find(';') else {
                break;
            };
            let entity = &rest[1..end];
            match entity {
                "amp" => out.push('&'),
                "lt" => out.push('<'),
                "gt" => out.push('>'),
                "quot" => out.push('"'),
                "apos" => out.push('\''),
                "nbsp" => out.push(' '),
                _ => {
                    let decoded = entity
                        .strip_prefix("#x")
                        .or_else(|| entity.strip_prefix("#X"))
                        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                        .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                        .and_then(char::from_u32);
                    match decoded {
                        Some(c) => out.push(c),
                        None => {
                            // Not an entity we know; keep it verbatim.
                            out.push_str(&rest[..=end]);
                        }
                    }
                }
            }
            rest = &rest[end + 1..];
        }
        out.push_str(rest);
        out
    }

    fn parse_time_default(&mut self, s: &str) -> Dynamic {
        self.parse_time(s, "%H:%M")
    }

    fn parse_time(&mut self, s: &str, format: &str) -> Dynamic {
        match NaiveTime::parse_from_str(s.trim(), format) {
            Ok(time) => {
                let mut map = Map::new();
                map.insert("hour".into(), Dynamic::from(time.hour() as i64));
                map.insert("minute".into(), Dynamic::from(time.minute() as i64));
                Dynamic::from(map)
            }
            Err(_) => Dynamic::UNIT,
        }
    }

    fn format_time(&mut self, hour: i64, minute: i64) -> String {
        format!("{:02}:{:02}", hour.rem_euclid(24), minute.rem_euclid(60))
    }

    fn format_date(&mut self, year: i64, month: i64, day: i64) -> String {
        format!("{year:04}-{month:02}-{day:02}")
    }

    fn add_minutes_to_time(&mut self, time: &str, minutes: i64) -> String {
        match NaiveTime::parse_from_str(time.trim(), "%H:%M") {
            Ok(parsed) => {
                let shifted = parsed + chrono::Duration::minutes(minutes);
                shifted.format("%H:%M").to_string()
            }
            // Leave unparseable input alone so the script can notice.
            Err(_) => time.to_string(),
        }
    }

    /// Minutes from `from` to `to`, wrapping past midnight. Returns -1 when
    /// either time does not parse.
    fn duration(&mut self, from: &str, to: &str) -> i64 {
        let (Ok(from), Ok(to)) = (
            NaiveTime::parse_from_str(from.trim(), "%H:%M"),
            NaiveTime::parse_from_str(to.trim(), "%H:%M"),
        ) else {
            return -1;
        };
        let minutes = (to - from).num_minutes();
        if minutes < 0 { minutes + 24 * 60 } else { minutes }
    }

    fn extract_block(&mut self, s: &str, begin: &str, end: &str) -> String {
        let Some(start) = s.find(begin) else {
            return String::new();
        };
        let after = &s[start + begin.len()..];
        match after.find(end) {
            Some(stop) => after[..stop].to_string(),
            None => String::new(),
        }
    }
}

/// The script-facing download object.
#[derive(Clone)]
pub struct NetworkHandle {
    bridge: NetworkBridge,
    collector: ResultCollector,
}

impl NetworkHandle {
    pub fn new(bridge: NetworkBridge, collector: ResultCollector) -> Self {
        Self { bridge, collector }
    }

    fn download(&mut self, url: &str) -> Result<Map, Box<EvalAltResult>> {
        self.run(DownloadRequest::get(url))
    }

    fn download_with(&mut self, url: &str, options: Map) -> Result<Map, Box<EvalAltResult>> {
        let request = parse_download_options(url, &options)?;
        self.run(request)
    }

    fn run(&mut self, request: DownloadRequest) -> Result<Map, Box<EvalAltResult>> {
        // Watchers should see what is already parsed before we stall on I/O.
        self.collector.flush();

        let reply = self.bridge.download(request);

        // Cancellation safe point: right after every suspension resume.
        if self.bridge.is_cancelled() {
            return Err(Box::new(EvalAltResult::ErrorTerminated(
                Dynamic::UNIT,
                Position::NONE,
            )));
        }

        let mut map = Map::new();
        map.insert("ok".into(), Dynamic::from(reply.ok));
        map.insert("status".into(), Dynamic::from(reply.status as i64));
        map.insert("body".into(), Dynamic::from(reply.body));
        map.insert(
            "error".into(),
            match reply.error {
                Some(error) => Dynamic::from(error),
                None => Dynamic::UNIT,
            },
        );
        map.insert("url".into(), Dynamic::from(reply.url));
        Ok(map)
    }
}

fn parse_download_options(url: &str, options: &Map) -> Result<DownloadRequest, Box<EvalAltResult>> {
    let mut request = DownloadRequest::get(url);

    for (key, value) in options {
        match key.as_str() {
            "method" => {
                let method = value.to_string();
                request.method = match method.to_ascii_lowercase().as_str() {
                    "get" => HttpMethod::Get,
                    "post" => HttpMethod::Post,
                    other => return Err(format!("unknown download method '{other}'").into()),
                };
            }
            "body" => request.body = Some(value.to_string()),
            "content_type" => request.content_type = Some(value.to_string()),
            "charset" => request.charset = Some(value.to_string()),
            "timeout" => {
                let secs = value
                    .as_int()
                    .map_err(|_| "download timeout must be an integer (seconds)")?;
                request.timeout = std::time::Duration::from_secs(secs.max(0) as u64);
            }
            "headers" => {
                let headers = value
                    .clone()
                    .try_cast::<Map>()
                    .ok_or("download headers must be a map")?;
                for (name, header_value) in &headers {
                    request
                        .headers
                        .push((name.to_string(), header_value.to_string()));
                }
            }
            other => return Err(format!("unknown download option '{other}'").into()),
        }
    }

    Ok(request)
}

/// The script-facing shared storage object.
#[derive(Clone)]
pub struct StorageHandle {
    storage: Arc<ProviderStorage>,
}

impl StorageHandle {
    pub fn new(storage: Arc<ProviderStorage>) -> Self {
        Self { storage }
    }

    fn put(&mut self, key: &str, value: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let value = dynamic_to_storage(value)
            .ok_or("storage values must be text, integer, float or boolean")?;
        self.storage.put(key, value);
        Ok(())
    }

    fn get(&mut self, key: &str) -> Dynamic {
        match self.storage.get(key) {
            Some(value) => storage_to_dynamic(value),
            None => Dynamic::UNIT,
        }
    }

    fn get_or(&mut self, key: &str, default: Dynamic) -> Dynamic {
        match self.storage.get(key) {
            Some(value) => storage_to_dynamic(value),
            None => default,
        }
    }

    fn has(&mut self, key: &str) -> bool {
        self.storage.contains(key)
    }

    fn remove(&mut self, key: &str) {
        self.storage.remove(key);
    }

    fn clear(&mut self) {
        self.storage.clear();
    }
}

fn dynamic_to_storage(value: Dynamic) -> Option<StorageValue> {
    if let Ok(i) = value.as_int() {
        return Some(StorageValue::Integer(i));
    }
    if let Ok(b) = value.as_bool() {
        return Some(StorageValue::Boolean(b));
    }
    if let Ok(f) = value.as_float() {
        return Some(StorageValue::Float(f));
    }
    value.into_string().ok().map(StorageValue::Text)
}

fn storage_to_dynamic(value: StorageValue) -> Dynamic {
    match value {
        StorageValue::Text(s) => Dynamic::from(s),
        StorageValue::Integer(i) => Dynamic::from(i),
        StorageValue::Float(f) => Dynamic::from(f),
        StorageValue::Boolean(b) => Dynamic::from(b),
    }
}

/// The script-facing result sink.
#[derive(Clone)]
pub struct ResultHandle {
    collector: ResultCollector,
    request_time: NaiveDateTime,
    default_vehicle: VehicleType,
    timetable: bool,
}

impl ResultHandle {
    pub fn new(
        collector: ResultCollector,
        request_time: NaiveDateTime,
        default_vehicle: VehicleType,
        timetable: bool,
    ) -> Self {
        Self {
            collector,
            request_time,
            default_vehicle,
            timetable,
        }
    }

    fn add(&mut self, values: Map) {
        if values.is_empty() {
            warn!("script pushed an empty record, ignoring");
            return;
        }

        let mut record = TimetableRecord::new();
        for (name, value) in values {
            let key: InfoKey = match name.as_str().parse() {
                Ok(key) => key,
                Err(_) => {
                    warn!(key = %name, "unknown information key, skipping");
                    continue;
                }
            };
            match dynamic_to_record_value(key, value, self.request_time.date()) {
                Some(converted) => record.set(key, converted),
                None => warn!(key = %name, "unusable value for key, skipping"),
            }
        }

        if record.is_empty() {
            warn!("record had no usable values, ignoring");
            return;
        }

        // Timetable items without a vehicle type get the provider default.
        if self.timetable && record.get(InfoKey::TypeOfVehicle).is_none() {
            record.set(InfoKey::TypeOfVehicle, self.default_vehicle.name());
        }

        self.collector.add_record(record);
    }

    fn clear(&mut self) {
        self.collector.clear();
    }

    fn count(&mut self) -> i64 {
        (self.collector.published_count() + self.collector.buffered_count()) as i64
    }

    fn published_count(&mut self) -> i64 {
        self.collector.published_count() as i64
    }

    fn set_date_limited(&mut self, limited: bool) {
        self.collector.set_info(crate::domain::GlobalTimetableInfo {
            date_limited: limited,
            requested_time: Some(self.request_time),
        });
    }
}

/// Convert a script value to a typed record value.
///
/// Date-time keys accept full date-times or bare times of day, which are
/// interpreted against the request's date.
fn dynamic_to_record_value(
    key: InfoKey,
    value: Dynamic,
    base_date: NaiveDate,
) -> Option<RecordValue> {
    if value.is_unit() {
        return None;
    }
    if let Ok(i) = value.as_int() {
        return Some(RecordValue::Integer(i));
    }
    if let Ok(b) = value.as_bool() {
        return Some(RecordValue::Boolean(b));
    }
    if let Ok(f) = value.as_float() {
        return Some(RecordValue::Float(f));
    }
    if let Some(array) = value.clone().try_cast::<Array>() {
        let items = array.into_iter().map(|item| item.to_string()).collect();
        return Some(RecordValue::TextList(items));
    }

    let text = value.into_string().ok()?;
    if matches!(key, InfoKey::DepartureDateTime | InfoKey::ArrivalDateTime) {
        if let Some(dt) = parse_date_time(&text, base_date) {
            return Some(RecordValue::DateTime(dt));
        }
    }
    Some(RecordValue::Text(text))
}

fn parse_date_time(text: &str, base_date: NaiveDate) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveTime::parse_from_str(text, "%H:%M")
        .ok()
        .map(|time| base_date.and_time(time))
}

/// Build the parameter map handed to the entry function.
pub fn request_params(request: &Request) -> Map {
    let common = request.common();
    let mut map = Map::new();
    map.insert("provider".into(), Dynamic::from(common.provider.to_string()));
    map.insert(
        "date_time".into(),
        Dynamic::from(common.date_time.format("%Y-%m-%d %H:%M").to_string()),
    );
    map.insert("max_count".into(), Dynamic::from(common.max_count as i64));

    match request {
        Request::Departures(r) => {
            map.insert("data_type".into(), Dynamic::from("departures".to_string()));
            map.insert("stop".into(), Dynamic::from(r.stop.clone()));
            insert_optional(&mut map, "stop_id", &r.stop_id);
            insert_optional(&mut map, "city", &r.city);
        }
        Request::Arrivals(r) => {
            map.insert("data_type".into(), Dynamic::from("arrivals".to_string()));
            map.insert("stop".into(), Dynamic::from(r.stop.clone()));
            insert_optional(&mut map, "stop_id", &r.stop_id);
            insert_optional(&mut map, "city", &r.city);
        }
        Request::Journeys(r) => {
            map.insert("data_type".into(), Dynamic::from("journeys".to_string()));
            map.insert("origin".into(), Dynamic::from(r.origin.clone()));
            map.insert("target".into(), Dynamic::from(r.target.clone()));
            map.insert(
                "time_is_departure".into(),
                Dynamic::from(r.time_is_departure),
            );
        }
        Request::StopSuggestions(r) => {
            map.insert("data_type".into(), Dynamic::from("stop_suggestions".to_string()));
            map.insert("stop".into(), Dynamic::from(r.stop.clone()));
            insert_optional(&mut map, "city", &r.city);
        }
        Request::StopSuggestionsByGeoPosition(r) => {
            map.insert("data_type".into(), Dynamic::from("stop_suggestions_by_geo".to_string()));
            map.insert("longitude".into(), Dynamic::from(r.longitude));
            map.insert("latitude".into(), Dynamic::from(r.latitude));
            map.insert("distance".into(), Dynamic::from(r.distance as i64));
        }
        Request::AdditionalData(r) => {
            map.insert("data_type".into(), Dynamic::from("additional_data".to_string()));
            map.insert("stop".into(), Dynamic::from(r.stop.clone()));
            map.insert("item_index".into(), Dynamic::from(r.item_index as i64));
            insert_optional(&mut map, "route_data_url", &r.route_data_url);
        }
    }

    map
}

fn insert_optional(map: &mut Map, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        map.insert(key.into(), Dynamic::from(value.clone()));
    }
}

/// Register the binding types and their methods into an engine.
///
/// The handle *values* are pushed into each job's scope separately; this
/// only teaches the engine their methods.
pub fn register_bindings(engine: &mut Engine) {
    engine
        .register_type_with_name::<Helper>("Helper")
        .register_fn("trim", Helper::trim)
        .register_fn("strip_tags", Helper::strip_tags)
        .register_fn("decode_html_entities", Helper::decode_html_entities)
        .register_fn("parse_time", Helper::parse_time_default)
        .register_fn("parse_time", Helper::parse_time)
        .register_fn("format_time", Helper::format_time)
        .register_fn("format_date", Helper::format_date)
        .register_fn("add_minutes_to_time", Helper::add_minutes_to_time)
        .register_fn("duration", Helper::duration)
        .register_fn("extract_block", Helper::extract_block);

    engine
        .register_type_with_name::<NetworkHandle>("Network")
        .register_fn("download", NetworkHandle::download)
        .register_fn("download", NetworkHandle::download_with);

    engine
        .register_type_with_name::<StorageHandle>("Storage")
        .register_fn("put", StorageHandle::put)
        .register_fn("get", StorageHandle::get)
        .register_fn("get_or", StorageHandle::get_or)
        .register_fn("has", StorageHandle::has)
        .register_fn("remove", StorageHandle::remove)
        .register_fn("clear", StorageHandle::clear);

    engine
        .register_type_with_name::<ResultHandle>("ResultCollector")
        .register_fn("add", ResultHandle::add)
        .register_fn("clear", ResultHandle::clear)
        .register_fn("count", ResultHandle::count)
        .register_fn("published_count", ResultHandle::published_count)
        .register_fn("set_date_limited", ResultHandle::set_date_limited);
}
