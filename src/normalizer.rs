//! Transformation from provider payloads to persistence-ready rows.
//!
//! Both steps are pure. [`extract_current`] never fails; a missing nested
//! field just becomes `None`. [`coerce_and_default`] is the single place
//! where optionality disappears.

use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;

use crate::error::NormalizeError;
use crate::models::{NormalizedRecord, PartialRecord, RawObservation};

// ---

/// Placeholder for missing text fields.
pub const UNKNOWN: &str = "unknown";

/// Project the current-conditions fields out of a provider payload.
pub fn extract_current(raw: &RawObservation) -> PartialRecord {
    // ---
    let current = raw.current.clone().unwrap_or_default();
    let condition = current
        .weather
        .as_ref()
        .and_then(|w| w.first())
        .cloned()
        .unwrap_or_default();

    PartialRecord {
        lat: raw.lat,
        lon: raw.lon,
        timezone: raw.timezone.clone(),
        dt: current.dt,
        temp: current.temp,
        feels_like: current.feels_like,
        pressure: current.pressure,
        humidity: current.humidity,
        dew_point: current.dew_point,
        uvi: current.uvi,
        clouds: current.clouds,
        visibility: current.visibility,
        wind_speed: current.wind_speed,
        wind_deg: current.wind_deg,
        weather_main: condition.main,
        weather_description: condition.description,
    }
}

/// Outcome of coercing one row of a batch.
pub type RowResult = Result<NormalizedRecord, NormalizeError>;

/// Coerce a batch of partial records, filling defaults and deriving
/// `local_time`.
///
/// Only a structurally invalid batch (an empty one) fails as a whole, with
/// [`NormalizeError::MalformedBatch`]. Row problems such as a timestamp
/// outside the representable range stay with their row, one output entry
/// per input in the same order.
pub fn coerce_and_default(records: &[PartialRecord]) -> Result<Vec<RowResult>, NormalizeError> {
    // ---
    if records.is_empty() {
        return Err(NormalizeError::MalformedBatch {
            reason: "no rows to coerce".to_string(),
        });
    }

    Ok(records.iter().map(coerce_record).collect())
}

/// Coerce a single partial record.
pub fn coerce_record(partial: &PartialRecord) -> RowResult {
    // ---
    let dt = partial.dt.unwrap_or(0);
    let timezone = partial
        .timezone
        .as_deref()
        .map(str::trim)
        .filter(|tz| !tz.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string();

    Ok(NormalizedRecord {
        lat: float(partial.lat),
        lon: float(partial.lon),
        local_time: local_time(dt, &timezone)?,
        timezone,
        dt,
        temp: float(partial.temp),
        feels_like: float(partial.feels_like),
        pressure: int(partial.pressure),
        humidity: int(partial.humidity),
        dew_point: float(partial.dew_point),
        uvi: float(partial.uvi),
        clouds: int(partial.clouds),
        visibility: int(partial.visibility),
        wind_speed: float(partial.wind_speed),
        wind_deg: int(partial.wind_deg),
        weather_main: text(partial.weather_main.as_deref()),
        weather_description: text(partial.weather_description.as_deref()),
    })
}

/// Interpret `dt` as UTC and shift it into `timezone`. Zones chrono-tz does
/// not know fall back to UTC.
pub fn local_time(dt: i64, timezone: &str) -> Result<DateTime<FixedOffset>, NormalizeError> {
    // ---
    let utc: DateTime<Utc> =
        DateTime::from_timestamp(dt, 0).ok_or(NormalizeError::InvalidTimestamp { dt })?;

    match timezone.parse::<Tz>() {
        Ok(tz) => Ok(utc.with_timezone(&tz).fixed_offset()),
        Err(_) => {
            tracing::debug!("Unknown timezone '{}', using UTC", timezone);
            Ok(utc.fixed_offset())
        }
    }
}

fn float(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

// `as` truncates toward zero and saturates; NaN becomes 0.
fn int(value: Option<f64>) -> i32 {
    value.map(|v| v as i32).unwrap_or(0)
}

fn text(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_lowercase(),
        _ => UNKNOWN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{CurrentConditions, WeatherCondition};

    fn sample_raw() -> RawObservation {
        // ---
        RawObservation {
            lat: Some(40.7128),
            lon: Some(-74.006),
            timezone: Some("America/New_York".to_string()),
            current: Some(CurrentConditions {
                dt: Some(1625812800),
                temp: Some(298.77),
                feels_like: Some(298.77),
                pressure: Some(1016.0),
                humidity: Some(53.0),
                dew_point: Some(288.71),
                uvi: Some(0.89),
                clouds: Some(40.0),
                visibility: Some(10000.0),
                wind_speed: Some(4.12),
                wind_deg: Some(150.0),
                weather: Some(vec![WeatherCondition {
                    main: Some("Clouds".to_string()),
                    description: Some("few clouds".to_string()),
                }]),
            }),
        }
    }

    fn normalize(raw: &RawObservation) -> NormalizedRecord {
        coerce_and_default(&[extract_current(raw)]).unwrap().remove(0).unwrap()
    }

    #[test]
    fn test_sample_payload() {
        // ---
        let record = normalize(&sample_raw());

        assert_eq!(record.weather_main, "clouds");
        assert_eq!(record.weather_description, "few clouds");
        assert_eq!(record.humidity, 53);
        assert_eq!(record.pressure, 1016);
        assert_eq!(record.visibility, 10000);
        assert_eq!(record.temp, 298.77);
        assert_eq!(record.timezone, "America/New_York");
        assert_eq!(record.dt, 1625812800);
    }

    #[test]
    fn test_local_time_new_york() {
        // ---
        // 1625812800 is 2021-07-09T06:40:00Z
        let record = normalize(&sample_raw());
        assert_eq!(record.local_time.to_rfc3339(), "2021-07-09T02:40:00-04:00");

        let four_am = local_time(1625817600, "America/New_York").unwrap();
        assert_eq!(four_am.to_rfc3339(), "2021-07-09T04:00:00-04:00");
    }

    #[test]
    fn test_local_time_tokyo_and_winter_offset() {
        // ---
        let tokyo = local_time(1625817600, "Asia/Tokyo").unwrap();
        assert_eq!(tokyo.to_rfc3339(), "2021-07-09T17:00:00+09:00");

        // 2021-01-09T08:00:00Z, New York is on EST
        let winter = local_time(1610179200, "America/New_York").unwrap();
        assert_eq!(winter.to_rfc3339(), "2021-01-09T03:00:00-05:00");
    }

    #[test]
    fn test_unknown_timezone_falls_back_to_utc() {
        // ---
        let t = local_time(1625817600, "Mars/Olympus").unwrap();
        assert_eq!(t.to_rfc3339(), "2021-07-09T08:00:00+00:00");
    }

    #[test]
    fn test_out_of_range_timestamp() {
        // ---
        let err = local_time(i64::MAX, "UTC").unwrap_err();
        assert_eq!(err, NormalizeError::InvalidTimestamp { dt: i64::MAX });
    }

    #[test]
    fn test_normalization_is_idempotent() {
        // ---
        let raw = sample_raw();
        let a = normalize(&raw);
        let b = normalize(&raw);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_empty_payload_gets_all_defaults() {
        // ---
        let record = normalize(&RawObservation::default());

        assert_eq!(record.lat, 0.0);
        assert_eq!(record.temp, 0.0);
        assert_eq!(record.humidity, 0);
        assert_eq!(record.wind_deg, 0);
        assert_eq!(record.timezone, UNKNOWN);
        assert_eq!(record.weather_main, UNKNOWN);
        assert_eq!(record.weather_description, UNKNOWN);
        assert_eq!(record.local_time.to_rfc3339(), "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_every_single_missing_field_is_defaulted() {
        // ---
        // Blank out one field at a time and check the row stays complete
        let full = extract_current(&sample_raw());
        let blankers: Vec<fn(&mut PartialRecord)> = vec![
            |p| p.lat = None,
            |p| p.lon = None,
            |p| p.timezone = None,
            |p| p.dt = None,
            |p| p.temp = None,
            |p| p.feels_like = None,
            |p| p.pressure = None,
            |p| p.humidity = None,
            |p| p.dew_point = None,
            |p| p.uvi = None,
            |p| p.clouds = None,
            |p| p.visibility = None,
            |p| p.wind_speed = None,
            |p| p.wind_deg = None,
            |p| p.weather_main = None,
            |p| p.weather_description = None,
        ];

        for blank in blankers {
            let mut partial = full.clone();
            blank(&mut partial);
            let record = coerce_and_default(&[partial]).unwrap().remove(0).unwrap();
            assert!(!record.timezone.is_empty());
            assert!(!record.weather_main.is_empty());
            assert!(!record.weather_description.is_empty());
        }
    }

    #[test]
    fn test_missing_weather_list_entry() {
        // ---
        let mut raw = sample_raw();
        raw.current.as_mut().unwrap().weather = Some(vec![]);
        let partial = extract_current(&raw);
        assert_eq!(partial.weather_main, None);
        assert_eq!(normalize(&raw).weather_main, UNKNOWN);
    }

    #[test]
    fn test_integer_coercion_truncates() {
        // ---
        let partial = PartialRecord {
            humidity: Some(53.9),
            wind_deg: Some(-1.5),
            visibility: Some(1e12),
            clouds: Some(f64::NAN),
            ..Default::default()
        };
        let record = coerce_and_default(&[partial]).unwrap().remove(0).unwrap();
        assert_eq!(record.humidity, 53);
        assert_eq!(record.wind_deg, -1);
        assert_eq!(record.visibility, i32::MAX);
        assert_eq!(record.clouds, 0);
    }

    #[test]
    fn test_condition_text_is_lowercased() {
        // ---
        let partial = PartialRecord {
            weather_main: Some("THUNDERSTORM".into()),
            weather_description: Some("  ".into()),
            ..Default::default()
        };
        let record = coerce_and_default(&[partial]).unwrap().remove(0).unwrap();
        assert_eq!(record.weather_main, "thunderstorm");
        assert_eq!(record.weather_description, UNKNOWN);
    }

    #[test]
    fn test_empty_batch_is_malformed() {
        // ---
        let err = coerce_and_default(&[]).unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedBatch { .. }));
    }

    #[test]
    fn test_batch_keeps_row_count_and_order() {
        // ---
        let mut second = extract_current(&sample_raw());
        second.lat = Some(51.5074);
        let batch = vec![extract_current(&sample_raw()), second];

        let out = coerce_and_default(&batch).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].as_ref().unwrap().lat, 51.5074);
    }

    #[test]
    fn test_bad_timestamp_only_fails_its_own_row() {
        // ---
        let good = PartialRecord {
            dt: Some(1625817600),
            ..Default::default()
        };
        let bad = PartialRecord {
            dt: Some(i64::MAX),
            ..Default::default()
        };

        let out = coerce_and_default(&[good, bad]).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap().dt, 1625817600);
        assert_eq!(
            out[1],
            Err(NormalizeError::InvalidTimestamp { dt: i64::MAX })
        );
    }

    #[test]
    fn test_json_export_column_order() {
        // ---
        let json = serde_json::to_string(&normalize(&sample_raw())).unwrap();
        let lon = json.find("\"lon\"").unwrap();
        let local = json.find("\"local_time\"").unwrap();
        let tz = json.find("\"timezone\"").unwrap();
        assert!(lon < local && local < tz);
    }
}
