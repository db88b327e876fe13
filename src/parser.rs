use crate::error::PipelineError;
use chrono::{DateTime, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// One operator's punctuality snapshot as received from the feed.
///
/// Field order is the spool's CSV column order: name, ppm, date, time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub operator_name: String,
    pub ppm: f64,
    pub record_date: NaiveDate,
    pub record_time: NaiveTime,
}

#[derive(Debug, Deserialize)]
struct FeedMessage {
    #[serde(rename = "RTPPMDataMsgV1")]
    envelope: Envelope,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "RTPPMData")]
    data: RtppmData,
}

#[derive(Debug, Deserialize)]
struct RtppmData {
    #[serde(rename = "snapshotTStamp")]
    snapshot_tstamp: WireNumber,
    #[serde(rename = "NationalPage")]
    national_page: NationalPage,
}

#[derive(Debug, Deserialize)]
struct NationalPage {
    #[serde(rename = "Operator")]
    operators: Vec<OperatorEntry>,
}

#[derive(Debug, Deserialize)]
struct OperatorEntry {
    name: String,
    #[serde(rename = "PPM")]
    ppm: PpmValue,
}

#[derive(Debug, Deserialize)]
struct PpmValue {
    text: WireNumber,
}

// The feed encodes numerics inconsistently, sometimes as JSON strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireNumber {
    Str(String),
    Int(i64),
    Float(f64),
}

impl WireNumber {
    fn as_i64(&self, field: &str) -> Result<i64, PipelineError> {
        match self {
            WireNumber::Str(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| malformed(field, raw)),
            WireNumber::Int(value) => Ok(*value),
            WireNumber::Float(value) => Ok(*value as i64),
        }
    }

    fn as_f64(&self, field: &str) -> Result<f64, PipelineError> {
        match self {
            WireNumber::Str(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|_| malformed(field, raw)),
            WireNumber::Int(value) => Ok(*value as f64),
            WireNumber::Float(value) => Ok(*value),
        }
    }
}

fn malformed(field: &str, raw: &str) -> PipelineError {
    PipelineError::MalformedMessage(format!("field {field} is not numeric: {raw:?}"))
}

/// Turn one decoded broker message body into normalized events, one per
/// operator entry, all sharing the snapshot's derived UTC date and time.
///
/// Pure; any missing or wrongly-shaped required field rejects the whole
/// message as `MalformedMessage` and yields zero events.
pub fn parse_feed_message(payload: &[u8]) -> Result<Vec<RawEvent>, PipelineError> {
    let message: FeedMessage = serde_json::from_slice(payload)
        .map_err(|err| PipelineError::MalformedMessage(err.to_string()))?;
    let data = message.envelope.data;

    // The feed stamps snapshots in epoch milliseconds.
    let millis = data.snapshot_tstamp.as_i64("snapshotTStamp")?;
    let snapshot = DateTime::from_timestamp(millis / 1000, 0).ok_or_else(|| {
        PipelineError::MalformedMessage(format!("snapshot timestamp out of range: {millis}"))
    })?;
    let record_date = snapshot.date_naive();
    let record_time = snapshot.time();

    data.national_page
        .operators
        .into_iter()
        .map(|entry| {
            let ppm = entry.ppm.text.as_f64("PPM.text")?;
            Ok(RawEvent {
                operator_name: entry.name,
                ppm,
                record_date,
                record_time,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01 09:15:00 UTC
    const SNAPSHOT_MS: i64 = 1_704_100_500_000;

    fn feed_body(snapshot: &str, operators: &str) -> Vec<u8> {
        format!(
            r#"{{"RTPPMDataMsgV1":{{"RTPPMData":{{{snapshot}"NationalPage":{{"Operator":[{operators}]}}}}}}}}"#
        )
        .into_bytes()
    }

    #[test]
    fn parses_one_event_per_operator_sharing_the_snapshot_stamp() {
        let body = feed_body(
            &format!(r#""snapshotTStamp":"{SNAPSHOT_MS}","#),
            r#"{"name":"LNER","PPM":{"text":"92"}},{"name":"GWR","PPM":{"text":"85.5"}},{"name":"Avanti","PPM":{"text":71}}"#,
        );

        let events = parse_feed_message(&body).expect("parsed");
        assert_eq!(events.len(), 3);
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let time = NaiveTime::from_hms_opt(9, 15, 0).unwrap();
        for event in &events {
            assert_eq!(event.record_date, date);
            assert_eq!(event.record_time, time);
        }
        assert_eq!(events[0].operator_name, "LNER");
        assert_eq!(events[0].ppm, 92.0);
        assert_eq!(events[1].ppm, 85.5);
        assert_eq!(events[2].ppm, 71.0);
    }

    #[test]
    fn accepts_numeric_snapshot_timestamp() {
        let body = feed_body(
            &format!(r#""snapshotTStamp":{SNAPSHOT_MS},"#),
            r#"{"name":"LNER","PPM":{"text":"92"}}"#,
        );
        let events = parse_feed_message(&body).expect("parsed");
        assert_eq!(events[0].record_time, NaiveTime::from_hms_opt(9, 15, 0).unwrap());
    }

    #[test]
    fn missing_snapshot_timestamp_is_malformed() {
        let body = feed_body("", r#"{"name":"LNER","PPM":{"text":"92"}}"#);
        let err = parse_feed_message(&body).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedMessage(_)));
    }

    #[test]
    fn non_numeric_ppm_is_malformed() {
        let body = feed_body(
            &format!(r#""snapshotTStamp":"{SNAPSHOT_MS}","#),
            r#"{"name":"LNER","PPM":{"text":"n/a"}}"#,
        );
        let err = parse_feed_message(&body).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedMessage(_)));
    }

    #[test]
    fn empty_operator_array_yields_no_events() {
        let body = feed_body(&format!(r#""snapshotTStamp":"{SNAPSHOT_MS}","#), "");
        let events = parse_feed_message(&body).expect("parsed");
        assert!(events.is_empty());
    }

    #[test]
    fn junk_payload_is_malformed() {
        let err = parse_feed_message(b"not json at all").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedMessage(_)));
    }
}
