pub mod logfile;
pub mod snapshot;

use tickscope_model::Profile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("log: {0}")]
    Log(#[from] logfile::LogDecodeError),
    #[error("snapshot: {0}")]
    Snapshot(#[from] snapshot::SnapshotParseError),
    #[error("unrecognized trace format")]
    UnknownFormat,
}

/// Auto-detect the trace format and parse it.
///
/// Detection strategy:
/// 1. Try to parse as JSON; an object with a `nodes` array is a
///    call-tree snapshot.
/// 2. Otherwise treat the input as a line-oriented engine log; input
///    with no recognizable records is rejected as an unknown format.
pub fn parse_auto(data: &[u8]) -> Result<Profile, ParseError> {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        if let Some(obj) = value.as_object()
            && obj.get("nodes").is_some_and(serde_json::Value::is_array)
        {
            return Ok(snapshot::parse_snapshot(data)?);
        }
        return Err(ParseError::UnknownFormat);
    }

    match logfile::parse_log(data) {
        Ok(profile) => Ok(profile),
        Err(logfile::LogDecodeError::NotALog) => Err(ParseError::UnknownFormat),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickscope_model::SourceFormat;

    #[test]
    fn detects_snapshot() {
        let json = br#"{"nodes":[{"id":1,"callFrame":{"functionName":"(root)"},"children":[]}],"startTime":0,"endTime":0}"#;
        let profile = match parse_auto(json) {
            Ok(p) => p,
            Err(err) => panic!("parse failed: {err}"),
        };
        assert_eq!(profile.meta.format, SourceFormat::Snapshot);
    }

    #[test]
    fn detects_engine_log() {
        let log = b"code-creation,JS,0,5,0x1000,64,foo file.js:1:1,0x5000,~\ntick,0x1005,100,0,0,0\n";
        let profile = match parse_auto(log) {
            Ok(p) => p,
            Err(err) => panic!("parse failed: {err}"),
        };
        assert_eq!(profile.meta.format, SourceFormat::EngineLog);
    }

    #[test]
    fn rejects_unknown_json() {
        assert!(matches!(
            parse_auto(br#"{"traceEvents":[]}"#),
            Err(ParseError::UnknownFormat)
        ));
    }

    #[test]
    fn rejects_unknown_text() {
        assert!(matches!(
            parse_auto(b"hello world\nthis is not a trace\n"),
            Err(ParseError::UnknownFormat)
        ));
    }
}
