//! Per-second statistics records and the snapshots built from them

use serde::{Deserialize, Serialize};

/// Statistics for one finalized second (or an aggregate of several).
///
/// Times are epoch seconds, response times milliseconds, `error_rate` a
/// percentage in `[0, 100]`. Every derived field is 0 when its source count
/// is 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Stat {
    pub time: i64,
    pub success_count: u64,
    pub failure_count: u64,
    pub tps_success: f64,
    pub tps_failure: f64,
    pub response_time: f64,
    pub response_time90: f64,
    pub response_time95: f64,
    pub response_time99: f64,
    pub failure_response_time: f64,
    pub failure_response_time90: f64,
    pub failure_response_time95: f64,
    pub failure_response_time99: f64,
    pub error_rate: f64,
}

impl Stat {
    /// Success + failure count
    #[inline]
    pub fn total_count(&self) -> u64 {
        self.success_count + self.failure_count
    }
}

/// Failure percentage of a population, 0 when empty
#[inline]
pub fn error_rate_percent(success: u64, failure: u64) -> f64 {
    let total = success + failure;
    if total == 0 {
        return 0.0;
    }
    failure as f64 / total as f64 * 100.0
}

/// Three downsampled tiers for live charting, each oldest-to-newest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    /// ~1s resolution, last ~5 minutes
    pub recent: Vec<Stat>,
    /// ~5s resolution, last ~30 minutes
    pub medium: Vec<Stat>,
    /// ~30s resolution, last ~4 hours
    #[serde(rename = "longterm")]
    pub long_term: Vec<Stat>,
}

/// Session-lifetime totals as exposed to callers
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CumulativeSnapshot {
    pub average_response_time: f64,
    pub error_rate: f64,
    pub total_requests: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rate_percent() {
        assert_eq!(error_rate_percent(0, 0), 0.0);
        assert_eq!(error_rate_percent(9, 1), 10.0);
        assert_eq!(error_rate_percent(0, 4), 100.0);
    }

    #[test]
    fn test_stat_json_keys() {
        let stat = Stat { time: 1_700_000_000, success_count: 3, ..Stat::default() };
        let json = serde_json::to_value(&stat).unwrap();
        assert_eq!(json["Time"], 1_700_000_000);
        assert_eq!(json["SuccessCount"], 3);
        assert!(json.get("ResponseTime90").is_some());
        assert!(json.get("FailureResponseTime99").is_some());
        assert!(json.get("ErrorRate").is_some());
    }

    #[test]
    fn test_chart_series_json_keys() {
        let series = ChartSeries::default();
        let json = serde_json::to_value(&series).unwrap();
        assert!(json.get("recent").is_some());
        assert!(json.get("medium").is_some());
        assert!(json.get("longterm").is_some());
    }
}
