use chrono::{DateTime, Utc};
use humansize::{format_size, DECIMAL};

/// Timing and volume figures for one proxy invocation.
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Bytes flowing remote to local stdout. The other direction is not
    /// counted.
    pub written_bytes: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            connected_at: None,
            disconnected_at: None,
            written_bytes: 0,
        }
    }

    pub fn mark_connected(&mut self) {
        self.connected_at = Some(Utc::now());
    }

    pub fn mark_disconnected(&mut self) {
        self.disconnected_at = Some(Utc::now());
    }

    /// Connection duration in seconds, rounded to the nearest second.
    pub fn connection_duration_secs(&self) -> u64 {
        let (Some(connected), Some(disconnected)) = (self.connected_at, self.disconnected_at)
        else {
            return 0;
        };
        let millis = (disconnected - connected).num_milliseconds().max(0) as u64;
        (millis + 500) / 1000
    }

    /// Average throughput in bytes per second, with milli precision
    /// (`ceil(x * 1000) / 1000`).
    pub fn average_speed(&self) -> f64 {
        let (Some(connected), Some(disconnected)) = (self.connected_at, self.disconnected_at)
        else {
            return 0.0;
        };
        let millis = (disconnected - connected).num_milliseconds().max(0);
        if millis == 0 {
            return 0.0;
        }
        let raw = self.written_bytes as f64 / (millis as f64 / 1000.0);
        (raw * 1000.0).ceil() / 1000.0
    }

    pub fn written_bytes_human(&self) -> String {
        format_size(self.written_bytes, DECIMAL)
    }

    pub fn duration_human(&self) -> String {
        format!("{} sec", self.connection_duration_secs())
    }

    pub fn average_speed_human(&self) -> String {
        format!("{}/s", format_size(self.average_speed() as u64, DECIMAL))
    }
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}
