//! Output formatting

use bach_txqueue::{QueueStats, TxRecord};
use serde_json::{json, Value};

/// Final report of a run
pub struct Report {
    json_mode: bool,
    records: Vec<TxRecord>,
    stats: QueueStats,
}

impl Report {
    /// Create a report
    pub fn new(json_mode: bool, records: Vec<TxRecord>, stats: QueueStats) -> Self {
        Self {
            json_mode,
            records,
            stats,
        }
    }

    /// Whether every record confirmed
    pub fn all_confirmed(&self) -> bool {
        self.stats.confirmed == self.stats.total
    }

    /// JSON document
    pub fn to_json(&self) -> Value {
        json!({
            "records": self.records,
            "stats": self.stats,
        })
    }

    /// Human readable lines
    pub fn to_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.records.iter().map(record_line).collect();
        let s = &self.stats;
        lines.push(format!(
            "total {} | confirmed {} | failed {} | cancelled {} | pending {}",
            s.total,
            s.confirmed,
            s.failed,
            s.cancelled,
            s.pending + s.queued
        ));
        lines.push(format!(
            "success rate {:.1}% | avg confirmation {:.0} ms | avg gas {:.0}",
            s.success_rate * 100.0,
            s.avg_confirmation_ms,
            s.avg_gas_used
        ));
        lines
    }

    /// Print to stdout
    pub fn print(&self) {
        if self.json_mode {
            println!("{}", serde_json::to_string_pretty(&self.to_json()).unwrap_or_default());
        } else {
            for line in self.to_lines() {
                println!("{}", line);
            }
        }
    }
}

fn record_line(record: &TxRecord) -> String {
    let mut line = format!("{:<36} {:<10}", record.id.as_str(), record.status.to_string());
    if let Some(hash) = &record.tx_hash {
        line.push_str(&format!(" {:?}", hash));
    }
    if record.retry_count > 0 {
        line.push_str(&format!(" retries={}", record.retry_count));
    }
    if let Some(error) = &record.error {
        line.push_str(&format!(" error=\"{}\"", error));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use bach_txqueue::{Address, EnqueueOptions, TxIntent, TxQueue, TxStatus};

    fn sample() -> (Vec<TxRecord>, QueueStats) {
        let queue = TxQueue::new(3);
        let ok = queue
            .enqueue(
                TxIntent::transfer(Address::repeat_byte(0x22), 1u64),
                EnqueueOptions::new().id("ok"),
            )
            .unwrap();
        let bad = queue
            .enqueue(
                TxIntent::transfer(Address::repeat_byte(0x22), 1u64),
                EnqueueOptions::new().id("bad"),
            )
            .unwrap();
        queue.set_status(&ok, TxStatus::Confirmed);
        queue.record_failure(&bad, "insufficient funds");
        (queue.all(), queue.stats())
    }

    #[test]
    fn test_human_lines() {
        let (records, stats) = sample();
        let report = Report::new(false, records, stats);
        let lines = report.to_lines();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("ok"));
        assert!(lines[0].contains("confirmed"));
        assert!(lines[1].contains("error=\"insufficient funds\""));
        assert!(lines[2].contains("confirmed 1 | failed 1"));
        assert!(lines[3].contains("success rate 50.0%"));
        assert!(!report.all_confirmed());
    }

    #[test]
    fn test_json_document() {
        let (records, stats) = sample();
        let value = Report::new(true, records, stats).to_json();

        assert_eq!(value["records"].as_array().unwrap().len(), 2);
        assert_eq!(value["records"][0]["id"], json!("ok"));
        assert_eq!(value["stats"]["failed"], json!(1));
    }
}
