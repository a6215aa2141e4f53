// Work-list classification
//
// Pure aggregation over an extracted work list, used for the pre-run
// confirmation prompt and the post-run summary. No I/O, no failure
// modes, order-independent.

use std::fmt::Write as _;

use super::models::{RunStatistics, WorkItem};

/// Derive aggregate statistics from a work-item list.
pub fn analyze(items: &[WorkItem]) -> RunStatistics {
    let mut stats = RunStatistics {
        total: items.len(),
        ..RunStatistics::default()
    };
    for item in items {
        stats.kinds.record(item.media_kind);
        match item.year() {
            Some(year) => *stats.by_year.entry(year).or_insert(0) += 1,
            None => stats.undated += 1,
        }
    }
    stats
}

impl RunStatistics {
    /// Human-readable breakdown for chat messages.
    pub fn describe(&self) -> String {
        let mut text = format!("📦 Found {} memories\n", self.total);
        let _ = writeln!(text, "🖼 Images: {}", self.kinds.images);
        let _ = writeln!(text, "🎬 Videos: {}", self.kinds.videos);
        if self.kinds.other > 0 {
            let _ = writeln!(text, "📄 Other: {}", self.kinds.other);
        }
        if !self.by_year.is_empty() {
            let _ = writeln!(text, "\nBy year:");
            for (year, count) in &self.by_year {
                let _ = writeln!(text, "  {}: {}", year, count);
            }
        }
        if self.undated > 0 {
            let _ = writeln!(text, "  undated: {}", self.undated);
        }
        text.trim_end().to_string()
    }
}
