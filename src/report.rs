use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{RiskLevel, RosterEntry};

#[derive(Debug, Clone, PartialEq)]
pub struct RiskSummary {
    pub risk_level: RiskLevel,
    pub count: usize,
    pub avg_score: f64,
}

/// Counts per risk level, most severe first. Students without a snapshot are left out.
pub fn summarize_by_risk(roster: &[RosterEntry]) -> Vec<RiskSummary> {
    let mut map: HashMap<RiskLevel, (usize, i64)> = HashMap::new();

    for snapshot in roster.iter().filter_map(|entry| entry.latest.as_ref()) {
        let entry = map.entry(snapshot.risk_level).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += i64::from(snapshot.overall_score);
    }

    RiskLevel::ALL
        .iter()
        .filter_map(|level| {
            map.get(level).map(|(count, total)| RiskSummary {
                risk_level: *level,
                count: *count,
                avg_score: if *count == 0 {
                    0.0
                } else {
                    *total as f64 / *count as f64
                },
            })
        })
        .collect()
}

pub fn build_report(school_id: &str, as_of: NaiveDate, roster: &[RosterEntry]) -> String {
    let summaries = summarize_by_risk(roster);

    let mut output = String::new();
    let _ = writeln!(output, "# Student Progress Report");
    let _ = writeln!(
        output,
        "Generated for school {} on {} ({} active students)",
        school_id,
        as_of,
        roster.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No progress snapshots recorded yet.");
    } else {
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- {}: {} students (avg score {:.1})",
                summary.risk_level, summary.count, summary.avg_score
            );
        }
    }

    let mut flagged: Vec<&RosterEntry> = roster
        .iter()
        .filter(|entry| {
            entry
                .latest
                .as_ref()
                .is_some_and(|s| s.risk_level != RiskLevel::Safe)
        })
        .collect();
    flagged.sort_by_key(|entry| entry.latest.as_ref().map(|s| s.overall_score));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Attention");

    if flagged.is_empty() {
        let _ = writeln!(output, "No students flagged.");
    } else {
        for entry in flagged {
            if let Some(snapshot) = &entry.latest {
                let _ = writeln!(
                    output,
                    "- {} ({}, class {}{}) {} score {} (attendance {}%, academics {}%) as of {}",
                    entry.student.name,
                    entry.student.student_id,
                    entry.student.class_level,
                    entry.student.section,
                    snapshot.risk_level,
                    snapshot.overall_score,
                    snapshot.attendance_percentage,
                    snapshot.academic_performance,
                    snapshot.date_recorded
                );
            }
        }
    }

    let missing: Vec<&RosterEntry> = roster.iter().filter(|e| e.latest.is_none()).collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Without Progress Data");

    if missing.is_empty() {
        let _ = writeln!(output, "Every student has a snapshot.");
    } else {
        for entry in missing {
            let _ = writeln!(
                output,
                "- {} ({}, class {}{})",
                entry.student.name,
                entry.student.student_id,
                entry.student.class_level,
                entry.student.section
            );
        }
    }

    output
}
