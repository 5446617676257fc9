use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Flat export formats for the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    /// One JSON object per line.
    JsonLines,
}

impl ExportFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "CSV",
            ExportFormat::JsonLines => "JSON lines",
        }
    }
}

/// Write serializable rows (ranked artists, genre summaries) to `output_path`.
/// Returns the row count.
pub fn export_rows<T: Serialize>(rows: &[T], output_path: &Path, format: ExportFormat) -> Result<usize> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    let mut out = BufWriter::new(file);
    match format {
        ExportFormat::Csv => write_csv(rows, &mut out)?,
        ExportFormat::JsonLines => write_json_lines(rows, &mut out)?,
    }
    out.flush()?;
    Ok(rows.len())
}

/// Header row plus one record per row; absent metrics are empty fields.
pub fn write_csv<T: Serialize, W: Write>(rows: &[T], out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json_lines<T: Serialize, W: Write>(rows: &[T], mut out: W) -> Result<()> {
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::VerificationStatus;
    use crate::scoring::{GrowthPotential, ScoredArtist, genre_summary};

    fn scored(name: &str, followers: Option<i64>) -> ScoredArtist {
        ScoredArtist {
            artist_id: format!("id-{name}"),
            artist_name: name.to_string(),
            primary_genre: "jazz".to_string(),
            lastfm_listeners: Some(48_000),
            lastfm_playcount_per_listener: Some(20.0),
            instagram_handle: None,
            instagram_followers: followers,
            instagram_engagement_rate: None,
            youtube_subscribers: None,
            verification_status: VerificationStatus::Unverified,
            data_quality_score: 0.7 / 3.0,
            underrated_ratio: None,
            engagement_score: None,
            platform_count: 1,
            growth_potential: GrowthPotential::Low,
            priority_score: 0.5,
            collection_date: "2025-03-01T12:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_csv_has_header_and_empty_absent_fields() {
        let mut buf = Vec::new();
        write_csv(&[scored("Echo Bloom", None)], &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("artist_id,artist_name,primary_genre,lastfm_listeners"));
        let record = lines.next().unwrap();
        assert!(record.starts_with("id-Echo Bloom,Echo Bloom,jazz,48000,20.0,,,"));
        assert!(record.contains(",unverified,"));
        assert!(record.contains(",Low,"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_json_lines_one_object_per_row() {
        let mut buf = Vec::new();
        write_json_lines(&[scored("A", Some(10)), scored("B", None)], &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let rows: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["instagram_followers"], 10);
        assert!(rows[1]["instagram_followers"].is_null());
        assert_eq!(rows[1]["growth_potential"], "Low");
    }

    #[test]
    fn test_export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scored.csv");
        let n = export_rows(&[scored("A", None)], &path, ExportFormat::Csv).unwrap();
        assert_eq!(n, 1);
        assert!(std::fs::read_to_string(&path).unwrap().contains("id-A"));
    }

    #[test]
    fn test_genre_summary_csv() {
        let mut high = scored("B", Some(200_000));
        high.growth_potential = GrowthPotential::High;
        high.priority_score = 2.5;
        let genres = genre_summary(&[scored("A", None), high]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genres.csv");
        assert_eq!(export_rows(&genres, &path, ExportFormat::Csv).unwrap(), 1);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("primary_genre,artist_count,avg_priority_score,"));
        assert!(lines.next().unwrap().starts_with("jazz,2,1.5,"));
    }
}
