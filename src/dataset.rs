//! NSL-KDD Dataset Loader

use crate::features::{AttackCategory, ConnectionRecord, LabeledRecord, FIELD_COUNT};
use crate::{DlhaError, Result};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// Load labeled records from an NSL-KDD text file (`KDDTrain+.txt` layout)
pub fn load_nsl_kdd(path: impl AsRef<Path>) -> Result<Vec<LabeledRecord>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| DlhaError::Dataset(format!("{}: {}", path.display(), e)))?;
    let records = parse_nsl_kdd(file)?;
    tracing::info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Parse NSL-KDD rows: 41 feature columns, the raw attack name, and an
/// optional trailing difficulty level. A leading header row is skipped.
pub fn parse_nsl_kdd<R: Read>(reader: R) -> Result<Vec<LabeledRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let row = result.map_err(|e| DlhaError::Dataset(format!("line {}: {}", line + 1, e)))?;

        if line == 0 && row.get(0) == Some("duration") {
            continue;
        }
        if row.len() <= FIELD_COUNT {
            return Err(DlhaError::Dataset(format!(
                "line {}: expected at least {} columns, got {}",
                line + 1,
                FIELD_COUNT + 1,
                row.len()
            )));
        }

        let record = ConnectionRecord::from_columns(row.iter())?;
        let attack = row.get(FIELD_COUNT).unwrap_or_default();
        records.push(LabeledRecord::from_attack_name(record, attack));
    }

    Ok(records)
}

/// Record count per category
pub fn category_counts(records: &[LabeledRecord]) -> BTreeMap<AttackCategory, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.label).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{NumericField, ProtocolType};

    const SAMPLE: &str = "\
0,tcp,ftp_data,SF,491,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,2,2,0.00,0.00,0.00,0.00,1.00,0.00,0.00,150,25,0.17,0.03,0.17,0.00,0.00,0.00,0.05,0.00,normal,20
0,tcp,private,S0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,123,6,1.00,1.00,0.00,0.00,0.05,0.07,0.00,255,26,0.10,0.05,0.00,0.00,1.00,1.00,0.00,0.00,neptune,19
0,icmp,eco_i,SF,18,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,1,1,0.00,0.00,0.00,0.00,1.00,0.00,0.00,1,16,1.00,0.00,1.00,1.00,0.00,0.00,0.00,0.00,IPSWEEP,18
2,tcp,ftp,SF,12983,0,0,0,0,0,0,1,0,0,0,0,0,0,0,0,0,0,1,1,0.00,0.00,0.00,0.00,1.00,0.00,0.00,134,86,0.61,0.04,0.61,0.02,0.00,0.00,0.00,0.00,guess_passwd
";

    #[test]
    fn test_parse_rows() {
        let records = parse_nsl_kdd(SAMPLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 4);

        assert_eq!(records[0].label, AttackCategory::Normal);
        assert_eq!(records[0].record.protocol_type, ProtocolType::Tcp);
        assert_eq!(records[0].record.service, "ftp_data");
        assert_eq!(records[0].record.get(NumericField::SrcBytes), Some(491.0));

        assert_eq!(records[1].label, AttackCategory::DoS);
        assert_eq!(records[2].label, AttackCategory::Probe);
        // No difficulty column on the last row
        assert_eq!(records[3].label, AttackCategory::R2L);
        assert_eq!(records[3].record.get(NumericField::LoggedIn), Some(1.0));
    }

    #[test]
    fn test_skips_header() {
        let header = crate::features::Field::schema()
            .map(|f| f.name())
            .chain(["label"])
            .collect::<Vec<_>>()
            .join(",");
        let input = format!("{}\n{}", header, SAMPLE);
        assert_eq!(parse_nsl_kdd(input.as_bytes()).unwrap().len(), 4);
    }

    #[test]
    fn test_unparseable_cell_is_missing() {
        let row = SAMPLE.lines().next().unwrap().replacen("491", "n/a", 1);
        let records = parse_nsl_kdd(row.as_bytes()).unwrap();
        assert_eq!(records[0].record.get(NumericField::SrcBytes), None);
    }

    #[test]
    fn test_short_row() {
        let result = parse_nsl_kdd("0,tcp,http,SF,10,20,normal\n".as_bytes());
        assert!(matches!(result, Err(DlhaError::Dataset(_))));
    }

    #[test]
    fn test_category_counts() {
        let records = parse_nsl_kdd(SAMPLE.as_bytes()).unwrap();
        let counts = category_counts(&records);
        assert_eq!(counts.get(&AttackCategory::Normal), Some(&1));
        assert_eq!(counts.get(&AttackCategory::U2R), None);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_nsl_kdd("/nonexistent/KDDTrain+.txt"),
            Err(DlhaError::Dataset(_))
        ));
    }
}
